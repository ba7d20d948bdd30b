//! Task wiring: producers -> pipeline -> actuator supervisor
//!
//! Every long-lived task gets its own `Shutdown` listener and stops on its
//! own; the signal handler only pulls the trigger.

use std::future::Future;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use sf_core::constants::telemetry::SAMPLE_CHANNEL_CAPACITY;
use sf_core::producers::{AntNode, AntPlusConfig, AntPlusProducer, ProducerExit};
use sf_core::{
    sample_channel, shutdown_channel, ConnectionSupervisor, DecisionPipeline, ProcFsProbe,
    SampleSender, Settings, Shutdown, SimulatorConfig, SimulatorProducer, SourceKind,
    SupervisorConfig,
};

use crate::backends::{ReplayAntNode, UnavailableAntNode, UnavailableTransport};

/// Run every task until SIGINT/SIGTERM
pub async fn run(settings: Settings, antplus_replay: Option<PathBuf>) -> anyhow::Result<()> {
    let (trigger, shutdown) = shutdown_channel();
    let (sender, receiver) = sample_channel(SAMPLE_CHANNEL_CAPACITY);
    if settings.bridge_active() {
        warn!("BRIDGE: no GATT peripheral backend in this build, bridge disabled");
    }

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Actuator
    let supervisor_config = SupervisorConfig::from_settings(&settings.ble);
    if supervisor_config.skip {
        info!("TEST MODE: ble.skip_connection set, levels are only logged");
    } else {
        warn!("BLE: no radio backend in this build, the fan will not be reached");
    }
    let (supervisor, actuator) = ConnectionSupervisor::new(UnavailableTransport, supervisor_config);
    tasks.push(spawn_named("actuator supervisor", {
        let shutdown = shutdown.clone();
        async move {
            supervisor.run(shutdown).await;
        }
    }));

    // Decision pipeline
    let pipeline = DecisionPipeline::new(&settings, Instant::now())?;
    tasks.push(spawn_named(
        "decision pipeline",
        pipeline.run(receiver, actuator, shutdown.clone()),
    ));

    // Producers
    if settings.uses_source(SourceKind::AntPlus) {
        let config = AntPlusConfig::from_settings(&settings);
        let task = match antplus_replay {
            Some(path) => spawn_antplus(ReplayAntNode::new(path), config, &sender, shutdown.clone()),
            None => spawn_antplus(UnavailableAntNode, config, &sender, shutdown.clone()),
        };
        tasks.push(task);
    }
    if settings.uses_source(SourceKind::Zwift) {
        let producer = SimulatorProducer::new(
            ProcFsProbe::default(),
            SimulatorConfig::from_settings(&settings.data_source.zwift),
            &sender,
        );
        tasks.push(spawn_producer("simulator", producer.run(shutdown.clone())));
    }
    // Producers hold their own clones
    drop(sender);

    info!(tasks = tasks.len(), "STARTUP: all tasks running (Ctrl+C to stop)");
    wait_for_signal().await?;
    info!("SIGNAL: shutdown requested");
    trigger.trigger();

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Task panicked during shutdown");
        }
    }
    info!("SHUTDOWN: smartfand stopped");
    Ok(())
}

fn spawn_antplus<N: AntNode + 'static>(
    node: N,
    config: AntPlusConfig,
    sender: &SampleSender,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    let producer = AntPlusProducer::new(node, config, sender);
    spawn_producer("ANT+", producer.run(shutdown))
}

fn spawn_producer(
    name: &'static str,
    run: impl Future<Output = ProducerExit> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match run.await {
            ProducerExit::Shutdown => info!(producer = name, "Producer stopped"),
            ProducerExit::ChannelClosed => warn!(producer = name, "Producer stopped: pipeline gone"),
            ProducerExit::RetriesExhausted => {
                warn!(producer = name, "SOURCES: producer gave up, fallback stays in charge")
            }
        }
    })
}

fn spawn_named(name: &'static str, task: impl Future<Output = ()> + Send + 'static) -> JoinHandle<()> {
    tokio::spawn(async move {
        task.await;
        info!(task = name, "Task stopped");
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
