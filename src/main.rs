use clap::Parser;
use rumqttc::{ConnectionError, EventLoop, Packet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use evoclaw_cognition::config::Config;
use evoclaw_cognition::mqtt::MqttBridge;
use evoclaw_cognition::protocol::{Command, Event};
use evoclaw_cognition::render::TextRenderer;
use evoclaw_cognition::types::CycleRequest;
use evoclaw_cognition::worker::WorkerBuilder;

/// EvoClaw cognition worker - periodic background cognitive cycles
#[derive(Parser, Debug)]
#[command(name = "evoclaw-cognition", version, about)]
struct Args {
    /// Path to TOML configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent ID, used when no config file is given
    #[arg(short, long, default_value = "cognition")]
    id: String,

    /// Override the cycle interval in seconds
    #[arg(long)]
    interval: Option<u64>,
}

async fn poll_mqtt(eventloop: &mut Option<EventLoop>) -> Result<rumqttc::Event, ConnectionError> {
    match eventloop {
        Some(eventloop) => eventloop.poll().await,
        None => std::future::pending().await,
    }
}

fn log_event(event: &Event) {
    match event {
        Event::InsightGenerated {
            cycle_id,
            content,
            confidence,
        } => info!(cycle_id = %cycle_id, confidence, "insight: {}", content),
        Event::TaskCreated { cycle_id, task } => {
            info!(cycle_id = %cycle_id, task_id = %task.id, goal = %task.parent_goal, "task: {}", task.description)
        }
        Event::Error { cycle_id, error } => {
            warn!(cycle_id = ?cycle_id, error = %error, "worker reported error")
        }
        other => info!(event = other.kind(), cycle_id = ?other.cycle_id(), "worker event"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default_for_agent(args.id.clone()),
    };
    if let Some(interval) = args.interval {
        config.cycle.interval_secs = interval;
    }

    info!(
        agent_id = %config.agent_id,
        interval_secs = config.cycle.interval_secs,
        strategy = ?config.strategy.kind,
        "🧬 EvoClaw cognition worker starting"
    );

    let (mut host, orchestrator, worker) = WorkerBuilder::new(&config).spawn();

    let (bridge, mut eventloop) = match &config.mqtt {
        Some(mqtt) => {
            let renderer = TextRenderer::new(config.render.clone())?;
            let (bridge, eventloop) = MqttBridge::new(mqtt, config.agent_id.clone(), renderer)?;
            bridge.subscribe().await?;
            (Some(bridge), Some(eventloop))
        }
        None => {
            info!("no MQTT broker configured, logging events locally");
            (None, None)
        }
    };

    let liveness = Duration::from_secs(config.cycle.liveness_secs);
    let heartbeat_secs = config.cycle.heartbeat_secs.max(1);
    let mut cycle_interval =
        tokio::time::interval(Duration::from_secs(config.cycle.interval_secs.max(1)));
    let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(heartbeat_secs));
    let mut last_event = Instant::now();

    info!("worker ready, entering main loop");

    loop {
        tokio::select! {
            // Forward broker commands to the worker
            event = poll_mqtt(&mut eventloop) => {
                match event {
                    Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                        if host.send_raw(publish.payload.to_vec()).is_err() {
                            error!("worker channel closed");
                            break;
                        }
                    }
                    Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                    }
                    Err(e) => {
                        error!(error = %e, "MQTT error, reconnecting...");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    _ => {}
                }
            }
            // Relay worker events
            event = host.recv() => {
                let Some(event) = event else {
                    error!("worker stopped unexpectedly");
                    break;
                };
                last_event = Instant::now();
                match &bridge {
                    Some(bridge) => {
                        if let Err(e) = bridge.publish_event(event).await {
                            warn!(error = %e, "failed to publish event");
                        }
                    }
                    None => log_event(&event),
                }
            }
            // Start the next cycle
            _ = cycle_interval.tick() => {
                let request = CycleRequest::new(
                    format!("cycle-{}", uuid::Uuid::new_v4()),
                    config.cycle.cycle_config(),
                );
                if host.send(Command::RunCycle(request)).is_err() {
                    error!("worker channel closed");
                    break;
                }
            }
            // Heartbeat and liveness
            _ = heartbeat_interval.tick() => {
                let metrics = orchestrator.heartbeat(heartbeat_secs);
                let outstanding = orchestrator.outstanding();
                if !outstanding.is_empty() && last_event.elapsed() > liveness {
                    warn!(
                        outstanding = outstanding.len(),
                        silent_secs = last_event.elapsed().as_secs(),
                        "event channel silent past liveness window"
                    );
                }
                match &bridge {
                    Some(bridge) => {
                        if let Err(e) = bridge.publish_heartbeat(metrics, outstanding).await {
                            warn!(error = %e, "failed to send heartbeat");
                        }
                    }
                    None => info!(
                        completed = metrics.cycles_completed,
                        failed = metrics.cycles_failed,
                        success_rate = metrics.success_rate(),
                        "heartbeat"
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown requested");
                break;
            }
        }
    }

    orchestrator.shutdown();
    drop(host);
    if let Err(e) = worker.await {
        error!(error = %e, "worker task failed");
    }
    info!("cognition worker stopped");
    Ok(())
}
