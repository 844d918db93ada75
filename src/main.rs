mod command;
mod config;
mod simulation;
mod transport;

use clap::Parser;
use command::CommandDispatcher;
use config::BotConfig;
use homy_shared::{codec, topic};
use simulation::SimulatedLight;
use std::path::PathBuf;
use std::sync::Arc;
use transport::{MemoryBroker, PubSub, Subscription};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bath-lights", about = "Bath lights automation with command verification")]
struct Cli {
    /// JSON bot configuration; the built-in demo setup is used when omitted
    #[arg(env = "BATH_LIGHTS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = BotConfig::load_or_default(cli.config.as_deref())?;

    let broker = MemoryBroker::new();
    let transport: Arc<dyn PubSub> = Arc::new(broker.clone());
    info!("Automation starting: {}", config.bot_name);
    info!("  Transport: {}", transport.name());
    info!("  Failure topic: {}", topic::command_failed(&config.bot_name));

    // Simulated devices answer on the in-process broker
    for (channel_id, channel) in &config.channels {
        if let Some(sim) = &channel.simulate {
            SimulatedLight::new(channel_id, channel, sim.clone())
                .spawn(transport.clone())
                .await?;
        }
    }

    let failures = transport.subscribe(&topic::command_failed_any()).await?;
    let monitor = tokio::spawn(handle_failures(failures));

    let (dispatcher, controller) = CommandDispatcher::spawn(transport.clone(), &config).await?;
    let channel_ids = dispatcher.channel_ids();
    info!(
        "Command dispatcher started: {} channels ({} verified)",
        channel_ids.len(),
        channel_ids.iter().filter(|id| dispatcher.is_verified(id)).count()
    );
    info!("  Broker subscriptions: {}", broker.subscriber_count().await);

    tokio::select! {
        _ = toggle_cycle(&dispatcher, config.toggle_interval()) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    drop(dispatcher);
    if let Err(e) = controller.await {
        error!("Verification controller panicked: {}", e);
    }
    monitor.abort();

    Ok(())
}

/// Switch every channel on and off at a fixed interval
async fn toggle_cycle(dispatcher: &CommandDispatcher, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut on = true;

    loop {
        ticker.tick().await;

        for channel_id in dispatcher.channel_ids() {
            let unverified = dispatcher.pending_count_for(&channel_id).await;
            if unverified > 0 {
                warn!(
                    "{} still has {} unverified commands, switching anyway",
                    channel_id, unverified
                );
            }
            if let Err(e) = dispatcher.switch(&channel_id, on).await {
                error!("Failed to switch {}: {}", channel_id, e);
            }
        }

        info!(
            "Switched lights {} ({} commands awaiting verification)",
            if on { "on" } else { "off" },
            dispatcher.pending_count().await
        );
        on = !on;
    }
}

/// Log failure telemetry from every automation bot
async fn handle_failures(mut failures: Subscription) {
    while let Some(msg) = failures.recv().await {
        match codec::decode_failure(&msg.payload) {
            Ok(event) => warn!(
                "[MONITOR] {}: {} failed after {} attempts (expected {}, actual {:?})",
                msg.topic, event.reason, event.attempts, event.expected_state, event.actual_state
            ),
            Err(e) => error!("[MONITOR] Unreadable failure event on {}: {}", msg.topic, e),
        }
    }
}
