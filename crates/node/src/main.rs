use std::env;

use anyhow::{Context, Result};
use rumqttc::AsyncClient;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iot_node::config;
use iot_node::control::Node;
use iot_node::mqtt::{self, LinkEvent, MqttTransport, CLIENT_CAPACITY};
use iot_node::sensor::{NoSensor, Sensor};
use iot_node::variant::Variant;

#[cfg(feature = "sim")]
fn sampled_sensor(variant: Variant) -> Result<Box<dyn Sensor>> {
    use iot_node::sim::{Scenario, SimulatedSensor};

    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    info!(%scenario, "using simulated sensor");
    Ok(Box::new(SimulatedSensor::new(variant.metrics(), scenario)))
}

#[cfg(not(feature = "sim"))]
fn sampled_sensor(variant: Variant) -> Result<Box<dyn Sensor>> {
    anyhow::bail!("no sensor driver for a {variant} node in this build (enable the `sim` feature)")
}

fn build_sensor(variant: Variant) -> Result<Box<dyn Sensor>> {
    if variant.metrics().is_empty() {
        return Ok(Box::new(NoSensor));
    }
    sampled_sensor(variant)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "node.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    cfg.apply_env(|k| env::var(k).ok())?;
    cfg.validate()
        .with_context(|| format!("invalid config: {config_path}"))?;
    let settings = cfg.resolve();

    info!(
        node = %settings.node_id,
        variant = %settings.profile.variant,
        broker = %format!("{}:{}", settings.broker.host, settings.broker.port),
        "node starting"
    );

    // ── Node ────────────────────────────────────────────────────────
    let (client, mut eventloop) =
        AsyncClient::new(mqtt::options(&settings.broker), CLIENT_CAPACITY);
    let tick_interval = settings.tick_interval;
    let sensor = build_sensor(settings.profile.variant)?;
    let mut node = Node::new(settings, MqttTransport::new(client), sensor)?;

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // ── Loop ────────────────────────────────────────────────────────
    // The event loop is only polled while a connection is wanted; during a
    // retry delay the node keeps ticking on its own.
    loop {
        tokio::select! {
            polled = eventloop.poll(), if node.wants_io() => match mqtt::classify(polled) {
                LinkEvent::Connected => node.link_up(Instant::now()),
                LinkEvent::Message { topic, payload } => node.deliver(topic, payload),
                LinkEvent::Disconnected(reason) => node.link_down(Instant::now(), &reason),
                LinkEvent::Other => {}
            },
            now = ticker.tick() => node.tick(now),
            _ = &mut shutdown => {
                info!("shutdown requested");
                node.shutdown();
                if let Err(e) = node.link().transport().client().try_disconnect() {
                    tracing::debug!("disconnect not sent: {e}");
                }
                break;
            }
        }
    }

    Ok(())
}
