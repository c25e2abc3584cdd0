use anyhow::Context;
use std::sync::Arc;
use telemetry_device::{DeviceConfig, DeviceRuntime, GpsJsonFile, MqttBroker};
use tracing_subscriber::EnvFilter;

/// Set to `json` for one JSON object per log line.
const LOG_FORMAT_ENV: &str = "TELEMETRY_LOG_FORMAT";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var(LOG_FORMAT_ENV).as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "device.json".to_string());
    let config = DeviceConfig::load(&path).with_context(|| format!("loading {}", path))?;

    let provider = config
        .key_source
        .provider()
        .context("building key provider")?;
    let keys = provider.key_pair().context("deriving key pair")?;
    tracing::info!(provider = provider.name(), "Key pair ready");

    let settings = config.runtime_settings()?;
    let broker = Arc::new(MqttBroker::new(config.broker.clone()));
    let location = GpsJsonFile::new(&config.location_file);
    let location = location.with_device_id(config.device_id());

    let runtime = DeviceRuntime::new(settings, keys, broker, Box::new(location));
    let cancel = runtime.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, ending session");
            cancel.cancel();
        }
    });

    let summary = runtime.run().await.context("device session")?;
    println!("{}", summary);
    Ok(())
}
