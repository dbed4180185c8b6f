use anyhow::Context;
use std::path::PathBuf;
use tinyweather_core::config::{Config, Settings};
use tinyweather_core::logging;
use tinyweather_core::serial::{list_ports, SerialPortChannel};
use tinyweather_core::session::{ChannelSink, JsonLinesSink, SessionController, TelemetrySink};
use tinyweather_core::stop::StopSignal;

/// Frames buffered between the session thread and the printer
const TELEMETRY_BACKLOG: usize = 64;

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tinyweather").join("config"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => default_config_path().context("no config path given and no config directory")?,
    };

    let config = Config::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    let settings = Settings::from_config(&config).context("invalid configuration")?;
    logging::init(&settings.log).context("failed to initialize logging")?;

    tracing::info!(
        version = tinyweather_core::VERSION,
        config = %path.display(),
        "TinyWeather controller starting"
    );
    if !std::path::Path::new(&settings.serial.device).exists() {
        let available: Vec<String> = list_ports().into_iter().map(|p| p.name).collect();
        tracing::warn!(
            device = %settings.serial.device,
            ?available,
            "configured device not present, will keep retrying"
        );
    }

    let (sink, mut readings) = ChannelSink::bounded(TELEMETRY_BACKLOG);
    let stop = StopSignal::new();
    let session = SessionController::new(&settings, SerialPortChannel::new(), sink, stop)
        .spawn()
        .context("failed to start session thread")?;

    // Ends when the session thread drops its sender
    let printer = tokio::task::spawn_blocking(move || {
        let mut out = JsonLinesSink::new(std::io::stdout());
        while let Some(frame) = readings.blocking_recv() {
            out.accept(frame);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down...");

    session.stop();
    let joined = tokio::task::spawn_blocking(move || session.join()).await?;
    if joined.is_err() {
        tracing::error!("session thread panicked");
    }
    printer.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
