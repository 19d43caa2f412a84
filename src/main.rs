use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tourplay::config::Config;
use tourplay::models::{
    Credential, EngineEvent, PlaybackRequest, PlaybackSource, PlaybackWindow, StreamDescriptor,
};
use tourplay::player::{EngineHosts, spawn_engine};

/// Plays one tour clip headlessly and prints engine events
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Authenticated stream URL (absolute, or relative to the configured base URL)
    #[arg(long = "stream", value_name = "URL")]
    stream_url: Option<String>,

    /// Partition header value sent with the stream request
    #[arg(long = "partition", value_name = "KEY")]
    partition: Option<String>,

    /// Logical clip time at which the stream data begins
    #[arg(long = "origin", value_name = "SECONDS", default_value_t = 0.0)]
    origin: f64,

    /// Embedded player video id
    #[arg(long = "embedded", value_name = "ID")]
    embedded_id: Option<String>,

    /// Plain media file URL
    #[arg(long = "direct", value_name = "URL")]
    direct_url: Option<String>,

    /// Window start in seconds
    #[arg(long = "start", value_name = "SECONDS", default_value_t = 0.0)]
    start: f64,

    /// Window end in seconds
    #[arg(long = "end", value_name = "SECONDS")]
    end: Option<f64>,

    /// Bearer token for the stream service (overrides config and environment)
    #[arg(long = "api-key", value_name = "TOKEN")]
    api_key: Option<String>,

    /// Load without starting playback
    #[arg(long = "no-autoplay")]
    no_autoplay: bool,

    /// How long to run before shutting down
    #[arg(short = 'd', long = "duration", value_name = "SECONDS", default_value_t = 10)]
    duration: u64,

    /// Print events as JSON lines
    #[arg(long = "json")]
    json: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn request(&self, config: &Config) -> PlaybackRequest {
        let mut source = PlaybackSource::default();
        if let Some(url) = &self.stream_url {
            let mut descriptor = StreamDescriptor::new(url.as_str()).with_origin(self.origin);
            if let Some(partition) = &self.partition {
                descriptor = descriptor.with_partition(partition.as_str());
            }
            source = source.with_stream(descriptor);
        }
        if let Some(id) = &self.embedded_id {
            source = source.with_embedded_id(id.as_str());
        }
        if let Some(url) = &self.direct_url {
            source = source.with_direct_url(url.as_str());
        }

        let mut request = PlaybackRequest::new(source, PlaybackWindow::new(self.start, self.end))
            .with_autoplay(config.playback.autoplay && !self.no_autoplay);
        if let Some(key) = &self.api_key {
            request = request.with_credential(Credential::new(key.as_str()));
        }
        request
    }
}

fn print_event(event: &EngineEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        match event {
            EngineEvent::StateChanged { state } => println!("state    {:?}", state),
            EngineEvent::Position(report) => println!("position {:.2}s", report.current_seconds),
            EngineEvent::FellBack { from, to } => println!("fallback {} -> {}", from, to),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tourplay=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting tourplay");

    let config = match &args.config {
        Some(path) => Config::load_from(path).map(Config::with_env_credential),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let request = args.request(&config);
    if request.source.is_empty() {
        warn!("No source given; pass --stream, --embedded or --direct");
    }

    let hosts = EngineHosts::headless(&config)?;
    let handle = spawn_engine(&config, hosts);
    let mut events = handle
        .take_event_receiver()
        .context("Event receiver already taken")?;

    handle.load(request).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event, args.json)?,
                None => break,
            },
        }
    }

    handle.shutdown().await?;
    info!("Shut down cleanly");
    Ok(())
}
