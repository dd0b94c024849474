//! signaling-core - Main entry point
//!
//! Joins a channel with one session, logs every lifecycle event and stays
//! connected until interrupted.

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use signaling_core::engine::WebRtcEngineFactory;
use signaling_core::transport::WebSocketTransport;
use signaling_core::{Config, Connection};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    let loaded = args.load_config();

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = match (&loaded, args.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(cfg), false) => cfg.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("SIGNALING_LOG").unwrap_or(log_level))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .filter_module("webrtc_srtp", log::LevelFilter::Error)
        .init();

    info!("signaling-core v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };
    args.apply_overrides(&mut config);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let connection = Connection::new(
        config.connection_config()?,
        Box::new(WebSocketTransport::new()),
        Arc::new(WebRtcEngineFactory),
    );
    connection.on_change_connection_counts(|counts| {
        info!(
            "Channel connections: {} upstream, {} downstream",
            counts.upstream, counts.downstream
        );
    });

    let session = connection.session(config.session.role);
    session.on_add_stream(|id| info!("Stream added: {}", id));
    session.on_remove_stream(|id| info!("Stream removed: {}", id));
    session.on_failure(|e| error!("Session failed: {}", e));
    session.on_disconnect(|e| match e {
        Some(e) => warn!("Session disconnected: {}", e),
        None => info!("Session disconnected"),
    });

    info!(
        "Joining channel {} as {} via {}",
        config.signaling.channel_id, config.session.role, config.signaling.url
    );
    if let Err(e) = session
        .connect(config.negotiation_options(), config.session.metadata.clone(), None)
        .await
    {
        error!("Failed to connect: {}", e);
        connection.shutdown().await;
        return Err(e.into());
    }

    let info = session.info().await;
    info!(
        "Connected (client_id={:?}, connection_id={:?})",
        info.client_id, info.connection_id
    );

    signal::ctrl_c().await?;
    info!("Shutting down...");

    if let Err(e) = connection.disconnect_all().await {
        warn!("Disconnect failed: {}", e);
    }
    connection.shutdown().await;

    info!("signaling-core stopped");
    Ok(())
}
