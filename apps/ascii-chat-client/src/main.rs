//! ascii-chat-client - terminal video/voice chat client.
//!
//! Connects to an ascii-chat server, renders incoming ASCII video frames to
//! the terminal, and (when enabled) streams microphone audio while playing
//! back the server's. Device I/O (terminal capability detection, microphone
//! and speaker hardware) is intentionally outside the core library's scope;
//! this binary wires the protocol and pipeline logic in `ascii-core` to
//! stdout and a std::sync::mpsc channel a platform capture backend would
//! feed.

mod config;

use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ascii_core::codec::{self, Envelope, PacketType};
use ascii_core::connection::{ConnectionState, ReconnectPolicy};
use ascii_core::audio::capture::ReferenceSource;
use ascii_core::dispatch::EnvelopeHandlers;
use ascii_core::transport::{Transport, TcpTransport};
use ascii_core::video::{StdoutRenderer, VideoHandler};
use ascii_core::{bootstrap_client, ClientServices};
use clap::Parser;
use tokio::signal;

use crate::config::ClientConfig;

/// ascii-chat-client - terminal video/voice chat client.
#[derive(Parser, Debug)]
#[command(name = "ascii-chat-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ASCII_CHAT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Server host to connect to (overrides config file).
    #[arg(long, env = "ASCII_CHAT_HOST")]
    host: Option<String>,

    /// Server port to connect to (overrides config file).
    #[arg(short = 'p', long, env = "ASCII_CHAT_PORT")]
    port: Option<u16>,

    /// Disable microphone capture / audio streaming.
    #[arg(long)]
    no_audio: bool,

    /// Render a single frame after the configured delay, then exit.
    #[arg(long)]
    snapshot: bool,

    /// Data directory for persistent state (known_hosts, identity key).
    #[arg(short = 'd', long, env = "ASCII_CHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ascii-chat-client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.no_audio {
        config.audio_enabled = false;
    }
    if args.snapshot {
        config.snapshot_mode = true;
    }

    let data_dir = args
        .data_dir
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from(".ascii-chat"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(config, data_dir))
}

async fn run(config: ClientConfig, data_dir: PathBuf) -> Result<()> {
    let host = config.host.clone();
    let port = config.port;
    let core_config = config.to_core_config();

    let services = bootstrap_client(core_config, &data_dir, true).context("failed to bootstrap services")?;

    tokio::select! {
        result = connection_loop(services.clone(), host, port) => {
            if let Err(e) = result {
                log::error!("connection loop exited: {e}");
            }
        }
        _ = shutdown_signal() => {
            log::info!("shutdown signal received");
        }
    }

    services.shutdown();
    Ok(())
}

/// Dials, handshakes, and runs the ingress dispatcher until the connection
/// is lost or deemed non-retryable, sleeping [`ascii_core::connection::ConnectionFsm::reconnect_delay`]
/// between attempts per the reconnect policy.
async fn connection_loop(services: ClientServices, host: String, port: u16) -> Result<()> {
    let policy = ReconnectPolicy {
        max_attempts: services.config.get().reconnect_attempts,
    };

    loop {
        services.connection.begin_attempt();
        log::info!("connecting to {host}:{port} (attempt {})", services.connection.attempt_counter());

        match run_one_connection(&services, &host, port).await {
            Ok(()) => {}
            Err(e) => log::warn!("connection attempt ended: {e}"),
        }

        if services.cancellation_token().is_cancelled() {
            return Ok(());
        }

        if services.connection.state() == ConnectionState::Failed && !services.connection.may_retry(&policy) {
            log::error!("giving up: reconnect policy exhausted or non-retryable failure");
            return Ok(());
        }

        let delay = ascii_core::connection::ConnectionFsm::reconnect_delay();
        log::info!("reconnecting in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

async fn run_one_connection(services: &ClientServices, host: &str, port: u16) -> Result<()> {
    let cfg = services.config.get();

    let addr = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .with_context(|| format!("no addresses for {host}:{port}"))?;

    let transport = match TcpTransport::connect(addr) {
        Ok(t) => t,
        Err(e) => {
            services.connection.record_error(&e);
            return Err(e.into());
        }
    };

    if cfg.encrypt_enabled {
        let identity = services.identity.as_deref();
        if let Err(e) = ascii_core::handshake::client_handshake(
            &transport,
            identity,
            &services.known_hosts,
            host,
            port,
            true,
        ) {
            services.connection.record_error(&e);
            return Err(e.into());
        }
    }

    let transport: Arc<dyn Transport> = Arc::new(transport);
    services.connection.mark_connected(Arc::clone(&transport));

    let playback = ascii_core::audio::playback::PlaybackPipeline::new(Box::new(NullPlaybackSink))?;
    let video = parking_lot::Mutex::new(VideoHandler::new(
        cfg.fps_limit,
        cfg.snapshot_mode,
        Duration::from_secs(cfg.snapshot_delay_secs),
    ));
    let renderer = parking_lot::Mutex::new(StdoutRenderer::default());
    let keepalive = Arc::new(ascii_core::keepalive::Keepalive::new(
        Duration::from_secs(cfg.keepalive_interval_secs),
        0,
    ));
    let lifecycle = ascii_core::lifecycle::TokenLifecycle::new(services.cancellation_token().clone());

    let handlers = ClientHandlers {
        transport: Arc::clone(&transport),
        video,
        renderer,
        playback,
        keepalive: Arc::clone(&keepalive),
        lifecycle,
        participant_count: AtomicU32::new(0),
    };

    if cfg.audio_enabled {
        let (_mic_tx, mic_rx) = std::sync::mpsc::channel();
        let queue = Arc::clone(&services.send_queue);
        let bitrate = cfg.opus_bitrate;
        let reference = Arc::clone(&handlers.playback);
        services.workers.spawn("audio-capture", 10, move |cancel| {
            let reference: &dyn ReferenceSource = reference.as_ref();
            let _ = ascii_core::audio::capture::run(&mic_rx, Some(reference), &queue, bitrate, &cancel);
        })?;
    }

    {
        let transport = Arc::clone(&transport);
        let queue = Arc::clone(&services.send_queue);
        services.workers.spawn("send-loop", 20, move |cancel| {
            while let Some(slot) = queue.dequeue(&cancel) {
                if let Ok(encoded) = codec::encode(
                    PacketType::AudioOpusBatch,
                    0,
                    &slot.bytes,
                    3,
                    transport.crypto(),
                ) {
                    let _ = transport.send(&encoded);
                }
            }
        })?;
    }

    {
        let transport = Arc::clone(&transport);
        let keepalive = Arc::clone(&keepalive);
        services.workers.spawn("keepalive", 5, move |cancel| {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(500));
                let result = keepalive.tick();
                if let Some(ping) = result.ping {
                    let _ = transport.send(&ping);
                }
                if result.lost {
                    log::warn!("keepalive: connection presumed lost, requesting shutdown of this connection");
                    transport.close();
                    break;
                }
            }
        })?;
    }

    let err = ascii_core::dispatch::run(&transport, &handlers, &services.cancellation_token());
    services.connection.record_error(&err);
    services.workers.stop_all();

    if err.is_process_fatal() {
        return Err(err.into());
    }
    Ok(())
}

struct NullPlaybackSink;

impl ascii_core::audio::playback::PlaybackSink for NullPlaybackSink {
    fn write(&mut self, _pcm: &[f32]) {}
}

struct ClientHandlers {
    transport: Arc<dyn Transport>,
    video: parking_lot::Mutex<VideoHandler>,
    renderer: parking_lot::Mutex<StdoutRenderer>,
    playback: Arc<ascii_core::audio::playback::PlaybackPipeline>,
    keepalive: Arc<ascii_core::keepalive::Keepalive>,
    lifecycle: ascii_core::lifecycle::TokenLifecycle,
    participant_count: AtomicU32,
}

impl EnvelopeHandlers for ClientHandlers {
    fn on_ascii_frame(&self, envelope: &Envelope) {
        let mut video = self.video.lock();
        let mut renderer = self.renderer.lock();
        if let Err(e) = video.handle_frame(&envelope.payload, &mut *renderer, &self.lifecycle) {
            log::warn!("dropping malformed ascii frame: {e}");
        }
    }

    fn on_audio_opus(&self, envelope: &Envelope) {
        if let Some(batch) = ascii_core::audio::AudioBatch::from_bytes(&envelope.payload) {
            let _ = self.playback.handle_batch(&batch);
        }
    }

    fn on_audio_opus_batch(&self, envelope: &Envelope) {
        self.on_audio_opus(envelope);
    }

    fn on_server_state(&self, envelope: &Envelope) {
        if envelope.payload.len() >= 4 {
            let count = u32::from_be_bytes(envelope.payload[0..4].try_into().unwrap());
            self.participant_count.store(count, Ordering::Relaxed);
            self.video.lock().observe_server_state(count);
        }
    }

    fn on_ping(&self, _envelope: &Envelope) {
        if let Ok(pong) = codec::encode(PacketType::Pong, 0, &[], 0, self.transport.crypto()) {
            let _ = self.transport.send(&pong);
        }
    }

    fn on_pong(&self, _envelope: &Envelope) {
        self.keepalive.on_pong();
    }

    fn on_clear_console(&self, _envelope: &Envelope) {
        self.renderer.lock().reset_screen();
    }

    fn on_error_message(&self, envelope: &Envelope) {
        log::warn!("server error: {}", String::from_utf8_lossy(&envelope.payload));
    }

    fn on_remote_log(&self, envelope: &Envelope) {
        log::info!("[remote] {}", String::from_utf8_lossy(&envelope.payload));
    }

    fn on_stream_start(&self, _envelope: &Envelope) {}
    fn on_stream_stop(&self, _envelope: &Envelope) {}
    fn on_client_capabilities(&self, _envelope: &Envelope) {}
    fn on_crypto_rekey(&self, _envelope: &Envelope) {
        log::debug!("crypto rekey handling is not yet implemented");
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
