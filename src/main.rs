//! Nakama Realtime CLI
//!
//! Authenticates a device, opens the realtime socket and logs every push
//! until interrupted or the server closes the connection.
//!
//! ## Usage
//!
//! ```bash
//! # Connect with defaults (127.0.0.1:7350, server key "defaultkey")
//! nakama-realtime --device-id my-device
//!
//! # Custom config file and a server function call over the socket
//! nakama-realtime --config ./nakama.toml --device-id my-device --rpc echo --payload '{"hi":1}'
//!
//! # Join a match and publish presence
//! nakama-realtime --host game.example.com:443 --secure --device-id d1 --status --join-match <match-id>
//! ```

use anyhow::Context;
use clap::Parser;
use nakama_realtime::config::default_config_path;
use nakama_realtime::realtime::MatchTarget;
use nakama_realtime::{AuthenticateOptions, Client, ClientConfig, EventHandlers, RealtimeClient};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nakama-realtime")]
#[command(about = "Connect to a Nakama server and watch realtime traffic")]
struct Args {
    /// Path to config file (defaults to the user config dir, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address as host:port
    #[arg(long, env = "NAKAMA_HOST")]
    host: Option<String>,

    /// Server key for authentication
    #[arg(long, env = "NAKAMA_SERVER_KEY")]
    server_key: Option<String>,

    /// Use https/wss
    #[arg(long)]
    secure: bool,

    /// Device id to authenticate with
    #[arg(long, env = "NAKAMA_DEVICE_ID")]
    device_id: String,

    /// Username for a newly created account
    #[arg(long)]
    username: Option<String>,

    /// Publish presence to followers
    #[arg(long)]
    status: bool,

    /// Server function to call over the socket after connecting
    #[arg(long)]
    rpc: Option<String>,

    /// Payload for --rpc
    #[arg(long, default_value = "")]
    payload: String,

    /// Match to join after connecting
    #[arg(long)]
    join_match: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nakama_realtime=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = if config_path.exists() {
        ClientConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        ClientConfig::default()
    };

    // Apply CLI overrides
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(server_key) = args.server_key {
        config.server_key = server_key;
    }
    if args.secure {
        config.secure = true;
    }

    info!(host = %config.host, secure = config.secure, "Starting nakama-realtime");

    let client = Client::new(config.clone())?;
    let session = client
        .authenticate_device(
            &args.device_id,
            AuthenticateOptions {
                create: Some(true),
                username: args.username,
                ..Default::default()
            },
        )
        .await
        .context("Authentication failed")?;

    let socket = session.connect(&client.socket_endpoint(), args.status).await?;

    let handlers = EventHandlers::new()
        .on_notification(|n| info!(id = %n.id, subject = %n.subject, code = n.code, "Notification"))
        .on_channel_message(|m| info!(channel = %m.channel_id, from = %m.username, content = %m.content, "Chat message"))
        .on_match_data(|d| info!(match_id = %d.match_id, op_code = d.op_code, bytes = d.data.len(), "Match data"))
        .on_match_presence(|p| {
            info!(match_id = %p.match_id, joins = p.joins.len(), leaves = p.leaves.len(), "Match presence")
        })
        .on_status_presence(|p| info!(joins = p.joins.len(), leaves = p.leaves.len(), "Status presence"))
        .on_matchmaker_matched(|m| info!(ticket = %m.ticket, users = m.users.len(), "Matchmaker matched"))
        .on_party(|p| info!(party_id = %p.party_id, members = p.presences.len(), "Party"))
        .on_exit(|err| match err {
            Some(e) => error!(error = %e, "Realtime connection lost"),
            None => info!("Realtime connection closed"),
        });

    let realtime = RealtimeClient::new(socket, handlers).with_request_timeout(config.request_timeout());
    realtime.start();
    if let Some(interval) = config.heartbeat_interval() {
        realtime.start_heartbeat(interval);
    }

    if let Some(match_id) = args.join_match {
        let joined = realtime.join_match(MatchTarget::Id(match_id), HashMap::new()).await?;
        info!(match_id = %joined.match_id, size = joined.size, "Joined match");
    }

    if let Some(id) = args.rpc {
        match realtime.rpc(&id, &args.payload, "").await {
            Ok(result) => info!(id = %result.id, payload = %result.payload, "Rpc result"),
            Err(e) => warn!(id = %id, error = %e, "Rpc failed"),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            realtime.stop().await;
        }
        _ = realtime.closed() => {}
    }

    Ok(())
}
