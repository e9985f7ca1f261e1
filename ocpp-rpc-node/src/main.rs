//! OCPP RPC Node - CLI for the OCPP session layer
//!
//! Runs either end of an OCPP session.
//!
//! # Usage
//!
//! ```bash
//! # Central system answering Heartbeat and BootNotification
//! ocpp-rpc-node central-system --listen 0.0.0.0:8180
//!
//! # Charge point over WebSocket, one Heartbeat every 30 s
//! ocpp-rpc-node charge-point --id EK3-001 --url ws://localhost:8180/ocpp
//!
//! # Charge point over SOAP
//! ocpp-rpc-node charge-point --id EK3-001 --url http://localhost:8080/ocpp --soap --port 9000
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ocpp_rpc::ocpp::*;
use ocpp_rpc::{
    handler_fn, CentralSystem, CentralSystemConfig, ChargePoint, ChargePointConfig,
    HandlerError, RequestMetadata, Version,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP central system or charge point
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// OCPP version (1.5 or 1.6)
    #[arg(long, default_value = "1.6", global = true)]
    ocpp_version: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept charge points over WebSocket
    CentralSystem {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:8180")]
        listen: SocketAddr,
    },
    /// Connect to a central system and send heartbeats
    ChargePoint {
        /// Charge point identity
        #[arg(long, default_value = "EK3-001")]
        id: String,

        /// Central system URL (WebSocket base URL, or SOAP endpoint with --soap)
        #[arg(long, default_value = "ws://localhost:8180/steve/websocket/CentralSystemService")]
        url: String,

        /// Use OCPP-S (SOAP) instead of OCPP-J
        #[arg(long)]
        soap: bool,

        /// Local SOAP listener port
        #[arg(long, default_value = "9000")]
        port: u16,

        /// Seconds between heartbeats
        #[arg(long, default_value = "30")]
        heartbeat_interval: u64,

        /// Seconds between redial attempts
        #[arg(long, default_value = "5")]
        reconnect_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let version = match args.ocpp_version.as_str() {
        "1.5" => Version::V15,
        "1.6" => Version::V16,
        other => return Err(format!("unsupported OCPP version: {}", other).into()),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
            }
            shutdown.cancel();
        }
    });

    match args.command {
        Command::CentralSystem { listen } => run_central_system(listen, version, shutdown).await,
        Command::ChargePoint {
            id,
            url,
            soap,
            port,
            heartbeat_interval,
            reconnect_interval,
        } => {
            let mut config = ChargePointConfig::new(id, url)
                .with_version(version)
                .with_reconnect_interval(Duration::from_secs(reconnect_interval));
            if soap {
                config = config.with_soap(port);
            }
            run_charge_point(config, Duration::from_secs(heartbeat_interval), shutdown).await
        }
    }
}

async fn run_central_system(
    listen: SocketAddr,
    version: Version,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = CentralSystemConfig::new(listen).with_versions(vec![version]);
    let cs = CentralSystem::bind(config).await?;

    print_banner("Central System", &[("Listen", cs.local_addr().to_string())]);

    let handler = handler_fn(|req: ChargePointRequest, meta: RequestMetadata| async move {
        info!("{} from {}", meta.action, meta.charge_point_id);
        match req {
            ChargePointRequest::Heartbeat(_) => {
                Ok(ChargePointResponse::Heartbeat(HeartbeatResponse {
                    current_time: chrono::Utc::now(),
                }))
            }
            ChargePointRequest::BootNotification(_) => Ok(ChargePointResponse::BootNotification(
                BootNotificationResponse {
                    current_time: chrono::Utc::now(),
                    interval: 30,
                    status: RegistrationStatus::Accepted,
                },
            )),
            _ => Err(HandlerError::with_code(ErrorCode::NotSupported, "not supported")),
        }
    });

    tokio::select! {
        result = cs.run(handler) => result?,
        _ = shutdown.cancelled() => cs.shutdown(),
    }

    Ok(())
}

async fn run_charge_point(
    config: ChargePointConfig,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    print_banner(
        "Charge Point",
        &[
            ("Identity", config.identity.clone()),
            ("URL", truncate(&config.central_system_url, 50)),
            ("Transport", format!("{:?}", config.transport)),
        ],
    );

    let handler = handler_fn(|req: CentralSystemRequest, meta: RequestMetadata| async move {
        info!("{} from central system", meta.action);
        match req {
            CentralSystemRequest::Reset(_) => Ok(CentralSystemResponse::Reset(ResetResponse {
                status: ResetStatus::Rejected,
            })),
            _ => Err(HandlerError::with_code(ErrorCode::NotSupported, "not supported")),
        }
    });

    let cp = ChargePoint::connect(config, handler, shutdown.clone()).await?;

    let boot = cp
        .service()?
        .boot_notification(BootNotificationRequest::new("Elektrokombinacija", "EK3"))
        .await?;
    println!("BootNotification: {:?}, interval {} s", boot.status, boot.interval);

    let mut ticker = tokio::time::interval(heartbeat_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = cp.wait_connected().await {
                    warn!("Session closed: {}", e);
                    break;
                }
                match cp.heartbeat().await {
                    Ok(reply) => println!("Heartbeat: central system time {}", reply.current_time),
                    Err(e) => warn!("Heartbeat failed: {}", e),
                }
            }
        }
    }

    cp.shutdown().await;
    Ok(())
}

fn print_banner(title: &str, rows: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  OCPP RPC Node - {:<43} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (label, value) in rows {
        println!("║  {:<10}{:<50} ║", format!("{}:", label), value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Truncate string with ellipsis, counting characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let end = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
    format!("{}...", &s[..end])
}
