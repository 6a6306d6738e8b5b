//! TCP listener for scanning devices
//!
//! One connection per device. Lines are handled strictly in order, so a
//! device never has more than one scan in flight.
//!
//! Protocol (one JSON line back per request):
//! - `SCAN <device_id> <attendee_id> booth:<id>|session:<id> [<rfc3339 ts>]`
//! - `PENDING`
//! - `REVIEW`
//! - `RELEASE <dedup_key>`
//! - `SYNC`

use crate::domain::scan::ScanTarget;
use crate::domain::types::{AttendeeId, DeviceId};
use crate::services::ingest::ScanIngestService;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Device listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { port: 7400, enabled: true }
    }
}

/// A parsed request line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Scan {
        device_id: DeviceId,
        attendee_id: AttendeeId,
        target: ScanTarget,
        client_timestamp: Option<DateTime<Utc>>,
    },
    Pending,
    Review,
    Release(String),
    Sync,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| "empty request".to_string())?;
        let args: Vec<&str> = parts.collect();

        match (verb.to_ascii_uppercase().as_str(), args.as_slice()) {
            ("SCAN", [device, attendee, target, rest @ ..]) if rest.len() <= 1 => {
                let target: ScanTarget = target.parse()?;
                let client_timestamp = match rest.first() {
                    Some(ts) => Some(
                        DateTime::parse_from_rfc3339(ts)
                            .map_err(|e| format!("invalid timestamp '{}': {}", ts, e))?
                            .with_timezone(&Utc),
                    ),
                    None => None,
                };
                Ok(Command::Scan {
                    device_id: DeviceId::from(*device),
                    attendee_id: AttendeeId::from(*attendee),
                    target,
                    client_timestamp,
                })
            }
            ("SCAN", _) => Err(
                "usage: SCAN <device_id> <attendee_id> booth:<id>|session:<id> [<rfc3339 ts>]"
                    .to_string(),
            ),
            ("PENDING", []) => Ok(Command::Pending),
            ("REVIEW", []) => Ok(Command::Review),
            ("RELEASE", [key]) => Ok(Command::Release(key.to_string())),
            ("RELEASE", _) => Err("usage: RELEASE <dedup_key>".to_string()),
            ("SYNC", []) => Ok(Command::Sync),
            _ => Err(format!("unknown request '{}'", verb)),
        }
    }
}

fn error_reply(error: &str, kind: &str) -> String {
    json!({ "ok": false, "error": error, "kind": kind }).to_string()
}

/// Run one request against the ingest service and render the reply line
pub async fn handle_command(ingest: &ScanIngestService, command: Command) -> String {
    match command {
        Command::Scan { device_id, attendee_id, target, client_timestamp } => {
            match ingest.submit_scan(attendee_id, target, device_id, client_timestamp).await {
                Ok(outcome) => serde_json::to_string(&outcome)
                    .unwrap_or_else(|e| error_reply(&e.to_string(), "internal")),
                Err(e) => error_reply(&e.to_string(), e.kind()),
            }
        }
        Command::Pending => json!({ "pending": ingest.pending_count() }).to_string(),
        Command::Review => serde_json::to_string(&ingest.list_manual_review())
            .unwrap_or_else(|e| error_reply(&e.to_string(), "internal")),
        Command::Release(key) => match ingest.release_manual_review(&key) {
            Ok(_) => json!({ "ok": true }).to_string(),
            Err(e) => error_reply(&e.to_string(), "queue"),
        },
        Command::Sync => {
            ingest.trigger_sync();
            json!({ "ok": true }).to_string()
        }
    }
}

/// Start the device listener on the configured port
pub async fn start_scan_listener(
    config: ListenerConfig,
    ingest: Arc<ScanIngestService>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("scan_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %config.port, "scan_listener_started");

    serve(listener, ingest, shutdown).await;
    Ok(())
}

/// Accept loop over an already bound listener
pub async fn serve(
    listener: TcpListener,
    ingest: Arc<ScanIngestService>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scan_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let ingest = ingest.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, ingest).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "scan_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, addr: SocketAddr, ingest: Arc<ScanIngestService>) {
    let peer = addr.to_string();
    debug!(peer = %peer, "device_connection_accepted");

    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match Command::parse(line) {
            Ok(command) => handle_command(&ingest, command).await,
            Err(e) => {
                warn!(peer = %peer, line = %line, error = %e, "device_request_invalid");
                error_reply(&e, "request")
            }
        };

        if let Err(e) = writer.write_all(format!("{}\n", reply).as_bytes()).await {
            warn!(peer = %peer, error = %e, "device_reply_failed");
            break;
        }
    }

    debug!(peer = %peer, "device_connection_closed");
}
