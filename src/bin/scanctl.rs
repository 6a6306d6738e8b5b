//! Scan Engine Control Tool
//!
//! Speaks the device line protocol to a running scan-engine. Useful as a test
//! scanning device and for operator queue maintenance.
//!
//! Usage:
//!   cargo run --bin scanctl -- scan A101 booth:B1
//!   cargo run --bin scanctl -- scan A101 booth:B1 --at 2026-05-04T10:05:00Z
//!   cargo run --bin scanctl -- pending
//!   cargo run --bin scanctl -- review
//!   cargo run --bin scanctl -- release <dedup_key>
//!   cargo run --bin scanctl -- sync

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "scanctl", about = "Scan engine device and operator client")]
struct Args {
    /// Engine listener address
    #[arg(long, default_value = "127.0.0.1:7400")]
    addr: String,

    /// Print raw JSON replies instead of a summary
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Submit a badge scan
    Scan {
        attendee_id: String,
        /// booth:<id> or session:<id>
        target: String,
        #[arg(long, default_value = "scanctl")]
        device: String,
        /// Client timestamp (RFC 3339), defaults to engine time
        #[arg(long)]
        at: Option<String>,
        /// Submit the same scan this many times, one after another
        #[arg(long, default_value = "1")]
        repeat: u32,
    },
    /// Number of scans waiting for the authoritative store
    Pending,
    /// Scans parked for manual review
    Review,
    /// Return a parked scan to the retry pool
    Release { dedup_key: String },
    /// Ask the engine to drain its offline queue now
    Sync,
}

impl Cmd {
    fn request_lines(&self) -> Vec<String> {
        match self {
            Cmd::Scan { attendee_id, target, device, at, repeat } => {
                let mut line = format!("SCAN {} {} {}", device, attendee_id, target);
                if let Some(at) = at {
                    line.push(' ');
                    line.push_str(at);
                }
                (0..*repeat).map(|_| line.clone()).collect()
            }
            Cmd::Pending => vec!["PENDING".to_string()],
            Cmd::Review => vec!["REVIEW".to_string()],
            Cmd::Release { dedup_key } => vec![format!("RELEASE {}", dedup_key)],
            Cmd::Sync => vec!["SYNC".to_string()],
        }
    }
}

fn summarize(reply: &serde_json::Value) -> String {
    if reply.get("ok") == Some(&serde_json::Value::Bool(false)) {
        return format!(
            "ERROR [{}] {}",
            reply["kind"].as_str().unwrap_or("?"),
            reply["error"].as_str().unwrap_or("")
        );
    }

    if let Some(status) = reply.get("status").and_then(|s| s.as_str()) {
        let mut out = format!("{:<16} {}", status, reply["message"].as_str().unwrap_or(""));
        if let Some(booth) = reply.get("expectedBoothName").and_then(|b| b.as_str()) {
            out.push_str(&format!(" (expected booth: {})", booth));
        }
        if reply["wasOffline"].as_bool() == Some(true) {
            out.push_str(" [offline]");
        }
        if let Some(warning) = reply.get("persistenceWarning").and_then(|w| w.as_str()) {
            out.push_str(&format!(" WARNING: {}", warning));
        }
        return out;
    }

    if let Some(records) = reply.as_array() {
        if records.is_empty() {
            return "no scans in manual review".to_string();
        }
        return records
            .iter()
            .map(|r| {
                format!(
                    "{}  attempts={}  {}",
                    r["dedup_key"].as_str().unwrap_or("?"),
                    r["attempts"],
                    r["last_error"].as_str().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
    }

    reply.to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("Failed to connect to scan-engine at {}", args.addr))?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // One request in flight at a time, like a real scanning device
    for request in args.command.request_lines() {
        writer.write_all(format!("{}\n", request).as_bytes()).await?;

        let reply = lines
            .next_line()
            .await?
            .context("scan-engine closed the connection")?;

        if args.json {
            println!("{}", reply);
        } else {
            let value: serde_json::Value = serde_json::from_str(&reply)
                .with_context(|| format!("Unexpected reply: {}", reply))?;
            println!("{}", summarize(&value));
        }
    }

    Ok(())
}
