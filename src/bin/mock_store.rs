//! Mock Authoritative Store
//!
//! Serves an `InMemoryStore` over the HTTP commit protocol used by `HttpStore`.
//!
//! Endpoints:
//! - `POST /commit` - body `{"dedup_key": .., "mutation": {..}}`
//!   - 200 `{"result":"applied"|"already_applied"}`
//!   - 422 with the rejection reason
//!   - 503 while offline
//! - `POST /offline`, `POST /online` - toggle connectivity for reconnect drills
//! - `POST /close/<session_id>` - reject further commits for a session
//! - `GET /stats` - transition and commit counters
//!
//! Usage:
//!   cargo run --bin mock_store -- --port 8090 --latency-ms 0

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use scan_engine::domain::types::SessionId;
use scan_engine::error::CommitError;
use scan_engine::io::store::{
    AuthoritativeStore, CommitReply, CommitRequest, CommitResponse, CommitResult, InMemoryStore,
};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock_store")]
#[command(about = "Mock authoritative attendance store for local simulation")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "8090")]
    port: u16,

    /// Artificial delay before answering a commit (exercise commit timeouts)
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Start in offline mode
    #[arg(long)]
    offline: bool,
}

fn reply(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn handle_commit(
    req: Request<hyper::body::Incoming>,
    store: &InMemoryStore,
    latency: Duration,
) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return reply(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }).to_string()),
    };
    let request: CommitRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "mock_store_bad_request");
            return reply(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }).to_string());
        }
    };

    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }

    let result = match store.commit(&request.dedup_key, &request.mutation).await {
        Ok(CommitResponse::Applied) => CommitResult::Applied,
        Ok(CommitResponse::AlreadyApplied) => CommitResult::AlreadyApplied,
        Ok(CommitResponse::Rejected(reason)) => {
            info!(dedup_key = %request.dedup_key, reason = %reason, "mock_store_commit_rejected");
            return reply(StatusCode::UNPROCESSABLE_ENTITY, reason);
        }
        Err(CommitError::Network(_)) | Err(CommitError::Timeout) | Err(CommitError::Server(_)) => {
            return reply(StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "offline" }).to_string());
        }
    };

    info!(
        dedup_key = %request.dedup_key,
        attendee_id = %request.mutation.attendee_id(),
        session_id = %request.mutation.session_id(),
        result = ?result,
        "mock_store_commit"
    );
    let body = serde_json::to_string(&CommitReply { result }).unwrap_or_default();
    reply(StatusCode::OK, body)
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    store: Arc<InMemoryStore>,
    latency: Duration,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let response = match (req.method(), path.as_str()) {
        (&Method::POST, "/commit") => handle_commit(req, &store, latency).await,
        (&Method::POST, "/offline") => {
            store.set_online(false);
            reply(StatusCode::OK, json!({ "online": false }).to_string())
        }
        (&Method::POST, "/online") => {
            store.set_online(true);
            reply(StatusCode::OK, json!({ "online": true }).to_string())
        }
        (&Method::POST, p) if p.starts_with("/close/") => {
            let session = p.trim_start_matches("/close/");
            store.close_session(SessionId::from(session));
            info!(session_id = %session, "mock_store_session_closed");
            reply(StatusCode::OK, json!({ "closed": session }).to_string())
        }
        (&Method::GET, "/stats") => reply(
            StatusCode::OK,
            json!({
                "online": store.is_online(),
                "transitions": store.transitions(),
                "commits": store.commit_count(),
                "walk_ins": store.walk_in_count(),
            })
            .to_string(),
        ),
        _ => reply(StatusCode::NOT_FOUND, json!({ "error": "not found" }).to_string()),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let store = Arc::new(InMemoryStore::new());
    if args.offline {
        store.set_online(false);
    }
    let latency = Duration::from_millis(args.latency_ms);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %args.port, latency_ms = %args.latency_ms, "mock_store_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let store = store.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let store = store.clone();
                                async move { handle_request(req, store, latency).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .await
                            {
                                error!(error = %e, "mock_store_http_error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "mock_store_accept_error"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(transitions = %store.transitions(), "mock_store_shutdown");
                return Ok(());
            }
        }
    }
}
