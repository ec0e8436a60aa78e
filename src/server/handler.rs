// Axum front end: routes player requests into the relay pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{RawQuery, Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn};

use crate::config::RelayConfig;
use crate::engine::relay::Relay;
use crate::error::RelayError;

/// Relay query parameters. A repeated key keeps its first value.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RelayQuery {
    pub url: Option<String>,
    pub referer: Option<String>,
}

impl RelayQuery {
    pub fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        let Some(raw) = raw else {
            return query;
        };
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let slot = match key.as_ref() {
                "url" => &mut query.url,
                "referer" => &mut query.referer,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        query
    }
}

pub struct RelayServer {
    addr: SocketAddr,
    relay_path: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl RelayServer {
    /// Bind `config.listen_addr` and start serving in the background.
    pub async fn start(config: RelayConfig) -> Result<Self> {
        let relay = Arc::new(Relay::new(config)?);
        Self::start_with(relay).await
    }

    /// Start serving an already-built relay.
    pub async fn start_with(relay: Arc<Relay>) -> Result<Self> {
        let listener = TcpListener::bind(relay.config().listen_addr).await?;
        let addr = listener.local_addr()?;
        let relay_path = relay.config().relay_path.clone();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router(relay);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                warn!("relay server stopped with error: {}", e);
            }
        });

        info!("relay listening on http://{}{}", addr, relay_path);
        Ok(Self {
            addr,
            relay_path,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Build a relay URL on this server for `target`.
    pub fn url_for(&self, target: &str, referer: Option<&str>) -> String {
        let mut url = format!(
            "http://{}{}?url={}",
            self.addr,
            self.relay_path,
            urlencoding::encode(target)
        );
        if let Some(referer) = referer {
            url.push_str("&referer=");
            url.push_str(&urlencoding::encode(referer));
        }
        url
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Router with the relay route, the health probe, host filtering and tracing.
pub fn router(relay: Arc<Relay>) -> Router {
    let relay_path = relay.config().relay_path.clone();
    Router::new()
        .route(&relay_path, get(relay_handler))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn_with_state(
            relay.clone(),
            enforce_allowed_hosts,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request| {
                info_span!("http", method = %req.method(), uri = %req.uri())
            }),
        )
        .with_state(relay)
}

/// GET <relay_path>?url=..&referer=..
async fn relay_handler(
    State(relay): State<Arc<Relay>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = RelayQuery::parse(raw.as_deref());
    debug!(
        "relay query url={:?} referer={:?}",
        query.url, query.referer
    );

    let request = match relay.request_from_query(query.url.as_deref(), query.referer.as_deref()) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match relay.relay(&request).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Strip an optional `:port` from a Host header value, keeping IPv6 brackets.
fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Whether `host` (a raw Host header value) passes the allow-list. An empty
/// list allows every host.
pub fn host_allowed(allowed: &[String], host: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = host else {
        return false;
    };
    let host = host_without_port(host.trim());
    allowed.iter().any(|a| a.eq_ignore_ascii_case(host))
}

async fn enforce_allowed_hosts(
    State(relay): State<Arc<Relay>>,
    req: Request,
    next: Next,
) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());
    if !host_allowed(&relay.config().allowed_hosts, host) {
        let host = host.unwrap_or("").to_string();
        warn!("rejected request for host={}", host);
        return RelayError::HostNotAllowed(host).into_response();
    }
    next.run(req).await
}
