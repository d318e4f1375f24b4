//! HTTP ingest boundary. One task per connection; each accepted
//! arrival runs one check-and-record against the controller. The
//! optional notify target fires only for newly-unique arrivals, after
//! the store's critical section has been released.

use std::sync::Arc;

use arrival_store::ArrivalController;
use core_types::config::NotifyConfig;
use core_types::types::ArrivalOutcome;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{error, warn};
use metrics::Metrics;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to build notify client: {0}")]
    NotifyClient(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
enum NotifyError {
    #[error("notify transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notify target answered status {status}")]
    Rejected { status: u16 },
}

pub struct IngestService {
    controller: Arc<ArrivalController>,
    metrics: Arc<Metrics>,
    notifier: Notifier,
}

impl IngestService {
    pub fn new(
        controller: Arc<ArrivalController>,
        metrics: Arc<Metrics>,
        notify: &NotifyConfig,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            controller,
            metrics,
            notifier: Notifier::new(notify)?,
        })
    }

    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (socket, _) = listener.accept().await?;
            let io = TokioIo::new(socket);
            let service_ref = self.clone();
            let service = service_fn(move |req| {
                let service_ref = service_ref.clone();
                async move { service_ref.handle(req).await }
            });
            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("ingest connection error: {:?}", err);
                }
            });
        }
    }

    async fn handle(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match (req.method(), req.uri().path()) {
            (&Method::GET, "/api/accept") => self.handle_accept(req.uri().query()).await,
            (&Method::POST, "/test") => plain(StatusCode::OK, "ok"),
            (&Method::GET, "/healthz") => self.handle_healthz(),
            _ => plain(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    async fn handle_accept(&self, query: Option<&str>) -> Response<Full<Bytes>> {
        let query = query.unwrap_or("");
        let id = query_param(query, "id");
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            // caller error; rejected before touching core state
            return plain(StatusCode::BAD_REQUEST, "id is required");
        };

        let outcome = self.controller.record_arrival(&id);
        self.metrics.observe_arrival(outcome);

        if outcome.is_unique() {
            if let Some(endpoint) = query_param(query, "endpoint").filter(|e| !e.is_empty()) {
                // the record and increment above have already committed;
                // a failed notification does not roll them back
                let visits = self.controller.unique_count();
                if let Err(err) = self.notifier.notify(&endpoint, visits).await {
                    self.metrics.inc_notify_failure();
                    warn!("arrival notification to {endpoint} failed: {err}");
                    return plain(StatusCode::BAD_GATEWAY, "notify failed");
                }
            }
        }

        match outcome {
            ArrivalOutcome::Unique => json_ok(r#"{"result":"unique"}"#),
            ArrivalOutcome::Duplicate => json_ok(r#"{"result":"duplicate"}"#),
        }
    }

    fn handle_healthz(&self) -> Response<Full<Bytes>> {
        let body = format!(
            r#"{{"epoch":{},"open_window_uniques":{},"live_entries":{}}}"#,
            self.controller.current_epoch(),
            self.controller.unique_count(),
            self.controller.live_entries()
        );
        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }
}

struct Notifier {
    client: reqwest::Client,
    base_url: String,
}

impl Notifier {
    fn new(config: &NotifyConfig) -> Result<Self, reqwest::Error> {
        // bounded timeout so a slow target cannot stall ingest
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn notify(&self, endpoint: &str, visits: u64) -> Result<(), NotifyError> {
        let url = format!("{}{}?visits={}", self.base_url, endpoint, visits);
        let response = self.client.post(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// First value for `name` in a raw query string. Identifiers are
/// opaque tokens; no percent-decoding is applied.
fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn json_ok(body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
