//! Prometheus metrics. hyper v1.+

use core_types::types::ArrivalOutcome;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper::Response;
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::error::Error;
use tokio::net::TcpListener;

pub struct Metrics {
    registry: Registry,
    arrivals_total: IntCounter,
    unique_arrivals_total: IntCounter,
    duplicate_arrivals_total: IntCounter,
    evicted_entries_total: IntCounter,
    flushes_total: IntCounter,
    publish_failures_total: IntCounter,
    notify_failures_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let arrivals_total = counter(
            &registry,
            "arrivals_total",
            "Arrivals accepted by the ingest boundary",
        );
        let unique_arrivals_total = counter(
            &registry,
            "unique_arrivals_total",
            "Arrivals classified newly unique in their window",
        );
        let duplicate_arrivals_total = counter(
            &registry,
            "duplicate_arrivals_total",
            "Arrivals suppressed as duplicates",
        );
        let evicted_entries_total = counter(
            &registry,
            "evicted_entries_total",
            "Dedup entries reclaimed by the sweeper",
        );
        let flushes_total = counter(
            &registry,
            "flushes_total",
            "Aggregation windows closed and handed to the sink",
        );
        let publish_failures_total = counter(
            &registry,
            "publish_failures_total",
            "Window counts lost to sink publish failures",
        );
        let notify_failures_total = counter(
            &registry,
            "notify_failures_total",
            "Per-arrival notification calls that failed or timed out",
        );
        Self {
            registry,
            arrivals_total,
            unique_arrivals_total,
            duplicate_arrivals_total,
            evicted_entries_total,
            flushes_total,
            publish_failures_total,
            notify_failures_total,
        }
    }

    pub fn observe_arrival(&self, outcome: ArrivalOutcome) {
        self.arrivals_total.inc();
        match outcome {
            ArrivalOutcome::Unique => self.unique_arrivals_total.inc(),
            ArrivalOutcome::Duplicate => self.duplicate_arrivals_total.inc(),
        }
    }

    pub fn add_evictions(&self, n: u64) {
        self.evicted_entries_total.inc_by(n);
    }

    pub fn inc_flush(&self) {
        self.flushes_total.inc();
    }

    pub fn inc_publish_failure(&self) {
        self.publish_failures_total.inc();
    }

    pub fn inc_notify_failure(&self) {
        self.notify_failures_total.inc();
    }

    pub fn arrivals(&self) -> u64 {
        self.arrivals_total.get()
    }

    pub fn unique_arrivals(&self) -> u64 {
        self.unique_arrivals_total.get()
    }

    pub fn duplicate_arrivals(&self) -> u64 {
        self.duplicate_arrivals_total.get()
    }

    pub fn evicted_entries(&self) -> u64 {
        self.evicted_entries_total.get()
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures_total.get()
    }

    async fn handle_metrics(
        &self,
        _req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        Ok(Response::new(Full::new(Bytes::from(buffer))))
    }

    pub async fn serve(
        self: &std::sync::Arc<Self>,
        listener: TcpListener,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            let (socket, _) = listener.accept().await?;
            let io = TokioIo::new(socket);
            let metrics = self.clone();
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { metrics.handle_metrics(req).await }
            });
            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    eprintln!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap();
    registry.register(Box::new(counter.clone())).unwrap();
    counter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrival_outcomes_split_into_unique_and_duplicate() {
        let metrics = Metrics::new();
        metrics.observe_arrival(ArrivalOutcome::Unique);
        metrics.observe_arrival(ArrivalOutcome::Duplicate);
        metrics.observe_arrival(ArrivalOutcome::Duplicate);
        assert_eq!(metrics.arrivals(), 3);
        assert_eq!(metrics.unique_arrivals(), 1);
        assert_eq!(metrics.duplicate_arrivals(), 2);
    }

    #[test]
    fn registries_are_instance_local() {
        // two instances must not collide on metric names
        let a = Metrics::new();
        let b = Metrics::new();
        a.add_evictions(5);
        assert_eq!(a.evicted_entries(), 5);
        assert_eq!(b.evicted_entries(), 0);
    }
}
