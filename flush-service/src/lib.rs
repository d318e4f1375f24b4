//! Window rotation and flush scheduling. Once per aggregation window
//! the open window is closed (epoch advanced, counter captured and
//! zeroed in one coupled step) and the captured count is handed to the
//! event sink.

use std::sync::Arc;
use std::time::Duration;

use arrival_store::ArrivalController;
use event_sink::EventSink;
use log::{debug, warn};
use metrics::Metrics;

pub struct FlushService {
    controller: Arc<ArrivalController>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<Metrics>,
    period: Duration,
}

impl FlushService {
    pub fn new(
        controller: Arc<ArrivalController>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<Metrics>,
        period: Duration,
    ) -> Self {
        Self {
            controller,
            sink,
            metrics,
            period,
        }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.period);
        // the first interval tick completes immediately; skip it so the
        // first flush covers a full window
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.flush_once().await;
        }
    }

    /// Close the open window and publish its count. A publish failure
    /// loses that sample only; the rotation has already committed and
    /// the next tick proceeds normally.
    pub async fn flush_once(&self) {
        let flush = self.controller.rotate_window();
        self.metrics.inc_flush();
        debug!(
            "closed window epoch {} with {} unique arrivals",
            flush.epoch, flush.unique
        );
        if let Err(err) = self.sink.publish(flush.unique).await {
            self.metrics.inc_publish_failure();
            warn!(
                "failed to publish count {} for window epoch {}: {}",
                flush.unique, flush.epoch, err
            );
        }
    }
}
