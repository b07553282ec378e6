// Backoff-aware retransmission of aggregate payloads

use crate::agent::aggregator::AggregatorPayload;
use crate::telemetry;
use crate::transmitter::{encode_json, PayloadFormat, Transmitter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Default maximum number of undelivered payloads kept for retry
pub const BACKLOG_LIMIT: usize = 5;

/// Shutdown signal consumed by the retransmitter
///
/// Implemented by the owning agent's handle; some response codes end the
/// delivery session for good.
#[cfg_attr(test, mockall::automock)]
pub trait AgentControl: Send + Sync {
    fn shutdown(&self, restart: bool, reason: Option<u16>);
}

/// Bounded, newest-first backlog of aggregate payloads with one delivery
/// attempt per entry per cycle
///
/// Has no thread of its own: an external driver invokes `transmit` and
/// `truncate` periodically and paces itself by `cycle_interval`, which the
/// server steers through 420 and 413 responses.
pub struct AggregatorRetransmitter {
    backlog: Vec<AggregatorPayload>,
    transmitter: Arc<dyn Transmitter>,
    control: Arc<dyn AgentControl>,
    cycle_interval: Duration,
}

impl AggregatorRetransmitter {
    pub fn new(
        transmitter: Arc<dyn Transmitter>,
        control: Arc<dyn AgentControl>,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            backlog: Vec::new(),
            transmitter,
            control,
            cycle_interval,
        }
    }

    /// Queue a payload for delivery; newest entries sit at the front
    pub fn add(&mut self, payload: AggregatorPayload) {
        self.backlog.insert(0, payload);
    }

    /// Attempt delivery of every backlog entry once, newest first
    ///
    /// Entries the server acknowledged (or told us to drop) are removed;
    /// entries that failed in transit or met an unknown status code stay
    /// for the next cycle, keeping their relative order.
    pub async fn transmit(&mut self) {
        let backlog = std::mem::take(&mut self.backlog);

        for payload in backlog {
            if !self.transmit_one(&payload).await {
                self.backlog.push(payload);
            }
        }

        telemetry::update_backlog_size(self.backlog.len());
    }

    /// Drop the oldest entries once the backlog exceeds `limit`
    pub fn truncate(&mut self, limit: usize) {
        if self.backlog.len() <= limit {
            return;
        }

        error!(
            dropped = self.backlog.len() - limit,
            "Aggregate backlog too large, dropping the oldest payloads"
        );
        self.backlog.truncate(limit);
        telemetry::update_backlog_size(self.backlog.len());
    }

    pub fn any(&self) -> bool {
        !self.backlog.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }

    /// Undelivered payloads, newest first
    pub fn backlog(&self) -> &[AggregatorPayload] {
        &self.backlog
    }

    /// Current pacing interval for the external driver
    pub fn cycle_interval(&self) -> Duration {
        self.cycle_interval
    }

    async fn transmit_one(&mut self, payload: &AggregatorPayload) -> bool {
        let body = match encode_json(payload) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to encode aggregate payload");
                telemetry::record_aggregate_retained();
                return false;
            }
        };

        match self.transmitter.transmit(body, PayloadFormat::Json).await {
            Ok(response) => self.handle_response(response.code),
            Err(e) => {
                error!(error = %e, "Error while sending aggregate payload");
                telemetry::record_aggregate_retained();
                false
            }
        }
    }

    /// Interpret one response code; true means the entry is done with
    fn handle_response(&mut self, code: u16) -> bool {
        debug!(status = code, "Aggregate payload sent");

        match code {
            200 => {
                telemetry::record_aggregate_delivered();
                true
            }
            420 => {
                info!("Increasing cycle interval since the server told us to calm down");
                self.cycle_interval = self.cycle_interval.mul_f64(1.5);
                telemetry::record_aggregate_delivered();
                true
            }
            413 => {
                info!("Decreasing cycle interval since our last payload was too large");
                self.cycle_interval = self.cycle_interval.div_f64(1.5);
                telemetry::record_aggregate_delivered();
                true
            }
            429 => {
                error!("Too many requests sent");
                self.control.shutdown(false, Some(429));
                true
            }
            406 => {
                error!("This client version can no longer communicate with the collection API, please upgrade");
                self.control.shutdown(false, Some(406));
                true
            }
            402 => {
                error!("Payment required");
                self.control.shutdown(false, Some(402));
                true
            }
            401 => {
                error!("API key cannot be authorized");
                self.control.shutdown(false, Some(401));
                true
            }
            _ => {
                error!(status = code, "Unknown collection API response code");
                telemetry::record_aggregate_retained();
                false
            }
        }
    }
}
