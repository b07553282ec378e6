// Agent owning the aggregation interval and the periodic delivery loop

pub mod aggregator;
pub mod retransmitter;

pub use aggregator::{Aggregator, AggregatorPayload, EventDetail, MeasurementRecord};
pub use retransmitter::{AgentControl, AggregatorRetransmitter, BACKLOG_LIMIT};

use crate::config::AgentConfig;
use crate::transmitter::Transmitter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument, warn};

/// Shutdown request routed through the agent's handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSignal {
    pub restart: bool,
    pub reason: Option<u16>,
}

/// Cloneable control handle for the agent
///
/// The retransmitter holds one to end the session on fatal response
/// codes; hosts can hold another for their own shutdown sequence.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl AgentControl for AgentHandle {
    fn shutdown(&self, restart: bool, reason: Option<u16>) {
        warn!(restart, reason = ?reason, "Agent shutdown requested");
        // An error here means the delivery loop is already gone.
        let _ = self.shutdown_tx.send(ShutdownSignal { restart, reason });
    }
}

/// Collects aggregates and drives their delivery
///
/// Producers record into the current aggregation interval at any time;
/// the delivery loop periodically closes the interval, queues it on the
/// retransmitter, runs one retransmission cycle and bounds the backlog.
/// The loop paces itself by the retransmitter's cycle interval, which the
/// server steers at runtime.
pub struct Agent {
    aggregator: Mutex<Aggregator>,
    retransmitter: Mutex<AggregatorRetransmitter>,
    backlog_limit: usize,
    handle: AgentHandle,
}

impl Agent {
    pub fn new(config: &AgentConfig, transmitter: Arc<dyn Transmitter>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = AgentHandle { shutdown_tx };

        let retransmitter = AggregatorRetransmitter::new(
            transmitter,
            Arc::new(handle.clone()),
            Duration::from_secs(config.cycle_interval_seconds),
        );

        Self {
            aggregator: Mutex::new(Aggregator::new()),
            retransmitter: Mutex::new(retransmitter),
            backlog_limit: config.backlog_limit,
            handle,
        }
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Record a completed-transaction summary into the current interval
    pub async fn add_transaction(&self, transaction: serde_json::Value) {
        self.aggregator.lock().await.add_transaction(transaction);
    }

    /// Record the detail of a distinct instrumented event
    pub async fn add_event_detail(
        &self,
        digest: impl Into<String>,
        name: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) {
        self.aggregator
            .lock()
            .await
            .add_event_detail(digest, name, title, body);
    }

    /// Accumulate a measurement into the current interval
    pub async fn add_measurement(
        &self,
        digest: &str,
        name: &str,
        timestamp: i64,
        values: HashMap<String, f64>,
    ) {
        self.aggregator
            .lock()
            .await
            .add_measurement(digest, name, timestamp, values);
    }

    /// Drive delivery until shutdown is requested
    ///
    /// The caller owns the task this runs on; `stop` or a fatal response
    /// code ends it.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!("Agent delivery loop started");

        let mut shutdown_rx = self.handle.shutdown_tx.subscribe();

        loop {
            let interval = self.retransmitter.lock().await.cycle_interval();

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
                signal = shutdown_rx.recv() => {
                    if let Ok(signal) = signal {
                        info!(
                            restart = signal.restart,
                            reason = ?signal.reason,
                            "Agent delivery loop stopping"
                        );
                    }
                    break;
                }
            }
        }

        info!("Agent delivery loop stopped");
    }

    /// One delivery cycle
    ///
    /// Closes the current interval when it has content, then attempts the
    /// whole backlog and bounds it.
    pub async fn tick(&self) {
        let payload = {
            let mut aggregator = self.aggregator.lock().await;
            if aggregator.any() {
                Some(std::mem::take(&mut *aggregator).serialize())
            } else {
                None
            }
        };

        let mut retransmitter = self.retransmitter.lock().await;
        if let Some(payload) = payload {
            retransmitter.add(payload);
        }
        if retransmitter.any() {
            retransmitter.transmit().await;
        }
        retransmitter.truncate(self.backlog_limit);
    }

    /// Request a graceful stop of the delivery loop
    pub fn stop(&self) {
        self.handle.shutdown(false, None);
    }

    pub async fn backlog_len(&self) -> usize {
        self.retransmitter.lock().await.len()
    }

    pub async fn cycle_interval(&self) -> Duration {
        self.retransmitter.lock().await.cycle_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransmitError;
    use crate::transmitter::{PayloadFormat, TransmitResponse};
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers every call with a fixed code and keeps the decoded payloads
    struct CountingTransmitter {
        code: u16,
        payloads: std::sync::Mutex<Vec<AggregatorPayload>>,
    }

    impl CountingTransmitter {
        fn new(code: u16) -> Arc<Self> {
            Arc::new(Self {
                code,
                payloads: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn payloads(&self) -> Vec<AggregatorPayload> {
            self.payloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transmitter for CountingTransmitter {
        async fn transmit(
            &self,
            body: Vec<u8>,
            format: PayloadFormat,
        ) -> Result<TransmitResponse, TransmitError> {
            assert_eq!(format, PayloadFormat::Json);
            self.payloads
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&body).unwrap());
            Ok(TransmitResponse { code: self.code })
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            cycle_interval_seconds: 60,
            backlog_limit: 5,
        }
    }

    #[tokio::test]
    async fn test_tick_delivers_recorded_content_and_resets_interval_state() {
        let transmitter = CountingTransmitter::new(200);
        let agent = Agent::new(&config(), Arc::clone(&transmitter) as Arc<dyn Transmitter>);

        agent.add_transaction(json!({"action": "checkout"})).await;
        agent.tick().await;

        let payloads = transmitter.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].transactions, vec![json!({"action": "checkout"})]);
        assert_eq!(agent.backlog_len().await, 0);

        // The interval was swapped out; an empty tick transmits nothing.
        agent.tick().await;
        assert_eq!(transmitter.payloads().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_retains_failed_payload_for_the_next_cycle() {
        let transmitter = CountingTransmitter::new(500);
        let agent = Agent::new(&config(), Arc::clone(&transmitter) as Arc<dyn Transmitter>);

        agent.add_event_detail("digest", "name", "title", "body").await;
        agent.tick().await;

        assert_eq!(agent.backlog_len().await, 1);

        // Next cycle attempts the same payload again.
        agent.tick().await;
        assert_eq!(transmitter.payloads().len(), 2);
    }

    #[tokio::test]
    async fn test_calm_response_stretches_the_loop_pace() {
        let transmitter = CountingTransmitter::new(420);
        let agent = Agent::new(&config(), Arc::clone(&transmitter) as Arc<dyn Transmitter>);

        agent
            .add_measurement("digest", "name", 1210, HashMap::from([("c".to_string(), 1.0)]))
            .await;
        agent.tick().await;

        assert_eq!(agent.cycle_interval().await, Duration::from_secs(90));
        assert_eq!(agent.backlog_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_delivers_and_stops_on_signal() {
        let transmitter = CountingTransmitter::new(200);
        let agent = Arc::new(Agent::new(
            &config(),
            Arc::clone(&transmitter) as Arc<dyn Transmitter>,
        ));

        agent.add_transaction(json!({"action": "index"})).await;

        let task = tokio::spawn({
            let agent = Arc::clone(&agent);
            async move { agent.run().await }
        });

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(transmitter.payloads().len(), 1);

        agent.stop();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_response_stops_the_run_loop() {
        let transmitter = CountingTransmitter::new(401);
        let agent = Arc::new(Agent::new(
            &config(),
            Arc::clone(&transmitter) as Arc<dyn Transmitter>,
        ));

        agent.add_transaction(json!({"action": "index"})).await;

        let task = tokio::spawn({
            let agent = Arc::clone(&agent);
            async move { agent.run().await }
        });

        // The first tick meets a 401; the retransmitter asks the agent to
        // shut down and the loop exits on its own.
        tokio::time::sleep(Duration::from_secs(61)).await;
        task.await.unwrap();

        assert_eq!(transmitter.payloads().len(), 1);
        assert_eq!(agent.backlog_len().await, 0);
    }
}
