//! Bounded-channel evaluation worker pool.
//!
//! Alerts flow from the ingestion adapter through a bounded channel to a
//! fixed pool of workers. Each worker pulls from the shared receiver,
//! evaluates against the store (read-only, never the write path), and
//! hands the decision to the sink. Closing the channel drains the queue
//! and stops the workers, which is the graceful-shutdown path.

use crate::sink::DecisionSink;
use skymatch_core::UtcInstant;
use skymatch_engine::{Alert, CrossmatchEngine};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct EvaluationPool {
    tx: mpsc::Sender<Alert>,
    handles: Vec<JoinHandle<()>>,
}

impl EvaluationPool {
    /// Spawn `workers` evaluation tasks over a channel of `capacity`.
    pub fn spawn(
        engine: Arc<CrossmatchEngine>,
        sink: Arc<DecisionSink>,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Alert>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let engine = Arc::clone(&engine);
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only for the dequeue, not
                        // the evaluation.
                        let alert = { rx.lock().await.recv().await };
                        let Some(alert) = alert else { break };

                        let evaluation = engine.evaluate(&alert, UtcInstant::now());
                        if let Err(err) = sink.deliver(&evaluation).await {
                            tracing::warn!(
                                alert_id = %alert.id,
                                worker,
                                error = %err,
                                "decision delivery failed"
                            );
                        }
                    }
                })
            })
            .collect();

        Self { tx, handles }
    }

    /// Queue an alert for evaluation. Returns false when the pool has shut
    /// down.
    pub async fn submit(&self, alert: Alert) -> bool {
        self.tx.send(alert).await.is_ok()
    }

    /// Close the intake, drain queued alerts, and wait for every worker to
    /// finish its current evaluation.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
