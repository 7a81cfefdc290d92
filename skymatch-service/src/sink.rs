//! Decision delivery.
//!
//! The engine's sole obligation to the outside world is handing each
//! [`AlertEvaluation`] to a sink. Sinks must tolerate duplicate decisions
//! for the same alert id; evaluation is idempotent, so replays carry
//! identical content.

use crate::client::PortalClient;
use crate::errors::ServiceResult;
use skymatch_engine::{AlertEvaluation, DecisionOutcome};

pub enum DecisionSink {
    /// Log decisions locally, posting nothing upstream.
    Log,
    /// Post decisions back to the portal as source annotations.
    Annotate(PortalClient),
    #[cfg(test)]
    Collect(std::sync::Mutex<Vec<AlertEvaluation>>),
}

impl DecisionSink {
    pub async fn deliver(&self, evaluation: &AlertEvaluation) -> ServiceResult<()> {
        match self {
            DecisionSink::Log => {
                log_decision(evaluation);
                Ok(())
            }
            DecisionSink::Annotate(client) => {
                log_decision(evaluation);
                client.annotate(evaluation).await
            }
            #[cfg(test)]
            DecisionSink::Collect(collected) => {
                collected
                    .lock()
                    .expect("collect sink lock poisoned")
                    .push(evaluation.clone());
                Ok(())
            }
        }
    }
}

fn log_decision(evaluation: &AlertEvaluation) {
    match &evaluation.outcome {
        DecisionOutcome::Matched {
            skymap_id,
            credible_level,
        } => {
            tracing::info!(
                alert_id = %evaluation.alert_id,
                skymap_id = %skymap_id,
                credible_level,
                maps_considered = evaluation.results.len(),
                "alert matched"
            );
        }
        DecisionOutcome::NoMatch => {
            tracing::debug!(
                alert_id = %evaluation.alert_id,
                maps_considered = evaluation.results.len(),
                "alert not contained in any active skymap"
            );
        }
        DecisionOutcome::InvalidPosition => {
            tracing::warn!(
                alert_id = %evaluation.alert_id,
                "alert rejected: invalid input"
            );
        }
    }
}
