//! Load driving against the validator network.
//!
//! [`LoadDriver`] submits a bounded workload of state-mutating operations
//! with a deterministic expected outcome recorded before submission, then
//! verifies the resulting ledger state against that expected model.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tracing::{debug, info};

use crate::client::{NodeApi, Operation};

/// Bounded per-operation retry count before a submission failure is
/// counted as permanent.
pub const MAX_OP_RETRIES: u32 = 3;

/// Pause between submission retries.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// One operation whose final state disagrees with the expected model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Operation key.
    pub key: String,
    /// Value the workload expected.
    pub expected: u64,
    /// Value the network reported, `None` when the key was absent or
    /// unreadable.
    pub actual: Option<u64>,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.actual {
            Some(actual) => write!(f, "{}: expected {}, got {}", self.key, self.expected, actual),
            None => write!(f, "{}: expected {}, got nothing", self.key, self.expected),
        }
    }
}

fn format_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(Mismatch::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from the load driver.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The driver was bound to an empty endpoint set.
    #[error("no endpoints configured for load driver")]
    Configuration,

    /// A majority of operations could not be accepted by the network.
    #[error("majority of operations rejected: {accepted} accepted, {rejected} permanently failed")]
    Submission {
        /// Operations the network accepted.
        accepted: usize,
        /// Operations that failed all retries.
        rejected: usize,
    },

    /// Final state disagrees with the expected model. Every mismatched
    /// operation is listed, not just the first.
    #[error("state validation failed for {} operation(s): {}", .mismatches.len(), format_mismatches(.mismatches))]
    Validation {
        /// All mismatched operations.
        mismatches: Vec<Mismatch>,
    },
}

/// Submits a workload and validates its effect on ledger state.
pub struct LoadDriver<A: NodeApi> {
    nodes: Vec<A>,
    operations: Vec<Operation>,
    expected: BTreeMap<String, u64>,
}

impl<A: NodeApi> LoadDriver<A> {
    /// Bind the driver to a target node set and generate a workload of
    /// `operation_count` operations with unique keys, so repeated runs
    /// against a long-lived network cannot collide.
    pub fn setup(nodes: Vec<A>, operation_count: usize) -> Result<Self, LoadError> {
        if nodes.is_empty() {
            return Err(LoadError::Configuration);
        }

        let run_id = uuid::Uuid::new_v4().as_simple().to_string();
        let mut rng = rand::thread_rng();
        let operations: Vec<Operation> = (0..operation_count)
            .map(|i| Operation {
                key: format!("smoke-{}-{i}", &run_id[..12]),
                value: rng.gen_range(1..u64::from(u32::MAX)),
            })
            .collect();
        let expected = operations
            .iter()
            .map(|op| (op.key.clone(), op.value))
            .collect();

        Ok(Self {
            nodes,
            operations,
            expected,
        })
    }

    /// The nodes this driver targets.
    pub fn nodes(&self) -> &[A] {
        &self.nodes
    }

    /// The expected final state recorded before submission.
    pub fn expected(&self) -> &BTreeMap<String, u64> {
        &self.expected
    }

    /// Submit the workload, distributing operations round-robin across the
    /// node set with at most `parallelism` concurrent in-flight submissions.
    ///
    /// Per-operation failures are retried up to [`MAX_OP_RETRIES`] times;
    /// the run only fails when permanent failures reach a majority of the
    /// workload.
    pub async fn run(&self, parallelism: usize) -> Result<(), LoadError> {
        let parallelism = parallelism.max(1);
        let total = self.operations.len();
        info!(operations = total, parallelism, nodes = self.nodes.len(), "submitting workload");

        let results: Vec<bool> = futures_util::stream::iter(
            self.operations.iter().enumerate().map(|(i, op)| {
                let node = &self.nodes[i % self.nodes.len()];
                Self::submit_with_retry(node, op)
            }),
        )
        .buffer_unordered(parallelism)
        .collect()
        .await;

        let accepted = results.iter().filter(|ok| **ok).count();
        let rejected = total - accepted;
        info!(accepted, rejected, "workload submitted");

        if rejected * 2 > total {
            return Err(LoadError::Submission { accepted, rejected });
        }
        Ok(())
    }

    async fn submit_with_retry(node: &A, op: &Operation) -> bool {
        for attempt in 0..=MAX_OP_RETRIES {
            match node.submit(op).await {
                Ok(()) => return true,
                Err(e) => {
                    debug!(key = %op.key, attempt, error = %e, "submission attempt failed");
                    if attempt < MAX_OP_RETRIES {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
        false
    }

    /// Read back the final state and compare it to the expected model.
    ///
    /// Reads go to the first node; cross-node agreement is the convergence
    /// check's responsibility. Every mismatch is collected before failing.
    pub async fn validate(&self) -> Result<(), LoadError> {
        let node = &self.nodes[0];
        let mut mismatches = Vec::new();

        for (key, expected) in &self.expected {
            let actual = match node.read(key).await {
                Ok(value) => value,
                Err(e) => {
                    debug!(key = %key, error = %e, "read-back failed");
                    None
                }
            };
            if actual != Some(*expected) {
                mismatches.push(Mismatch {
                    key: key.clone(),
                    expected: *expected,
                    actual,
                });
            }
        }

        if mismatches.is_empty() {
            info!(keys = self.expected.len(), "load result validated");
            Ok(())
        } else {
            Err(LoadError::Validation { mismatches })
        }
    }
}
