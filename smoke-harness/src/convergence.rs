//! Convergence verification.
//!
//! Consensus networks may transiently disagree while blocks propagate, so a
//! single agreeing snapshot proves nothing. [`is_convergent`] polls every
//! node's state digest at a fixed interval and only declares convergence
//! after a configured number of *consecutive* agreeing rounds, giving up
//! once the total round budget is spent. The checker is a pure observer; it
//! never mutates network state.

use std::time::Duration;

use tracing::{debug, info};

use crate::client::{NodeApi, StateDigest};

/// Errors from the convergence checker.
#[derive(Debug, thiserror::Error)]
pub enum ConvergenceError {
    /// Zero endpoints is a configuration error, never vacuous convergence.
    #[error("no endpoints to poll for convergence")]
    NoEndpoints,

    /// The budget can never be satisfied as configured.
    #[error("cannot observe {standard} consecutive convergent rounds within {tolerance} rounds")]
    BadBudget {
        /// Total round budget.
        tolerance: u32,
        /// Required consecutive convergent rounds.
        standard: u32,
    },
}

/// Convergence polling budget.
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    /// Maximum number of polling rounds before declaring non-convergence.
    pub tolerance: u32,
    /// Consecutive convergent rounds required to declare durable
    /// convergence. Any non-convergent round resets the count.
    pub standard: u32,
    /// Pause before each sampling round.
    pub poll_interval: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            tolerance: 5,
            standard: 2,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Per-round snapshot of every node's observed state digest.
///
/// `None` marks a node that was unreachable during the round. Retained only
/// long enough to decide the round it belongs to.
#[derive(Debug)]
pub struct ConvergenceObservation {
    digests: Vec<Option<StateDigest>>,
}

impl ConvergenceObservation {
    /// A round is convergent when every node answered and all digests are
    /// identical. An unreachable node makes the round non-convergent, never
    /// a checker crash.
    pub fn convergent(&self) -> bool {
        let Some(Some(first)) = self.digests.first() else {
            return false;
        };
        self.digests.iter().all(|digest| digest.as_ref() == Some(first))
    }
}

/// Decide whether the network holds a consistent view, within the round
/// budget of `config`.
///
/// Returns `true` as soon as `standard` consecutive convergent rounds are
/// observed, and `false` after exactly `tolerance` rounds otherwise, never
/// fewer: an unreachable node or a divergent round resets the streak but
/// does not terminate the poll loop.
pub async fn is_convergent<A: NodeApi>(
    nodes: &[A],
    config: &ConvergenceConfig,
) -> Result<bool, ConvergenceError> {
    if nodes.is_empty() {
        return Err(ConvergenceError::NoEndpoints);
    }
    if config.standard == 0 || config.standard > config.tolerance {
        return Err(ConvergenceError::BadBudget {
            tolerance: config.tolerance,
            standard: config.standard,
        });
    }

    let mut streak = 0u32;
    for round in 1..=config.tolerance {
        tokio::time::sleep(config.poll_interval).await;

        let observation = observe(nodes).await;
        if observation.convergent() {
            streak += 1;
        } else {
            streak = 0;
        }
        debug!(round, streak, "convergence round sampled");

        if streak >= config.standard {
            info!(round, standard = config.standard, "network convergent");
            return Ok(true);
        }
    }

    info!(rounds = config.tolerance, "network failed to converge within budget");
    Ok(false)
}

/// Sample every node's digest once.
async fn observe<A: NodeApi>(nodes: &[A]) -> ConvergenceObservation {
    let mut digests = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        match node.digest().await {
            Ok(digest) => digests.push(Some(digest)),
            Err(e) => {
                debug!(node = index, error = %e, "digest unavailable this round");
                digests.push(None);
            }
        }
    }
    ConvergenceObservation { digests }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, Operation};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Node whose digest answers are scripted per round; `None` entries
    /// simulate an unreachable node for that round.
    struct ScriptedNode {
        rounds: Mutex<VecDeque<Option<StateDigest>>>,
    }

    impl ScriptedNode {
        fn new(rounds: Vec<Option<StateDigest>>) -> Self {
            Self {
                rounds: Mutex::new(rounds.into()),
            }
        }

        fn remaining(&self) -> usize {
            self.rounds.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NodeApi for ScriptedNode {
        async fn ready(&self) -> bool {
            true
        }

        async fn submit(&self, _op: &Operation) -> Result<(), ClientError> {
            unreachable!("the checker never mutates network state")
        }

        async fn read(&self, _key: &str) -> Result<Option<u64>, ClientError> {
            unreachable!("the checker never reads keys")
        }

        async fn digest(&self) -> Result<StateDigest, ClientError> {
            match self.rounds.lock().unwrap().pop_front() {
                Some(Some(digest)) => Ok(digest),
                _ => Err(ClientError::Status {
                    status: 503,
                    url: "scripted".into(),
                }),
            }
        }
    }

    fn at_height(height: u64) -> StateDigest {
        StateDigest {
            height,
            head: format!("blk-{height}"),
        }
    }

    fn budget(tolerance: u32, standard: u32) -> ConvergenceConfig {
        ConvergenceConfig {
            tolerance,
            standard,
            poll_interval: Duration::ZERO,
        }
    }

    /// Build one node from a per-round script of heights; `None` means
    /// unreachable that round.
    fn node(script: &[Option<u64>]) -> ScriptedNode {
        ScriptedNode::new(script.iter().map(|h| h.map(at_height)).collect())
    }

    #[tokio::test]
    async fn zero_endpoints_is_a_configuration_error() {
        let nodes: Vec<ScriptedNode> = Vec::new();
        let err = is_convergent(&nodes, &budget(5, 2)).await.unwrap_err();
        assert!(matches!(err, ConvergenceError::NoEndpoints));
    }

    #[tokio::test]
    async fn unsatisfiable_budget_is_rejected() {
        let nodes = vec![node(&[Some(1)])];
        assert!(matches!(
            is_convergent(&nodes, &budget(2, 3)).await.unwrap_err(),
            ConvergenceError::BadBudget { .. }
        ));
        assert!(matches!(
            is_convergent(&nodes, &budget(2, 0)).await.unwrap_err(),
            ConvergenceError::BadBudget { .. }
        ));
    }

    #[tokio::test]
    async fn immediate_agreement_converges_early() {
        let nodes = vec![
            node(&[Some(3), Some(3)]),
            node(&[Some(3), Some(3)]),
            node(&[Some(3), Some(3)]),
        ];
        assert!(is_convergent(&nodes, &budget(5, 2)).await.unwrap());
        // Two rounds sufficed; the scripts are fully drained.
        assert!(nodes.iter().all(|n| n.remaining() == 0));
    }

    #[tokio::test]
    async fn digests_stabilizing_after_round_three_converge() {
        // Five nodes, tolerance 5, standard 2: divergent for the first two
        // rounds, identical from round 3 on.
        let nodes: Vec<ScriptedNode> = (0..5)
            .map(|i| node(&[Some(i), Some(i + 1), Some(9), Some(9)]))
            .collect();
        assert!(is_convergent(&nodes, &budget(5, 2)).await.unwrap());
    }

    #[tokio::test]
    async fn persistent_divergence_uses_the_full_budget() {
        // Node 1 stays one block behind for all five rounds.
        let ahead = node(&[Some(2), Some(3), Some(4), Some(5), Some(6)]);
        let behind = node(&[Some(1), Some(2), Some(3), Some(4), Some(5)]);
        let nodes = vec![ahead, behind];

        assert!(!is_convergent(&nodes, &budget(5, 2)).await.unwrap());
        // Exactly tolerance rounds were polled, never fewer.
        assert!(nodes.iter().all(|n| n.remaining() == 0));
    }

    #[tokio::test]
    async fn unreachable_node_spoils_rounds_without_aborting() {
        // Node 1 never answers; the loop still runs all four rounds.
        let nodes = vec![
            node(&[Some(7), Some(7), Some(7), Some(7)]),
            node(&[None, None, None, None]),
        ];
        assert!(!is_convergent(&nodes, &budget(4, 2)).await.unwrap());
        assert!(nodes.iter().all(|n| n.remaining() == 0));
    }

    #[tokio::test]
    async fn transient_agreement_is_noise_not_convergence() {
        // Agreement alternates with divergence; the streak never reaches 2.
        let stable = node(&[Some(5), Some(5), Some(5), Some(5), Some(5)]);
        let flapping = node(&[Some(5), Some(4), Some(5), Some(4), Some(5)]);
        assert!(!is_convergent(&[stable, flapping], &budget(5, 2)).await.unwrap());
    }

    #[tokio::test]
    async fn divergent_round_resets_the_streak() {
        // agree, agree, diverge, agree, agree: with standard 3 this must
        // not pass inside five rounds, but does within seven.
        let short = vec![
            node(&[Some(8), Some(8), Some(8), Some(8), Some(8)]),
            node(&[Some(8), Some(8), Some(1), Some(8), Some(8)]),
        ];
        assert!(!is_convergent(&short, &budget(5, 3)).await.unwrap());

        let long = vec![
            node(&[Some(8), Some(8), Some(8), Some(8), Some(8), Some(8), Some(8)]),
            node(&[Some(8), Some(8), Some(1), Some(8), Some(8), Some(8), Some(8)]),
        ];
        assert!(is_convergent(&long, &budget(7, 3)).await.unwrap());
    }

    #[test]
    fn observation_requires_every_node_to_answer() {
        let all_answered = ConvergenceObservation {
            digests: vec![Some(at_height(2)), Some(at_height(2))],
        };
        assert!(all_answered.convergent());

        let one_missing = ConvergenceObservation {
            digests: vec![Some(at_height(2)), None],
        };
        assert!(!one_missing.convergent());

        let empty = ConvergenceObservation { digests: vec![] };
        assert!(!empty.convergent());
    }
}
