//! End-to-end smoke scenario orchestration.
//!
//! [`SmokeScenario`] composes the network controller, load driver and
//! convergence checker into one transactional run: acquire endpoints,
//! drive load, validate, check convergence, and release the network on
//! every exit path with diagnostic capture.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::client::{ClientError, HttpNodeClient, NodeEndpoint};
use crate::config::{ConfigError, HarnessConfig, NetworkSource};
use crate::convergence::{self, ConvergenceError};
use crate::load::{LoadDriver, LoadError};
use crate::network::{LaunchError, NetworkController};

/// Everything that can fail a scenario. Every stage error is caught at the
/// scenario boundary and converted into a failed-test result; teardown
/// always runs afterwards.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Bad or missing inputs.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The node API client could not be constructed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The network failed to reach its ready state.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Load submission or validation failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The convergence check could not be evaluated.
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    /// The convergence check ran to completion and answered "no". This is
    /// a reported test failure, not a harness fault.
    #[error("network failed to converge within the polling budget")]
    NotConvergent,

    /// The overall wall-clock deadline expired; the current stage was
    /// aborted and the scenario went straight to cleanup.
    #[error("scenario deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),
}

/// Pass/fail result of one scenario.
#[derive(Debug)]
pub enum ScenarioOutcome {
    /// Load validated and the network converged.
    Passed,
    /// The scenario failed; the error says at which stage.
    Failed(ScenarioError),
}

/// Report handed back to the caller. A failure report still carries the
/// diagnostic archive when the network was created locally.
#[derive(Debug)]
pub struct ScenarioReport {
    /// Pass/fail outcome.
    pub outcome: ScenarioOutcome,
    /// Diagnostic archive location, `None` for externally supplied
    /// networks (the harness never owns their logs).
    pub archive: Option<PathBuf>,
}

impl ScenarioReport {
    /// Whether the scenario passed.
    pub fn passed(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Passed)
    }
}

/// One end-to-end smoke run over an injected [`HarnessConfig`].
pub struct SmokeScenario {
    name: String,
    config: HarnessConfig,
}

impl SmokeScenario {
    /// Create a scenario. `name` keys the diagnostic archive.
    pub fn new(name: impl Into<String>, config: HarnessConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// The scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the scenario to completion and report the outcome.
    ///
    /// Locally created networks are released on every exit path, including
    /// deadline aborts; cleanup failures are logged and never mask the
    /// stage outcome.
    pub async fn run(&self) -> ScenarioReport {
        info!(scenario = %self.name, "starting smoke scenario");

        match &self.config.source {
            NetworkSource::External(endpoints) => {
                info!(count = endpoints.len(), "attaching to externally running validators");
                let outcome = self.bounded(self.execute(endpoints)).await;
                self.report(outcome, None)
            }
            NetworkSource::Local(local) => {
                let mut controller =
                    NetworkController::new(local.clone(), self.config.archive_root.clone());

                let outcome = self
                    .bounded(async {
                        controller.launch().await?;
                        let endpoints = controller.endpoints().to_vec();
                        self.execute(&endpoints).await
                    })
                    .await;

                let archive_name = format!("{}-results", self.name);
                let archive = match controller.shutdown(&archive_name).await {
                    Some(report) => {
                        if !report.failures.is_empty() {
                            warn!(
                                failures = report.failures.len(),
                                "some nodes did not terminate cleanly"
                            );
                        }
                        report.archive
                    }
                    None => None,
                };

                self.report(outcome, archive)
            }
        }
    }

    /// Run a stage pipeline under the scenario's wall-clock deadline.
    async fn bounded(
        &self,
        stages: impl std::future::Future<Output = Result<(), ScenarioError>>,
    ) -> Result<(), ScenarioError> {
        match tokio::time::timeout(self.config.deadline, stages).await {
            Ok(result) => result,
            Err(_) => Err(ScenarioError::DeadlineExceeded(self.config.deadline)),
        }
    }

    /// The load and convergence stages, in contract order: setup, run,
    /// validate, then convergence on the quiescent network.
    async fn execute(&self, endpoints: &[NodeEndpoint]) -> Result<(), ScenarioError> {
        let clients = endpoints
            .iter()
            .map(|endpoint| HttpNodeClient::new(endpoint.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let driver = LoadDriver::setup(clients, self.config.workload.operations)?;
        driver.run(self.config.workload.parallelism).await?;
        driver.validate().await?;

        info!("load validated, checking convergence");
        if convergence::is_convergent(driver.nodes(), &self.config.convergence).await? {
            Ok(())
        } else {
            Err(ScenarioError::NotConvergent)
        }
    }

    fn report(&self, outcome: Result<(), ScenarioError>, archive: Option<PathBuf>) -> ScenarioReport {
        let outcome = match outcome {
            Ok(()) => {
                info!(scenario = %self.name, "scenario passed");
                ScenarioOutcome::Passed
            }
            Err(e) => {
                warn!(scenario = %self.name, error = %e, "scenario failed");
                ScenarioOutcome::Failed(e)
            }
        };
        ScenarioReport { outcome, archive }
    }
}
