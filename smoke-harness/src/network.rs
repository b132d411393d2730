//! Local validator network lifecycle.
//!
//! [`NetworkController`] launches a set of validator node processes, runs
//! the one-time genesis step, waits for every node's readiness probe, and
//! tears the whole thing down with guaranteed diagnostic capture. It is
//! only ever constructed for locally launched networks; externally supplied
//! endpoints never pass through here, because the harness never owns
//! processes it did not start.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::archive;
use crate::client::{ClientError, HttpNodeClient, NodeApi, NodeEndpoint};
use crate::config::LocalNetworkConfig;

/// Interval between readiness probes during startup.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors while bringing the network up.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Filesystem error preparing the run directory or log files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The genesis step failed.
    #[error("genesis failed: {detail}")]
    Genesis {
        /// Process error or captured stderr.
        detail: String,
    },

    /// A node process could not be spawned.
    #[error("could not spawn node {index}: {source}")]
    Spawn {
        /// Node index.
        index: usize,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// A node did not reach its ready state within the startup deadline.
    #[error("node {index} at {endpoint} not ready within startup deadline")]
    NotReady {
        /// Node index.
        index: usize,
        /// The node's endpoint.
        endpoint: NodeEndpoint,
    },

    /// The readiness probe client could not be constructed.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The node ports do not fit the u16 port space.
    #[error("{node_count} node(s) starting at port {base_port} exceed the port range")]
    PortRange {
        /// First node port.
        base_port: u16,
        /// Configured network size.
        node_count: usize,
    },
}

/// Lifecycle state of a locally launched network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// Handle created, nothing running yet.
    Unstarted,
    /// Genesis completed, nodes not yet spawned.
    Genesis,
    /// All nodes spawned and ready.
    Running,
    /// Teardown in progress.
    ShuttingDown,
    /// All resources released. No polling or submission may follow.
    Stopped,
}

/// One spawned validator process.
struct NodeProcess {
    index: usize,
    child: Child,
    log_path: PathBuf,
}

/// Owns the endpoint set and lifecycle state of one locally launched
/// network. Exactly one handle exists per run.
pub struct NetworkHandle {
    run_name: String,
    run_dir: PathBuf,
    nodes: Vec<NodeProcess>,
    endpoints: Vec<NodeEndpoint>,
    state: NetworkState,
}

/// What shutdown accomplished. Termination failures are aggregated here and
/// logged, never raised; cleanup runs to the end no matter what.
#[derive(Debug)]
pub struct ShutdownReport {
    /// Nodes terminated cleanly.
    pub terminated: usize,
    /// Per-node termination failures as `(index, error)`.
    pub failures: Vec<(usize, String)>,
    /// Where diagnostics were archived, if archiving succeeded.
    pub archive: Option<PathBuf>,
}

/// Starts, initializes and stops a local validator network.
pub struct NetworkController {
    config: LocalNetworkConfig,
    archive_root: PathBuf,
    handle: Option<NetworkHandle>,
}

impl NetworkController {
    /// Create a controller for one run.
    pub fn new(config: LocalNetworkConfig, archive_root: PathBuf) -> Self {
        Self {
            config,
            archive_root,
            handle: None,
        }
    }

    /// Reachable node addresses; empty until launch completes.
    ///
    /// Stable for the whole `Running` lifetime of the handle.
    pub fn endpoints(&self) -> &[NodeEndpoint] {
        self.handle
            .as_ref()
            .map(|handle| handle.endpoints.as_slice())
            .unwrap_or(&[])
    }

    /// Current lifecycle state, if a handle exists.
    pub fn state(&self) -> Option<NetworkState> {
        self.handle.as_ref().map(|handle| handle.state)
    }

    /// Launch the configured number of validator processes.
    ///
    /// Runs genesis before any node spawns, then polls every node's
    /// readiness probe until the startup deadline. On failure the partially
    /// started handle stays inside the controller so [`shutdown`] can
    /// release it and archive whatever diagnostics exist.
    ///
    /// [`shutdown`]: NetworkController::shutdown
    pub async fn launch(&mut self) -> Result<(), LaunchError> {
        assert!(
            self.handle.is_none(),
            "launch may run at most once per controller"
        );

        // Every node port must exist before any process spawns. The checks
        // below keep the per-node `base_port + index` arithmetic in range.
        let highest = u16::try_from(self.config.node_count.saturating_sub(1))
            .ok()
            .and_then(|offset| self.config.base_port.checked_add(offset));
        if highest.is_none() {
            return Err(LaunchError::PortRange {
                base_port: self.config.base_port,
                node_count: self.config.node_count,
            });
        }

        let run_name = format!("smoke-{}", uuid::Uuid::new_v4().as_simple());
        let run_dir = std::env::temp_dir().join(&run_name);
        tokio::fs::create_dir_all(&run_dir).await?;

        let endpoints = (0..self.config.node_count)
            .map(|i| {
                NodeEndpoint::new(format!(
                    "http://127.0.0.1:{}",
                    self.config.base_port + i as u16
                ))
            })
            .collect();

        info!(network = %run_name, nodes = self.config.node_count, "launching validator network");
        self.handle = Some(NetworkHandle {
            run_name,
            run_dir,
            nodes: Vec::new(),
            endpoints,
            state: NetworkState::Unstarted,
        });

        self.genesis().await?;
        self.spawn_nodes().await?;
        self.await_ready().await?;
        self.write_manifest().await?;

        let handle = self.handle.as_mut().expect("handle exists after launch");
        handle.state = NetworkState::Running;
        info!(network = %handle.run_name, "validator network running");
        Ok(())
    }

    /// Perform the one-time network initialization step.
    ///
    /// Called by [`launch`] before any node accepts traffic. Calling it a
    /// second time on the same handle is a programming error and panics.
    ///
    /// [`launch`]: NetworkController::launch
    pub async fn genesis(&mut self) -> Result<(), LaunchError> {
        let handle = self.handle.as_mut().expect("genesis called before launch");
        assert!(
            handle.state == NetworkState::Unstarted,
            "genesis may run at most once per network"
        );

        let mut cmd = Command::new(&self.config.node_binary);
        cmd.arg("genesis").arg("--data-dir").arg(&handle.run_dir);
        for (key, value) in &self.config.overrides {
            cmd.arg("--set").arg(format!("{key}={value}"));
        }

        let output = cmd.output().await.map_err(|e| LaunchError::Genesis {
            detail: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(LaunchError::Genesis {
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        handle.state = NetworkState::Genesis;
        info!(network = %handle.run_name, "genesis complete");
        Ok(())
    }

    async fn spawn_nodes(&mut self) -> Result<(), LaunchError> {
        let handle = self.handle.as_mut().expect("spawn before launch");

        for index in 0..self.config.node_count {
            let node_dir = handle.run_dir.join(format!("node-{index}"));
            tokio::fs::create_dir_all(&node_dir).await?;

            let log_path = handle.run_dir.join(format!("node-{index}.log"));
            let log = std::fs::File::create(&log_path)?;
            let log_err = log.try_clone()?;

            let mut cmd = Command::new(&self.config.node_binary);
            cmd.arg("run")
                .arg("--port")
                .arg((self.config.base_port + index as u16).to_string())
                .arg("--data-dir")
                .arg(&node_dir);
            for (key, value) in &self.config.overrides {
                cmd.arg("--set").arg(format!("{key}={value}"));
            }
            cmd.stdout(Stdio::from(log))
                .stderr(Stdio::from(log_err))
                // A dropped handle must not leak node processes.
                .kill_on_drop(true);

            let child = cmd.spawn().map_err(|source| LaunchError::Spawn { index, source })?;
            debug!(node = index, log = %log_path.display(), "node spawned");
            handle.nodes.push(NodeProcess {
                index,
                child,
                log_path,
            });
        }

        Ok(())
    }

    async fn await_ready(&self) -> Result<(), LaunchError> {
        let handle = self.handle.as_ref().expect("readiness before launch");
        let deadline = tokio::time::Instant::now() + self.config.startup_deadline;

        for (index, endpoint) in handle.endpoints.iter().enumerate() {
            let client = HttpNodeClient::new(endpoint.clone())?;
            loop {
                if client.ready().await {
                    debug!(node = index, "node ready");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(LaunchError::NotReady {
                        index,
                        endpoint: endpoint.clone(),
                    });
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }

        Ok(())
    }

    async fn write_manifest(&self) -> Result<(), LaunchError> {
        let handle = self.handle.as_ref().expect("manifest before launch");

        let started_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let manifest = serde_json::json!({
            "network": handle.run_name,
            "nodes": handle.nodes.len(),
            "endpoints": handle.endpoints,
            "started_at": started_at,
        });

        let path = handle.run_dir.join("run.json");
        tokio::fs::write(&path, serde_json::to_vec_pretty(&manifest).unwrap_or_default())
            .await?;
        Ok(())
    }

    /// Terminate every owned process and archive diagnostics under
    /// `archive_name`.
    ///
    /// Safe on a partially started handle. Individual termination failures
    /// are aggregated into the report, never raised. Returns `None` when
    /// there is nothing to shut down, either because launch never created a
    /// handle or because shutdown already ran, so release happens exactly
    /// once.
    pub async fn shutdown(&mut self, archive_name: &str) -> Option<ShutdownReport> {
        let mut handle = self.handle.take()?;
        handle.state = NetworkState::ShuttingDown;
        info!(network = %handle.run_name, "shutting down validator network");

        let mut terminated = 0usize;
        let mut failures = Vec::new();
        for node in &mut handle.nodes {
            match node.child.kill().await {
                Ok(()) => {
                    debug!(node = node.index, "node terminated");
                    terminated += 1;
                }
                Err(e) => {
                    warn!(node = node.index, log = %node.log_path.display(), error = %e,
                        "node termination failed");
                    failures.push((node.index, e.to_string()));
                }
            }
        }

        let archive =
            match archive::write_archive(&handle.run_dir, &self.archive_root, archive_name).await
            {
                Ok(path) => {
                    info!(archive = %path.display(), "diagnostics archived");
                    Some(path)
                }
                Err(e) => {
                    warn!(error = %e, "diagnostic archiving failed");
                    None
                }
            };

        if let Err(e) = tokio::fs::remove_dir_all(&handle.run_dir).await {
            warn!(error = %e, "could not remove run directory");
        }

        handle.state = NetworkState::Stopped;
        Some(ShutdownReport {
            terminated,
            failures,
            archive,
        })
    }
}
