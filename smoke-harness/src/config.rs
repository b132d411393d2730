//! Harness configuration.
//!
//! The environment is read exactly once at process start via
//! [`HarnessConfig::from_env`] and the resulting value is injected into the
//! scenario. Nothing inside the harness reads the environment ad hoc.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::client::NodeEndpoint;
use crate::convergence::ConvergenceConfig;

/// Enables scenario execution when set to `"1"` (default: disabled).
pub const ENV_ENABLE: &str = "SMOKE_ENABLE";
/// Comma-separated list of externally running validator URLs.
///
/// When present, local network creation is bypassed entirely, e.g.
/// `http://localhost:8800,http://localhost:8801`.
pub const ENV_NODE_URLS: &str = "SMOKE_NODE_URLS";
/// Number of validator nodes to launch locally.
pub const ENV_NODE_COUNT: &str = "SMOKE_NODE_COUNT";
/// Path to the validator binary for locally launched networks.
pub const ENV_NODE_BINARY: &str = "SMOKE_NODE_BINARY";
/// First port of the locally launched node port range.
pub const ENV_BASE_PORT: &str = "SMOKE_BASE_PORT";
/// Number of operations in the load workload.
pub const ENV_WORKLOAD_OPS: &str = "SMOKE_WORKLOAD_OPS";
/// Number of concurrent in-flight submissions.
pub const ENV_PARALLELISM: &str = "SMOKE_PARALLELISM";
/// Maximum number of convergence polling rounds.
pub const ENV_TOLERANCE: &str = "SMOKE_TOLERANCE";
/// Consecutive convergent rounds required to declare durable convergence.
pub const ENV_STANDARD: &str = "SMOKE_STANDARD";
/// Overall scenario wall-clock deadline in seconds.
pub const ENV_DEADLINE_SECS: &str = "SMOKE_DEADLINE_SECS";
/// Directory that receives diagnostic archives.
pub const ENV_ARCHIVE_ROOT: &str = "SMOKE_ARCHIVE_ROOT";

/// Errors raised while assembling the harness configuration.
///
/// Configuration errors are fatal and reported immediately, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },

    /// The external endpoint list was present but empty.
    #[error("{ENV_NODE_URLS} is set but contains no endpoints")]
    EmptyEndpoints,
}

/// Where the scenario gets its validator network from.
///
/// The two arms are mutually exclusive by construction: a scenario either
/// launches and owns a local network, or attaches to endpoints it will never
/// manage.
#[derive(Debug, Clone)]
pub enum NetworkSource {
    /// Launch a fresh local network and own its whole lifecycle.
    Local(LocalNetworkConfig),
    /// Attach to externally running validators; launch, genesis and shutdown
    /// are bypassed entirely.
    External(Vec<NodeEndpoint>),
}

/// Configuration for a locally launched validator network.
#[derive(Debug, Clone)]
pub struct LocalNetworkConfig {
    /// Number of validator processes to launch.
    pub node_count: usize,
    /// Path to the validator binary.
    pub node_binary: PathBuf,
    /// First HTTP port; node `i` listens on `base_port + i`.
    pub base_port: u16,
    /// How long every node gets to reach its ready state.
    pub startup_deadline: Duration,
    /// Named configuration options forwarded to each node process,
    /// e.g. selecting the consensus mode.
    pub overrides: BTreeMap<String, String>,
}

impl Default for LocalNetworkConfig {
    fn default() -> Self {
        Self {
            node_count: 5,
            node_binary: PathBuf::from("validator-node"),
            base_port: 8800,
            startup_deadline: Duration::from_secs(60),
            overrides: BTreeMap::new(),
        }
    }
}

impl LocalNetworkConfig {
    /// Add a named configuration override.
    pub fn with_override(mut self, key: &str, value: &str) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

/// Load workload sizing.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of state-mutating operations to submit.
    pub operations: usize,
    /// Maximum number of concurrent in-flight submissions.
    pub parallelism: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            operations: 100,
            parallelism: 2,
        }
    }
}

/// Root configuration for one smoke run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Whether smoke scenarios should execute at all. They are slow and
    /// infrastructure-heavy, so the default is off.
    pub enabled: bool,
    /// Launch locally or attach externally.
    pub source: NetworkSource,
    /// Load workload sizing.
    pub workload: WorkloadConfig,
    /// Convergence polling budget.
    pub convergence: ConvergenceConfig,
    /// Overall wall-clock deadline for the load and convergence stages.
    pub deadline: Duration,
    /// Directory that receives diagnostic archives.
    pub archive_root: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: NetworkSource::Local(LocalNetworkConfig::default()),
            workload: WorkloadConfig::default(),
            convergence: ConvergenceConfig::default(),
            deadline: Duration::from_secs(300),
            archive_root: std::env::temp_dir().join("smoke-archives"),
        }
    }
}

impl HarnessConfig {
    /// Read the configuration from the process environment.
    ///
    /// Call this once at process start and pass the value into the scenario.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Assemble the configuration from an arbitrary variable lookup.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let local_defaults = LocalNetworkConfig::default();

        let enabled = lookup(ENV_ENABLE).as_deref() == Some("1");

        let source = match lookup(ENV_NODE_URLS) {
            Some(urls) => {
                let endpoints = NodeEndpoint::parse_list(&urls);
                if endpoints.is_empty() {
                    return Err(ConfigError::EmptyEndpoints);
                }
                NetworkSource::External(endpoints)
            }
            None => NetworkSource::Local(LocalNetworkConfig {
                node_count: parse_or(&lookup, ENV_NODE_COUNT, local_defaults.node_count)?,
                node_binary: lookup(ENV_NODE_BINARY)
                    .map(PathBuf::from)
                    .unwrap_or(local_defaults.node_binary),
                base_port: parse_or(&lookup, ENV_BASE_PORT, local_defaults.base_port)?,
                startup_deadline: local_defaults.startup_deadline,
                overrides: BTreeMap::new(),
            }),
        };

        let convergence_defaults = ConvergenceConfig::default();
        Ok(Self {
            enabled,
            source,
            workload: WorkloadConfig {
                operations: parse_or(&lookup, ENV_WORKLOAD_OPS, defaults.workload.operations)?,
                parallelism: parse_or(&lookup, ENV_PARALLELISM, defaults.workload.parallelism)?,
            },
            convergence: ConvergenceConfig {
                tolerance: parse_or(&lookup, ENV_TOLERANCE, convergence_defaults.tolerance)?,
                standard: parse_or(&lookup, ENV_STANDARD, convergence_defaults.standard)?,
                poll_interval: convergence_defaults.poll_interval,
            },
            deadline: Duration::from_secs(parse_or(
                &lookup,
                ENV_DEADLINE_SECS,
                defaults.deadline.as_secs(),
            )?),
            archive_root: lookup(ENV_ARCHIVE_ROOT)
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_root),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn disabled_by_default() {
        let config = HarnessConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(!config.enabled);
        assert!(matches!(config.source, NetworkSource::Local(_)));
    }

    #[test]
    fn enable_flag_requires_exactly_one() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(ENV_ENABLE, "true")])).unwrap();
        assert!(!config.enabled);

        let config = HarnessConfig::from_lookup(lookup_from(&[(ENV_ENABLE, "1")])).unwrap();
        assert!(config.enabled);
    }

    #[test]
    fn external_urls_bypass_local_source() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(
            ENV_NODE_URLS,
            "http://localhost:8800,http://localhost:8801",
        )]))
        .unwrap();

        match config.source {
            NetworkSource::External(endpoints) => {
                assert_eq!(endpoints.len(), 2);
                assert_eq!(endpoints[0].url(), "http://localhost:8800");
            }
            NetworkSource::Local(_) => panic!("expected external source"),
        }
    }

    #[test]
    fn empty_url_list_is_a_configuration_error() {
        let err = HarnessConfig::from_lookup(lookup_from(&[(ENV_NODE_URLS, " , ,")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEndpoints));
    }

    #[test]
    fn unparsable_knob_is_a_configuration_error() {
        let err = HarnessConfig::from_lookup(lookup_from(&[(ENV_WORKLOAD_OPS, "lots")]))
            .unwrap_err();
        match err {
            ConfigError::Invalid { name, value } => {
                assert_eq!(name, ENV_WORKLOAD_OPS);
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn knobs_override_defaults() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            (ENV_NODE_COUNT, "3"),
            (ENV_WORKLOAD_OPS, "250"),
            (ENV_TOLERANCE, "8"),
            (ENV_STANDARD, "3"),
            (ENV_DEADLINE_SECS, "120"),
        ]))
        .unwrap();

        match &config.source {
            NetworkSource::Local(local) => assert_eq!(local.node_count, 3),
            NetworkSource::External(_) => panic!("expected local source"),
        }
        assert_eq!(config.workload.operations, 250);
        assert_eq!(config.convergence.tolerance, 8);
        assert_eq!(config.convergence.standard, 3);
        assert_eq!(config.deadline, Duration::from_secs(120));
    }
}
