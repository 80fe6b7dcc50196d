use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::signal::CompletionSignal;

pub const DEFAULT_CONFIG_FILE: &str = "inferprobe.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    /// Extra headers sent with every request, e.g. `authorization = "Bearer ..."`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub signal: SignalConfig,
}

/// Polling behaviour while waiting for the server to list a model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-call timeouts, by weight of the call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Lightweight GETs (health checks).
    pub light_secs: u64,
    /// Metadata listing and invalid-input requests.
    pub metadata_secs: u64,
    /// Anything that makes the server generate tokens.
    pub generation_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            light_secs: 10,
            metadata_secs: 30,
            generation_secs: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn light(&self) -> Duration {
        Duration::from_secs(self.light_secs)
    }

    pub fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Candidate health paths, tried in order. None answering is acceptable.
    pub health_paths: Vec<String>,
    /// Candidate metrics paths, tried in order. None being exposed is acceptable.
    pub metrics_paths: Vec<String>,
    /// Fail `completions_stop_words` when the stop sequence leaks into the output.
    pub strict_stop_sequences: bool,
    /// Probe names recorded as skipped without being run.
    pub skip: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            health_paths: vec!["/health".into(), "/v1/health".into(), "/healthz".into()],
            metrics_paths: vec!["/v1/metrics".into()],
            strict_stop_sequences: false,
            skip: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Signal delivered to `--signal-pid` once the report is written.
    pub name: CompletionSignal,
}

impl Config {
    /// Load `inferprobe.toml` from `dir`, falling back to defaults if absent or invalid.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(DEFAULT_CONFIG_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring invalid {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load an explicitly requested config file. Unlike [`Config::load`], a missing or
    /// malformed file is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.readiness.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.timeouts.light(), Duration::from_secs(10));
        assert_eq!(config.timeouts.metadata(), Duration::from_secs(30));
        assert_eq!(config.timeouts.generation(), Duration::from_secs(120));
        assert_eq!(config.probes.health_paths.len(), 3);
        assert_eq!(config.signal.name, CompletionSignal::Usr1);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timeouts]
            generation_secs = 600

            [probes]
            strict_stop_sequences = true
            skip = ["metrics_endpoint"]

            [headers]
            authorization = "Bearer token"

            [signal]
            name = "SIGTERM"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.generation_secs, 600);
        assert_eq!(config.timeouts.metadata_secs, 30);
        assert!(config.probes.strict_stop_sequences);
        assert_eq!(config.probes.skip, vec!["metrics_endpoint"]);
        assert_eq!(config.probes.metrics_paths, ["/v1/metrics"]);
        assert_eq!(config.headers["authorization"], "Bearer token");
        assert_eq!(config.signal.name, CompletionSignal::Term);
        assert_eq!(config.readiness.poll_interval_secs, 5);
    }

    #[test]
    fn load_falls_back_when_absent_or_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load(dir.path()).timeouts.generation_secs, 120);

        let mut file = std::fs::File::create(dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        file.write_all(b"[timeouts\nbroken").unwrap();
        assert_eq!(Config::load(dir.path()).timeouts.generation_secs, 120);
    }

    #[test]
    fn from_file_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[signal]\nname = \"SIGKILL\"\n").unwrap();
        let err = Config::from_file(&bad).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }
}
