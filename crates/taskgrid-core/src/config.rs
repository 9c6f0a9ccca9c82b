//! taskgrid.toml configuration.
//!
//! ```toml
//! [engine]
//! min_workers = 2
//! max_workers = 8
//! task_timeout = "30s"
//! idle_timeout = "1m"
//! queue_capacity = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration;
use crate::error::{ConfigError, ConfigResult};

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: WorkerConfig,
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConfigFile = toml::from_str(&content)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Engine tuning: pool bounds, task defaults, autoscaler thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Timeout for tasks submitted without one.
    #[serde(default = "default_task_timeout", with = "duration::string")]
    pub task_timeout: Duration,
    /// Retry budget for tasks submitted without one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How long a worker must sit idle before it may be retired.
    #[serde(default = "default_idle_timeout", with = "duration::string")]
    pub idle_timeout: Duration,
    /// Scale-up is blocked at or above this CPU utilization (0.0-1.0).
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,
    /// Scale-up is blocked at or above this memory utilization (0.0-1.0).
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    #[serde(default = "default_retry_base_delay", with = "duration::string")]
    pub retry_base_delay: Duration,
    #[serde(default = "default_max_retry_delay", with = "duration::string")]
    pub max_retry_delay: Duration,
    /// Maximum backlog; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    /// Fallback tick for the dispatcher when no event arrives.
    #[serde(default = "default_tick_interval", with = "duration::string")]
    pub tick_interval: Duration,
    #[serde(default = "zero", with = "duration::string")]
    pub scale_up_cooldown: Duration,
    #[serde(default = "zero", with = "duration::string")]
    pub scale_down_cooldown: Duration,
}

fn default_min_workers() -> u32 {
    2
}

fn default_max_workers() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
        .max(default_min_workers())
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_cpu_threshold() -> f64 {
    0.80
}

fn default_memory_threshold() -> f64 {
    0.85
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn zero() -> Duration {
    Duration::ZERO
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            task_timeout: default_task_timeout(),
            max_retries: default_max_retries(),
            idle_timeout: default_idle_timeout(),
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            retry_base_delay: default_retry_base_delay(),
            max_retry_delay: default_max_retry_delay(),
            queue_capacity: None,
            tick_interval: default_tick_interval(),
            scale_up_cooldown: zero(),
            scale_down_cooldown: zero(),
        }
    }
}

impl WorkerConfig {
    /// Check bounds and thresholds.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_workers == 0 {
            return Err(invalid("max_workers must be at least 1"));
        }
        if self.min_workers > self.max_workers {
            return Err(invalid(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        for (name, value) in [
            ("cpu_threshold", self.cpu_threshold),
            ("memory_threshold", self.memory_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(format!("{name} must be in (0, 1], got {value}")));
            }
        }
        if self.task_timeout.is_zero() {
            return Err(invalid("task_timeout must be non-zero"));
        }
        if self.tick_interval.is_zero() {
            return Err(invalid("tick_interval must be non-zero"));
        }
        if self.max_retry_delay < self.retry_base_delay {
            return Err(invalid("max_retry_delay must not be below retry_base_delay"));
        }
        if self.queue_capacity == Some(0) {
            return Err(invalid("queue_capacity must be at least 1 when set"));
        }
        Ok(())
    }

    /// Apply a partial update, returning the validated result.
    ///
    /// `self` is left untouched if the merged config is invalid.
    pub fn merged(&self, update: &WorkerConfigUpdate) -> ConfigResult<WorkerConfig> {
        let mut next = self.clone();
        if let Some(v) = update.min_workers {
            next.min_workers = v;
        }
        if let Some(v) = update.max_workers {
            next.max_workers = v;
        }
        if let Some(v) = update.task_timeout {
            next.task_timeout = v;
        }
        if let Some(v) = update.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = update.idle_timeout {
            next.idle_timeout = v;
        }
        if let Some(v) = update.cpu_threshold {
            next.cpu_threshold = v;
        }
        if let Some(v) = update.memory_threshold {
            next.memory_threshold = v;
        }
        if let Some(v) = update.retry_base_delay {
            next.retry_base_delay = v;
        }
        if let Some(v) = update.max_retry_delay {
            next.max_retry_delay = v;
        }
        if let Some(v) = update.queue_capacity {
            next.queue_capacity = v;
        }
        if let Some(v) = update.tick_interval {
            next.tick_interval = v;
        }
        if let Some(v) = update.scale_up_cooldown {
            next.scale_up_cooldown = v;
        }
        if let Some(v) = update.scale_down_cooldown {
            next.scale_down_cooldown = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial [`WorkerConfig`] for runtime updates. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfigUpdate {
    pub min_workers: Option<u32>,
    pub max_workers: Option<u32>,
    #[serde(default, with = "duration::option")]
    pub task_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    #[serde(default, with = "duration::option")]
    pub idle_timeout: Option<Duration>,
    pub cpu_threshold: Option<f64>,
    pub memory_threshold: Option<f64>,
    #[serde(default, with = "duration::option")]
    pub retry_base_delay: Option<Duration>,
    #[serde(default, with = "duration::option")]
    pub max_retry_delay: Option<Duration>,
    /// `Some(None)` lifts the bound.
    pub queue_capacity: Option<Option<usize>>,
    #[serde(default, with = "duration::option")]
    pub tick_interval: Option<Duration>,
    #[serde(default, with = "duration::option")]
    pub scale_up_cooldown: Option<Duration>,
    #[serde(default, with = "duration::option")]
    pub scale_down_cooldown: Option<Duration>,
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = WorkerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.min_workers, 2);
        assert!(config.max_workers >= 2);
        assert_eq!(config.task_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.queue_capacity, None);
    }

    #[test]
    fn integer_durations_are_seconds() {
        let config: ConfigFile =
            toml::from_str("[engine]\ntask_timeout = 30\nidle_timeout = \"2m\"\n").unwrap();
        assert_eq!(config.engine.task_timeout, Duration::from_secs(30));
        assert_eq!(config.engine.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn parse_minimal() {
        let config: ConfigFile = toml::from_str("[engine]\nmin_workers = 1\n").unwrap();
        assert_eq!(config.engine.min_workers, 1);
        assert_eq!(config.engine.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn parse_durations_and_capacity() {
        let toml_str = r#"
[engine]
min_workers = 1
max_workers = 6
task_timeout = "500ms"
idle_timeout = "2m"
queue_capacity = 100
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.task_timeout, Duration::from_millis(500));
        assert_eq!(config.engine.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.engine.queue_capacity, Some(100));
    }

    #[test]
    fn from_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmin_workers = 5\nmax_workers = 2").unwrap();
        let err = ConfigFile::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn toml_round_trip_keeps_values() {
        let mut config = ConfigFile::default();
        config.engine.max_workers = 7;
        config.engine.task_timeout = Duration::from_millis(1500);
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("task_timeout = \"1500ms\""));
        let back: ConfigFile = toml::from_str(&text).unwrap();
        assert_eq!(back.engine, config.engine);
    }

    #[test]
    fn rejects_bad_thresholds() {
        let config = WorkerConfig {
            cpu_threshold: 1.5,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn merged_applies_only_set_fields() {
        let base = WorkerConfig {
            min_workers: 1,
            max_workers: 4,
            ..WorkerConfig::default()
        };
        let next = base
            .merged(&WorkerConfigUpdate {
                max_workers: Some(8),
                queue_capacity: Some(Some(50)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(next.min_workers, 1);
        assert_eq!(next.max_workers, 8);
        assert_eq!(next.queue_capacity, Some(50));
        assert_eq!(next.task_timeout, base.task_timeout);
    }

    #[test]
    fn merged_rejects_inverted_bounds() {
        let base = WorkerConfig {
            min_workers: 1,
            max_workers: 4,
            ..WorkerConfig::default()
        };
        let err = base
            .merged(&WorkerConfigUpdate {
                min_workers: Some(6),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("min_workers"));
    }
}
