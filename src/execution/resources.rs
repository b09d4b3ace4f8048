//! Resource limits applied to sandbox containers.
//!
//! A zero value leaves the corresponding resource unlimited, which is the
//! default: dependency installs and JVM builds routinely need more memory
//! than any fixed cap would allow.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Execution resource limits for a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Memory limit in megabytes.
    #[serde(default)]
    pub memory_mb: u64,
    /// CPU cores available (e.g., 0.5, 1.0, 2.0).
    #[serde(default)]
    pub cpu_cores: f64,
    /// Maximum number of processes allowed.
    #[serde(default)]
    pub max_processes: u64,
}

impl ExecutionLimits {
    pub fn new(memory_mb: u64, cpu_cores: f64, max_processes: u64) -> Self {
        Self {
            memory_mb,
            cpu_cores,
            max_processes,
        }
    }

    /// Memory limit in bytes, if limited.
    pub fn memory_bytes(&self) -> Option<i64> {
        (self.memory_mb > 0).then(|| (self.memory_mb * 1024 * 1024) as i64)
    }

    /// CPU period in microseconds (fixed at 100ms).
    pub fn cpu_period(&self) -> i64 {
        100_000
    }

    /// CPU quota for the allocated cores, if limited.
    ///
    /// quota = period * cores, so 1.0 core = 100000.
    pub fn cpu_quota(&self) -> Option<i64> {
        (self.cpu_cores > 0.0).then(|| (self.cpu_period() as f64 * self.cpu_cores) as i64)
    }

    pub fn pids_limit(&self) -> Option<i64> {
        (self.max_processes > 0).then_some(self.max_processes as i64)
    }

    pub fn is_unlimited(&self) -> bool {
        self.memory_bytes().is_none() && self.cpu_quota().is_none() && self.pids_limit().is_none()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cpu_cores.is_finite() || self.cpu_cores < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "limits.cpu_cores".to_string(),
                message: format!("must be a non-negative number, got {}", self.cpu_cores),
            });
        }
        if self.memory_mb > 0 && self.memory_mb < 6 {
            return Err(ConfigError::InvalidValue {
                key: "limits.memory_mb".to_string(),
                message: "docker requires at least 6 MB".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unlimited() {
        let limits = ExecutionLimits::default();
        assert!(limits.is_unlimited());
        assert_eq!(limits.memory_bytes(), None);
        assert_eq!(limits.cpu_quota(), None);
        assert_eq!(limits.pids_limit(), None);
    }

    #[test]
    fn test_memory_bytes_conversion() {
        let limits = ExecutionLimits::new(512, 0.0, 0);
        assert_eq!(limits.memory_bytes(), Some(512 * 1024 * 1024));
        assert!(!limits.is_unlimited());
    }

    #[test]
    fn test_cpu_quota_calculation() {
        let limits = ExecutionLimits::new(0, 2.0, 100);
        assert_eq!(limits.cpu_period(), 100_000);
        assert_eq!(limits.cpu_quota(), Some(200_000));
        assert_eq!(limits.pids_limit(), Some(100));
    }

    #[test]
    fn test_validate() {
        assert!(ExecutionLimits::new(4096, 4.0, 1000).validate().is_ok());
        assert!(ExecutionLimits::new(0, -1.0, 0).validate().is_err());
        assert!(ExecutionLimits::new(2, 1.0, 0).validate().is_err());
    }
}
