//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, MAX_LEASE_SECS};

/// Leases shorter than this are accepted but flagged.
const SHORT_LEASE_WARNING_SECS: i64 = 30;

/// Sweep intervals longer than this are accepted but flagged.
const LONG_SWEEP_WARNING_SECS: u64 = 3600;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert the first error into a `ConfigError`, if any.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(ConfigError::InvalidValue {
                field: err.path,
                message: err.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_database(config, &mut result);
        Self::validate_queue(config, &mut result);
        Self::validate_sweeper(config, &mut result);

        Ok(result)
    }

    fn validate_database(config: &Config, result: &mut ValidationResult) {
        if config.database.path.as_os_str().is_empty() {
            result.add_error(ValidationError::new("database.path", "Path cannot be empty"));
        }
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let queue = &config.queue;

        if queue.default_lease_secs <= 0 {
            result.add_error(ValidationError::new(
                "queue.default_lease_secs",
                "Default lease must be greater than 0",
            ));
        } else if queue.default_lease_secs > MAX_LEASE_SECS {
            result.add_error(ValidationError::new(
                "queue.default_lease_secs",
                format!("Default lease may not exceed {}s", MAX_LEASE_SECS),
            ));
        } else if queue.default_lease_secs < SHORT_LEASE_WARNING_SECS {
            result.add_warning(ValidationWarning::new(
                "queue.default_lease_secs",
                format!(
                    "Lease of {}s may expire while annotators are still working",
                    queue.default_lease_secs
                ),
            ));
        }

        if queue.store_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "queue.store_timeout_ms",
                "Store timeout must be greater than 0",
            ));
        }

        if queue.claim_retry_attempts == 0 {
            result.add_error(ValidationError::new(
                "queue.claim_retry_attempts",
                "At least one claim attempt is required",
            ));
        }
    }

    fn validate_sweeper(config: &Config, result: &mut ValidationResult) {
        let sweeper = &config.sweeper;

        if sweeper.interval_secs == 0 {
            result.add_error(ValidationError::new(
                "sweeper.interval_secs",
                "Sweep interval must be greater than 0",
            ));
        } else if sweeper.interval_secs > LONG_SWEEP_WARNING_SECS {
            result.add_warning(ValidationWarning::new(
                "sweeper.interval_secs",
                "Expired leases will stay visible in stats for over an hour",
            ));
        }

        if sweeper.tick_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "sweeper.tick_timeout_secs",
                "Tick timeout must be greater than 0",
            ));
        } else if sweeper.tick_timeout_secs >= sweeper.interval_secs {
            result.add_error(ValidationError::new(
                "sweeper.tick_timeout_secs",
                "Tick timeout must be shorter than the sweep interval",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
