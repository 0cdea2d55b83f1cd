//! # RunOptions
//!
//! The `RunOptions` struct holds the budget, concurrency and timeout settings
//! of a run. Options are read once when the controller starts and never change
//! during the run.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use heurist::evolution::options::{LogLevel, RunOptions};
//!
//! let options = RunOptions::builder()
//!     .max_samples(Some(200))
//!     .num_samplers(2)
//!     .num_evaluators(8)
//!     .sample_timeout(Duration::from_secs(30))
//!     .log_level(LogLevel::Verbose)
//!     .build();
//!
//! assert!(options.validate().is_ok());
//! assert_eq!(options.attempt_limit(1), 200);
//! ```
//!
//! ## Configuration files
//!
//! [`RunConfig`] bundles the options with the method and sandbox settings and
//! loads them from JSON. Every field has a default; durations are given in
//! seconds as floating-point numbers.
//!
//! ```rust
//! use heurist::evolution::options::RunConfig;
//! use heurist::method::MethodConfig;
//!
//! let config = RunConfig::from_json_str(r#"{
//!     "options": { "max_samples": 50, "num_evaluators": 2, "sample_timeout": 12.5 },
//!     "method": { "method": "hill_climbing", "lanes": 2 },
//!     "sandbox": { "timeout": 5.0, "accelerate": true }
//! }"#).unwrap();
//!
//! assert_eq!(config.options.get_num_evaluators(), 2);
//! assert_eq!(config.method, MethodConfig::HillClimbing { lanes: 2 });
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ResultExt, SearchError};
use crate::evaluator::SandboxOptions;
use crate::method::MethodConfig;

/// Serialises a `Duration` as floating-point seconds.
pub mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Serialises an `Option<Duration>` as floating-point seconds or `null`.
pub mod optional_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// How much the built-in tracing profiler reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Every sample and evaluation.
    Verbose,
    /// Improvements of the best score and the run summary.
    #[default]
    Minimal,
    /// Nothing.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    max_samples: Option<usize>,
    max_generations: Option<usize>,
    num_samplers: usize,
    num_evaluators: usize,
    samples_per_prompt: usize,
    #[serde(with = "seconds")]
    sample_timeout: Duration,
    max_generate_retries: usize,
    cluster_capacity: usize,
    #[serde(with = "optional_seconds")]
    drain_timeout: Option<Duration>,
    rng_seed: Option<u64>,
    resume_mode: bool,
    log_level: LogLevel,
}

impl RunOptions {
    pub fn get_max_samples(&self) -> Option<usize> {
        self.max_samples
    }

    pub fn get_max_generations(&self) -> Option<usize> {
        self.max_generations
    }

    pub fn get_num_samplers(&self) -> usize {
        self.num_samplers
    }

    pub fn get_num_evaluators(&self) -> usize {
        self.num_evaluators
    }

    pub fn get_samples_per_prompt(&self) -> usize {
        self.samples_per_prompt
    }

    pub fn get_sample_timeout(&self) -> Duration {
        self.sample_timeout
    }

    pub fn get_max_generate_retries(&self) -> usize {
        self.max_generate_retries
    }

    pub fn get_cluster_capacity(&self) -> usize {
        self.cluster_capacity
    }

    pub fn get_drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout
    }

    pub fn get_rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    pub fn get_resume_mode(&self) -> bool {
        self.resume_mode
    }

    pub fn get_log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Sets the sample budget; `None` leaves only the generation bound.
    pub fn set_max_samples(&mut self, max_samples: Option<usize>) {
        self.max_samples = max_samples;
    }

    /// Sets the generation bound; `None` leaves only the sample budget.
    pub fn set_max_generations(&mut self, max_generations: Option<usize>) {
        self.max_generations = max_generations;
    }

    pub fn set_num_samplers(&mut self, num_samplers: usize) {
        self.num_samplers = num_samplers;
    }

    pub fn set_num_evaluators(&mut self, num_evaluators: usize) {
        self.num_evaluators = num_evaluators;
    }

    pub fn set_samples_per_prompt(&mut self, samples_per_prompt: usize) {
        self.samples_per_prompt = samples_per_prompt;
    }

    pub fn set_sample_timeout(&mut self, sample_timeout: Duration) {
        self.sample_timeout = sample_timeout;
    }

    pub fn set_max_generate_retries(&mut self, retries: usize) {
        self.max_generate_retries = retries;
    }

    pub fn set_cluster_capacity(&mut self, cluster_capacity: usize) {
        self.cluster_capacity = cluster_capacity;
    }

    pub fn set_drain_timeout(&mut self, drain_timeout: Option<Duration>) {
        self.drain_timeout = drain_timeout;
    }

    pub fn set_rng_seed(&mut self, rng_seed: Option<u64>) {
        self.rng_seed = rng_seed;
    }

    pub fn set_resume_mode(&mut self, resume_mode: bool) {
        self.resume_mode = resume_mode;
    }

    pub fn set_log_level(&mut self, log_level: LogLevel) {
        self.log_level = log_level;
    }

    /// Maximum number of sample attempts for a method whose generations hold
    /// `generation_size` attempts: the tighter of the two bounds.
    pub fn attempt_limit(&self, generation_size: usize) -> usize {
        let by_generations = self
            .max_generations
            .map(|g| g.saturating_mul(generation_size.max(1)));
        match (self.max_samples, by_generations) {
            (Some(samples), Some(generations)) => samples.min(generations),
            (Some(samples), None) => samples,
            (None, Some(generations)) => generations,
            (None, None) => 0,
        }
    }

    /// Checks that the options describe a run that can start and will end.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Configuration` for zero pool sizes, capacity,
    /// samples per prompt or timeouts, and when neither a sample nor a
    /// generation bound is set.
    pub fn validate(&self) -> Result<()> {
        if self.max_samples.is_none() && self.max_generations.is_none() {
            return Err(SearchError::Configuration(
                "Either max_samples or max_generations must be set".to_string(),
            ));
        }
        let sizes = [
            ("num_samplers", self.num_samplers),
            ("num_evaluators", self.num_evaluators),
            ("samples_per_prompt", self.samples_per_prompt),
            ("cluster_capacity", self.cluster_capacity),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(SearchError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.sample_timeout.is_zero() {
            return Err(SearchError::Configuration(
                "sample_timeout must be greater than zero".to_string(),
            ));
        }
        if self.drain_timeout == Some(Duration::ZERO) {
            return Err(SearchError::Configuration(
                "drain_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a builder for creating a `RunOptions` instance.
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::default()
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_samples: Some(20),
            max_generations: None,
            num_samplers: 4,
            num_evaluators: 4,
            samples_per_prompt: 1,
            sample_timeout: Duration::from_secs(60),
            max_generate_retries: 3,
            cluster_capacity: 10,
            drain_timeout: None,
            rng_seed: None,
            resume_mode: false,
            log_level: LogLevel::default(),
        }
    }
}

/// Builder for `RunOptions`.
///
/// Provides a fluent interface for constructing `RunOptions` instances;
/// unset fields keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptionsBuilder {
    max_samples: Option<Option<usize>>,
    max_generations: Option<Option<usize>>,
    num_samplers: Option<usize>,
    num_evaluators: Option<usize>,
    samples_per_prompt: Option<usize>,
    sample_timeout: Option<Duration>,
    max_generate_retries: Option<usize>,
    cluster_capacity: Option<usize>,
    drain_timeout: Option<Duration>,
    rng_seed: Option<u64>,
    resume_mode: Option<bool>,
    log_level: Option<LogLevel>,
}

impl RunOptionsBuilder {
    /// Sets the sample budget.
    pub fn max_samples(mut self, value: Option<usize>) -> Self {
        self.max_samples = Some(value);
        self
    }

    /// Sets the generation bound.
    pub fn max_generations(mut self, value: Option<usize>) -> Self {
        self.max_generations = Some(value);
        self
    }

    /// Sets the number of concurrent sample calls.
    pub fn num_samplers(mut self, value: usize) -> Self {
        self.num_samplers = Some(value);
        self
    }

    /// Sets the number of concurrent evaluations.
    pub fn num_evaluators(mut self, value: usize) -> Self {
        self.num_evaluators = Some(value);
        self
    }

    pub fn samples_per_prompt(mut self, value: usize) -> Self {
        self.samples_per_prompt = Some(value);
        self
    }

    pub fn sample_timeout(mut self, value: Duration) -> Self {
        self.sample_timeout = Some(value);
        self
    }

    pub fn max_generate_retries(mut self, value: usize) -> Self {
        self.max_generate_retries = Some(value);
        self
    }

    pub fn cluster_capacity(mut self, value: usize) -> Self {
        self.cluster_capacity = Some(value);
        self
    }

    /// Sets how long DRAINING waits for in-flight calls before abandoning them.
    pub fn drain_timeout(mut self, value: Duration) -> Self {
        self.drain_timeout = Some(value);
        self
    }

    pub fn rng_seed(mut self, value: u64) -> Self {
        self.rng_seed = Some(value);
        self
    }

    pub fn resume_mode(mut self, value: bool) -> Self {
        self.resume_mode = Some(value);
        self
    }

    pub fn log_level(mut self, value: LogLevel) -> Self {
        self.log_level = Some(value);
        self
    }

    /// Builds the `RunOptions` instance.
    pub fn build(self) -> RunOptions {
        let defaults = RunOptions::default();
        RunOptions {
            max_samples: self.max_samples.unwrap_or(defaults.max_samples),
            max_generations: self.max_generations.unwrap_or(defaults.max_generations),
            num_samplers: self.num_samplers.unwrap_or(defaults.num_samplers),
            num_evaluators: self.num_evaluators.unwrap_or(defaults.num_evaluators),
            samples_per_prompt: self.samples_per_prompt.unwrap_or(defaults.samples_per_prompt),
            sample_timeout: self.sample_timeout.unwrap_or(defaults.sample_timeout),
            max_generate_retries: self
                .max_generate_retries
                .unwrap_or(defaults.max_generate_retries),
            cluster_capacity: self.cluster_capacity.unwrap_or(defaults.cluster_capacity),
            drain_timeout: self.drain_timeout.or(defaults.drain_timeout),
            rng_seed: self.rng_seed.or(defaults.rng_seed),
            resume_mode: self.resume_mode.unwrap_or(defaults.resume_mode),
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}

/// Everything a run reads at start-up, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub options: RunOptions,
    pub method: MethodConfig,
    pub sandbox: SandboxOptions,
}

impl RunConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Serialization` for malformed JSON and
    /// `SearchError::Configuration` for invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// As [`RunConfig::from_json_str`], plus an error if the file cannot be
    /// read.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .context(format!("Failed to read run configuration {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// # Errors
    ///
    /// Returns `SearchError::Configuration` if the options or the sandbox
    /// settings are invalid.
    pub fn validate(&self) -> Result<()> {
        self.options.validate()?;
        self.sandbox.validate()
    }
}
