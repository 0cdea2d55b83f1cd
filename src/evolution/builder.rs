use std::sync::Arc;

use crate::{
    error::{OptionExt, Result, SearchError},
    evaluator::{Evaluate, SandboxOptions, SecureEvaluator},
    method::MethodConfig,
    profiler::{Profiler, TracingProfiler},
    rng::RandomNumberGenerator,
    sampler::{Generate, Sampler},
    task::TaskSpec,
};

use super::{
    controller::{MethodController, SeedSource},
    options::{RunConfig, RunOptions},
};

/// Assembles a [`MethodController`] from its parts.
///
/// The task and the generation capability are required. Without an explicit
/// evaluator the task is scored by a [`SecureEvaluator`] built from the
/// sandbox options, which requires the task to name a worker entry point.
/// Without profilers, a [`TracingProfiler`] at the configured log level is
/// installed.
pub struct ControllerBuilder {
    task: Option<TaskSpec>,
    generator: Option<Arc<dyn Generate>>,
    evaluator: Option<Arc<dyn Evaluate>>,
    method: MethodConfig,
    options: RunOptions,
    sandbox: SandboxOptions,
    seed: SeedSource,
    profilers: Vec<Box<dyn Profiler>>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            task: None,
            generator: None,
            evaluator: None,
            method: MethodConfig::default(),
            options: RunOptions::default(),
            sandbox: SandboxOptions::default(),
            seed: SeedSource::default(),
            profilers: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_generator(mut self, generator: impl Generate + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl Evaluate + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn with_method(mut self, method: MethodConfig) -> Self {
        self.method = method;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxOptions) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Applies options, method and sandbox settings of a loaded configuration.
    pub fn with_config(self, config: RunConfig) -> Self {
        self.with_options(config.options)
            .with_method(config.method)
            .with_sandbox(config.sandbox)
    }

    pub fn with_seed(mut self, seed: SeedSource) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_profiler(mut self, profiler: impl Profiler + 'static) -> Self {
        self.profilers.push(Box::new(profiler));
        self
    }

    /// # Errors
    ///
    /// - `SearchError::Configuration` if the task or the generator is missing,
    ///   or the options or method parameters are invalid.
    /// - `SearchError::Task` if no evaluator was given and the task has no
    ///   usable worker entry point.
    pub fn build(self) -> Result<MethodController> {
        let task = self
            .task
            .ok_or_else_search(|| SearchError::Configuration("Task not specified".to_string()))?;

        let generator = self
            .generator
            .ok_or_else_search(|| {
                SearchError::Configuration("Generator not specified".to_string())
            })?;

        self.options.validate()?;

        let evaluator: Arc<dyn Evaluate> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(SecureEvaluator::new(task.clone(), self.sandbox)?),
        };

        let method = self
            .method
            .build(task.direction(), self.options.get_cluster_capacity())?;

        let sampler = Sampler::new(
            generator,
            &task,
            self.options.get_sample_timeout(),
            self.options.get_max_generate_retries(),
        );

        let mut profilers = self.profilers;
        if profilers.is_empty() {
            profilers.push(Box::new(TracingProfiler::new(self.options.get_log_level())));
        }

        let rng = match self.options.get_rng_seed() {
            Some(seed) => RandomNumberGenerator::from_seed(seed),
            None => RandomNumberGenerator::new(),
        };

        Ok(MethodController::new(
            task,
            self.options,
            method,
            sampler,
            evaluator,
            profilers,
            self.seed,
            rng,
        ))
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Direction;
    use crate::evaluator::FnEvaluator;
    use crate::evolution::state::ControllerState;
    use std::time::Duration;

    fn task() -> TaskSpec {
        TaskSpec::new("t", "demo", "def f(x):\n    return x\n", "f", Direction::Maximize).unwrap()
    }

    fn model(_prompt: &str, _timeout: Duration) -> Result<String> {
        Ok("def f(x):\n    return x + 1\n".to_string())
    }

    #[test]
    fn test_missing_parts() {
        let result = ControllerBuilder::new().with_generator(model).build();
        assert!(matches!(result, Err(SearchError::Configuration(_))));

        let result = ControllerBuilder::new().with_task(task()).build();
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }

    #[test]
    fn test_default_evaluator_needs_entry_point() {
        let result = ControllerBuilder::new()
            .with_task(task())
            .with_generator(model)
            .build();
        assert!(matches!(result, Err(SearchError::Task(_))));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let result = ControllerBuilder::new()
            .with_task(task())
            .with_generator(model)
            .with_evaluator(FnEvaluator::new(|_| Ok(1.0)))
            .with_options(RunOptions::builder().num_samplers(0).build())
            .build();
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }

    #[test]
    fn test_build_starts_in_init() {
        let controller = ControllerBuilder::new()
            .with_task(task())
            .with_generator(model)
            .with_evaluator(FnEvaluator::new(|_| Ok(1.0)))
            .with_method(MethodConfig::fun_search())
            .build()
            .unwrap();
        assert_eq!(controller.state(), ControllerState::Init);
        assert_eq!(controller.method().name(), "fun_search");
    }
}
