//! # heurist
//!
//! Automatic heuristic design: a language model proposes variants of one
//! function of a task program, an isolated evaluator scores them, and a
//! search method decides which scored variants to keep and which to show the
//! model next.
//!
//! ```rust
//! use std::time::Duration;
//! use heurist::candidate::Direction;
//! use heurist::evaluator::FnEvaluator;
//! use heurist::evolution::{ControllerBuilder, RunOptions};
//! use heurist::method::MethodConfig;
//! use heurist::task::TaskSpec;
//!
//! let task = TaskSpec::new(
//!     "constant",
//!     "Return a number as large as possible.",
//!     "def value():\n    return 1\n",
//!     "value",
//!     Direction::Maximize,
//! )?;
//!
//! let model = |_prompt: &str, _timeout: Duration| -> heurist::Result<String> {
//!     Ok("```python\ndef value():\n    return 2\n```".to_string())
//! };
//! let evaluator = FnEvaluator::new(|candidate| {
//!     Ok(if candidate.source().contains("return 2") { 2.0 } else { 1.0 })
//! });
//!
//! let mut controller = ControllerBuilder::new()
//!     .with_task(task)
//!     .with_generator(model)
//!     .with_evaluator(evaluator)
//!     .with_method(MethodConfig::HillClimbing { lanes: 1 })
//!     .with_options(RunOptions::builder().max_samples(Some(3)).num_samplers(1).rng_seed(7).build())
//!     .build()?;
//!
//! let report = controller.run()?;
//! assert_eq!(report.samples, 3);
//! assert_eq!(report.best_score(), Some(2.0));
//! # Ok::<(), heurist::SearchError>(())
//! ```

pub mod candidate;
pub mod error;
pub mod evaluator;
pub mod evolution;
pub mod method;
pub mod population;
pub mod profiler;
pub mod rng;
pub mod sampler;
pub mod selection;
pub mod task;

// Re-export commonly used types for convenience
pub use candidate::{Candidate, CandidateId, Direction};
pub use error::{OptionExt, Result, ResultExt, SearchError};
pub use evaluator::{Evaluate, EvaluationFailure, FailureKind, FnEvaluator, SandboxOptions, SecureEvaluator};
pub use evolution::{ControllerBuilder, ControllerState, MethodController, RunConfig, RunOptions, RunReport, SeedSource, StopHandle};
pub use method::{MethodConfig, SearchMethod};
pub use profiler::{MemoryProfiler, Profiler, TracingProfiler};
pub use sampler::{Generate, Sampler};
pub use task::TaskSpec;
