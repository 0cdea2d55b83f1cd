//! # Sampler
//!
//! The sampler sends one prompt to the external generation capability and
//! turns the reply into a [`SampleDraft`]: the extracted function and its
//! rationale. Transport failures are retried a bounded number of times;
//! a reply without a function matching the task signature is a
//! [`SampleFailure::Parse`]. Neither is fatal to the run.
//!
//! The generation capability is anything implementing [`Generate`], including
//! plain closures.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use heurist::candidate::Direction;
//! use heurist::sampler::{prompt, Generate, Sampler};
//! use heurist::task::TaskSpec;
//!
//! let task = TaskSpec::new("demo", "Return a number.", "def f(x):\n    return x\n", "f", Direction::Maximize).unwrap();
//! let model = |_prompt: &str, _timeout: Duration| -> heurist::Result<String> {
//!     Ok("{Double it.}\n```python\ndef f(x):\n    return 2 * x\n```".to_string())
//! };
//! let sampler = Sampler::new(Arc::new(model), &task, Duration::from_secs(5), 2);
//!
//! let request = prompt::Prompt::new(prompt::fresh(&task), prompt::Operator::Fresh, &[], None);
//! let draft = sampler.sample(&request).unwrap();
//! assert_eq!(draft.thought.as_deref(), Some("Double it."));
//! ```

pub mod prompt;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::error::Result;
use crate::task::{parser, FunctionSignature, TaskSpec};

pub use prompt::{Operator, Prompt};

/// The external generation capability (a language model client).
///
/// Implementations handle their own transport concerns; an `Err` tells the
/// sampler the call failed and may be retried.
pub trait Generate: Send + Sync {
    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

impl<F> Generate for F
where
    F: Fn(&str, Duration) -> Result<String> + Send + Sync,
{
    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String> {
        self(prompt, timeout)
    }
}

/// A failed sample attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleFailure {
    /// The generation capability failed on every try.
    #[error("generation failed after {attempts} attempt(s): {message}")]
    Transport { attempts: usize, message: String },

    /// The reply contained no usable function.
    #[error("unparsable response: {0}")]
    Parse(String),
}

/// A parsed, not yet evaluated sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDraft {
    pub source: String,
    pub thought: Option<String>,
    /// Time spent in the generation capability, retries included.
    pub elapsed: Duration,
}

/// Prompt-to-draft conversion for one task.
#[derive(Clone)]
pub struct Sampler {
    generator: Arc<dyn Generate>,
    signature: FunctionSignature,
    timeout: Duration,
    max_retries: usize,
}

impl Sampler {
    /// Creates a sampler that gives the capability `timeout` per call and
    /// retries a failing call up to `max_retries` times.
    pub fn new(
        generator: Arc<dyn Generate>,
        task: &TaskSpec,
        timeout: Duration,
        max_retries: usize,
    ) -> Self {
        Self {
            generator,
            signature: task.signature().clone(),
            timeout,
            max_retries,
        }
    }

    /// Runs one sample attempt.
    pub fn sample(&self, prompt: &Prompt) -> std::result::Result<SampleDraft, SampleFailure> {
        let start = Instant::now();
        let mut attempts = 0;

        let response = loop {
            attempts += 1;
            match self.generator.generate(&prompt.text, self.timeout) {
                Ok(response) => break response,
                Err(e) if attempts <= self.max_retries => {
                    debug!(attempt = attempts, error = %e, "generation failed, retrying");
                }
                Err(e) => {
                    return Err(SampleFailure::Transport {
                        attempts,
                        message: e.to_string(),
                    })
                }
            }
        };

        let parsed =
            parser::parse_response(&response, &self.signature).map_err(SampleFailure::Parse)?;

        Ok(SampleDraft {
            source: parsed.source,
            thought: parsed.thought,
            elapsed: start.elapsed(),
        })
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("signature", &self.signature)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
