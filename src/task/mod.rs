//! # Task Capability
//!
//! A task is described by a plain record rather than a type hierarchy: a name,
//! a natural-language description used in prompts, a template program that
//! contains the function to evolve, the comparison direction of its scores and
//! the command that evaluates a program inside an isolated worker.
//!
//! ## Example
//!
//! ```rust
//! use heurist::candidate::Direction;
//! use heurist::task::{TaskSpec, WorkerCommand};
//!
//! let template = "def priority(item, bins):\n    return bins - item\n";
//! let task = TaskSpec::new(
//!     "online_bin_packing",
//!     "Assign each item to a bin so that as few bins as possible are used.",
//!     template,
//!     "priority",
//!     Direction::Maximize,
//! )
//! .unwrap()
//! .with_entry_point(WorkerCommand::new("python3", ["evaluate.py"]));
//!
//! assert_eq!(task.signature().parameters(), ["item", "bins"]);
//! ```

pub mod parser;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::candidate::Direction;
use crate::error::{OptionExt, Result, SearchError};

/// The declared signature candidates must implement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    name: String,
    parameters: Vec<String>,
    header: String,
}

impl FunctionSignature {
    /// Parses a Python-style function header such as `def f(a, b=1) -> float:`.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Parse` if the header has no name or unbalanced
    /// parentheses.
    pub fn parse(header: &str) -> Result<Self> {
        let trimmed = header.trim();
        let rest = trimmed
            .strip_prefix("async ")
            .unwrap_or(trimmed)
            .strip_prefix("def ")
            .ok_or_else_search(|| SearchError::Parse(format!("not a function header: {}", trimmed)))?;

        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            return Err(SearchError::Parse(format!(
                "function header without a name: {}",
                trimmed
            )));
        }

        let open = rest
            .find('(')
            .ok_or_else_search(|| SearchError::Parse(format!("missing parameter list: {}", trimmed)))?;

        let mut depth = 0;
        let mut close = None;
        for (pos, c) in rest[open..].char_indices() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + pos);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| {
            SearchError::Parse(format!("unbalanced parameter list: {}", trimmed))
        })?;

        let mut parameters = Vec::new();
        let mut current = String::new();
        let mut depth = 0;
        for c in rest[open + 1..close].chars() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ',' if depth == 0 => {
                    parameters.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
            current.push(c);
        }
        parameters.push(current);

        let parameters = parameters
            .iter()
            .filter_map(|p| {
                let name = p.split([':', '=']).next().unwrap_or("").trim();
                (!name.is_empty() && name != "*" && name != "/").then(|| name.to_string())
            })
            .collect();

        Ok(Self {
            name,
            parameters,
            header: trimmed.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// The header text exactly as written in the template.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// The header with the function renamed, e.g. for versioned prompts.
    pub fn renamed_header(&self, new_name: &str) -> String {
        parser::rename_function(&self.header, new_name)
    }
}

/// The command that runs one evaluation inside the isolation boundary.
///
/// The worker receives a JSON [`WorkerRequest`](crate::evaluator::protocol::WorkerRequest)
/// on stdin and answers with one JSON
/// [`WorkerResponse`](crate::evaluator::protocol::WorkerResponse) line on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Capability record of an optimisation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    name: String,
    description: String,
    template_program: String,
    template_function: String,
    signature: FunctionSignature,
    direction: Direction,
    entry_point: Option<WorkerCommand>,
}

impl TaskSpec {
    /// Creates a task whose evolved function is `function_name` inside
    /// `template_program`.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Task` if the template does not define the
    /// function or its header cannot be parsed.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        template_program: impl Into<String>,
        function_name: &str,
        direction: Direction,
    ) -> Result<Self> {
        let name = name.into();
        let template_program = template_program.into();

        let span = parser::find_functions(&template_program)
            .into_iter()
            .find(|span| span.name == function_name)
            .ok_or_else(|| {
                SearchError::Task(format!(
                    "template program of task `{}` does not define `{}`",
                    name, function_name
                ))
            })?;
        let signature = FunctionSignature::parse(&span.header)
            .map_err(|e| SearchError::Task(format!("task `{}`: {}", name, e)))?;

        Ok(Self {
            name,
            description: description.into(),
            template_function: span.text,
            template_program,
            signature,
            direction,
            entry_point: None,
        })
    }

    /// Declares the evaluation entry point run by the secure evaluator.
    pub fn with_entry_point(mut self, entry_point: WorkerCommand) -> Self {
        self.entry_point = Some(entry_point);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn template_program(&self) -> &str {
        &self.template_program
    }

    /// The evolved function as written in the template; it doubles as the
    /// seed candidate's source.
    pub fn template_function(&self) -> &str {
        &self.template_function
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn entry_point(&self) -> Option<&WorkerCommand> {
        self.entry_point.as_ref()
    }

    /// Builds the complete program for a candidate function.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Task` if the template no longer contains the
    /// evolved function (which `new` rules out).
    pub fn assemble_program(&self, source: &str) -> Result<String> {
        parser::replace_function(&self.template_program, self.signature.name(), source)
            .ok_or_else(|| {
                SearchError::Task(format!(
                    "template program of task `{}` lost function `{}`",
                    self.name,
                    self.signature.name()
                ))
            })
    }
}
