//! Prompt builders.
//!
//! Every prompt ends by restating the function the model must write, with its
//! exact name and parameters, so that the response parser can find it again.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, CandidateId};
use crate::task::{parser, TaskSpec};

/// The instruction a prompt carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// A fresh, independent solution; no parents.
    Fresh,
    /// A strictly better variant of one parent.
    Improve,
    /// A new algorithm different from all parents.
    E1,
    /// A new algorithm sharing the parents' common backbone.
    E2,
    /// A modified version of one parent.
    M1,
    /// The same algorithm as one parent with retuned parameters.
    M2,
    /// The next version in a sequence of improving versions.
    Continue,
}

impl Operator {
    pub fn is_crossover(self) -> bool {
        matches!(self, Operator::E1 | Operator::E2)
    }
}

/// A prompt ready to be sent, with the lineage it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub operator: Operator,
    pub parents: Vec<CandidateId>,
    /// Lane or island of the parents.
    pub origin: Option<usize>,
}

impl Prompt {
    pub fn new(
        text: String,
        operator: Operator,
        parents: &[&Candidate],
        origin: Option<usize>,
    ) -> Self {
        Self {
            text,
            operator,
            parents: parents.iter().map(|c| c.id()).collect(),
            origin,
        }
    }
}

fn task_header(task: &TaskSpec) -> String {
    format!("{}\n\n", task.description().trim())
}

fn function_contract(task: &TaskSpec) -> String {
    let signature = task.signature();
    let parameters = signature
        .parameters()
        .iter()
        .map(|p| format!("'{}'", p))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Implement it in Python as a function named '{}'. This function should accept {} input(s): {}. \
         Keep the signature exactly as:\n{}\n",
        signature.name(),
        signature.parameters().len(),
        parameters,
        signature.header()
    )
}

fn score_text(candidate: &Candidate) -> String {
    candidate
        .score()
        .map(|score| format!("{}", score))
        .unwrap_or_else(|| "not evaluated".to_string())
}

/// A fresh solution conditioned only on the task.
pub fn fresh(task: &TaskSpec) -> String {
    let mut text = task_header(task);
    text.push_str(
        "Design a new heuristic for this problem. First describe your algorithm in one \
         sentence inside braces {}. ",
    );
    text.push_str(&function_contract(task));
    text.push_str("Do not give additional explanations.\n");
    text
}

/// One parent plus the instruction to beat it.
pub fn improve(task: &TaskSpec, parent: &Candidate) -> String {
    let mut text = task_header(task);
    let _ = write!(
        text,
        "Here is the current best function. Its score is {} ({}).\n\n```python\n{}\n```\n\n",
        score_text(parent),
        task.direction().hint(),
        parent.source().trim_end()
    );
    text.push_str(
        "Write a variant whose score is strictly better. First describe the change in one \
         sentence inside braces {}. ",
    );
    text.push_str(&function_contract(task));
    text.push_str("Do not give additional explanations.\n");
    text
}

fn describe_parents(text: &mut String, parents: &[&Candidate]) {
    for (index, parent) in parents.iter().enumerate() {
        let _ = write!(
            text,
            "No.{} algorithm (score {}): {}\n```python\n{}\n```\n\n",
            index + 1,
            score_text(parent),
            parent.thought().unwrap_or("(no description)"),
            parent.source().trim_end()
        );
    }
}

/// Evolution-of-heuristics prompt for one operator.
pub fn evolution(task: &TaskSpec, operator: Operator, parents: &[&Candidate]) -> String {
    let mut text = task_header(task);

    let instruction = match operator {
        Operator::E1 => {
            let _ = writeln!(
                text,
                "I have {} existing algorithms with their codes as follows:\n",
                parents.len()
            );
            describe_parents(&mut text, parents);
            "Please create a new algorithm that has a totally different form from the given ones."
        }
        Operator::E2 => {
            let _ = writeln!(
                text,
                "I have {} existing algorithms with their codes as follows:\n",
                parents.len()
            );
            describe_parents(&mut text, parents);
            "Please identify the common backbone idea of the provided algorithms, then create a \
             new algorithm that is based on the backbone idea but has a different form."
        }
        Operator::M1 => {
            text.push_str("I have one algorithm with its code as follows:\n\n");
            describe_parents(&mut text, parents);
            "Please create a new algorithm that is a modified version of the algorithm provided."
        }
        Operator::M2 => {
            text.push_str("I have one algorithm with its code as follows:\n\n");
            describe_parents(&mut text, parents);
            "Please identify the main parameters of the algorithm provided and create a new \
             algorithm with different parameter settings."
        }
        Operator::Continue => return continuation(task, parents),
        Operator::Improve if !parents.is_empty() => return improve(task, parents[0]),
        Operator::Fresh | Operator::Improve => return fresh(task),
    };

    let _ = write!(
        text,
        "{} First, describe your new algorithm and main steps in one sentence inside braces {{}}. ",
        instruction
    );
    text.push_str(&function_contract(task));
    text.push_str("Do not give additional explanations.\n");
    text
}

/// Versioned-sequence prompt: `parents` sorted from worst to best are shown as
/// `<name>_v0 .. <name>_v{k-1}`, then the header of `<name>_v{k}` is left open
/// for the model to complete.
pub fn continuation(task: &TaskSpec, parents: &[&Candidate]) -> String {
    let signature = task.signature();
    let name = signature.name();
    let mut text = task_header(task);
    text.push_str("```python\n");

    for (version, parent) in parents.iter().enumerate() {
        let versioned = format!("{}_v{}", name, version);
        let mut source = parser::rename_function(parent.source().trim_end(), &versioned);
        if version > 0 && parser::docstring(&source).is_none() {
            source = with_docstring(
                &source,
                &format!("Improved version of `{}_v{}`.", name, version - 1),
            );
        }
        let _ = write!(text, "{}\n\n\n", source.trim_end());
    }

    let next = parents.len();
    let header = signature.renamed_header(&format!("{}_v{}", name, next));
    let _ = write!(text, "{}\n    \"\"\"", header);
    if next > 0 {
        let _ = write!(text, "Improved version of `{}_v{}`.", name, next - 1);
    }
    text.push_str("\"\"\"\n```\n");
    let _ = write!(text, "Complete the body of `{}_v{}`.\n", name, next);
    text
}

fn with_docstring(source: &str, docstring: &str) -> String {
    match parser::find_functions(source).into_iter().next() {
        Some(span) if span.body().starts_with('\n') => {
            format!("{}\n    \"\"\"{}\"\"\"{}", span.header, docstring, span.body())
        }
        _ => source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Direction;
    use std::time::Duration;

    fn task() -> TaskSpec {
        TaskSpec::new(
            "bins",
            "Pack items into as few bins as possible.",
            "def priority(item, bins):\n    return bins - item\n",
            "priority",
            Direction::Minimize,
        )
        .unwrap()
    }

    fn scored(id: u64, body: &str, score: f64) -> Candidate {
        Candidate::new(
            CandidateId(id),
            format!("def priority(item, bins):\n    {}\n", body),
            Some(format!("idea {}", id)),
            0,
            vec![],
        )
        .into_scored(score, Duration::ZERO)
        .unwrap()
    }

    #[test]
    fn test_fresh_prompt_states_contract() {
        let text = fresh(&task());
        assert!(text.starts_with("Pack items"));
        assert!(text.contains("function named 'priority'"));
        assert!(text.contains("2 input(s): 'item', 'bins'"));
        assert!(text.contains("def priority(item, bins):"));
    }

    #[test]
    fn test_improve_prompt_shows_score_and_direction() {
        let parent = scored(3, "return item", 10.0);
        let text = improve(&task(), &parent);
        assert!(text.contains("score is 10 (lower is better)"));
        assert!(text.contains("return item"));
        assert!(text.contains("strictly better"));
    }

    #[test]
    fn test_evolution_prompt_lists_parents() {
        let a = scored(1, "return item", 3.0);
        let b = scored(2, "return -item", 4.0);
        let text = evolution(&task(), Operator::E1, &[&a, &b]);

        assert!(text.contains("I have 2 existing algorithms"));
        assert!(text.contains("No.1 algorithm (score 3): idea 1"));
        assert!(text.contains("No.2 algorithm (score 4): idea 2"));
        assert!(text.contains("totally different form"));
        assert!(text.contains("inside braces {}"));
    }

    #[test]
    fn test_continuation_prompt_versions_parents() {
        let worse = scored(1, "return item", 9.0);
        let better = scored(2, "return -item", 5.0);
        let text = continuation(&task(), &[&worse, &better]);

        assert!(text.contains("def priority_v0(item, bins):\n    return item"));
        assert!(text.contains("def priority_v1(item, bins):\n    \"\"\"Improved version of `priority_v0`.\"\"\""));
        assert!(text.contains("def priority_v2(item, bins):\n    \"\"\"Improved version of `priority_v1`.\"\"\""));
        assert!(!text.contains("def priority(item"));
    }

    #[test]
    fn test_operator_crossover() {
        assert!(Operator::E2.is_crossover());
        assert!(!Operator::M1.is_crossover());
    }
}
