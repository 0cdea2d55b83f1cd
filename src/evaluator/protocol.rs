//! # Worker Protocol
//!
//! The controller and an evaluation worker exchange exactly two JSON
//! documents: one [`WorkerRequest`] written to the worker's stdin, and one
//! [`WorkerResponse`] line written to its stdout. Anything else the worker
//! prints (candidate `print` calls, warnings) is ignored; the last line of
//! stdout that decodes as a response wins.
//!
//! ```text
//! -> {"task":"tsp","function_name":"select","program":"...","source":"...","accelerate":false,"timeout_secs":2.0}
//! <- {"status":"ok","score":-7.25}
//! <- {"status":"error","message":"ZeroDivisionError: division by zero"}
//! <- {"status":"acceleration_failed","message":"numba could not compile"}
//! ```
//!
//! Workers written in Rust can use [`serve`] to implement their side.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Input document of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task: String,
    pub function_name: String,
    /// The full program: the task template with the candidate function spliced in.
    pub program: String,
    /// The candidate function alone.
    pub source: String,
    /// Ask the worker to JIT-compile the candidate before timing it.
    #[serde(default)]
    pub accelerate: bool,
    /// Wall-clock seconds left for this attempt.
    pub timeout_secs: f64,
}

/// Output document of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// The candidate ran; `null` or a missing score is an invalid result.
    Ok {
        #[serde(default)]
        score: Option<f64>,
    },
    /// The candidate raised, failed to parse or returned the wrong shape.
    Error { message: String },
    /// Acceleration was requested but compiling the candidate failed; the
    /// controller retries without acceleration.
    AccelerationFailed { message: String },
}

impl WorkerResponse {
    pub fn ok(score: f64) -> Self {
        WorkerResponse::Ok { score: Some(score) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WorkerResponse::Error {
            message: message.into(),
        }
    }
}

/// Finds the response in a worker's stdout.
pub fn decode_response(stdout: &str) -> Option<WorkerResponse> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

/// Runs the worker side of the protocol: reads one request from `input`, hands
/// it to `handler` and writes the response as a single line to `output`.
///
/// # Errors
///
/// Returns an error if the request cannot be read or decoded, or the response
/// cannot be written.
pub fn serve<R, W, F>(mut input: R, mut output: W, handler: F) -> Result<()>
where
    R: Read,
    W: Write,
    F: FnOnce(&WorkerRequest) -> WorkerResponse,
{
    let mut payload = String::new();
    input.read_to_string(&mut payload)?;
    let request: WorkerRequest = serde_json::from_str(&payload)?;

    let response = handler(&request);
    serde_json::to_writer(&mut output, &response)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_string(&WorkerResponse::ok(1.5)).unwrap();
        assert_eq!(json, r#"{"status":"ok","score":1.5}"#);

        let decoded: WorkerResponse =
            serde_json::from_str(r#"{"status":"acceleration_failed","message":"no"}"#).unwrap();
        assert_eq!(
            decoded,
            WorkerResponse::AccelerationFailed {
                message: "no".to_string()
            }
        );
    }

    #[test]
    fn test_decode_skips_noise() {
        let stdout = "debug output\n{\"status\":\"ok\",\"score\":3}\n{not json}\n\n";
        assert_eq!(decode_response(stdout), Some(WorkerResponse::ok(3.0)));
        assert_eq!(decode_response("Traceback ...\n"), None);
    }

    #[test]
    fn test_null_score_decodes_as_missing() {
        let decoded = decode_response(r#"{"status":"ok","score":null}"#);
        assert_eq!(decoded, Some(WorkerResponse::Ok { score: None }));
    }

    #[test]
    fn test_serve_round() {
        let request = WorkerRequest {
            task: "demo".to_string(),
            function_name: "f".to_string(),
            program: "def f():\n    return 2\n".to_string(),
            source: "def f():\n    return 2\n".to_string(),
            accelerate: false,
            timeout_secs: 1.0,
        };
        let input = serde_json::to_vec(&request).unwrap();
        let mut output = Vec::new();

        serve(input.as_slice(), &mut output, |req| {
            WorkerResponse::ok(req.source.lines().count() as f64)
        })
        .unwrap();

        let text = String::from_utf8(output).unwrap();
        assert_eq!(decode_response(&text), Some(WorkerResponse::ok(2.0)));
        assert!(text.ends_with('\n'));
    }
}
