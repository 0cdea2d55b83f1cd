//! # Method Controller
//!
//! The controller drives one run of a [`SearchMethod`]. A single coordinating
//! thread owns the method, the run counters and the random number generator;
//! sample and evaluation calls run on two rayon thread pools and report back
//! over a channel. Every mutation of the store therefore happens on one
//! thread, in the order completions arrive.
//!
//! ```text
//!   INIT ──seed──▶ RUNNING ──budget spent / stop──▶ DRAINING ──idle / drain timeout──▶ TERMINATED
//! ```
//!
//! - **INIT** seeds the store (template evaluation, supplied candidates, or
//!   nothing). A template that cannot be scored aborts the run.
//! - **RUNNING** keeps up to `num_samplers` samples in flight. Each
//!   successful sample is evaluated; each score is offered to the method.
//! - **DRAINING** dispatches nothing new but still evaluates and applies
//!   everything already in flight. With a drain timeout, calls still
//!   outstanding at the deadline are abandoned.
//! - **TERMINATED** is final; the controller cannot be run again.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, CandidateId};
use crate::error::{Result, ResultExt, SearchError};
use crate::evaluator::{Evaluate, EvaluationFailure};
use crate::method::{SearchMethod, Selection};
use crate::profiler::{EvaluationEvent, Profiler, SampleEvent};
use crate::rng::RandomNumberGenerator;
use crate::sampler::{Prompt, SampleDraft, SampleFailure, Sampler};
use crate::task::TaskSpec;

use super::options::RunOptions;
use super::state::{ControllerState, RunReport, RunState, StopHandle};

/// How often a running controller wakes up to check its stop handle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What the store starts from.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SeedSource {
    /// Evaluate the task's template function and store it.
    #[default]
    Template,
    /// Store already-scored candidates, e.g. from an earlier run.
    Candidates(Vec<Candidate>),
    /// Start empty; the first prompts ask for independent solutions.
    Empty,
}

enum Completion {
    Sampled {
        prompt: Prompt,
        generation: usize,
        elapsed: Duration,
        result: std::result::Result<SampleDraft, SampleFailure>,
    },
    Evaluated {
        candidate: Candidate,
        elapsed: Duration,
        result: std::result::Result<f64, EvaluationFailure>,
    },
}

pub struct MethodController {
    task: TaskSpec,
    options: RunOptions,
    method: Box<dyn SearchMethod>,
    sampler: Sampler,
    evaluator: Arc<dyn Evaluate>,
    profilers: Vec<Box<dyn Profiler>>,
    seed: SeedSource,
    stop: StopHandle,
    state: ControllerState,
    run: RunState,
    rng: RandomNumberGenerator,
    next_id: u64,
    in_flight_samples: usize,
    in_flight_evaluations: usize,
}

impl MethodController {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        task: TaskSpec,
        options: RunOptions,
        method: Box<dyn SearchMethod>,
        sampler: Sampler,
        evaluator: Arc<dyn Evaluate>,
        profilers: Vec<Box<dyn Profiler>>,
        seed: SeedSource,
        rng: RandomNumberGenerator,
    ) -> Self {
        let run = RunState::new(task.direction());
        Self {
            task,
            options,
            method,
            sampler,
            evaluator,
            profilers,
            seed,
            stop: StopHandle::new(),
            state: ControllerState::Init,
            run,
            rng,
            next_id: 0,
            in_flight_samples: 0,
            in_flight_evaluations: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn task(&self) -> &TaskSpec {
        &self.task
    }

    /// The method and its store, for inspection after a run.
    pub fn method(&self) -> &dyn SearchMethod {
        self.method.as_ref()
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// A handle that stops this controller from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs the search to completion on the calling thread.
    ///
    /// # Errors
    ///
    /// - `SearchError::Configuration` if the controller already ran.
    /// - `SearchError::Task` if the template program cannot be scored.
    /// - `SearchError::Other` if a thread pool cannot be created.
    ///
    /// Failed samples and evaluations are not errors; they are counted in the
    /// returned report.
    pub fn run(&mut self) -> Result<RunReport> {
        if self.state != ControllerState::Init {
            return Err(SearchError::Configuration(format!(
                "A controller runs once; this one is {:?}",
                self.state
            )));
        }

        let started = Instant::now();
        info!(
            task = self.task.name(),
            method = self.method.name(),
            direction = ?self.task.direction(),
            "run started"
        );

        let outcome = self.seed_population().and_then(|()| self.drive());
        self.terminate();
        outcome?;

        let report = self
            .run
            .report(self.state, self.method.generation_size(), started.elapsed());
        for profiler in &mut self.profilers {
            profiler.finish(&report);
        }
        Ok(report)
    }

    fn seed_population(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.seed, SeedSource::Empty) {
            SeedSource::Template if self.options.get_resume_mode() => {
                info!("resume mode, template not evaluated");
            }
            SeedSource::Template => {
                let candidate =
                    Candidate::new(CandidateId(0), self.task.template_function(), None, 0, vec![]);
                self.next_id = 1;
                let start = Instant::now();
                let seed = self
                    .evaluator
                    .evaluate(&candidate)
                    .map_err(|failure| failure.to_string())
                    .and_then(|score| {
                        candidate
                            .into_scored(score, start.elapsed())
                            .map_err(|e| e.to_string())
                    })
                    .map_err(|reason| {
                        SearchError::Task(format!(
                            "The template program could not be scored: {}",
                            reason
                        ))
                    })?;
                info!(score = seed.score(), "template evaluated");
                self.record_seed(seed, true)?;
            }
            SeedSource::Candidates(candidates) => {
                for candidate in candidates {
                    if !candidate.is_scored() {
                        return Err(SearchError::Configuration(format!(
                            "Seed candidate {} carries no score",
                            candidate.id()
                        )));
                    }
                    self.next_id = self.next_id.max(candidate.id().0 + 1);
                    self.record_seed(candidate, false)?;
                }
                info!(stored = self.method.len(), "seed candidates loaded");
            }
            SeedSource::Empty => {}
        }
        Ok(())
    }

    fn record_seed(&mut self, candidate: Candidate, evaluated: bool) -> Result<()> {
        let improved = self.run.observe(&candidate);
        let event = EvaluationEvent {
            timestamp: Utc::now(),
            generation: candidate.generation_index(),
            candidate: candidate.id(),
            parents: candidate.parents().to_vec(),
            score: candidate.score(),
            failure: None,
            message: None,
            sample_time: candidate.sample_time(),
            evaluate_time: candidate.evaluate_time().unwrap_or_default(),
            stored: true,
            improved,
            best_score: self.run.best_score(),
        };
        self.method.seed(candidate, &mut self.rng)?;
        if evaluated {
            self.emit_evaluation(&event);
        }
        Ok(())
    }

    fn drive(&mut self) -> Result<()> {
        let samplers = build_pool("sampler", self.options.get_num_samplers())?;
        let evaluators = build_pool("evaluator", self.options.get_num_evaluators())?;
        let limit = self.options.attempt_limit(self.method.generation_size());
        let (tx, rx) = mpsc::channel();
        let mut drain_deadline = None;

        self.transition(ControllerState::Running);
        debug!(limit, "dispatching");

        loop {
            if self.state == ControllerState::Running {
                if self.stop.is_stopped() {
                    info!("stop requested");
                    drain_deadline = self.begin_drain();
                } else {
                    self.dispatch_samples(&samplers, &tx, limit)?;
                    if self.run.samples >= limit {
                        drain_deadline = self.begin_drain();
                    }
                }
            }

            if self.in_flight() == 0 {
                break;
            }

            let wait = match drain_deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.run.abandoned = self.in_flight();
                        warn!(abandoned = self.run.abandoned, "drain timed out");
                        break;
                    }
                    deadline - now
                }
                None => POLL_INTERVAL,
            };

            match rx.recv_timeout(wait) {
                Ok(completion) => self.apply(completion, &evaluators, &tx)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn begin_drain(&mut self) -> Option<Instant> {
        self.transition(ControllerState::Draining);
        debug!(in_flight = self.in_flight(), "draining");
        self.options
            .get_drain_timeout()
            .map(|timeout| Instant::now() + timeout)
    }

    fn terminate(&mut self) {
        if self.state == ControllerState::Running {
            self.transition(ControllerState::Draining);
        }
        self.transition(ControllerState::Terminated);
    }

    fn transition(&mut self, next: ControllerState) {
        if self.state.can_transition_to(next) {
            debug!(from = ?self.state, to = ?next, "controller state");
            self.state = next;
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight_samples + self.in_flight_evaluations
    }

    /// Parents for the next prompt; an empty store asks for a fresh solution.
    fn next_selection(&mut self) -> Result<Selection> {
        if self.method.is_empty() {
            return Ok(Selection::fresh());
        }
        match self.method.select_parents(&mut self.rng) {
            Err(SearchError::EmptyPopulation) => Ok(Selection::fresh()),
            other => other,
        }
    }

    fn dispatch_samples(
        &mut self,
        pool: &ThreadPool,
        tx: &Sender<Completion>,
        limit: usize,
    ) -> Result<()> {
        while self.in_flight_samples < self.options.get_num_samplers() && self.run.samples < limit {
            let selection = self.next_selection()?;
            let prompt = self.method.build_prompt_context(&self.task, &selection);
            let generation = self.run.generation(self.method.generation_size());
            let copies = self
                .options
                .get_samples_per_prompt()
                .min(limit - self.run.samples);

            for _ in 0..copies {
                self.run.samples += 1;
                self.in_flight_samples += 1;

                let sampler = self.sampler.clone();
                let prompt = prompt.clone();
                let tx = tx.clone();
                pool.spawn(move || {
                    let start = Instant::now();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| sampler.sample(&prompt)))
                        .unwrap_or_else(|payload| {
                            Err(SampleFailure::Transport {
                                attempts: 1,
                                message: panic_message(payload.as_ref()),
                            })
                        });
                    // The receiver is gone only after an abandoned drain.
                    let _ = tx.send(Completion::Sampled {
                        prompt,
                        generation,
                        elapsed: start.elapsed(),
                        result,
                    });
                });
            }
        }
        Ok(())
    }

    fn dispatch_evaluation(&mut self, pool: &ThreadPool, tx: &Sender<Completion>, candidate: Candidate) {
        self.in_flight_evaluations += 1;
        let evaluator = Arc::clone(&self.evaluator);
        let tx = tx.clone();
        pool.spawn(move || {
            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(&candidate)))
                .unwrap_or_else(|payload| {
                    Err(EvaluationFailure::runtime(format!(
                        "evaluator panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            let _ = tx.send(Completion::Evaluated {
                candidate,
                elapsed: start.elapsed(),
                result,
            });
        });
    }

    fn apply(
        &mut self,
        completion: Completion,
        evaluators: &ThreadPool,
        tx: &Sender<Completion>,
    ) -> Result<()> {
        match completion {
            Completion::Sampled {
                prompt,
                generation,
                elapsed,
                result,
            } => {
                self.in_flight_samples -= 1;
                self.apply_sample(prompt, generation, elapsed, result, evaluators, tx);
                Ok(())
            }
            Completion::Evaluated {
                candidate,
                elapsed,
                result,
            } => {
                self.in_flight_evaluations -= 1;
                self.apply_evaluation(candidate, elapsed, result)
            }
        }
    }

    fn apply_sample(
        &mut self,
        prompt: Prompt,
        generation: usize,
        elapsed: Duration,
        result: std::result::Result<SampleDraft, SampleFailure>,
        evaluators: &ThreadPool,
        tx: &Sender<Completion>,
    ) {
        let mut event = SampleEvent {
            timestamp: Utc::now(),
            generation,
            operator: prompt.operator,
            parents: prompt.parents.clone(),
            candidate: None,
            elapsed,
            error: None,
        };

        match result {
            Ok(draft) => {
                let id = CandidateId(self.next_id);
                self.next_id += 1;
                let candidate = Candidate::new(id, draft.source, draft.thought, generation, prompt.parents)
                    .with_origin(prompt.origin)
                    .with_sample_time(draft.elapsed);
                event.candidate = Some(id);
                self.emit_sample(&event);
                self.dispatch_evaluation(evaluators, tx, candidate);
            }
            Err(failure) => {
                self.run.sample_failures += 1;
                event.error = Some(failure.to_string());
                self.emit_sample(&event);
            }
        }
    }

    fn apply_evaluation(
        &mut self,
        candidate: Candidate,
        elapsed: Duration,
        result: std::result::Result<f64, EvaluationFailure>,
    ) -> Result<()> {
        self.run.evaluations += 1;

        let mut event = EvaluationEvent {
            timestamp: Utc::now(),
            generation: candidate.generation_index(),
            candidate: candidate.id(),
            parents: candidate.parents().to_vec(),
            score: None,
            failure: None,
            message: None,
            sample_time: candidate.sample_time(),
            evaluate_time: elapsed,
            stored: false,
            improved: false,
            best_score: None,
        };

        let scored = result.and_then(|score| {
            candidate
                .into_scored(score, elapsed)
                .map_err(|e| EvaluationFailure::invalid_score(e.to_string()))
        });

        match scored {
            Ok(candidate) => {
                event.score = candidate.score();
                event.improved = self.run.observe(&candidate);
                let insertion = self.method.insert(candidate, &mut self.rng)?;
                self.run.record_insertion(insertion);
                event.stored = insertion.is_stored();
            }
            Err(failure) => {
                self.run.record_evaluation_failure(failure.kind);
                event.failure = Some(failure.kind);
                event.message = Some(failure.message);
            }
        }

        event.best_score = self.run.best_score();
        self.emit_evaluation(&event);
        Ok(())
    }

    fn emit_sample(&mut self, event: &SampleEvent) {
        for profiler in &mut self.profilers {
            profiler.record_sample(event);
        }
    }

    fn emit_evaluation(&mut self, event: &EvaluationEvent) {
        for profiler in &mut self.profilers {
            profiler.record_evaluation(event);
        }
    }
}

impl std::fmt::Debug for MethodController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodController")
            .field("task", &self.task.name())
            .field("method", &self.method.name())
            .field("state", &self.state)
            .field("samples", &self.run.samples)
            .field("evaluations", &self.run.evaluations)
            .finish_non_exhaustive()
    }
}

fn build_pool(role: &'static str, threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("heurist-{}-{}", role, i))
        .build()
        .context(format!("Failed to build the {} pool", role))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
