use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use heurist::{
    candidate::{Candidate, CandidateId, Direction},
    error::SearchError,
    evaluator::{EvaluationFailure, FailureKind, FnEvaluator},
    evolution::{ControllerBuilder, ControllerState, RunOptions, SeedSource},
    method::MethodConfig,
    profiler::MemoryProfiler,
    sampler::Operator,
    task::TaskSpec,
};

fn task(direction: Direction) -> TaskSpec {
    TaskSpec::new(
        "constant",
        "Return a constant.",
        "def value(x):\n    return 10\n",
        "value",
        direction,
    )
    .unwrap()
}

fn function(value: impl std::fmt::Display) -> String {
    format!("def value(x):\n    return {}\n", value)
}

/// Scores a candidate by the number after its last `return`.
fn returned_value(candidate: &Candidate) -> Result<f64, EvaluationFailure> {
    candidate
        .source()
        .rsplit("return")
        .next()
        .and_then(|tail| tail.trim().parse::<f64>().ok())
        .ok_or_else(|| EvaluationFailure::runtime("no returned constant"))
}

/// A generator answering with the given values in call order, then repeating
/// the last one.
fn scripted(values: Vec<f64>) -> impl Fn(&str, Duration) -> heurist::Result<String> + Send + Sync {
    let calls = AtomicUsize::new(0);
    move |_prompt: &str, _timeout: Duration| {
        let i = calls.fetch_add(1, Ordering::SeqCst).min(values.len() - 1);
        Ok(function(values[i]))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn sequential(max_samples: usize) -> RunOptions {
    RunOptions::builder()
        .max_samples(Some(max_samples))
        .num_samplers(1)
        .num_evaluators(1)
        .rng_seed(42)
        .build()
}

#[test]
fn test_hill_climb_keeps_strict_improvements() {
    init_tracing();
    let profiler = MemoryProfiler::new();
    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Minimize))
        .with_generator(scripted(vec![12.0, 8.0, 9.0]))
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_method(MethodConfig::HillClimbing { lanes: 1 })
        .with_options(sequential(3))
        .with_profiler(profiler.clone())
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    assert_eq!(report.state, ControllerState::Terminated);
    assert_eq!(report.samples, 3);
    assert_eq!(report.evaluations, 3);
    assert_eq!(report.insertions, 1);
    assert_eq!(report.best_score(), Some(8.0));

    let method = controller.method();
    assert_eq!(method.best().and_then(Candidate::score), Some(8.0));
    assert!(!method.contains(CandidateId(1)));
    assert!(method.contains(CandidateId(2)));

    // template evaluation plus three samples
    assert_eq!(profiler.evaluation_count(), 4);
    assert_eq!(profiler.best_curve(), vec![(1, 10.0), (3, 8.0)]);
}

#[test]
fn test_budget_counts_failed_samples() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let generator = move |_prompt: &str, _timeout: Duration| -> heurist::Result<String> {
        let i = counter.fetch_add(1, Ordering::SeqCst);
        if i % 2 == 1 {
            Ok("I am not able to write that function.".to_string())
        } else {
            Ok(function(i))
        }
    };

    let options = RunOptions::builder()
        .max_samples(Some(5))
        .max_generate_retries(0)
        .rng_seed(1)
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(generator)
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_method(MethodConfig::RandomSampling)
        .with_options(options)
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(report.samples, 5);
    assert_eq!(report.sample_failures, 2);
    assert_eq!(report.evaluations, 3);
    assert_eq!(report.best_score(), Some(10.0));
}

#[test]
fn test_transport_failures_are_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let generator = move |_prompt: &str, _timeout: Duration| -> heurist::Result<String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(SearchError::Generation("connection reset".to_string()))
    };

    let options = RunOptions::builder()
        .max_samples(Some(4))
        .max_generate_retries(2)
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(generator)
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_options(options)
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 12);
    assert_eq!(report.sample_failures, 4);
    assert_eq!(report.evaluations, 0);
    assert_eq!(report.best_score(), Some(10.0));
}

#[test]
fn test_generation_bound() {
    let options = RunOptions::builder()
        .max_samples(None)
        .max_generations(Some(2))
        .rng_seed(3)
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]))
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_method(MethodConfig::EvolutionOfHeuristics {
            population_size: 4,
            crossover_parents: 2,
            max_clusters: None,
            selection: Default::default(),
            operator_weights: Default::default(),
            signature: Default::default(),
        })
        .with_options(options)
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    assert_eq!(report.samples, 8);
    assert_eq!(report.generations, 2);
}

#[test]
fn test_evaluation_failures_are_counted() {
    let evaluator = FnEvaluator::new(|candidate: &Candidate| match returned_value(candidate)? {
        v if v < 2.0 => Err(EvaluationFailure::timeout(Duration::from_secs(1))),
        v if v < 3.0 => Err(EvaluationFailure::crash("segfault")),
        v if v < 4.0 => Ok(f64::NAN),
        v => Ok(v),
    });

    let profiler = MemoryProfiler::new();
    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![1.0, 2.0, 3.0, 11.0]))
        .with_evaluator(evaluator)
        .with_method(MethodConfig::RandomSampling)
        .with_options(sequential(4))
        .with_profiler(profiler.clone())
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    assert_eq!(report.evaluations, 4);
    assert_eq!(report.evaluation_failures, 3);
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.best_score(), Some(11.0));

    let kinds: Vec<Option<FailureKind>> = profiler
        .evaluations()
        .iter()
        .skip(1)
        .map(|event| event.failure)
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(FailureKind::Timeout),
            Some(FailureKind::Crash),
            Some(FailureKind::InvalidScore),
            None
        ]
    );
}

#[test]
fn test_evaluator_panic_is_contained() {
    let evaluator = FnEvaluator::new(|candidate: &Candidate| {
        let value = returned_value(candidate)?;
        if value == 13.0 {
            panic!("unlucky candidate");
        }
        Ok(value)
    });

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![13.0, 14.0]))
        .with_evaluator(evaluator)
        .with_options(sequential(2))
        .build()
        .unwrap();

    let report = controller.run().unwrap();
    assert_eq!(report.evaluation_failures, 1);
    assert_eq!(report.best_score(), Some(14.0));
}

#[test]
fn test_lineage_points_to_stored_parents() {
    let profiler = MemoryProfiler::new();
    let options = RunOptions::builder()
        .max_samples(Some(20))
        .num_samplers(3)
        .num_evaluators(2)
        .rng_seed(5)
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted((1..=20).map(f64::from).collect()))
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_method(MethodConfig::evolution_of_heuristics())
        .with_options(options)
        .with_profiler(profiler.clone())
        .build()
        .unwrap();

    controller.run().unwrap();

    let events = profiler.evaluations();
    assert_eq!(events.len(), 21);
    for (position, event) in events.iter().enumerate() {
        for parent in &event.parents {
            assert!(
                events[..position].iter().any(|earlier| earlier.candidate == *parent),
                "parent {} of {} was never evaluated before it",
                parent,
                event.candidate
            );
        }
    }
    assert!(events[1..].iter().any(|event| !event.parents.is_empty()));
}

#[test]
fn test_empty_seed_bootstraps_fresh() {
    let profiler = MemoryProfiler::new();
    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![3.0, 5.0, 4.0]))
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_method(MethodConfig::HillClimbing { lanes: 1 })
        .with_seed(SeedSource::Empty)
        .with_options(sequential(3))
        .with_profiler(profiler.clone())
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    let samples = profiler.samples();
    assert_eq!(samples[0].operator, Operator::Fresh);
    assert!(samples[0].parents.is_empty());
    assert_eq!(samples[0].candidate, Some(CandidateId(0)));
    assert_eq!(report.best_score(), Some(5.0));
}

#[test]
fn test_seed_candidates_continue_ids() {
    let seed = Candidate::new(CandidateId(41), function(2), None, 3, vec![])
        .into_scored(2.0, Duration::ZERO)
        .unwrap();

    let profiler = MemoryProfiler::new();
    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![1.0]))
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_seed(SeedSource::Candidates(vec![seed]))
        .with_options(sequential(2))
        .with_profiler(profiler.clone())
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    let ids: Vec<CandidateId> = profiler.samples().iter().filter_map(|s| s.candidate).collect();
    assert_eq!(ids, vec![CandidateId(42), CandidateId(43)]);
    assert_eq!(profiler.samples()[0].parents, vec![CandidateId(41)]);
    assert_eq!(report.best_score(), Some(2.0));
}

#[test]
fn test_unscored_seed_is_rejected() {
    let seed = Candidate::new(CandidateId(0), function(2), None, 0, vec![]);
    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![1.0]))
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_seed(SeedSource::Candidates(vec![seed]))
        .build()
        .unwrap();

    assert!(matches!(controller.run(), Err(SearchError::Configuration(_))));
}

#[test]
fn test_failed_template_is_fatal() {
    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![1.0]))
        .with_evaluator(FnEvaluator::new(|_: &Candidate| {
            Err(EvaluationFailure::runtime("NameError: name 'np' is not defined"))
        }))
        .build()
        .unwrap();

    match controller.run() {
        Err(SearchError::Task(msg)) => assert!(msg.contains("NameError")),
        other => panic!("Expected Task error, got {:?}", other),
    }
    assert_eq!(controller.state(), ControllerState::Terminated);
    assert_eq!(controller.run_state().samples, 0);

    // terminated is final
    assert!(matches!(controller.run(), Err(SearchError::Configuration(_))));
}

#[test]
fn test_resume_mode_skips_template() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evaluations);
    let evaluator = FnEvaluator::new(move |candidate: &Candidate| {
        counter.fetch_add(1, Ordering::SeqCst);
        returned_value(candidate)
    });

    let options = RunOptions::builder()
        .max_samples(Some(2))
        .resume_mode(true)
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(scripted(vec![1.0]))
        .with_evaluator(evaluator)
        .with_options(options)
        .build()
        .unwrap();

    controller.run().unwrap();
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

#[test]
fn test_stop_drains_in_flight_work() {
    init_tracing();
    let generator = |_prompt: &str, _timeout: Duration| -> heurist::Result<String> {
        thread::sleep(Duration::from_millis(20));
        Ok(function(1))
    };

    let options = RunOptions::builder()
        .max_samples(Some(100_000))
        .num_samplers(2)
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(generator)
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_method(MethodConfig::RandomSampling)
        .with_options(options)
        .build()
        .unwrap();

    let handle = controller.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        handle.stop();
    });

    let report = controller.run().unwrap();
    stopper.join().unwrap();

    assert_eq!(report.state, ControllerState::Terminated);
    assert!(report.samples < 100_000);
    assert_eq!(report.sample_failures + report.evaluations, report.samples);
    assert_eq!(report.abandoned, 0);
}

#[test]
fn test_drain_timeout_abandons_slow_calls() {
    let generator = |_prompt: &str, _timeout: Duration| -> heurist::Result<String> {
        thread::sleep(Duration::from_secs(2));
        Ok(function(1))
    };

    let options = RunOptions::builder()
        .max_samples(Some(2))
        .num_samplers(2)
        .drain_timeout(Duration::from_millis(100))
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Maximize))
        .with_generator(generator)
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_options(options)
        .build()
        .unwrap();

    let start = Instant::now();
    let report = controller.run().unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(report.samples, 2);
    assert_eq!(report.abandoned, 2);
    assert_eq!(report.evaluations, 0);
    assert_eq!(report.best_score(), Some(10.0));
}

#[test]
fn test_fun_search_run() {
    let profiler = MemoryProfiler::new();
    let options = RunOptions::builder()
        .max_samples(Some(12))
        .num_samplers(2)
        .rng_seed(11)
        .build();

    let mut controller = ControllerBuilder::new()
        .with_task(task(Direction::Minimize))
        .with_generator(scripted((0..12).map(|i| 20.0 - f64::from(i)).collect()))
        .with_evaluator(FnEvaluator::new(returned_value))
        .with_method(MethodConfig::FunSearch {
            num_islands: 3,
            functions_per_prompt: 2,
            reset_period: Some(6),
            temperature_init: 0.1,
            temperature_period: 100,
            score_decimals: 2,
        })
        .with_options(options)
        .with_profiler(profiler.clone())
        .build()
        .unwrap();

    let report = controller.run().unwrap();

    assert_eq!(report.evaluations, 12);
    assert_eq!(report.best_score(), Some(9.0));
    assert!(profiler
        .samples()
        .iter()
        .all(|sample| sample.operator == Operator::Continue));
    assert_eq!(profiler.report().map(|r| r.samples), Some(12));
}
