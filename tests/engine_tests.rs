// Integration tests for the diagnostic engine façade

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tune::config::{
    BuildConfiguration, BuildMode, CodegenStrategy, EngineConfig, GcConfig, Platform,
    RecorderConfig,
};
use tune::log::{LogKind, MemorySink, NullSink};
use tune::{CancellationToken, CompiledArtifact, DiagnosticEngine, EngineError};

const ALLOCATING_LOOP: &str = r#"
    while (true) {
        var a = array(16);
    }
"#;

fn engine(config: EngineConfig) -> DiagnosticEngine {
    DiagnosticEngine::new(config, Arc::new(NullSink)).expect("valid config")
}

fn compile(source: &str) -> CompiledArtifact {
    engine(EngineConfig::default())
        .compile(source, BuildMode::Debug, Platform::AnyCpu)
        .expect("compiles")
}

fn wait_until_running(artifact: &CompiledArtifact) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !artifact.is_running() {
        assert!(Instant::now() < deadline, "run never started");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_trivial_script_runs() {
    let artifact = compile("return 1;");
    assert_eq!(artifact.execute("").unwrap(), true);
    assert!(artifact.dump_il().contains("ret"));
    assert_eq!(artifact.results().report.return_value.as_deref(), Some("1"));
}

#[test]
fn test_gen0_grows_until_first_collection() {
    let config = EngineConfig::default()
        .with_gc(GcConfig {
            gen0_budget: 16 * 1024,
            ..GcConfig::default()
        })
        .with_recorder(RecorderConfig {
            sample_interval: Duration::ZERO,
            ..RecorderConfig::default()
        });
    let artifact = engine(config)
        .compile(
            "for (var i = 0; i < 5000; i++) { var a = array(16); } return 0;",
            BuildMode::Debug,
            Platform::X64,
        )
        .unwrap();
    assert!(artifact.execute("").unwrap());

    let results = artifact.results();
    let timeline = &results.timeline;
    let first_gc = timeline.events.first().expect("at least one collection").timestamp;
    let before: Vec<u64> = timeline
        .generation(0)
        .iter()
        .filter(|p| p.timestamp < first_gc)
        .map(|p| p.value)
        .collect();

    assert!(!before.is_empty());
    assert!(before.windows(2).all(|w| w[0] < w[1]), "{before:?}");
}

#[test]
fn test_cancel_from_another_thread() {
    let artifact = compile(ALLOCATING_LOOP);
    let token = CancellationToken::new();

    let outcome = thread::scope(|scope| {
        let run = scope.spawn(|| artifact.execute_with("", &token));
        thread::sleep(Duration::from_millis(50));
        token.cancel();
        run.join().expect("run thread")
    });

    assert!(matches!(outcome, Err(EngineError::CancellationRequested)));
    assert!(artifact.results().report.cancelled);
    assert!(!artifact.is_running());
}

#[test]
fn test_artifact_cancel_stops_current_run() {
    let artifact = compile(ALLOCATING_LOOP);

    let outcome = thread::scope(|scope| {
        let run = scope.spawn(|| artifact.execute(""));
        wait_until_running(&artifact);
        artifact.cancel();
        run.join().expect("run thread")
    });

    assert!(outcome.unwrap_err().is_cancellation());
}

#[test]
fn test_unbalanced_braces_fail_to_compile() {
    let err = engine(EngineConfig::default())
        .compile("func f() {\n  return 1;\n", BuildMode::Debug, Platform::AnyCpu)
        .unwrap_err();
    assert!(err.error_count() >= 1);
    assert!(err.diagnostics.iter().all(|d| d.line >= 1));
}

#[test]
fn test_dump_asm_waits_for_a_run_under_deferred_codegen() {
    let artifact = compile("func f() { return 2; } return f();");
    assert!(artifact.dump_asm().is_err());

    artifact.execute("").unwrap();
    let asm = artifact.dump_asm().unwrap();
    assert!(asm.contains("f:"));
    assert!(asm.contains("main:"));
}

#[test]
fn test_dump_asm_available_ahead_of_time() {
    let artifact = engine(EngineConfig::default().with_codegen(CodegenStrategy::AheadOfTime))
        .compile("return 0;", BuildMode::Release, Platform::X86)
        .unwrap();
    assert!(artifact.dump_asm().unwrap().contains("x86"));
}

#[test]
fn test_second_run_replaces_results() {
    let source = r#"
        print("once");
        for (var i = 0; i < 200; i++) { var a = array(16); }
        collect(0);
        return 1;
    "#;
    let config = EngineConfig::default().with_recorder(RecorderConfig {
        sample_interval: Duration::ZERO,
        ..RecorderConfig::default()
    });
    let engine = engine(config);
    let artifact = engine.compile(source, BuildMode::Debug, Platform::X64).unwrap();
    artifact.execute("").unwrap();
    let first = artifact.results();
    artifact.execute("").unwrap();
    let second = artifact.results();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.report.output, vec!["once".to_string()]);
    assert!(second.report.started >= first.report.ended);

    // Nothing from the first run leaks into the second
    let fresh = engine.compile(source, BuildMode::Debug, Platform::X64).unwrap();
    fresh.execute("").unwrap();
    let baseline = fresh.results();
    for generation in 0..3 {
        assert_eq!(
            second.timeline.generation(generation).len(),
            baseline.timeline.generation(generation).len(),
            "generation {generation}"
        );
    }
    assert!(!second.timeline.events.is_empty());
    assert_eq!(second.timeline.events.len(), baseline.timeline.events.len());

    for point in second.timeline.generations.iter().flatten() {
        assert!(point.timestamp >= second.report.started);
    }
    for event in &second.timeline.events {
        assert!(event.timestamp >= second.report.started);
    }
}

#[test]
fn test_samples_are_sorted_and_within_run() {
    let config = EngineConfig::default().with_gc(GcConfig {
        gen0_budget: 8 * 1024,
        ..GcConfig::default()
    });
    let artifact = engine(config)
        .compile(
            "var keep = array(64); for (var i = 0; i < 3000; i++) { keep[i % 64] = str(i); } return 0;",
            BuildMode::Release,
            Platform::AnyCpu,
        )
        .unwrap();
    artifact.execute("").unwrap();

    let results = artifact.results();
    let report = &results.report;
    for sequence in &results.timeline.generations {
        assert!(sequence.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        for point in sequence {
            assert!(point.timestamp >= report.started && point.timestamp <= report.ended);
        }
    }
    assert!(results
        .timeline
        .events
        .windows(2)
        .all(|w| w[0].ordinal < w[1].ordinal));
}

#[test]
fn test_fault_keeps_partial_data() {
    let artifact = compile("var a = array(10);\nvar b = array(10);\nreturn a[20];");
    assert_eq!(artifact.execute("").unwrap(), false);

    let results = artifact.results();
    let fault = results.report.fault.as_ref().expect("fault recorded");
    assert_eq!(fault.line, Some(3));
    assert!(!results.timeline.generation(0).is_empty());
}

#[test]
fn test_concurrent_execute_is_rejected() {
    let artifact = compile(ALLOCATING_LOOP);

    thread::scope(|scope| {
        let run = scope.spawn(|| artifact.execute(""));
        wait_until_running(&artifact);
        assert!(matches!(artifact.execute(""), Err(EngineError::RunInProgress)));
        artifact.cancel();
        let _ = run.join();
    });
}

#[test]
fn test_run_notifications_are_ordered() {
    let sink = Arc::new(MemorySink::new());
    let engine = DiagnosticEngine::new(EngineConfig::default(), sink.clone()).unwrap();
    let artifact = engine
        .compile("print(\"a\"); print(\"b\"); return 0;", BuildMode::Debug, Platform::X64)
        .unwrap();
    sink.clear();

    artifact.execute("").unwrap();
    assert_eq!(
        sink.kinds(),
        vec![
            LogKind::RunStarted,
            LogKind::Output,
            LogKind::Output,
            LogKind::RunEnded
        ]
    );
}

#[test]
fn test_argument_reaches_script() {
    let diagnostics = engine(EngineConfig::default())
        .run(
            "return len(arg);",
            "hello",
            BuildConfiguration::new(BuildMode::Debug, Platform::X64),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(diagnostics.results.report.return_value.as_deref(), Some("5"));
}

#[test]
fn test_deep_nesting_is_a_compile_error() {
    let engine = engine(EngineConfig::default());
    let sources = [
        format!("return {}1{};", "(".repeat(100_000), ")".repeat(100_000)),
        format!("{}{}", "{".repeat(100_000), "}".repeat(100_000)),
        format!("return {}1;", "-".repeat(100_000)),
        format!("return {}1;", "1 + ".repeat(100_000)),
    ];
    for source in &sources {
        let err = engine
            .compile(source, BuildMode::Release, Platform::AnyCpu)
            .unwrap_err();
        assert!(err
            .diagnostics
            .iter()
            .any(|d| d.message.contains("Nesting too deep")));
    }
}

#[test]
fn test_last_sample_matches_final_heap() {
    // Coalescing keeps only the first allocation sample inside the window
    let config = EngineConfig::default().with_recorder(RecorderConfig {
        sample_interval: Duration::from_secs(60),
        ..RecorderConfig::default()
    });
    let artifact = engine(config)
        .compile(
            "var a = array(10);\nvar b = array(10);\nvar c = array(10);\nreturn heap_size(0);",
            BuildMode::Debug,
            Platform::X64,
        )
        .unwrap();
    artifact.execute("").unwrap();

    let results = artifact.results();
    let returned: u64 = results.report.return_value.as_deref().unwrap().parse().unwrap();
    let gen0 = results.timeline.generation(0);
    assert_eq!(gen0.last().map(|p| p.value), Some(returned));
    assert!(gen0.iter().all(|p| p.timestamp <= results.report.ended));
}

#[test]
fn test_unbounded_time_budget_runs() {
    let artifact = engine(EngineConfig::default().with_time_budget(Duration::MAX))
        .compile("return 1;", BuildMode::Debug, Platform::AnyCpu)
        .unwrap();
    assert!(artifact.execute("").unwrap());
}
