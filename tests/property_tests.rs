// Property tests for the compiler and runtime

use std::sync::Arc;

use proptest::prelude::*;
use tune::compiler::compile;
use tune::config::{BuildConfiguration, BuildMode, EngineConfig, Platform};
use tune::log::NullSink;
use tune::DiagnosticEngine;

fn build(mode: BuildMode) -> BuildConfiguration {
    BuildConfiguration::new(mode, Platform::X64)
}

/// Arithmetic over small literals and one variable; never divides
fn arith_expr() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (-50i64..50).prop_map(|n| format!("({n})")),
        Just("x".to_string()),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        (inner.clone(), prop_oneof![Just("+"), Just("-"), Just("*")], inner)
            .prop_map(|(l, op, r)| format!("({l} {op} {r})"))
    })
}

fn run_returning(source: &str, mode: BuildMode) -> Option<String> {
    let engine = DiagnosticEngine::new(EngineConfig::default(), Arc::new(NullSink)).ok()?;
    let artifact = engine.compile(source, mode, Platform::X64).ok()?;
    artifact.execute("").ok()?;
    artifact.results().report.return_value.clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_il_is_deterministic(expr in arith_expr(), mode in prop_oneof![Just(BuildMode::Debug), Just(BuildMode::Release)]) {
        let source = format!("var x = 3;\nreturn {expr};");
        let first = compile(&source, build(mode)).unwrap().to_string();
        let second = compile(&source, build(mode)).unwrap().to_string();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_release_agrees_with_debug(expr in arith_expr()) {
        let source = format!("var x = 7;\nreturn {expr};");
        prop_assert_eq!(
            run_returning(&source, BuildMode::Debug),
            run_returning(&source, BuildMode::Release)
        );
    }

    #[test]
    fn prop_arbitrary_input_never_panics(source in "\\PC{0,80}") {
        let _ = compile(&source, build(BuildMode::Debug));
        let _ = compile(&source, build(BuildMode::Release));
    }

    #[test]
    fn prop_unclosed_block_never_compiles(body in "[a-z0-9 ;=+]{0,20}") {
        let source = format!("while (true) {{ {body}");
        prop_assert!(compile(&source, build(BuildMode::Debug)).is_err());
    }

    #[test]
    fn prop_undefined_name_is_reported(name in "[a-z]{3,8}_undef") {
        let source = format!("return {name};");
        let err = compile(&source, build(BuildMode::Release)).unwrap_err();
        prop_assert!(err.diagnostics.iter().any(|d| d.message.contains(&name)));
    }
}
