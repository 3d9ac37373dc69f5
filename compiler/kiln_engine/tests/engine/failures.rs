use std::fs;

use kiln_engine::{BuildError, CancelToken, Capability};
use pretty_assertions::assert_eq;

use crate::sandbox::Sandbox;

#[test]
fn compile_failures_are_aggregated() {
    let sb = Sandbox::new(&["a.cpp", "b.cpp", "c.cpp"]);
    sb.fake.fail_source(sb.lib("a.cpp"));
    sb.fake.fail_source(sb.lib("c.cpp"));

    match sb.run().unwrap_err() {
        BuildError::CompileFailed { failures } => {
            let mut failed: Vec<String> = failures.iter().map(|f| f.unit.name()).collect();
            failed.sort();
            assert_eq!(failed, vec!["a.cpp", "c.cpp"]);
            for failure in &failures {
                assert!(failure.error.to_string().contains("injected failure"));
            }
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The sibling finished; nothing downstream ran.
    assert!(sb.unit("b.cpp").object.exists());
    assert!(!sb.unit("a.cpp").object.exists());
    assert!(!sb.config.layout.archive().exists());
    assert!(!sb.config.layout.output_artifact().exists());
    assert_eq!(sb.fake.count(Capability::PartialLink), 0);
}

#[test]
fn fixed_failure_builds_on_next_run() {
    let sb = Sandbox::new(&["a.cpp", "b.cpp"]);
    sb.fake.fail_source(sb.lib("a.cpp"));
    assert!(sb.run().is_err());

    sb.fake.clear_failures();
    let report = sb.run().unwrap();
    assert!(report.library.compiled.iter().any(|u| u.name() == "a.cpp"));
    assert!(report.linked());
    assert!(sb.config.layout.output_artifact().exists());
}

#[test]
fn failed_sketch_keeps_library_archive() {
    let sb = Sandbox::new(&["a.cpp"]);
    sb.fake.fail_source(sb.sketch_source());

    let err = sb.run().unwrap_err();
    assert!(matches!(err, BuildError::CompileFailed { .. }));
    assert!(sb.config.layout.archive().exists());
    assert_eq!(sb.fake.count(Capability::Link), 0);
}

#[test]
fn missing_link_output_is_contract_violation() {
    let sb = Sandbox::new(&["a.cpp"]);
    sb.fake.omit_output(Capability::Link);

    let err = sb.run().unwrap_err();
    assert!(matches!(
        err,
        BuildError::ToolContract {
            capability: Capability::Link,
            ..
        }
    ));
    assert!(!sb.config.layout.link_metadata().exists());
}

#[test]
fn missing_object_after_success_is_contract_violation() {
    let sb = Sandbox::new(&["a.cpp"]);
    sb.fake.omit_output(Capability::CompileUnit);

    match sb.run().unwrap_err() {
        BuildError::CompileFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0].error, BuildError::ToolContract { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn cancellation_mid_compile_stops_the_build() {
    let sb = Sandbox::new(&["a.cpp", "b.cpp", "c.cpp"]);
    let token = CancelToken::new();
    sb.fake.cancel_on(sb.lib("b.cpp"), token.clone());

    let err = sb.run_with_cancel(token).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!sb.config.layout.archive().exists());
    assert_eq!(sb.fake.count(Capability::Link), 0);
}

#[test]
fn cancellation_wins_over_failures() {
    let sb = Sandbox::new(&["a.cpp", "b.cpp"]);
    let token = CancelToken::new();
    sb.fake.fail_source(sb.lib("a.cpp"));
    sb.fake.cancel_on(sb.lib("b.cpp"), token.clone());

    assert!(sb.run_with_cancel(token).unwrap_err().is_cancelled());
}

#[test]
fn cancelled_before_start_runs_nothing() {
    let sb = Sandbox::new(&["a.cpp"]).with_pch();
    let token = CancelToken::new();
    token.cancel();

    assert!(sb.run_with_cancel(token).unwrap_err().is_cancelled());
    assert!(sb.fake.invocations().is_empty());
}

#[test]
fn empty_library_is_missing_input() {
    let sb = Sandbox::new(&[]);
    let err = sb.run().unwrap_err();
    assert!(matches!(err, BuildError::MissingInput { .. }));
}

#[test]
fn missing_sketch_dir_is_missing_input() {
    let sb = Sandbox::new(&["a.cpp"]);
    fs::remove_dir_all(&sb.config.sketch_dir).unwrap();
    let err = sb.run().unwrap_err();
    assert!(matches!(err, BuildError::MissingInput { .. }));
}

#[test]
fn missing_pch_header_is_missing_input() {
    let sb = Sandbox::new(&["a.cpp"]).with_pch();
    fs::remove_file(sb.pch_header()).unwrap();
    let err = sb.run().unwrap_err();
    assert!(matches!(err, BuildError::MissingInput { .. }));
    assert_eq!(sb.fake.count(Capability::CompileHeader), 0);
}

#[test]
fn failed_run_after_flag_change_does_not_trust_old_metadata() {
    let mut sb = Sandbox::new(&["a.cpp", "b.cpp"]);
    sb.settle();

    sb.flags.flags.defines.push("NEW_FEATURE".to_string());
    sb.fake.fail_source(sb.lib("b.cpp"));
    assert!(sb.run().is_err());
    assert!(!sb.config.layout.library_metadata().exists());

    sb.fake.clear_failures();
    sb.flags.flags.defines.pop();
    let report = sb.run().unwrap();
    assert_eq!(report.library.compiled.len(), 2);
}
