use std::fs;

use kiln_engine::CancelToken;
use pretty_assertions::assert_eq;

use crate::sandbox::{names, Sandbox};

fn unity_sandbox() -> (Sandbox, kiln_engine::EngineConfig) {
    let sb = Sandbox::new(&["a.cpp", "b.cpp", "c.cpp"]);
    let config = sb.config.clone().with_unity_chunks(2);
    (sb, config)
}

#[test]
fn unity_build_compiles_chunks_not_sources() {
    let (sb, config) = unity_sandbox();
    let report = sb.run_config(&config, CancelToken::new()).unwrap();

    assert_eq!(names(&report.library.compiled), vec!["unity_0.cpp", "unity_1.cpp"]);
    let unity_dir = config.layout.unity_dir();
    let first = fs::read_to_string(unity_dir.join("unity_0.cpp")).unwrap();
    assert_eq!(first.matches("#include").count(), 2);
    assert!(first.contains("a.cpp"));
    assert!(report.linked());
}

#[test]
fn unity_second_run_takes_fast_path() {
    let (sb, config) = unity_sandbox();
    sb.run_config(&config, CancelToken::new()).unwrap();

    let report = sb.run_config(&config, CancelToken::new()).unwrap();
    assert!(report.library.fast_path);
    assert_eq!(report.compiled_count(), 0);
    assert!(!report.linked());
}

#[test]
fn touched_source_rebuilds_its_chunk() {
    let (sb, config) = unity_sandbox();
    sb.run_config(&config, CancelToken::new()).unwrap();

    sb.fake.touch(&sb.lib("c.cpp")).unwrap();
    let report = sb.run_config(&config, CancelToken::new()).unwrap();
    assert_eq!(names(&report.library.compiled), vec!["unity_1.cpp"]);
    assert!(report.archive_rebuilt());
    assert!(report.linked());
}

#[test]
fn fewer_chunks_removes_stale_files() {
    let (sb, config) = unity_sandbox();
    sb.run_config(&config, CancelToken::new()).unwrap();

    let single = config.clone().with_unity_chunks(1);
    let report = sb.run_config(&single, CancelToken::new()).unwrap();
    assert_eq!(report.library.total(), 1);
    assert!(!config.layout.unity_dir().join("unity_1.cpp").exists());
}
