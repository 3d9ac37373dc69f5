use std::fs;

use kiln_engine::{
    clean, wasm_companion, Capability, LinkReason, MergeReason, PchRebuildReason, Stage,
};
use pretty_assertions::assert_eq;

use crate::sandbox::{names, Sandbox};

fn three() -> Sandbox {
    Sandbox::new(&["a.cpp", "b.cpp", "c.cpp"])
}

#[test]
fn first_build_produces_artifact_pair() {
    let sb = three();
    let report = sb.run().unwrap();

    assert_eq!(names(&report.library.compiled), vec!["a.cpp", "b.cpp", "c.cpp"]);
    assert_eq!(names(&report.sketch.compiled), vec!["sketch.cpp"]);
    assert_eq!(report.compiled_count(), 4);
    assert!(report.archive_rebuilt());
    assert!(report.linked());

    let layout = &sb.config.layout;
    assert!(layout.merged_object().exists());
    assert!(layout.archive().exists());
    assert!(layout.library_metadata().exists());
    assert!(layout.sketch_metadata().exists());
    assert!(layout.link_metadata().exists());
    assert!(layout.output_artifact().exists());
    assert!(wasm_companion(&layout.output_artifact()).exists());
}

#[test]
fn second_run_does_no_work() {
    let sb = three().with_pch();
    sb.settle();

    let report = sb.run().unwrap();
    assert!(report.library.fast_path);
    assert_eq!(report.library.up_to_date.len(), 3);
    assert_eq!(report.compiled_count(), 0);
    assert_eq!(report.up_to_date_count(), 4);
    assert!(!report.pch.as_ref().unwrap().rebuilt());
    assert!(report.archive.is_none());
    assert!(!report.linked());
    assert!(sb.fake.invocations().is_empty());

    let stages: Vec<Stage> = report.timings.iter().map(|t| t.stage).collect();
    assert_eq!(
        stages,
        vec![Stage::Flags, Stage::Pch, Stage::LibraryCompile, Stage::SketchCompile, Stage::Link]
    );
}

#[test]
fn touched_source_rebuilds_only_its_unit() {
    let sb = three();
    sb.settle();

    sb.fake.touch(&sb.lib("b.cpp")).unwrap();
    let report = sb.run().unwrap();
    assert!(!report.library.fast_path);
    assert_eq!(names(&report.library.compiled), vec!["b.cpp"]);
    assert_eq!(report.library.up_to_date.len(), 2);
    assert!(report.sketch.compiled.is_empty());
    assert!(report.archive_rebuilt());
    assert!(report.linked());
    assert_eq!(sb.fake.compiled_sources(), vec![sb.lib("b.cpp")]);
}

#[test]
fn header_change_rebuilds_only_dependents() {
    let sb = three();
    let header = sb.lib("util.h");
    fs::write(&header, "#pragma once\n").unwrap();
    sb.fake.add_dependency(sb.lib("a.cpp"), &header);
    sb.settle();

    sb.fake.touch(&header).unwrap();
    let report = sb.run().unwrap();
    assert_eq!(names(&report.library.compiled), vec!["a.cpp"]);
    assert!(report.archive_rebuilt());
    assert!(report.linked());
}

#[test]
fn deleted_object_rebuilds_that_unit_and_relinks() {
    let sb = three();
    sb.settle();

    fs::remove_file(sb.unit("b.cpp").object).unwrap();
    let report = sb.run().unwrap();
    assert_eq!(names(&report.library.compiled), vec!["b.cpp"]);
    assert_eq!(names(&report.library.up_to_date), vec!["a.cpp", "c.cpp"]);

    let archive = report.archive.as_ref().unwrap();
    assert_eq!(archive.merged, Some(MergeReason::Forced));
    assert!(archive.archived);
    assert_eq!(
        report.link.as_ref().unwrap().reason,
        Some(LinkReason::Forced)
    );
    assert_eq!(sb.fake.count(Capability::PartialLink), 1);
    assert_eq!(sb.fake.count(Capability::Archive), 1);
    assert_eq!(sb.fake.count(Capability::Link), 1);
}

#[test]
fn flag_change_rebuilds_pch_and_every_unit() {
    let mut sb = three().with_pch();
    sb.settle();

    sb.flags.flags.defines.push("DEBUG_LOGGING".to_string());
    let report = sb.run().unwrap();
    assert_eq!(
        report.pch.as_ref().unwrap().reason,
        Some(PchRebuildReason::FlagsChanged)
    );
    assert_eq!(report.library.compiled.len(), 3);
    assert_eq!(report.sketch.compiled.len(), 1);
    assert!(report.linked());
}

#[test]
fn flag_order_does_not_count_as_change() {
    let mut sb = three();
    sb.flags.flags.compiler_flags = vec!["-O2".to_string(), "-fno-exceptions".to_string()];
    sb.settle();

    sb.flags.flags.compiler_flags.reverse();
    let report = sb.run().unwrap();
    assert!(report.library.fast_path);
    assert_eq!(report.compiled_count(), 0);
}

#[test]
fn link_flag_change_only_relinks() {
    let mut sb = three();
    sb.settle();

    sb.flags.flags.link_flags.push("-sALLOW_MEMORY_GROWTH=1".to_string());
    let report = sb.run().unwrap();
    assert!(report.library.fast_path);
    assert_eq!(report.compiled_count(), 0);
    assert_eq!(
        report.link.as_ref().unwrap().reason,
        Some(LinkReason::LinkFlagsChanged)
    );
}

#[test]
fn pch_header_edit_rebuilds_everything_downstream() {
    let sb = three().with_pch();
    sb.settle();

    sb.fake
        .write(&sb.pch_header(), "#pragma once\n#define FEATURE 1\n")
        .unwrap();
    let report = sb.run().unwrap();
    assert_eq!(
        report.pch.as_ref().unwrap().reason,
        Some(PchRebuildReason::HeaderChanged)
    );
    assert!(!report.library.fast_path);
    assert_eq!(report.library.compiled.len(), 3);
    assert_eq!(report.sketch.compiled.len(), 1);
    assert!(report.linked());
}

#[test]
fn compiler_change_rebuilds_pch() {
    let mut sb = three().with_pch();
    sb.settle();

    sb.flags.version = "fake-em++ 2.0".to_string();
    let report = sb.run().unwrap();
    assert!(matches!(
        report.pch.as_ref().unwrap().reason,
        Some(PchRebuildReason::CompilerChanged { .. })
    ));
    assert_eq!(report.compiled_count(), 4);
}

#[test]
fn force_rebuilds_every_stage() {
    let sb = three().with_pch();
    sb.settle();

    let report = sb.run_forced().unwrap();
    assert_eq!(
        report.pch.as_ref().unwrap().reason,
        Some(PchRebuildReason::Forced)
    );
    assert_eq!(report.compiled_count(), 4);
    assert_eq!(
        report.archive.as_ref().unwrap().merged,
        Some(MergeReason::Forced)
    );
    assert_eq!(report.link.as_ref().unwrap().reason, Some(LinkReason::Forced));
}

#[test]
fn sketch_edit_skips_library() {
    let sb = three();
    sb.settle();

    sb.fake.touch(&sb.sketch_source()).unwrap();
    let report = sb.run().unwrap();
    assert!(report.library.fast_path);
    assert!(report.archive.is_none());
    assert_eq!(names(&report.sketch.compiled), vec!["sketch.cpp"]);
    assert!(report.linked());
    assert_eq!(sb.fake.compiled_sources(), vec![sb.sketch_source()]);
}

#[test]
fn added_source_compiles_and_rearchives() {
    let sb = three();
    sb.settle();

    fs::write(sb.lib("d.cpp"), "int d;\n").unwrap();
    let report = sb.run().unwrap();
    assert_eq!(names(&report.library.compiled), vec!["d.cpp"]);
    assert!(report.archive_rebuilt());
    assert!(report.linked());
}

#[test]
fn removed_source_rearchives_without_compiling() {
    let sb = three();
    sb.settle();

    fs::remove_file(sb.lib("c.cpp")).unwrap();
    let report = sb.run().unwrap();
    assert!(!report.library.fast_path);
    assert!(report.library.compiled.is_empty());
    assert_eq!(
        report.archive.as_ref().unwrap().merged,
        Some(MergeReason::Forced)
    );
    assert!(report.linked());

    let rsp = fs::read_to_string(sb.config.layout.response_file()).unwrap();
    assert_eq!(rsp.lines().count(), 2);
}

#[test]
fn deleted_artifact_relinks_only() {
    let sb = three();
    sb.settle();

    fs::remove_file(wasm_companion(&sb.config.layout.output_artifact())).unwrap();
    let report = sb.run().unwrap();
    assert_eq!(report.compiled_count(), 0);
    assert!(matches!(
        report.link.as_ref().unwrap().reason,
        Some(LinkReason::OutputMissing(_))
    ));
}

#[test]
fn clean_then_build_starts_over() {
    let sb = three();
    sb.settle();

    clean(&sb.config.layout).unwrap();
    assert!(!sb.config.layout.build_dir().exists());
    clean(&sb.config.layout).unwrap();

    let report = sb.run().unwrap();
    assert_eq!(report.compiled_count(), 4);
    assert!(report.linked());
}

#[test]
fn deleted_merged_object_is_remerged_before_linking() {
    let sb = three();
    sb.settle();
    let merged = sb.config.layout.merged_object();

    fs::remove_file(&merged).unwrap();
    sb.fake.touch(&sb.sketch_source()).unwrap();
    let report = sb.run().unwrap();

    assert!(!report.library.fast_path);
    assert!(report.library.compiled.is_empty());
    let archive = report.archive.as_ref().unwrap();
    assert_eq!(archive.merged, Some(MergeReason::MergedMissing));
    assert!(archive.archived);
    assert!(merged.exists());
    assert!(report.linked());

    // The merge and archive ran before the link.
    let order: Vec<Capability> = sb.fake.invocations().iter().map(|i| i.capability).collect();
    let link_at = order.iter().position(|c| *c == Capability::Link).unwrap();
    let archive_at = order.iter().position(|c| *c == Capability::Archive).unwrap();
    assert!(archive_at < link_at);
}

#[test]
fn nested_and_underscored_sources_archive_separately() {
    let sb = Sandbox::new(&["a_b.cpp"]);
    fs::create_dir_all(sb.lib("a")).unwrap();
    fs::write(sb.lib("a/b.cpp"), "int nested;\n").unwrap();

    let report = sb.run().unwrap();
    assert_eq!(report.library.compiled.len(), 2);
    assert_ne!(sb.unit("a_b.cpp").object, sb.unit("a/b.cpp").object);

    let rsp = fs::read_to_string(sb.config.layout.response_file()).unwrap();
    let mut members: Vec<&str> = rsp.lines().collect();
    members.sort_unstable();
    members.dedup();
    assert_eq!(members.len(), 2);
}
