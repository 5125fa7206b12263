//! Contract Invariant Tests
//!
//! These tests verify the guarantees of the generated build graph.

use std::fs;
use std::path::{Path, PathBuf};

use defishy_core::{
    BuildStep, CollisionPolicy, GraphBuilder, GraphConfig, GraphError, OpenMode, PathDeriver,
    Pipeline, PipelineError, PipelineRequest, RuleKind, Workflow,
    rules,
};

/// Relative directory names, for pure path derivation.
fn create_test_config(base: &Path) -> GraphConfig {
    GraphConfig {
        graph_file: base.join("build.ninja"),
        intermediate_dir: PathBuf::from("intermediate_lenscorrect_dir"),
        stab_dir: PathBuf::from("stab_files_dir"),
        out_dir: PathBuf::from("outdir"),
        ..GraphConfig::default()
    }
}

/// Config with every directory inside `base`, for tests that touch the disk.
fn create_rooted_config(base: &Path) -> GraphConfig {
    GraphConfig {
        intermediate_dir: base.join("intermediate_lenscorrect_dir"),
        stab_dir: base.join("stab_files_dir"),
        out_dir: base.join("outdir"),
        ..GraphConfig::rooted_at(base)
    }
}

fn run<T>(
    config: &GraphConfig,
    f: impl FnOnce(&mut Pipeline<'_>) -> Result<T, PipelineError>,
) -> T {
    Pipeline::run(config, OpenMode::Truncate, f).unwrap().0
}

#[test]
fn invariant_lens_correct_only_single_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    let steps = run(&config, |p| p.lens_correct_only(Path::new("a.mp4"), None));

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].rule, RuleKind::LensCorrect);
    assert_eq!(steps[0].inputs, vec![PathBuf::from("a.mp4")]);
    assert_eq!(steps[0].outputs, vec![config.out_dir.join("a.d.mov")]);
}

#[test]
fn invariant_lens_correct_only_scenario_paths() {
    // Pure derivation, no directory is created.
    let config = create_test_config(Path::new("unused"));
    let output = PathDeriver::new(&config).lens_correct_only(Path::new("a.mp4")).unwrap();
    assert_eq!(output, PathBuf::from("outdir/a.d.mov"));
}

#[test]
fn invariant_stabilize_only_chained() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    let steps = run(&config, |p| p.stabilize_only(Path::new("clip.mp4"), Some("-ss 5")));

    assert_eq!(steps.len(), 2);
    let (detect, transform) = (&steps[0], &steps[1]);
    assert_eq!(detect.rule, RuleKind::StabPass1);
    assert_eq!(transform.rule, RuleKind::StabPass2);
    assert_eq!(detect.outputs, vec![config.stab_dir.join("clip.trf")]);
    assert!(transform.inputs.contains(&detect.outputs[0]));
    assert_eq!(transform.outputs, vec![config.out_dir.join("clip.s.mov")]);

    // Pre-args reach both passes.
    for step in &steps {
        assert_eq!(step.variables.get("pre_args").map(String::as_str), Some("-ss 5"));
    }
}

#[test]
fn invariant_combined_three_step_chain() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    let steps = run(&config, |p| p.lens_correct_and_stabilize(Path::new("clip.mp4"), Some("-t 30")));

    assert_eq!(steps.len(), 3);
    let (correct, detect, transform) = (&steps[0], &steps[1], &steps[2]);
    assert_eq!(correct.rule, RuleKind::LensCorrect);
    assert_eq!(detect.rule, RuleKind::StabPass1);
    assert_eq!(transform.rule, RuleKind::StabPass2);

    assert!(detect.inputs.contains(&correct.outputs[0]));
    assert!(transform.inputs.contains(&detect.outputs[0]));
    assert!(transform.inputs.contains(&correct.outputs[0]));

    // The intermediate file is already cut: only the first step gets pre-args.
    assert!(correct.variables.contains_key("pre_args"));
    assert!(!detect.variables.contains_key("pre_args"));
    assert!(!transform.variables.contains_key("pre_args"));
}

#[test]
fn invariant_combined_paths_deterministic() {
    let config = create_test_config(Path::new("unused"));
    let paths = PathDeriver::new(&config)
        .plan(Path::new("clip01.mp4"), Workflow::LensCorrectAndStabilize)
        .unwrap();

    assert_eq!(paths.intermediate, Some(PathBuf::from("intermediate_lenscorrect_dir/clip01.d.mov")));
    assert_eq!(paths.stab_data, Some(PathBuf::from("stab_files_dir/clip01.d.trf")));
    assert_eq!(paths.output, PathBuf::from("outdir/clip01.ds.mov"));
}

#[test]
fn invariant_identical_requests_not_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());
    let request = PipelineRequest {
        input: PathBuf::from("a.mp4"),
        pre_args: None,
        workflow: Workflow::LensCorrectOnly,
    };

    let (first, second) = run(&config, |p| Ok((p.submit(&request)?, p.submit(&request)?)));

    assert_eq!(first, second);
    let text = fs::read_to_string(&config.graph_file).unwrap();
    let line = format!("build {}: lenscorrect a.mp4", config.out_dir.join("a.d.mov").display());
    assert_eq!(text.matches(&line).count(), 2);
}

#[test]
fn invariant_reject_policy_refuses_collision() {
    let dir = tempfile::tempdir().unwrap();
    let config = GraphConfig {
        on_collision: CollisionPolicy::Reject,
        ..create_rooted_config(dir.path())
    };

    // Same file name from two source directories derives the same output.
    let result = Pipeline::run(&config, OpenMode::Truncate, |p| {
        p.lens_correct_only(Path::new("day1/a.mp4"), None)?;
        p.lens_correct_only(Path::new("day2/a.mp4"), None)
    });

    assert!(matches!(
        result,
        Err(PipelineError::Graph(GraphError::DuplicateOutput(_)))
    ));
}

#[test]
fn invariant_truncate_discards_previous_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    run(&config, |p| p.lens_correct_only(Path::new("first.mp4"), None));
    run(&config, |p| p.lens_correct_only(Path::new("second.mp4"), None));

    let text = fs::read_to_string(&config.graph_file).unwrap();
    assert!(!text.contains("first.mp4"));
    assert!(text.contains("second.mp4"));
    assert_eq!(text.matches("rule lenscorrect").count(), 1);
}

#[test]
fn invariant_append_keeps_previous_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    run(&config, |p| p.lens_correct_only(Path::new("first.mp4"), None));
    Pipeline::run(&config, OpenMode::Append, |p| {
        p.stabilize_only(Path::new("second.mp4"), None)
    })
    .unwrap();

    let text = fs::read_to_string(&config.graph_file).unwrap();
    assert!(text.contains("first.mp4"));
    assert!(text.contains("second.mp4"));
    // Rules and the ffmpeg prefix are not redeclared.
    assert_eq!(text.matches("rule vidstab-pass2").count(), 1);
    assert_eq!(text.matches("FFMPEG = ").count(), 1);
}

#[test]
fn invariant_duplicate_rule_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("build.ninja");
    let mut graph = GraphBuilder::open(&path, OpenMode::Truncate, CollisionPolicy::Warn).unwrap();

    let rule = rules::lens_correct().unwrap();
    graph.declare_rule(&rule).unwrap();
    let err = graph.declare_rule(&rule).unwrap_err();

    assert!(matches!(err, GraphError::DuplicateRule(ref name) if name == "lenscorrect"));
}

#[test]
fn invariant_output_dirs_created_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    run(&config, |_| Ok(()));
    run(&config, |_| Ok(()));

    for d in config.output_dirs() {
        assert!(d.is_dir(), "{} missing", d.display());
    }
}

#[test]
fn invariant_failed_session_reports_and_closes() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    let result = Pipeline::run(&config, OpenMode::Truncate, |p| {
        p.lens_correct_only(Path::new("good.mp4"), None)?;
        p.lens_correct_only(Path::new(".."), None)
    });

    assert!(matches!(result, Err(PipelineError::Path(_))));
    // Work done before the failure is flushed to disk.
    let text = fs::read_to_string(&config.graph_file).unwrap();
    assert!(text.contains("good.mp4"));
}

#[test]
fn invariant_graph_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    run(&config, |p| p.lens_correct_and_stabilize(Path::new("clip01.mp4"), None));

    let text = fs::read_to_string(&config.graph_file).unwrap();
    let ffmpeg = text.find("FFMPEG = ffmpeg -y -threads 0").unwrap();
    let rule = text.find("rule lenscorrect").unwrap();
    let build = text.find("build ").unwrap();
    assert!(ffmpeg < rule && rule < build);

    let pass2 = format!(
        "build {}: vidstab-pass2 {} {}",
        config.out_dir.join("clip01.ds.mov").display(),
        config.intermediate_dir.join("clip01.d.mov").display(),
        config.stab_dir.join("clip01.d.trf").display(),
    );
    assert!(text.contains(&pass2));
}

#[test]
fn invariant_steps_are_plain_records() {
    let step = BuildStep::new(RuleKind::StabPass1).input("a.mp4").output("a.trf");
    let json = serde_json::to_value(&step).unwrap();
    assert_eq!(json["rule"], "stab-pass1");
    assert_eq!(json["outputs"][0], "a.trf");
}

#[test]
fn invariant_video_sessions_declare_three_rules() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    run(&config, |p| p.lens_correct_and_stabilize(Path::new("clip01.mp4"), None));

    let text = fs::read_to_string(&config.graph_file).unwrap();
    let rules: Vec<&str> = text.lines().filter(|l| l.starts_with("rule ")).collect();
    assert_eq!(rules, vec!["rule lenscorrect", "rule vidstab-pass1", "rule vidstab-pass2"]);
}

#[test]
fn invariant_path_with_line_break_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_rooted_config(dir.path());

    let result = Pipeline::run(&config, OpenMode::Truncate, |p| {
        p.lens_correct_only(Path::new("a\nb.mp4"), None)
    });

    assert!(matches!(
        result,
        Err(PipelineError::Graph(GraphError::InvalidPath(_)))
    ));
    let text = fs::read_to_string(&config.graph_file).unwrap();
    assert!(!text.contains("build "));
}

#[test]
fn invariant_write_failure_keeps_cause() {
    let dir = tempfile::tempdir().unwrap();
    let config = GraphConfig {
        graph_file: dir.path().join("missing").join("build.ninja"),
        ..create_rooted_config(dir.path())
    };

    let result = Pipeline::run(&config, OpenMode::Truncate, |_| Ok(()));

    match result {
        Err(PipelineError::Graph(GraphError::Write { path, source })) => {
            assert_eq!(path, config.graph_file);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected a write error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn invariant_rejected_workflow_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = GraphConfig {
        on_collision: CollisionPolicy::Reject,
        ..create_rooted_config(dir.path())
    };

    // Stem "a.d" derives stab/a.d.trf, the stab data of a combined run on a.mp4.
    let result = Pipeline::run(&config, OpenMode::Truncate, |p| {
        p.stabilize_only(Path::new("a.d.mp4"), None)?;
        p.lens_correct_and_stabilize(Path::new("a.mp4"), None)
    });

    assert!(matches!(
        result,
        Err(PipelineError::Graph(GraphError::DuplicateOutput(_)))
    ));
    let text = fs::read_to_string(&config.graph_file).unwrap();
    assert!(text.contains("a.d.s.mov"));
    assert!(!text.contains(&config.intermediate_dir.join("a.d.mov").display().to_string()));
}
