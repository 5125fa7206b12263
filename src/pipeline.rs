//! Pipeline Assembler - the three workflows
//!
//! CRITICAL: lens correction always runs before stabilization, and every
//! step lists as inputs exactly the files it must wait for. Ninja derives the
//! execution order from those edges and nothing else.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::GraphConfig;
use crate::graph::{BuildStep, GraphBuilder, GraphError, GraphSummary, OpenMode};
use crate::paths::{PathDeriver, PathError, Workflow};
use crate::rules::{RuleKind, RuleRegistry, FFMPEG_VAR};
use crate::sweep::{self, CoefficientSweep};
use crate::templates::TemplateError;

const PRE_ARGS: &str = "pre_args";

/// Rules every session declares up front.
const VIDEO_RULES: [RuleKind; 3] = [RuleKind::LensCorrect, RuleKind::StabPass1, RuleKind::StabPass2];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid input: {0}")]
    Path(#[from] PathError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule not registered: {0}")]
    UnknownRule(RuleKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub input: PathBuf,
    #[serde(default)]
    pub pre_args: Option<String>,
    pub workflow: Workflow,
}

/// Create the intermediate, stab-data and output directories. Idempotent.
pub fn prepare_dirs(config: &GraphConfig) -> Result<(), PipelineError> {
    for dir in config.output_dirs() {
        create_dir(dir)?;
    }
    Ok(())
}

fn create_dir(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|source| PipelineError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

// Blank pre-args are the same as none.
fn non_blank(pre_args: Option<&str>) -> Option<&str> {
    pre_args.filter(|a| !a.trim().is_empty())
}

/// Assembles workflow steps into a graph owned by the caller.
pub struct Pipeline<'g> {
    config: &'g GraphConfig,
    registry: RuleRegistry,
    graph: &'g mut GraphBuilder,
}

impl<'g> Pipeline<'g> {
    /// Declare the ffmpeg prefix and the video rules `graph` does not have yet.
    /// The sweep rule is declared by the first sweep.
    pub fn attach(config: &'g GraphConfig, graph: &'g mut GraphBuilder) -> Result<Self, PipelineError> {
        let registry = RuleRegistry::standard()?;

        if !graph.has_variable(FFMPEG_VAR) {
            graph.declare_variable(FFMPEG_VAR, &config.ffmpeg)?;
        }
        let mut pipeline = Self { config, registry, graph };
        for kind in VIDEO_RULES {
            pipeline.ensure_rule(kind)?;
        }
        Ok(pipeline)
    }

    fn ensure_rule(&mut self, kind: RuleKind) -> Result<(), PipelineError> {
        if self.graph.has_rule(kind.name()) {
            return Ok(());
        }
        let rule = self.registry.get(kind).ok_or(PipelineError::UnknownRule(kind))?;
        self.graph.declare_rule(rule)?;
        Ok(())
    }

    /// One graph session: directories are created, the graph file is opened,
    /// `f` runs, and the file is closed whatever `f` returns.
    pub fn run<T, F>(config: &GraphConfig, mode: OpenMode, f: F) -> Result<(T, GraphSummary), PipelineError>
    where
        F: FnOnce(&mut Pipeline<'_>) -> Result<T, PipelineError>,
    {
        prepare_dirs(config)?;
        info!(graph = %config.graph_file.display(), ?mode, "Starting graph session");
        GraphBuilder::scoped(&config.graph_file, mode, config.on_collision, |graph| {
            let mut pipeline = Pipeline::attach(config, graph)?;
            f(&mut pipeline)
        })
    }

    fn deriver(&self) -> PathDeriver<'g> {
        PathDeriver::new(self.config)
    }

    // All or nothing: a workflow is never left half-written.
    fn append(&mut self, steps: Vec<BuildStep>) -> Result<Vec<BuildStep>, PipelineError> {
        self.graph.add_steps(steps.clone())?;
        Ok(steps)
    }

    /// input -> out/<stem>.d.mov
    pub fn lens_correct_only(
        &mut self,
        input: &Path,
        pre_args: Option<&str>,
    ) -> Result<Vec<BuildStep>, PipelineError> {
        let output = self.deriver().lens_correct_only(input)?;
        debug!(input = %input.display(), output = %output.display(), "Lens correct");

        let step = BuildStep::new(RuleKind::LensCorrect)
            .input(input)
            .output(output)
            .var_opt(PRE_ARGS, non_blank(pre_args));
        self.append(vec![step])
    }

    /// input -> stab/<stem>.trf, {input, trf} -> out/<stem>.s.mov
    pub fn stabilize_only(
        &mut self,
        input: &Path,
        pre_args: Option<&str>,
    ) -> Result<Vec<BuildStep>, PipelineError> {
        let paths = self.deriver().stabilize_only(input)?;
        let pre_args = non_blank(pre_args);
        debug!(input = %input.display(), output = %paths.output.display(), "Stabilize");

        let detect = BuildStep::new(RuleKind::StabPass1)
            .input(input)
            .output(&paths.trf)
            .var_opt(PRE_ARGS, pre_args);
        let transform = BuildStep::new(RuleKind::StabPass2)
            .input(input)
            .input(&paths.trf)
            .output(&paths.output)
            .var_opt(PRE_ARGS, pre_args)
            .var("infile", input.display().to_string())
            .var("in_stab", paths.trf.display().to_string());
        self.append(vec![detect, transform])
    }

    /// input -> intermediate/<stem>.d.mov -> stab/<stem>.d.trf -> out/<stem>.ds.mov
    ///
    /// Pre-args only apply to the lens correction: the intermediate file is
    /// already cut as required.
    pub fn lens_correct_and_stabilize(
        &mut self,
        input: &Path,
        pre_args: Option<&str>,
    ) -> Result<Vec<BuildStep>, PipelineError> {
        let paths = self.deriver().lens_correct_and_stabilize(input)?;
        debug!(input = %input.display(), output = %paths.output.display(), "Lens correct and stabilize");

        let correct = BuildStep::new(RuleKind::LensCorrect)
            .input(input)
            .output(&paths.intermediate)
            .var_opt(PRE_ARGS, non_blank(pre_args));
        let detect = BuildStep::new(RuleKind::StabPass1)
            .input(&paths.intermediate)
            .output(&paths.trf);
        let transform = BuildStep::new(RuleKind::StabPass2)
            .input(&paths.intermediate)
            .input(&paths.trf)
            .output(&paths.output)
            .var("infile", paths.intermediate.display().to_string())
            .var("in_stab", paths.trf.display().to_string());
        self.append(vec![correct, detect, transform])
    }

    pub fn submit(&mut self, request: &PipelineRequest) -> Result<Vec<BuildStep>, PipelineError> {
        let pre_args = request.pre_args.as_deref();
        match request.workflow {
            Workflow::LensCorrectOnly => self.lens_correct_only(&request.input, pre_args),
            Workflow::StabilizeOnly => self.stabilize_only(&request.input, pre_args),
            Workflow::LensCorrectAndStabilize => self.lens_correct_and_stabilize(&request.input, pre_args),
        }
    }

    /// One still per (k1, k2) pair under the sweep directory.
    pub fn lens_sweep(
        &mut self,
        input: &Path,
        sweep: &CoefficientSweep,
    ) -> Result<Vec<BuildStep>, PipelineError> {
        create_dir(&self.config.sweep_dir)?;
        self.ensure_rule(RuleKind::LensSweep)?;

        let mut steps = vec![];
        for (k1, k2) in sweep.pairs() {
            let output = sweep::output_path(input, &self.config.sweep_dir, &k1, &k2)?;
            steps.push(
                BuildStep::new(RuleKind::LensSweep)
                    .input(input)
                    .output(output)
                    .var("k1", k1)
                    .var("k2", k2),
            );
        }
        info!(input = %input.display(), steps = steps.len(), "Lens coefficient sweep");
        self.append(steps)
    }

    /// The shell command a step will run.
    pub fn render_command(&self, step: &BuildStep) -> Result<String, PipelineError> {
        let rule = self
            .registry
            .get(step.rule)
            .ok_or(PipelineError::UnknownRule(step.rule))?;
        Ok(step.render_command(rule, self.graph.globals())?)
    }
}
