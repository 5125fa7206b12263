//! Graph Builder - persisted ninja build graph
//!
//! CRITICAL: a step may only reference a rule already declared in the file,
//! and every required placeholder of that rule must be bound by the step,
//! a global variable, or ninja itself (`$in`, `$out`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CollisionPolicy;
use crate::ninja::{self, Writer};
use crate::rules::{Rule, RuleKind};
use crate::templates::TemplateError;
use crate::ENGINE_VERSION;

const BUILTIN_VARS: [&str; 2] = ["in", "out"];

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Rule already declared: {0}")]
    DuplicateRule(String),

    #[error("Variable already declared: {0}")]
    DuplicateVariable(String),

    #[error("Rule not declared: {0}")]
    UnknownRule(String),

    #[error("Build step for rule {0} has no outputs")]
    EmptyOutputs(String),

    #[error("Output already declared: {}", .0.display())]
    DuplicateOutput(PathBuf),

    #[error("Variable {0} contains a newline")]
    MultilineValue(String),

    #[error("Path contains a newline: {:?}", .0)]
    InvalidPath(PathBuf),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Start a fresh graph, discarding any previous content.
    Truncate,
    /// Keep the existing graph and add to it.
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStep {
    pub rule: RuleKind,
    pub outputs: Vec<PathBuf>,
    pub inputs: Vec<PathBuf>,
    pub variables: BTreeMap<String, String>,
}

impl BuildStep {
    pub fn new(rule: RuleKind) -> Self {
        Self {
            rule,
            outputs: vec![],
            inputs: vec![],
            variables: BTreeMap::new(),
        }
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    /// Bind `key` only when a value is given; unbound variables expand empty.
    pub fn var_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.var(key, value),
            None => self,
        }
    }

    /// The shell command ninja will run for this step.
    pub fn render_command(
        &self,
        rule: &Rule,
        globals: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        let mut vars: HashMap<String, String> = globals.clone().into_iter().collect();
        vars.insert("in".to_string(), join_paths(&self.inputs));
        vars.insert("out".to_string(), join_paths(&self.outputs));
        vars.extend(self.variables.clone());
        rule.command.render(&vars)
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn path_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub path: PathBuf,
    pub rules: Vec<String>,
    pub steps: usize,
    pub closed_at: DateTime<Utc>,
}

fn has_line_break(text: &str) -> bool {
    text.contains('\n') || text.contains('\r')
}

/// Owns the graph file for one session.
pub struct GraphBuilder {
    path: PathBuf,
    writer: Writer<BufWriter<File>>,
    policy: CollisionPolicy,
    rules: HashMap<String, Rule>,
    /// Rules declared by an earlier session in append mode, template unknown.
    inherited_rules: BTreeSet<String>,
    globals: BTreeMap<String, String>,
    outputs: BTreeSet<PathBuf>,
    steps: Vec<BuildStep>,
}

impl GraphBuilder {
    pub fn open(path: &Path, mode: OpenMode, policy: CollisionPolicy) -> Result<Self, GraphError> {
        let write_err = |source: io::Error| GraphError::Write { path: path.to_path_buf(), source };

        let existing = match mode {
            OpenMode::Truncate => ninja::Declarations::default(),
            OpenMode::Append => match fs::read_to_string(path) {
                Ok(text) => ninja::scan(&text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => ninja::Declarations::default(),
                Err(e) => return Err(write_err(e)),
            },
        };

        let file = match mode {
            OpenMode::Truncate => File::create(path),
            OpenMode::Append => OpenOptions::new().create(true).append(true).open(path),
        }
        .map_err(write_err)?;

        info!(
            path = %path.display(),
            ?mode,
            inherited_rules = existing.rules.len(),
            inherited_outputs = existing.outputs.len(),
            "Opened build graph"
        );

        let mut builder = Self {
            path: path.to_path_buf(),
            writer: Writer::new(BufWriter::new(file)),
            policy,
            rules: HashMap::new(),
            inherited_rules: existing.rules,
            globals: existing.variables,
            outputs: existing.outputs.into_iter().map(PathBuf::from).collect(),
            steps: vec![],
        };

        let header = format!("Generated by defishy {}", ENGINE_VERSION);
        builder.io(|w| w.comment(&header))?;
        Ok(builder)
    }

    /// Run `f` against a freshly opened builder; the file is flushed and
    /// closed whether `f` succeeds or fails. Failures are logged before the
    /// handle is released, then returned.
    pub fn scoped<T, E, F>(
        path: &Path,
        mode: OpenMode,
        policy: CollisionPolicy,
        f: F,
    ) -> Result<(T, GraphSummary), E>
    where
        F: FnOnce(&mut GraphBuilder) -> Result<T, E>,
        E: From<GraphError> + std::fmt::Display,
    {
        let mut builder = Self::open(path, mode, policy)?;
        match f(&mut builder) {
            Ok(value) => {
                let summary = builder.close()?;
                Ok((value, summary))
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Graph construction aborted");
                if let Err(close_err) = builder.close() {
                    error!(error = %close_err, "Failed to close build graph");
                }
                Err(e)
            }
        }
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name) || self.inherited_rules.contains(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    pub fn globals(&self) -> &BTreeMap<String, String> {
        &self.globals
    }

    /// Steps appended during this session.
    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    pub fn declare_variable(&mut self, name: &str, value: &str) -> Result<(), GraphError> {
        if self.has_variable(name) {
            return Err(GraphError::DuplicateVariable(name.to_string()));
        }
        if has_line_break(value) {
            return Err(GraphError::MultilineValue(name.to_string()));
        }
        self.io(|w| w.variable(name, &ninja::escape(value), 0))?;
        self.globals.insert(name.to_string(), value.to_string());
        debug!(name, value, "Declared variable");
        Ok(())
    }

    pub fn declare_rule(&mut self, rule: &Rule) -> Result<(), GraphError> {
        let name = rule.name();
        if self.has_rule(name) {
            return Err(GraphError::DuplicateRule(name.to_string()));
        }
        self.io(|w| {
            w.newline()?;
            w.rule(name, rule.command.text(), Some(rule.description.as_str()))
        })?;
        self.rules.insert(name.to_string(), rule.clone());
        debug!(rule = name, "Declared rule");
        Ok(())
    }

    pub fn add_step(&mut self, step: BuildStep) -> Result<(), GraphError> {
        self.add_steps(vec![step])
    }

    /// Append a group of steps. Every step is validated, collisions included,
    /// before the first one is written: a rejected group leaves no trace.
    pub fn add_steps(&mut self, steps: Vec<BuildStep>) -> Result<(), GraphError> {
        let mut pending = BTreeSet::new();
        for step in &steps {
            self.validate(step)?;
            for output in &step.outputs {
                if self.outputs.contains(output) || !pending.insert(output) {
                    self.collision(output, step.rule.name())?;
                }
            }
        }

        for step in steps {
            self.write_step(step)?;
        }
        Ok(())
    }

    fn validate(&self, step: &BuildStep) -> Result<(), GraphError> {
        let name = step.rule.name();
        if step.outputs.is_empty() {
            return Err(GraphError::EmptyOutputs(name.to_string()));
        }
        if !self.has_rule(name) {
            return Err(GraphError::UnknownRule(name.to_string()));
        }
        // Inherited rules were validated by the session that declared them.
        if let Some(rule) = self.rules.get(name) {
            rule.command.check(|p| {
                BUILTIN_VARS.iter().any(|b| *b == p)
                    || step.variables.contains_key(p)
                    || self.has_variable(p)
            })?;
        }
        if let Some((key, _)) = step.variables.iter().find(|(_, v)| has_line_break(v)) {
            return Err(GraphError::MultilineValue(key.clone()));
        }
        // A line break would split the build line.
        if let Some(path) = step
            .outputs
            .iter()
            .chain(&step.inputs)
            .find(|p| has_line_break(&p.to_string_lossy()))
        {
            return Err(GraphError::InvalidPath(path.clone()));
        }
        Ok(())
    }

    fn collision(&self, output: &Path, rule: &str) -> Result<(), GraphError> {
        match self.policy {
            CollisionPolicy::Allow => Ok(()),
            CollisionPolicy::Warn => {
                warn!(output = %output.display(), rule, "Output declared twice");
                Ok(())
            }
            CollisionPolicy::Reject => Err(GraphError::DuplicateOutput(output.to_path_buf())),
        }
    }

    fn write_step(&mut self, step: BuildStep) -> Result<(), GraphError> {
        let name = step.rule.name();
        let outputs = path_strings(&step.outputs);
        let inputs = path_strings(&step.inputs);
        self.io(|w| {
            w.build(
                &outputs,
                name,
                &inputs,
                step.variables.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            )
        })?;

        debug!(rule = name, outputs = ?outputs, inputs = ?inputs, "Added build step");
        self.outputs.extend(step.outputs.iter().cloned());
        self.steps.push(step);
        Ok(())
    }

    /// Render the command of a step appended in this session.
    pub fn render_command(&self, step: &BuildStep) -> Result<String, GraphError> {
        let rule = self
            .rules
            .get(step.rule.name())
            .ok_or_else(|| GraphError::UnknownRule(step.rule.name().to_string()))?;
        Ok(step.render_command(rule, &self.globals)?)
    }

    pub fn close(mut self) -> Result<GraphSummary, GraphError> {
        self.io(|w| w.flush())?;
        let mut rules: Vec<String> = self.rules.keys().cloned().collect();
        rules.sort();
        let summary = GraphSummary {
            path: self.path.clone(),
            rules,
            steps: self.steps.len(),
            closed_at: Utc::now(),
        };
        info!(path = %self.path.display(), steps = summary.steps, "Closed build graph");
        Ok(summary)
    }

    fn io<F>(&mut self, f: F) -> Result<(), GraphError>
    where
        F: FnOnce(&mut Writer<BufWriter<File>>) -> io::Result<()>,
    {
        f(&mut self.writer).map_err(|source| GraphError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
