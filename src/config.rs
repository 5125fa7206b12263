//! Graph Configuration
//!
//! Every directory and the ffmpeg prefix live here, passed explicitly to the
//! pipeline. Loaded from JSON; every field has a default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::rules::DEFAULT_FFMPEG;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// What to do when two steps derive the same output path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Append silently; ninja decides at execution time.
    Allow,
    /// Append and log a warning.
    #[default]
    Warn,
    /// Refuse the step with `GraphError::DuplicateOutput`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphConfig {
    #[serde(default = "default_graph_file")]
    pub graph_file: PathBuf,
    #[serde(default = "default_intermediate_dir")]
    pub intermediate_dir: PathBuf,
    #[serde(default = "default_stab_dir")]
    pub stab_dir: PathBuf,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_sweep_dir")]
    pub sweep_dir: PathBuf,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

fn default_graph_file() -> PathBuf { PathBuf::from("build.ninja") }
fn default_intermediate_dir() -> PathBuf { PathBuf::from("intermediate_lenscorrect") }
fn default_stab_dir() -> PathBuf { PathBuf::from("stab_files") }
fn default_out_dir() -> PathBuf { PathBuf::from("processed_dnxhr") }
fn default_sweep_dir() -> PathBuf { PathBuf::from("test_pictures") }
fn default_ffmpeg() -> String { DEFAULT_FFMPEG.to_string() }

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_file: default_graph_file(),
            intermediate_dir: default_intermediate_dir(),
            stab_dir: default_stab_dir(),
            out_dir: default_out_dir(),
            sweep_dir: default_sweep_dir(),
            ffmpeg: default_ffmpeg(),
            on_collision: CollisionPolicy::default(),
        }
    }
}

impl GraphConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Load `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Same layout, rooted under `base`. Handy for tests and for running
    /// outside the media directory.
    pub fn rooted_at(base: &Path) -> Self {
        let defaults = Self::default();
        Self {
            graph_file: base.join(defaults.graph_file),
            intermediate_dir: base.join(defaults.intermediate_dir),
            stab_dir: base.join(defaults.stab_dir),
            out_dir: base.join(defaults.out_dir),
            sweep_dir: base.join(defaults.sweep_dir),
            ..defaults
        }
    }

    /// The directories created when a session opens.
    pub fn output_dirs(&self) -> [&Path; 3] {
        [&self.intermediate_dir, &self.stab_dir, &self.out_dir]
    }
}
