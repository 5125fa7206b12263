//! Path Derivation - deterministic output names
//!
//! `dir / <input stem><suffix>`. No hashing, no dedup: inputs with the same
//! file name in different source directories derive the same output.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::GraphConfig;

pub const LENS_SUFFIX: &str = ".d.mov";
pub const STAB_SUFFIX: &str = ".s.mov";
pub const LENS_STAB_SUFFIX: &str = ".ds.mov";
pub const TRF_SUFFIX: &str = ".trf";
pub const LENS_TRF_SUFFIX: &str = ".d.trf";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("Input path has no file name: {0}")]
    NoFileName(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Workflow {
    LensCorrectOnly,
    StabilizeOnly,
    LensCorrectAndStabilize,
}

/// Replace the last extension of `input`'s file name with `suffix` and
/// relocate it under `dir`.
pub fn derive(input: &Path, dir: &Path, suffix: &str) -> Result<PathBuf, PathError> {
    let stem = input
        .file_stem()
        .ok_or_else(|| PathError::NoFileName(input.to_path_buf()))?;
    let mut name = OsString::from(stem);
    name.push(suffix);
    Ok(dir.join(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedPaths {
    pub intermediate: Option<PathBuf>,
    pub stab_data: Option<PathBuf>,
    pub output: PathBuf,
}

/// Paths of the two-pass stabilization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabPaths {
    pub trf: PathBuf,
    pub output: PathBuf,
}

/// Paths of the lens-correct-then-stabilize chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LensStabPaths {
    pub intermediate: PathBuf,
    pub trf: PathBuf,
    pub output: PathBuf,
}

pub struct PathDeriver<'a> {
    config: &'a GraphConfig,
}

impl<'a> PathDeriver<'a> {
    pub fn new(config: &'a GraphConfig) -> Self {
        Self { config }
    }

    pub fn lens_correct_only(&self, input: &Path) -> Result<PathBuf, PathError> {
        derive(input, &self.config.out_dir, LENS_SUFFIX)
    }

    pub fn stabilize_only(&self, input: &Path) -> Result<StabPaths, PathError> {
        Ok(StabPaths {
            trf: derive(input, &self.config.stab_dir, TRF_SUFFIX)?,
            output: derive(input, &self.config.out_dir, STAB_SUFFIX)?,
        })
    }

    pub fn lens_correct_and_stabilize(&self, input: &Path) -> Result<LensStabPaths, PathError> {
        Ok(LensStabPaths {
            intermediate: derive(input, &self.config.intermediate_dir, LENS_SUFFIX)?,
            trf: derive(input, &self.config.stab_dir, LENS_TRF_SUFFIX)?,
            output: derive(input, &self.config.out_dir, LENS_STAB_SUFFIX)?,
        })
    }

    /// Every path a workflow produces for `input`.
    pub fn plan(&self, input: &Path, workflow: Workflow) -> Result<DerivedPaths, PathError> {
        let paths = match workflow {
            Workflow::LensCorrectOnly => DerivedPaths {
                intermediate: None,
                stab_data: None,
                output: self.lens_correct_only(input)?,
            },
            Workflow::StabilizeOnly => {
                let p = self.stabilize_only(input)?;
                DerivedPaths {
                    intermediate: None,
                    stab_data: Some(p.trf),
                    output: p.output,
                }
            }
            Workflow::LensCorrectAndStabilize => {
                let p = self.lens_correct_and_stabilize(input)?;
                DerivedPaths {
                    intermediate: Some(p.intermediate),
                    stab_data: Some(p.trf),
                    output: p.output,
                }
            }
        };
        Ok(paths)
    }
}
