//! Lens Coefficient Sweep
//!
//! Renders one still per (k1, k2) pair so the right coefficients for a lens
//! can be picked by eye from a contact sheet.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::paths::PathError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("Invalid range {0:?}: expected start:end:count")]
    InvalidRange(String),
}

/// `count` evenly spaced values, both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Linspace {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

impl Linspace {
    pub fn new(start: f64, end: f64, count: usize) -> Self {
        Self { start, end, count }
    }

    pub fn values(&self) -> Vec<f64> {
        match self.count {
            0 => vec![],
            1 => vec![self.start],
            n => {
                let step = (self.end - self.start) / (n - 1) as f64;
                (0..n).map(|i| self.start + step * i as f64).collect()
            }
        }
    }
}

impl FromStr for Linspace {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SweepError::InvalidRange(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let start = parts[0].trim().parse().map_err(|_| invalid())?;
        let end = parts[1].trim().parse().map_err(|_| invalid())?;
        let count = parts[2].trim().parse().map_err(|_| invalid())?;
        Ok(Self { start, end, count })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSweep {
    pub k1: Linspace,
    pub k2: Linspace,
}

impl Default for CoefficientSweep {
    fn default() -> Self {
        Self {
            k1: Linspace::new(-1.0, 1.0, 21),
            k2: Linspace::new(-0.1, 0.1, 21),
        }
    }
}

impl CoefficientSweep {
    /// Formatted (k1, k2) pairs, k1-major.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let k2s: Vec<String> = self.k2.values().into_iter().map(format_coefficient).collect();
        self.k1
            .values()
            .into_iter()
            .map(format_coefficient)
            .flat_map(|k1| k2s.iter().map(move |k2| (k1.clone(), k2.clone())))
            .collect()
    }
}

/// Fixed precision keeps file names stable across float noise.
pub fn format_coefficient(value: f64) -> String {
    let formatted = format!("{:.3}", value);
    if formatted == "-0.000" {
        "0.000".to_string()
    } else {
        formatted
    }
}

/// `dir/<stem>_<k1>_<k2>.<ext>`; the input's extension is kept.
pub fn output_path(input: &Path, dir: &Path, k1: &str, k2: &str) -> Result<PathBuf, PathError> {
    let stem = input
        .file_stem()
        .ok_or_else(|| PathError::NoFileName(input.to_path_buf()))?;
    let mut name = OsString::from(stem);
    name.push(format!("_{}_{}", k1, k2));
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }
    Ok(dir.join(name))
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// HTML grid of every sweep output: one row per k1, one image per k2.
pub fn contact_sheet_html(
    input: &Path,
    sweep: &CoefficientSweep,
    dir: &Path,
) -> Result<String, PathError> {
    let k2s: Vec<String> = sweep.k2.values().into_iter().map(format_coefficient).collect();

    let mut html = String::from("<!DOCTYPE HTML>\n");
    html.push_str("<head>\n<link rel=\"stylesheet\" href=\"styles.css\">\n</head>\n");
    html.push_str("<body>\n");
    for k1 in sweep.k1.values().into_iter().map(format_coefficient) {
        html.push_str("<div>\n");
        for k2 in &k2s {
            let src = output_path(input, dir, &k1, k2)?;
            let _ = writeln!(
                html,
                "<img src=\"{}\" title=\"k1={} k2={}\"></img>",
                escape_attr(&src.display().to_string()),
                k1,
                k2
            );
        }
        html.push_str("</div>\n");
    }
    html.push_str("</body>\n");
    Ok(html)
}
