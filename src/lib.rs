//! Defishy Core - Ninja Build Graph Generator
//!
//! Writes `build.ninja` files that lens-correct and stabilize action-camera
//! footage with ffmpeg. Ninja runs the graph; this crate only declares it.
//!
//! # Guarantees
//! 1. Lens correction runs before stabilization
//! 2. Every step's inputs are exactly the outputs it waits for
//! 3. Output names are derived deterministically from input names
//! 4. A rule is declared at most once per graph file

pub mod config;
pub mod graph;
pub mod ninja;
pub mod paths;
pub mod pipeline;
pub mod rules;
pub mod sweep;
pub mod templates;

pub use config::{CollisionPolicy, ConfigError, GraphConfig};
pub use graph::{BuildStep, GraphBuilder, GraphError, GraphSummary, OpenMode};
pub use paths::{DerivedPaths, PathDeriver, PathError, Workflow};
pub use pipeline::{Pipeline, PipelineError, PipelineRequest};
pub use rules::{Rule, RuleKind, RuleRegistry};
pub use sweep::{CoefficientSweep, Linspace};
pub use templates::{CommandTemplate, TemplateError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
