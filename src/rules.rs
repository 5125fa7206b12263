//! Rule Registry - ffmpeg command templates
//!
//! !!! ORDER MATTERS !!! Lens correction must run BEFORE stabilization:
//! lenscorrection uses the center of the image as its reference point,
//! and vidstab moves the image content around.
//!
//! lenscorrection and vidstabtransform show color issues on yuv422p input,
//! so every filter chain upsamples to yuv444p first and downsamples back
//! to yuv422p before encoding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::templates::{CommandTemplate, TemplateError};

pub const FMT422: &str = "format=yuv422p";
pub const FMT444: &str = "format=yuv444p";

pub const LENSCORRECT: &str = "lenscorrection=cx=0.5:cy=0.5:k1=-0.227:k2=0.045";

pub const VIDSTAB_DETECT: &str = "vidstabdetect=result=$out";
pub const VIDSTAB_TRANSFORM: &str = "vidstabtransform=input=\"$in_stab\"";
/// vid.stab recommends always following vidstabtransform with unsharp.
pub const UNSHARP: &str = "unsharp=5:5:0.8:3:3:0.4";

/// `dnxhr_sq` is `-b:v 145M` without being tied to framerate or resolution.
pub const DNXHR_ENCODE: &str = "-c:v dnxhd -profile:v dnxhr_sq";

/// Global variable holding the ffmpeg invocation prefix.
pub const FFMPEG_VAR: &str = "FFMPEG";
pub const DEFAULT_FFMPEG: &str = "ffmpeg -y -threads 0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    LensCorrect,
    StabPass1,
    StabPass2,
    /// Coefficient sweep over a still image.
    LensSweep,
}

impl RuleKind {
    pub const ALL: [RuleKind; 4] = [
        RuleKind::LensCorrect,
        RuleKind::StabPass1,
        RuleKind::StabPass2,
        RuleKind::LensSweep,
    ];

    /// Name of the rule in the ninja file.
    pub fn name(self) -> &'static str {
        match self {
            RuleKind::LensCorrect => "lenscorrect",
            RuleKind::StabPass1 => "vidstab-pass1",
            RuleKind::StabPass2 => "vidstab-pass2",
            RuleKind::LensSweep => "defisheye",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleKind,
    pub command: CommandTemplate,
    pub description: String,
}

impl Rule {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

fn filter(fragments: &[&str]) -> String {
    fragments.join(",")
}

pub fn lens_correct() -> Result<Rule, TemplateError> {
    let command = [
        "$FFMPEG $pre_args".to_string(),
        "-i $in".to_string(),
        format!("-filter:v {}", filter(&[FMT444, LENSCORRECT, FMT422])),
        "-c:a copy".to_string(),
        DNXHR_ENCODE.to_string(),
        "$out".to_string(),
    ]
    .join(" ");

    Ok(Rule {
        kind: RuleKind::LensCorrect,
        command: CommandTemplate::parse(command)?.with_optional("pre_args"),
        description: "LENSCORRECT $out".to_string(),
    })
}

/// Motion detection. The video is discarded; `$out` must be a `.trf` file.
pub fn stab_pass1() -> Result<Rule, TemplateError> {
    let command = [
        "$FFMPEG $pre_args".to_string(),
        "-i $in".to_string(),
        format!("-filter:v {}", filter(&[FMT444, VIDSTAB_DETECT])),
        "-f null -".to_string(),
    ]
    .join(" ");

    Ok(Rule {
        kind: RuleKind::StabPass1,
        command: CommandTemplate::parse(command)?.with_optional("pre_args"),
        description: "VIDSTAB DETECT $out".to_string(),
    })
}

/// Reads `$infile` rather than `$in`: `$in` also lists the `.trf` dependency.
pub fn stab_pass2() -> Result<Rule, TemplateError> {
    let command = [
        "$FFMPEG $pre_args".to_string(),
        "-i $infile".to_string(),
        format!(
            "-filter:v {}",
            filter(&[FMT444, VIDSTAB_TRANSFORM, UNSHARP, FMT422])
        ),
        "-c:a copy".to_string(),
        DNXHR_ENCODE.to_string(),
        "$out".to_string(),
    ]
    .join(" ");

    Ok(Rule {
        kind: RuleKind::StabPass2,
        command: CommandTemplate::parse(command)?.with_optional("pre_args"),
        description: "VIDSTAB TRANSFORM $out".to_string(),
    })
}

pub fn lens_sweep() -> Result<Rule, TemplateError> {
    let command = "$FFMPEG -i $in -vf \"lenscorrection=cx=0.5:cy=0.5:k1=$k1:k2=$k2\" $out";
    Ok(Rule {
        kind: RuleKind::LensSweep,
        command: CommandTemplate::parse(command)?,
        description: "DEFISHEYE k1=$k1 k2=$k2 $out".to_string(),
    })
}

/// Rule registry - the fixed set of rules a graph may reference
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: BTreeMap<RuleKind, Rule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self { rules: BTreeMap::new() }
    }

    /// The lens correction, stabilization and sweep rules.
    pub fn standard() -> Result<Self, TemplateError> {
        let mut registry = Self::new();
        for rule in [lens_correct()?, stab_pass1()?, stab_pass2()?, lens_sweep()?] {
            registry.register(rule);
        }
        Ok(registry)
    }

    pub fn get(&self, kind: RuleKind) -> Option<&Rule> {
        self.rules.get(&kind)
    }

    pub fn list(&self) -> Vec<&Rule> {
        self.rules.values().collect()
    }

    pub fn register(&mut self, rule: Rule) {
        self.rules.insert(rule.kind, rule);
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
