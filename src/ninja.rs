//! Ninja Syntax - Low-level writer for `build.ninja` files
//!
//! Emits variables, rules and build statements. Knows nothing about ffmpeg.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

/// Escape a path for a `build` line: `$`, space and `:` are significant there.
pub fn escape_path(path: &str) -> String {
    path.replace('$', "$$").replace(' ', "$ ").replace(':', "$:")
}

/// Escape a variable value so Ninja does not expand it.
pub fn escape(value: &str) -> String {
    value.replace('$', "$$")
}

pub struct Writer<W: Write> {
    out: W,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn newline(&mut self) -> io::Result<()> {
        writeln!(self.out)
    }

    pub fn comment(&mut self, text: &str) -> io::Result<()> {
        for line in text.lines() {
            writeln!(self.out, "# {}", line)?;
        }
        Ok(())
    }

    pub fn variable(&mut self, key: &str, value: &str, indent: usize) -> io::Result<()> {
        writeln!(self.out, "{}{} = {}", "  ".repeat(indent), key, value)
    }

    pub fn rule(&mut self, name: &str, command: &str, description: Option<&str>) -> io::Result<()> {
        writeln!(self.out, "rule {}", name)?;
        self.variable("command", command, 1)?;
        if let Some(description) = description {
            self.variable("description", description, 1)?;
        }
        Ok(())
    }

    /// `build out1 out2: rule in1 in2` followed by indented bindings.
    pub fn build<'a>(
        &mut self,
        outputs: &[String],
        rule: &str,
        inputs: &[String],
        variables: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> io::Result<()> {
        let mut line = String::from("build");
        for output in outputs {
            line.push(' ');
            line.push_str(&escape_path(output));
        }
        line.push_str(": ");
        line.push_str(rule);
        for input in inputs {
            line.push(' ');
            line.push_str(&escape_path(input));
        }
        writeln!(self.out, "{}", line)?;

        for (key, value) in variables {
            self.variable(key, &escape(value), 1)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Names already present in an existing ninja file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Declarations {
    pub rules: BTreeSet<String>,
    pub variables: BTreeMap<String, String>,
    pub outputs: BTreeSet<String>,
}

/// Scan top-level declarations from ninja source.
///
/// Only what this crate writes is understood: no `include`, `subninja`
/// or `$`-continued lines.
pub fn scan(source: &str) -> Declarations {
    let mut found = Declarations::default();

    for line in source.lines() {
        if line.starts_with(' ') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix("rule ") {
            found.rules.insert(name.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("build ") {
            found.outputs.extend(build_outputs(rest));
        } else if let Some((key, value)) = line.split_once(" = ") {
            found.variables.insert(key.trim().to_string(), value.replace("$$", "$"));
        }
    }
    found
}

// Outputs of a build line, up to the first unescaped ':', unescaped.
fn build_outputs(rest: &str) -> Vec<String> {
    let mut outputs = vec![];
    let mut current = String::new();
    let mut chars = rest.chars();

    while let Some(c) = chars.next() {
        match c {
            '$' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ' ' | ':' => {
                if !current.is_empty() {
                    outputs.push(std::mem::take(&mut current));
                }
                if c == ':' {
                    break;
                }
            }
            _ => current.push(c),
        }
    }
    outputs
}
