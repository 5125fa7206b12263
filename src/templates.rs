//! Command Templates - Placeholders Are Contracts
//!
//! A template is a Ninja command line with `$name` / `${name}` placeholders.
//! The placeholder list is extracted once, in order of first appearance.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Missing placeholder: ${0}")]
    MissingPlaceholder(String),

    #[error("Unterminated placeholder in template: {0}")]
    Unterminated(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    text: String,
    placeholders: Vec<String>,
    #[serde(default)]
    optional: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(text: impl Into<String>) -> Result<Self, TemplateError> {
        let text = text.into();
        let mut placeholders: Vec<String> = vec![];
        for segment in segments(&text)? {
            if let Segment::Var(name) = segment {
                if !placeholders.iter().any(|p| p == name) {
                    placeholders.push(name.to_string());
                }
            }
        }
        Ok(Self { text, placeholders, optional: vec![] })
    }

    /// Mark a placeholder as optional: rendered empty when not supplied.
    pub fn with_optional(mut self, name: &str) -> Self {
        if !self.optional.iter().any(|o| o == name) {
            self.optional.push(name.to_string());
        }
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn is_optional(&self, name: &str) -> bool {
        self.optional.iter().any(|o| o == name)
    }

    /// Required placeholders, in order.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.placeholders
            .iter()
            .map(String::as_str)
            .filter(move |p| !self.is_optional(*p))
    }

    /// Check that every required placeholder is available, without rendering.
    pub fn check<F>(&self, is_available: F) -> Result<(), TemplateError>
    where
        F: Fn(&str) -> bool,
    {
        match self.required().find(|p| !is_available(*p)) {
            Some(missing) => Err(TemplateError::MissingPlaceholder(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Substitute placeholders. `$$` renders as a literal `$`.
    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.text.len());
        for segment in segments(&self.text)? {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Dollar => out.push('$'),
                Segment::Var(name) => match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None if self.is_optional(name) => {}
                    None => return Err(TemplateError::MissingPlaceholder(name.to_string())),
                },
            }
        }
        Ok(out)
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Dollar,
    Var(&'a str),
}

// Ninja lexer rules: `$name` takes [A-Za-z0-9_-], `${name}` also allows '.'
fn is_simple_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn segments(text: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut out = vec![];
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        if pos > 0 {
            out.push(Segment::Literal(&rest[..pos]));
        }
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push(Segment::Dollar);
            rest = tail;
        } else if let Some(braced) = after.strip_prefix('{') {
            let end = braced
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(text.to_string()))?;
            out.push(Segment::Var(&braced[..end]));
            rest = &braced[end + 1..];
        } else {
            let end = after
                .find(|c: char| !is_simple_var_char(c))
                .unwrap_or(after.len());
            if end == 0 {
                // Ninja escapes like "$ " or "$:" are kept verbatim.
                out.push(Segment::Literal(&rest[pos..pos + 1]));
                rest = after;
            } else {
                out.push(Segment::Var(&after[..end]));
                rest = &after[end..];
            }
        }
    }
    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_placeholders_in_order() {
        let t = CommandTemplate::parse("$FFMPEG $pre_args -i $in -vf x=\"$in_stab\" $out $in").unwrap();
        assert_eq!(t.placeholders(), &["FFMPEG", "pre_args", "in", "in_stab", "out"]);
    }

    #[test]
    fn test_render_substitutes() {
        let t = CommandTemplate::parse("$FFMPEG -i $in ${out}").unwrap();
        let rendered = t
            .render(&vars(&[("FFMPEG", "ffmpeg -y"), ("in", "a.mp4"), ("out", "b.mov")]))
            .unwrap();
        assert_eq!(rendered, "ffmpeg -y -i a.mp4 b.mov");
    }

    #[test]
    fn test_render_missing_required() {
        let t = CommandTemplate::parse("$FFMPEG -i $in $out").unwrap();
        let err = t.render(&vars(&[("FFMPEG", "ffmpeg"), ("in", "a")])).unwrap_err();
        assert_eq!(err, TemplateError::MissingPlaceholder("out".to_string()));
    }

    #[test]
    fn test_optional_renders_empty() {
        let t = CommandTemplate::parse("ffmpeg $pre_args -i $in")
            .unwrap()
            .with_optional("pre_args");
        assert_eq!(t.render(&vars(&[("in", "a")])).unwrap(), "ffmpeg  -i a");
        assert!(t.check(|p| p == "in").is_ok());
    }

    #[test]
    fn test_escaped_dollar() {
        let t = CommandTemplate::parse("echo $$HOME $out").unwrap();
        assert_eq!(t.placeholders(), &["out"]);
        assert_eq!(t.render(&vars(&[("out", "x")])).unwrap(), "echo $HOME x");
    }

    #[test]
    fn test_unterminated_brace() {
        assert!(matches!(
            CommandTemplate::parse("echo ${out"),
            Err(TemplateError::Unterminated(_))
        ));
    }
}
