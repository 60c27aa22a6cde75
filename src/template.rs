//! HTML body templates.
//!
//! A template source holds one or more named blocks written as
//! `{{define "name"}}...{{end}}`. Blocks reference per-recipient fields
//! with `{{field}}` placeholders. A source without any `define` is treated
//! as a single block that answers to every name.
//!
//! Templates are parsed once into an immutable [`Template`] and can be
//! shared between workers without synchronisation.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::domain::{Campaign, EmailId};

static DEFINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\{\s*define\s+"([^"]+)"\s*\}\}"#).unwrap());
static END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*end\s*\}\}").unwrap());
static FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.?([A-Za-z_][A-Za-z0-9_]*)$").unwrap());
/// Placeholder matcher for lenient rendering; unknown keys stay intact.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Failures while loading, parsing or rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed template: {0}")]
    Parse(String),

    #[error("template block \"{0}\" is not defined")]
    MissingBlock(String),

    #[error("undefined template field \"{0}\"")]
    UndefinedField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(String),
}

/// A parsed template block ready for rendering.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Reads `path` and selects `block` from it.
    pub fn load(path: impl AsRef<Path>, block: &str) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source, block)
    }

    /// Parses `source` and selects `block` from it.
    pub fn parse(source: &str, block: &str) -> Result<Self, TemplateError> {
        let mut blocks = parse_blocks(source)?;
        let body = match blocks.is_empty() {
            true => source,
            false => blocks
                .remove(block)
                .ok_or_else(|| TemplateError::MissingBlock(block.to_owned()))?,
        };

        Ok(Self {
            name: block.to_owned(),
            segments: parse_segments(body)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the block, HTML-escaping every substituted value.
    pub fn render(&self, data: &EmailData) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = data
                        .field(name)
                        .ok_or_else(|| TemplateError::UndefinedField(name.clone()))?;
                    out.push_str(&escape_html(&value));
                }
            }
        }
        Ok(out)
    }
}

fn parse_blocks(source: &str) -> Result<HashMap<String, &str>, TemplateError> {
    let mut blocks = HashMap::new();
    let mut cursor = 0;

    while let Some(define) = DEFINE_RE.captures_at(source, cursor) {
        let header = define.get(0).map_or(0..0, |m| m.range());
        let name = define[1].to_owned();
        let end = END_RE.find_at(source, header.end).ok_or_else(|| {
            TemplateError::Parse(format!("block \"{name}\" is missing {{{{end}}}}"))
        })?;

        blocks.insert(name, &source[header.end..end.start()]);
        cursor = end.end();
    }

    Ok(blocks)
}

fn parse_segments(body: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_owned()));
        }
        let after_open = &rest[open + 2..];
        let close = after_open
            .find("}}")
            .ok_or_else(|| TemplateError::Parse("unterminated \"{{\"".to_owned()))?;
        let action = after_open[..close].trim();
        let field = FIELD_RE
            .captures(action)
            .map(|caps| caps[1].to_owned())
            .ok_or_else(|| TemplateError::Parse(format!("unsupported action \"{action}\"")))?;
        segments.push(Segment::Field(field));
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_owned()));
    }

    Ok(segments)
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Per-recipient values available to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailData {
    pub subject: String,
    pub body: String,
    pub recipient: String,
    pub email_id: Option<EmailId>,
    pub tracking_url: Option<String>,
}

impl EmailData {
    /// Builds the data for one campaign recipient.
    ///
    /// The campaign body is personalised first; placeholders it does not
    /// recognise are left untouched.
    pub fn for_recipient(
        campaign: &Campaign,
        recipient: &str,
        email_id: Option<EmailId>,
        tracking_base: Option<&str>,
    ) -> Self {
        let tracking_url = match (tracking_base, email_id) {
            (Some(base), Some(id)) => Some(tracking_link(base, id)),
            _ => None,
        };
        let mut data = Self {
            subject: campaign.subject.clone(),
            body: String::new(),
            recipient: recipient.to_owned(),
            email_id,
            tracking_url,
        };
        data.body = fill_template(&campaign.body, &data);
        data
    }

    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            "subject" | "Subject" => Some(Cow::Borrowed(&self.subject)),
            "body" | "Body" => Some(Cow::Borrowed(&self.body)),
            "recipient" | "Recipient" => Some(Cow::Borrowed(&self.recipient)),
            "email_id" | "EmailId" => Some(Cow::Owned(
                self.email_id.map(|id| id.to_string()).unwrap_or_default(),
            )),
            "tracking_url" | "TrackingUrl" => {
                Some(Cow::Borrowed(self.tracking_url.as_deref().unwrap_or("")))
            }
            _ => None,
        }
    }
}

fn tracking_link(base: &str, id: EmailId) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}id={id}")
}

/// Replace {{key}} with values from `data`; leave unknown {{key}} intact.
fn fill_template(template: &str, data: &EmailData) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            data.field(&caps[1])
                .map(Cow::into_owned)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
