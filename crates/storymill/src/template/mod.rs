//! Template-driven transformation of extracted text into story
//! artifacts. Templates are a small built-in set; an unknown template
//! name fails the phase instead of silently falling back.

use chrono::Utc;
use thiserror::Error;

use crate::job::types::{ProcessingOptions, SourceRef};

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Unknown template '{0}'")]
    UnknownTemplate(String),
}

/// Default template applied when job parameters don't name one.
pub const DEFAULT_TEMPLATE: &str = "summary";

/// Built-in template names.
pub const TEMPLATES: &[&str] = &["summary", "outline", "fulltext"];

#[derive(Clone, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Renders the transcript artifact: front matter plus the extracted
    /// text unchanged.
    pub fn render_transcript(
        &self,
        source: &SourceRef,
        options: &ProcessingOptions,
        text: &str,
    ) -> String {
        format!(
            "{}\n{}\n",
            front_matter(source, options, "transcript"),
            text.trim_end()
        )
    }

    /// Renders a named transformation of the extracted text.
    pub fn render(
        &self,
        template: &str,
        source: &SourceRef,
        options: &ProcessingOptions,
        text: &str,
    ) -> Result<String, TemplateError> {
        let body = match template {
            "summary" => summarize(text),
            "outline" => outline(text),
            "fulltext" => text.trim_end().to_string(),
            other => return Err(TemplateError::UnknownTemplate(other.to_string())),
        };
        Ok(format!(
            "{}\n{}\n",
            front_matter(source, options, template),
            body
        ))
    }
}

fn front_matter(source: &SourceRef, options: &ProcessingOptions, template: &str) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("source: {}\n", source.name));
    out.push_str(&format!("language: {}\n", options.target_language));
    out.push_str(&format!("template: {}\n", template));
    if let Some(mime) = &source.mime_type {
        out.push_str(&format!("mimeType: {}\n", mime));
    }
    out.push_str(&format!("generated: {}\n", Utc::now().format("%Y-%m-%d")));
    out.push_str("---\n");
    out
}

/// First paragraph plus one line per further paragraph opening.
fn summarize(text: &str) -> String {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let Some((first, rest)) = paragraphs.split_first() else {
        return String::new();
    };

    let mut out = String::from(first.trim());
    if !rest.is_empty() {
        out.push_str("\n\n## Further sections\n");
        for paragraph in rest {
            let lead = paragraph.lines().next().unwrap_or("").trim();
            if !lead.is_empty() {
                out.push_str(&format!("- {}\n", truncate(lead, 120)));
            }
        }
    }
    out
}

/// Markdown headings and all-caps lines, as a nested list.
fn outline(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix('#') {
            let depth = trimmed.len() - trimmed.trim_start_matches('#').len();
            let indent = "  ".repeat(depth.saturating_sub(1));
            out.push_str(&format!("{}- {}\n", indent, heading.trim_start_matches('#').trim()));
        } else if trimmed.len() > 3
            && trimmed
                .chars()
                .all(|c| c.is_uppercase() || !c.is_alphabetic())
            && trimmed.chars().any(|c| c.is_alphabetic())
        {
            out.push_str(&format!("- {}\n", trimmed));
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceRef {
        SourceRef::new("library/report.pdf", "library", "report.pdf")
    }

    #[test]
    fn test_transcript_has_front_matter_and_body() {
        let engine = TemplateEngine::new();
        let rendered =
            engine.render_transcript(&source(), &ProcessingOptions::default(), "Hello world");
        assert!(rendered.starts_with("---\n"));
        assert!(rendered.contains("source: report.pdf"));
        assert!(rendered.contains("language: de"));
        assert!(rendered.contains("template: transcript"));
        assert!(rendered.ends_with("Hello world\n"));
    }

    #[test]
    fn test_summary_template() {
        let engine = TemplateEngine::new();
        let text = "Opening paragraph.\n\nSecond section begins here\nwith more detail.\n\nThird section.";
        let rendered = engine
            .render("summary", &source(), &ProcessingOptions::default(), text)
            .unwrap();
        assert!(rendered.contains("Opening paragraph."));
        assert!(rendered.contains("- Second section begins here"));
        assert!(rendered.contains("- Third section."));
    }

    #[test]
    fn test_outline_template() {
        let engine = TemplateEngine::new();
        let text = "# Title\nbody\n## Section One\nmore\nCHAPTER TWO\ntext";
        let rendered = engine
            .render("outline", &source(), &ProcessingOptions::default(), text)
            .unwrap();
        assert!(rendered.contains("- Title"));
        assert!(rendered.contains("  - Section One"));
        assert!(rendered.contains("- CHAPTER TWO"));
    }

    #[test]
    fn test_fulltext_template_passthrough() {
        let engine = TemplateEngine::new();
        let rendered = engine
            .render("fulltext", &source(), &ProcessingOptions::default(), "Body text\n")
            .unwrap();
        assert!(rendered.ends_with("Body text\n"));
    }

    #[test]
    fn test_unknown_template_rejected() {
        let engine = TemplateEngine::new();
        let err = engine
            .render("no-such-template", &source(), &ProcessingOptions::default(), "x")
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnknownTemplate(_)));
    }
}
