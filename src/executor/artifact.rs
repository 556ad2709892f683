//! Generated documents for written submissions.

use serde::{Deserialize, Serialize};

const MAX_FILE_STEM_CHARS: usize = 50;

/// Rendering of a generated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    #[default]
    Txt,
    Html,
    Md,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Txt => "txt",
            ArtifactFormat::Html => "html",
            ArtifactFormat::Md => "md",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ArtifactFormat::Txt => "text/plain",
            ArtifactFormat::Html => "text/html",
            ArtifactFormat::Md => "text/markdown",
        }
    }
}

/// A document ready for upload or manual download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub file_name: String,
    pub format: ArtifactFormat,
    pub content: String,
}

impl Artifact {
    /// Render `body` under `title` in the given format.
    pub fn render(title: &str, body: &str, format: ArtifactFormat) -> Self {
        let content = match format {
            ArtifactFormat::Txt => body.to_string(),
            ArtifactFormat::Md => format!("# {}\n\n{}", title, body),
            ArtifactFormat::Html => render_html(title, body),
        };

        Self {
            file_name: format!("{}.{}", sanitize_file_name(title), format.extension()),
            format,
            content,
        }
    }
}

fn render_html(title: &str, body: &str) -> String {
    let title = escape_html(title);
    let paragraphs: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("<p>{}</p>", escape_html(line)))
        .collect();

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n{}\n</body>\n</html>\n",
        paragraphs.join("\n")
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Keep ASCII alphanumerics, spaces and `-`; collapse whitespace to `_`; cap
/// the length. Falls back to `response` when nothing survives.
pub fn sanitize_file_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || c.is_whitespace())
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    let stem: String = joined.chars().take(MAX_FILE_STEM_CHARS).collect();

    if stem.is_empty() {
        "response".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Week 2: Essay (final)!"), "Week_2_Essay_final");
        assert_eq!(sanitize_file_name("  a   b-c "), "a_b-c");
        assert_eq!(sanitize_file_name("???"), "response");
    }

    #[test]
    fn test_sanitize_file_name_caps_length() {
        let long = "x".repeat(80);
        assert_eq!(sanitize_file_name(&long).len(), 50);
    }

    #[test]
    fn test_render_txt() {
        let artifact = Artifact::render("My Essay", "Body text", ArtifactFormat::Txt);
        assert_eq!(artifact.file_name, "My_Essay.txt");
        assert_eq!(artifact.content, "Body text");
    }

    #[test]
    fn test_render_md_has_title_heading() {
        let artifact = Artifact::render("My Essay", "Body", ArtifactFormat::Md);
        assert_eq!(artifact.file_name, "My_Essay.md");
        assert!(artifact.content.starts_with("# My Essay\n\nBody"));
    }

    #[test]
    fn test_render_html_paragraphs_and_escaping() {
        let artifact = Artifact::render("A <b>", "one\n\ntwo & three", ArtifactFormat::Html);
        assert_eq!(artifact.format.mime_type(), "text/html");
        assert!(artifact.content.contains("<h1>A &lt;b&gt;</h1>"));
        assert!(artifact.content.contains("<p>one</p>\n<p>two &amp; three</p>"));
    }
}
