use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tera::{Context, Error as TeraError, Tera}; // Templating engine
use thiserror::Error;

static NAME_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*name\s*\}\}").unwrap());
static ENDRAW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%-?\s*endraw\s*-?%\}").unwrap());

/// Placeholder substituted when a target has no display name.
pub const DEFAULT_NAME_FALLBACK: &str = "Friend";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to read template file '{path}': {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse template '{name}': {source}")]
    ParseError { name: String, source: TeraError },
    #[error("Failed to render template: {0}")]
    RenderError(#[from] TeraError),
    #[error("Template format error: 'Subject:' line must be followed by a '---' separator")]
    FormatError,
}

/// The message actually handed to a send action for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

/// A compiled message template.
///
/// `{{name}}` (or `{{ name }}`) is the only placeholder; every other brace
/// sequence is sent as typed. Email messages carry a subject, chat messages
/// don't.
pub struct MessageTemplate {
    pub subject_template: Option<String>,
    pub body_template: String,
    tera: Tera,
    template_name: String,
}

impl std::fmt::Debug for MessageTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTemplate")
            .field("subject_template", &self.subject_template)
            .field("body_template", &self.body_template)
            .field("template_name", &self.template_name)
            .finish_non_exhaustive()
    }
}

/// Turns user text into tera source where only the name placeholder is live.
fn to_tera_source(text: &str) -> String {
    let mut source = String::with_capacity(text.len() + 32);
    for (i, literal) in NAME_PLACEHOLDER_RE.split(text).enumerate() {
        if i > 0 {
            source.push_str("{{ name }}");
        }
        let mut last = 0;
        // A literal `{% endraw %}` would close the raw block early.
        for m in ENDRAW_RE.find_iter(literal) {
            push_raw(&mut source, &literal[last..m.start()]);
            source.push_str(&format!("{{{{ \"{}\" }}}}", m.as_str()));
            last = m.end();
        }
        push_raw(&mut source, &literal[last..]);
    }
    source
}

fn push_raw(source: &mut String, literal: &str) {
    if !literal.is_empty() {
        source.push_str("{% raw %}");
        source.push_str(literal);
        source.push_str("{% endraw %}");
    }
}

impl MessageTemplate {
    /// Loads a template from a file.
    ///
    /// Expects format:
    /// ```text
    /// Subject: <subject template>
    /// ---
    /// <body template>
    /// ```
    /// A file without a `Subject:` first line is treated as a bare body.
    pub fn load(template_path: &Path) -> Result<Self, TemplateError> {
        let path_str = template_path.to_string_lossy().to_string();
        let content = fs::read_to_string(template_path).map_err(|e| TemplateError::ReadError {
            path: path_str,
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parses the `Subject:` / `---` / body layout used by template files.
    pub fn parse(content: &str) -> Result<Self, TemplateError> {
        let mut lines = content.lines();
        let Some(first) = lines.clone().next() else {
            return Self::from_content(None, "", "file_template");
        };

        if !first.starts_with("Subject:") {
            return Self::from_content(None, content, "file_template");
        }

        lines.next();
        let separator = lines.next().ok_or(TemplateError::FormatError)?;
        if separator.trim() != "---" {
            return Err(TemplateError::FormatError);
        }

        let subject_template = first.trim_start_matches("Subject:").trim().to_string();
        let body_template = lines.collect::<Vec<&str>>().join("\n");

        Self::from_content(Some(&subject_template), &body_template, "file_template")
    }

    /// Creates a template directly from subject and body strings.
    pub fn from_content(
        subject: Option<&str>,
        body: &str,
        base_name: &str,
    ) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        // Ensure unique names for Tera internal registry
        let subject_template_name = format!("{}_subject", base_name);
        let body_template_name = format!("{}_body", base_name);

        let mut raw = vec![(body_template_name, to_tera_source(body))];
        if let Some(subject) = subject {
            raw.push((subject_template_name, to_tera_source(subject)));
        }

        tera.add_raw_templates(raw)
            .map_err(|e| TemplateError::ParseError {
                name: base_name.to_string(),
                source: e,
            })?;

        Ok(MessageTemplate {
            subject_template: subject.map(str::to_string),
            body_template: body.to_string(),
            tera,
            template_name: base_name.to_string(),
        })
    }

    /// Compiles `body` as tera source as-is, for exercising render errors.
    #[cfg(test)]
    pub(crate) fn from_tera_source(body: &str) -> Self {
        let mut tera = Tera::default();
        tera.add_raw_template("raw_body", body).unwrap();
        MessageTemplate {
            subject_template: None,
            body_template: body.to_string(),
            tera,
            template_name: "raw".to_string(),
        }
    }

    pub fn subject_is_blank(&self) -> bool {
        self.subject_template
            .as_deref()
            .map_or(true, |s| s.trim().is_empty())
    }

    pub fn body_is_blank(&self) -> bool {
        self.body_template.trim().is_empty()
    }

    /// Renders the template for one target, substituting `fallback` when
    /// the target has no name.
    pub fn render(
        &self,
        display_name: Option<&str>,
        fallback: &str,
    ) -> Result<RenderedMessage, TemplateError> {
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(fallback);

        let mut context = Context::new();
        context.insert("name", name);

        let subject = match self.subject_template {
            Some(_) => Some(
                self.tera
                    .render(&format!("{}_subject", self.template_name), &context)?,
            ),
            None => None,
        };
        let body = self
            .tera
            .render(&format!("{}_body", self.template_name), &context)?;

        Ok(RenderedMessage { subject, body })
    }
}
