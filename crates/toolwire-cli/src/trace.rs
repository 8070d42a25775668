//! `--trace` rendering of wire traffic.

use std::sync::Arc;

use chrono::{DateTime, Local};
use console::Style;
use toolwire_core::StructuredValue;
use toolwire_protocol::{JsonRpcError, JsonRpcResponse};
use toolwire_transport::{TrafficEvent, TrafficObserver};

/// Renders [`TrafficEvent`]s as timestamped one-line summaries with an
/// optional payload preview.
#[derive(Debug, Clone)]
pub struct TraceRenderer {
    /// Whether to show params, results and error details.
    pub show_payloads: bool,
    /// Maximum preview length in characters.
    pub truncate_at: usize,
    colors: bool,
}

impl TraceRenderer {
    #[must_use]
    pub fn new(colors: bool) -> Self {
        Self {
            show_payloads: true,
            truncate_at: 200,
            colors,
        }
    }

    /// Renderer for stderr, coloured when stderr is a terminal.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(console::colors_enabled_stderr())
    }

    /// Wraps the renderer in an observer printing to stderr.
    #[must_use]
    pub fn into_observer(self) -> TrafficObserver {
        Arc::new(move |event: &TrafficEvent| {
            eprintln!("{}", self.render(event, Local::now()));
        })
    }

    /// Formats one event.
    #[must_use]
    pub fn render(&self, event: &TrafficEvent, at: DateTime<Local>) -> String {
        let stamp = self
            .style(Style::new().dim())
            .apply_to(at.format("%H:%M:%S%.3f"));
        let bold = self.style(Style::new().bold());
        let dim = self.style(Style::new().dim());

        let (summary, preview) = match event {
            TrafficEvent::Request(request) => (
                format!(
                    "{} {} {}",
                    bold.apply_to("->"),
                    self.method_style(&request.method).apply_to(&request.method),
                    dim.apply_to(format!("id={}", request.id))
                ),
                request.params.as_ref().map(|p| self.preview(p)),
            ),
            TrafficEvent::Notification(notification) => (
                format!(
                    "{} {}",
                    bold.apply_to("->"),
                    self.method_style(&notification.method)
                        .apply_to(&notification.method)
                ),
                notification.params.as_ref().map(|p| self.preview(p)),
            ),
            TrafficEvent::Response(response) => self.response(response),
            TrafficEvent::Stderr(text) => (
                format!(
                    "{} {}",
                    self.style(Style::new().yellow()).apply_to("!!"),
                    dim.apply_to(text.trim_end())
                ),
                None,
            ),
        };

        match preview {
            Some(preview) if self.show_payloads => {
                format!("{stamp} {summary}\n    {}", dim.apply_to(preview))
            }
            _ => format!("{stamp} {summary}"),
        }
    }

    fn response(&self, response: &JsonRpcResponse) -> (String, Option<String>) {
        let (label, status) = match &response.error {
            Some(_) => ("ERR", self.style(Style::new().red().bold())),
            None => ("OK", self.style(Style::new().green().bold())),
        };
        let id = match &response.id {
            Some(id) => format!("id={id}"),
            None => "id=null".to_string(),
        };
        let summary = format!(
            "{} {} {}",
            self.style(Style::new().bold()).apply_to("<-"),
            status.apply_to(label),
            self.style(Style::new().dim()).apply_to(id)
        );
        let preview = match (&response.error, &response.result) {
            (Some(error), _) => Some(self.error_preview(error)),
            (None, Some(result)) => Some(self.preview(result)),
            (None, None) => None,
        };
        (summary, preview)
    }

    fn error_preview(&self, error: &JsonRpcError) -> String {
        match &error.data {
            Some(data) => self.truncate(&format!(
                "Error {}: {} data={}",
                error.code,
                error.message,
                data.to_canonical_string()
            )),
            None => format!("Error {}: {}", error.code, error.message),
        }
    }

    fn preview(&self, value: &StructuredValue) -> String {
        self.truncate(&value.to_canonical_string())
    }

    fn method_style(&self, method: &str) -> Style {
        let style = if method.starts_with("tools/") {
            Style::new().cyan()
        } else if method.starts_with("resources/") {
            Style::new().magenta()
        } else if method.starts_with("prompts/") {
            Style::new().blue()
        } else if method.starts_with("initialize") || method.starts_with("notifications/") {
            Style::new().yellow()
        } else {
            Style::new()
        };
        self.style(style)
    }

    fn style(&self, style: Style) -> Style {
        style.force_styling(self.colors)
    }

    fn truncate(&self, s: &str) -> String {
        if s.chars().count() <= self.truncate_at {
            s.to_string()
        } else {
            let truncated: String = s.chars().take(self.truncate_at).collect();
            format!("{truncated}...")
        }
    }
}
