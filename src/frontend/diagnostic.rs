use super::ast::Span;

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

#[derive(Default)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.items.push(Diagnostic::new(message, span));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn format_diagnostic(diag: &Diagnostic, source: &str, name: Option<&str>) -> String {
    let prefix = match name {
        Some(n) => format!("{}: ", n),
        None => String::new(),
    };
    if let Some(span) = &diag.span {
        let line = span.line;
        let col = span.column;
        let line_text = source.lines().nth(line.saturating_sub(1)).unwrap_or("");
        format!(
            "{}error:{}:{}: {}\n  {}\n  {}^",
            prefix,
            line,
            col,
            diag.message,
            line_text,
            " ".repeat(col.saturating_sub(1))
        )
    } else {
        format!("{}error: {}", prefix, diag.message)
    }
}

/// Render all diagnostics the way the loader reports them to callers.
pub fn render_diags(diags: &Diagnostics, source: &str, name: Option<&str>) -> String {
    let mut out = String::new();
    for diag in &diags.items {
        out.push_str(&format_diagnostic(diag, source, name));
        out.push('\n');
    }
    out
}
