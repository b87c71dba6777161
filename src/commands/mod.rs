pub mod status;
pub mod sync;
pub mod verify;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "{}: {}\n",
            self.command,
            if self.ok { "ok" } else { "issues found" }
        );
        for line in &self.details {
            out.push_str(&format!("  {line}\n"));
        }
        for line in &self.issues {
            out.push_str(&format!("  issue: {line}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::CommandReport;

    #[test]
    fn issues_flip_ok_and_render_after_details() {
        let mut report = CommandReport::new("verify");
        report.detail("assets=3");
        assert!(report.ok);
        report.issue("missing asset data/archive/blog/1_x.jpg");

        assert!(!report.ok);
        let text = report.render_text();
        assert!(text.starts_with("verify: issues found\n"));
        assert!(text.contains("  assets=3\n"));
        assert!(text.contains("  issue: missing asset"));
    }
}
