// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text (tables, colors, etc.).
    Human,
    /// Machine-readable JSON (one object per response).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
///
/// - `Human`: calls `human_fn` to produce a human-readable string.
/// - `Json`: serializes `value` as JSON.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Human => {
            writeln!(out, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut out, value).map_err(io::Error::other)?;
            writeln!(out)
        }
    }
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line =
                render_human_stderr_line("error", message, io::stderr().is_terminal(), ANSI_RED);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Write a warning to stderr in the selected format.
pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line(
                "warning",
                message,
                io::stderr().is_terminal(),
                ANSI_YELLOW,
            );
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "warning": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();

    if lower.contains("does not have permission to view workspace") {
        let workspace = extract_quoted_name(&message).unwrap_or_else(|| "<id>".to_string());
        return (
            "WORKSPACE_ACCESS_DENIED",
            format!(
                "You cannot view workspace {workspace}. Run: stagehand workspace list to see the ones you can"
            ),
        );
    }

    if lower.contains("permission denied") {
        return (
            "PERMISSION_DENIED",
            format!("{message}. Grant it under [actor].permissions in ~/.stagehand/config.toml"),
        );
    }

    if lower.contains("workspace") && (lower.contains("does not exist") || lower.contains("not found"))
    {
        let workspace = extract_quoted_name(&message).unwrap_or_else(|| "<id>".to_string());
        return (
            "WORKSPACE_NOT_FOUND",
            format!("Workspace {workspace} not found. Run: stagehand workspace list"),
        );
    }

    if lower.contains("replication") && lower.contains("not found") {
        return ("REPLICATION_NOT_FOUND", format!("{message}. Run: stagehand status"));
    }

    if lower.contains("cannot move from") {
        return (
            "INVALID_TRANSITION",
            format!("{message}. Only failed replications can be retried"),
        );
    }

    if lower.contains("config") {
        return ("CONFIG_ERROR", message);
    }

    ("COMMAND_FAILED", message)
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}

fn extract_quoted_name(message: &str) -> Option<String> {
    let mut parts = message.split('`');
    let _before = parts.next()?;
    let candidate = parts.next()?.trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct QueueSummary {
        blocked: bool,
        pending: u32,
    }

    #[test]
    fn detect_follows_terminal_unless_forced() {
        assert_eq!(OutputFormat::detect_from_terminal(true), OutputFormat::Human);
        assert_eq!(OutputFormat::detect_from_terminal(false), OutputFormat::Json);
        assert_eq!(OutputFormat::detect(true), OutputFormat::Json);
    }

    #[test]
    fn human_output_uses_renderer() {
        let summary = QueueSummary { blocked: false, pending: 3 };
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Human, &summary, |s| format!("{} pending", s.pending))
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "3 pending\n");
    }

    #[test]
    fn json_output_is_one_line_and_skips_renderer() {
        let summary = QueueSummary { blocked: true, pending: 0 };
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Json, &summary, |_| {
            unreachable!("renderer must not run in JSON mode")
        })
        .unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert_eq!(output.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(parsed["blocked"], true);
        assert_eq!(parsed["pending"], 0);
    }

    #[test]
    fn stderr_helpers_do_not_panic() {
        print_error(OutputFormat::Human, "TEST_ERR", "something broke");
        print_error(OutputFormat::Json, "TEST_ERR", "something broke");
        print_warning(OutputFormat::Json, "QUEUE_BLOCKED", "heads up");
    }

    #[test]
    fn render_human_error_uses_color_for_tty() {
        let line = render_human_stderr_line("error", "boom", true, ANSI_RED);
        assert!(line.contains(ANSI_RED));
        assert!(line.contains(ANSI_RESET));
        assert!(line.contains("boom"));
    }

    #[test]
    fn render_human_warning_without_tty_is_plain() {
        let line = render_human_stderr_line("warning", "careful", false, ANSI_YELLOW);
        assert_eq!(line, "warning: careful");
    }

    #[test]
    fn actionable_error_workspace_access_denied_message() {
        let err = anyhow::anyhow!("the user does not have permission to view workspace `stage`");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "WORKSPACE_ACCESS_DENIED");
        assert!(message.contains("workspace stage"));
        assert!(message.contains("stagehand workspace list"));
    }

    #[test]
    fn actionable_error_missing_permission_message() {
        let err = anyhow::anyhow!("permission denied: actor 7 lacks AdministerReplication");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "PERMISSION_DENIED");
        assert!(message.contains("AdministerReplication"));
        assert!(message.contains("[actor].permissions"));
    }

    #[test]
    fn actionable_error_workspace_not_found_message() {
        let err = anyhow::anyhow!("workspace `qa` does not exist");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "WORKSPACE_NOT_FOUND");
        assert!(message.contains("Workspace qa not found"));
    }

    #[test]
    fn actionable_error_replication_not_found_message() {
        let err = anyhow::anyhow!("replication 42 not found");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "REPLICATION_NOT_FOUND");
        assert!(message.contains("stagehand status"));
    }

    #[test]
    fn actionable_error_transition_message() {
        let err = anyhow::anyhow!("replication 3 cannot move from replicated to queued");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "INVALID_TRANSITION");
        assert!(message.contains("Only failed replications"));
    }

    #[test]
    fn actionable_error_falls_back_to_raw_message() {
        let err = anyhow::anyhow!("disk on fire");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "COMMAND_FAILED");
        assert_eq!(message, "disk on fire");
    }
}
