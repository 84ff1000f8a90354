//! Output formatters for run results
//!
//! Provides Table, JSON and TAP renderings.

use serde::Serialize;

use crate::reporter::ReportedResult;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Tap,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "tap" => Some(OutputFormat::Tap),
            _ => None,
        }
    }
}

/// Result formatter
#[derive(Clone, Debug)]
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    index: usize,
    launcher: Option<&'a str>,
    #[serde(flatten)]
    result: &'a crate::models::TestResult,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format one reported result; `index` is 1-based
    pub fn format_result(&self, reported: &ReportedResult, index: usize) -> String {
        match self.format {
            OutputFormat::Table => self.format_result_table(reported, index),
            OutputFormat::Json => serde_json::to_string(&json_line(reported, index))
                .unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&json_line(reported, index))
                .unwrap_or_default(),
            OutputFormat::Tap => format_result_tap(reported, index),
        }
    }

    fn format_result_table(&self, reported: &ReportedResult, index: usize) -> String {
        let result = &reported.result;
        let status_str = match (result.passed, self.colorize) {
            (true, true) => "\x1b[32m✓ PASS\x1b[0m",
            (false, true) => "\x1b[31m✗ FAIL\x1b[0m",
            (true, false) => "✓ PASS",
            (false, false) => "✗ FAIL",
        };

        let mut line = format!(
            "{:2}. {:20} {} [{:>6}ms]",
            index,
            launcher_label(reported),
            status_str,
            result.duration_ms
        );
        if let Some(msg) = result.error_message() {
            line.push_str(&format!(" - {msg}"));
        }
        line
    }

    /// Format the closing summary of a run
    pub fn format_summary(&self, results: &[ReportedResult], reason: Option<&str>) -> String {
        let total = results.len();
        let passed = results.iter().filter(|r| r.result.passed).count();
        let failed = total - passed;

        match self.format {
            OutputFormat::Tap => {
                let mut out = format!("\n1..{total}\n# tests {total}\n# pass  {passed}\n");
                if failed > 0 {
                    out.push_str(&format!("# fail  {failed}\n"));
                } else {
                    out.push_str("\n# ok\n");
                }
                out
            }
            OutputFormat::Json | OutputFormat::JsonPretty => {
                let summary = serde_json::json!({
                    "total": total,
                    "passed": passed,
                    "failed": failed,
                    "reason": reason,
                });
                if self.format == OutputFormat::Json {
                    summary.to_string()
                } else {
                    serde_json::to_string_pretty(&summary).unwrap_or_default()
                }
            }
            OutputFormat::Table => {
                let mut out = String::new();
                out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
                out.push_str(&format!(
                    "Total: {total} | Pass: {passed} | Fail: {failed}\n"
                ));
                if let Some(reason) = reason {
                    out.push_str(reason);
                    out.push('\n');
                }
                out
            }
        }
    }
}

fn json_line(reported: &ReportedResult, index: usize) -> JsonLine<'_> {
    JsonLine {
        index,
        launcher: reported.launcher.as_deref(),
        result: &reported.result,
    }
}

fn launcher_label(reported: &ReportedResult) -> &str {
    reported.launcher.as_deref().unwrap_or("(global)")
}

fn format_result_tap(reported: &ReportedResult, index: usize) -> String {
    let result = &reported.result;
    let status = if result.passed { "ok" } else { "not ok" };
    let mut out = format!(
        "{status} {index} {} - {}",
        launcher_label(reported),
        result.name
    );

    if result.passed {
        return out;
    }

    out.push_str("\n    ---");
    if let Some(msg) = result.error_message() {
        out.push_str("\n        message: >");
        for line in msg.lines() {
            out.push_str(&format!("\n            {line}"));
        }
    }
    if !result.logs.is_empty() {
        out.push_str("\n        browser log: |");
        for entry in &result.logs {
            for line in entry.text.lines() {
                out.push_str(&format!("\n            {}: {line}", entry.kind));
            }
        }
    }
    out.push_str("\n    ...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestResult;

    fn reported(passed: bool) -> ReportedResult {
        let code = if passed { 0 } else { 1 };
        ReportedResult {
            launcher: Some("Node".to_string()),
            result: TestResult::from_process(0, "Node", None, Some(code), "", "oops\n"),
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("TAP"), Some(OutputFormat::Tap));
        assert_eq!(OutputFormat::from_str("json-pretty"), Some(OutputFormat::JsonPretty));
        assert_eq!(OutputFormat::from_str("csv"), None);
    }

    #[test]
    fn test_tap_failure_block() {
        let formatter = ResultFormatter::new(OutputFormat::Tap);
        let out = formatter.format_result(&reported(false), 2);
        assert!(out.starts_with("not ok 2 Node - Node"));
        assert!(out.contains("Non-zero exit code: 1"));
        assert!(out.contains("error: oops"));
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_table_without_color() {
        let formatter = ResultFormatter::new(OutputFormat::Table).no_color();
        let out = formatter.format_result(&reported(true), 1);
        assert!(out.contains("✓ PASS"));
        assert!(!out.contains("\x1b["));
    }

    #[test]
    fn test_json_line_is_flat() {
        let formatter = ResultFormatter::new(OutputFormat::Json);
        let out = formatter.format_result(&reported(true), 1);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["index"], 1);
        assert_eq!(value["launcher"], "Node");
        assert_eq!(value["passed"], true);
    }

    #[test]
    fn test_summary_counts() {
        let formatter = ResultFormatter::new(OutputFormat::Tap);
        let out = formatter.format_summary(&[reported(true), reported(false)], None);
        assert!(out.contains("1..2"));
        assert!(out.contains("# fail  1"));
    }
}
