//! Tolerant newline-delimited JSON parsing.
//!
//! A malformed line is logged and dropped; it never aborts the rest of the
//! object.

use serde_json::Value;

use crate::models::LogRecord;

/// Records parsed from one log object.
#[derive(Debug, Default)]
pub struct ParsedLog {
    /// Successfully parsed records, in file order.
    pub records: Vec<LogRecord>,
    /// Non-blank lines that were not valid JSON objects.
    pub skipped_lines: usize,
}

/// Parse decompressed log bytes into records.
///
/// Invalid UTF-8 is replaced rather than rejected. Blank lines are ignored.
/// Lines that fail to parse, or parse to something other than a JSON
/// object, are counted in [`ParsedLog::skipped_lines`] and logged at `warn`.
pub fn parse_log_lines(data: &[u8]) -> ParsedLog {
    let text = String::from_utf8_lossy(data);
    let mut parsed = ParsedLog::default();

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => parsed.records.push(LogRecord::new(map)),
            Ok(_) => {
                tracing::warn!(line, "Skipping log line that is not a JSON object");
                parsed.skipped_lines += 1;
            }
            Err(e) => {
                tracing::warn!(line, error = %e, "Failed to parse log line");
                parsed.skipped_lines += 1;
            }
        }
    }

    parsed
}
