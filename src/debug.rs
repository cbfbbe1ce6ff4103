//! Optional JSON-lines debug log for generation runs. One event per line,
//! plus saturating counters drained into a summary event at the end of a
//! run. Logging never fails the run; write errors are swallowed.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: BufWriter<File>,
    counters: HashMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: BufWriter::new(file),
                counters: HashMap::new(),
            })),
        })
    }

    /// Writes one event line, e.g.
    /// `{"type":"capture.page","page":"manifest","ms":"12"}`.
    pub fn event(&self, kind: &str, fields: &[(&str, String)]) {
        let mut json = format!("{{\"type\":\"{}\"", json_escape(kind));
        for (key, value) in fields {
            json.push_str(&format!(
                ",\"{}\":\"{}\"",
                json_escape(key),
                json_escape(value)
            ));
        }
        json.push('}');
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    /// Drains the counters into a `summary` event.
    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let mut counters: Vec<(String, u64)> = state.counters.drain().collect();
            counters.sort_by(|a, b| a.0.cmp(&b.0));
            let mut counts = String::from("{");
            for (idx, (key, value)) in counters.iter().enumerate() {
                if idx > 0 {
                    counts.push(',');
                }
                counts.push_str(&format!("\"{}\":{}", json_escape(key), value));
            }
            counts.push('}');
            let json = format!(
                "{{\"type\":\"summary\",\"context\":\"{}\",\"counts\":{}}}",
                json_escape(context),
                counts
            );
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_log(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("proofsheet_{}_{}.jsonl", name, std::process::id()))
    }

    #[test]
    fn events_and_summary_are_json_lines() {
        let path = temp_log("events");
        let logger = DebugLogger::new(&path).unwrap();
        logger.event("capture.page", &[("page", "manifest".to_string())]);
        logger.increment("resource.placeholder", 2);
        logger.increment("resource.placeholder", 1);
        logger.emit_summary("generate");
        logger.flush();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "{\"type\":\"capture.page\",\"page\":\"manifest\"}"
        );
        assert_eq!(
            lines[1],
            "{\"type\":\"summary\",\"context\":\"generate\",\"counts\":{\"resource.placeholder\":3}}"
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn summary_drains_counters() {
        let path = temp_log("drain");
        let logger = DebugLogger::new(&path).unwrap();
        logger.increment("guard.detach", 1);
        logger.emit_summary("first");
        logger.emit_summary("second");
        logger.flush();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].contains("\"guard.detach\":1"));
        assert!(lines[1].contains("\"counts\":{}"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn escape_handles_quotes_and_newlines() {
        assert_eq!(json_escape("a\"b"), "a\\\"b");
        assert_eq!(json_escape("line\nbreak\t"), "line\\nbreak\\t");
        assert_eq!(json_escape("back\\slash"), "back\\\\slash");
    }
}
