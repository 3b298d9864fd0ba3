//! Append-only JSONL event stream (`telemetry.jsonl`).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

pub struct TelemetryWriter {
    handle: BufWriter<File>,
}

impl TelemetryWriter {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { handle: BufWriter::new(file) })
    }

    pub fn log_event<T: Serialize>(&mut self, event: &T) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        self.handle.write_all(line.as_bytes())?;
        self.handle.write_all(b"\n")?;
        self.handle.flush()
    }
}

pub fn telemetry_path(run_dir: &Path) -> PathBuf {
    run_dir.join("telemetry.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_appended_as_jsonl() {
        let path = std::env::temp_dir().join("oddcrawler-telemetry-test.jsonl");
        let _ = std::fs::remove_file(&path);
        let mut writer = TelemetryWriter::open(&path).unwrap();
        writer.log_event(&json!({"event": "url_404", "url": "http://x.test/"})).unwrap();
        writer.log_event(&json!({"event": "error", "error_message": "boom"})).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
