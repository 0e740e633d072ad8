use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Timestamped run log, mirrored to the console and an append-only file.
pub struct RunLog {
    file: Option<File>,
}

impl RunLog {
    /// Open (or create) the log file, truncating unless `append`.
    pub fn open(path: &Path, append: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Ok(Self { file: Some(file) })
    }

    /// Console-only log, for commands that do not keep a log file.
    pub fn console_only() -> Self {
        Self { file: None }
    }

    pub fn info(&mut self, message: &str) {
        self.write("INFO", message);
    }

    pub fn warn(&mut self, message: &str) {
        self.write("WARNING", message);
    }

    pub fn error(&mut self, message: &str) {
        self.write("ERROR", message);
    }

    fn write(&mut self, level: &str, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{stamp}] {level}: {message}");
        println!("{line}");
        if let Some(file) = self.file.as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_lines_reach_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sweep.log");
        let mut log = RunLog::open(&path, false).unwrap();
        log.info("starting");
        log.error("boom");
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("INFO: starting"));
        assert!(contents.contains("ERROR: boom"));
    }

    #[test]
    fn append_mode_keeps_previous_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sweep.log");
        RunLog::open(&path, false).unwrap().info("first");
        RunLog::open(&path, true).unwrap().info("second");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
    }
}
