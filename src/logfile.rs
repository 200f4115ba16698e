//! Numbered per-run transcript logs.
//!
//! Pass-2 and the inference engine each keep a human-readable transcript of
//! every prompt and response (`llminference_0000.log`,
//! `userinference_0000.log`, …), numbered to the first free slot under the
//! configured log directory. Transcript writes never fail the pipeline;
//! `tracing` carries the operational signal.

use anyhow::{bail, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct RunLog {
    file: std::fs::File,
    path: PathBuf,
}

impl RunLog {
    /// Create `<dir>/<prefix>_NNNN.log` at the first free NNNN in 0..=9999.
    pub fn create(dir: &Path, prefix: &str) -> Result<RunLog> {
        std::fs::create_dir_all(dir)?;
        for i in 0..=9999u32 {
            let path = dir.join(format!("{}_{:04}.log", prefix, i));
            if !path.exists() {
                let file = std::fs::File::create(&path)?;
                return Ok(RunLog { file, path });
            }
        }
        bail!("no available log file names under {}", dir.display());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn section(&mut self, title: &str) {
        let _ = writeln!(self.file, "\n=== {} ===", title);
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.file, "{}", text.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbering_advances() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = RunLog::create(dir.path(), "llminference").unwrap();
        let second = RunLog::create(dir.path(), "llminference").unwrap();
        assert!(first.path().ends_with("llminference_0000.log"));
        assert!(second.path().ends_with("llminference_0001.log"));
    }

    #[test]
    fn test_sections_and_lines_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut log = RunLog::create(dir.path(), "userinference").unwrap();
        log.section("Prompt");
        log.line("hello");
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("=== Prompt ==="));
        assert!(content.contains("hello"));
    }
}
