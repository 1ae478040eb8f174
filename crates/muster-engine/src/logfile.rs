use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use muster_core::Result;

/// Rotate once the active file passes this size.
const MAX_LOG_BYTES: u64 = 1024 * 1024;

/// Per-agent rotating log: `<log_root>/<agent_id>/agent.log`, two
/// generations (`agent.log` and `agent.log.1`). The engine writes turn
/// events here; the supervisor serves `logs <spec_id>` from the tail.
pub struct AgentLog {
    path: PathBuf,
    rotated_path: PathBuf,
    file: Mutex<File>,
}

impl AgentLog {
    pub fn open(log_root: &Path, agent_id: &str) -> Result<Self> {
        let dir = log_root.join(agent_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("agent.log");
        let rotated_path = dir.join("agent.log.1");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            rotated_path,
            file: Mutex::new(file),
        })
    }

    /// Append one timestamped line, rotating first when the file is full.
    pub fn line(&self, message: &str) {
        let stamp = chrono::Utc::now().to_rfc3339();
        let mut file = self.file.lock();
        if let Ok(meta) = file.metadata() {
            if meta.len() > MAX_LOG_BYTES {
                if let Ok(rotated) = self.rotate() {
                    *file = rotated;
                }
            }
        }
        let _ = writeln!(file, "{stamp} {message}");
    }

    fn rotate(&self) -> Result<File> {
        std::fs::rename(&self.path, &self.rotated_path)?;
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?)
    }

    /// Last `n` lines of the active generation.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let Ok(file) = File::open(&self.path) else {
            return vec![];
        };
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .map_while(|l| l.ok())
            .collect();
        let skip = lines.len().saturating_sub(n);
        lines.into_iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_tails() {
        let dir = tempfile::tempdir().unwrap();
        let log = AgentLog::open(dir.path(), "a1").unwrap();
        for i in 0..5 {
            log.line(&format!("event {i}"));
        }
        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert!(tail[1].ends_with("event 4"));
        assert!(dir.path().join("a1").join("agent.log").exists());
    }
}
