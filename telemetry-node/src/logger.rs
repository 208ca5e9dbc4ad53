//! Storage logger — spec.md §4.5, grounded on
//! `original_source/ILTM_V4/DataLogger.h`.
//!
//! Runs on its own execution context. A volatile `active` flag gates the
//! run loop; `run` is meant to be spawned once and live for the process,
//! polling the flag the way the firmware's top-level loop parks when
//! inactive.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iltm_tlv::LogRecord;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

const BLOCK_SIZE: usize = 64;
const FLUSH_INTERVAL: Duration = Duration::from_millis(2000);
const IDLE_POLL: Duration = Duration::from_millis(100);
const EMPTY_BUS_YIELD: Duration = Duration::from_millis(10);

pub struct Logger {
    dir: PathBuf,
    prefix: String,
    active: Arc<AtomicBool>,
}

impl Logger {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self { dir: dir.into(), prefix: prefix.into(), active: Arc::new(AtomicBool::new(false)) }
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Scans `dir` for `<prefix><seq>.bin` files (any date prefix) and
    /// returns one past the maximum `seq` found. Directory scan failures
    /// default to 0, logged at `warn` — spec.md §4.5.
    async fn next_sequence(dir: &Path, prefix: &str) -> u32 {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "log directory scan failed, starting at seq 0");
                return 0;
            }
        };

        let mut max_seq: Option<u32> = None;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "log directory entry unreadable, stopping scan");
                    break;
                }
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(seq) = extract_sequence(&name, prefix) {
                max_seq = Some(max_seq.map_or(seq, |m| m.max(seq)));
            }
        }
        max_seq.map_or(0, |m| m + 1)
    }

    /// `now_us` is the disciplined clock's timestamp, not wall time — the
    /// log filename recipe uses the same clock as every `Sample`, per the
    /// resolution of spec.md's "which clock stamps the record" open
    /// question.
    fn filename(prefix: &str, seq: u32, now_us: u64) -> String {
        let secs = (now_us / 1_000_000) as i64;
        let nanos = ((now_us % 1_000_000) * 1000) as u32;
        let stamp = chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_default();
        format!("{}_{}{}.bin", stamp.format("%Y-%m-%d_%H-%M-%S"), prefix, seq)
    }

    /// Runs until the process exits: waits for activation, opens a fresh
    /// file, drains the bus into `BLOCK_SIZE` blocks flushed on full-block
    /// or 2000ms elapsed, and closes cleanly on deactivation.
    pub async fn run(&self, bus: crate::bus::SampleBusHandle, now_us: impl Fn() -> u64) {
        loop {
            if !self.active.load(Ordering::SeqCst) {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }

            let seq = Self::next_sequence(&self.dir, &self.prefix).await;
            let path = self.dir.join(Self::filename(&self.prefix, seq, now_us()));
            let mut file = match tokio::fs::File::create(&path).await {
                Ok(file) => file,
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to open log file, will retry next activation");
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
            };

            let mut block: Vec<LogRecord> = Vec::with_capacity(BLOCK_SIZE);
            let mut last_flush = tokio::time::Instant::now();

            while self.active.load(Ordering::SeqCst) {
                match bus.pop().await {
                    Some(sample) => block.push(LogRecord::from_sample(&sample)),
                    None => tokio::time::sleep(EMPTY_BUS_YIELD).await,
                }

                let due = block.len() >= BLOCK_SIZE || (!block.is_empty() && last_flush.elapsed() >= FLUSH_INTERVAL);
                if due {
                    if let Err(err) = flush_block(&mut file, &mut block).await {
                        error!(path = %path.display(), error = %err, "log write failed, closing session");
                        break;
                    }
                    last_flush = tokio::time::Instant::now();
                }
            }

            if let Err(err) = flush_block(&mut file, &mut block).await {
                error!(path = %path.display(), error = %err, "log write failed on shutdown flush");
            }
        }
    }
}

async fn flush_block(file: &mut tokio::fs::File, block: &mut Vec<LogRecord>) -> std::io::Result<()> {
    if block.is_empty() {
        return Ok(());
    }
    let bytes: &[u8] = bytemuck::cast_slice(block);
    file.write_all(bytes).await?;
    block.clear();
    Ok(())
}

fn extract_sequence(filename: &str, prefix: &str) -> Option<u32> {
    let stem = filename.strip_suffix(".bin")?;
    let marker = format!("_{prefix}");
    let idx = stem.rfind(&marker)?;
    stem[idx + marker.len()..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use iltm_tlv::Sample;

    #[test]
    fn extract_sequence_parses_trailing_number() {
        assert_eq!(extract_sequence("2026-01-01_00-00-00_log3.bin", "log"), Some(3));
        assert_eq!(extract_sequence("2026-01-01_00-00-00_log0.bin", "log"), Some(0));
        assert_eq!(extract_sequence("not-a-log-file.bin", "log"), None);
    }

    #[tokio::test]
    async fn next_sequence_is_one_past_the_max_found() {
        let dir = std::env::temp_dir().join(format!("iltm-log-{:p}", &0u8));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("2026-01-01_00-00-00_log0.bin"), b"").await.unwrap();
        tokio::fs::write(dir.join("2026-01-01_00-00-01_log3.bin"), b"").await.unwrap();

        let next = Logger::next_sequence(&dir, "log").await;
        assert_eq!(next, 4);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn next_sequence_defaults_to_zero_on_missing_directory() {
        let next = Logger::next_sequence(Path::new("/nonexistent/iltm-log-dir"), "log").await;
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn flush_block_writes_packed_records_and_clears() {
        let dir = std::env::temp_dir().join(format!("iltm-flush-{:p}", &0u8));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("out.bin");
        let mut file = tokio::fs::File::create(&path).await.unwrap();

        let mut block = vec![LogRecord::from_sample(&Sample { timestamp: 6_001_000, id: 5, value: 1.5 })];
        flush_block(&mut file, &mut block).await.unwrap();
        assert!(block.is_empty());
        drop(file);

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(bytes.len(), 9);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
