//! Run logs: per-invocation timing and per-object detail.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::detect::Detection;
use crate::labels::LabelMap;

/// Owns the timing and detail log writers.
///
/// Every record is flushed as soon as it is written, and whatever is buffered is
/// flushed again when the writer is dropped, so both logs are complete on every
/// exit path.
pub struct ReportWriter<W: Write> {
    timing: W,
    detail: W,
}

impl ReportWriter<BufWriter<File>> {
    /// Create (truncating) both log files.
    pub fn create<P: AsRef<Path>, Q: AsRef<Path>>(timing_path: P, detail_path: Q) -> Result<Self> {
        Ok(Self::from_writers(
            BufWriter::new(truncate(timing_path.as_ref())?),
            BufWriter::new(truncate(detail_path.as_ref())?),
        ))
    }
}

fn truncate(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

impl<W: Write> ReportWriter<W> {
    pub fn from_writers(timing: W, detail: W) -> Self {
        Self { timing, detail }
    }

    /// Append one invocation time in milliseconds.
    pub fn record_timing(&mut self, elapsed: Duration) -> Result<()> {
        writeln!(self.timing, "{:.2}", elapsed.as_secs_f64() * 1000.0)
            .context("failed to write timing log")?;
        self.timing.flush().context("failed to flush timing log")
    }

    /// Append one `label<TAB>id<TAB>score` line per detection, in order.
    ///
    /// The score is written at full precision (`0.9`, not `0.90`).
    /// Returns the number of lines written; an empty set writes nothing.
    pub fn record_detections(&mut self, detections: &[Detection], labels: &LabelMap) -> Result<usize> {
        if detections.is_empty() {
            log::info!("No objects detected");
            return Ok(0);
        }
        for det in detections {
            writeln!(
                self.detail,
                "{}\t{}\t{}",
                labels.resolve(det.class_id),
                det.class_id,
                det.score
            )
            .context("failed to write detail log")?;
            self.detail.flush().context("failed to flush detail log")?;
        }
        Ok(detections.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.timing.flush().context("failed to flush timing log")?;
        self.detail.flush().context("failed to flush detail log")
    }
}

impl<W: Write> Drop for ReportWriter<W> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("{:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;

    fn det(class_id: u32, score: f32) -> Detection {
        Detection {
            class_id,
            score,
            bbox: BBox::default(),
        }
    }

    #[test]
    fn detail_lines_follow_engine_order() -> Result<()> {
        let labels: LabelMap = [(0, "person".to_string())].into_iter().collect();
        let (mut timing, mut detail) = (Vec::new(), Vec::new());
        {
            let mut report = ReportWriter::from_writers(&mut timing, &mut detail);
            let written = report.record_detections(&[det(0, 0.9), det(5, 0.5)], &labels)?;
            assert_eq!(written, 2);
        }
        assert_eq!(String::from_utf8(detail)?, "person\t0\t0.9\n5\t5\t0.5\n");
        assert!(timing.is_empty());
        Ok(())
    }

    #[test]
    fn empty_detections_write_nothing() -> Result<()> {
        let (mut timing, mut detail) = (Vec::new(), Vec::new());
        {
            let mut report = ReportWriter::from_writers(&mut timing, &mut detail);
            assert_eq!(report.record_detections(&[], &LabelMap::empty())?, 0);
        }
        assert!(detail.is_empty());
        Ok(())
    }

    #[test]
    fn timing_is_written_in_milliseconds() -> Result<()> {
        let (mut timing, mut detail) = (Vec::new(), Vec::new());
        {
            let mut report = ReportWriter::from_writers(&mut timing, &mut detail);
            report.record_timing(Duration::from_micros(12_340))?;
            report.record_timing(Duration::from_millis(3))?;
        }
        assert_eq!(String::from_utf8(timing)?, "12.34\n3.00\n");
        Ok(())
    }

    #[test]
    fn log_files_are_truncated_on_create() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let timing = dir.path().join("fps.txt");
        let detail = dir.path().join("detail.txt");
        std::fs::write(&timing, "stale\n")?;
        std::fs::write(&detail, "stale\n")?;

        let mut report = ReportWriter::create(&timing, &detail)?;
        report.record_timing(Duration::from_millis(1))?;
        drop(report);

        assert_eq!(std::fs::read_to_string(&timing)?, "1.00\n");
        assert_eq!(std::fs::read_to_string(&detail)?, "");
        Ok(())
    }
}
