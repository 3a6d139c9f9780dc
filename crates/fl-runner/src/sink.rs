//! JSON-lines metrics file

use fl_orchestrator::{MetricsRecord, MetricsSink};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends one JSON object per record; flushed after every round
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        tracing::info!("Writing metrics to {:?}", path);
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::error!("Failed to flush metrics to {:?}: {}", self.path, e);
        }
    }
}

impl MetricsSink for JsonLinesSink {
    fn record(&self, record: MetricsRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize metrics record: {}", e);
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line) {
            tracing::error!("Failed to write metrics to {:?}: {}", self.path, e);
            return;
        }
        if !matches!(record, MetricsRecord::Attempt(_)) {
            if let Err(e) = writer.flush() {
                tracing::error!("Failed to flush metrics to {:?}: {}", self.path, e);
            }
        }
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        self.flush();
    }
}
