//! Channel Output
//!
//! Line-oriented run output, one append-only file per channel inside the
//! run directory. Separate from `tracing` diagnostics.

use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{HarnessError, Result};

/// Named output destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Model,
    Debug,
    Statistics,
    LossTrain,
    LossTestNormal,
    LossTestSmoothed,
    WeightsSumTrain,
}

impl Channel {
    pub fn file_name(&self) -> &'static str {
        match self {
            Channel::Model => "model.log",
            Channel::Debug => "debug.log",
            Channel::Statistics => "statistics.csv",
            Channel::LossTrain => "loss_train.csv",
            Channel::LossTestNormal => "loss_test_normal.csv",
            Channel::LossTestSmoothed => "loss_test_smoothed.csv",
            Channel::WeightsSumTrain => "weights_sum_train.csv",
        }
    }

    /// CSV header written when the file is first created
    pub fn header(&self) -> Option<&'static str> {
        match self {
            Channel::Model | Channel::Debug => None,
            Channel::Statistics => {
                Some("epoch,pass,mean_loss,accuracy,samples,batches,elapsed_ms,accumulations")
            }
            Channel::LossTrain | Channel::LossTestNormal | Channel::LossTestSmoothed => {
                Some("epoch,batch,loss")
            }
            Channel::WeightsSumTrain => Some("epoch,batch,weight_sum"),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Channel::Model => "model",
            Channel::Debug => "debug",
            Channel::Statistics => "statistics-csv",
            Channel::LossTrain => "loss-train-csv",
            Channel::LossTestNormal => "loss-test-normal-csv",
            Channel::LossTestSmoothed => "loss-test-smoothed-csv",
            Channel::WeightsSumTrain => "weights-sum-train-csv",
        };
        write!(f, "{}", name)
    }
}

/// Sink accepting lines tagged with a channel
pub trait OutputSink: Send {
    fn line(&mut self, channel: Channel, text: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Buffered append-only files in a run directory
pub struct ChannelFiles {
    dir: PathBuf,
    writers: HashMap<Channel, BufWriter<File>>,
}

impl ChannelFiles {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writers: HashMap::new(),
        })
    }

    pub fn path_for(&self, channel: Channel) -> PathBuf {
        self.dir.join(channel.file_name())
    }

    fn writer(&mut self, channel: Channel) -> Result<&mut BufWriter<File>> {
        if !self.writers.contains_key(&channel) {
            let path = self.path_for(channel);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let fresh = file.metadata()?.len() == 0;
            let mut writer = BufWriter::new(file);
            if fresh {
                if let Some(header) = channel.header() {
                    writeln!(writer, "{}", header)?;
                }
            }
            self.writers.insert(channel, writer);
        }
        self.writers.get_mut(&channel).ok_or_else(|| {
            HarnessError::Runtime(format!("no writer for channel {}", channel))
        })
    }
}

impl OutputSink for ChannelFiles {
    fn line(&mut self, channel: Channel, text: &str) -> Result<()> {
        let writer = self.writer(channel)?;
        writeln!(writer, "{}", text)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for ChannelFiles {
    fn drop(&mut self) {
        let _ = OutputSink::flush(self);
    }
}

/// In-memory sink. Clones share the captured lines.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    lines: Arc<Mutex<Vec<(Channel, String)>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written to `channel`, in order
    pub fn lines_for(&self, channel: Channel) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| {
                lines
                    .iter()
                    .filter(|(c, _)| *c == channel)
                    .map(|(_, text)| text.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl OutputSink for MemoryOutput {
    fn line(&mut self, channel: Channel, text: &str) -> Result<()> {
        self.lines
            .lock()
            .map_err(|_| HarnessError::Runtime("output buffer lock poisoned".to_string()))?
            .push((channel, text.to_string()));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;
    use std::fs;

    #[test]
    fn test_channel_files_write_header_once() {
        let dir = temp_dir().join(format!("smoothing_output_{}", uuid::Uuid::new_v4()));
        {
            let mut files = ChannelFiles::new(&dir).unwrap();
            files.line(Channel::LossTrain, "0,0,1.5").unwrap();
            files.line(Channel::Model, "started").unwrap();
        }
        {
            let mut files = ChannelFiles::new(&dir).unwrap();
            files.line(Channel::LossTrain, "0,1,1.25").unwrap();
        }

        let csv = fs::read_to_string(dir.join("loss_train.csv")).unwrap();
        assert_eq!(csv, "epoch,batch,loss\n0,0,1.5\n0,1,1.25\n");
        let log = fs::read_to_string(dir.join("model.log")).unwrap();
        assert_eq!(log, "started\n");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_memory_output_filters_by_channel() {
        let output = MemoryOutput::new();
        let mut sink = output.clone();
        sink.line(Channel::Debug, "a").unwrap();
        sink.line(Channel::Model, "b").unwrap();
        sink.line(Channel::Debug, "c").unwrap();
        assert_eq!(output.lines_for(Channel::Debug), vec!["a", "c"]);
        assert_eq!(output.lines_for(Channel::Model), vec!["b"]);
    }
}
