// --- File: src/training/history.rs ---

//! Per-epoch results of a run.

use super::{Result, TrainError};
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Result of one phase of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number
    pub epoch: usize,
    pub phase: Phase,
    /// Per-sample mean loss
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

/// Ordered list of epoch records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    records: Vec<EpochRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one phase, in epoch order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &EpochRecord> {
        self.records.iter().filter(move |r| r.phase == phase)
    }

    /// Loss curve of one phase.
    pub fn losses(&self, phase: Phase) -> Vec<f64> {
        self.phase(phase).map(|r| r.loss).collect()
    }

    /// Accuracy curve of one phase.
    pub fn accuracies(&self, phase: Phase) -> Vec<f64> {
        self.phase(phase).map(|r| r.accuracy).collect()
    }

    /// Record with the highest accuracy; the earliest wins ties.
    pub fn best(&self, phase: Phase) -> Option<&EpochRecord> {
        self.phase(phase)
            .fold(None, |best: Option<&EpochRecord>, r| match best {
                Some(b) if b.accuracy >= r.accuracy => Some(b),
                _ => Some(r),
            })
    }

    /// Writes the history as pretty JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let io_err = |source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Renders `epoch,phase,loss,accuracy,samples` rows for plotting.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("epoch,phase,loss,accuracy,samples\n");
        for r in &self.records {
            let _ = writeln!(out, "{},{},{:.6},{:.6},{}", r.epoch, r.phase, r.loss, r.accuracy, r.samples);
        }
        out
    }
}
