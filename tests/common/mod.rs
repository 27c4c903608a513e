//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use smoothing_harness::config::{DataConfig, ModelConfig};
use smoothing_harness::coordination::CheckpointSignal;
use smoothing_harness::output::MemoryOutput;
use smoothing_harness::error::{HarnessError, Result};
use smoothing_harness::persistence::{Checkpoint, CheckpointService, MemoryStateStore, StateStore};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use smoothing_harness::smoothing::{build_smoothing, GateConfig, SmoothingConfig};
use smoothing_harness::toy::{Batch, GaussianBlobs, LogisticRegression};
use smoothing_harness::training::{BatchIter, DataSource, RunSettings, TrainingOrchestrator};

pub const SEED: u64 = 17;

/// 160 train samples in batches of 16: ten train batches, four test batches
pub fn data_config() -> DataConfig {
    DataConfig {
        features: 3,
        train_samples: 160,
        test_samples: 64,
        batch_size: 16,
        separation: 2.0,
        noise: 1.0,
    }
}

/// Gate that latches on the step-fraction ceiling alone
pub fn eager_gate(ceiling: f64) -> GateConfig {
    GateConfig {
        min_start_fraction: 0.0,
        max_start_fraction: ceiling,
        ..GateConfig::default()
    }
}

/// Toy dataset that can set a checkpoint signal or fail while a batch is fetched
pub struct Tripwire {
    pub inner: GaussianBlobs,
    pub signal: Option<CheckpointSignal>,
    /// (epoch, batch) of the train fetch that sets the signal
    pub train_trigger: Option<(usize, usize)>,
    /// (test pass of the epoch, batch) that sets the signal: 0 normal, 1 smoothed
    pub test_trigger: Option<(usize, usize)>,
    /// (epoch, batch) of the train fetch that fails
    pub fail_train_at: Option<(usize, usize)>,
    test_passes: Cell<usize>,
}

impl Tripwire {
    pub fn new() -> Self {
        Self {
            inner: GaussianBlobs::new(&data_config(), SEED),
            signal: None,
            train_trigger: None,
            test_trigger: None,
            fail_train_at: None,
            test_passes: Cell::new(0),
        }
    }

    pub fn trigger_train(mut self, signal: &CheckpointSignal, epoch: usize, batch: usize) -> Self {
        self.signal = Some(signal.clone());
        self.train_trigger = Some((epoch, batch));
        self
    }

    /// Fire in the first test pass that reaches `batch`
    pub fn trigger_test(mut self, signal: &CheckpointSignal, batch: usize) -> Self {
        self.signal = Some(signal.clone());
        self.test_trigger = Some((0, batch));
        self
    }

    /// Fire only in the second test pass, the one on smoothed weights
    pub fn trigger_smoothed_test(mut self, signal: &CheckpointSignal, batch: usize) -> Self {
        self.signal = Some(signal.clone());
        self.test_trigger = Some((1, batch));
        self
    }

    pub fn fail_train(mut self, epoch: usize, batch: usize) -> Self {
        self.fail_train_at = Some((epoch, batch));
        self
    }

    fn fire(&self) {
        if let Some(signal) = &self.signal {
            signal.trigger("tripwire");
        }
    }
}

impl DataSource for Tripwire {
    type Batch = Batch;

    fn train_batch_count(&self) -> usize {
        self.inner.train_batch_count()
    }

    fn test_batch_count(&self) -> usize {
        self.inner.test_batch_count()
    }

    fn train_batches(&self, epoch: usize, seed: u64) -> BatchIter<'_, Batch> {
        Box::new(
            self.inner
                .train_batches(epoch, seed)
                .enumerate()
                .map(move |(index, batch)| {
                    if self.train_trigger == Some((epoch, index)) {
                        self.fire();
                    }
                    if self.fail_train_at == Some((epoch, index)) {
                        anyhow::bail!("batch file {} unreadable", index);
                    }
                    batch
                }),
        )
    }

    fn test_batches(&self) -> BatchIter<'_, Batch> {
        let pass = self.test_passes.get();
        self.test_passes.set(pass + 1);
        Box::new(self.inner.test_batches().enumerate().map(move |(index, batch)| {
            if self.test_trigger == Some((pass, index)) {
                self.fire();
            }
            batch
        }))
    }
}

pub fn model() -> LogisticRegression {
    LogisticRegression::new(3, &ModelConfig::default(), SEED)
}

pub fn orchestrator(
    settings: RunSettings,
    smoothing: &SmoothingConfig,
    data: Tripwire,
    store: &MemoryStateStore,
    output: &MemoryOutput,
    signal: &CheckpointSignal,
) -> TrainingOrchestrator<LogisticRegression, Tripwire> {
    TrainingOrchestrator::new(
        settings,
        model(),
        data,
        build_smoothing(smoothing).unwrap(),
        CheckpointService::new(Box::new(store.clone())),
        Box::new(output.clone()),
    )
    .with_signal(signal.clone())
    .with_seed(SEED)
    .with_run_id("test-run")
}

/// Batch indices in an `epoch,batch,value` CSV channel
pub fn batch_indices(lines: &[String]) -> Vec<usize> {
    lines
        .iter()
        .filter_map(|line| line.split(',').nth(1))
        .filter_map(|index| index.parse().ok())
        .collect()
}

/// Memory store whose `nth` save of one key fails like a full disk
#[derive(Clone)]
pub struct FailingStore {
    pub inner: MemoryStateStore,
    key: &'static str,
    nth: usize,
    saves: Arc<AtomicUsize>,
}

impl FailingStore {
    pub fn new(inner: &MemoryStateStore, key: &'static str, nth: usize) -> Self {
        Self {
            inner: inner.clone(),
            key,
            nth,
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl StateStore for FailingStore {
    fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<()> {
        if key == self.key && self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            return Err(HarnessError::Runtime("disk full".to_string()));
        }
        self.inner.save(key, checkpoint)
    }

    fn load(&self, key: &str) -> Result<Option<Checkpoint>> {
        self.inner.load(key)
    }

    fn describe(&self) -> String {
        format!("failing({})", self.key)
    }
}
