//! Training Orchestrator
//!
//! Runs the epoch loop: train pass, normal test pass, smoothed test pass.
//! Every batch loop polls the checkpoint signal before doing per-batch
//! work. On a set signal the loop records where it stopped, the run
//! saves every stateful object and returns `RunOutcome::Interrupted`.

use std::time::Instant;
use tracing::{debug, info, warn};

use super::collaborators::{DataSource, Model};
use super::context::{EpochContext, EpochPhase};
use super::resume::SubLoop;
use super::snapshot::{ModelSnapshot, SmoothingSnapshot};
use super::statistics::{PassSummary, RunStatistics};
use crate::config::HarnessConfig;
use crate::coordination::CheckpointSignal;
use crate::error::{HarnessError, Result};
use crate::output::{Channel, OutputSink};
use crate::persistence::CheckpointService;
use crate::smoothing::Smoothing;

/// Loop policy taken from the run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub epochs: usize,
    pub train: bool,
    pub test: bool,
    /// 1-based epochs that run the test passes; empty means every epoch
    pub test_at_epochs: Vec<usize>,
    /// End the train pass once the smoothing estimate converged
    pub stop_on_convergence: bool,
    /// Save all state every N completed epochs, 0 disables
    pub checkpoint_every_epochs: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            epochs: 1,
            train: true,
            test: true,
            test_at_epochs: Vec::new(),
            stop_on_convergence: false,
            checkpoint_every_epochs: 0,
        }
    }
}

impl From<&HarnessConfig> for RunSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            epochs: config.run.epochs,
            train: config.run.train,
            test: config.run.test,
            test_at_epochs: config.run.test_at_epochs.clone(),
            stop_on_convergence: config.run.stop_on_convergence,
            checkpoint_every_epochs: config.checkpoint.every_epochs,
        }
    }
}

impl RunSettings {
    pub fn should_test(&self, epoch: usize) -> bool {
        self.test && (self.test_at_epochs.is_empty() || self.test_at_epochs.contains(&(epoch + 1)))
    }
}

/// How a call to [`TrainingOrchestrator::run`] ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every epoch finished
    Completed(RunStatistics),
    /// Stopped by the checkpoint signal; all state was saved
    Interrupted {
        epoch: usize,
        phase: EpochPhase,
        index: usize,
    },
}

enum PassExit {
    Completed,
    Interrupted { index: usize },
}

pub struct TrainingOrchestrator<M, D>
where
    M: Model,
    D: DataSource<Batch = M::Batch>,
{
    settings: RunSettings,
    model: M,
    data: D,
    smoothing: Box<dyn Smoothing>,
    checkpoints: CheckpointService,
    output: Box<dyn OutputSink>,
    signal: CheckpointSignal,
    ctx: EpochContext,
    stats: RunStatistics,
}

impl<M, D> TrainingOrchestrator<M, D>
where
    M: Model,
    D: DataSource<Batch = M::Batch>,
{
    pub fn new(
        settings: RunSettings,
        model: M,
        data: D,
        smoothing: Box<dyn Smoothing>,
        checkpoints: CheckpointService,
        output: Box<dyn OutputSink>,
    ) -> Self {
        let (max_train, max_test) = Self::expected_steps(&settings, &data);
        let stats = RunStatistics::new(uuid::Uuid::new_v4().to_string(), smoothing.kind().as_str());
        Self {
            settings,
            model,
            data,
            smoothing,
            checkpoints,
            output,
            signal: CheckpointSignal::new(),
            ctx: EpochContext::new(0, max_train, max_test),
            stats,
        }
    }

    pub fn with_signal(mut self, signal: CheckpointSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Seed for the per-epoch data order of a fresh run
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ctx.seed = seed;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.stats.run_id = run_id.into();
        self
    }

    fn expected_steps(settings: &RunSettings, data: &D) -> (usize, usize) {
        let train = if settings.train {
            settings.epochs * data.train_batch_count()
        } else {
            0
        };
        let test_epochs = (0..settings.epochs)
            .filter(|e| settings.should_test(*e))
            .count();
        (train, test_epochs * data.test_batch_count())
    }

    pub fn context(&self) -> &EpochContext {
        &self.ctx
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn smoothing(&self) -> &dyn Smoothing {
        self.smoothing.as_ref()
    }

    /// Load persisted state. Returns false when there is nothing to resume.
    ///
    /// Every object must come from the set committed by the last
    /// `progress` write; a partial save is an error, not a fresh start.
    pub fn restore(&mut self) -> Result<bool> {
        let Some(generation) = self.checkpoints.committed_generation("progress")? else {
            info!("No saved progress in {}, starting fresh", self.checkpoints.location());
            return Ok(false);
        };
        self.checkpoints
            .restore_generation(&mut self.ctx, &generation)?;
        self.checkpoints
            .restore_generation(&mut SmoothingSnapshot(self.smoothing.as_mut()), &generation)?;
        self.checkpoints
            .restore_generation(&mut ModelSnapshot(&mut self.model), &generation)?;
        self.checkpoints
            .restore_generation(&mut self.stats, &generation)?;

        let (max_train, max_test) = Self::expected_steps(&self.settings, &self.data);
        if max_train != self.ctx.max_train_steps {
            warn!(
                "Expected train steps changed from {} to {}, smoothing fractions follow the new total",
                self.ctx.max_train_steps, max_train
            );
        }
        self.ctx.max_train_steps = max_train;
        self.ctx.max_test_steps = max_test;

        info!(
            "Resuming run {} at epoch {} ({} train steps done, {} accumulations)",
            self.stats.run_id,
            self.ctx.epoch,
            self.ctx.train_steps,
            self.smoothing.accumulation_count()
        );
        Ok(true)
    }

    /// Drive the epoch loop until every epoch is done or the signal is set
    pub fn run(&mut self) -> Result<RunOutcome> {
        if self.ctx.finished {
            info!("Run {} already finished, nothing to do", self.stats.run_id);
            return Ok(RunOutcome::Completed(self.stats.clone()));
        }

        self.smoothing
            .bind_parameter_shapes(&self.model.named_weights())?;
        self.output.line(
            Channel::Model,
            &format!(
                "Run {} at epoch {}/{} with {} smoothing (seed {})",
                self.stats.run_id,
                self.ctx.epoch,
                self.settings.epochs,
                self.smoothing.kind(),
                self.ctx.seed
            ),
        )?;

        while self.ctx.epoch < self.settings.epochs {
            let epoch = self.ctx.epoch;
            debug!("Epoch {} phase {}", epoch, EpochPhase::BeforeEpoch);
            if self.signal.is_set() {
                return self.interrupt(EpochPhase::BeforeEpoch, 0);
            }

            if self.settings.train {
                if let PassExit::Interrupted { index } = self.train_pass()? {
                    return self.interrupt(EpochPhase::Training, index);
                }
            }

            if self.settings.should_test(epoch) {
                if let PassExit::Interrupted { index } = self.test_pass(SubLoop::TestNormal)? {
                    return self.interrupt(EpochPhase::TestingNormal, index);
                }
                if let PassExit::Interrupted { index } = self.smoothed_test_pass()? {
                    return self.interrupt(EpochPhase::TestingSmoothed, index);
                }
            } else {
                debug!("Epoch {}: test passes not scheduled", epoch);
            }

            debug!("Epoch {} phase {}", epoch, EpochPhase::EpochComplete);
            self.ctx.tracker.clear();
            self.model.scheduler_step(epoch);
            self.stats.epoch_mut(epoch).accumulations = self.smoothing.accumulation_count();
            self.ctx.epoch += 1;
            self.output.flush()?;

            let every = self.settings.checkpoint_every_epochs;
            if every > 0 && self.ctx.epoch % every == 0 && self.ctx.epoch < self.settings.epochs {
                info!("Periodic checkpoint after epoch {}", epoch);
                self.save_all()?;
            }
        }

        self.ctx.finished = true;
        self.stats.finished_at = Some(chrono::Utc::now());
        self.output.line(
            Channel::Model,
            &format!(
                "Run {} finished after {} epochs, {} accumulations",
                self.stats.run_id,
                self.settings.epochs,
                self.smoothing.accumulation_count()
            ),
        )?;
        self.save_all()?;
        info!("Run {} finished", self.stats.run_id);
        Ok(RunOutcome::Completed(self.stats.clone()))
    }

    fn interrupt(&mut self, phase: EpochPhase, index: usize) -> Result<RunOutcome> {
        let epoch = self.ctx.epoch;
        info!(
            "Checkpointing: stopped in {} at epoch {}, batch {}",
            phase, epoch, index
        );
        debug!("Epoch {} phase {}", epoch, EpochPhase::Checkpointing);
        self.output.line(
            Channel::Model,
            &format!("Interrupted in {} at epoch {}, batch {}", phase, epoch, index),
        )?;
        self.save_all()?;
        Ok(RunOutcome::Interrupted {
            epoch,
            phase,
            index,
        })
    }

    /// Persist smoothing, model, statistics and finally progress, which
    /// commits the set
    pub fn save_all(&mut self) -> Result<()> {
        self.output.flush()?;
        self.checkpoints.checkpoint_all(&[
            &SmoothingSnapshot(self.smoothing.as_mut()),
            &ModelSnapshot(&mut self.model),
            &self.stats,
            &self.ctx,
        ])?;
        Ok(())
    }

    fn train_pass(&mut self) -> Result<PassExit> {
        let Some(start) = self.ctx.tracker.decide(SubLoop::Train) else {
            return Ok(PassExit::Completed);
        };
        let epoch = self.ctx.epoch;
        let seed = self.ctx.seed;
        let total = self.data.train_batch_count();
        debug!(
            "Epoch {} phase {} from batch {}/{}",
            epoch,
            EpochPhase::Training,
            start,
            total
        );

        let mut tally = self.ctx.take_tally(SubLoop::Train);
        let began = Instant::now();
        self.model.set_training(true);

        for (index, batch) in self.data.train_batches(epoch, seed).enumerate().skip(start) {
            let batch = batch.map_err(|e| HarnessError::collaborator("train data", epoch, index, e))?;

            if self.signal.is_set() {
                tally.elapsed_ms += began.elapsed().as_millis() as u64;
                self.ctx.tracker.imprint(SubLoop::Train, index, false);
                self.ctx.pass_tally = Some(tally);
                return Ok(PassExit::Interrupted { index });
            }
            self.ctx.train_steps += 1;

            let output = self
                .model
                .forward(&batch)
                .map_err(|e| HarnessError::collaborator("forward", epoch, index, e))?;
            let loss = self
                .model
                .compute_loss(&output, &batch)
                .map_err(|e| HarnessError::collaborator("loss", epoch, index, e))?;
            self.model
                .backward_and_step()
                .map_err(|e| HarnessError::collaborator("train step", epoch, index, e))?;
            let score = self.model.score(&output, &batch);
            tally.record(loss, score.correct, score.samples);
            self.output
                .line(Channel::LossTrain, &format!("{},{},{}", epoch, index, loss))?;

            let weights = self.model.named_weights();
            if !self.smoothing.accumulate(loss, &weights, &self.ctx)? {
                continue;
            }

            let count = self.smoothing.accumulation_count();
            if !self.ctx.first_smoothing_success {
                self.ctx.first_smoothing_success = true;
                info!("Smoothing started at epoch {}, batch {}", epoch, index);
                self.output.line(
                    Channel::Model,
                    &format!("Smoothing started at epoch {}, batch {}", epoch, index),
                )?;
            } else {
                self.output.line(
                    Channel::Debug,
                    &format!("Smoothing accumulated at epoch {}, batch {} ({} total)", epoch, index, count),
                )?;
            }
            if let Some(estimate) = self.smoothing.current_estimate() {
                self.output.line(
                    Channel::WeightsSumTrain,
                    &format!("{},{},{}", epoch, index, estimate.abs_sum()),
                )?;
            }

            if self.smoothing.is_converged(&self.ctx) {
                let summary = self.stats.epoch_mut(epoch);
                if !summary.converged {
                    summary.converged = true;
                    info!("Smoothing converged at epoch {}, batch {}", epoch, index);
                    self.output.line(
                        Channel::Model,
                        &format!("Smoothing converged at epoch {}, batch {}", epoch, index),
                    )?;
                }
                if self.settings.stop_on_convergence {
                    info!("Ending train pass early at batch {}", index);
                    break;
                }
            }
        }

        tally.elapsed_ms += began.elapsed().as_millis() as u64;
        self.ctx.tracker.imprint(SubLoop::Train, total, true);
        let summary = PassSummary::from(&tally);
        self.report_pass(epoch, SubLoop::Train, &summary)?;
        if let Some(recent) = self.smoothing.recent_loss() {
            debug!("Epoch {} smoothing loss window mean {:.6}", epoch, recent);
        }
        let entry = self.stats.epoch_mut(epoch);
        entry.train = Some(summary);
        entry.accumulations = self.smoothing.accumulation_count();
        Ok(PassExit::Completed)
    }

    fn test_pass(&mut self, sub_loop: SubLoop) -> Result<PassExit> {
        let Some(start) = self.ctx.tracker.decide(sub_loop) else {
            return Ok(PassExit::Completed);
        };
        let epoch = self.ctx.epoch;
        let total = self.data.test_batch_count();
        let channel = match sub_loop {
            SubLoop::TestSmoothed => Channel::LossTestSmoothed,
            _ => Channel::LossTestNormal,
        };
        debug!(
            "Epoch {} phase {} from batch {}/{}",
            epoch,
            EpochPhase::from(sub_loop),
            start,
            total
        );

        let mut tally = self.ctx.take_tally(sub_loop);
        let began = Instant::now();
        self.model.set_training(false);

        for (index, batch) in self.data.test_batches().enumerate().skip(start) {
            let batch = batch.map_err(|e| HarnessError::collaborator("test data", epoch, index, e))?;

            if self.signal.is_set() {
                tally.elapsed_ms += began.elapsed().as_millis() as u64;
                self.ctx.tracker.imprint(sub_loop, index, false);
                self.ctx.pass_tally = Some(tally);
                return Ok(PassExit::Interrupted { index });
            }
            self.ctx.test_steps += 1;

            let output = self
                .model
                .forward(&batch)
                .map_err(|e| HarnessError::collaborator("test forward", epoch, index, e))?;
            let loss = self
                .model
                .compute_loss(&output, &batch)
                .map_err(|e| HarnessError::collaborator("test loss", epoch, index, e))?;
            let score = self.model.score(&output, &batch);
            tally.record(loss, score.correct, score.samples);
            self.output
                .line(channel, &format!("{},{},{}", epoch, index, loss))?;
        }

        tally.elapsed_ms += began.elapsed().as_millis() as u64;
        self.ctx.tracker.imprint(sub_loop, total, true);
        let summary = PassSummary::from(&tally);
        self.report_pass(epoch, sub_loop, &summary)?;
        let entry = self.stats.epoch_mut(epoch);
        match sub_loop {
            SubLoop::TestSmoothed => entry.test_smoothed = Some(summary),
            _ => entry.test_normal = Some(summary),
        }
        Ok(PassExit::Completed)
    }

    /// Test with the smoothed estimate loaded, then put the trained weights back
    fn smoothed_test_pass(&mut self) -> Result<PassExit> {
        let epoch = self.ctx.epoch;
        let Some(estimate) = self.smoothing.current_estimate() else {
            info!("Epoch {}: smoothing not ready, skipping smoothed test", epoch);
            self.output.line(
                Channel::Debug,
                &format!("Epoch {}: smoothing not ready, smoothed test skipped", epoch),
            )?;
            return Ok(PassExit::Completed);
        };

        let trained = self.model.named_weights();
        self.model
            .set_named_weights(&estimate)
            .map_err(|e| HarnessError::collaborator("load smoothed weights", epoch, 0, e))?;

        let result = self.test_pass(SubLoop::TestSmoothed);
        let restored = self
            .model
            .set_named_weights(&trained)
            .map_err(|e| HarnessError::collaborator("restore trained weights", epoch, 0, e));

        let exit = result?;
        restored?;
        Ok(exit)
    }

    fn report_pass(&mut self, epoch: usize, sub_loop: SubLoop, summary: &PassSummary) -> Result<()> {
        info!(
            "Epoch {} {}: loss {:.6}, accuracy {:.4} over {} samples ({} ms)",
            epoch, sub_loop, summary.mean_loss, summary.accuracy, summary.samples, summary.elapsed_ms
        );
        self.output.line(
            Channel::Statistics,
            &format!(
                "{},{},{},{},{},{},{},{}",
                epoch,
                sub_loop,
                summary.mean_loss,
                summary.accuracy,
                summary.samples,
                summary.batches,
                summary.elapsed_ms,
                self.smoothing.accumulation_count()
            ),
        )
    }
}
