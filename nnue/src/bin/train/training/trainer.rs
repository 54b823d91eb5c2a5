use candle_core::Device;
use candle_nn::VarMap;
use nnue::checkpoint::{self, TrainingState};
use nnue::config::ModelConfig;
use nnue::network::EvaluatorModel;
use nnue::optimizer::{ClampedAdam, LrSchedule, ParamsAdam};
use nnue::run::RunDirectory;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::args::{Args, ScheduleKind};
use crate::dataset::{DataSource, Dataset};
use crate::training::evaluation::evaluate;
use crate::training::history::{LossHistory, LOSS_HISTORY};
use crate::training::metrics::MetricsTracker;
use crate::training::progress::TrainingProgressBar;
use crate::utils::device::select_device;
use crate::utils::loss::wdl_mse;

pub struct Trainer {
    model: EvaluatorModel,
    optimizer: ClampedAdam,
    varmap: VarMap,
    device: Device,
    run: RunDirectory,
    stop: Arc<AtomicBool>,
    metrics: MetricsTracker,
    history: LossHistory,
    start_superbatch: usize,
    superbatches: usize,
    batch_size: usize,
    workers: usize,
    initial_lr: f64,
    schedule: LrSchedule,
}

impl Trainer {
    pub fn new(
        args: &Args,
        config: &ModelConfig,
        run: RunDirectory,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, Box<dyn Error>> {
        let device = select_device(args.cpu)?;

        let (model, varmap) = EvaluatorModel::with_varmap(config, &device)?;
        let mut optimizer = ClampedAdam::new(
            model.parameter_groups(&varmap)?,
            ParamsAdam {
                lr: args.learning_rate,
                weight_decay: args.weight_decay,
                ..Default::default()
            },
        )?;
        // Random initialization can start outside the quantizable range
        optimizer.clamp_parameters()?;

        let mut metrics = MetricsTracker::new(args.patience);
        let mut start_superbatch = 1;

        if args.resume {
            let state = checkpoint::load(&run.latest_checkpoint(), &varmap, &mut optimizer)?;
            log::info!(
                "Resuming after superbatch {} (step {}, lr {:.3e}, best val loss {:.6})",
                state.epoch,
                optimizer.step_count(),
                optimizer.learning_rate(),
                state.best_loss
            );
            start_superbatch = state.epoch + 1;
            metrics = MetricsTracker::resume(args.patience, state.best_loss);
        }
        if let Some(start) = args.start_superbatch {
            log::info!("Starting at superbatch {}", start);
            start_superbatch = start.max(1);
        }

        let schedule = match args.lr_schedule {
            ScheduleKind::Step => LrSchedule::StepDecay {
                decay: args.lr_decay,
            },
            ScheduleKind::Cosine => LrSchedule::CosineDecay {
                final_lr: args.final_lr,
                final_superbatch: args.superbatches,
            },
        };

        let history = LossHistory::load(&run.file_path(LOSS_HISTORY))?;

        Ok(Self {
            model,
            optimizer,
            varmap,
            device,
            run,
            stop,
            metrics,
            history,
            start_superbatch,
            superbatches: args.superbatches,
            batch_size: args.batch_size.max(1),
            workers: args.workers,
            initial_lr: args.learning_rate,
            schedule,
        })
    }

    pub fn train(&mut self, data: &mut DataSource) -> Result<(), Box<dyn Error>> {
        for superbatch in self.start_superbatch..=self.superbatches {
            let Some(dataset) = data.superbatch(superbatch)? else {
                log::info!("Out of data before superbatch {}", superbatch);
                break;
            };

            self.optimizer.apply_schedule(&self.schedule, self.initial_lr, superbatch);

            let Some((train_loss, val_loss)) = self.train_superbatch(superbatch, dataset)? else {
                log::info!("Training interrupted during superbatch {}", superbatch);
                return Ok(());
            };

            self.record_superbatch(superbatch, train_loss, val_loss)?;

            if self.metrics.should_stop() {
                log::info!("Early stopping after {} superbatches", superbatch);
                break;
            }
            if self.stop.load(Ordering::Relaxed) {
                log::info!("Stopping after superbatch {}", superbatch);
                return Ok(());
            }
        }

        if let Some(dataset) = data.last() {
            self.test_model(dataset)?;
        }

        Ok(())
    }

    /// Writes the latest checkpoint every superbatch and the best checkpoint
    /// plus its export on improvement, then appends to the loss history.
    /// Returns whether validation loss improved.
    fn record_superbatch(
        &mut self,
        superbatch: usize,
        train_loss: f32,
        val_loss: f32,
    ) -> Result<bool, Box<dyn Error>> {
        let did_improve = self.metrics.update(val_loss);

        let state = TrainingState {
            epoch: superbatch,
            last_loss: val_loss,
            best_loss: self.metrics.best_val_loss(),
        };
        checkpoint::save(
            &self.run.latest_checkpoint(),
            &self.varmap,
            &self.optimizer,
            &state,
        )?;

        if did_improve {
            self.save_best(&state)?;
        }

        self.history.push(superbatch, train_loss, val_loss);
        self.history.save(&self.run.file_path(LOSS_HISTORY))?;

        Ok(did_improve)
    }

    /// Returns `None` when a stop was requested mid-superbatch.
    fn train_superbatch(
        &mut self,
        superbatch: usize,
        dataset: &mut Dataset,
    ) -> Result<Option<(f32, f32)>, Box<dyn Error>> {
        let loader = dataset.train_loader(self.batch_size, self.workers);
        let num_batches = loader.num_samples().div_ceil(self.batch_size);

        let progress =
            TrainingProgressBar::new(superbatch, num_batches, self.optimizer.learning_rate())?;

        let mut batches_processed = 0;
        let mut total_loss = 0.0;
        let mut train_loss = 0.0;

        for batch in loader {
            if self.stop.load(Ordering::Relaxed) {
                progress.abandon();
                return Ok(None);
            }
            if batch.is_empty() {
                continue;
            }

            let (white, black, stm, targets) = batch.to_tensors(&self.device)?;
            let preds = self.model.forward_wdl(&white, &black, &stm)?;
            let loss = wdl_mse(&preds, &targets)?;

            self.optimizer.backward_step(&loss)?;

            let loss_val = loss.to_vec0::<f32>()?;
            total_loss += loss_val;
            batches_processed += 1;

            train_loss = total_loss / batches_processed as f32;
            progress.update(train_loss);
        }

        // Evaluate on validation set
        let val_loader = dataset.val_loader(self.batch_size, self.workers);
        let val_loss = if val_loader.num_samples() == 0 {
            train_loss
        } else {
            evaluate(&self.model, val_loader, &self.device)?
        };

        progress.finish(train_loss, val_loss);

        Ok(Some((train_loss, val_loss)))
    }

    /// Best checkpoint plus the quantized network exported from it.
    fn save_best(&self, state: &TrainingState) -> Result<(), Box<dyn Error>> {
        checkpoint::save(
            &self.run.best_checkpoint(),
            &self.varmap,
            &self.optimizer,
            state,
        )?;

        let exported = self.model.export_quantized()?;
        exported.write_atomic(&self.run.best_network())?;

        log::info!(
            "New best val loss {:.6}, exported {} ({} bytes, {} saturated values)",
            state.best_loss,
            self.run.best_network().display(),
            exported.bytes.len(),
            exported.overflow_total()
        );
        Ok(())
    }

    fn test_model(&self, dataset: &Dataset) -> Result<f32, Box<dyn Error>> {
        log::info!("Running final test set evaluation...");
        let best = self.run.best_checkpoint();
        if best.exists() {
            checkpoint::load_parameters(&best, &self.varmap)?;
        }

        let test_loader = dataset.test_loader(self.batch_size, self.workers);
        if test_loader.num_samples() == 0 {
            log::info!("Test split is empty");
            return Ok(0.0);
        }

        let test_loss = evaluate(&self.model, test_loader, &self.device)?;
        log::info!("Test Loss: {:.6}", test_loss);

        Ok(test_loss)
    }
}
