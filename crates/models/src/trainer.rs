//! Training driver for span models
//!
//! Negative spans are resampled every time a training batch is built, so
//! each epoch sees a fresh draw of negatives from the seeded RNG.

use crate::batch::Batch;
use crate::model::SpanModel;
use crate::tensor::{to_candle_device, zero_scalar, ToSpannerResult};
use candle_core::backprop::GradStore;
use candle_core::{DType, Device as CandleDevice, Result as CandleResult, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use spanner_core::chunk::{Chunk, Example};
use spanner_core::config::SpanModelConfig;
use spanner_core::error::{Error, Result};
use spanner_core::metrics::micro_f1;
use spanner_core::training::{EpochMetrics, TrainingCallback, TrainingConfig, TrainingMetrics};
use spanner_core::vocab::Vocabs;

/// Progress counters of a trainer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrainingState {
    /// Optimizer steps in the current epoch
    pub step: usize,
    /// Completed epochs
    pub epoch: usize,
    /// Optimizer steps since the start of training
    pub global_step: usize,
    /// Number of examples processed
    pub samples_processed: usize,
}

impl TrainingState {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment step counters after an optimizer step on `batch_size` examples
    pub fn increment_step(&mut self, batch_size: usize) {
        self.step += 1;
        self.global_step += 1;
        self.samples_processed += batch_size;
    }

    /// Increment epoch counter
    pub fn increment_epoch(&mut self) {
        self.epoch += 1;
        self.step = 0;
    }
}

/// Mean loss of a batch together with its gold and predicted chunks
#[derive(Clone, Debug)]
pub struct BatchOutput {
    /// Mean loss over the examples of the batch
    pub loss: f32,
    /// Gold chunks per example
    pub gold: Vec<Vec<Chunk>>,
    /// Predicted chunks per example
    pub pred: Vec<Vec<Chunk>>,
}

/// Scale gradients so that their global L2 norm is at most `max_norm`
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> CandleResult<f64> {
    let mut total = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += grad.sqr()?.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        }
    }
    let norm = total.sqrt();

    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            let clipped = match grads.get(var.as_tensor()) {
                Some(grad) => grad.affine(scale, 0.0)?,
                None => continue,
            };
            grads.insert(var.as_tensor(), clipped);
        }
    }
    Ok(norm)
}

/// Owns a span model with its parameters and optimizer, and runs training
pub struct SpanTrainer {
    model: SpanModel,
    vocabs: Vocabs,
    varmap: VarMap,
    optimizer: AdamW,
    config: TrainingConfig,
    device: CandleDevice,
    rng: StdRng,
    state: TrainingState,
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl SpanTrainer {
    /// Build a freshly initialized model and its optimizer
    pub fn new(
        model_config: &SpanModelConfig,
        vocabs: Vocabs,
        config: TrainingConfig,
    ) -> Result<Self> {
        config.validate()?;
        let device = to_candle_device(&config.device);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = SpanModel::new(model_config, &vocabs, vb)?;

        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params).spanner_result()?;

        Ok(Self {
            model,
            vocabs,
            varmap,
            optimizer,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            device,
            state: TrainingState::new(),
            callbacks: Vec::new(),
        })
    }

    /// Build the vocabularies from `partitions`, then the trainer
    pub fn from_data(
        model_config: &SpanModelConfig,
        partitions: &[&[Example]],
        config: TrainingConfig,
    ) -> Result<Self> {
        let vocabs = model_config.build_vocabs(partitions);
        Self::new(model_config, vocabs, config)
    }

    /// Add a training callback
    pub fn with_callback(mut self, callback: impl TrainingCallback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Model being trained
    pub fn model(&self) -> &SpanModel {
        &self.model
    }

    /// Vocabularies the model was built with
    pub fn vocabs(&self) -> &Vocabs {
        &self.vocabs
    }

    /// Trainable variables of the model
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Progress counters
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Device holding the parameters
    pub fn device(&self) -> &CandleDevice {
        &self.device
    }

    /// Prepare and pad `examples`; negatives are sampled when `training`
    pub fn make_batch<'a>(
        &mut self,
        examples: impl IntoIterator<Item = &'a Example>,
        training: bool,
    ) -> Result<Batch> {
        let model_config = self.model.config();
        let prepared = examples
            .into_iter()
            .map(|example| model_config.exemplify(example, &self.vocabs, training, &mut self.rng))
            .collect::<Result<Vec<_>>>()?;
        Batch::from_examples(prepared, &self.device)
    }

    /// Mean loss over the batch, gold chunks and predicted chunks
    pub fn forward_batch(
        &self,
        batch: &Batch,
        train: bool,
    ) -> Result<(Tensor, Vec<Vec<Chunk>>, Vec<Vec<Chunk>>)> {
        let (losses, hidden) = self.model.forward_with_hidden(batch, train)?;
        let loss = if batch.size() == 0 {
            zero_scalar(&self.device).spanner_result()?
        } else {
            losses.mean_all().spanner_result()?
        };
        let pred = self.model.decode_hidden(batch, &hidden)?;
        let gold = self.model.retrieve(batch);
        Ok((loss, gold, pred))
    }

    /// Forward, backward and optimizer step on one batch
    pub fn fit_batch(&mut self, batch: &Batch) -> Result<BatchOutput> {
        let (loss, gold, pred) = self.forward_batch(batch, true)?;
        let loss_value = loss.to_scalar::<f32>().spanner_result()?;
        if !loss_value.is_finite() {
            return Err(Error::Training(format!(
                "non-finite loss {} at step {}",
                loss_value, self.state.global_step
            )));
        }

        let mut grads = loss.backward().spanner_result()?;
        if self.config.max_grad_norm > 0.0 {
            let vars = self.varmap.all_vars();
            let norm =
                clip_grad_norm(&mut grads, &vars, self.config.max_grad_norm).spanner_result()?;
            tracing::trace!(grad_norm = norm, "clipped gradients");
        }
        self.optimizer.step(&grads).spanner_result()?;
        self.state.increment_step(batch.size());

        Ok(BatchOutput {
            loss: loss_value,
            gold,
            pred,
        })
    }

    /// Mean loss of one optimizer step
    pub fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        self.fit_batch(batch).map(|output| output.loss)
    }

    /// Mean batch loss and micro-F1 over `examples` without updating the model
    fn eval_epoch(&mut self, examples: &[Example]) -> Result<(f32, f64)> {
        let mut total_loss = 0.0f32;
        let mut num_batches = 0usize;
        let mut y_gold = Vec::with_capacity(examples.len());
        let mut y_pred = Vec::with_capacity(examples.len());
        for chunk in examples.chunks(self.config.batch_size) {
            let batch = self.make_batch(chunk, false)?;
            let (loss, gold, pred) = self.forward_batch(&batch, false)?;
            total_loss += loss.to_scalar::<f32>().spanner_result()?;
            num_batches += 1;
            y_gold.extend(gold);
            y_pred.extend(pred);
        }
        let mean_loss = if num_batches == 0 {
            0.0
        } else {
            total_loss / num_batches as f32
        };
        Ok((mean_loss, micro_f1(&y_gold, &y_pred)?))
    }

    /// Micro-F1 of the model on labeled `examples`
    pub fn evaluate_examples(&mut self, examples: &[Example]) -> Result<f64> {
        self.eval_epoch(examples).map(|(_, f1)| f1)
    }

    /// Predicted chunks of every example, labeled or not
    pub fn predict(&mut self, examples: &[Example], batch_size: usize) -> Result<Vec<Vec<Chunk>>> {
        let mut set_chunks = Vec::with_capacity(examples.len());
        for chunk in examples.chunks(batch_size.max(1)) {
            let batch = self.make_batch(chunk, false)?;
            set_chunks.extend(self.model.decode(&batch)?);
        }
        Ok(set_chunks)
    }

    fn train_epoch(&mut self, epoch: usize, train_data: &[Example]) -> Result<(f32, f64)> {
        let mut order: Vec<usize> = (0..train_data.len()).collect();
        order.shuffle(&mut self.rng);

        let mut total_loss = 0.0f32;
        let mut num_batches = 0usize;
        let mut y_gold = Vec::with_capacity(train_data.len());
        let mut y_pred = Vec::with_capacity(train_data.len());
        for (idx, indices) in order.chunks(self.config.batch_size).enumerate() {
            let batch = self.make_batch(indices.iter().map(|&i| &train_data[i]), true)?;
            let output = self.fit_batch(&batch)?;
            for callback in &self.callbacks {
                callback.on_batch_end(epoch, idx, output.loss);
            }
            total_loss += output.loss;
            num_batches += 1;
            y_gold.extend(output.gold);
            y_pred.extend(output.pred);
        }

        let mean_loss = if num_batches == 0 {
            0.0
        } else {
            total_loss / num_batches as f32
        };
        Ok((mean_loss, micro_f1(&y_gold, &y_pred)?))
    }

    /// Train for the configured number of epochs, scoring `dev_data` after each
    pub fn train(
        &mut self,
        train_data: &[Example],
        dev_data: Option<&[Example]>,
    ) -> Result<TrainingMetrics> {
        for callback in &self.callbacks {
            callback.on_training_start(&self.config);
        }

        let mut metrics = TrainingMetrics::default();
        let num_epochs = self.config.num_epochs;
        for epoch in 0..num_epochs {
            for callback in &self.callbacks {
                callback.on_epoch_start(epoch, num_epochs);
            }

            let (train_loss, train_f1) = self.train_epoch(epoch, train_data)?;
            let (val_loss, val_f1) = match dev_data {
                Some(dev_data) => {
                    let (loss, f1) = self.eval_epoch(dev_data)?;
                    (Some(loss), Some(f1))
                }
                None => (None, None),
            };

            let epoch_metrics = EpochMetrics {
                epoch,
                train_loss,
                train_f1,
                val_loss,
                val_f1,
            };
            for callback in &self.callbacks {
                callback.on_epoch_end(epoch, &epoch_metrics);
            }
            metrics.epochs.push(epoch_metrics);
            self.state.increment_epoch();
        }

        for callback in &self.callbacks {
            callback.on_training_end(&metrics);
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_training_state_increment() {
        let mut state = TrainingState::new();
        state.increment_step(4);
        state.increment_step(2);
        assert_eq!(state.step, 2);
        assert_eq!(state.samples_processed, 6);

        state.increment_epoch();
        assert_eq!(state.epoch, 1);
        assert_eq!(state.step, 0);
        assert_eq!(state.global_step, 2);
    }

    #[test]
    fn test_clip_grad_norm() {
        let device = Device::Cpu;
        let var = Var::new(&[3f32, 4.0], &device).unwrap();
        let loss = var.as_tensor().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();
        // d(sum)/dx = [1, 1]; scale up to a norm of 5
        let scaled = Tensor::new(&[3f32, 4.0], &device).unwrap();
        grads.insert(var.as_tensor(), scaled);

        let norm = clip_grad_norm(&mut grads, &[var.clone()], 1.0).unwrap();
        assert!((norm - 5.0).abs() < 1e-6);
        let clipped = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
        assert!((clipped[0] - 0.6).abs() < 1e-4);
        assert!((clipped[1] - 0.8).abs() < 1e-4);

        let norm = clip_grad_norm(&mut grads, &[var.clone()], 10.0).unwrap();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
