//! Training configuration, progress callbacks and metrics

use crate::error::{Device, Error, Result};
use serde::{Deserialize, Serialize};

/// Training progress callback
#[allow(unused_variables)]
pub trait TrainingCallback: Send + Sync {
    /// Called at the start of training
    fn on_training_start(&self, config: &TrainingConfig) {}

    /// Called at the start of each epoch
    fn on_epoch_start(&self, epoch: usize, total_epochs: usize) {}

    /// Called after each batch
    fn on_batch_end(&self, epoch: usize, batch: usize, loss: f32) {}

    /// Called at the end of each epoch
    fn on_epoch_end(&self, epoch: usize, metrics: &EpochMetrics) {}

    /// Called when training completes
    fn on_training_end(&self, metrics: &TrainingMetrics) {}
}

/// Null callback that does nothing
#[derive(Debug, Clone, Copy)]
pub struct NullCallback;

impl TrainingCallback for NullCallback {}

/// Training configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate
    pub learning_rate: f64,

    /// Examples per batch
    pub batch_size: usize,

    /// Number of epochs
    pub num_epochs: usize,

    /// Decoupled weight decay
    pub weight_decay: f64,

    /// Global gradient norm cap, 0 disables clipping
    pub max_grad_norm: f64,

    /// Seed of the shuffling and negative sampling RNG
    pub seed: u64,

    /// Device to train on
    #[serde(default)]
    pub device: Device,
}

impl TrainingConfig {
    /// Create a new training config
    pub fn new() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 32,
            num_epochs: 10,
            weight_decay: 0.0,
            max_grad_norm: 5.0,
            seed: 42,
            device: Device::Cpu,
        }
    }

    /// Set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set number of epochs
    pub fn with_num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set weight decay
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Set gradient norm cap
    pub fn with_max_grad_norm(mut self, max_grad_norm: f64) -> Self {
        self.max_grad_norm = max_grad_norm;
        self
    }

    /// Set device
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Set RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be at least 1".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.max_grad_norm < 0.0 {
            return Err(Error::Configuration(format!(
                "max_grad_norm must be non-negative, got {}",
                self.max_grad_norm
            )));
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Training metrics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// One entry per completed epoch
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingMetrics {
    /// Epoch with the highest validation F1
    pub fn best_epoch(&self) -> Option<&EpochMetrics> {
        self.epochs
            .iter()
            .filter(|e| e.val_f1.is_some())
            .max_by(|a, b| a.val_f1.partial_cmp(&b.val_f1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Training loss of the last epoch
    pub fn final_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.train_loss)
    }
}

/// Metrics for a single epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Mean batch loss on the training data
    pub train_loss: f32,
    /// Micro F1 on the training data
    pub train_f1: f64,
    /// Mean batch loss on the dev data, if any
    pub val_loss: Option<f32>,
    /// Micro F1 on the dev data, if any
    pub val_f1: Option<f64>,
}

/// Logging callback
#[derive(Debug, Clone)]
pub struct LoggingCallback {
    log_every: usize,
}

impl LoggingCallback {
    /// Log batch losses every `log_every` batches
    pub fn new(log_every: usize) -> Self {
        Self { log_every }
    }
}

impl Default for LoggingCallback {
    fn default() -> Self {
        Self::new(10)
    }
}

impl TrainingCallback for LoggingCallback {
    fn on_training_start(&self, config: &TrainingConfig) {
        tracing::info!(
            learning_rate = config.learning_rate,
            batch_size = config.batch_size,
            num_epochs = config.num_epochs,
            "starting training"
        );
    }

    fn on_epoch_start(&self, epoch: usize, total_epochs: usize) {
        tracing::debug!("starting epoch {}/{}", epoch + 1, total_epochs);
    }

    fn on_batch_end(&self, epoch: usize, batch: usize, loss: f32) {
        if self.log_every > 0 && batch % self.log_every == 0 {
            tracing::debug!("epoch {}, batch {}: loss={:.4}", epoch + 1, batch, loss);
        }
    }

    fn on_epoch_end(&self, epoch: usize, metrics: &EpochMetrics) {
        tracing::info!(
            "epoch {}: loss={:.4}, f1={:.4}, val_loss={:?}, val_f1={:?}",
            epoch + 1,
            metrics.train_loss,
            metrics.train_f1,
            metrics.val_loss,
            metrics.val_f1
        );
    }

    fn on_training_end(&self, metrics: &TrainingMetrics) {
        tracing::info!(
            "training complete, final loss: {:.4}",
            metrics.final_loss().unwrap_or(0.0)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, val_f1: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 1.0 / (epoch + 1) as f32,
            train_f1: 0.5,
            val_loss: None,
            val_f1,
        }
    }

    #[test]
    fn test_training_config_new() {
        let config = TrainingConfig::new();
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.num_epochs, 10);
        assert_eq!(config.max_grad_norm, 5.0);
        assert_eq!(config.device, Device::Cpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_training_config_builder() {
        let config = TrainingConfig::new()
            .with_learning_rate(1e-4)
            .with_batch_size(16)
            .with_num_epochs(5)
            .with_seed(7);

        assert_eq!(config.learning_rate, 1e-4);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.num_epochs, 5);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_training_config_validation() {
        assert!(TrainingConfig::new().with_batch_size(0).validate().is_err());
        assert!(TrainingConfig::new().with_learning_rate(0.0).validate().is_err());
        assert!(TrainingConfig::new().with_max_grad_norm(-1.0).validate().is_err());
    }

    #[test]
    fn test_best_epoch() {
        let metrics = TrainingMetrics {
            epochs: vec![epoch(0, Some(0.4)), epoch(1, Some(0.7)), epoch(2, Some(0.6))],
        };
        assert_eq!(metrics.best_epoch().unwrap().epoch, 1);
        assert_eq!(metrics.final_loss(), Some(1.0 / 3.0));

        let no_val = TrainingMetrics {
            epochs: vec![epoch(0, None)],
        };
        assert!(no_val.best_epoch().is_none());
    }

    #[test]
    fn test_callbacks_are_object_safe() {
        let callbacks: Vec<Box<dyn TrainingCallback>> =
            vec![Box::new(NullCallback), Box::new(LoggingCallback::default())];
        let metrics = TrainingMetrics {
            epochs: vec![epoch(0, Some(0.5))],
        };
        for callback in &callbacks {
            callback.on_training_start(&TrainingConfig::new());
            callback.on_batch_end(0, 10, 0.5);
            callback.on_epoch_end(0, &metrics.epochs[0]);
            callback.on_training_end(&metrics);
        }
    }
}
