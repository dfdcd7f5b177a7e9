//! Running metric accumulation for the training and evaluation loops.

use serde::Serialize;

/// Accumulates loss and accuracy over the batches of one pass.
///
/// Batches skipped for having no valid labels are never recorded, so they
/// contribute nothing to either average.
#[derive(Debug, Default)]
pub struct RunningMetrics {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    seen: usize,
}

impl RunningMetrics {
    pub fn record_batch(&mut self, loss: f32, correct: usize, batch_size: usize) {
        self.loss_sum += loss as f64;
        self.batches += 1;
        self.correct += correct;
        self.seen += batch_size;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Mean per-batch loss, 0.0 when nothing was recorded.
    pub fn average_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    /// Accuracy in percent over all recorded samples, 0.0 when nothing was recorded.
    pub fn accuracy_percent(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            100.0 * self.correct as f64 / self.seen as f64
        }
    }
}

/// Per-epoch metrics collected into the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics_are_zero() {
        let metrics = RunningMetrics::default();
        assert_eq!(metrics.batches(), 0);
        assert_eq!(metrics.average_loss(), 0.0);
        assert_eq!(metrics.accuracy_percent(), 0.0);
    }

    #[test]
    fn test_accumulation() {
        let mut metrics = RunningMetrics::default();
        metrics.record_batch(2.0, 3, 4);
        metrics.record_batch(1.0, 4, 4);

        assert_eq!(metrics.batches(), 2);
        assert!((metrics.average_loss() - 1.5).abs() < 1e-9);
        assert!((metrics.accuracy_percent() - 87.5).abs() < 1e-9);
    }

    #[test]
    fn test_skipped_batches_contribute_nothing() {
        let mut metrics = RunningMetrics::default();
        metrics.record_batch(0.5, 2, 2);
        // A batch with no valid labels is simply never recorded.
        assert_eq!(metrics.batches(), 1);
        assert!((metrics.accuracy_percent() - 100.0).abs() < 1e-9);
    }
}
