pub struct MetricsTracker {
    best_val_loss: f32,
    epochs_no_improve: u64,
    patience: u64,
}

impl MetricsTracker {
    pub fn new(patience: u64) -> Self {
        Self::resume(patience, f32::MAX)
    }

    /// Continues from the best validation loss of an earlier run.
    pub fn resume(patience: u64, best_val_loss: f32) -> Self {
        Self {
            best_val_loss,
            epochs_no_improve: 0,
            patience,
        }
    }

    // Returns if model improved (lowest val loss)
    pub fn update(&mut self, val_loss: f32) -> bool {
        if val_loss < self.best_val_loss {
            self.best_val_loss = val_loss;
            self.epochs_no_improve = 0;
            true
        } else {
            self.epochs_no_improve += 1;
            false
        }
    }

    pub fn best_val_loss(&self) -> f32 {
        self.best_val_loss
    }

    pub fn should_stop(&self) -> bool {
        self.patience > 0 && self.epochs_no_improve >= self.patience
    }
}
