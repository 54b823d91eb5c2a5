use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "{prefix} {spinner:.cyan} {pos}/{len} [{wide_bar:.cyan/blue}] {per_sec} {eta_precise} | {msg}";

/// One bar per superbatch, counting batches.
pub struct TrainingProgressBar {
    bar: ProgressBar,
}

impl TrainingProgressBar {
    pub fn new(
        superbatch: usize,
        num_batches: usize,
        learning_rate: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(num_batches as u64);
        bar.set_style(ProgressStyle::default_bar().template(TEMPLATE)?);
        bar.set_prefix(format!("superbatch {} (lr {:.2e})", superbatch, learning_rate));
        Ok(Self { bar })
    }

    pub fn update(&self, running_loss: f32) {
        self.bar.set_message(format!("train {:.6}", running_loss));
        self.bar.inc(1);
    }

    pub fn finish(&self, train_loss: f32, val_loss: f32) {
        self.bar
            .finish_with_message(format!("train {:.6} val {:.6}", train_loss, val_loss));
    }

    /// Leaves the bar where it stopped when the run is interrupted.
    pub fn abandon(&self) {
        self.bar.abandon_with_message("interrupted");
    }
}
