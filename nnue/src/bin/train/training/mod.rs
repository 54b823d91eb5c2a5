mod evaluation;
mod history;
mod metrics;
mod progress;
mod trainer;

pub use trainer::Trainer;
