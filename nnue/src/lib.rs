pub mod bitset;
pub mod checkpoint;
pub mod config;
pub mod encoding;
pub mod error;
pub mod inference;
pub mod network;
pub mod optimizer;
pub mod position;
pub mod quantize;
pub mod run;
pub mod samples;
pub mod validate;

#[cfg(test)]
mod tests;

pub use config::ModelConfig;
pub use encoding::{encode, encode_fen, Features};
pub use inference::IntegerNetwork;
pub use network::EvaluatorModel;
pub use position::Position;
pub use quantize::ExportedBinary;
