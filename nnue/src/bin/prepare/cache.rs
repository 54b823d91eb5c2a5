use std::collections::HashMap;

use nnue::encoding::{encode_fen, Features};
use nnue::error::EncodingError;

const CACHE_CAPACITY: usize = 1 << 16;

/// Per-thread memo of recently encoded FENs. Opening positions repeat a lot
/// in self-play data.
pub struct FeatureCache {
    entries: HashMap<String, Features>,
    capacity: usize,
}

impl Default for FeatureCache {
    fn default() -> Self {
        Self::with_capacity(CACHE_CAPACITY)
    }
}

impl FeatureCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn encode(&mut self, fen: &str) -> Result<Features, EncodingError> {
        if let Some(features) = self.entries.get(fen) {
            return Ok(features.clone());
        }

        let features = encode_fen(fen)?;
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.insert(fen.to_string(), features.clone());
        Ok(features)
    }
}
