use serde::{Deserialize, Serialize};

/// Sample index on a recording timeline. Signed so that malformed upstream
/// data can be represented and rejected instead of wrapping.
pub type SampleIndex = i64;

/// Point events on a timeline (e.g., R-peak indices)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<SampleIndex>,
}

impl Events {
    pub fn from_indices(indices: Vec<SampleIndex>) -> Self {
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
