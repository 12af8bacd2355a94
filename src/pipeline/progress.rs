use std::sync::Arc;

/// Bytes moved so far; `total` is known when the peer announced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Fraction complete in `[0, 1]`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.loaded as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Advisory progress observer. Called inline; keep it cheap.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;
