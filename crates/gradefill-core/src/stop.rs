use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Label of the stop control when none is configured.
pub const DEFAULT_STOP_LABEL: &str = "Update";

/// Operator control that ends a run at the next record boundary.
///
/// Clones share the same underlying signal.
#[derive(Debug, Clone)]
pub struct StopControl {
    token: CancellationToken,
    label: Arc<str>,
}

impl StopControl {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            token: CancellationToken::new(),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn request_stop(&self) {
        self.token.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for StopControl {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_LABEL)
    }
}
