//! Synthetic copy/paste into the focused application.
//!
//! The pipeline only needs two key combinations, so the trait is two
//! methods. The X11 implementation lives in [`xtest`].

pub mod xtest;

/// Input simulation errors. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// No display, or the server lacks the XTEST extension.
    #[error("input simulation unavailable: {0}")]
    Unavailable(String),
    /// The server rejected a synthetic key event.
    #[error("synthetic input rejected: {0}")]
    Rejected(String),
}

/// Issues copy/paste key combinations to whatever has focus.
#[async_trait::async_trait]
pub trait InputSimulator: Send + Sync {
    /// Send the platform copy combination (Ctrl+C).
    async fn trigger_copy(&self) -> Result<(), InputError>;

    /// Send the platform paste combination (Ctrl+V).
    async fn trigger_paste(&self) -> Result<(), InputError>;

    fn name(&self) -> &'static str;
}
