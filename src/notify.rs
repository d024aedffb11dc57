//! Terminal-event notifications.
//!
//! The pipeline reports exactly one `Notification` per run. How it is
//! shown is up to the `Notifier`; the desktop one shells out to
//! `notify-send` and never fails the caller.

use std::process::Stdio;

use tokio::process::Command;

use crate::config::NotificationConfig;
use crate::processor::FailureKind;

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Selection replaced with `chars` characters of output.
    Success { chars: usize },
    Failure { kind: FailureKind, message: String },
}

impl Notification {
    pub fn title(&self) -> String {
        match self {
            Notification::Success { .. } => "Chisel: text replaced".to_string(),
            Notification::Failure { kind, .. } => format!("Chisel: {kind}"),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::Success { chars } => format!("{chars} characters pasted"),
            Notification::Failure { message, .. } => message.clone(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Notification::Failure { .. })
    }
}

/// Receives terminal pipeline events.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort; never fails the run.
    async fn notify(&self, notification: &Notification);
}

/// `notify-send` popups.
pub struct DesktopNotifier {
    enabled: bool,
    on_success: bool,
}

impl DesktopNotifier {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            on_success: config.on_success,
        }
    }

    fn should_show(&self, notification: &Notification) -> bool {
        self.enabled && (notification.is_failure() || self.on_success)
    }
}

#[async_trait::async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, notification: &Notification) {
        if !self.should_show(notification) {
            return;
        }

        let urgency = if notification.is_failure() {
            "--urgency=critical"
        } else {
            "--urgency=low"
        };

        let title = notification.title();
        let body = notification.body();
        let result = Command::new("notify-send")
            .args([
                "--app-name=Chisel",
                "--expire-time=3000",
                urgency,
                title.as_str(),
                body.as_str(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            tracing::debug!(error = %e, "failed to send notification");
        }
    }
}
