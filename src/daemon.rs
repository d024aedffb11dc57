//! Process wiring: the long-running daemon, one-shot runs, and the
//! provider connectivity check.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clipboard::ClipboardGuard;
use crate::clipboard::xclip::XclipProvider;
use crate::config::{Config, ConfigError};
use crate::hotkey::{HotkeyError, HotkeyEvent, HotkeyListener};
use crate::input::InputError;
use crate::input::xtest::XtestInput;
use crate::notify::{DesktopNotifier, Notification};
use crate::processor::{ProcessorSettings, TextProcessor};
use crate::provider::{
    ModelParams, TransformError, TransformProvider, TransformRequest, create_provider,
};

/// Unconsumed hotkey presses kept while the loop is busy.
const TRIGGER_BACKLOG: usize = 4;

const CHECK_PROMPT: &str = "Reply with exactly the single word 'Success' and nothing else.";

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("hotkey: {0}")]
    Hotkey(#[from] HotkeyError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("provider: {0}")]
    Transform(#[from] TransformError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("hotkey listener stopped unexpectedly")]
    ListenerStopped,
    #[error("a run is already in progress")]
    Busy,
    #[error("unexpected reply from provider: {0:?}")]
    CheckFailed(String),
}

/// Assemble the X11 pipeline from configuration.
fn build_processor(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<Arc<TextProcessor>, DaemonError> {
    let provider = create_provider(&config.provider)?;
    let input = Arc::new(XtestInput::connect()?);
    let clipboard = ClipboardGuard::new(Arc::new(XclipProvider::new()));
    let notifier = Arc::new(DesktopNotifier::from_config(&config.notifications));

    Ok(Arc::new(TextProcessor::new(
        clipboard,
        input,
        provider,
        notifier,
        ProcessorSettings::from_config(config),
        shutdown,
    )))
}

/// Run until SIGTERM/SIGINT. The hotkey and SIGUSR1 both trigger a run.
///
/// On shutdown the in-flight run is cancelled and awaited, so the
/// clipboard is restored before the process exits.
pub async fn run(config: Config) -> Result<(), DaemonError> {
    let shutdown = CancellationToken::new();
    let processor = build_processor(&config, shutdown.clone())?;
    let (listener, mut events) = HotkeyListener::register(&config.hotkey.binding, TRIGGER_BACKLOG)?;

    let mut sig_usr1 = signal(SignalKind::user_defined1())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    tracing::info!(
        binding = listener.binding(),
        provider = config.provider.kind.id(),
        model = config.provider.model(),
        pid = std::process::id(),
        "chisel running"
    );

    let mut in_flight: Option<JoinHandle<Notification>> = None;
    let mut listener_stopped = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(HotkeyEvent::Triggered) => start(&processor, &mut in_flight),
                None => {
                    tracing::error!("hotkey listener exited, shutting down");
                    listener_stopped = true;
                    break;
                }
            },

            _ = sig_usr1.recv() => {
                tracing::debug!("SIGUSR1 trigger");
                start(&processor, &mut in_flight);
            }

            _ = sig_term.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }

            _ = sig_int.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    shutdown.cancel();
    if let Some(run) = in_flight.take()
        && !run.is_finished()
    {
        tracing::info!("waiting for in-flight run to restore the clipboard");
        if let Err(e) = run.await {
            tracing::error!(error = %e, "in-flight run panicked");
        }
    }
    listener.unregister();
    tracing::info!("chisel stopped");

    if listener_stopped {
        return Err(DaemonError::ListenerStopped);
    }
    Ok(())
}

fn start(processor: &Arc<TextProcessor>, in_flight: &mut Option<JoinHandle<Notification>>) {
    match processor.trigger() {
        Some(handle) => *in_flight = Some(handle),
        None => tracing::info!(phase = %processor.phase(), "busy, trigger ignored"),
    }
}

/// Run the pipeline once against the current selection. Ctrl+C cancels
/// it (the clipboard is still restored).
pub async fn once(config: Config) -> Result<Notification, DaemonError> {
    let shutdown = CancellationToken::new();
    let processor = build_processor(&config, shutdown.clone())?;
    let mut run = processor.trigger().ok_or(DaemonError::Busy)?;

    tokio::select! {
        outcome = &mut run => Ok(outcome?),
        _ = tokio::signal::ctrl_c() => {
            shutdown.cancel();
            Ok(run.await?)
        }
    }
}

/// Send a trivial request through the configured provider. Returns the
/// model's reply.
pub async fn check(config: &Config) -> Result<String, DaemonError> {
    let provider = create_provider(&config.provider)?;
    let request = TransformRequest::new(
        "Hello".into(),
        CHECK_PROMPT.into(),
        ModelParams::from_config(&config.provider, &config.transform),
    );
    tracing::info!(
        provider = provider.id(),
        model = config.provider.model(),
        "checking provider"
    );

    let result = provider
        .transform(&request, config.provider.request_timeout())
        .await?;

    if result.text.to_lowercase().contains("success") {
        Ok(result.text)
    } else {
        Err(DaemonError::CheckFailed(result.text))
    }
}
