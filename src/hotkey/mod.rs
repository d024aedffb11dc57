//! Global hotkey listener.
//!
//! Grabs one key combination on the X11 root window and posts
//! `HotkeyEvent::Triggered` on a bounded channel whenever it is pressed.
//! The listener runs on its own thread and never waits on the pipeline.

mod keybinding;
mod x11;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tokio::sync::mpsc;

pub(crate) use keybinding::keysym_to_keycode;
use keybinding::{Binding, parse_binding};
use x11::X11Context;

/// Hotkey listener errors.
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("X11: {0}")]
    X11(String),
    #[error("invalid key binding: {0}")]
    InvalidBinding(String),
    #[error("{0} is already grabbed by another application")]
    Conflict(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    Triggered,
}

/// A registered global hotkey. Dropping it releases the grab.
pub struct HotkeyListener {
    x11: X11Context,
    binding: Binding,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotkeyListener {
    /// Grab `combo` and start listening. Events arrive on the returned
    /// receiver, which holds at most `capacity` unconsumed triggers.
    pub fn register(
        combo: &str,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<HotkeyEvent>), HotkeyError> {
        let x11 = X11Context::connect()?;
        let binding = parse_binding(combo, x11.conn(), x11.setup())?;
        x11.grab_key(&binding)?;
        tracing::info!(
            binding = %binding.raw,
            keycode = binding.keycode,
            keysym = format_args!("0x{:04x}", binding.keysym),
            numlock_mask = x11.numlock_mask(),
            "hotkey registered"
        );

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let thread = match x11.spawn_event_thread(binding.clone(), tx, Arc::clone(&stop)) {
            Ok(t) => t,
            Err(e) => {
                x11.ungrab_key(&binding);
                return Err(e);
            }
        };

        Ok((
            Self {
                x11,
                binding,
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }

    pub fn binding(&self) -> &str {
        &self.binding.raw
    }

    /// Stop the event thread and release the grab.
    pub fn unregister(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Relaxed);
        self.x11.ungrab_key(&self.binding);
        // Exits within one poll interval.
        if let Err(e) = thread.join() {
            tracing::warn!("X11 event thread panicked: {e:?}");
        }
        tracing::info!(binding = %self.binding.raw, "hotkey released");
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.release();
    }
}
