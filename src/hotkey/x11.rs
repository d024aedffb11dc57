//! X11 side of the hotkey listener: connection, key grabs, and the
//! thread that turns matching KeyPress events into triggers.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{self, GrabMode, Keysym, ModMask, Setup, Window};
use x11rb::rust_connection::RustConnection;

use super::HotkeyError;
use super::HotkeyEvent;
use super::keybinding::{Binding, event_matches_binding};

/// CapsLock modifier bit (always LockMask).
const LOCK_MASK: u16 = 0x0002;

/// Used when NumLock cannot be found in the modifier map.
const MOD2_MASK: u16 = 0x0010;

const XK_NUM_LOCK: Keysym = 0xff7f;

/// Poll interval; bounds how long `stop` takes to be noticed.
const POLL_MS: u16 = 100;

pub struct X11Context {
    conn: Arc<RustConnection>,
    root: Window,
    numlock_mask: u16,
}

impl X11Context {
    pub fn connect() -> Result<Self, HotkeyError> {
        let (conn, screen_num) = RustConnection::connect(None)
            .map_err(|e| HotkeyError::X11(format!("connect failed: {e}")))?;
        let root = conn.setup().roots[screen_num].root;

        let numlock_mask = detect_numlock_mask(&conn);
        tracing::debug!(
            screen = screen_num,
            numlock_mask = format_args!("0x{numlock_mask:04x}"),
            "connected to X11 display"
        );

        Ok(Self {
            conn: Arc::new(conn),
            root,
            numlock_mask,
        })
    }

    pub fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub fn setup(&self) -> &Setup {
        self.conn.setup()
    }

    pub fn numlock_mask(&self) -> u16 {
        self.numlock_mask
    }

    /// Grab `binding` on the root window in all four lock-key states.
    ///
    /// Fails with `Conflict` if any variant is already grabbed by another
    /// client; variants that did succeed are released first.
    pub fn grab_key(&self, binding: &Binding) -> Result<(), HotkeyError> {
        for lock_mask in self.lock_masks() {
            let mods = ModMask::from(binding.modifiers | lock_mask);
            let cookie = xproto::grab_key(
                &*self.conn,
                true,
                self.root,
                mods,
                binding.keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )
            .map_err(|e| HotkeyError::X11(format!("grab_key send: {e}")))?;

            if let Err(e) = cookie.check() {
                tracing::warn!(binding = %binding.raw, lock_mask, error = %e, "XGrabKey failed");
                self.ungrab_key(binding);
                return Err(HotkeyError::Conflict(binding.raw.clone()));
            }
        }
        Ok(())
    }

    /// Release all lock-key variants of `binding`. Best-effort.
    pub fn ungrab_key(&self, binding: &Binding) {
        for lock_mask in self.lock_masks() {
            let mods = ModMask::from(binding.modifiers | lock_mask);
            if let Err(e) = xproto::ungrab_key(&*self.conn, binding.keycode, self.root, mods) {
                tracing::debug!(binding = %binding.raw, error = %e, "XUngrabKey failed");
            }
        }
        if let Err(e) = self.conn.flush() {
            tracing::debug!(error = %e, "flush after ungrab failed");
        }
    }

    /// `[0, CapsLock, NumLock, CapsLock|NumLock]`
    fn lock_masks(&self) -> [u16; 4] {
        [
            0,
            LOCK_MASK,
            self.numlock_mask,
            LOCK_MASK | self.numlock_mask,
        ]
    }

    /// Start the event thread for `binding`. Matching key presses are
    /// posted to `tx` with `try_send`: when the channel is full the
    /// trigger is dropped, the thread never waits on the pipeline.
    pub fn spawn_event_thread(
        &self,
        binding: Binding,
        tx: mpsc::Sender<HotkeyEvent>,
        stop: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, HotkeyError> {
        let conn = Arc::clone(&self.conn);
        let numlock_mask = self.numlock_mask;

        let handle = std::thread::Builder::new()
            .name("x11-hotkey".into())
            .spawn(move || event_loop(&conn, &binding, numlock_mask, &tx, &stop))?;
        Ok(handle)
    }
}

fn event_loop(
    conn: &RustConnection,
    binding: &Binding,
    numlock_mask: u16,
    tx: &mpsc::Sender<HotkeyEvent>,
    stop: &AtomicBool,
) {
    let raw_fd = conn.stream().as_raw_fd();

    while !stop.load(Ordering::Relaxed) {
        // SAFETY: raw_fd is the X11 connection fd, valid while conn is alive.
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

        match poll(&mut fds, PollTimeout::from(POLL_MS)) {
            Ok(0) => continue,
            Ok(_) => loop {
                match conn.poll_for_event() {
                    Ok(Some(Event::KeyPress(key)))
                        if event_matches_binding(
                            key.detail,
                            u16::from(key.state),
                            binding,
                            numlock_mask,
                        ) =>
                    {
                        match tx.try_send(HotkeyEvent::Triggered) {
                            Ok(()) => tracing::debug!(binding = %binding.raw, "hotkey pressed"),
                            Err(TrySendError::Full(_)) => {
                                tracing::debug!("trigger dropped, previous one not consumed");
                            }
                            Err(TrySendError::Closed(_)) => return,
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "X11 connection error");
                        return;
                    }
                }
            },
            Err(nix::Error::EINTR) => continue,
            Err(e) => {
                tracing::error!(error = %e, "poll error on X11 fd");
                return;
            }
        }
    }
}

/// Find the modifier bit NumLock is mapped to, falling back to Mod2.
fn detect_numlock_mask(conn: &RustConnection) -> u16 {
    let Some(mod_reply) = xproto::get_modifier_mapping(conn)
        .ok()
        .and_then(|c| c.reply().ok())
    else {
        return MOD2_MASK;
    };

    let setup = conn.setup();
    let min_kc = setup.min_keycode;
    let count = setup.max_keycode - min_kc + 1;
    let Some(kb_reply) = xproto::get_keyboard_mapping(conn, min_kc, count)
        .ok()
        .and_then(|c| c.reply().ok())
    else {
        return MOD2_MASK;
    };

    let per_code = kb_reply.keysyms_per_keycode as usize;
    let per_mod = mod_reply.keycodes_per_modifier() as usize;
    if per_code == 0 || per_mod == 0 {
        return MOD2_MASK;
    }

    let numlock_keycodes: Vec<u8> = kb_reply
        .keysyms
        .chunks(per_code)
        .enumerate()
        .filter(|(_, syms)| syms.contains(&XK_NUM_LOCK))
        .map(|(i, _)| min_kc + i as u8)
        .collect();

    // 8 rows (Shift, Lock, Control, Mod1..Mod5); row i is bit 1 << i.
    mod_reply
        .keycodes
        .chunks(per_mod)
        .take(8)
        .position(|row| row.iter().any(|kc| *kc != 0 && numlock_keycodes.contains(kc)))
        .map(|row| 1u16 << row)
        .unwrap_or(MOD2_MASK)
}
