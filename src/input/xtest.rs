//! X11 input simulation through the XTEST extension.
//!
//! Keycodes are resolved once at connect time from the server's
//! keyboard mapping. Each combination first releases the modifiers the
//! user may still be holding from the hotkey, otherwise Ctrl+C arrives
//! as Ctrl+Shift+C.

use std::time::Duration;

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{KEY_PRESS_EVENT, KEY_RELEASE_EVENT, Keysym, Window};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;

use super::{InputError, InputSimulator};
use crate::hotkey::keysym_to_keycode;

const XK_CONTROL_L: Keysym = 0xffe3;
const XK_C: Keysym = 0x0063;
const XK_V: Keysym = 0x0076;

/// Shift, Alt and Super, left and right.
const HELD_MODIFIERS: &[Keysym] = &[0xffe1, 0xffe2, 0xffe9, 0xffea, 0xffeb, 0xffec];

/// Gap between press and release; some toolkits drop zero-length taps.
const KEY_GAP: Duration = Duration::from_millis(12);

struct Keycodes {
    control: u8,
    copy: u8,
    paste: u8,
    held: Vec<u8>,
}

/// `InputSimulator` backed by XTEST `FakeInput` requests.
pub struct XtestInput {
    conn: RustConnection,
    root: Window,
    keys: Keycodes,
}

impl XtestInput {
    /// Connect to the display and check that XTEST is available.
    pub fn connect() -> Result<Self, InputError> {
        let (conn, screen_num) = RustConnection::connect(None)
            .map_err(|e| InputError::Unavailable(format!("X11 connect failed: {e}")))?;
        let root = conn.setup().roots[screen_num].root;

        let version = conn
            .xtest_get_version(2, 2)
            .map_err(|e| InputError::Unavailable(format!("XTEST: {e}")))?
            .reply()
            .map_err(|e| InputError::Unavailable(format!("XTEST version query: {e}")))?;
        tracing::debug!(
            major = version.major_version,
            minor = version.minor_version,
            "XTEST available"
        );

        let lookup = |keysym: Keysym| {
            keysym_to_keycode(&conn, conn.setup(), keysym).ok_or_else(|| {
                InputError::Unavailable(format!(
                    "keysym 0x{keysym:04x} not found in keyboard mapping"
                ))
            })
        };
        let keys = Keycodes {
            control: lookup(XK_CONTROL_L)?,
            copy: lookup(XK_C)?,
            paste: lookup(XK_V)?,
            held: HELD_MODIFIERS
                .iter()
                .filter_map(|&k| keysym_to_keycode(&conn, conn.setup(), k))
                .collect(),
        };

        Ok(Self { conn, root, keys })
    }

    async fn send_combo(&self, key: u8) -> Result<(), InputError> {
        send_combo(self, &self.keys.held, self.keys.control, key).await
    }
}

/// Where synthetic key events go.
trait KeySink: Sync {
    fn send(&self, event: u8, keycode: u8) -> Result<(), InputError>;
    fn flush(&self) -> Result<(), InputError>;
}

impl KeySink for XtestInput {
    fn send(&self, event: u8, keycode: u8) -> Result<(), InputError> {
        self.conn
            .xtest_fake_input(event, keycode, x11rb::CURRENT_TIME, self.root, 0, 0, 0)
            .map_err(|e| InputError::Rejected(format!("FakeInput send: {e}")))?
            .check()
            .map_err(|e| InputError::Rejected(format!("FakeInput keycode {keycode}: {e}")))
    }

    fn flush(&self) -> Result<(), InputError> {
        self.conn
            .flush()
            .map_err(|e| InputError::Rejected(format!("flush: {e}")))
    }
}

/// Keys pressed so far. Anything still down on drop is released.
struct Pressed<'a, S: KeySink> {
    sink: &'a S,
    keys: Vec<u8>,
}

impl<'a, S: KeySink> Pressed<'a, S> {
    fn new(sink: &'a S) -> Self {
        Self {
            sink,
            keys: Vec::with_capacity(2),
        }
    }

    fn press(&mut self, keycode: u8) -> Result<(), InputError> {
        self.sink.send(KEY_PRESS_EVENT, keycode)?;
        self.keys.push(keycode);
        Ok(())
    }

    /// Release in reverse press order. Every key is attempted; the first
    /// error is returned.
    fn release_all(&mut self) -> Result<(), InputError> {
        let mut first_err = None;
        while let Some(keycode) = self.keys.pop() {
            if let Err(e) = self.sink.send(KEY_RELEASE_EVENT, keycode) {
                first_err.get_or_insert(e);
            }
        }
        let flushed = self.sink.flush();
        match first_err {
            Some(e) => Err(e),
            None => flushed,
        }
    }
}

impl<S: KeySink> Drop for Pressed<'_, S> {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        if let Err(e) = self.release_all() {
            tracing::warn!(error = %e, "failed to release synthetic keys");
        }
    }
}

async fn send_combo<S: KeySink>(
    sink: &S,
    held: &[u8],
    control: u8,
    key: u8,
) -> Result<(), InputError> {
    for &keycode in held {
        sink.send(KEY_RELEASE_EVENT, keycode)?;
    }

    let mut pressed = Pressed::new(sink);
    pressed.press(control)?;
    pressed.press(key)?;
    tokio::time::sleep(KEY_GAP).await;
    pressed.release_all()
}

#[async_trait::async_trait]
impl InputSimulator for XtestInput {
    async fn trigger_copy(&self) -> Result<(), InputError> {
        self.send_combo(self.keys.copy).await?;
        tracing::debug!("sent Ctrl+C");
        Ok(())
    }

    async fn trigger_paste(&self) -> Result<(), InputError> {
        self.send_combo(self.keys.paste).await?;
        tracing::debug!("sent Ctrl+V");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "xtest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const CTRL: u8 = 37;
    const KEY_C: u8 = 54;
    const SHIFT: u8 = 50;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(u8, u8)>>,
        reject: Option<(u8, u8)>,
        flushes: Mutex<usize>,
    }

    impl KeySink for RecordingSink {
        fn send(&self, event: u8, keycode: u8) -> Result<(), InputError> {
            if self.reject == Some((event, keycode)) {
                return Err(InputError::Rejected(format!("keycode {keycode}")));
            }
            self.events.lock().unwrap().push((event, keycode));
            Ok(())
        }

        fn flush(&self) -> Result<(), InputError> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
    }

    impl RecordingSink {
        fn events(&self) -> Vec<(u8, u8)> {
            self.events.lock().unwrap().clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn combo_releases_held_modifiers_first() {
        let sink = RecordingSink::default();

        send_combo(&sink, &[SHIFT], CTRL, KEY_C).await.unwrap();

        assert_eq!(
            sink.events(),
            vec![
                (KEY_RELEASE_EVENT, SHIFT),
                (KEY_PRESS_EVENT, CTRL),
                (KEY_PRESS_EVENT, KEY_C),
                (KEY_RELEASE_EVENT, KEY_C),
                (KEY_RELEASE_EVENT, CTRL),
            ]
        );
        assert_eq!(*sink.flushes.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_combo_still_releases() {
        let sink = RecordingSink::default();

        let cut_short =
            tokio::time::timeout(Duration::from_millis(1), send_combo(&sink, &[], CTRL, KEY_C))
                .await;

        assert!(cut_short.is_err());
        assert_eq!(
            sink.events(),
            vec![
                (KEY_PRESS_EVENT, CTRL),
                (KEY_PRESS_EVENT, KEY_C),
                (KEY_RELEASE_EVENT, KEY_C),
                (KEY_RELEASE_EVENT, CTRL),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_key_press_releases_ctrl() {
        let sink = RecordingSink {
            reject: Some((KEY_PRESS_EVENT, KEY_C)),
            ..Default::default()
        };

        let err = send_combo(&sink, &[], CTRL, KEY_C).await.unwrap_err();

        assert!(matches!(err, InputError::Rejected(_)));
        assert_eq!(
            sink.events(),
            vec![(KEY_PRESS_EVENT, CTRL), (KEY_RELEASE_EVENT, CTRL)]
        );
    }
}
