//! Key binding parser: "Ctrl+Shift+R" or "<ctrl>+<shift>+r" → (modifier
//! mask, keycode).

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{self, Keysym, ModMask, Setup};

use super::HotkeyError;

/// A parsed key binding ready for X11 grab registration.
#[derive(Debug, Clone)]
pub struct Binding {
    /// X11 modifier mask (e.g., Control | Shift).
    pub modifiers: u16,
    pub keycode: u8,
    pub keysym: Keysym,
    /// As the user wrote it.
    pub raw: String,
}

/// Split a binding string into its modifier mask and key keysym.
///
/// Format: `Modifier[+Modifier...]+Key`. Parts may be wrapped in angle
/// brackets (`<ctrl>+<shift>+r`). At least one modifier is required so a
/// global grab never swallows a plain key.
fn split_binding(combo: &str) -> Result<(u16, Keysym), HotkeyError> {
    let parts: Vec<&str> = combo
        .split('+')
        .map(|p| p.trim().trim_start_matches('<').trim_end_matches('>'))
        .collect();

    if parts.iter().all(|p| p.is_empty()) {
        return Err(HotkeyError::InvalidBinding("empty binding".into()));
    }
    if parts.len() < 2 {
        return Err(HotkeyError::InvalidBinding(format!(
            "bare key without modifier: {combo:?}"
        )));
    }

    let (modifier_parts, key_name) = parts.split_at(parts.len() - 1);
    let key_name = key_name[0];

    let mut modifiers: u16 = 0;
    for &m in modifier_parts {
        let mask = parse_modifier(m)
            .ok_or_else(|| HotkeyError::InvalidBinding(format!("unknown modifier: {m:?}")))?;
        modifiers |= mask;
    }

    let keysym = key_name_to_keysym(key_name)
        .ok_or_else(|| HotkeyError::InvalidBinding(format!("unknown key: {key_name:?}")))?;

    Ok((modifiers, keysym))
}

/// Parse a binding and resolve its key against the server's keyboard
/// mapping.
pub fn parse_binding(
    combo: &str,
    conn: &impl Connection,
    setup: &Setup,
) -> Result<Binding, HotkeyError> {
    let (modifiers, keysym) = split_binding(combo)?;

    let keycode = keysym_to_keycode(conn, setup, keysym).ok_or_else(|| {
        HotkeyError::InvalidBinding(format!(
            "keysym 0x{keysym:04x} not found in keyboard mapping"
        ))
    })?;

    Ok(Binding {
        modifiers,
        keycode,
        keysym,
        raw: combo.to_string(),
    })
}

fn parse_modifier(name: &str) -> Option<u16> {
    match name.to_ascii_lowercase().as_str() {
        "shift" => Some(ModMask::SHIFT.into()),
        "control" | "ctrl" => Some(ModMask::CONTROL.into()),
        "alt" | "mod1" => Some(u16::from(ModMask::M1)),
        "super" | "mod4" | "cmd" | "win" => Some(u16::from(ModMask::M4)),
        _ => None,
    }
}

/// Letters, digits, F1-F12 and a handful of named keys.
fn key_name_to_keysym(name: &str) -> Option<Keysym> {
    if name.len() == 1 {
        let ch = name.chars().next()?;
        if ch.is_ascii_alphabetic() {
            return Some(ch.to_ascii_lowercase() as Keysym);
        }
        if ch.is_ascii_digit() {
            return Some(ch as Keysym);
        }
    }

    if let Some(rest) = name.strip_prefix('F').or_else(|| name.strip_prefix('f'))
        && let Ok(n) = rest.parse::<u32>()
        && (1..=12).contains(&n)
    {
        // XK_F1 = 0xffbe
        return Some(0xffbe + n - 1);
    }

    match name.to_ascii_lowercase().as_str() {
        "space" => Some(0x0020),
        "return" | "enter" => Some(0xff0d),
        "escape" | "esc" => Some(0xff1b),
        "tab" => Some(0xff09),
        "backspace" => Some(0xff08),
        "delete" => Some(0xffff),
        "insert" => Some(0xff63),
        "home" => Some(0xff50),
        "end" => Some(0xff57),
        "page_up" | "pageup" => Some(0xff55),
        "page_down" | "pagedown" => Some(0xff56),
        _ => None,
    }
}

/// First keycode whose keysym list contains `keysym`.
pub(crate) fn keysym_to_keycode(
    conn: &impl Connection,
    setup: &Setup,
    keysym: Keysym,
) -> Option<u8> {
    let min_keycode = setup.min_keycode;
    let count = setup.max_keycode - min_keycode + 1;

    let reply = xproto::get_keyboard_mapping(conn, min_keycode, count)
        .ok()?
        .reply()
        .ok()?;

    let per_code = reply.keysyms_per_keycode as usize;
    if per_code == 0 {
        return None;
    }

    reply
        .keysyms
        .chunks(per_code)
        .position(|syms| syms.contains(&keysym))
        .map(|i| min_keycode + i as u8)
}

/// Whether a KeyPress matches `binding`, ignoring CapsLock, NumLock
/// (`numlock_mask`, detected per server) and pointer button bits.
pub fn event_matches_binding(
    event_keycode: u8,
    event_state: u16,
    binding: &Binding,
    numlock_mask: u16,
) -> bool {
    let lock_mask: u16 = u16::from(ModMask::LOCK) | numlock_mask;
    let clean_mods = event_state & !lock_mask & 0x00ff;

    event_keycode == binding.keycode && clean_mods == binding.modifiers
}
