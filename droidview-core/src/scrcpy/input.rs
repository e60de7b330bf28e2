//! Outbound control messages (host → device).
//!
//! These ride the control stream as plain bytes; the device-side
//! server parses them and injects the corresponding Android input
//! events. All integers are big-endian.
//!
//! ## Wire format
//!
//! ```text
//! InjectKeycode:     type(1) action(1) keycode(4) repeat(4) meta(4)
//! InjectText:        type(1) len(4) utf8(len)
//! InjectTouch:       type(1) action(1) pointer_id(8)
//!                    x(4) y(4) width(2) height(2)
//!                    pressure(2, 16-bit fixed point)
//!                    action_button(4) buttons(4)
//! InjectScroll:      type(1) x(4) y(4) width(2) height(2)
//!                    hscroll(2, signed fixed point) vscroll(2)
//!                    buttons(4)
//! BackOrScreenOn:    type(1) action(1)
//! GetClipboard:      type(1) copy_key(1)
//! SetClipboard:      type(1) sequence(8) paste(1) len(4) utf8(len)
//! SetScreenPower:    type(1) mode(1)
//! panels / rotate:   type(1)
//! ```
//!
//! Floating-point pressure (0..=1) and scroll values (-1..=1) are
//! carried as 16-bit fixed point, matching the server's parser.

// ── Message type tags ────────────────────────────────────────────

const TYPE_INJECT_KEYCODE: u8 = 0;
const TYPE_INJECT_TEXT: u8 = 1;
const TYPE_INJECT_TOUCH_EVENT: u8 = 2;
const TYPE_INJECT_SCROLL_EVENT: u8 = 3;
const TYPE_BACK_OR_SCREEN_ON: u8 = 4;
const TYPE_EXPAND_NOTIFICATION_PANEL: u8 = 5;
const TYPE_EXPAND_SETTINGS_PANEL: u8 = 6;
const TYPE_COLLAPSE_PANELS: u8 = 7;
const TYPE_GET_CLIPBOARD: u8 = 8;
const TYPE_SET_CLIPBOARD: u8 = 9;
const TYPE_SET_SCREEN_POWER_MODE: u8 = 10;
const TYPE_ROTATE_DEVICE: u8 = 11;

// ── Event vocabulary ─────────────────────────────────────────────

/// Key press phase, Android `KeyEvent` action values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
}

/// Touch phase, Android `MotionEvent` action values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TouchAction {
    Down = 0,
    Up = 1,
    Move = 2,
}

/// A point within the device screen, plus the screen size the
/// coordinates are relative to (the server rescales).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub screen_width: u16,
    pub screen_height: u16,
}

impl Position {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_be_bytes());
        out.extend_from_slice(&self.y.to_be_bytes());
        out.extend_from_slice(&self.screen_width.to_be_bytes());
        out.extend_from_slice(&self.screen_height.to_be_bytes());
    }
}

/// Pointer id used for plain mouse/finger events.
pub const POINTER_ID_MOUSE: u64 = u64::MAX;

// ── ControlMessage ───────────────────────────────────────────────

/// A host-to-device control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    InjectKeycode {
        action: KeyAction,
        keycode: u32,
        repeat: u32,
        meta_state: u32,
    },
    InjectText(String),
    InjectTouch {
        action: TouchAction,
        pointer_id: u64,
        position: Position,
        /// 0.0..=1.0
        pressure: f32,
        action_button: u32,
        buttons: u32,
    },
    InjectScroll {
        position: Position,
        /// -1.0..=1.0 per tick.
        hscroll: f32,
        vscroll: f32,
        buttons: u32,
    },
    /// Press BACK, or wake the screen if it is off.
    BackOrScreenOn(KeyAction),
    ExpandNotificationPanel,
    ExpandSettingsPanel,
    CollapsePanels,
    /// `copy_key` 0 = none, 1 = COPY, 2 = CUT.
    GetClipboard {
        copy_key: u8,
    },
    SetClipboard {
        sequence: u64,
        paste: bool,
        text: String,
    },
    /// 0 = off, 2 = normal.
    SetScreenPowerMode(u8),
    RotateDevice,
}

impl ControlMessage {
    /// Serialize for the control stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        match self {
            ControlMessage::InjectKeycode {
                action,
                keycode,
                repeat,
                meta_state,
            } => {
                out.push(TYPE_INJECT_KEYCODE);
                out.push(*action as u8);
                out.extend_from_slice(&keycode.to_be_bytes());
                out.extend_from_slice(&repeat.to_be_bytes());
                out.extend_from_slice(&meta_state.to_be_bytes());
            }
            ControlMessage::InjectText(text) => {
                out.push(TYPE_INJECT_TEXT);
                out.extend_from_slice(&(text.len() as u32).to_be_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            ControlMessage::InjectTouch {
                action,
                pointer_id,
                position,
                pressure,
                action_button,
                buttons,
            } => {
                out.push(TYPE_INJECT_TOUCH_EVENT);
                out.push(*action as u8);
                out.extend_from_slice(&pointer_id.to_be_bytes());
                position.encode_into(&mut out);
                out.extend_from_slice(&unsigned_fixed_point(*pressure).to_be_bytes());
                out.extend_from_slice(&action_button.to_be_bytes());
                out.extend_from_slice(&buttons.to_be_bytes());
            }
            ControlMessage::InjectScroll {
                position,
                hscroll,
                vscroll,
                buttons,
            } => {
                out.push(TYPE_INJECT_SCROLL_EVENT);
                position.encode_into(&mut out);
                out.extend_from_slice(&signed_fixed_point(*hscroll).to_be_bytes());
                out.extend_from_slice(&signed_fixed_point(*vscroll).to_be_bytes());
                out.extend_from_slice(&buttons.to_be_bytes());
            }
            ControlMessage::BackOrScreenOn(action) => {
                out.push(TYPE_BACK_OR_SCREEN_ON);
                out.push(*action as u8);
            }
            ControlMessage::ExpandNotificationPanel => out.push(TYPE_EXPAND_NOTIFICATION_PANEL),
            ControlMessage::ExpandSettingsPanel => out.push(TYPE_EXPAND_SETTINGS_PANEL),
            ControlMessage::CollapsePanels => out.push(TYPE_COLLAPSE_PANELS),
            ControlMessage::GetClipboard { copy_key } => {
                out.push(TYPE_GET_CLIPBOARD);
                out.push(*copy_key);
            }
            ControlMessage::SetClipboard {
                sequence,
                paste,
                text,
            } => {
                out.push(TYPE_SET_CLIPBOARD);
                out.extend_from_slice(&sequence.to_be_bytes());
                out.push(*paste as u8);
                out.extend_from_slice(&(text.len() as u32).to_be_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            ControlMessage::SetScreenPowerMode(mode) => {
                out.push(TYPE_SET_SCREEN_POWER_MODE);
                out.push(*mode);
            }
            ControlMessage::RotateDevice => out.push(TYPE_ROTATE_DEVICE),
        }
        out
    }

    /// A plain single-finger tap helper.
    pub fn tap(action: TouchAction, position: Position) -> Self {
        ControlMessage::InjectTouch {
            action,
            pointer_id: POINTER_ID_MOUSE,
            position,
            pressure: if action == TouchAction::Up { 0.0 } else { 1.0 },
            action_button: 0,
            buttons: 0,
        }
    }
}

// ── Fixed-point helpers ──────────────────────────────────────────

/// 0.0..=1.0 to u16 where 1.0 maps to 0xFFFF.
fn unsigned_fixed_point(value: f32) -> u16 {
    let clamped = value.clamp(0.0, 1.0);
    let scaled = (clamped * 65536.0) as u32;
    scaled.min(0xFFFF) as u16
}

/// -1.0..=1.0 to i16 where 1.0 saturates at 0x7FFF.
fn signed_fixed_point(value: f32) -> i16 {
    let clamped = value.clamp(-1.0, 1.0);
    let scaled = (clamped * 32768.0) as i32;
    scaled.clamp(-0x8000, 0x7FFF) as i16
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycode_layout() {
        let bytes = ControlMessage::InjectKeycode {
            action: KeyAction::Down,
            keycode: 24, // VOLUME_UP
            repeat: 0,
            meta_state: 0x41,
        }
        .to_bytes();
        assert_eq!(bytes.len(), 14);
        assert_eq!(bytes[0], TYPE_INJECT_KEYCODE);
        assert_eq!(bytes[1], 0);
        assert_eq!(u32::from_be_bytes(bytes[2..6].try_into().unwrap()), 24);
        assert_eq!(u32::from_be_bytes(bytes[10..14].try_into().unwrap()), 0x41);
    }

    #[test]
    fn text_is_length_prefixed() {
        let bytes = ControlMessage::InjectText("hi there".into()).to_bytes();
        assert_eq!(bytes[0], TYPE_INJECT_TEXT);
        assert_eq!(u32::from_be_bytes(bytes[1..5].try_into().unwrap()), 8);
        assert_eq!(&bytes[5..], b"hi there");
    }

    #[test]
    fn touch_layout_is_32_bytes() {
        let bytes = ControlMessage::InjectTouch {
            action: TouchAction::Down,
            pointer_id: POINTER_ID_MOUSE,
            position: Position {
                x: 100,
                y: 200,
                screen_width: 1080,
                screen_height: 2400,
            },
            pressure: 1.0,
            action_button: 1,
            buttons: 1,
        }
        .to_bytes();

        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], TYPE_INJECT_TOUCH_EVENT);
        assert_eq!(bytes[1], 0);
        assert_eq!(u64::from_be_bytes(bytes[2..10].try_into().unwrap()), u64::MAX);
        assert_eq!(i32::from_be_bytes(bytes[10..14].try_into().unwrap()), 100);
        assert_eq!(i32::from_be_bytes(bytes[14..18].try_into().unwrap()), 200);
        assert_eq!(u16::from_be_bytes(bytes[18..20].try_into().unwrap()), 1080);
        assert_eq!(u16::from_be_bytes(bytes[20..22].try_into().unwrap()), 2400);
        // Full pressure saturates the fixed-point field.
        assert_eq!(u16::from_be_bytes(bytes[22..24].try_into().unwrap()), 0xFFFF);
    }

    #[test]
    fn scroll_layout_is_21_bytes() {
        let bytes = ControlMessage::InjectScroll {
            position: Position {
                x: 0,
                y: 0,
                screen_width: 1080,
                screen_height: 2400,
            },
            hscroll: 0.0,
            vscroll: -1.0,
            buttons: 0,
        }
        .to_bytes();

        assert_eq!(bytes.len(), 21);
        assert_eq!(bytes[0], TYPE_INJECT_SCROLL_EVENT);
        let vscroll = i16::from_be_bytes(bytes[15..17].try_into().unwrap());
        assert_eq!(vscroll, i16::MIN);
    }

    #[test]
    fn set_clipboard_layout() {
        let bytes = ControlMessage::SetClipboard {
            sequence: 7,
            paste: true,
            text: "abc".into(),
        }
        .to_bytes();
        assert_eq!(bytes[0], TYPE_SET_CLIPBOARD);
        assert_eq!(u64::from_be_bytes(bytes[1..9].try_into().unwrap()), 7);
        assert_eq!(bytes[9], 1);
        assert_eq!(u32::from_be_bytes(bytes[10..14].try_into().unwrap()), 3);
        assert_eq!(&bytes[14..], b"abc");
    }

    #[test]
    fn single_byte_messages() {
        for (message, tag) in [
            (ControlMessage::ExpandNotificationPanel, 5u8),
            (ControlMessage::ExpandSettingsPanel, 6),
            (ControlMessage::CollapsePanels, 7),
            (ControlMessage::RotateDevice, 11),
        ] {
            assert_eq!(message.to_bytes(), vec![tag]);
        }
    }

    #[test]
    fn fixed_point_conversions() {
        assert_eq!(unsigned_fixed_point(0.0), 0);
        assert_eq!(unsigned_fixed_point(1.0), 0xFFFF);
        assert_eq!(unsigned_fixed_point(0.5), 0x8000);
        assert_eq!(signed_fixed_point(0.0), 0);
        assert_eq!(signed_fixed_point(1.0), 0x7FFF);
        assert_eq!(signed_fixed_point(-1.0), -0x8000);
        assert_eq!(signed_fixed_point(0.5), 0x4000);
    }

    #[test]
    fn tap_helper_releases_pressure() {
        let position = Position {
            x: 1,
            y: 2,
            screen_width: 10,
            screen_height: 20,
        };
        match ControlMessage::tap(TouchAction::Up, position) {
            ControlMessage::InjectTouch { pressure, .. } => assert_eq!(pressure, 0.0),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
