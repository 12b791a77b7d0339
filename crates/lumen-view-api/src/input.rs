//! Input event types.
//!
//! The bridge forwards these to the renderer without interpreting them.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{DeviceIntPoint, InputEventId, PageId};

bitflags! {
    /// Keyboard modifiers held during an input event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct KeyModifiers: u8 {
        /// Alt or option.
        const ALT = 1 << 0;
        /// Control.
        const CTRL = 1 << 1;
        /// Shift.
        const SHIFT = 1 << 2;
        /// Windows, command or meta key.
        const SUPER = 1 << 3;
    }

    /// Set of mouse buttons.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MouseButtons: u8 {
        /// Usually the left button.
        const PRIMARY = 1 << 0;
        /// Usually the right button.
        const SECONDARY = 1 << 1;
        /// Wheel button.
        const MIDDLE = 1 << 2;
        /// Navigate back button.
        const BACKWARD = 1 << 3;
        /// Navigate forward button.
        const FORWARD = 1 << 4;
    }
}

/// Kind of mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseEventType {
    /// Button pressed.
    MouseDown,
    /// Button released.
    MouseUp,
    /// Cursor moved.
    MouseMove,
    /// Button pressed twice in quick succession.
    DoubleClick,
    /// Wheel scrolled.
    MouseWheel,
}

/// Mouse or single pointer touch event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseEvent {
    /// Event kind.
    pub kind: MouseEventType,
    /// Position in the viewport.
    pub position: DeviceIntPoint,
    /// Position in the screen.
    pub screen_position: DeviceIntPoint,
    /// Button that changed state.
    pub button: MouseButtons,
    /// Buttons held after the event.
    pub buttons: MouseButtons,
    /// Keyboard modifiers.
    pub modifiers: KeyModifiers,
    /// Horizontal wheel delta.
    pub wheel_delta_x: i32,
    /// Vertical wheel delta.
    pub wheel_delta_y: i32,
}
impl MouseEvent {
    /// New event with the primary button and no modifiers, like a touch pointer generates.
    pub fn primary(kind: MouseEventType, position: DeviceIntPoint, screen_position: DeviceIntPoint) -> Self {
        Self {
            kind,
            position,
            screen_position,
            button: MouseButtons::PRIMARY,
            buttons: MouseButtons::PRIMARY,
            modifiers: KeyModifiers::empty(),
            wheel_delta_x: 0,
            wheel_delta_y: 0,
        }
    }
}

/// Kind of key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyEventType {
    /// Key pressed.
    KeyDown,
    /// Key released.
    KeyUp,
}

/// Keyboard event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Event kind.
    pub kind: KeyEventType,
    /// Platform independent key name.
    pub key: String,
    /// Text generated by the key, if any.
    pub text: Option<String>,
    /// Keyboard modifiers.
    pub modifiers: KeyModifiers,
    /// If the event is an auto-repeat.
    pub repeat: bool,
}

/// Input event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum InputEvent {
    /// Mouse or touch.
    Mouse(MouseEvent),
    /// Keyboard.
    Key(KeyEvent),
}

/// Input event in a renderer page queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedInputEvent {
    /// Target page.
    pub page_id: PageId,
    /// Event id, reported back when the event is handled.
    pub id: InputEventId,
    /// The event.
    pub event: InputEvent,
}

/// Outcome of handling an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventResult {
    /// Page consumed the event.
    Handled,
    /// Page did not consume the event, the host may apply a default action.
    NotHandled,
    /// Page script cancelled the default action.
    Cancelled,
    /// Event was dropped without being dispatched.
    Dropped,
}
