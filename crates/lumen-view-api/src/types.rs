//! General protocol types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bitmap::{AlphaType, BitmapFormat};
use crate::input::EventResult;

macro_rules! declare_id {
    ($(
        $(#[$docs:meta])+
        pub struct $Id:ident(_);
    )+) => {$(
        $(#[$docs])+
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $Id(u32);

        impl $Id {
            /// Dummy ID, zero.
            pub const INVALID: Self = Self(0);

            /// Create the first valid ID.
            pub const fn first() -> Self {
                Self(1)
            }

            /// Create the next ID.
            ///
            /// IDs wrap around to [`first`] when the entire `u32` space is used, it is never `INVALID`.
            ///
            /// [`first`]: Self::first
            #[must_use]
            pub const fn next(self) -> Self {
                let r = Self(self.0.wrapping_add(1));
                if r.0 == Self::INVALID.0 {
                    Self::first()
                } else {
                    r
                }
            }

            /// Returns self and replace self with [`next`].
            ///
            /// [`next`]: Self::next
            #[must_use]
            pub fn incr(&mut self) -> Self {
                std::mem::replace(self, self.next())
            }

            /// Get the raw ID.
            pub const fn get(self) -> u32 {
                self.0
            }

            /// Create an ID using a custom value.
            pub const fn from_raw(id: u32) -> Self {
                Self(id)
            }
        }
    )+};
}

declare_id! {
    /// Render client generation, starts at one and changes every respawn, it is never zero.
    ///
    /// The UI process defines the ID.
    pub struct ClientGen(_);

    /// Id of a page hosted by a renderer.
    ///
    /// The UI process defines the ID.
    pub struct PageId(_);

    /// Id of an input event enqueued for a page.
    ///
    /// The UI process defines the ID, it is reported back in [`Event::InputEventHandled`].
    pub struct InputEventId(_);
}

/// Random identifier of a render client.
///
/// Generated once per client lifetime, every request sent by the client is tagged with it. A respawned
/// client gets a new handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientHandle(uuid::Uuid);
impl ClientHandle {
    /// New random handle.
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Nil handle, never generated by [`new_random`].
    ///
    /// [`new_random`]: Self::new_random
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// If is the [`nil`] handle.
    ///
    /// [`nil`]: Self::nil
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}
impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientHandle({})", self.0.hyphenated())
    }
}
impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Physical device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevicePixel {}

/// Device independent CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CssPixel {}

/// Size in device pixels.
pub type DeviceIntSize = euclid::Size2D<i32, DevicePixel>;
/// Point in device pixels.
pub type DeviceIntPoint = euclid::Point2D<i32, DevicePixel>;
/// Rectangle in device pixels.
pub type DeviceIntRect = euclid::Rect<i32, DevicePixel>;
/// Point in CSS pixels.
pub type CssPoint = euclid::Point2D<f32, CssPixel>;

/// A frame painted by the renderer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame size in device pixels.
    pub size: DeviceIntSize,
    /// Bytes per row.
    pub stride: usize,
    /// Pixel format, renderers paint in [`BitmapFormat::Bgra8888`].
    pub format: BitmapFormat,
    /// Alpha encoding.
    pub alpha: AlphaType,
    /// Pixel rows, `stride * height` bytes.
    #[serde(with = "serde_bytes")]
    pub pixels: Vec<u8>,
}
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("alpha", &self.alpha)
            .field("pixels", &format_args!("<{} bytes>", self.pixels.len()))
            .finish()
    }
}

/// Notifications sent from the renderer process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Event {
    /// A new frame is available for the page.
    FrameReady {
        /// Page that painted.
        page_id: PageId,
        /// The painted pixels.
        frame: Frame,
    },
    /// Page started loading an URL.
    NavigationStarted {
        /// Page that is navigating.
        page_id: PageId,
        /// Target URL.
        url: String,
        /// If the navigation is the result of a redirect.
        is_redirect: bool,
    },
    /// Page finished loading an URL.
    NavigationFinished {
        /// Page that navigated.
        page_id: PageId,
        /// Loaded URL.
        url: String,
    },
    /// Renderer finished handling an input event.
    InputEventHandled {
        /// Page that received the event.
        page_id: PageId,
        /// Id from the enqueue request.
        id: InputEventId,
        /// If the page consumed the event.
        result: EventResult,
    },

    /// The channel closed without an orderly shutdown, probably because the renderer crashed.
    ///
    /// This event is never send by the renderer, the UI side generates it once when it detects the crash.
    /// The [`ClientGen`] is the generation of the client that was lost.
    Crashed(ClientGen),
}

/// Error returned by request methods of a render client that is not live anymore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientDead;
impl fmt::Display for ClientDead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render client is dead")
    }
}
impl std::error::Error for ClientDead {}
