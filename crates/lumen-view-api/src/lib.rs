//! Lumen View API.
//!
//! Lumen isolates page rendering to a different process (the renderer), this crate provides the protocol
//! shared by the UI process and the renderer.
//!
//! The UI side uses [`Channel`] to create the endpoint pair and the [`RendererRequests`] methods to
//! send requests. The renderer side adopts the transferred endpoint with [`RendererConfig::connect`]
//! and implements [`RendererApi`], usually with [`renderer::RendererPage`].
//!
//! # VERSION
//!
//! The [`VERSION`] of the `lumen-view-api` dependency must match in both processes, a renderer started
//! by an UI process with a different version exits with [`config::VERSION_MISMATCH_EXIT_CODE`].

#![warn(unused_extern_crates)]
#![warn(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod bitmap;
pub mod config;
pub mod convert;
pub mod input;
pub mod ipc;
pub mod page_client;
pub mod renderer;
mod types;

pub use bitmap::{AlphaType, Bitmap, BitmapError, BitmapFormat, Rgba};
pub use config::{ColorScheme, Palette, PreferredContrast, PreferredMotion, Preferences, RendererConfig};
pub use input::{EventResult, InputEvent, KeyEvent, KeyModifiers, MouseButtons, MouseEvent, MouseEventType};
pub use ipc::{Channel, ChannelError};
pub use types::*;

/// The *semver* of the protocol.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Request sent from the UI process to a renderer.
///
/// Tagged with the [`ClientHandle`] of the render client that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    handle: ClientHandle,
    data: RequestData,
}
impl Request {
    /// New request.
    pub fn new(handle: ClientHandle, data: RequestData) -> Self {
        Self { handle, data }
    }

    /// Handle of the client that sent the request.
    pub fn handle(&self) -> ClientHandle {
        self.handle
    }

    /// The request.
    pub fn data(&self) -> &RequestData {
        &self.data
    }

    /// Into the request.
    pub fn into_data(self) -> RequestData {
        self.data
    }
}

macro_rules! declare_api {
    (
        $(
            $(#[$meta:meta])*
            fn $method:ident(
                &mut $self:ident
                $(, $input:ident : $RequestType:ty)* $(,)?
            );
        )*
    ) => {
        /// Request payload, one variant for each [`RendererApi`] method.
        #[derive(Clone, PartialEq, Serialize, Deserialize)]
        #[allow(non_camel_case_types)]
        #[allow(missing_docs)]
        #[allow(clippy::large_enum_variant)]
        pub enum RequestData {
            $(
                $(#[$meta])*
                $method { $($input: $RequestType),* },
            )*
        }
        impl RequestData {
            /// Name of the request method.
            #[allow(unused_doc_comments)]
            pub fn name(&self) -> &'static str {
                match self {
                    $(
                        $(#[$meta])*
                        RequestData::$method { .. } => stringify!($method),
                    )*
                }
            }
        }
        impl fmt::Debug for RequestData {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                #[allow(unused_doc_comments)]
                if f.alternate() {
                    match self {
                        $(
                            $(#[$meta])*
                            RequestData::$method { $($input),* } => write!(f, "{}{:#?}", stringify!($method), ($($input),*)),
                        )*
                    }
                } else {
                    write!(f, "{}(..)", self.name())
                }
            }
        }

        /// Request methods of a render client.
        ///
        /// All methods are fire-and-forget, they only fail when the client is already dead.
        pub trait RendererRequests {
            /// Queue the request to be sent to the renderer.
            fn send_request(&self, data: RequestData) -> Result<(), ClientDead>;

            $(
                $(#[$meta])*
                #[allow(clippy::too_many_arguments)]
                fn $method(&self $(, $input: $RequestType)*) -> Result<(), ClientDead> {
                    self.send_request(RequestData::$method { $($input),* })
                }
            )*
        }

        /// The renderer API.
        pub trait RendererApi {
            /// Already implemented, matches a request and calls the corresponding method.
            fn dispatch(&mut self, data: RequestData) {
                match data {
                    $(
                        #[allow(unused_doc_comments)]
                        $(#[$meta])* // for the cfg
                        RequestData::$method { $($input),* } => self.$method($($input),*),
                    )*
                }
            }

            $(
                $(#[$meta])*
                #[allow(clippy::too_many_arguments)]
                fn $method(&mut self, $($input: $RequestType),*);
            )*
        }
    };
}
declare_api! {
    /// Bind the page to the client that sent this request.
    ///
    /// Must be the first request of a client, requests tagged with any other handle are ignored after it.
    fn set_window_handle(&mut self, page_id: PageId);

    /// Set the viewport size in device pixels, the next frame is painted in this size.
    fn set_viewport_size(&mut self, page_id: PageId, size: DeviceIntSize);

    /// Set the scale factor between device pixels and CSS pixels.
    fn set_device_pixels_per_css_pixel(&mut self, page_id: PageId, ratio: f64);

    /// Append an input event to the page queue.
    ///
    /// The renderer reports [`Event::InputEventHandled`] with the `id` after dispatching it.
    fn enqueue_input_event(&mut self, page_id: PageId, id: InputEventId, event: InputEvent);

    /// Navigate the page to the `url`.
    fn load_url(&mut self, page_id: PageId, url: String);

    /// Set the accessibility and theme preferences.
    fn set_preferences(&mut self, page_id: PageId, preferences: Preferences);

    /// Set the system colors.
    fn set_palette(&mut self, page_id: PageId, palette: Palette);

    /// Set the screen rectangle in device pixels.
    fn set_screen_rect(&mut self, page_id: PageId, rect: DeviceIntRect);

    /// Orderly shutdown, the renderer exits after this request.
    fn exit(&mut self);

    /// Terminate the renderer abruptly, used to test crash recovery.
    #[cfg(debug_assertions)]
    fn crash(&mut self);
}
