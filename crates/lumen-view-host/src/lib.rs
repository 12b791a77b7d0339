//! Lumen View Host.
//!
//! UI side of the renderer bridge. A [`ViewHost`] launches a renderer with a [`RendererLauncher`],
//! forwards viewport, device and input state to it through a [`RenderClient`] and composites the
//! painted frames into host bitmaps with a [`FrameCompositor`].
//!
//! # Crash Recovery
//!
//! If the renderer crashes the host raises [`ViewEvent::RendererCrashed`], the last good frame stays on
//! display and [`ViewHost::handle_crash`] starts a new renderer with the same page state.

#![warn(unused_extern_crates)]
#![warn(missing_docs)]

mod client;
mod compositor;
mod config;
mod host;
mod launch;

pub use client::{ClientState, RenderClient};
pub use compositor::FrameCompositor;
pub use config::ViewHostConfig;
pub use host::{clamp_viewport_size, HostBitmapFormat, HostBitmapInfo, RespawnError, ViewEvent, ViewHost, MAX_VIEWPORT_PIXELS};
pub use launch::{CommandLauncher, RendererExit, RendererLauncher, RendererProcess, ThreadLauncher};

pub use lumen_view_api as api;
