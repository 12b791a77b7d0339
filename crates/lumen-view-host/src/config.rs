//! View host config.

use std::time::Duration;

use lumen_view_api::{config::Palette, DeviceIntRect, DeviceIntSize, Preferences, Rgba};
use serde::{Deserialize, Serialize};

/// Config of a [`ViewHost`].
///
/// [`ViewHost`]: crate::ViewHost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ViewHostConfig {
    /// Color painted where there is no frame to show.
    ///
    /// Magenta by default, so that a missing frame is obvious.
    pub sentinel: Rgba,

    /// Viewport size before the first resize, in device pixels.
    pub viewport_size: DeviceIntSize,

    /// Device pixels per CSS pixel before the first change.
    pub device_pixel_ratio: f64,

    /// Screen rectangle before the first change.
    pub screen_rect: DeviceIntRect,

    /// Initial preferences.
    pub preferences: Preferences,

    /// Initial palette.
    pub palette: Palette,

    /// Maximum number of crash respawns that can happen each within [`fast_respawn_window`] of the previous
    /// one, the next crash is not recovered.
    ///
    /// [`fast_respawn_window`]: Self::fast_respawn_window
    pub max_fast_respawns: u8,

    /// See [`max_fast_respawns`].
    ///
    /// [`max_fast_respawns`]: Self::max_fast_respawns
    pub fast_respawn_window: Duration,

    /// Number of launch attempts on respawn.
    pub launch_retries: u8,

    /// Time a crashed or closing renderer has to exit before it is killed.
    pub exit_grace: Duration,
}
impl ViewHostConfig {
    /// New config with the viewport size and device pixel ratio.
    pub fn new(viewport_size: DeviceIntSize, device_pixel_ratio: f64) -> Self {
        Self {
            viewport_size,
            device_pixel_ratio,
            ..Self::default()
        }
    }
}
impl Default for ViewHostConfig {
    /// Magenta sentinel, empty viewport, ratio `1.0`, `2` fast respawns within `60s`, `3` launch retries
    /// and `300ms` exit grace.
    fn default() -> Self {
        Self {
            sentinel: Rgba::MAGENTA,
            viewport_size: DeviceIntSize::zero(),
            device_pixel_ratio: 1.0,
            screen_rect: DeviceIntRect::zero(),
            preferences: Preferences::default(),
            palette: Palette::default(),
            max_fast_respawns: 2,
            fast_respawn_window: Duration::from_secs(60),
            launch_retries: 3,
            exit_grace: Duration::from_millis(300),
        }
    }
}
