//! Host preference types and renderer process config.

use std::{
    env, io,
    os::fd::RawFd,
    sync::atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{bitmap::Rgba, ipc::RendererChannel};

/// Env var that carries the inherited channel descriptor number.
pub const RENDERER_FD_VAR: &str = "LUMEN_RENDERER_FD";
/// Env var that carries the [`VERSION`] of the UI process.
///
/// [`VERSION`]: crate::VERSION
pub const RENDERER_VERSION_VAR: &str = "LUMEN_RENDERER_VERSION";
/// Exit code of a renderer started by an UI process with a different [`VERSION`].
///
/// Fits in the 8 bits of an unix exit status.
///
/// [`VERSION`]: crate::VERSION
pub const VERSION_MISMATCH_EXIT_CODE: i32 = 0x56;

/// Color scheme preference, the `prefers-color-scheme` media feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorScheme {
    /// Follow the host palette.
    #[default]
    Auto,
    /// Dark text, light background.
    Light,
    /// Light text, dark background.
    Dark,
}

/// The `prefers-contrast` media feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PreferredContrast {
    /// Follow the host system setting.
    #[default]
    Auto,
    /// Lower contrast.
    Less,
    /// Higher contrast.
    More,
    /// No preference.
    NoPreference,
}

/// The `prefers-reduced-motion` media feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PreferredMotion {
    /// Follow the host system setting.
    #[default]
    Auto,
    /// No preference.
    NoPreference,
    /// Minimize non-essential motion.
    ///
    /// People with vestibular disorders usually enable this system wide.
    Reduce,
}

/// Accessibility and theme preferences of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Preferences {
    /// Color scheme.
    pub color_scheme: ColorScheme,
    /// Contrast.
    pub contrast: PreferredContrast,
    /// Motion.
    pub motion: PreferredMotion,
}
impl Preferences {
    /// New preferences.
    pub fn new(color_scheme: ColorScheme, contrast: PreferredContrast, motion: PreferredMotion) -> Self {
        Self {
            color_scheme,
            contrast,
            motion,
        }
    }
}

/// System colors the page can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Palette {
    /// If the palette is dark, used to resolve [`ColorScheme::Auto`].
    pub is_dark: bool,
    /// Canvas background.
    pub base: Rgba,
    /// Canvas text.
    pub base_text: Rgba,
    /// Accent color.
    pub accent: Rgba,
    /// Selection background.
    pub selection: Rgba,
    /// Selection text.
    pub selection_text: Rgba,
    /// Unvisited link.
    pub link: Rgba,
    /// Visited link.
    pub visited_link: Rgba,
}
impl Palette {
    /// Light palette.
    pub const fn light() -> Self {
        Self {
            is_dark: false,
            base: Rgba::WHITE,
            base_text: Rgba::BLACK,
            accent: Rgba::new(10, 10, 200, 255),
            selection: Rgba::new(84, 151, 241, 255),
            selection_text: Rgba::WHITE,
            link: Rgba::new(0, 0, 238, 255),
            visited_link: Rgba::new(85, 26, 139, 255),
        }
    }

    /// Dark palette.
    pub const fn dark() -> Self {
        Self {
            is_dark: true,
            base: Rgba::new(18, 18, 18, 255),
            base_text: Rgba::new(232, 232, 232, 255),
            accent: Rgba::new(120, 160, 255, 255),
            selection: Rgba::new(38, 79, 120, 255),
            selection_text: Rgba::WHITE,
            link: Rgba::new(158, 158, 255, 255),
            visited_link: Rgba::new(208, 173, 240, 255),
        }
    }
}
impl Default for Palette {
    /// Light.
    fn default() -> Self {
        Self::light()
    }
}

/// Configuration for starting a renderer.
///
/// The inherited descriptor is owned by the config, it is taken from the environment only once per
/// process, see [`from_env`].
///
/// [`from_env`]: Self::from_env
#[derive(Debug, PartialEq, Eq)]
pub struct RendererConfig {
    fd: RawFd,
    version: String,
}
impl RendererConfig {
    /// Reads config from environment variables set by the UI process launcher.
    ///
    /// Renderer implementers should call this at startup, returns `Some(_)` if the process was
    /// started as a renderer. The [`RENDERER_FD_VAR`] is removed from the environment and only the
    /// first call can return `Some(_)`.
    pub fn from_env() -> Option<Self> {
        static TAKEN: AtomicBool = AtomicBool::new(false);

        let fd = env::var(RENDERER_FD_VAR).ok()?;
        if TAKEN.swap(true, Ordering::AcqRel) {
            tracing::error!("{RENDERER_FD_VAR} already taken by this process");
            return None;
        }
        env::remove_var(RENDERER_FD_VAR);

        let fd = match fd.parse() {
            Ok(fd) => fd,
            Err(e) => {
                tracing::error!("invalid {RENDERER_FD_VAR} {fd:?}, {e}");
                return None;
            }
        };
        let version = env::var(RENDERER_VERSION_VAR).unwrap_or_default();
        Some(Self { fd, version })
    }

    /// Inherited channel descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// [`VERSION`] of the UI process that started the renderer.
    ///
    /// [`VERSION`]: crate::VERSION
    pub fn version(&self) -> &str {
        &self.version
    }

    /// If the UI process was built with the same [`VERSION`].
    ///
    /// [`VERSION`]: crate::VERSION
    pub fn is_version_match(&self) -> bool {
        self.version == crate::VERSION
    }

    /// Adopt the inherited channel.
    ///
    /// Exits the process with [`VERSION_MISMATCH_EXIT_CODE`] if the UI process uses a different API version.
    pub fn connect(self) -> io::Result<RendererChannel> {
        if !self.is_version_match() {
            tracing::error!(
                "renderer API version mismatch, UI process is {:?}, renderer is {:?}",
                self.version,
                crate::VERSION
            );
            std::process::exit(VERSION_MISMATCH_EXIT_CODE);
        }

        // SAFETY: `from_env` hands out the launcher descriptor once, and only it creates configs.
        unsafe { RendererChannel::from_raw_fd(self.fd) }
    }
}
