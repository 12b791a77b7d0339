//! View host, the UI side view of a renderer page.

use std::{
    collections::VecDeque,
    fmt, io,
    sync::Arc,
    time::Instant,
};

use lumen_view_api::{
    bitmap::{AlphaType, Bitmap, BitmapFormat},
    config::Palette,
    ipc::MAX_MESSAGE_LEN,
    ClientDead, ClientGen, DeviceIntPoint, DeviceIntRect, DeviceIntSize, Event, EventResult, InputEvent, InputEventId, MouseEvent,
    MouseEventType, PageId, Preferences, RendererRequests,
};
use parking_lot::Mutex;

use crate::{
    client::RenderClient,
    compositor::FrameCompositor,
    config::ViewHostConfig,
    launch::{RendererExit, RendererLauncher},
};

/// Event raised by a [`ViewHost`].
///
/// Raised in the render client listener thread, except [`RendererRespawned`] that is raised in the
/// thread that called the respawn. Handlers must redispatch to the UI thread before touching UI state.
///
/// The handler is never called concurrently. It can call back into the [`ViewHost`], for example
/// [`ViewHost::handle_crash`] on [`RendererCrashed`], events raised meanwhile are delivered in order after
/// the handler returns.
///
/// [`RendererRespawned`]: ViewEvent::RendererRespawned
/// [`RendererCrashed`]: ViewEvent::RendererCrashed
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ViewEvent {
    /// A new frame is available, the host should repaint.
    ReadyToPaint,
    /// Page started loading an URL.
    NavigationStarted {
        /// Target URL.
        url: String,
        /// If the navigation is the result of a redirect.
        is_redirect: bool,
    },
    /// Page finished loading an URL.
    NavigationFinished {
        /// Loaded URL.
        url: String,
    },
    /// Renderer finished handling an input event.
    InputEventHandled {
        /// Id returned by the enqueue method.
        id: InputEventId,
        /// If the page consumed the event.
        result: EventResult,
    },
    /// The renderer crashed, the host should call [`ViewHost::handle_crash`] with the generation.
    RendererCrashed(ClientGen),
    /// A new renderer was started, the page state is restored right after.
    ///
    /// Raised before any event of the new renderer.
    RendererRespawned(ClientGen),
}

/// Error respawning a renderer.
#[derive(Debug)]
#[non_exhaustive]
pub enum RespawnError {
    /// Renderer crashed too many times in a short period, it is not respawned.
    TooManyCrashes(u8),
    /// Renderer was built with a different API version, it is not respawned.
    VersionMismatch,
    /// Failed to launch the new renderer.
    Launch(io::Error),
}
impl fmt::Display for RespawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespawnError::TooManyCrashes(n) => write!(f, "renderer crashed {n} times in a short period"),
            RespawnError::VersionMismatch => write!(f, "renderer API version mismatch"),
            RespawnError::Launch(e) => write!(f, "failed to launch renderer, {e}"),
        }
    }
}
impl std::error::Error for RespawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RespawnError::Launch(e) => Some(e),
            _ => None,
        }
    }
}

/// Pixel format of a host bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostBitmapFormat {
    /// 32-bit RGBA, premultiplied.
    Rgba8888,
    /// 32-bit RGB with padding byte.
    Rgbx8888,
    /// 32-bit BGRA, premultiplied.
    Bgra8888,
    /// 16-bit RGB, not supported.
    Rgb565,
    /// 16-bit RGBA, not supported.
    Rgba4444,
    /// 8-bit alpha, not supported.
    A8,
    /// Unknown platform format code.
    Other(i32),
}
impl HostBitmapFormat {
    /// Bitmap format the compositor writes, if supported.
    pub fn bitmap_format(self) -> Option<BitmapFormat> {
        match self {
            HostBitmapFormat::Rgba8888 => Some(BitmapFormat::Rgba8888),
            HostBitmapFormat::Rgbx8888 => Some(BitmapFormat::Rgbx8888),
            HostBitmapFormat::Bgra8888 => Some(BitmapFormat::Bgra8888),
            _ => None,
        }
    }
}

/// Description of a platform bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostBitmapInfo {
    /// Pixel format.
    pub format: HostBitmapFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    /// If the pixels live in GPU memory and cannot be written by the CPU.
    pub is_hardware: bool,
}

/// Frames received from the renderer.
///
/// Only mutated by the listener when a frame arrives and by the view host on resize and crash.
struct FrameStore {
    viewport_size: DeviceIntSize,
    front: Option<Bitmap<'static>>,
    has_usable_bitmap: bool,
    backup: Option<Bitmap<'static>>,
}
impl FrameStore {
    fn source(&self) -> Option<&Bitmap<'static>> {
        if self.has_usable_bitmap {
            self.front.as_ref()
        } else {
            self.backup.as_ref()
        }
    }

    /// Keep the current frame as the backup, it is not usable anymore.
    fn retire_front(&mut self) {
        if self.has_usable_bitmap {
            if let Some(front) = self.front.take() {
                self.backup = Some(front);
            }
            self.has_usable_bitmap = false;
        }
    }
}

/// Largest viewport area in pixels, a frame of this area still fits in one channel message.
pub const MAX_VIEWPORT_PIXELS: u64 = (MAX_MESSAGE_LEN as u64 - FRAME_MESSAGE_OVERHEAD) / 4;
// frame metadata and message framing.
const FRAME_MESSAGE_OVERHEAD: u64 = 1024;

/// Clamp the `size` to positive dimensions with at most [`MAX_VIEWPORT_PIXELS`] area.
pub fn clamp_viewport_size(size: DeviceIntSize) -> DeviceIntSize {
    let width = size.width.max(0) as u64;
    let height = size.height.max(0) as u64;
    if width * height <= MAX_VIEWPORT_PIXELS {
        return DeviceIntSize::new(width as i32, height as i32);
    }
    let width = width.min(MAX_VIEWPORT_PIXELS);
    let height = height.min(MAX_VIEWPORT_PIXELS / width);
    let clamped = DeviceIntSize::new(width as i32, height as i32);
    tracing::warn!("viewport size {size:?} is too large, clamped to {clamped:?}");
    clamped
}

/// Delivers [`ViewEvent`]s to the host handler.
///
/// Events raised while the handler runs, in any thread including the handler's own, are queued and
/// delivered by the thread that holds the handler.
struct EventDispatch {
    handler: Mutex<Box<dyn FnMut(ViewEvent) + Send>>,
    pending: Mutex<VecDeque<ViewEvent>>,
}
impl EventDispatch {
    fn new(handler: impl FnMut(ViewEvent) + Send + 'static) -> Self {
        Self {
            handler: Mutex::new(Box::new(handler)),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn notify(&self, ev: ViewEvent) {
        self.pending.lock().push_back(ev);
        while let Some(mut handler) = self.handler.try_lock() {
            loop {
                let next = self.pending.lock().pop_front();
                match next {
                    Some(ev) => (*handler)(ev),
                    None => break,
                }
            }
            drop(handler);

            // an event may have been queued after the last pop but before the unlock.
            if self.pending.lock().is_empty() {
                break;
            }
        }
    }
}

type EventHandler = Arc<EventDispatch>;

/// UI side of a renderer page.
///
/// Owns the [`RenderClient`], forwards host state and input to the renderer and composites the received
/// frames into host bitmaps. The page state is kept so that a crashed renderer can be replaced by
/// [`handle_crash`] without the host noticing anything but a brief frame freeze.
///
/// [`handle_crash`]: Self::handle_crash
pub struct ViewHost {
    config: ViewHostConfig,
    launcher: Box<dyn RendererLauncher>,
    client: RenderClient,
    page_id: PageId,
    next_input_id: InputEventId,
    device_pixel_ratio: f64,
    screen_rect: DeviceIntRect,
    preferences: Preferences,
    palette: Palette,
    url: Option<String>,
    frames: Arc<Mutex<FrameStore>>,
    on_event: EventHandler,
    compositor: FrameCompositor,
    last_respawn: Option<Instant>,
    fast_respawn_count: u8,
}
impl ViewHost {
    /// Launch a renderer and setup the page.
    ///
    /// The `on_event` closure is called in another thread, see [`ViewEvent`] for details.
    pub fn new<L, F>(config: ViewHostConfig, launcher: L, on_event: F) -> io::Result<Self>
    where
        L: RendererLauncher + 'static,
        F: FnMut(ViewEvent) + Send + 'static,
    {
        let frames = Arc::new(Mutex::new(FrameStore {
            viewport_size: clamp_viewport_size(config.viewport_size),
            front: None,
            has_usable_bitmap: false,
            backup: None,
        }));
        let on_event: EventHandler = Arc::new(EventDispatch::new(on_event));
        let launcher: Box<dyn RendererLauncher> = Box::new(launcher);
        let generation = ClientGen::first();
        let client = Self::spawn_client(&*launcher, &config, generation, &frames, &on_event)?;

        let mut host = Self {
            page_id: PageId::first(),
            next_input_id: InputEventId::first(),
            device_pixel_ratio: config.device_pixel_ratio,
            screen_rect: config.screen_rect,
            preferences: config.preferences,
            palette: config.palette,
            url: None,
            compositor: FrameCompositor::new(config.sentinel),
            config,
            launcher,
            client,
            frames,
            on_event,
            last_respawn: None,
            fast_respawn_count: 0,
        };
        let _ = host.init_page();
        Ok(host)
    }

    fn spawn_client(
        launcher: &dyn RendererLauncher,
        config: &ViewHostConfig,
        generation: ClientGen,
        frames: &Arc<Mutex<FrameStore>>,
        on_event: &EventHandler,
    ) -> io::Result<RenderClient> {
        let frames = frames.clone();
        let on_event = on_event.clone();
        let mut client = RenderClient::spawn(launcher, generation, move |ev| {
            let ev = match ev {
                Event::FrameReady { frame, .. } => {
                    let size = frame.size;
                    let bitmap = match Bitmap::from_frame(frame) {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::error!("invalid frame from renderer, {e}");
                            return;
                        }
                    };
                    let mut frames = frames.lock();
                    if size != frames.viewport_size {
                        tracing::trace!("ignoring frame of size {size:?}, viewport is {:?}", frames.viewport_size);
                        return;
                    }
                    frames.front = Some(bitmap);
                    frames.has_usable_bitmap = true;
                    ViewEvent::ReadyToPaint
                }
                Event::NavigationStarted { url, is_redirect, .. } => ViewEvent::NavigationStarted { url, is_redirect },
                Event::NavigationFinished { url, .. } => ViewEvent::NavigationFinished { url },
                Event::InputEventHandled { id, result, .. } => ViewEvent::InputEventHandled { id, result },
                Event::Crashed(generation) => {
                    frames.lock().retire_front();
                    ViewEvent::RendererCrashed(generation)
                }
                ev => {
                    tracing::debug!("ignoring {ev:?}");
                    return;
                }
            };
            on_event.notify(ev);
        })?;
        client.set_exit_grace(config.exit_grace);
        Ok(client)
    }

    /// Send the page state to a new client.
    fn init_page(&mut self) -> Result<(), ClientDead> {
        let page_id = self.page_id;
        let viewport_size = self.frames.lock().viewport_size;
        let c = &self.client;
        c.set_window_handle(page_id)?;
        c.set_device_pixels_per_css_pixel(page_id, self.device_pixel_ratio)?;
        c.set_screen_rect(page_id, self.screen_rect)?;
        c.set_palette(page_id, self.palette)?;
        c.set_preferences(page_id, self.preferences)?;
        if !viewport_size.is_empty() {
            c.set_viewport_size(page_id, viewport_size)?;
        }
        if let Some(url) = &self.url {
            c.load_url(page_id, url.clone())?;
        }
        Ok(())
    }

    /// Current render client.
    pub fn client(&self) -> &RenderClient {
        &self.client
    }

    /// Generation of the current render client.
    pub fn generation(&self) -> ClientGen {
        self.client.generation()
    }

    /// The page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Viewport size in device pixels.
    pub fn viewport_size(&self) -> DeviceIntSize {
        self.frames.lock().viewport_size
    }

    /// Device pixels per CSS pixel.
    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    /// Last URL requested by [`load`].
    ///
    /// [`load`]: Self::load
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// If the latest frame matches the viewport.
    pub fn has_usable_bitmap(&self) -> bool {
        self.frames.lock().has_usable_bitmap
    }

    /// If there is a previous frame kept for display while a new one is produced.
    pub fn has_backup_bitmap(&self) -> bool {
        self.frames.lock().backup.is_some()
    }

    /// Resize the viewport.
    ///
    /// The current frame becomes the backup until the renderer paints in the new size. The size is
    /// clamped using [`clamp_viewport_size`].
    pub fn set_viewport_size(&mut self, size: DeviceIntSize) -> Result<(), ClientDead> {
        let size = clamp_viewport_size(size);
        {
            let mut frames = self.frames.lock();
            if frames.viewport_size == size {
                return Ok(());
            }
            frames.viewport_size = size;
            frames.retire_front();
        }
        self.client.set_viewport_size(self.page_id, size)
    }

    /// Set the device pixels per CSS pixel.
    pub fn set_device_pixel_ratio(&mut self, ratio: f64) -> Result<(), ClientDead> {
        self.device_pixel_ratio = ratio;
        self.client.set_device_pixels_per_css_pixel(self.page_id, ratio)
    }

    /// Set the screen rectangle.
    pub fn set_screen_rect(&mut self, rect: DeviceIntRect) -> Result<(), ClientDead> {
        self.screen_rect = rect;
        self.client.set_screen_rect(self.page_id, rect)
    }

    /// Set the accessibility and theme preferences.
    pub fn set_preferences(&mut self, preferences: Preferences) -> Result<(), ClientDead> {
        self.preferences = preferences;
        self.client.set_preferences(self.page_id, preferences)
    }

    /// Set the system colors.
    pub fn set_palette(&mut self, palette: Palette) -> Result<(), ClientDead> {
        self.palette = palette;
        self.client.set_palette(self.page_id, palette)
    }

    /// Navigate to the `url`.
    pub fn load(&mut self, url: impl Into<String>) -> Result<(), ClientDead> {
        let url = url.into();
        self.url = Some(url.clone());
        self.client.load_url(self.page_id, url)
    }

    /// Enqueue an input event for the page.
    ///
    /// Returns the id reported back in [`ViewEvent::InputEventHandled`].
    pub fn enqueue_input_event(&mut self, event: InputEvent) -> Result<InputEventId, ClientDead> {
        let id = self.next_input_id.incr();
        self.client.enqueue_input_event(self.page_id, id, event)?;
        Ok(id)
    }

    /// Enqueue a primary button mouse event.
    ///
    /// The `x` and `y` are in the viewport space, the `raw_x` and `raw_y` are the same point in the
    /// screen space, as reported by the platform.
    pub fn mouse_event(&mut self, kind: MouseEventType, x: i32, y: i32, raw_x: i32, raw_y: i32) -> Result<InputEventId, ClientDead> {
        let position = DeviceIntPoint::new(x, y);
        let screen_position = DeviceIntPoint::new(raw_x, raw_y);
        self.enqueue_input_event(InputEvent::Mouse(MouseEvent::primary(kind, position, screen_position)))
    }

    /// Composite the latest usable frame into `dest`.
    ///
    /// Uses the backup frame if the latest is not usable and fills with the sentinel color if there is
    /// no frame at all.
    pub fn paint_into(&self, dest: &mut Bitmap<'_>) {
        let frames = self.frames.lock();
        self.compositor.composite(dest, frames.source());
    }

    /// Composite into a platform bitmap.
    ///
    /// # Panics
    ///
    /// If the bitmap is a hardware bitmap, the format is not supported or the `pixels` do not match the `info`.
    pub fn paint_into_host_buffer(&self, info: HostBitmapInfo, pixels: &mut [u8]) {
        assert!(!info.is_hardware, "cannot paint into hardware bitmaps");
        let format = match info.format.bitmap_format() {
            Some(f) => f,
            None => panic!("unsupported host bitmap format {:?}", info.format),
        };
        let size = DeviceIntSize::new(info.width as i32, info.height as i32);
        let mut dest = match Bitmap::wrap(format, AlphaType::Premultiplied, size, info.stride as usize, pixels) {
            Ok(b) => b,
            Err(e) => panic!("invalid host bitmap, {e}"),
        };
        self.paint_into(&mut dest);
    }

    /// Handle a [`ViewEvent::RendererCrashed`].
    ///
    /// The `generation` is the one provided by the event, it is used to ignore crashes that were already
    /// handled. Starts a new renderer and restores the page state, the backup frame is shown until the
    /// new renderer paints.
    ///
    /// The old renderer exit status is logged using the `renderer_respawn` target.
    pub fn handle_crash(&mut self, generation: ClientGen) -> Result<(), RespawnError> {
        if generation != self.client.generation() {
            return Ok(());
        }
        self.respawn_impl(true)
    }

    /// Replace the renderer with a new one, even if it is not crashed.
    pub fn respawn(&mut self) -> Result<(), RespawnError> {
        self.respawn_impl(false)
    }

    fn respawn_impl(&mut self, is_crash: bool) -> Result<(), RespawnError> {
        let _span = tracing::trace_span!("respawn_renderer", is_crash).entered();

        if is_crash {
            tracing::error!(target: "renderer_respawn", "renderer crashed, will try respawn");

            let t = Instant::now();
            if let Some(last_respawn) = self.last_respawn {
                if t - last_respawn < self.config.fast_respawn_window {
                    self.fast_respawn_count += 1;
                    if self.fast_respawn_count >= self.config.max_fast_respawns {
                        tracing::error!(
                            target: "renderer_respawn",
                            "crash respawn happened {} times in less than {:?}, will not respawn",
                            self.fast_respawn_count,
                            self.config.fast_respawn_window
                        );
                        self.client.shutdown();
                        return Err(RespawnError::TooManyCrashes(self.fast_respawn_count));
                    }
                } else {
                    self.fast_respawn_count = 0;
                }
            }
            self.last_respawn = Some(t);
        } else {
            self.last_respawn = None;
        }

        let exit = self.client.shutdown();
        if exit.is_some_and(RendererExit::is_version_mismatch) {
            return Err(RespawnError::VersionMismatch);
        }

        let next_gen = self.client.generation().next();
        let mut retries = self.config.launch_retries.max(1);
        self.client = loop {
            match Self::spawn_client(&*self.launcher, &self.config, next_gen, &self.frames, &self.on_event) {
                Ok(c) => break c,
                Err(e) => {
                    tracing::error!(target: "renderer_respawn", "failed to respawn, {e}");
                    retries -= 1;
                    if retries == 0 {
                        return Err(RespawnError::Launch(e));
                    }
                    tracing::info!(target: "renderer_respawn", "retrying respawn");
                }
            }
        };

        if !is_crash {
            self.frames.lock().retire_front();
        }

        // the new renderer only sends events in response to the page restore.
        self.on_event.notify(ViewEvent::RendererRespawned(next_gen));
        if self.init_page().is_err() {
            tracing::error!(target: "renderer_respawn", "renderer crashed during page restore");
        }
        Ok(())
    }
}
impl fmt::Debug for ViewHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHost")
            .field("client", &self.client)
            .field("page_id", &self.page_id)
            .field("device_pixel_ratio", &self.device_pixel_ratio)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_formats() {
        assert_eq!(HostBitmapFormat::Rgba8888.bitmap_format(), Some(BitmapFormat::Rgba8888));
        assert_eq!(HostBitmapFormat::Rgb565.bitmap_format(), None);
        assert_eq!(HostBitmapFormat::Other(42).bitmap_format(), None);
    }

    #[test]
    fn retire_front_keeps_last_good_frame() {
        let frame = Bitmap::new_owned(BitmapFormat::Bgra8888, AlphaType::Premultiplied, DeviceIntSize::new(1, 1)).unwrap();
        let mut store = FrameStore {
            viewport_size: DeviceIntSize::new(1, 1),
            front: Some(frame),
            has_usable_bitmap: true,
            backup: None,
        };
        store.retire_front();
        assert!(store.front.is_none());
        assert!(store.backup.is_some());
        assert!(store.source().is_some());

        // retiring again does not discard the backup.
        store.retire_front();
        assert!(store.backup.is_some());
    }

    #[test]
    fn viewport_size_is_clamped() {
        let small = DeviceIntSize::new(800, 600);
        assert_eq!(clamp_viewport_size(small), small);
        assert_eq!(clamp_viewport_size(DeviceIntSize::new(-5, 10)), DeviceIntSize::new(0, 10));

        for size in [
            DeviceIntSize::new(8200, 8200),
            DeviceIntSize::new(i32::MAX, i32::MAX),
            DeviceIntSize::new(1, i32::MAX),
            DeviceIntSize::new(i32::MAX, 1),
        ] {
            let clamped = clamp_viewport_size(size);
            let frame_len = clamped.width as u64 * clamped.height as u64 * 4;
            assert!(frame_len + FRAME_MESSAGE_OVERHEAD <= MAX_MESSAGE_LEN as u64, "{size:?} -> {clamped:?}");
            assert!(!clamped.is_empty(), "{size:?}");
        }
        assert_eq!(clamp_viewport_size(DeviceIntSize::new(8200, 8200)).width, 8200);
    }

    #[test]
    fn dispatch_from_handler_is_queued() {
        let dispatch = Arc::new(EventDispatch::new(|_| {}));
        let received = Arc::new(Mutex::new(vec![]));

        let d = Arc::downgrade(&dispatch);
        let r = received.clone();
        *dispatch.handler.lock() = Box::new(move |ev: ViewEvent| {
            if let ViewEvent::RendererCrashed(g) = &ev {
                if let Some(d) = d.upgrade() {
                    d.notify(ViewEvent::RendererRespawned(g.next()));
                }
            }
            r.lock().push(ev);
        });

        dispatch.notify(ViewEvent::RendererCrashed(ClientGen::first()));
        dispatch.notify(ViewEvent::ReadyToPaint);

        assert_eq!(
            *received.lock(),
            vec![
                ViewEvent::RendererCrashed(ClientGen::first()),
                ViewEvent::RendererRespawned(ClientGen::first().next()),
                ViewEvent::ReadyToPaint,
            ]
        );
        assert!(dispatch.pending.lock().is_empty());
    }
}
