//! Renderer side of the protocol.
//!
//! A renderer adopts the channel, then calls [`run_renderer`] with a [`RendererApi`] implementation,
//! usually a [`RendererPage`] that hosts one page and paints it using a [`PagePainter`].

use std::io;

use crate::{
    bitmap::{AlphaType, Bitmap, BitmapFormat},
    config::{ColorScheme, Palette, PreferredContrast, PreferredMotion, Preferences, RendererConfig},
    input::{EventResult, InputEvent, QueuedInputEvent},
    ipc::{ChannelError, EventSender, RendererChannel, RequestReceiver},
    page_client::{DisplayListPlayerType, InputEventQueue, PageClient},
    ClientHandle, DeviceIntRect, DeviceIntSize, Event, InputEventId, PageId, RendererApi, RequestData,
};

/// Format renderers paint frames in.
pub const NATIVE_FORMAT: (BitmapFormat, AlphaType) = (BitmapFormat::Bgra8888, AlphaType::Premultiplied);

/// Adopt the channel inherited from the UI process.
///
/// Returns `None` if the current process was not started as a renderer.
pub fn connect_renderer() -> Option<io::Result<RendererChannel>> {
    RendererConfig::from_env().map(RendererConfig::connect)
}

/// Receive requests and apply them to the `api` in the order they were sent, until the `exit` request
/// or until the UI process disconnects.
///
/// The first `set_window_handle` request binds the renderer to the client that sent it, requests
/// from any other client are ignored.
pub fn run_renderer<A: RendererApi + ?Sized>(mut requests: RequestReceiver, api: &mut A) -> Result<(), ChannelError> {
    let mut bound: Option<ClientHandle> = None;
    loop {
        let request = requests.recv()?;
        let handle = request.handle();
        match bound {
            Some(h) if h != handle => {
                tracing::warn!("ignoring {:?} from unknown client {handle}, bound to {h}", request.data());
                continue;
            }
            Some(_) => {}
            None => match request.data() {
                RequestData::set_window_handle { .. } => {
                    tracing::debug!("renderer bound to client {handle}");
                    bound = Some(handle);
                }
                RequestData::exit {} => {}
                data => {
                    tracing::warn!("ignoring {data:?}, no window handle set");
                    continue;
                }
            },
        }

        let is_exit = matches!(request.data(), RequestData::exit {});
        api.dispatch(request.into_data());
        if is_exit {
            tracing::debug!("renderer exit requested");
            return Ok(());
        }
    }
}

/// Adopt the `channel` and run a [`RendererPage`] with the `painter`.
pub fn run_page(channel: RendererChannel, painter: impl PagePainter) -> Result<(), ChannelError> {
    let RendererChannel {
        request_receiver,
        event_sender,
    } = channel;
    let mut page = RendererPage::new(event_sender, painter);
    let r = run_renderer(request_receiver, &mut page);
    match &r {
        Err(e) if e.is_disconnected() => tracing::info!("UI process disconnected"),
        Err(e) => tracing::error!("renderer channel error, {e}"),
        Ok(()) => {}
    }
    r
}

/// Page content producer used by [`RendererPage`].
pub trait PagePainter {
    /// Navigate to the `url`.
    fn load_url(&mut self, page: &dyn PageClient, url: &str) {
        let _ = (page, url);
    }

    /// Dispatch an input event.
    fn handle_input_event(&mut self, page: &dyn PageClient, event: &InputEvent) -> EventResult {
        let _ = (page, event);
        EventResult::NotHandled
    }

    /// Paint the page, the `target` is a [`NATIVE_FORMAT`] bitmap of the viewport size.
    fn paint(&mut self, page: &dyn PageClient, target: &mut Bitmap<'_>);
}

/// Painter that fills the viewport with the palette base color.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasePainter;
impl PagePainter for BasePainter {
    fn paint(&mut self, page: &dyn PageClient, target: &mut Bitmap<'_>) {
        let px = page.palette().base.to_pixel(target.format());
        for y in 0..target.height() {
            let row: &mut [[u8; 4]] = bytemuck::cast_slice_mut(target.scanline_mut(y));
            row.fill(px);
        }
    }
}

/// Live state of a renderer page, the [`PageClient`] of a [`RendererPage`].
#[derive(Debug)]
pub struct PageHost {
    page_id: PageId,
    viewport_size: DeviceIntSize,
    screen_rect: DeviceIntRect,
    device_pixels_per_css_pixel: f64,
    palette: Palette,
    preferences: Preferences,
    display_list_player_type: DisplayListPlayerType,
    url: Option<String>,
    input_events: InputEventQueue,
    events: EventSender,
    connection_open: bool,
}
impl PageHost {
    fn new(events: EventSender) -> Self {
        Self {
            page_id: PageId::INVALID,
            viewport_size: DeviceIntSize::zero(),
            screen_rect: DeviceIntRect::zero(),
            device_pixels_per_css_pixel: 1.0,
            palette: Palette::default(),
            preferences: Preferences::default(),
            display_list_player_type: DisplayListPlayerType::default(),
            url: None,
            input_events: InputEventQueue::new(),
            events,
            connection_open: true,
        }
    }

    /// Page id set by the window handle request.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Viewport size in device pixels.
    pub fn viewport_size(&self) -> DeviceIntSize {
        self.viewport_size
    }

    /// Current URL.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn notify(&mut self, event: Event) {
        if !self.connection_open {
            return;
        }
        if let Err(e) = self.events.send(&event) {
            // an event was lost, the UI process must see the renderer end.
            tracing::error!("failed to send event, closing connection, {e}");
            self.connection_open = false;
            self.events.shutdown();
        }
    }
}
impl PageClient for PageHost {
    fn screen_rect(&self) -> DeviceIntRect {
        self.screen_rect
    }

    fn device_pixels_per_css_pixel(&self) -> f64 {
        self.device_pixels_per_css_pixel
    }

    fn palette(&self) -> Palette {
        self.palette
    }

    fn preferred_color_scheme(&self) -> ColorScheme {
        match self.preferences.color_scheme {
            ColorScheme::Auto if self.palette.is_dark => ColorScheme::Dark,
            ColorScheme::Auto => ColorScheme::Light,
            s => s,
        }
    }

    fn preferred_contrast(&self) -> PreferredContrast {
        self.preferences.contrast
    }

    fn preferred_motion(&self) -> PreferredMotion {
        self.preferences.motion
    }

    fn input_event_queue(&mut self) -> &mut InputEventQueue {
        &mut self.input_events
    }

    fn is_connection_open(&self) -> bool {
        self.connection_open
    }

    fn is_ready_to_paint(&self) -> bool {
        self.connection_open && !self.viewport_size.is_empty()
    }

    fn is_headless(&self) -> bool {
        false
    }

    fn display_list_player_type(&self) -> DisplayListPlayerType {
        self.display_list_player_type
    }

    fn report_finished_handling_input_event(&mut self, page_id: PageId, id: InputEventId, result: EventResult) {
        self.notify(Event::InputEventHandled { page_id, id, result });
    }
}

/// Renderer that hosts one page.
///
/// Applies the requests to a [`PageHost`], repaints after every change that affects the frame and sends
/// [`Event::FrameReady`] with the new frame.
#[derive(Debug)]
pub struct RendererPage<P> {
    host: PageHost,
    painter: P,
}
impl<P: PagePainter> RendererPage<P> {
    /// New page that notifies using `events`.
    pub fn new(events: EventSender, painter: P) -> Self {
        Self {
            host: PageHost::new(events),
            painter,
        }
    }

    /// Page state.
    pub fn host(&self) -> &PageHost {
        &self.host
    }

    /// The painter.
    pub fn painter(&self) -> &P {
        &self.painter
    }

    /// Set the rasterizer reported to the page.
    pub fn set_display_list_player_type(&mut self, ty: DisplayListPlayerType) {
        self.host.display_list_player_type = ty;
    }

    fn is_target(&self, page_id: PageId) -> bool {
        if page_id == self.host.page_id {
            true
        } else {
            tracing::warn!("ignoring request for unknown page {page_id:?}");
            false
        }
    }

    fn paint(&mut self) {
        if !self.host.is_ready_to_paint() {
            return;
        }
        let (format, alpha) = NATIVE_FORMAT;
        let mut target = match Bitmap::new_owned(format, alpha, self.host.viewport_size) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("cannot allocate frame, {e}");
                return;
            }
        };
        self.painter.paint(&self.host, &mut target);
        let page_id = self.host.page_id;
        self.host.notify(Event::FrameReady {
            page_id,
            frame: target.into_frame(),
        });
    }

    fn process_input_events(&mut self) {
        let mut repaint = false;
        while let Some(QueuedInputEvent { page_id, id, event }) = self.host.input_events.pop() {
            let result = self.painter.handle_input_event(&self.host, &event);
            repaint |= matches!(result, EventResult::Handled | EventResult::Cancelled);
            self.host.report_finished_handling_input_event(page_id, id, result);
        }
        if repaint {
            self.paint();
        }
    }
}
impl<P: PagePainter> PageClient for RendererPage<P> {
    fn screen_rect(&self) -> DeviceIntRect {
        self.host.screen_rect()
    }

    fn device_pixels_per_css_pixel(&self) -> f64 {
        self.host.device_pixels_per_css_pixel()
    }

    fn palette(&self) -> Palette {
        self.host.palette()
    }

    fn preferred_color_scheme(&self) -> ColorScheme {
        self.host.preferred_color_scheme()
    }

    fn preferred_contrast(&self) -> PreferredContrast {
        self.host.preferred_contrast()
    }

    fn preferred_motion(&self) -> PreferredMotion {
        self.host.preferred_motion()
    }

    fn input_event_queue(&mut self) -> &mut InputEventQueue {
        self.host.input_event_queue()
    }

    fn is_connection_open(&self) -> bool {
        self.host.is_connection_open()
    }

    fn is_ready_to_paint(&self) -> bool {
        self.host.is_ready_to_paint()
    }

    fn is_headless(&self) -> bool {
        self.host.is_headless()
    }

    fn display_list_player_type(&self) -> DisplayListPlayerType {
        self.host.display_list_player_type()
    }

    fn report_finished_handling_input_event(&mut self, page_id: PageId, id: InputEventId, result: EventResult) {
        self.host.report_finished_handling_input_event(page_id, id, result)
    }
}
impl<P: PagePainter> RendererApi for RendererPage<P> {
    fn set_window_handle(&mut self, page_id: PageId) {
        self.host.page_id = page_id;
        self.paint();
    }

    fn set_viewport_size(&mut self, page_id: PageId, size: DeviceIntSize) {
        if self.is_target(page_id) && self.host.viewport_size != size {
            self.host.viewport_size = size;
            self.paint();
        }
    }

    fn set_device_pixels_per_css_pixel(&mut self, page_id: PageId, ratio: f64) {
        if self.is_target(page_id) && self.host.device_pixels_per_css_pixel != ratio {
            self.host.device_pixels_per_css_pixel = ratio;
            self.paint();
        }
    }

    fn enqueue_input_event(&mut self, page_id: PageId, id: InputEventId, event: InputEvent) {
        if self.is_target(page_id) {
            self.host.input_events.push(QueuedInputEvent { page_id, id, event });
            self.process_input_events();
        }
    }

    fn load_url(&mut self, page_id: PageId, url: String) {
        if !self.is_target(page_id) {
            return;
        }
        self.host.notify(Event::NavigationStarted {
            page_id,
            url: url.clone(),
            is_redirect: false,
        });
        self.painter.load_url(&self.host, &url);
        self.host.url = Some(url.clone());
        self.host.notify(Event::NavigationFinished { page_id, url });
        self.paint();
    }

    fn set_preferences(&mut self, page_id: PageId, preferences: Preferences) {
        if self.is_target(page_id) && self.host.preferences != preferences {
            self.host.preferences = preferences;
            self.paint();
        }
    }

    fn set_palette(&mut self, page_id: PageId, palette: Palette) {
        if self.is_target(page_id) && self.host.palette != palette {
            self.host.palette = palette;
            self.paint();
        }
    }

    fn set_screen_rect(&mut self, page_id: PageId, rect: DeviceIntRect) {
        if self.is_target(page_id) {
            self.host.screen_rect = rect;
        }
    }

    fn exit(&mut self) {
        self.host.connection_open = false;
    }

    #[cfg(debug_assertions)]
    fn crash(&mut self) {
        panic!("renderer crash requested");
    }
}
