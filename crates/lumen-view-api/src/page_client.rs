//! Host capabilities a page queries while producing a frame.

use std::collections::VecDeque;

use crate::{
    config::{ColorScheme, Palette, PreferredContrast, PreferredMotion, Preferences},
    input::{EventResult, QueuedInputEvent},
    DeviceIntRect, InputEventId, PageId,
};

/// Display list player used to rasterize frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayListPlayerType {
    /// Software rasterizer.
    #[default]
    Cpu,
    /// Hardware rasterizer, falls back to [`Cpu`] if no adapter is available.
    ///
    /// [`Cpu`]: Self::Cpu
    GpuIfAvailable,
}

/// Pending input events of a page, in the order they were enqueued.
#[derive(Debug, Default)]
pub struct InputEventQueue {
    events: VecDeque<QueuedInputEvent>,
}
impl InputEventQueue {
    /// New empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&mut self, event: QueuedInputEvent) {
        self.events.push_back(event);
    }

    /// Remove the oldest event.
    pub fn pop(&mut self) -> Option<QueuedInputEvent> {
        self.events.pop_front()
    }

    /// Oldest event, without removing it.
    pub fn peek(&self) -> Option<&QueuedInputEvent> {
        self.events.front()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// If there are no pending events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove all events, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = QueuedInputEvent> + '_ {
        self.events.drain(..)
    }
}

/// Capability surface of the page host.
///
/// Queries have no side effects and can be called at any point of the frame production, implementers
/// must answer from the current host state, never from a copy taken earlier.
///
/// Queries that are not meaningful in an embedding panic, calling them is a bug in the embedding.
pub trait PageClient {
    /// Screen rectangle in device pixels.
    fn screen_rect(&self) -> DeviceIntRect;

    /// Scale factor between device pixels and CSS pixels.
    fn device_pixels_per_css_pixel(&self) -> f64;

    /// System colors.
    fn palette(&self) -> Palette;

    /// The `prefers-color-scheme` value.
    fn preferred_color_scheme(&self) -> ColorScheme;

    /// The `prefers-contrast` value.
    fn preferred_contrast(&self) -> PreferredContrast;

    /// The `prefers-reduced-motion` value.
    fn preferred_motion(&self) -> PreferredMotion;

    /// Pending input events.
    fn input_event_queue(&mut self) -> &mut InputEventQueue;

    /// If the UI process is still connected.
    fn is_connection_open(&self) -> bool;

    /// If the host can receive a new frame.
    fn is_ready_to_paint(&self) -> bool;

    /// If the page has no display.
    fn is_headless(&self) -> bool;

    /// Rasterizer used by the page.
    fn display_list_player_type(&self) -> DisplayListPlayerType;

    /// Notify the host that an event taken from the [`input_event_queue`] was dispatched.
    ///
    /// [`input_event_queue`]: PageClient::input_event_queue
    fn report_finished_handling_input_event(&mut self, page_id: PageId, id: InputEventId, result: EventResult);
}

/// Page client of an offscreen worker.
///
/// Workers run script without a display, only the style queries are answered, display and input queries
/// panic.
#[derive(Debug, Clone)]
pub struct WorkerPageClient {
    palette: Palette,
    preferences: Preferences,
    connection_open: bool,
}
impl WorkerPageClient {
    /// New worker client.
    pub fn new(palette: Palette, preferences: Preferences) -> Self {
        Self {
            palette,
            preferences,
            connection_open: true,
        }
    }

    /// Set the connection state reported by [`PageClient::is_connection_open`].
    pub fn set_connection_open(&mut self, open: bool) {
        self.connection_open = open;
    }
}
impl Default for WorkerPageClient {
    /// Default palette and preferences.
    fn default() -> Self {
        Self::new(Palette::default(), Preferences::default())
    }
}
impl PageClient for WorkerPageClient {
    fn screen_rect(&self) -> DeviceIntRect {
        DeviceIntRect::zero()
    }

    fn device_pixels_per_css_pixel(&self) -> f64 {
        1.0
    }

    fn palette(&self) -> Palette {
        self.palette
    }

    fn preferred_color_scheme(&self) -> ColorScheme {
        self.preferences.color_scheme
    }

    fn preferred_contrast(&self) -> PreferredContrast {
        self.preferences.contrast
    }

    fn preferred_motion(&self) -> PreferredMotion {
        self.preferences.motion
    }

    fn input_event_queue(&mut self) -> &mut InputEventQueue {
        unreachable!("worker pages have no input event queue")
    }

    fn is_connection_open(&self) -> bool {
        self.connection_open
    }

    fn is_ready_to_paint(&self) -> bool {
        true
    }

    fn is_headless(&self) -> bool {
        unreachable!("worker pages have no display")
    }

    fn display_list_player_type(&self) -> DisplayListPlayerType {
        unreachable!("worker pages have no display list player")
    }

    fn report_finished_handling_input_event(&mut self, _: PageId, _: InputEventId, _: EventResult) {
        unreachable!("worker pages do not handle input events")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::{InputEvent, MouseEvent, MouseEventType},
        DeviceIntPoint,
    };

    fn queued(id: u32) -> QueuedInputEvent {
        QueuedInputEvent {
            page_id: PageId::first(),
            id: InputEventId::from_raw(id),
            event: InputEvent::Mouse(MouseEvent::primary(
                MouseEventType::MouseMove,
                DeviceIntPoint::new(id as i32, 0),
                DeviceIntPoint::new(id as i32, 0),
            )),
        }
    }

    #[test]
    fn queue_is_fifo() {
        let mut q = InputEventQueue::new();
        for id in 1..=3 {
            q.push(queued(id));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.peek().map(|e| e.id.get()), Some(1));

        let ids: Vec<_> = q.drain().map(|e| e.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }

    #[test]
    fn worker_answers_style_queries() {
        let prefs = Preferences::new(ColorScheme::Dark, PreferredContrast::More, PreferredMotion::Reduce);
        let mut worker = WorkerPageClient::new(Palette::dark(), prefs);

        assert_eq!(worker.palette(), Palette::dark());
        assert_eq!(worker.preferred_color_scheme(), ColorScheme::Dark);
        assert_eq!(worker.preferred_contrast(), PreferredContrast::More);
        assert_eq!(worker.preferred_motion(), PreferredMotion::Reduce);
        assert_eq!(worker.device_pixels_per_css_pixel(), 1.0);
        assert!(worker.is_ready_to_paint());

        assert!(worker.is_connection_open());
        worker.set_connection_open(false);
        assert!(!worker.is_connection_open());
    }

    #[test]
    #[should_panic(expected = "no display")]
    fn worker_is_headless_panics() {
        WorkerPageClient::default().is_headless();
    }

    #[test]
    #[should_panic(expected = "no display list player")]
    fn worker_display_list_player_panics() {
        WorkerPageClient::default().display_list_player_type();
    }

    #[test]
    #[should_panic(expected = "no input event queue")]
    fn worker_input_queue_panics() {
        WorkerPageClient::default().input_event_queue();
    }

    #[test]
    #[should_panic(expected = "do not handle input events")]
    fn worker_report_input_panics() {
        WorkerPageClient::default().report_finished_handling_input_event(PageId::first(), InputEventId::first(), EventResult::Handled);
    }
}
