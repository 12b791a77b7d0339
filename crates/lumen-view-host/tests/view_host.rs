use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use lumen_view_api::{
    bitmap::{AlphaType, Bitmap, BitmapFormat, Rgba},
    input::{KeyEventType, KeyModifiers},
    page_client::PageClient,
    renderer::{self, PagePainter},
    ClientDead, ClientGen, DeviceIntPoint, DeviceIntSize, EventResult, InputEvent, KeyEvent, MouseEventType,
};
use lumen_view_host::{ClientState, HostBitmapFormat, HostBitmapInfo, RespawnError, ThreadLauncher, ViewEvent, ViewHost, ViewHostConfig};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const PAGE_COLOR: Rgba = Rgba::new(10, 20, 30, 255);

fn init_test_log() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Renderer painter that records the input events it receives.
///
/// A key event with the `"Crash"` key panics the renderer thread.
struct RecordingPainter {
    inputs: Arc<Mutex<Vec<InputEvent>>>,
}
impl PagePainter for RecordingPainter {
    fn handle_input_event(&mut self, _: &dyn PageClient, event: &InputEvent) -> EventResult {
        if let InputEvent::Key(k) = event {
            if k.key == "Crash" {
                panic!("renderer crash requested by test");
            }
        }
        self.inputs.lock().push(event.clone());
        EventResult::NotHandled
    }

    fn paint(&mut self, _: &dyn PageClient, target: &mut Bitmap<'_>) {
        let px = PAGE_COLOR.to_pixel(target.format());
        for y in 0..target.height() {
            for chunk in target.scanline_mut(y).chunks_exact_mut(4) {
                chunk.copy_from_slice(&px);
            }
        }
    }
}

struct TestView {
    host: ViewHost,
    events: flume::Receiver<ViewEvent>,
    inputs: Arc<Mutex<Vec<InputEvent>>>,
}
impl TestView {
    fn new(config: ViewHostConfig) -> Self {
        init_test_log();

        let inputs = Arc::new(Mutex::new(vec![]));
        let launcher = {
            let inputs = inputs.clone();
            ThreadLauncher::new(move |channel| {
                let _ = renderer::run_page(channel, RecordingPainter { inputs: inputs.clone() });
            })
        };
        let (sender, events) = flume::unbounded();
        let host = ViewHost::new(config, launcher, move |ev| {
            let _ = sender.send(ev);
        })
        .unwrap();

        Self { host, events, inputs }
    }

    fn with_viewport(width: i32, height: i32) -> Self {
        Self::new(ViewHostConfig::new(DeviceIntSize::new(width, height), 1.0))
    }

    fn wait_for(&self, mut predicate: impl FnMut(&ViewEvent) -> bool) -> ViewEvent {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(timeout) {
                Ok(ev) if predicate(&ev) => return ev,
                Ok(_) => continue,
                Err(e) => panic!("timeout waiting for view event, {e:?}"),
            }
        }
    }

    fn wait_frame(&self) {
        self.wait_for(|ev| matches!(ev, ViewEvent::ReadyToPaint));
    }

    fn crash(&mut self) -> ClientGen {
        let crash = InputEvent::Key(KeyEvent {
            kind: KeyEventType::KeyDown,
            key: "Crash".to_owned(),
            text: None,
            modifiers: KeyModifiers::empty(),
            repeat: false,
        });
        self.host.enqueue_input_event(crash).unwrap();
        match self.wait_for(|ev| matches!(ev, ViewEvent::RendererCrashed(_))) {
            ViewEvent::RendererCrashed(generation) => generation,
            _ => unreachable!(),
        }
    }

    fn composite_rgba(&self, width: i32, height: i32) -> Vec<u8> {
        let mut dest = Bitmap::new_owned(BitmapFormat::Rgba8888, AlphaType::Premultiplied, DeviceIntSize::new(width, height)).unwrap();
        self.host.paint_into(&mut dest);
        dest.bytes().to_vec()
    }
}

fn solid(color: Rgba, pixels: usize) -> Vec<u8> {
    let px = color.to_pixel(BitmapFormat::Rgba8888);
    px.iter().copied().cycle().take(pixels * 4).collect()
}

#[test]
fn no_frame_composites_sentinel() {
    // empty viewport, the renderer never paints.
    let view = TestView::new(ViewHostConfig::default());
    assert!(!view.host.has_usable_bitmap());
    assert_eq!(view.composite_rgba(2, 2), solid(Rgba::MAGENTA, 4));
}

#[test]
fn first_frame_composites() {
    let view = TestView::with_viewport(2, 2);
    view.wait_frame();
    assert!(view.host.has_usable_bitmap());

    assert_eq!(view.composite_rgba(2, 2), solid(PAGE_COLOR, 4));

    // larger destination, uncovered area is the sentinel.
    let bytes = view.composite_rgba(3, 1);
    assert_eq!(&bytes[..8], &solid(PAGE_COLOR, 2)[..]);
    assert_eq!(&bytes[8..], &solid(Rgba::MAGENTA, 1)[..]);
}

#[test]
fn resize_keeps_backup_until_new_frame() {
    let mut view = TestView::with_viewport(2, 1);
    view.wait_frame();

    view.host.set_viewport_size(DeviceIntSize::new(3, 1)).unwrap();
    assert!(!view.host.has_usable_bitmap());
    assert!(view.host.has_backup_bitmap());

    view.wait_frame();
    assert!(view.host.has_usable_bitmap());
    assert_eq!(view.composite_rgba(3, 1), solid(PAGE_COLOR, 3));
}

#[test]
fn navigation_events() {
    let mut view = TestView::with_viewport(1, 1);
    view.host.load("https://example.com").unwrap();

    let started = view.wait_for(|ev| matches!(ev, ViewEvent::NavigationStarted { .. }));
    assert_eq!(
        started,
        ViewEvent::NavigationStarted {
            url: "https://example.com".to_owned(),
            is_redirect: false,
        }
    );
    let finished = view.wait_for(|ev| matches!(ev, ViewEvent::NavigationFinished { .. }));
    assert_eq!(
        finished,
        ViewEvent::NavigationFinished {
            url: "https://example.com".to_owned(),
        }
    );
    assert_eq!(view.host.url(), Some("https://example.com"));
}

#[test]
fn input_order_from_two_threads() {
    let view = TestView::with_viewport(1, 1);
    let TestView { host, events, inputs } = view;
    let host = Arc::new(Mutex::new(host));

    let first = {
        let host = host.clone();
        thread::spawn(move || host.lock().mouse_event(MouseEventType::MouseDown, 1, 1, 101, 201).unwrap())
    };
    let id1 = first.join().unwrap();
    let second = {
        let host = host.clone();
        thread::spawn(move || host.lock().mouse_event(MouseEventType::MouseMove, 2, 2, 102, 202).unwrap())
    };
    let id2 = second.join().unwrap();
    let id3 = host.lock().mouse_event(MouseEventType::MouseUp, 3, 3, 103, 203).unwrap();

    let mut handled = vec![];
    let deadline = Instant::now() + Duration::from_secs(10);
    while handled.len() < 3 {
        match events.recv_deadline(deadline) {
            Ok(ViewEvent::InputEventHandled { id, result }) => {
                assert_eq!(result, EventResult::NotHandled);
                handled.push(id);
            }
            Ok(_) => {}
            Err(e) => panic!("timeout waiting for input events, {e:?}"),
        }
    }
    assert_eq!(handled, vec![id1, id2, id3]);

    let positions: Vec<_> = inputs
        .lock()
        .iter()
        .map(|e| match e {
            InputEvent::Mouse(m) => (m.position, m.screen_position),
            e => panic!("unexpected {e:?}"),
        })
        .collect();
    assert_eq!(
        positions,
        vec![
            (DeviceIntPoint::new(1, 1), DeviceIntPoint::new(101, 201)),
            (DeviceIntPoint::new(2, 2), DeviceIntPoint::new(102, 202)),
            (DeviceIntPoint::new(3, 3), DeviceIntPoint::new(103, 203)),
        ]
    );
}

#[test]
fn crash_marks_dead_and_keeps_backup() {
    let mut view = TestView::with_viewport(2, 2);
    view.wait_frame();
    let before = view.composite_rgba(2, 2);

    let generation = view.crash();
    assert_eq!(generation, ClientGen::first());
    assert_eq!(view.host.client().state(), ClientState::Dead);
    assert!(view.host.has_backup_bitmap());

    // dead client requests fail without I/O.
    assert_eq!(view.host.set_device_pixel_ratio(2.0), Err(ClientDead));
    assert_eq!(view.host.mouse_event(MouseEventType::MouseMove, 0, 0, 0, 0), Err(ClientDead));

    // the last good frame is still shown.
    assert_eq!(view.composite_rgba(2, 2), before);
    assert_eq!(view.composite_rgba(2, 2), before);
}

#[test]
fn crash_respawn_restores_page() {
    let mut view = TestView::with_viewport(2, 2);
    view.wait_frame();
    view.host.load("https://example.com").unwrap();
    view.wait_for(|ev| matches!(ev, ViewEvent::NavigationFinished { .. }));

    let generation = view.crash();
    view.host.handle_crash(generation).unwrap();

    let respawned = view.wait_for(|ev| matches!(ev, ViewEvent::RendererRespawned(_)));
    let new_gen = generation.next();
    assert_eq!(respawned, ViewEvent::RendererRespawned(new_gen));
    assert_eq!(view.host.generation(), new_gen);
    assert!(view.host.client().is_alive());

    // url is reloaded in the new renderer.
    view.wait_for(|ev| matches!(ev, ViewEvent::NavigationStarted { url, .. } if url == "https://example.com"));
    view.wait_frame();
    assert_eq!(view.composite_rgba(2, 2), solid(PAGE_COLOR, 4));

    // already handled.
    view.host.handle_crash(generation).unwrap();
    assert_eq!(view.host.generation(), new_gen);
}

#[test]
fn too_many_fast_crashes() {
    let mut view = TestView::with_viewport(1, 1);

    for _ in 0..2 {
        let generation = view.crash();
        view.host.handle_crash(generation).unwrap();
    }
    let generation = view.crash();
    match view.host.handle_crash(generation) {
        Err(RespawnError::TooManyCrashes(n)) => assert_eq!(n, 2),
        r => panic!("expected TooManyCrashes, was {r:?}"),
    }
    assert!(!view.host.client().is_alive());
    // the crashed renderer is reaped even if not replaced.
    assert!(view.host.client().is_shutdown());
    assert_eq!(view.host.client().state(), ClientState::Dead);
}

#[test]
fn crash_handled_inside_event_handler() {
    init_test_log();

    let launcher = ThreadLauncher::new(|channel| {
        let _ = renderer::run_page(
            channel,
            RecordingPainter {
                inputs: Arc::new(Mutex::new(vec![])),
            },
        );
    });
    let slot: Arc<Mutex<Option<ViewHost>>> = Arc::new(Mutex::new(None));
    let (sender, events) = flume::unbounded();
    let host = {
        let slot = Arc::downgrade(&slot);
        ViewHost::new(ViewHostConfig::new(DeviceIntSize::new(1, 1), 1.0), launcher, move |ev: ViewEvent| {
            if let ViewEvent::RendererCrashed(generation) = &ev {
                if let Some(slot) = slot.upgrade() {
                    if let Some(host) = slot.lock().as_mut() {
                        host.handle_crash(*generation).unwrap();
                    }
                }
            }
            let _ = sender.send(ev);
        })
        .unwrap()
    };
    *slot.lock() = Some(host);

    let crash = InputEvent::Key(KeyEvent {
        kind: KeyEventType::KeyDown,
        key: "Crash".to_owned(),
        text: None,
        modifiers: KeyModifiers::empty(),
        repeat: false,
    });
    slot.lock().as_mut().unwrap().enqueue_input_event(crash).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut after_crash = vec![];
    loop {
        match events.recv_deadline(deadline) {
            Ok(ev @ ViewEvent::RendererCrashed(_)) => after_crash.push(ev),
            Ok(ev) if !after_crash.is_empty() => {
                let done = ev == ViewEvent::ReadyToPaint;
                after_crash.push(ev);
                if done {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => panic!("timeout waiting for respawn, {e:?}"),
        }
    }

    let new_gen = ClientGen::first().next();
    assert_eq!(after_crash[0], ViewEvent::RendererCrashed(ClientGen::first()));
    assert_eq!(after_crash[1], ViewEvent::RendererRespawned(new_gen));

    let host = slot.lock();
    let host = host.as_ref().unwrap();
    assert_eq!(host.generation(), new_gen);
    assert!(host.client().is_alive());
}

#[test]
fn negative_viewport_is_clamped() {
    let mut view = TestView::with_viewport(2, 2);
    view.wait_frame();

    view.host.set_viewport_size(DeviceIntSize::new(-4, 2)).unwrap();
    assert_eq!(view.host.viewport_size(), DeviceIntSize::new(0, 2));
    assert!(view.host.client().is_alive());
}

#[test]
fn manual_respawn_is_not_a_crash() {
    let mut view = TestView::with_viewport(1, 1);
    view.wait_frame();

    view.host.respawn().unwrap();
    assert_eq!(view.host.generation(), ClientGen::first().next());

    let mut saw_crash = false;
    view.wait_for(|ev| {
        saw_crash |= matches!(ev, ViewEvent::RendererCrashed(_));
        matches!(ev, ViewEvent::RendererRespawned(_))
    });
    view.wait_frame();
    assert!(!saw_crash);
    assert!(view.events.try_iter().all(|ev| !matches!(ev, ViewEvent::RendererCrashed(_))));
}

#[test]
fn paint_into_host_buffer_with_padding() {
    let view = TestView::with_viewport(2, 2);
    view.wait_frame();

    let stride = 12;
    let mut pixels = vec![0xEE; stride * 2];
    let info = HostBitmapInfo {
        format: HostBitmapFormat::Rgba8888,
        width: 2,
        height: 2,
        stride: stride as u32,
        is_hardware: false,
    };
    view.host.paint_into_host_buffer(info, &mut pixels);

    for row in pixels.chunks_exact(stride) {
        assert_eq!(&row[..8], &solid(PAGE_COLOR, 2)[..]);
        assert_eq!(&row[8..], &[0xEE; 4]);
    }
}

#[test]
#[should_panic(expected = "unsupported host bitmap format")]
fn paint_into_unsupported_host_format() {
    let view = TestView::new(ViewHostConfig::default());
    let mut pixels = vec![0; 8];
    let info = HostBitmapInfo {
        format: HostBitmapFormat::Rgb565,
        width: 2,
        height: 2,
        stride: 4,
        is_hardware: false,
    };
    view.host.paint_into_host_buffer(info, &mut pixels);
}

#[test]
#[should_panic(expected = "hardware bitmaps")]
fn paint_into_hardware_bitmap() {
    let view = TestView::new(ViewHostConfig::default());
    let mut pixels = vec![0; 16];
    let info = HostBitmapInfo {
        format: HostBitmapFormat::Rgba8888,
        width: 2,
        height: 2,
        stride: 8,
        is_hardware: true,
    };
    view.host.paint_into_host_buffer(info, &mut pixels);
}
