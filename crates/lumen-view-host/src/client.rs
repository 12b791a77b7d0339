//! Render client, the UI side connection to one renderer.

use std::{
    fmt, io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use lumen_view_api::{
    ipc::{EventReceiver, RequestSender},
    Channel, ClientDead, ClientGen, ClientHandle, Event, RendererRequests, Request, RequestData,
};
use parking_lot::Mutex;

use crate::launch::{RendererExit, RendererLauncher, RendererProcess};

/// Render client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Connected, requests are sent.
    Live,
    /// Orderly shutdown started, the disconnect is not a crash.
    Closing,
    /// Renderer crashed or shutdown finished, requests fail with [`ClientDead`].
    Dead,
}

/// Connection to one renderer.
///
/// Requests are pushed to a queue and written by a worker thread in the order they were queued, so the
/// request methods never block on the renderer. Events are received in a listener thread and passed to
/// the `on_event` closure in the order the renderer sent them.
///
/// If the connection closes without an orderly [`shutdown`] the client becomes [`ClientState::Dead`] and
/// the listener emits [`Event::Crashed`] once, with the client [`generation`].
///
/// [`shutdown`]: Self::shutdown
/// [`generation`]: Self::generation
pub struct RenderClient {
    handle: ClientHandle,
    generation: ClientGen,
    state: Arc<Mutex<ClientState>>,
    requests: Option<flume::Sender<Request>>,
    request_sender: RequestSender,
    writer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    process: Option<RendererProcess>,
    exit_grace: Duration,
}
impl RenderClient {
    /// Establish a channel, launch the renderer with the remote endpoint and start the writer and
    /// listener threads.
    ///
    /// The `on_event` closure is called in the listener thread.
    pub fn spawn<F>(launcher: &dyn RendererLauncher, generation: ClientGen, on_event: F) -> io::Result<Self>
    where
        F: FnMut(Event) + Send + 'static,
    {
        Self::spawn_impl(launcher, generation, Box::new(on_event))
    }
    fn spawn_impl(launcher: &dyn RendererLauncher, generation: ClientGen, on_event: Box<dyn FnMut(Event) + Send>) -> io::Result<Self> {
        let _span = tracing::trace_span!("spawn_renderer", ?generation).entered();

        let mut channel = Channel::establish();
        let process = channel.transfer_remote_endpoint(|remote| launcher.launch(remote))?;
        let (request_sender, event_receiver) = channel.into_ui_halves()?;

        let handle = ClientHandle::new_random();
        let state = Arc::new(Mutex::new(ClientState::Live));
        let (requests, request_receiver) = flume::unbounded();

        let writer = Self::spawn_writer(request_receiver, request_sender.clone(), state.clone())?;
        let listener = Self::spawn_listener(on_event, event_receiver, state.clone(), generation)?;

        tracing::debug!("render client {handle} ({generation:?}) connected to {process:?}");

        Ok(Self {
            handle,
            generation,
            state,
            requests: Some(requests),
            request_sender,
            writer: Some(writer),
            listener: Some(listener),
            process: Some(process),
            exit_grace: Duration::from_millis(300),
        })
    }

    fn spawn_writer(
        requests: flume::Receiver<Request>,
        sender: RequestSender,
        state: Arc<Mutex<ClientState>>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name("lumen-request-writer".into()).spawn(move || {
            while let Ok(request) = requests.recv() {
                if let Err(e) = sender.send(&request) {
                    tracing::error!("failed to send {:?}, {e}", request.data());
                    {
                        let mut s = state.lock();
                        if *s == ClientState::Live {
                            *s = ClientState::Dead;
                        }
                    }
                    // the listener reports the crash.
                    sender.shutdown();
                    break;
                }
            }
        })
    }

    fn spawn_listener(
        mut on_event: Box<dyn FnMut(Event) + Send>,
        mut events: EventReceiver,
        state: Arc<Mutex<ClientState>>,
        generation: ClientGen,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name("lumen-event-listener".into()).spawn(move || {
            let error = loop {
                match events.recv() {
                    Ok(Event::Crashed(_)) => tracing::warn!("ignoring crash event sent by renderer"),
                    Ok(ev) => on_event(ev),
                    Err(e) => break e,
                }
            };

            let is_crash = {
                let mut s = state.lock();
                let is_crash = *s != ClientState::Closing;
                *s = ClientState::Dead;
                is_crash
            };
            if is_crash {
                tracing::error!(target: "renderer_respawn", "renderer channel closed, {error}");
                on_event(Event::Crashed(generation));
            }
        })
    }

    /// Handle that tags every request of this client.
    pub fn handle(&self) -> ClientHandle {
        self.handle
    }

    /// Generation of this client.
    pub fn generation(&self) -> ClientGen {
        self.generation
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// If the client is [`ClientState::Live`].
    pub fn is_alive(&self) -> bool {
        self.state() == ClientState::Live
    }

    /// If [`shutdown`] already ran, the renderer threads are finished and the renderer is reaped.
    ///
    /// [`shutdown`]: Self::shutdown
    pub fn is_shutdown(&self) -> bool {
        self.requests.is_none()
    }

    /// Set the time a crashed or closing renderer has to exit before it is killed.
    pub fn set_exit_grace(&mut self, grace: Duration) {
        self.exit_grace = grace;
    }

    /// Orderly shutdown.
    ///
    /// Sends `exit` if the client is still live, waits for the threads to finish and reaps the renderer.
    /// Does not emit [`Event::Crashed`].
    ///
    /// Returns how the renderer ended, if it could be reaped. Returns `None` if the client was already
    /// shutdown.
    pub fn shutdown(&mut self) -> Option<RendererExit> {
        let requests = self.requests.take()?;
        let _span = tracing::trace_span!("shutdown_renderer", generation = ?self.generation).entered();

        let send_exit = {
            let mut s = self.state.lock();
            let live = *s == ClientState::Live;
            if live {
                *s = ClientState::Closing;
            }
            live
        };
        if send_exit {
            let _ = requests.send(Request::new(self.handle, RequestData::exit {}));
        }
        drop(requests);

        if let Some(w) = self.writer.take() {
            let _ = w.join();
        }

        // exit is written, give the renderer some time to close the stream itself.
        let mut process = self.process.take();
        if send_exit {
            if let Some(p) = &mut process {
                let deadline = std::time::Instant::now() + self.exit_grace;
                while !p.has_exited() && std::time::Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
        self.request_sender.shutdown();

        if let Some(l) = self.listener.take() {
            if l.thread().id() == thread::current().id() {
                tracing::debug!("render client shutdown in its own listener thread, will not join");
            } else if let Err(p) = l.join() {
                std::panic::resume_unwind(p);
            }
        }

        *self.state.lock() = ClientState::Dead;
        process.and_then(|p| p.reap(self.exit_grace))
    }
}
impl RendererRequests for RenderClient {
    fn send_request(&self, data: RequestData) -> Result<(), ClientDead> {
        if !self.is_alive() {
            return Err(ClientDead);
        }
        match &self.requests {
            Some(r) => r.send(Request::new(self.handle, data)).map_err(|_| ClientDead),
            None => Err(ClientDead),
        }
    }
}
impl Drop for RenderClient {
    /// Orderly shutdown.
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
impl fmt::Debug for RenderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderClient")
            .field("handle", &self.handle)
            .field("generation", &self.generation)
            .field("state", &self.state())
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}
