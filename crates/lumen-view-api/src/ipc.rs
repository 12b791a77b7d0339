//! IPC types.
//!
//! The UI process and a renderer talk over one connected pair of local stream sockets. Each message
//! is framed as a little-endian `u32` length followed by the `bincode` payload, the stream ordering is
//! the only ordering guarantee of the protocol.

use std::{
    fmt,
    io::{self, BufReader, BufWriter, Read, Write},
    marker::PhantomData,
    net::Shutdown,
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
        unix::net::UnixStream,
    },
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::{Event, Request};

/// Maximum length of a single framed message.
///
/// This is big enough for a 8K BGRA frame.
pub const MAX_MESSAGE_LEN: u32 = 256 * 1024 * 1024;

pub(crate) type IpcResult<T> = std::result::Result<T, ChannelError>;

/// Channel error.
#[derive(Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// The peer closed the stream or the stream broke.
    Disconnected,
    /// Message length prefix exceeds [`MAX_MESSAGE_LEN`].
    TooLarge(u64),
    /// Payload did not (de)serialize.
    Codec(bincode::Error),
    /// Other IO error.
    Io(io::Error),
}
impl ChannelError {
    /// If the error means the peer is gone.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ChannelError::Disconnected)
    }
}
impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Disconnected => write!(f, "ipc channel disconnected"),
            ChannelError::TooLarge(len) => write!(f, "message of {len} bytes exceeds the {MAX_MESSAGE_LEN} bytes limit"),
            ChannelError::Codec(e) => write!(f, "message codec error, {e}"),
            ChannelError::Io(e) => write!(f, "ipc io error, {e}"),
        }
    }
}
impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Codec(e) => Some(e),
            ChannelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

fn handle_io_error(e: io::Error) -> ChannelError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => ChannelError::Disconnected,
        _ => ChannelError::Io(e),
    }
}

fn handle_codec_error(e: bincode::Error) -> ChannelError {
    match *e {
        bincode::ErrorKind::Io(e) => handle_io_error(e),
        e => ChannelError::Codec(Box::new(e)),
    }
}

/// Endpoint of a [`Channel`] that must be handed to the renderer process.
///
/// This type is not `Clone`, it is moved into the renderer launcher exactly once.
pub struct RemoteEndpoint(OwnedFd);
impl RemoteEndpoint {
    /// Raw descriptor number, valid while `self` is alive.
    pub fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    /// Unwrap the owned descriptor.
    pub fn into_owned_fd(self) -> OwnedFd {
        self.0
    }
}
impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteEndpoint({})", self.0.as_raw_fd())
    }
}

/// Connected pair of byte-stream endpoints, one kept by the UI process, one transferred to the renderer.
pub struct Channel {
    local: UnixStream,
    remote: Option<RemoteEndpoint>,
}
impl Channel {
    /// Create the connected endpoint pair.
    ///
    /// # Panics
    ///
    /// If the system cannot allocate the socket pair, the bridge cannot run without it.
    pub fn establish() -> Self {
        let (local, remote) = UnixStream::pair().expect("failed to create renderer channel socket pair");
        let remote = RemoteEndpoint(OwnedFd::from(remote));
        tracing::trace!(local = local.as_raw_fd(), remote = remote.as_raw_fd(), "established renderer channel");
        Channel {
            local,
            remote: Some(remote),
        }
    }

    /// If the remote endpoint was already moved out.
    pub fn is_remote_transferred(&self) -> bool {
        self.remote.is_none()
    }

    /// Hand the remote endpoint to `transfer`, usually a process launcher.
    ///
    /// After this call only the local endpoint remains, it is configured for blocking IO. The endpoint
    /// is consumed even if `transfer` fails.
    ///
    /// # Panics
    ///
    /// If called twice.
    pub fn transfer_remote_endpoint<R>(&mut self, transfer: impl FnOnce(RemoteEndpoint) -> io::Result<R>) -> io::Result<R> {
        let remote = self.remote.take().expect("renderer channel remote endpoint already transferred");
        let r = transfer(remote)?;
        self.local.set_nonblocking(false)?;
        Ok(r)
    }

    /// Split the local endpoint into a request sender and an event receiver.
    ///
    /// # Panics
    ///
    /// If the remote endpoint was not transferred yet.
    pub fn into_ui_halves(self) -> io::Result<(RequestSender, EventReceiver)> {
        assert!(self.is_remote_transferred(), "renderer channel remote endpoint not transferred");
        split(self.local)
    }
}
impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("local", &self.local.as_raw_fd())
            .field("remote_endpoint_transferred", &self.is_remote_transferred())
            .finish()
    }
}

fn split<S: Serialize, R: DeserializeOwned>(stream: UnixStream) -> io::Result<(MessageSender<S>, MessageReceiver<R>)> {
    let read = stream.try_clone()?;
    Ok((
        MessageSender {
            stream: Arc::new(Mutex::new(BufWriter::new(stream))),
            _msg: PhantomData,
        },
        MessageReceiver {
            stream: BufReader::new(read),
            _msg: PhantomData,
        },
    ))
}

/// Sending half of one direction of a [`Channel`].
///
/// Clones send over the same stream, each message is written atomically.
pub struct MessageSender<T> {
    stream: Arc<Mutex<BufWriter<UnixStream>>>,
    _msg: PhantomData<fn(T)>,
}
impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
            _msg: PhantomData,
        }
    }
}
impl<T: Serialize> MessageSender<T> {
    /// Write one message and flush it.
    pub fn send(&self, msg: &T) -> IpcResult<()> {
        let len = bincode::serialized_size(msg).map_err(handle_codec_error)?;
        if len > MAX_MESSAGE_LEN as u64 {
            return Err(ChannelError::TooLarge(len));
        }
        let mut stream = self.stream.lock();
        stream.write_all(&(len as u32).to_le_bytes()).map_err(handle_io_error)?;
        bincode::serialize_into(&mut *stream, msg).map_err(handle_codec_error)?;
        stream.flush().map_err(handle_io_error)
    }
}
impl<T> MessageSender<T> {
    /// Shutdown both directions of the underlying stream.
    ///
    /// Pending and future reads on the same stream, in this process and in the peer, observe end-of-stream.
    pub fn shutdown(&self) {
        let stream = self.stream.lock();
        if let Err(e) = stream.get_ref().shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!("channel shutdown error: {e}");
            }
        }
    }
}
impl<T> fmt::Debug for MessageSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageSender<{}>", std::any::type_name::<T>())
    }
}

/// Receiving half of one direction of a [`Channel`].
pub struct MessageReceiver<T> {
    stream: BufReader<UnixStream>,
    _msg: PhantomData<fn() -> T>,
}
impl<T: DeserializeOwned> MessageReceiver<T> {
    /// Block until one message is received.
    ///
    /// Returns [`ChannelError::Disconnected`] on end-of-stream.
    pub fn recv(&mut self) -> IpcResult<T> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).map_err(handle_io_error)?;
        let len = u32::from_le_bytes(len);
        if len > MAX_MESSAGE_LEN {
            return Err(ChannelError::TooLarge(len as u64));
        }
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).map_err(handle_io_error)?;
        bincode::deserialize(&payload).map_err(handle_codec_error)
    }
}
impl<T> fmt::Debug for MessageReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageReceiver<{}>", std::any::type_name::<T>())
    }
}

/// Requests channel entry-point, used by the render client.
pub type RequestSender = MessageSender<Request>;
/// Requests channel end-point, used by the renderer.
pub type RequestReceiver = MessageReceiver<Request>;
/// Events channel entry-point, used by the renderer.
pub type EventSender = MessageSender<Event>;
/// Events channel end-point, used by the render client.
pub type EventReceiver = MessageReceiver<Event>;

/// Channels that must be used for implementing a renderer.
#[derive(Debug)]
pub struct RendererChannel {
    /// Renderers must receive requests from this channel and apply them in order.
    pub request_receiver: RequestReceiver,
    /// Renderers send notifications using this channel.
    pub event_sender: EventSender,
}
impl RendererChannel {
    /// Adopt the endpoint transferred by the UI process.
    pub fn adopt(fd: OwnedFd) -> io::Result<Self> {
        let stream = UnixStream::from(fd);
        stream.set_nonblocking(false)?;
        let (event_sender, request_receiver) = split(stream)?;
        Ok(Self {
            request_receiver,
            event_sender,
        })
    }

    /// Adopt an endpoint transferred in the same process.
    pub fn from_remote(remote: RemoteEndpoint) -> io::Result<Self> {
        Self::adopt(remote.into_owned_fd())
    }

    /// Adopt an endpoint inherited by descriptor number.
    ///
    /// # Safety
    ///
    /// The `fd` must be an open stream socket owned by nothing else in this process.
    pub unsafe fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        // SAFETY: ownership guaranteed by the caller.
        Self::adopt(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}
