//! Persistent, ordered connection carrying typed units
//!
//! A [`Channel`] owns the socket for the whole session. It is opened once,
//! passed by `&mut` to whoever needs to talk to the server, and closed once
//! on every exit path (explicitly through [`Channel::close`], or on drop).

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::codec::{self, CodecError};
use crate::protocol::{TaskCode, Unit};

/// How often a blocked receive wakes up to check for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Byte stream a [`Channel`] can run over
pub trait Transport: Read + Write {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Shared flag that aborts a blocked receive
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Connection tuning
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    /// Give up connecting after this long (per resolved address)
    pub connect_timeout: Option<Duration>,
    /// Give up waiting for a single reply after this long
    pub read_timeout: Option<Duration>,
    /// Checked while waiting for replies
    pub cancel: CancelToken,
}

/// Channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no reply from server within {0:?}")]
    Timeout(Duration),
    #[error("cancelled while waiting for the server")]
    Cancelled,
}

impl From<CodecError> for ChannelError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => ChannelError::Transport(e),
            CodecError::Protocol(msg) => ChannelError::Decode(msg),
        }
    }
}

/// Typed, half-duplex connection to the tree service
pub struct Channel<T: Transport = TcpStream> {
    reader: BufReader<T>,
    /// Bytes of a line that arrived before a poll wake-up
    pending: Vec<u8>,
    read_timeout: Option<Duration>,
    cancel: CancelToken,
    closed: bool,
}

impl Channel<TcpStream> {
    /// Resolve `host` and connect to the first address that accepts
    pub fn open(host: &str, port: u16, options: &ChannelOptions) -> Result<Self, ChannelError> {
        let addr = format!("{host}:{port}");
        let resolved = (host, port)
            .to_socket_addrs()
            .map_err(|source| ChannelError::Connection {
                addr: addr.clone(),
                source,
            })?;

        let mut last_err = None;
        for sock in resolved {
            match dial(sock, options.connect_timeout) {
                Ok(stream) => {
                    info!(%sock, "Connected to tree service");
                    return Ok(Self::new(stream, options));
                }
                Err(e) => {
                    debug!(%sock, "Connect attempt failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(ChannelError::Connection {
            addr,
            source: last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
            }),
        })
    }
}

impl<T: Transport> Channel<T> {
    /// Wrap an already connected transport
    pub fn new(transport: T, options: &ChannelOptions) -> Self {
        Self {
            reader: BufReader::new(transport),
            pending: Vec::new(),
            read_timeout: options.read_timeout,
            cancel: options.cancel.clone(),
            closed: false,
        }
    }

    /// Send one unit
    pub fn send(&mut self, unit: &Unit) -> Result<(), ChannelError> {
        trace!(kind = unit.kind(), "-> {unit}");
        codec::write_unit(self.reader.get_mut(), unit)?;
        Ok(())
    }

    /// Send a task code and its optional argument
    pub fn send_request(&mut self, task: TaskCode, argument: Option<&str>) -> Result<(), ChannelError> {
        debug!(%task, argument, "Sending request");
        codec::write_request(self.reader.get_mut(), task, argument)?;
        Ok(())
    }

    /// Block until one unit arrives, the deadline passes, or the cancel token fires
    pub fn receive(&mut self) -> Result<Unit, ChannelError> {
        let deadline = self.read_timeout.map(|t| Instant::now() + t);

        loop {
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }

            let mut wait = POLL_INTERVAL;
            if let (Some(deadline), Some(limit)) = (deadline, self.read_timeout) {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ChannelError::Timeout(limit));
                }
                wait = wait.min(deadline - now);
            }
            self.reader.get_ref().set_read_timeout(Some(wait))?;

            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) if self.pending.is_empty() => {
                    return Err(ChannelError::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    )));
                }
                Ok(_) => {
                    let frame = std::mem::take(&mut self.pending);
                    let unit = codec::decode_frame(&frame)?;
                    trace!(kind = unit.kind(), "<- {unit}");
                    return Ok(unit);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(ChannelError::Transport(e)),
            }
        }
    }

    /// Receive a unit that must be text
    pub fn receive_text(&mut self) -> Result<String, ChannelError> {
        match self.receive()? {
            Unit::Text(s) => Ok(s),
            other => Err(unexpected("str", &other)),
        }
    }

    /// Receive a unit that must be an integer
    pub fn receive_int(&mut self) -> Result<i64, ChannelError> {
        match self.receive()? {
            Unit::Int(n) => Ok(n),
            other => Err(unexpected("int", &other)),
        }
    }

    /// Shut the connection down, reporting any error
    pub fn close(mut self) -> Result<(), ChannelError> {
        self.closed = true;
        info!("Closing channel");
        match self.reader.get_ref().shutdown() {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(ChannelError::Transport(e)),
            _ => Ok(()),
        }
    }

}

impl<T: Transport> Drop for Channel<T> {
    fn drop(&mut self) {
        if !self.closed {
            debug!("Channel dropped without close, shutting down");
            let _ = self.reader.get_ref().shutdown();
        }
    }
}

/// Connect to `sock` and configure the stream; any failure counts as a failed attempt
fn dial(sock: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(&sock, timeout)?,
        None => TcpStream::connect(sock)?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Decode error for a unit of the wrong type
pub(crate) fn unexpected(expected: &str, got: &Unit) -> ChannelError {
    ChannelError::Decode(format!("expected {expected} unit, got {}", got.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeTransport;

    fn channel(replies: &[Unit]) -> (Channel<FakeTransport>, FakeTransport) {
        let transport = FakeTransport::scripted(replies);
        let handle = transport.clone();
        (Channel::new(transport, &ChannelOptions::default()), handle)
    }

    #[test]
    fn send_then_receive_in_order() {
        let (mut ch, fake) = channel(&[Unit::text("ok"), Unit::Int(2)]);
        ch.send_request(TaskCode::LearnTreeFromDb, Some("sales")).unwrap();

        assert_eq!(ch.receive().unwrap(), Unit::text("ok"));
        assert_eq!(ch.receive_int().unwrap(), 2);
        assert_eq!(
            fake.sent(),
            vec![Unit::Int(3), Unit::text("sales")]
        );
    }

    #[test]
    fn typed_receive_rejects_mismatch() {
        let (mut ch, _) = channel(&[Unit::Int(7), Unit::text("x")]);
        assert!(matches!(ch.receive_text(), Err(ChannelError::Decode(_))));
        assert!(matches!(ch.receive_int(), Err(ChannelError::Decode(_))));
    }

    #[test]
    fn eof_is_transport_error() {
        let (mut ch, _) = channel(&[]);
        assert!(matches!(ch.receive(), Err(ChannelError::Transport(_))));
    }

    #[test]
    fn malformed_line_is_decode_error() {
        let fake = FakeTransport::raw(b"bogus line\n");
        let mut ch = Channel::new(fake, &ChannelOptions::default());
        assert!(matches!(ch.receive(), Err(ChannelError::Decode(_))));
    }

    #[test]
    fn cancelled_token_stops_receive() {
        let options = ChannelOptions::default();
        options.cancel.cancel();
        let mut ch = Channel::new(FakeTransport::scripted(&[Unit::Int(1)]), &options);
        assert!(matches!(ch.receive(), Err(ChannelError::Cancelled)));
    }

    #[test]
    fn close_shuts_down_once() {
        let (ch, fake) = channel(&[]);
        ch.close().unwrap();
        assert_eq!(fake.shutdowns(), 1);
    }

    #[test]
    fn drop_shuts_down() {
        let (ch, fake) = channel(&[]);
        drop(ch);
        assert_eq!(fake.shutdowns(), 1);
    }

    #[test]
    fn open_unreachable_is_connection_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = Channel::open("127.0.0.1", port, &ChannelOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::Connection { .. }));
    }

    #[test]
    fn dial_configures_stream() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let sock = listener.local_addr().unwrap();
        let stream = dial(sock, Some(Duration::from_secs(2))).unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[test]
    fn failed_dial_with_timeout_names_address() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let options = ChannelOptions {
            connect_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        match Channel::open("127.0.0.1", port, &options) {
            Err(ChannelError::Connection { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{port}")),
            other => panic!("expected a connection error, got {:?}", other.err()),
        }
    }
}
