//! Transport abstraction between the engine and the network.
//!
//! The engine only needs ordered byte delivery: a writer half that accepts
//! partial writes and a reader half that yields inbound chunks. TCP is the
//! production implementation; an in-memory channel transport with
//! scripted write faults backs the tests.

use std::io;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use compio::net::TcpStream;
use tracing::debug;

/// Outbound half of a transport.
#[async_trait(?Send)]
pub trait TransportWriter: 'static {
    /// Write some bytes, returning how many were accepted.
    ///
    /// `Ok(0)` means the peer closed the connection.
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Inbound half of a transport.
#[async_trait(?Send)]
pub trait TransportReader: 'static {
    /// Receive the next chunk of bytes. An empty chunk means EOF.
    async fn recv(&mut self) -> io::Result<Bytes>;
}

/// An established bidirectional byte stream.
pub trait Transport: 'static {
    /// Split into independently owned halves for the writer and read loops.
    fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>);
}

/// Dials transports; reused across reconnect attempts.
#[async_trait(?Send)]
pub trait Connector: 'static {
    async fn connect(&self) -> io::Result<Box<dyn Transport>>;
}

/// Enable TCP_NODELAY for minimal latency.
///
/// This disables Nagle's algorithm, trading bandwidth efficiency for lower
/// latency. Essential for request-reply patterns.
#[allow(unsafe_code)]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        sock.set_nodelay(true)?;
        std::mem::forget(sock); // Don't close the fd
        Ok(())
    }

    #[cfg(not(unix))]
    {
        Ok(())
    }
}

const READ_CHUNK_SIZE: usize = 8192;

/// TCP transport over a compio stream.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an established stream, enabling TCP_NODELAY best-effort.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = enable_tcp_nodelay(&stream) {
            debug!(error = %e, "could not enable TCP_NODELAY");
        }
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
        let stream = Rc::new(self.stream);
        (
            Box::new(TcpWriterHalf {
                stream: Rc::clone(&stream),
            }),
            Box::new(TcpReaderHalf { stream }),
        )
    }
}

struct TcpWriterHalf {
    stream: Rc<TcpStream>,
}

#[async_trait(?Send)]
impl TransportWriter for TcpWriterHalf {
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        use compio::buf::BufResult;
        use compio::io::AsyncWrite;

        let owned = buf.to_vec();
        let mut stream = self.stream.as_ref();
        let BufResult(result, _) = AsyncWrite::write(&mut stream, owned).await;
        result
    }
}

struct TcpReaderHalf {
    stream: Rc<TcpStream>,
}

#[async_trait(?Send)]
impl TransportReader for TcpReaderHalf {
    async fn recv(&mut self) -> io::Result<Bytes> {
        use compio::buf::BufResult;
        use compio::io::AsyncRead;

        let chunk = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut stream = self.stream.as_ref();
        let BufResult(result, mut chunk) = AsyncRead::read(&mut stream, chunk).await;
        let n = result?;
        chunk.truncate(n);
        Ok(Bytes::from(chunk))
    }
}

/// Connector dialing a fixed TCP address.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait(?Send)]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let stream = TcpStream::connect(&self.addr).await?;
        debug!(addr = %self.addr, "transport connected");
        Ok(Box::new(TcpTransport::new(stream)))
    }
}

/// In-memory transport over channels, with scripted write faults.
///
/// Used by tests to drive the engine without a network: the peer side
/// observes every byte the client writes, injects inbound frames, and can
/// force partial writes, zero-byte writes, or I/O errors at exact points.
pub mod mem {
    use super::{Transport, TransportReader, TransportWriter};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    /// Outcome of the next `send` call on a memory transport.
    #[derive(Debug, Clone, Copy)]
    pub enum WriteStep {
        /// Accept at most this many bytes (a partial write).
        Accept(usize),
        /// Return a zero-byte write (closed socket).
        Zero,
        /// Fail with an I/O error of this kind.
        Error(io::ErrorKind),
    }

    type Script = Rc<RefCell<VecDeque<WriteStep>>>;

    /// Client-side endpoint handed to the engine.
    pub struct MemoryTransport {
        out_tx: flume::Sender<Bytes>,
        in_rx: flume::Receiver<Bytes>,
        script: Script,
    }

    /// Test-side endpoint observing and driving the transport.
    pub struct MemoryPeer {
        out_rx: flume::Receiver<Bytes>,
        in_tx: RefCell<Option<flume::Sender<Bytes>>>,
        script: Script,
    }

    /// Create a connected transport/peer pair.
    #[must_use]
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (out_tx, out_rx) = flume::unbounded();
        let (in_tx, in_rx) = flume::unbounded();
        let script: Script = Rc::default();
        (
            MemoryTransport {
                out_tx,
                in_rx,
                script: Rc::clone(&script),
            },
            MemoryPeer {
                out_rx,
                in_tx: RefCell::new(Some(in_tx)),
                script,
            },
        )
    }

    impl MemoryPeer {
        /// Queue the outcome of an upcoming `send` call. Unscripted sends
        /// accept everything.
        pub fn push_write_step(&self, step: WriteStep) {
            self.script.borrow_mut().push_back(step);
        }

        /// Drain every byte the client has written so far.
        #[must_use]
        pub fn written(&self) -> Vec<u8> {
            let mut all = Vec::new();
            while let Ok(chunk) = self.out_rx.try_recv() {
                all.extend_from_slice(&chunk);
            }
            all
        }

        /// Wait for the next written chunk.
        pub async fn next_written(&self) -> Option<Bytes> {
            self.out_rx.recv_async().await.ok()
        }

        /// Inject inbound bytes as if the broker had sent them.
        pub fn inject(&self, bytes: impl Into<Bytes>) {
            if let Some(tx) = self.in_tx.borrow().as_ref() {
                let _ = tx.send(bytes.into());
            }
        }

        /// Close the inbound direction: the client's reader observes EOF.
        pub fn close(&self) {
            self.in_tx.borrow_mut().take();
        }
    }

    impl Transport for MemoryTransport {
        fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
            (
                Box::new(MemoryWriterHalf {
                    out_tx: self.out_tx,
                    script: self.script,
                }),
                Box::new(MemoryReaderHalf { in_rx: self.in_rx }),
            )
        }
    }

    struct MemoryWriterHalf {
        out_tx: flume::Sender<Bytes>,
        script: Script,
    }

    #[async_trait(?Send)]
    impl TransportWriter for MemoryWriterHalf {
        async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            let step = self.script.borrow_mut().pop_front();
            match step {
                None => {
                    let n = buf.len();
                    let _ = self.out_tx.send(Bytes::copy_from_slice(buf));
                    Ok(n)
                }
                Some(WriteStep::Accept(limit)) => {
                    let n = limit.min(buf.len());
                    let _ = self.out_tx.send(Bytes::copy_from_slice(&buf[..n]));
                    Ok(n)
                }
                Some(WriteStep::Zero) => Ok(0),
                Some(WriteStep::Error(kind)) => Err(io::Error::new(kind, "scripted write fault")),
            }
        }
    }

    struct MemoryReaderHalf {
        in_rx: flume::Receiver<Bytes>,
    }

    #[async_trait(?Send)]
    impl TransportReader for MemoryReaderHalf {
        async fn recv(&mut self) -> io::Result<Bytes> {
            match self.in_rx.recv_async().await {
                Ok(chunk) => Ok(chunk),
                Err(_) => Ok(Bytes::new()), // peer gone: EOF
            }
        }
    }

    /// Connector yielding a pre-built sequence of memory transports, one
    /// per connect attempt.
    pub struct MemoryConnector {
        transports: RefCell<VecDeque<MemoryTransport>>,
    }

    impl MemoryConnector {
        #[must_use]
        pub fn new(transports: impl IntoIterator<Item = MemoryTransport>) -> Self {
            Self {
                transports: RefCell::new(transports.into_iter().collect()),
            }
        }
    }

    #[async_trait(?Send)]
    impl super::Connector for MemoryConnector {
        async fn connect(&self) -> io::Result<Box<dyn Transport>> {
            match self.transports.borrow_mut().pop_front() {
                Some(t) => Ok(Box::new(t)),
                None => Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "no more scripted transports",
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mem::{pair, WriteStep};
    use super::*;

    #[test]
    fn memory_transport_round_trip() {
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (transport, peer) = pair();
            let (mut tx, mut rx) = Box::new(transport).split();

            assert_eq!(tx.send(b"hello").await.unwrap(), 5);
            assert_eq!(peer.written(), b"hello");

            peer.inject(&b"world"[..]);
            assert_eq!(&rx.recv().await.unwrap()[..], b"world");

            peer.close();
            assert!(rx.recv().await.unwrap().is_empty());
        });
    }

    #[test]
    fn scripted_faults_fire_in_order() {
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (transport, peer) = pair();
            peer.push_write_step(WriteStep::Accept(3));
            peer.push_write_step(WriteStep::Zero);
            peer.push_write_step(WriteStep::Error(io::ErrorKind::BrokenPipe));

            let (mut tx, _rx) = Box::new(transport).split();
            assert_eq!(tx.send(b"abcdef").await.unwrap(), 3);
            assert_eq!(tx.send(b"def").await.unwrap(), 0);
            assert!(tx.send(b"def").await.is_err());

            // Unscripted writes accept everything again.
            assert_eq!(tx.send(b"def").await.unwrap(), 3);
            assert_eq!(peer.written(), b"abcdef");
        });
    }
}
