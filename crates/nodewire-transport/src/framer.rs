//! Async framing over one exclusively owned byte stream.
//!
//! A [`Framer`] splits its stream into read and write halves so that a
//! deadline-bound receive can emit keep-alive frames while it waits. Frames
//! are written whole under the writer lock; readers are expected to be
//! serialized by the owner (see [`crate::node::Node::receive`]).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval};
use tracing::{debug, trace};

use crate::constants::{KEEPALIVE_INTERVAL, LENGTH_PREFIX_SIZE};
use crate::envelope::{self, DecodedFrame, Envelope, FrameCodec, KEEPALIVE_FRAME};
use crate::error::FramerError;
use crate::shutdown::ShutdownToken;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-connection framing options.
#[derive(Debug, Clone)]
pub struct FramerOptions {
    /// Envelope used for outbound frames until the peer upgrades us.
    pub envelope: Envelope,
    /// Deadline for each inbound frame. `None` waits forever.
    pub receive_timeout: Option<Duration>,
    /// Keep-alive cadence while a deadline-bound read waits.
    pub keepalive_interval: Duration,
}

impl Default for FramerOptions {
    fn default() -> Self {
        Self {
            envelope: Envelope::Legacy,
            receive_timeout: None,
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }
}

impl FramerOptions {
    pub fn upgraded() -> Self {
        Self {
            envelope: Envelope::Upgraded,
            ..Self::default()
        }
    }
}

pub struct Framer {
    codec: FrameCodec,
    reader: Mutex<BoxedReader>,
    writer: Mutex<Option<BoxedWriter>>,
    preferred: Envelope,
    /// Latched once an upgraded frame is sent or received.
    upgraded: AtomicBool,
    /// Receive deadline in milliseconds; 0 means unbounded.
    receive_timeout_ms: AtomicU64,
    keepalive_interval: Duration,
    shutdown: ShutdownToken,
}

impl Framer {
    pub fn new<S>(stream: S, codec: FrameCodec, options: FramerOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        let framer = Self {
            codec,
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Some(Box::new(writer))),
            preferred: options.envelope,
            upgraded: AtomicBool::new(options.envelope == Envelope::Upgraded),
            receive_timeout_ms: AtomicU64::new(0),
            keepalive_interval: options.keepalive_interval,
            shutdown: ShutdownToken::new(),
        };
        framer.set_receive_timeout(options.receive_timeout);
        framer.shutdown.set_online();
        framer
    }

    /// Envelope the next outbound frame will use.
    pub fn envelope(&self) -> Envelope {
        if self.is_upgraded() {
            Envelope::Upgraded
        } else {
            self.preferred
        }
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::SeqCst)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        match self.receive_timeout_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Set or clear the receive deadline. A zero duration clears it;
    /// other sub-millisecond values round up to one millisecond.
    pub fn set_receive_timeout(&self, timeout: Option<Duration>) {
        let ms = match timeout {
            None => 0,
            Some(t) if t.is_zero() => 0,
            Some(t) => u64::try_from(t.as_millis()).unwrap_or(u64::MAX).max(1),
        };
        self.receive_timeout_ms.store(ms, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_stopped()
    }

    /// Encode and write one frame.
    pub async fn send(&self, payload: &[u8]) -> Result<(), FramerError> {
        if self.is_closed() {
            return Err(FramerError::Closed);
        }

        let envelope = self.envelope();
        let frame = self.codec.encode(payload, envelope)?;
        if envelope == Envelope::Upgraded {
            self.upgraded.store(true, Ordering::SeqCst);
        }
        self.write_raw(&frame).await
    }

    /// Read frames until one carries a payload, discarding keep-alives.
    ///
    /// The deadline covers the whole call, so keep-alives from the peer do
    /// not extend it.
    pub async fn receive(&self) -> Result<Vec<u8>, FramerError> {
        let mut reader = self.reader.lock().await;
        let deadline = self.receive_timeout().map(|t| Instant::now() + t);
        loop {
            let body = self.read_body(&mut reader, deadline).await?;
            match self.codec.decode_body(&body)? {
                DecodedFrame::KeepAlive => {
                    trace!("discarded keep-alive frame");
                }
                DecodedFrame::Payload { data, envelope } => {
                    if envelope == Envelope::Upgraded && !self.upgraded.swap(true, Ordering::SeqCst)
                    {
                        debug!("peer switched to the upgraded envelope");
                    }
                    return Ok(data);
                }
            }
        }
    }

    /// Shut down the write side, then drop both halves' access to the socket.
    ///
    /// Wakes any receive blocked on the stream. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.signal_stop();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            debug!(error = %e, "graceful shutdown failed, closing stream");
        }
    }

    /// Write pre-encoded frame bytes.
    async fn write_raw(&self, frame: &[u8]) -> Result<(), FramerError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(FramerError::Closed)?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_body(
        &self,
        reader: &mut BoxedReader,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, FramerError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        self.read_exact_until(reader, &mut prefix, deadline).await?;
        let len = envelope::parse_length_prefix(prefix)?;

        let mut body = vec![0u8; len];
        self.read_exact_until(reader, &mut body, deadline).await?;
        trace!(len, marker = body[0], "read frame body");
        Ok(body)
    }

    /// Fill `buf` from the stream, retrying short reads.
    ///
    /// With a deadline, a keep-alive frame goes out every
    /// `keepalive_interval` while waiting and [`FramerError::Timeout`] is
    /// returned once the deadline passes.
    async fn read_exact_until(
        &self,
        reader: &mut BoxedReader,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<(), FramerError> {
        let mut stop_rx = self.shutdown.subscribe();
        if *stop_rx.borrow() {
            return Err(FramerError::Closed);
        }

        let mut keepalive = deadline.map(|_| {
            tokio::time::interval_at(
                Instant::now() + self.keepalive_interval,
                self.keepalive_interval,
            )
        });

        let mut filled = 0;
        while filled < buf.len() {
            tokio::select! {
                result = reader.read(&mut buf[filled..]) => {
                    match result? {
                        0 => return Err(FramerError::Disconnected),
                        n => filled += n,
                    }
                }
                () = sleep_until_deadline(deadline) => {
                    debug!(filled, wanted = buf.len(), "receive deadline elapsed");
                    return Err(FramerError::Timeout);
                }
                () = next_tick(&mut keepalive) => {
                    trace!("sending keep-alive while waiting");
                    self.write_raw(&KEEPALIVE_FRAME).await?;
                }
                _ = stop_rx.changed() => return Err(FramerError::Closed),
            }
        }
        Ok(())
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
