//! Device worker: owns the socket of one connected peer.
//!
//! The read half is serviced by a dedicated task that decodes messages
//! progressively and hands them to the inbox in arrival order. Writes come
//! from `forward` and are serialized by the writer lock. When the read loop
//! ends, for whatever reason, the socket is closed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use house_core::config::WorkerConfig;
use house_core::{HouseIdentifier, Message};
use house_services::MessageInbox;

/// Time of the last byte exchanged, readable without a lock.
#[derive(Debug)]
pub struct ContactClock {
    epoch: Instant,
    last_millis: AtomicU64,
}

impl ContactClock {
    /// A clock whose last contact is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let millis = self.epoch.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(millis, Ordering::Relaxed);
    }

    pub fn last_contact(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_millis.load(Ordering::Relaxed))
    }

    pub fn since_last_contact(&self) -> Duration {
        self.last_contact().elapsed()
    }
}

impl Default for ContactClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeviceWorker {
    peer: HouseIdentifier,
    running: AtomicBool,
    contact: ContactClock,
    network_contact: Arc<ContactClock>,
    reader: parking_lot::Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    stop: Notify,
    inbox: Arc<dyn MessageInbox>,
    settings: WorkerConfig,
}

impl DeviceWorker {
    /// Bind a worker to `stream`. Nothing is read until [`start`](Self::start).
    pub fn new(
        peer: HouseIdentifier,
        stream: TcpStream,
        inbox: Arc<dyn MessageInbox>,
        network_contact: Arc<ContactClock>,
        settings: WorkerConfig,
    ) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        Arc::new(Self {
            peer,
            running: AtomicBool::new(false),
            contact: ContactClock::new(),
            network_contact,
            reader: parking_lot::Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            stop: Notify::new(),
            inbox,
            settings,
        })
    }

    pub fn peer(&self) -> HouseIdentifier {
        self.peer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_contact(&self) -> Instant {
        self.contact.last_contact()
    }

    /// Spawn the read loop. Returns false if the worker was already started.
    pub fn start(self: &Arc<Self>) -> bool {
        let Some(reader) = self.reader.lock().take() else {
            return false;
        };
        self.running.store(true, Ordering::Release);
        tracing::debug!(peer = self.peer, "worker started");
        tokio::spawn(Arc::clone(self).read_loop(reader));
        true
    }

    /// Ask the read loop to finish. Not immediate: a read that already
    /// returned is processed first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stop.notify_one();
    }

    /// Encode and send one message. Returns whether every byte was written.
    ///
    /// A write that fails or outlasts the write timeout stops the worker: the
    /// stream may hold a partial frame and cannot be reused.
    pub async fn write(&self, message: &Message) -> bool {
        if !self.is_running() {
            return false;
        }
        let bytes = message.encode();
        let mut writer = self.writer.lock().await;
        let Some(half) = writer.as_mut() else {
            return false;
        };
        match timeout(self.settings.write_timeout(), half.write_all(&bytes)).await {
            Ok(Ok(())) => {
                self.touch();
                tracing::trace!(peer = self.peer, bytes = bytes.len(), "message written");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(peer = self.peer, error = %e, "write failed, stopping worker");
                drop(writer);
                self.stop();
                false
            }
            Err(_) => {
                tracing::warn!(peer = self.peer, "write timed out, stopping worker");
                drop(writer);
                self.stop();
                false
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let capacity = self.settings.read_buffer_bytes.max(1);
        let poll = self.settings.poll_timeout();
        let idle = self.settings.idle_timeout();
        let mut buf = BytesMut::with_capacity(capacity);

        while self.is_running() {
            buf.reserve(capacity);
            tokio::select! {
                _ = self.stop.notified() => break,

                read = timeout(poll, reader.read_buf(&mut buf)) => match read {
                    Err(_) => {
                        if self.contact.since_last_contact() >= idle {
                            tracing::debug!(peer = self.peer, "peer idle, reaping worker");
                            break;
                        }
                    }
                    Ok(Ok(0)) => {
                        tracing::debug!(peer = self.peer, "peer closed connection");
                        break;
                    }
                    Ok(Ok(n)) => {
                        tracing::trace!(peer = self.peer, bytes = n, "read");
                        self.touch();
                        self.dispatch_buffered(&mut buf);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(peer = self.peer, error = %e, "read failed");
                        break;
                    }
                },
            }
        }

        self.running.store(false, Ordering::Release);
        drop(reader);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        tracing::debug!(peer = self.peer, "worker stopped");
    }

    /// Deliver every complete message in `buf`, keeping a trailing fragment.
    fn dispatch_buffered(&self, buf: &mut BytesMut) {
        while !buf.is_empty() {
            let consumed = match Message::decode_prefix(&buf[..]) {
                Ok((message, rest)) => {
                    let consumed = buf.len() - rest.map_or(0, <[u8]>::len);
                    self.inbox.received(message);
                    consumed
                }
                Err(e) if e.is_incomplete() => return,
                Err(e) => {
                    tracing::warn!(
                        peer = self.peer,
                        error = %e,
                        "undecodable stream, discarding buffer"
                    );
                    buf.clear();
                    return;
                }
            };
            buf.advance(consumed);
        }
    }

    fn touch(&self) {
        self.contact.touch();
        self.network_contact.touch();
    }
}
