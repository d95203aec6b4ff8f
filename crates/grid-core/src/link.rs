//! Owns one open serial port.
use crate::framer::Framer;
use packet_codec::DecodedMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;

pub const BAUD_RATE: u32 = 2_000_000;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("timed out waiting for a matching message")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
}

/// Broadcast of everything the Link observes, consumed by the Correlator,
/// which needs every message (not just the first matching waiter) so it can
/// fork heartbeat traffic into an inventory sink.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Message(DecodedMessage),
    Error(String),
    Closed,
}

struct PendingWaiter {
    predicate: Box<dyn Fn(&DecodedMessage) -> bool + Send + Sync>,
    sender: oneshot::Sender<DecodedMessage>,
}

pub struct Link {
    write_half: Arc<Mutex<Option<WriteHalf<tokio_serial::SerialStream>>>>,
    events: broadcast::Sender<LinkEvent>,
    waiters: Arc<Mutex<Vec<PendingWaiter>>>,
    closing: Arc<AtomicBool>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    /// Opens `path` exclusively at 2 Mbaud, 8-N-1, no flow control, and
    /// spawns the Framer over the inbound byte stream.
    pub async fn open(path: &str) -> Result<Self, LinkError> {
        let port = tokio_serial::new(path, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LinkError::Connection(e.to_string()))?;

        #[cfg(unix)]
        {
            use tokio_serial::SerialPort;
            let _ = port.try_clone().map(|mut p| p.set_exclusive(true));
        }

        let (read_half, write_half) = tokio::io::split(port);
        let (events_tx, _) = broadcast::channel(1024);
        let waiters: Arc<Mutex<Vec<PendingWaiter>>> = Arc::new(Mutex::new(Vec::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(Self::run_reader(
            read_half,
            events_tx.clone(),
            waiters.clone(),
            closing.clone(),
        ));

        Ok(Self {
            write_half: Arc::new(Mutex::new(Some(write_half))),
            events: events_tx,
            waiters,
            closing,
            reader_task: Mutex::new(Some(reader_task)),
        })
    }

    async fn run_reader(
        mut read_half: ReadHalf<tokio_serial::SerialStream>,
        events: broadcast::Sender<LinkEvent>,
        waiters: Arc<Mutex<Vec<PendingWaiter>>>,
        closing: Arc<AtomicBool>,
    ) {
        let mut framer = Framer::new();
        let mut buf = [0u8; 4096];
        loop {
            if closing.load(Ordering::SeqCst) {
                break;
            }
            match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let payloads = match framer.push(&buf[..n]) {
                        Ok(payloads) => payloads,
                        Err(err) => {
                            let _ = events.send(LinkEvent::Error(err.to_string()));
                            continue;
                        }
                    };
                    for payload in payloads {
                        let messages = match packet_codec::decode_packet_frame(&payload) {
                            Ok(messages) => messages,
                            Err(err) => {
                                let _ = events.send(LinkEvent::Error(err.to_string()));
                                continue;
                            }
                        };
                        for message in messages {
                            Self::resolve_waiters(&waiters, &message).await;
                            let _ = events.send(LinkEvent::Message(message));
                        }
                    }
                }
                Err(err) => {
                    let _ = events.send(LinkEvent::Error(err.to_string()));
                    break;
                }
            }
        }
        let _ = events.send(LinkEvent::Closed);
    }

    /// Resolves the first registered waiter (in registration order) whose
    /// predicate matches. Link's own `await_message` primitive is
    /// single-consumer by design; the Correlator gets every message via the
    /// broadcast stream regardless.
    async fn resolve_waiters(waiters: &Arc<Mutex<Vec<PendingWaiter>>>, message: &DecodedMessage) {
        let mut guard = waiters.lock().await;
        if let Some(index) = guard.iter().position(|w| (w.predicate)(message)) {
            let waiter = guard.remove(index);
            let _ = waiter.sender.send(message.clone());
        }
    }

    /// Subscribes to the full inbound event stream (used by the Correlator).
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Registers a one-shot predicate; resolves with the first matching
    /// payload, else fails with `Timeout`. Cancellation before match is
    /// silent.
    pub async fn await_message(
        &self,
        predicate: impl Fn(&DecodedMessage) -> bool + Send + Sync + 'static,
        timeout_ms: u64,
    ) -> Result<DecodedMessage, LinkError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(LinkError::Cancelled);
        }
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.waiters.lock().await;
            guard.push(PendingWaiter {
                predicate: Box::new(predicate),
                sender: tx,
            });
        }
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(LinkError::Cancelled),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    /// Frames `payload` and sends it, awaiting OS drain.
    pub async fn write(&self, payload: &[u8]) -> Result<(), LinkError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(LinkError::Cancelled);
        }
        let framed = Framer::frame_outbound(payload);
        let mut guard = self.write_half.lock().await;
        let Some(write_half) = guard.as_mut() else {
            return Err(LinkError::Cancelled);
        };
        write_half
            .write_all(&framed)
            .await
            .map_err(|e| LinkError::WriteFailed(e.to_string()))?;
        write_half
            .flush()
            .await
            .map_err(|e| LinkError::WriteFailed(e.to_string()))
    }

    /// Drains, cancels every outstanding waiter with `Cancelled`, detaches
    /// listeners, and releases the port. Takes `&self` (not
    /// `&mut self`) so Device can hold the Link behind an `Arc` and still
    /// close it from the editor-heartbeat task's shutdown path.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        let mut waiters = self.waiters.lock().await;
        for waiter in waiters.drain(..) {
            drop(waiter.sender);
        }
        drop(waiters);
        let mut write_half = self.write_half.lock().await;
        write_half.take();
        let _ = self.events.send(LinkEvent::Closed);
    }
}
