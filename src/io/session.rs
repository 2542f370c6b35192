// src/io/session.rs
//
// Lifecycle of one transport connection.
//
// States: Disconnected -> Connecting -> Open -> Closing -> Disconnected.
// While Open a single read loop task pumps chunks into the capture log and
// the shared pipeline. `disconnect` cancels the pending read, waits for the
// loop to close its reader, and only then releases the writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    emit, sanitize_outgoing, ChunkReader, ChunkWriter, EventSender, SessionEvent,
    StreamEndReason, Transport, TransportConfig, TransportKind,
};
use crate::capture::CaptureHandle;
use crate::error::LinkError;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Stop signal for one read loop. Created fresh on every connect so a
/// leftover notification cannot end the next loop early.
struct LoopControl {
    keep_reading: AtomicBool,
    cancel: Notify,
}

impl LoopControl {
    fn new() -> Self {
        LoopControl {
            keep_reading: AtomicBool::new(true),
            cancel: Notify::new(),
        }
    }

    fn stop(&self) {
        self.keep_reading.store(false, Ordering::SeqCst);
        self.cancel.notify_one();
    }
}

/// Everything the read loop needs, cloned out of the session
struct LoopContext {
    kind: TransportKind,
    state: Arc<Mutex<SessionState>>,
    control: Arc<LoopControl>,
    pipeline: Arc<Pipeline>,
    capture: CaptureHandle,
    events: EventSender,
}

pub struct TransportSession {
    kind: TransportKind,
    transport: Arc<dyn Transport>,
    pipeline: Arc<Pipeline>,
    capture: CaptureHandle,
    events: EventSender,
    state: Arc<Mutex<SessionState>>,
    control: Option<Arc<LoopControl>>,
    writer: Option<Box<dyn ChunkWriter>>,
    task: Option<JoinHandle<()>>,
}

impl TransportSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        pipeline: Arc<Pipeline>,
        capture: CaptureHandle,
        events: EventSender,
    ) -> Self {
        TransportSession {
            kind: transport.kind(),
            transport,
            pipeline,
            capture,
            events,
            state: Arc::new(Mutex::new(SessionState::Disconnected)),
            control: None,
            writer: None,
            task: None,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Open the transport and start the read loop. Fails without retrying if
    /// the device cannot be acquired; the session then stays Disconnected.
    pub async fn connect(&mut self, config: &TransportConfig) -> Result<(), LinkError> {
        if self.state() != SessionState::Disconnected {
            return Err(LinkError::AlreadyOpen(self.kind));
        }
        if config.kind() != self.kind {
            return Err(LinkError::Settings(format!(
                "{} session cannot use {} configuration",
                self.kind,
                config.kind()
            )));
        }

        // The previous loop may have ended on its own; release what it left
        self.release().await;

        self.set_state(SessionState::Connecting);
        debug!(kind = %self.kind, "connecting");

        let stream = match self.transport.open(config).await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                warn!(kind = %self.kind, "connect failed: {}", e);
                emit(
                    &self.events,
                    SessionEvent::Error {
                        kind: self.kind,
                        message: e.to_string(),
                    },
                );
                return Err(e);
            }
        };

        let control = Arc::new(LoopControl::new());
        self.writer = Some(stream.writer);
        self.control = Some(control.clone());
        self.set_state(SessionState::Open);

        let ctx = LoopContext {
            kind: self.kind,
            state: self.state.clone(),
            control,
            pipeline: self.pipeline.clone(),
            capture: self.capture.clone(),
            events: self.events.clone(),
        };
        self.task = Some(tokio::spawn(read_loop(stream.reader, ctx)));

        info!(kind = %self.kind, "connected");
        emit(&self.events, SessionEvent::Connected { kind: self.kind });
        Ok(())
    }

    /// Stop the read loop and release the transport. Safe to call in any
    /// state, including when no read is in flight.
    pub async fn disconnect(&mut self) {
        if self.state() == SessionState::Open {
            self.set_state(SessionState::Closing);
        }
        self.release().await;
        self.set_state(SessionState::Disconnected);
    }

    /// Cancel and join the read loop, then close the writer. The reader is
    /// closed by the loop itself before the join completes.
    async fn release(&mut self) {
        if let Some(control) = self.control.take() {
            control.stop();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(kind = %self.kind, "read loop ended abnormally: {}", e);
            }
        }
        if let Some(mut writer) = self.writer.take() {
            writer.close().await;
            debug!(kind = %self.kind, "transport released");
        }
    }

    /// Send `text` followed by a single newline. Writing while not Open is a
    /// silent no-op.
    pub async fn write(&mut self, text: &str) -> Result<(), LinkError> {
        if self.state() != SessionState::Open {
            debug!(kind = %self.kind, "write ignored, session not open");
            return Ok(());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        match writer.write_all(&sanitize_outgoing(text)).await {
            // The stream ended while the write was in flight
            Err(e) if self.state() != SessionState::Open => {
                debug!(kind = %self.kind, "write dropped, session closed: {}", e);
                Ok(())
            }
            result => result,
        }
    }
}

async fn read_loop(mut reader: Box<dyn ChunkReader>, ctx: LoopContext) {
    let kind = ctx.kind;
    let reason = loop {
        if !ctx.control.keep_reading.load(Ordering::SeqCst) {
            break StreamEndReason::Stopped;
        }

        let next = tokio::select! {
            biased;
            _ = ctx.control.cancel.notified() => break StreamEndReason::Stopped,
            next = reader.read_chunk() => next,
        };

        match next {
            Ok(Some(chunk)) => {
                if let Err(e) = ctx.capture.record(&chunk) {
                    warn!(%kind, "capture log disabled: {}", e);
                    emit(
                        &ctx.events,
                        SessionEvent::LoggingDisabled {
                            reason: e.to_string(),
                        },
                    );
                }
                for failure in ctx.pipeline.feed(&chunk) {
                    let len = match &failure {
                        LinkError::Decode { len, .. } => *len,
                        _ => 0,
                    };
                    emit(
                        &ctx.events,
                        SessionEvent::TokenDropped {
                            kind,
                            len,
                            reason: failure.to_string(),
                        },
                    );
                }
            }
            Ok(None) => {
                debug!(%kind, "end of stream");
                break StreamEndReason::Disconnected;
            }
            Err(e) => {
                warn!(%kind, "read loop stopping: {}", e);
                emit(
                    &ctx.events,
                    SessionEvent::Error {
                        kind,
                        message: e.to_string(),
                    },
                );
                break StreamEndReason::Error;
            }
        }
    };

    reader.close().await;

    {
        // A loop that ends on its own takes the session down with it;
        // during disconnect the session finishes the transition itself.
        let mut state = ctx.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Open {
            *state = SessionState::Disconnected;
        }
    }

    info!(%kind, ?reason, "stream ended");
    emit(&ctx.events, SessionEvent::StreamEnded { kind, reason });
}
