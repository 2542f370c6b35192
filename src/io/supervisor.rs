// src/io/supervisor.rs
//
// Tracks at most one live session per transport kind. Serial and Bluetooth
// may be open at the same time; both feed the same pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{
    EventSender, SessionEvent, Transport, TransportConfig, TransportKind, TransportSession,
};
use crate::capture::{CaptureHandle, LogSink};
use crate::dispatch::FilterState;
use crate::error::LinkError;
use crate::pipeline::Pipeline;

pub struct ConnectionSupervisor {
    pipeline: Arc<Pipeline>,
    capture: CaptureHandle,
    events: EventSender,
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
    sessions: HashMap<TransportKind, TransportSession>,
}

impl ConnectionSupervisor {
    /// Create a supervisor around `pipeline`. Diagnostics arrive on the
    /// returned receiver.
    pub fn new(pipeline: Arc<Pipeline>) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            ConnectionSupervisor {
                pipeline,
                capture: CaptureHandle::default(),
                events,
                transports: HashMap::new(),
                sessions: HashMap::new(),
            },
            rx,
        )
    }

    /// Make `transport` available for its kind, replacing any earlier one.
    /// Sessions already open keep the transport they were opened with.
    pub fn register_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transports.insert(transport.kind(), transport);
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn filters(&self) -> &Arc<FilterState> {
        self.pipeline.filters()
    }

    pub fn is_any_open(&self, kind: TransportKind) -> bool {
        self.sessions.get(&kind).is_some_and(TransportSession::is_open)
    }

    /// Kinds with a live session
    pub fn open_kinds(&self) -> Vec<TransportKind> {
        let mut kinds: Vec<_> = self
            .sessions
            .values()
            .filter(|s| s.is_open())
            .map(TransportSession::kind)
            .collect();
        kinds.sort_by_key(|k| *k as u8);
        kinds
    }

    /// Open a session of `kind`. Rejected if one is already open.
    pub async fn open(
        &mut self,
        kind: TransportKind,
        config: &TransportConfig,
    ) -> Result<(), LinkError> {
        if self.is_any_open(kind) {
            return Err(LinkError::AlreadyOpen(kind));
        }
        if config.kind() != kind {
            return Err(LinkError::Settings(format!(
                "cannot open {} with {} configuration",
                kind,
                config.kind()
            )));
        }
        let transport = self.transports.get(&kind).cloned().ok_or_else(|| {
            LinkError::acquisition(kind, "no transport registered for this kind")
        })?;

        // A session whose loop already ended is reused; connect reaps it.
        // One opened against a since-replaced transport is torn down first.
        if let Some(existing) = self.sessions.get_mut(&kind) {
            if !Arc::ptr_eq(&existing.transport(), &transport) {
                existing.disconnect().await;
                self.sessions.remove(&kind);
            }
        }

        let session = self.sessions.entry(kind).or_insert_with(|| {
            TransportSession::new(
                transport,
                self.pipeline.clone(),
                self.capture.clone(),
                self.events.clone(),
            )
        });
        session.connect(config).await
    }

    /// Close the session of `kind`. No-op if none exists.
    pub async fn close(&mut self, kind: TransportKind) {
        if let Some(mut session) = self.sessions.remove(&kind) {
            session.disconnect().await;
            info!(%kind, "session closed");
        }
    }

    /// Write `text` to every open session. Returns how many were written.
    /// A failing session does not stop the others; the first error is
    /// returned after all have been tried.
    pub async fn send(&mut self, text: &str) -> Result<usize, LinkError> {
        let mut written = 0;
        let mut first_err = None;
        for session in self.sessions.values_mut().filter(|s| s.is_open()) {
            match session.write(text).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(kind = %session.kind(), "send failed: {}", e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Start mirroring raw received bytes into `sink`, replacing any
    /// capture already running.
    pub fn start_log(&self, sink: Box<dyn LogSink>) -> Result<(), LinkError> {
        self.capture.start(sink)
    }

    pub fn stop_log(&self) -> Result<(), LinkError> {
        self.capture.stop()
    }

    pub fn is_logging(&self) -> bool {
        self.capture.is_active()
    }

    /// Close every session, then the capture log.
    pub async fn shutdown(&mut self) -> Result<(), LinkError> {
        let kinds: Vec<_> = self.sessions.keys().copied().collect();
        for kind in kinds {
            self.close(kind).await;
        }
        self.capture.stop()
    }
}
