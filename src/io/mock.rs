// src/io/mock.rs
//
// In-memory transport for tests. The paired `MockRemote` plays the device:
// it pushes chunks, ends the stream, injects read errors and records what
// the session wrote.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChunkReader, ChunkWriter, Transport, TransportConfig, TransportKind, TransportStream};
use crate::error::LinkError;

type ChunkResult = Result<Vec<u8>, String>;

#[derive(Default)]
struct Shared {
    fail_next_open: Option<String>,
    chunk_tx: Option<mpsc::UnboundedSender<ChunkResult>>,
    written: Vec<u8>,
    opens: usize,
    close_order: Vec<&'static str>,
    reader_closed: bool,
    fail_writes: Option<String>,
    fail_writes_after_end: bool,
}

pub(crate) struct MockTransport {
    kind: TransportKind,
    shared: Arc<Mutex<Shared>>,
}

#[derive(Clone)]
pub(crate) struct MockRemote {
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    pub(crate) fn new(kind: TransportKind) -> (MockTransport, MockRemote) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            MockTransport {
                kind,
                shared: shared.clone(),
            },
            MockRemote { shared },
        )
    }
}

impl MockRemote {
    pub(crate) fn push(&self, bytes: &[u8]) {
        let shared = self.shared.lock().unwrap();
        let tx = shared.chunk_tx.as_ref().expect("transport not open");
        tx.send(Ok(bytes.to_vec())).unwrap();
    }

    pub(crate) fn fail_read(&self, message: &str) {
        let shared = self.shared.lock().unwrap();
        let tx = shared.chunk_tx.as_ref().expect("transport not open");
        tx.send(Err(message.to_string())).unwrap();
    }

    /// Close the device side, ending the stream
    pub(crate) fn end(&self) {
        self.shared.lock().unwrap().chunk_tx = None;
    }

    pub(crate) fn fail_next_open(&self, message: &str) {
        self.shared.lock().unwrap().fail_next_open = Some(message.to_string());
    }

    /// Make every write fail while the stream stays up
    pub(crate) fn fail_writes(&self, message: &str) {
        self.shared.lock().unwrap().fail_writes = Some(message.to_string());
    }

    /// Make the next write end the stream, wait for the read loop to shut
    /// down, then fail, as a port unplugged mid-write would
    pub(crate) fn fail_writes_after_end(&self) {
        self.shared.lock().unwrap().fail_writes_after_end = true;
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.shared.lock().unwrap().written.clone()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.shared.lock().unwrap().opens
    }

    pub(crate) fn close_order(&self) -> Vec<&'static str> {
        self.shared.lock().unwrap().close_order.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&self, _config: &TransportConfig) -> Result<TransportStream, LinkError> {
        let mut shared = self.shared.lock().unwrap();
        shared.opens += 1;
        if let Some(message) = shared.fail_next_open.take() {
            return Err(LinkError::acquisition(self.kind, message));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        shared.chunk_tx = Some(tx);
        shared.close_order.clear();
        shared.reader_closed = false;
        Ok(TransportStream {
            reader: Box::new(MockReader {
                kind: self.kind,
                rx,
                shared: self.shared.clone(),
            }),
            writer: Box::new(MockWriter {
                kind: self.kind,
                shared: self.shared.clone(),
            }),
        })
    }
}

struct MockReader {
    kind: TransportKind,
    rx: mpsc::UnboundedReceiver<ChunkResult>,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl ChunkReader for MockReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        match self.rx.recv().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(message)) => Err(LinkError::read(self.kind, message)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
        let mut shared = self.shared.lock().unwrap();
        shared.close_order.push("reader");
        shared.reader_closed = true;
    }
}

struct MockWriter {
    kind: TransportKind,
    shared: Arc<Mutex<Shared>>,
}

impl MockWriter {
    fn reader_closed(&self) -> bool {
        self.shared.lock().unwrap().reader_closed
    }
}

#[async_trait]
impl ChunkWriter for MockWriter {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let end_first = {
            let mut shared = self.shared.lock().unwrap();
            if let Some(message) = shared.fail_writes.clone() {
                return Err(LinkError::write(self.kind, message));
            }
            if shared.fail_writes_after_end {
                shared.chunk_tx = None;
            }
            shared.fail_writes_after_end
        };
        if end_first {
            while !self.reader_closed() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            return Err(LinkError::write(self.kind, "port gone"));
        }
        self.shared.lock().unwrap().written.extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) {
        self.shared.lock().unwrap().close_order.push("writer");
    }
}
