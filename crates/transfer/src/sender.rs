use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use freighter_protocol::{ChunkData, Command, Inbound, Offer, Signal, decode};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::fsio::{FileHandle, Filesystem};
use crate::range::{ByteRange, complement, entries_to_ranges, merge, progress_percent};
use crate::task::{EventListener, EventSink, TaskEvent, TaskStatus, Transport};
use crate::{SENDER_CHUNK_DIVISOR, TransferError};

/// The uploading side of one transfer.
///
/// Offers a file, then sends whatever the receiver's chunk map says is still
/// missing, one chunk per acknowledgement. The receiver's suggested chunk
/// size governs; the sender's own estimate only holds until the offer is
/// answered.
pub struct SenderTask {
    task_id: String,
    inner: Mutex<SenderInner>,
}

struct SenderInner {
    task_id: String,
    source: PathBuf,
    fs: Arc<dyn Filesystem>,
    transport: Arc<dyn Transport>,
    events: EventSink,
    status: TaskStatus,
    file: Option<Box<dyn FileHandle>>,
    file_size: u64,
    suggest_chunk_size: u64,
}

impl SenderTask {
    /// Creates a sender with a fresh task id.
    pub fn new(
        source: impl Into<PathBuf>,
        fs: Arc<dyn Filesystem>,
        transport: Arc<dyn Transport>,
        listener: Option<EventListener>,
    ) -> Self {
        Self::with_task_id(Uuid::new_v4().to_string(), source, fs, transport, listener)
    }

    /// Creates a sender under a caller-chosen task id, for resuming a
    /// transfer whose receiver keeps state under that id.
    pub fn with_task_id(
        task_id: impl Into<String>,
        source: impl Into<PathBuf>,
        fs: Arc<dyn Filesystem>,
        transport: Arc<dyn Transport>,
        listener: Option<EventListener>,
    ) -> Self {
        let task_id = task_id.into();
        Self {
            inner: Mutex::new(SenderInner {
                task_id: task_id.clone(),
                source: source.into(),
                fs,
                transport,
                events: EventSink::new(listener),
                status: TaskStatus::Active,
                file: None,
                file_size: 0,
                suggest_chunk_size: 0,
            }),
            task_id,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().unwrap().status
    }

    /// Opens the source and offers it to the peer.
    pub fn start(&self) -> Result<(), TransferError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.begin() {
            Ok(()) => Ok(()),
            Err(err) => {
                inner.fail(&err, true);
                Err(err)
            }
        }
    }

    /// Processes one inbound frame; same scoping and terminal-state rules
    /// as the receiver.
    pub fn handle_message(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();

        let inbound = match decode(bytes) {
            Ok(inbound) => inbound,
            Err(err) => {
                if inner.status == TaskStatus::Active {
                    inner.fail(&err.into(), true);
                }
                return;
            }
        };
        if inbound.taskid() != self.task_id {
            return;
        }

        match inner.status {
            TaskStatus::Finished => {
                if !matches!(inbound, Inbound::FinishNotify(_)) {
                    inner.send_signal(Command::FinishNotify);
                }
                return;
            }
            TaskStatus::Errored => {
                if !matches!(inbound, Inbound::PeerError(_) | Inbound::Interrupt(_)) {
                    inner.send_signal(Command::PeerError);
                }
                return;
            }
            TaskStatus::Interrupted => return,
            TaskStatus::Active => {}
        }

        let result = match inbound {
            Inbound::OfferAck(ack) => {
                if ack.result != 1 {
                    warn!(task = %self.task_id, "offer rejected by receiver");
                    inner.fail(&TransferError::PeerError, false);
                    Ok(())
                } else {
                    inner.suggest_chunk_size = ack.suggest_chunk_size;
                    inner.events.emit(TaskEvent::Offered);
                    inner.send_next(merge(entries_to_ranges(&ack.chunk_map)))
                }
            }
            Inbound::ChunkAck(ack) => {
                if ack.result != 1 {
                    inner.fail(&TransferError::PeerError, false);
                    Ok(())
                } else {
                    let acked = merge(entries_to_ranges(&ack.chunk_map));
                    let progress = progress_percent(&acked, inner.file_size);
                    inner.events.emit(TaskEvent::Progress(progress));
                    inner.send_next(acked)
                }
            }
            Inbound::FinishNotify(_) => {
                inner.finish();
                Ok(())
            }
            Inbound::Interrupt(_) => {
                inner.enter_interrupted(false);
                Ok(())
            }
            Inbound::PeerError(_) => {
                inner.fail(&TransferError::PeerError, false);
                Ok(())
            }
            // Sender never consumes the offer/chunk direction.
            Inbound::Offer(_) | Inbound::ChunkData(_) => Ok(()),
        };
        if let Err(err) = result {
            inner.fail(&err, true);
        }
    }

    /// Interrupts the transfer locally and notifies the peer.
    pub fn interrupt(&self) {
        self.inner.lock().unwrap().enter_interrupted(true);
    }
}

impl SenderInner {
    fn begin(&mut self) -> Result<(), TransferError> {
        let file = self.fs.open_read(&self.source)?;
        let size = file.len()?;
        self.file = Some(file);
        self.file_size = size;
        self.suggest_chunk_size = (size / SENDER_CHUNK_DIVISOR).max(1);

        let filename = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let offer = Offer { taskid: self.task_id.clone(), filename, filesize: size };
        debug!(task = %self.task_id, filesize = size, "offering file");
        self.send(&offer.encode()?)
    }

    /// Sends the first still-missing range, capped at the negotiated chunk
    /// size. With nothing missing, asks the receiver to confirm completion.
    fn send_next(&mut self, acked: Vec<ByteRange>) -> Result<(), TransferError> {
        let file = self.file.as_ref().ok_or(TransferError::NotNegotiated)?;
        let gaps = complement(&acked, self.file_size);
        let Some(gap) = gaps.first() else {
            debug!(task = %self.task_id, "all bytes acknowledged, asking for confirmation");
            let bytes = Signal::finish(self.task_id.as_str()).encode(Command::FinishNotify)?;
            return self.send(&bytes);
        };

        let size = self.suggest_chunk_size.min(gap.len()) as usize;
        let mut buf = vec![0u8; size];
        let n = file.read_at(gap.left, &mut buf)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "source shorter than offered size",
            )
            .into());
        }
        buf.truncate(n);

        let chunk = ChunkData {
            taskid: self.task_id.clone(),
            chunk_size: n as u64,
            range: [gap.left, gap.left + n as u64 - 1],
            bytes: buf,
        };
        self.send(&chunk.encode()?)
    }

    fn finish(&mut self) {
        if self.status != TaskStatus::Active {
            return;
        }
        self.file = None;
        self.status = TaskStatus::Finished;
        debug!(task = %self.task_id, "transfer confirmed by receiver");
        self.events.emit(TaskEvent::Finished);
    }

    fn enter_interrupted(&mut self, notify_peer: bool) {
        if self.status != TaskStatus::Active {
            return;
        }
        if notify_peer {
            self.send_signal(Command::Interrupt);
        }
        self.file = None;
        self.status = TaskStatus::Interrupted;
        debug!(task = %self.task_id, "transfer interrupted");
        self.events.emit(TaskEvent::Interrupted);
    }

    fn fail(&mut self, err: &TransferError, notify_peer: bool) {
        if self.status != TaskStatus::Active {
            return;
        }
        error!(task = %self.task_id, %err, "transfer failed");
        if notify_peer {
            self.send_signal(Command::PeerError);
        }
        self.file = None;
        self.status = TaskStatus::Errored;
        self.events.emit(TaskEvent::Errored);
    }

    fn send_signal(&self, command: Command) {
        let signal = match command {
            Command::FinishNotify => Signal::finish(self.task_id.as_str()),
            Command::Interrupt => Signal::interrupt(self.task_id.as_str()),
            _ => Signal::peer_error(self.task_id.as_str()),
        };
        if let Ok(bytes) = signal.encode(command) {
            let _ = self.transport.send(&self.task_id, &bytes);
        }
    }

    fn send(&self, bytes: &[u8]) -> Result<(), TransferError> {
        if self.transport.send(&self.task_id, bytes) {
            Ok(())
        } else {
            Err(TransferError::SendFailed)
        }
    }
}
