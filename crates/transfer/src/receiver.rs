use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use freighter_checksum::{AsyncMd5, HashPool};
use freighter_protocol::{ChunkAck, ChunkData, Command, Inbound, Offer, OfferAck, Signal, decode};
use tracing::{debug, error, warn};

use crate::checkpoint::CheckpointStore;
use crate::fsio::{FileHandle, Filesystem};
use crate::range::{ByteRange, is_fully_covered, merge, progress_percent, ranges_to_entries};
use crate::task::{EventListener, EventSink, TaskEvent, TaskStatus, Transport};
use crate::{HASH_READ_STEP, RECEIVER_CHUNK_DIVISOR, TransferError};

/// The downloading side of one transfer.
///
/// Accepts an offer, writes chunks at their offsets, keeps the checkpoint
/// sidecars current, and verifies the assembled file against the expected
/// digest once every byte is covered. All message handling runs under one
/// lock, so a chunk can never race an interrupt.
pub struct ReceiverTask {
    task_id: String,
    inner: Mutex<ReceiverInner>,
}

struct ReceiverInner {
    task_id: String,
    dest: PathBuf,
    expected_md5: String,
    fs: Arc<dyn Filesystem>,
    transport: Arc<dyn Transport>,
    hasher: AsyncMd5,
    checkpoint: CheckpointStore,
    events: EventSink,
    status: TaskStatus,
    file: Option<Box<dyn FileHandle>>,
    file_size: u64,
    chunk_map: Vec<ByteRange>,
}

impl ReceiverTask {
    pub fn new(
        task_id: impl Into<String>,
        dest: impl Into<PathBuf>,
        expected_md5: impl Into<String>,
        fs: Arc<dyn Filesystem>,
        transport: Arc<dyn Transport>,
        pool: &HashPool,
        listener: Option<EventListener>,
    ) -> Self {
        let task_id = task_id.into();
        let dest = dest.into();
        Self {
            inner: Mutex::new(ReceiverInner {
                task_id: task_id.clone(),
                checkpoint: CheckpointStore::new(Arc::clone(&fs), &dest),
                dest,
                expected_md5: expected_md5.into(),
                fs,
                transport,
                hasher: pool.hasher(),
                events: EventSink::new(listener),
                status: TaskStatus::Active,
                file: None,
                file_size: 0,
                chunk_map: Vec::new(),
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

    /// Processes one inbound frame. Frames scoped to another task are
    /// ignored; frames arriving after a terminal state only re-announce
    /// that state.
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
                // Re-announce unless the peer is confirming the same thing.
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
            Inbound::Offer(offer) => inner.on_offer(offer),
            Inbound::ChunkData(chunk) => inner.on_chunk(chunk),
            Inbound::FinishNotify(_) => inner.on_finish_notify(),
            Inbound::Interrupt(_) => {
                inner.enter_interrupted(false);
                Ok(())
            }
            Inbound::PeerError(_) => {
                inner.fail(&TransferError::PeerError, false);
                Ok(())
            }
            // Receiver-bound connections can still carry the other
            // direction's acks; not ours to handle.
            Inbound::OfferAck(_) | Inbound::ChunkAck(_) => Ok(()),
        };
        if let Err(err) = result {
            inner.fail(&err, true);
        }
    }

    /// Interrupts the transfer locally: notifies the peer, releases the
    /// destination handle and keeps the sidecars for the next attempt.
    pub fn interrupt(&self) {
        self.inner.lock().unwrap().enter_interrupted(true);
    }
}

impl ReceiverInner {
    fn on_offer(&mut self, offer: Offer) -> Result<(), TransferError> {
        let file = match self.fs.open_read_write(&self.dest) {
            Ok(file) => file,
            Err(err) => {
                error!(
                    task = %self.task_id,
                    path = %self.dest.display(),
                    %err,
                    "cannot open destination"
                );
                let ack = OfferAck {
                    taskid: self.task_id.clone(),
                    result: 0,
                    filesize: offer.filesize,
                    suggest_chunk_size: 0,
                    chunk_map: Vec::new(),
                };
                if let Ok(bytes) = ack.encode() {
                    let _ = self.transport.send(&self.task_id, &bytes);
                }
                return Err(err.into());
            }
        };
        self.file = Some(file);
        self.file_size = offer.filesize;

        let (chunk_map, checkpoint) = self.checkpoint.load();
        self.chunk_map = chunk_map;
        if let Some((snapshot, progress)) = checkpoint {
            debug!(task = %self.task_id, hashed = snapshot.count, progress, "restoring hash state");
            self.hasher.restore(&snapshot);
        }

        let ack = OfferAck {
            taskid: self.task_id.clone(),
            result: 1,
            filesize: offer.filesize,
            suggest_chunk_size: (offer.filesize / RECEIVER_CHUNK_DIVISOR).max(1),
            chunk_map: ranges_to_entries(&self.chunk_map),
        };
        self.send(&ack.encode()?)?;
        debug!(
            task = %self.task_id,
            filesize = offer.filesize,
            resumed_ranges = self.chunk_map.len(),
            "offer accepted"
        );
        self.events.emit(TaskEvent::Offered);
        Ok(())
    }

    fn on_chunk(&mut self, chunk: ChunkData) -> Result<(), TransferError> {
        let file = self.file.as_ref().ok_or(TransferError::NotNegotiated)?;

        // Decode guarantees bytes.len() >= chunk_size >= 1.
        let data = &chunk.bytes[..chunk.chunk_size as usize];
        let written = file.write_at(chunk.range[0], data)? as u64;
        if written < chunk.chunk_size {
            return Err(TransferError::ShortWrite { expected: chunk.chunk_size, written });
        }

        let mut ranges = std::mem::take(&mut self.chunk_map);
        ranges.push(ByteRange::new(chunk.range[0], chunk.range[0] + written - 1));
        self.chunk_map = merge(ranges);

        self.advance_hash()?;
        self.checkpoint.write_chunk_map(&self.chunk_map);
        let progress = progress_percent(&self.chunk_map, self.file_size);
        self.checkpoint.maybe_write_hash_checkpoint(&self.hasher.snapshot(), progress);

        if is_fully_covered(&self.chunk_map, self.file_size) {
            self.verify()
        } else {
            let ack = ChunkAck {
                taskid: self.task_id.clone(),
                result: 1,
                chunk_size: chunk.chunk_size,
                range: chunk.range,
                chunk_map: ranges_to_entries(&self.chunk_map),
            };
            self.send(&ack.encode()?)?;
            self.events.emit(TaskEvent::Progress(progress));
            Ok(())
        }
    }

    /// Feeds the hasher every byte of the contiguous prefix that is covered
    /// but not yet pushed, in bounded reads so a large resume does not stall
    /// the message handler on one huge allocation.
    fn advance_hash(&mut self) -> Result<(), TransferError> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        loop {
            let pos = self.hasher.count();
            let Some(range) = self.chunk_map.iter().find(|r| r.contains(pos)) else {
                break;
            };
            let step = HASH_READ_STEP.min(range.right + 1 - pos) as usize;
            let mut buf = vec![0u8; step];
            let n = file.read_at(pos, &mut buf)?;
            if n == 0 {
                break;
            }
            buf.truncate(n);
            self.hasher.push(buf);
        }
        Ok(())
    }

    /// Coverage is complete: drain the hasher over any remaining tail,
    /// compare digests, confirm to the peer and drop the resume state.
    fn verify(&mut self) -> Result<(), TransferError> {
        let file = self.file.as_ref().ok_or(TransferError::NotNegotiated)?;
        file.set_len(self.file_size)?;

        self.hasher.wait_drained();
        let mut pos = self.hasher.count();
        while pos < self.file_size {
            let step = HASH_READ_STEP.min(self.file_size - pos) as usize;
            let mut buf = vec![0u8; step];
            let n = file.read_at(pos, &mut buf)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "destination shorter than declared size",
                )
                .into());
            }
            buf.truncate(n);
            self.hasher.push_sync(buf);
            pos = self.hasher.count();
        }

        let actual = self.hasher.finalize();
        if actual != self.expected_md5 {
            return Err(TransferError::Integrity {
                expected: self.expected_md5.clone(),
                actual,
            });
        }

        let bytes = Signal::finish(self.task_id.as_str()).encode(Command::FinishNotify)?;
        self.send(&bytes)?;
        self.checkpoint.remove();
        self.file = None;
        self.status = TaskStatus::Finished;
        debug!(task = %self.task_id, digest = %actual, "transfer verified");
        self.events.emit(TaskEvent::Finished);
        Ok(())
    }

    fn on_finish_notify(&mut self) -> Result<(), TransferError> {
        if self.file.is_some() && is_fully_covered(&self.chunk_map, self.file_size) {
            self.verify()
        } else {
            Err(TransferError::PrematureFinish)
        }
    }

    fn enter_interrupted(&mut self, notify_peer: bool) {
        if self.status != TaskStatus::Active {
            return;
        }
        if notify_peer {
            if let Ok(bytes) = Signal::interrupt(self.task_id.as_str()).encode(Command::Interrupt) {
                if !self.transport.send(&self.task_id, &bytes) {
                    warn!(task = %self.task_id, "could not notify peer of interrupt");
                }
            }
        }
        self.file = None;
        self.status = TaskStatus::Interrupted;
        debug!(task = %self.task_id, "transfer interrupted, checkpoint retained");
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
        self.checkpoint.remove();
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
