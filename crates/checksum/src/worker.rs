use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::md5::{Md5, Md5Snapshot};

type Job = Box<dyn FnOnce() + Send>;

/// A small shared pool of hashing worker threads.
///
/// Construct one at process start and hand it to every task that needs
/// background hashing; there is no ambient global. Two workers are plenty:
/// hashing is memory-bound and each hasher only ever has one job in flight.
pub struct HashPool {
    jobs: crossbeam_channel::Sender<Job>,
}

impl HashPool {
    /// Default worker count shared across all transfers.
    pub const DEFAULT_WORKERS: usize = 2;

    /// Spawns `workers` threads (at least one). Threads exit when the pool
    /// and every hasher created from it have been dropped.
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            std::thread::Builder::new()
                .name(format!("hash-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .expect("spawn hash worker");
        }
        Self { jobs: tx }
    }

    /// Creates a new hasher backed by this pool.
    pub fn hasher(&self) -> AsyncMd5 {
        AsyncMd5 {
            shared: Arc::new(HasherShared {
                jobs: self.jobs.clone(),
                state: Mutex::new(HasherState {
                    md5: Md5::new(),
                    queue: VecDeque::new(),
                    running: false,
                    pushed: 0,
                }),
                drained: Condvar::new(),
            }),
        }
    }
}

impl Default for HashPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WORKERS)
    }
}

struct HasherState {
    md5: Md5,
    queue: VecDeque<Vec<u8>>,
    running: bool,
    /// Total bytes pushed, including blocks still queued.
    pushed: u64,
}

struct HasherShared {
    jobs: crossbeam_channel::Sender<Job>,
    state: Mutex<HasherState>,
    drained: Condvar,
}

impl HasherShared {
    /// Submits one dequeue-and-update step to the pool. Each step consumes
    /// exactly one queued block and reschedules itself while work remains,
    /// so updates for this hasher are FIFO with at most one in flight.
    fn schedule(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let job: Job = Box::new(move || {
            let mut state = shared.state.lock().unwrap();
            if let Some(block) = state.queue.pop_front() {
                state.md5.update(&block);
            }
            if state.queue.is_empty() {
                state.running = false;
                shared.drained.notify_all();
            } else {
                drop(state);
                shared.schedule();
            }
        });
        // If the pool is gone (shutdown), run the step inline so pushed
        // bytes are never silently dropped.
        if let Err(rejected) = self.jobs.send(job) {
            (rejected.0)();
        }
    }
}

/// Handle to an [`Md5`] fed through the worker pool.
///
/// [`push`](AsyncMd5::push) enqueues bytes and returns immediately;
/// [`wait_drained`](AsyncMd5::wait_drained) must be called before
/// [`snapshot`](AsyncMd5::snapshot) or [`finalize`](AsyncMd5::finalize)
/// whenever every pushed byte must be reflected.
pub struct AsyncMd5 {
    shared: Arc<HasherShared>,
}

impl AsyncMd5 {
    /// Enqueues `bytes` for background hashing.
    pub fn push(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        state.pushed += bytes.len() as u64;
        state.queue.push_back(bytes);
        if !state.running {
            state.running = true;
            drop(state);
            self.shared.schedule();
        }
    }

    /// Enqueues `bytes` and blocks until the queue is fully drained.
    pub fn push_sync(&self, bytes: Vec<u8>) {
        self.push(bytes);
        self.wait_drained();
    }

    /// Blocks until no update is queued or in flight. Afterwards
    /// [`count`](Self::count) equals the processed byte count.
    pub fn wait_drained(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.running || !state.queue.is_empty() {
            state = self.shared.drained.wait(state).unwrap();
        }
    }

    /// Total bytes pushed so far, including blocks not yet processed.
    pub fn count(&self) -> u64 {
        self.shared.state.lock().unwrap().pushed
    }

    /// Snapshot of the underlying hasher.
    ///
    /// Taken without draining it reflects only processed bytes, which is
    /// exactly what a lagging checkpoint wants; call
    /// [`wait_drained`](Self::wait_drained) first for an up-to-date view.
    pub fn snapshot(&self) -> Md5Snapshot {
        self.shared.state.lock().unwrap().md5.snapshot()
    }

    /// Restores the hasher (and the pushed-byte counter) from a snapshot.
    /// Queued blocks are discarded; an update already in flight finishes
    /// against the old state before the restore applies.
    pub fn restore(&self, snapshot: &Md5Snapshot) {
        let mut state = self.shared.state.lock().unwrap();
        state.queue.clear();
        while state.running {
            state = self.shared.drained.wait(state).unwrap();
        }
        state.md5.restore(snapshot);
        state.pushed = snapshot.count;
    }

    /// Finalizes the digest. Call [`wait_drained`](Self::wait_drained)
    /// first; queued blocks are not flushed here.
    pub fn finalize(&self) -> String {
        self.shared.state.lock().unwrap().md5.finalize()
    }
}
