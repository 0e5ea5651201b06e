use std::path::{Path, PathBuf};
use std::sync::Arc;

use freighter_checksum::Md5Snapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fsio::Filesystem;
use crate::range::{ByteRange, entries_to_ranges, merge, ranges_to_entries};
use crate::CHECKPOINT_PROGRESS_STEP;

/// Suffix of the sidecar holding the merged chunk map.
pub const CHUNK_SUFFIX: &str = "__chunks";

/// Suffix of the sidecar holding the periodic hash checkpoint.
pub const CHECK_SUFFIX: &str = "__check";

#[derive(Serialize, Deserialize)]
struct ChunkMapFile {
    chunk_map: Vec<freighter_protocol::ChunkEntry>,
}

#[derive(Serialize, Deserialize)]
struct CheckFile {
    md5checkpoint: Md5Checkpoint,
}

#[derive(Serialize, Deserialize)]
struct Md5Checkpoint {
    md5state: Md5StateRecord,
    checkprogress: u32,
}

#[derive(Serialize, Deserialize)]
struct Md5StateRecord {
    status0: u32,
    status1: u32,
    status2: u32,
    status3: u32,
    count: u64,
    cache: CacheRecord,
    isfinish: bool,
    md5string: String,
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    data: Vec<u8>,
    size: usize,
}

impl Md5StateRecord {
    fn from_snapshot(snapshot: &Md5Snapshot) -> Self {
        Self {
            status0: snapshot.words[0],
            status1: snapshot.words[1],
            status2: snapshot.words[2],
            status3: snapshot.words[3],
            count: snapshot.count,
            cache: CacheRecord { size: snapshot.cache.len(), data: snapshot.cache.clone() },
            isfinish: snapshot.finished,
            md5string: snapshot.digest.clone().unwrap_or_default(),
        }
    }

    fn into_snapshot(self) -> Md5Snapshot {
        let mut cache = self.cache.data;
        cache.truncate(self.cache.size);
        Md5Snapshot {
            words: [self.status0, self.status1, self.status2, self.status3],
            count: self.count,
            cache,
            finished: self.isfinish,
            digest: if self.md5string.is_empty() { None } else { Some(self.md5string) },
        }
    }
}

/// Persists resume state in two sidecar files next to the destination.
///
/// `<file>__chunks` is rewritten after every durable chunk; `<file>__check`
/// only when progress advanced enough since the last persisted checkpoint,
/// since restoring from a stale hash position just re-reads local bytes.
/// Sidecar failures are logged and swallowed: they cost resume granularity,
/// never the transfer.
pub struct CheckpointStore {
    fs: Arc<dyn Filesystem>,
    chunk_path: PathBuf,
    check_path: PathBuf,
    last_progress: u32,
}

impl CheckpointStore {
    pub fn new(fs: Arc<dyn Filesystem>, data_path: &Path) -> Self {
        Self {
            chunk_path: sidecar_path(data_path, CHUNK_SUFFIX),
            check_path: sidecar_path(data_path, CHECK_SUFFIX),
            fs,
            last_progress: 0,
        }
    }

    /// Loads both sidecars. Absent or malformed files are treated as absent,
    /// so a damaged checkpoint degrades to a fresh start, never an error.
    pub fn load(&mut self) -> (Vec<ByteRange>, Option<(Md5Snapshot, u32)>) {
        let chunk_map = match self.fs.read_file(&self.chunk_path) {
            Ok(bytes) => match serde_json::from_slice::<ChunkMapFile>(&bytes) {
                Ok(file) => merge(entries_to_ranges(&file.chunk_map)),
                Err(err) => {
                    warn!(path = %self.chunk_path.display(), %err, "discarding malformed chunk map");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        let checkpoint = match self.fs.read_file(&self.check_path) {
            Ok(bytes) => match serde_json::from_slice::<CheckFile>(&bytes) {
                Ok(file) => {
                    let progress = file.md5checkpoint.checkprogress;
                    self.last_progress = progress;
                    Some((file.md5checkpoint.md5state.into_snapshot(), progress))
                }
                Err(err) => {
                    warn!(path = %self.check_path.display(), %err, "discarding malformed hash checkpoint");
                    None
                }
            },
            Err(_) => None,
        };

        if !chunk_map.is_empty() {
            debug!(
                path = %self.chunk_path.display(),
                ranges = chunk_map.len(),
                restored_hash = checkpoint.is_some(),
                "resuming from checkpoint"
            );
        }
        (chunk_map, checkpoint)
    }

    /// Rewrites the chunk-map sidecar with the current merged map.
    pub fn write_chunk_map(&self, merged: &[ByteRange]) {
        let file = ChunkMapFile { chunk_map: ranges_to_entries(merged) };
        let bytes = match serde_json::to_vec(&file) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to serialize chunk map");
                return;
            }
        };
        match self.fs.write_file(&self.chunk_path, &bytes) {
            Ok(written) if written < bytes.len() => {
                warn!(path = %self.chunk_path.display(), "short chunk map write, removing sidecar");
                let _ = self.fs.remove_file(&self.chunk_path);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(path = %self.chunk_path.display(), %err, "failed to write chunk map");
            }
        }
    }

    /// Persists the hash checkpoint if progress advanced at least
    /// [`CHECKPOINT_PROGRESS_STEP`] points since the last persisted one.
    /// A short write deletes the file rather than leaving it partial.
    pub fn maybe_write_hash_checkpoint(&mut self, snapshot: &Md5Snapshot, progress: u32) {
        if progress.saturating_sub(self.last_progress) < CHECKPOINT_PROGRESS_STEP {
            return;
        }
        let file = CheckFile {
            md5checkpoint: Md5Checkpoint {
                md5state: Md5StateRecord::from_snapshot(snapshot),
                checkprogress: progress,
            },
        };
        let bytes = match serde_json::to_vec(&file) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to serialize hash checkpoint");
                return;
            }
        };
        match self.fs.write_file(&self.check_path, &bytes) {
            Ok(written) if written < bytes.len() => {
                warn!(path = %self.check_path.display(), "short checkpoint write, removing sidecar");
                let _ = self.fs.remove_file(&self.check_path);
            }
            Ok(_) => {
                debug!(progress, hashed = snapshot.count, "hash checkpoint persisted");
                self.last_progress = progress;
            }
            Err(err) => {
                warn!(path = %self.check_path.display(), %err, "failed to write hash checkpoint");
            }
        }
    }

    /// Deletes both sidecars. Called on finish and on error; an interrupt
    /// keeps them for the next attempt.
    pub fn remove(&self) {
        for path in [&self.chunk_path, &self.check_path] {
            if self.fs.exists(path) {
                if let Err(err) = self.fs.remove_file(path) {
                    warn!(path = %path.display(), %err, "failed to remove sidecar");
                }
            }
        }
    }
}

fn sidecar_path(data_path: &Path, suffix: &str) -> PathBuf {
    let mut name = data_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsio::StdFilesystem;
    use std::io;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(Arc::new(StdFilesystem), &dir.path().join("payload.bin"))
    }

    fn snapshot_at(count: u64) -> Md5Snapshot {
        Md5Snapshot { count, ..Md5Snapshot::default() }
    }

    #[test]
    fn load_without_sidecars_is_fresh() {
        let dir = TempDir::new().unwrap();
        let (map, checkpoint) = store(&dir).load();
        assert!(map.is_empty());
        assert!(checkpoint.is_none());
    }

    #[test]
    fn chunk_map_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.write_chunk_map(&[ByteRange::new(0, 99), ByteRange::new(200, 299)]);

        let (map, _) = s.load();
        assert_eq!(map, vec![ByteRange::new(0, 99), ByteRange::new(200, 299)]);
    }

    #[test]
    fn chunk_map_is_rewritten_not_appended() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.write_chunk_map(&[ByteRange::new(0, 99), ByteRange::new(200, 299)]);
        let long = std::fs::metadata(dir.path().join("payload.bin__chunks")).unwrap().len();
        s.write_chunk_map(&[ByteRange::new(0, 9)]);
        let short = std::fs::metadata(dir.path().join("payload.bin__chunks")).unwrap().len();
        assert!(short < long);
    }

    #[test]
    fn hash_checkpoint_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let snapshot = Md5Snapshot {
            words: [1, 2, 3, 4],
            count: 1234,
            cache: vec![9, 8, 7],
            finished: false,
            digest: None,
        };
        s.maybe_write_hash_checkpoint(&snapshot, 40);

        let mut fresh = store(&dir);
        let (_, loaded) = fresh.load();
        let (restored, progress) = loaded.unwrap();
        assert_eq!(restored, snapshot);
        assert_eq!(progress, 40);
        assert_eq!(fresh.last_progress, 40);
    }

    #[test]
    fn throttle_writes_only_on_enough_advance() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let check_path = dir.path().join("payload.bin__check");

        let mut written_at = Vec::new();
        for progress in [0, 5, 19, 20, 21, 40] {
            let before = std::fs::read(&check_path).ok();
            s.maybe_write_hash_checkpoint(&snapshot_at(progress as u64), progress);
            let after = std::fs::read(&check_path).ok();
            if before != after {
                written_at.push(progress);
            }
        }
        assert_eq!(written_at, vec![20, 40]);
    }

    #[test]
    fn malformed_sidecars_fail_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("payload.bin__chunks"), b"{broken").unwrap();
        std::fs::write(dir.path().join("payload.bin__check"), b"\x00\x01\x02").unwrap();

        let (map, checkpoint) = store(&dir).load();
        assert!(map.is_empty());
        assert!(checkpoint.is_none());
    }

    #[test]
    fn loaded_chunk_map_is_merged() {
        let dir = TempDir::new().unwrap();
        let raw = r#"{"chunk_map":[{"index":0,"range":[10,19]},{"index":1,"range":[0,9]}]}"#;
        std::fs::write(dir.path().join("payload.bin__chunks"), raw).unwrap();

        let (map, _) = store(&dir).load();
        assert_eq!(map, vec![ByteRange::new(0, 19)]);
    }

    #[test]
    fn remove_deletes_both_sidecars() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.write_chunk_map(&[ByteRange::new(0, 9)]);
        s.maybe_write_hash_checkpoint(&snapshot_at(10), 50);
        assert!(dir.path().join("payload.bin__chunks").exists());
        assert!(dir.path().join("payload.bin__check").exists());

        s.remove();
        assert!(!dir.path().join("payload.bin__chunks").exists());
        assert!(!dir.path().join("payload.bin__check").exists());
        // Idempotent.
        s.remove();
    }

    /// Caps every write, simulating a disk that runs out of space mid-write.
    struct ShortWriteFs {
        inner: StdFilesystem,
        cap: usize,
    }

    impl Filesystem for ShortWriteFs {
        fn open_read(&self, path: &Path) -> io::Result<Box<dyn crate::FileHandle>> {
            self.inner.open_read(path)
        }
        fn open_read_write(&self, path: &Path) -> io::Result<Box<dyn crate::FileHandle>> {
            self.inner.open_read_write(path)
        }
        fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.inner.read_file(path)
        }
        fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<usize> {
            let n = data.len().min(self.cap);
            self.inner.write_file(path, &data[..n])?;
            Ok(n)
        }
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            self.inner.remove_file(path)
        }
        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }
    }

    #[test]
    fn short_checkpoint_write_deletes_file() {
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(ShortWriteFs { inner: StdFilesystem, cap: 10 });
        let mut s = CheckpointStore::new(fs, &dir.path().join("payload.bin"));

        s.maybe_write_hash_checkpoint(&snapshot_at(100), 60);
        assert!(!dir.path().join("payload.bin__check").exists());
        // The throttle baseline did not advance, so the next attempt at the
        // same progress is skipped.
        assert_eq!(s.last_progress, 0);
    }
}
