use freighter_protocol::ChunkEntry;

/// An inclusive byte range within a file. `left <= right` always holds for
/// ranges built through [`ByteRange::new`] or decoded from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteRange {
    pub left: u64,
    pub right: u64,
}

impl ByteRange {
    pub fn new(left: u64, right: u64) -> Self {
        debug_assert!(left <= right);
        Self { left, right }
    }

    /// Number of bytes covered (inclusive bounds, so never zero).
    pub fn len(&self) -> u64 {
        self.right - self.left + 1
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.left <= offset && offset <= self.right
    }
}

/// Merges ranges into a sorted list with no overlaps and no adjacency.
///
/// Adjacent ranges (`next.left == cur.right + 1`) coalesce, so every byte
/// is counted once and the contiguous prefix is a single entry. Idempotent.
pub fn merge(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    if ranges.is_empty() {
        return ranges;
    }
    ranges.sort();
    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(cur) if range.left <= cur.right.saturating_add(1) => {
                cur.right = cur.right.max(range.right);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// The gaps of `merged` within `[0, total_size)`.
///
/// Expects a merged map. An empty map yields the whole file; a zero-sized
/// file has no gaps.
pub fn complement(merged: &[ByteRange], total_size: u64) -> Vec<ByteRange> {
    if total_size == 0 {
        return Vec::new();
    }
    let mut gaps = Vec::new();
    let mut next = 0u64;
    for range in merged {
        if range.left >= total_size {
            break;
        }
        if range.left > next {
            gaps.push(ByteRange::new(next, range.left - 1));
        }
        next = next.max(range.right + 1);
    }
    if next < total_size {
        gaps.push(ByteRange::new(next, total_size - 1));
    }
    gaps
}

/// True when `merged` covers every byte of `[0, total_size)`.
pub fn is_fully_covered(merged: &[ByteRange], total_size: u64) -> bool {
    complement(merged, total_size).is_empty()
}

/// Total bytes covered by a merged map.
pub fn covered_bytes(merged: &[ByteRange]) -> u64 {
    merged.iter().map(ByteRange::len).sum()
}

/// Whole-number percentage of `total_size` covered. Zero for an empty file.
pub fn progress_percent(merged: &[ByteRange], total_size: u64) -> u32 {
    if total_size == 0 {
        return 0;
    }
    (covered_bytes(merged) * 100 / total_size) as u32
}

/// Converts wire entries into ranges. The caller merges afterwards; entry
/// indices carry no information.
pub fn entries_to_ranges(entries: &[ChunkEntry]) -> Vec<ByteRange> {
    entries
        .iter()
        .map(|e| ByteRange::new(e.range[0], e.range[1]))
        .collect()
}

/// Converts a merged map into wire entries, numbering them in order.
pub fn ranges_to_entries(merged: &[ByteRange]) -> Vec<ChunkEntry> {
    merged
        .iter()
        .enumerate()
        .map(|(i, r)| ChunkEntry { index: i as u32, range: [r.left, r.right] })
        .collect()
}
