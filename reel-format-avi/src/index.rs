// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-stream index state.
//!
//! A [`StreamIndex`] accumulates key-frame positions from up to three sources: the legacy flat
//! `idx1` table, an OpenDML `indx` super-index, and the per-segment `ix##` standard index chunks
//! the super-index points at. Segment indexes load lazily while the payload is scanned, so a
//! seek may target a region whose index is not known yet; such seeks resolve to the position of
//! the responsible index chunk and are tracked as *pending* until that chunk is loaded.

use log::warn;

use reel_core::demux::{SeekPoint, SeekPoints, TimeUs};

use crate::chunks::{StandardIndexChunk, SuperIndexEntry};

/// How timestamps are derived for a stream, decided by what the indexes cover.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Classification {
    /// Every chunk of the stream is indexed; timestamps are ordinal-proportional.
    AllFrames,
    /// A super-index is present; timestamps interpolate key-frame byte positions inside a
    /// segment's tick span.
    Segments,
    /// Only a sparse key-frame table exists; timestamps are byte-proportional.
    SparseBytes,
}

/// A seek answer: either concrete seek points, or the position of the `ix##` chunk that must be
/// loaded before the seek can be resolved.
#[derive(Copy, Clone, Debug)]
pub enum SeekAnswer {
    Ready(SeekPoints),
    Pending { segment: usize, position: u64 },
}

#[derive(Copy, Clone, Debug)]
struct PendingSeek {
    segment: usize,
    position: u64,
}

/// Binary search over `0..count` for the first index where `pred` turns false. `pred` must be
/// monotone (true then false).
fn partition_indices(count: usize, pred: impl Fn(usize) -> bool) -> usize {
    let mut lo = 0;
    let mut hi = count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if pred(mid) {
            lo = mid + 1;
        }
        else {
            hi = mid;
        }
    }
    lo
}

/// One standard-index segment. Unloaded until its `ix##` chunk is parsed.
#[derive(Default)]
struct Segment {
    loaded: bool,
    /// Global ordinal of the segment's first chunk; known once every earlier segment is loaded.
    base_ordinal: Option<u32>,
    /// Count of all chunks in the segment, key or not.
    total_entries: u32,
    key_offsets: Vec<u64>,
    /// Ordinal of each key frame within the segment, counting all entries.
    key_local_ordinals: Vec<u32>,
    /// Exclusive prefix sum of key-frame sizes within the segment.
    key_bytes_before: Vec<u64>,
    key_bytes_total: u64,
}

/// The index state of a single stream.
pub struct StreamIndex {
    /// Chunk count advertised by the stream header.
    header_chunk_count: u32,
    duration_us: TimeUs,

    // Legacy idx1 key-frame table, struct-of-arrays.
    key_offsets: Vec<u64>,
    key_ordinals: Vec<u32>,
    /// Exclusive prefix sum of key-frame sizes.
    key_bytes_before: Vec<u64>,
    key_bytes_total: u64,
    /// Count of all idx1 entries of the stream, key or not.
    chunk_count: u32,

    // OpenDML two-tier index.
    super_entries: Vec<SuperIndexEntry>,
    /// Inclusive prefix sums of the super-index tick spans.
    cum_ticks: Vec<u64>,
    segments: Vec<Segment>,

    pending: Option<PendingSeek>,
}

impl StreamIndex {
    pub fn new(header_chunk_count: u32, duration_us: TimeUs) -> Self {
        StreamIndex {
            header_chunk_count,
            duration_us,
            key_offsets: Vec::new(),
            key_ordinals: Vec::new(),
            key_bytes_before: Vec::new(),
            key_bytes_total: 0,
            chunk_count: 0,
            super_entries: Vec::new(),
            cum_ticks: Vec::new(),
            segments: Vec::new(),
            pending: None,
        }
    }

    /// Record one key-frame entry from `idx1`. Must be called before
    /// [`StreamIndex::increment_chunk_count`] for the same entry so the ordinal is correct.
    pub fn append_idx1_key_frame(&mut self, offset: u64, size: u32) {
        if let Some(&last) = self.key_offsets.last() {
            if offset <= last {
                warn!("avi: dropping out-of-order idx1 key frame at {:#x}", offset);
                return;
            }
        }

        self.key_offsets.push(offset);
        self.key_ordinals.push(self.chunk_count);
        self.key_bytes_before.push(self.key_bytes_total);
        self.key_bytes_total += u64::from(size);
    }

    /// Record one `idx1` entry of the stream, key frame or not.
    pub fn increment_chunk_count(&mut self) {
        self.chunk_count += 1;
    }

    /// Shrink the idx1 tables to their final length. Called once at the end of `idx1` parsing.
    pub fn compact(&mut self) {
        self.key_offsets.shrink_to_fit();
        self.key_ordinals.shrink_to_fit();
        self.key_bytes_before.shrink_to_fit();
    }

    /// True when any index source can produce seek points.
    pub fn has_entries(&self) -> bool {
        !self.key_offsets.is_empty() || !self.super_entries.is_empty()
    }

    /// Install the super-index rows from an `indx` chunk. One unloaded segment is allocated per
    /// row. A second installation is ignored.
    pub fn install_super_index(&mut self, entries: Vec<SuperIndexEntry>) {
        if !self.super_entries.is_empty() {
            return;
        }

        let mut total = 0u64;
        for entry in &entries {
            total += u64::from(entry.duration);
            self.cum_ticks.push(total);
        }

        // Seed base ordinals from the tick prefix sums. For video streams one tick is one
        // frame, so these are exact; they are refined with true entry counts as segments load
        // contiguously.
        self.segments = entries
            .iter()
            .enumerate()
            .map(|(i, _)| Segment {
                base_ordinal: Some(if i == 0 { 0 } else { self.cum_ticks[i - 1] as u32 }),
                ..Default::default()
            })
            .collect();

        self.super_entries = entries;
    }

    /// Install a standard index chunk into its segment. `position` is the file offset of the
    /// chunk header when the chunk was found inside `movi`, or `None` for the single-segment
    /// case where the `indx` chunk of `hdrl` was itself a standard index. Loading the same
    /// segment twice is a no-op.
    pub fn install_standard_index(&mut self, chunk: &StandardIndexChunk, position: Option<u64>) {
        let segment = if self.super_entries.is_empty() {
            // No super-index: synthesize a single segment spanning the whole stream.
            self.super_entries.push(SuperIndexEntry {
                offset: position.unwrap_or(0),
                size: 0,
                duration: self.header_chunk_count,
            });
            self.cum_ticks.push(u64::from(self.header_chunk_count));
            self.segments.push(Segment { base_ordinal: Some(0), ..Default::default() });
            0
        }
        else {
            match position {
                None => 0,
                Some(pos) => {
                    match self.super_entries.iter().position(|e| e.offset == pos) {
                        Some(i) => i,
                        None => {
                            warn!("avi: ignoring index chunk at {:#x} not in super index", pos);
                            return;
                        }
                    }
                }
            }
        };

        if self.segments[segment].loaded {
            // Loading is idempotent.
            return;
        }

        {
            let state = &mut self.segments[segment];

            for i in 0..chunk.entry_count() {
                if !chunk.is_key_frame(i) {
                    continue;
                }

                let offset = chunk.chunk_header_offset(i);

                if let Some(&last) = state.key_offsets.last() {
                    if offset <= last {
                        warn!("avi: dropping out-of-order index entry at {:#x}", offset);
                        continue;
                    }
                }

                state.key_offsets.push(offset);
                state.key_local_ordinals.push(i as u32);
                state.key_bytes_before.push(state.key_bytes_total);
                state.key_bytes_total += u64::from(chunk.chunk_size(i));
            }

            state.total_entries = chunk.entry_count() as u32;
            state.loaded = true;
        }

        // Propagate global base ordinals across contiguously loaded segments.
        for i in 1..self.segments.len() {
            if !self.segments[i - 1].loaded {
                break;
            }
            if let Some(base) = self.segments[i - 1].base_ordinal {
                self.segments[i].base_ordinal = Some(base + self.segments[i - 1].total_entries);
            }
            else {
                break;
            }
        }

        if let Some(pending) = self.pending {
            if pending.segment == segment {
                self.pending = None;
            }
        }
    }

    fn classify(&self) -> Classification {
        if self.indices_cover_all_frames() {
            Classification::AllFrames
        }
        else if !self.super_entries.is_empty() {
            Classification::Segments
        }
        else {
            Classification::SparseBytes
        }
    }

    /// True when every chunk of the stream is indexed, either because `idx1` listed them all or
    /// because the fully loaded segment indexes account for them all.
    fn indices_cover_all_frames(&self) -> bool {
        if self.header_chunk_count == 0 {
            return false;
        }
        if self.chunk_count == self.header_chunk_count {
            return true;
        }
        if !self.segments.is_empty() && self.segments.iter().all(|s| s.loaded) {
            let total: u32 = self.segments.iter().map(|s| s.total_entries).sum();
            return total == self.header_chunk_count;
        }
        false
    }

    /// The global chunk ordinal of the key frame at `offset`, if indexed.
    pub fn ordinal_for_offset(&self, offset: u64) -> Option<u32> {
        if let Ok(i) = self.key_offsets.binary_search(&offset) {
            return Some(self.key_ordinals[i]);
        }

        for segment in self.segments.iter().filter(|s| s.loaded) {
            if let Ok(i) = segment.key_offsets.binary_search(&offset) {
                return Some(segment.base_ordinal? + segment.key_local_ordinals[i]);
            }
        }

        None
    }

    /// True when `offset` is a key frame according to the explicit index flags (idx1 bit 4 or a
    /// clear bit 31 in an `ix##` size).
    pub fn is_key_frame_offset(&self, offset: u64) -> bool {
        if self.key_offsets.binary_search(&offset).is_ok() {
            return true;
        }
        self.segments
            .iter()
            .filter(|s| s.loaded)
            .any(|s| s.key_offsets.binary_search(&offset).is_ok())
    }

    /// Derive the presentation time of the chunk starting at `offset`, when known.
    pub fn timestamp_for_offset(&self, offset: u64) -> Option<TimeUs> {
        if self.duration_us <= 0 {
            return None;
        }

        match self.classify() {
            Classification::AllFrames => {
                let ordinal = self.ordinal_for_offset(offset)?;
                Some(self.timestamp_for_ordinal(ordinal))
            }
            Classification::Segments => {
                for (i, segment) in self.segments.iter().enumerate() {
                    if !segment.loaded {
                        continue;
                    }
                    if let Ok(k) = segment.key_offsets.binary_search(&offset) {
                        return Some(self.segment_key_timestamp(i, k));
                    }
                }
                None
            }
            Classification::SparseBytes => {
                let k = self.key_offsets.binary_search(&offset).ok()?;
                Some(self.sparse_key_timestamp(k))
            }
        }
    }

    /// Ordinal-proportional timestamp, used when every chunk is indexed.
    pub fn timestamp_for_ordinal(&self, ordinal: u32) -> TimeUs {
        if self.header_chunk_count == 0 {
            return 0;
        }
        (u64::from(ordinal) * self.duration_us as u64 / u64::from(self.header_chunk_count)) as i64
    }

    /// Byte-proportional timestamp of sparse key frame `k`. The reference span ends at the
    /// start of the last key frame, which therefore maps to the stream duration.
    fn sparse_key_timestamp(&self, k: usize) -> TimeUs {
        let total = match self.key_bytes_before.last() {
            Some(&total) if total > 0 => total,
            _ => return 0,
        };
        (self.key_bytes_before[k] * self.duration_us as u64 / total) as i64
    }

    /// Timestamp of key frame `k` of segment `i`: byte proportion within the segment scaled to
    /// its tick span, then ticks scaled to the stream duration.
    fn segment_key_timestamp(&self, i: usize, k: usize) -> TimeUs {
        let total_ticks = match self.cum_ticks.last() {
            Some(&total) if total > 0 => total,
            _ => return 0,
        };

        let segment = &self.segments[i];
        let ticks_before = if i == 0 { 0 } else { self.cum_ticks[i - 1] };
        let segment_ticks = u64::from(self.super_entries[i].duration);

        let ticks_in = if segment.key_bytes_total > 0 {
            segment.key_bytes_before[k] * segment_ticks / segment.key_bytes_total
        }
        else {
            0
        };

        ((ticks_before + ticks_in) * self.duration_us as u64 / total_ticks) as i64
    }

    /// Resolve seek points for `time_us`, or report the index chunk that must be loaded first.
    ///
    /// The floor key frame is the largest one at or before the target; when the floor is not
    /// exact and a successor exists, both are returned.
    pub fn seek_points(&self, time_us: TimeUs) -> SeekAnswer {
        let time_us = time_us.clamp(0, self.duration_us.max(0));

        match self.classify() {
            Classification::AllFrames => self.seek_points_all_frames(time_us),
            Classification::Segments => self.seek_points_segments(time_us),
            Classification::SparseBytes => self.seek_points_sparse(time_us),
        }
    }

    fn seek_points_all_frames(&self, time_us: TimeUs) -> SeekAnswer {
        // The floor key frame is found by its derived timestamp rather than by inverting the
        // ordinal arithmetic; floor division in the inverse would otherwise lose a unit and
        // break the timestamp/seek round trip.
        let (floor, successor) = self.keyframes_around_time(time_us);

        let (ordinal, offset) = match floor {
            Some(found) => found,
            // Nothing at or before the target; fall forward to the first key frame.
            None => match successor {
                Some(found) => found,
                None => return SeekAnswer::Ready(SeekPoints::one(SeekPoint::new(0, 0))),
            },
        };

        let first = SeekPoint::new(self.timestamp_for_ordinal(ordinal), offset);

        if first.time_us == time_us || floor.is_none() {
            return SeekAnswer::Ready(SeekPoints::one(first));
        }

        match successor {
            Some((ordinal, offset)) => {
                let second = SeekPoint::new(self.timestamp_for_ordinal(ordinal), offset);
                SeekAnswer::Ready(SeekPoints::two(first, second))
            }
            None => SeekAnswer::Ready(SeekPoints::one(first)),
        }
    }

    /// Finds the key frames with the largest derived timestamp at or before `time_us` and the
    /// smallest one after it, across the idx1 table and every loaded segment. Timestamps are
    /// monotone in the ordinal, so each source is binary searched.
    fn keyframes_around_time(&self, time_us: TimeUs) -> (Option<(u32, u64)>, Option<(u32, u64)>) {
        let mut floor: Option<(u32, u64)> = None;
        let mut successor: Option<(u32, u64)> = None;

        let mut consider = |ordinal: u32, offset: u64| {
            if self.timestamp_for_ordinal(ordinal) <= time_us {
                if floor.map_or(true, |(o, _)| ordinal > o) {
                    floor = Some((ordinal, offset));
                }
            }
            else if successor.map_or(true, |(o, _)| ordinal < o) {
                successor = Some((ordinal, offset));
            }
        };

        if !self.key_ordinals.is_empty() {
            let i = self
                .key_ordinals
                .partition_point(|&o| self.timestamp_for_ordinal(o) <= time_us);
            if i > 0 {
                consider(self.key_ordinals[i - 1], self.key_offsets[i - 1]);
            }
            if i < self.key_ordinals.len() {
                consider(self.key_ordinals[i], self.key_offsets[i]);
            }
        }

        for segment in self.segments.iter().filter(|s| s.loaded) {
            let base = match segment.base_ordinal {
                Some(base) => base,
                None => continue,
            };
            let i = segment
                .key_local_ordinals
                .partition_point(|&o| self.timestamp_for_ordinal(base + o) <= time_us);
            if i > 0 {
                consider(base + segment.key_local_ordinals[i - 1], segment.key_offsets[i - 1]);
            }
            if i < segment.key_local_ordinals.len() {
                consider(base + segment.key_local_ordinals[i], segment.key_offsets[i]);
            }
        }

        (floor, successor)
    }

    fn seek_points_segments(&self, time_us: TimeUs) -> SeekAnswer {
        let total_ticks = match self.cum_ticks.last() {
            Some(&total) if total > 0 => total,
            _ => return SeekAnswer::Ready(SeekPoints::one(SeekPoint::new(0, 0))),
        };

        let ticks_target = if self.duration_us > 0 {
            time_us as u64 * total_ticks / self.duration_us as u64
        }
        else {
            0
        };

        let mut segment = self.cum_ticks.partition_point(|&c| c <= ticks_target);
        if segment >= self.segments.len() {
            segment = self.segments.len() - 1;
        }

        if !self.segments[segment].loaded {
            return SeekAnswer::Pending {
                segment,
                position: self.super_entries[segment].offset,
            };
        }

        // A segment with no key frames cannot anchor a seek; fall back to the latest loaded
        // segment before it that has one.
        while self.segments[segment].key_offsets.is_empty() {
            if segment == 0 {
                return SeekAnswer::Ready(SeekPoints::one(SeekPoint::new(0, 0)));
            }
            segment -= 1;
            if !self.segments[segment].loaded {
                return SeekAnswer::Pending {
                    segment,
                    position: self.super_entries[segment].offset,
                };
            }
        }

        let state = &self.segments[segment];

        // Floor key frame within the segment, by derived timestamp.
        let count = state.key_offsets.len();
        let k = partition_indices(count, |k| self.segment_key_timestamp(segment, k) <= time_us)
            .saturating_sub(1);

        let first =
            SeekPoint::new(self.segment_key_timestamp(segment, k), state.key_offsets[k]);

        if first.time_us == time_us {
            return SeekAnswer::Ready(SeekPoints::one(first));
        }

        if k + 1 < state.key_offsets.len() {
            let second = SeekPoint::new(
                self.segment_key_timestamp(segment, k + 1),
                state.key_offsets[k + 1],
            );
            return SeekAnswer::Ready(SeekPoints::two(first, second));
        }

        // Last key frame of the segment; offer the next segment's first key frame when it is
        // already loaded.
        if let Some(next) = self.segments.get(segment + 1) {
            if next.loaded && !next.key_offsets.is_empty() {
                let second = SeekPoint::new(
                    self.segment_key_timestamp(segment + 1, 0),
                    next.key_offsets[0],
                );
                return SeekAnswer::Ready(SeekPoints::two(first, second));
            }
        }

        SeekAnswer::Ready(SeekPoints::one(first))
    }

    fn seek_points_sparse(&self, time_us: TimeUs) -> SeekAnswer {
        if self.key_offsets.is_empty() {
            return SeekAnswer::Ready(SeekPoints::one(SeekPoint::new(0, 0)));
        }

        let count = self.key_offsets.len();
        let k = partition_indices(count, |k| self.sparse_key_timestamp(k) <= time_us)
            .saturating_sub(1);

        let first = SeekPoint::new(self.sparse_key_timestamp(k), self.key_offsets[k]);

        if first.time_us == time_us || k + 1 >= self.key_offsets.len() {
            return SeekAnswer::Ready(SeekPoints::one(first));
        }

        let second = SeekPoint::new(self.sparse_key_timestamp(k + 1), self.key_offsets[k + 1]);
        SeekAnswer::Ready(SeekPoints::two(first, second))
    }

    /// Consulted before a transport seek. Records and reports a pending-segment detour when the
    /// target time falls in an unloaded segment.
    pub fn will_seek_to(&mut self, _position: u64, time_us: TimeUs) -> bool {
        self.pending = None;

        match self.seek_points(time_us) {
            SeekAnswer::Pending { segment, position } => {
                self.pending = Some(PendingSeek { segment, position });
                true
            }
            SeekAnswer::Ready(_) => false,
        }
    }

    /// The position of the index chunk an unresolved seek is waiting on.
    pub fn pending_seek_offset(&self) -> Option<u64> {
        self.pending.map(|p| p.position)
    }

    /// Cancel an unresolved seek. Called when a new higher-level seek supersedes it.
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    #[cfg(test)]
    pub fn key_frame_count(&self) -> usize {
        self.key_offsets.len()
            + self.segments.iter().map(|s| s.key_offsets.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use reel_core::io::{BufInput, ByteCursor};

    use crate::chunks::tests::build_standard_index;
    use crate::chunks::{IndexChunk, SuperIndexEntry};

    use super::{SeekAnswer, StreamIndex};

    /// Builds the index of a fully idx1-indexed video stream: 250 chunks of 1000 bytes, a key
    /// frame every 25th chunk, 10 s duration.
    fn full_video_index() -> StreamIndex {
        let mut index = StreamIndex::new(250, 10_000_000);
        for ordinal in 0..250u32 {
            if ordinal % 25 == 0 {
                index.append_idx1_key_frame(0x1000 + u64::from(ordinal) * 1008, 1000);
            }
            index.increment_chunk_count();
        }
        index.compact();
        index
    }

    /// Builds a sparse audio index: 1000 chunks in the header, 100 key frames of 500 bytes.
    fn sparse_audio_index() -> StreamIndex {
        let mut index = StreamIndex::new(1000, 8_000_000);
        for i in 0..100u64 {
            index.append_idx1_key_frame(0x2000 + i * 512, 500);
            for _ in 0..10 {
                index.increment_chunk_count();
            }
        }
        index.compact();
        index
    }

    fn parse_standard(body: Vec<u8>) -> crate::chunks::StandardIndexChunk {
        let len = body.len() as u32;
        let mut input = BufInput::new(body);
        let mut cursor = ByteCursor::new(&mut input);
        match IndexChunk::read(&mut cursor, len).unwrap() {
            IndexChunk::Standard(index) => index,
            _ => panic!("expected standard index"),
        }
    }

    #[test]
    fn verify_exact_mid_seek_returns_single_point() {
        let index = full_video_index();

        // Key frame ordinal 125 is exactly the mid-point of the 10 s stream.
        match index.seek_points(5_000_000) {
            SeekAnswer::Ready(points) => {
                assert_eq!(points.first.time_us, 5_000_000);
                assert_eq!(points.first.position, 0x1000 + 125 * 1008);
                assert!(points.second.is_none());
            }
            _ => panic!("expected ready answer"),
        }
    }

    #[test]
    fn verify_inexact_seek_straddles() {
        let index = full_video_index();

        // 4.5 s lands on frame 112, between key frames 100 and 125.
        match index.seek_points(4_500_000) {
            SeekAnswer::Ready(points) => {
                assert_eq!(points.first.time_us, 4_000_000);
                assert_eq!(points.first.position, 0x1000 + 100 * 1008);
                let second = points.second.expect("successor expected");
                assert_eq!(second.time_us, 5_000_000);
                assert_eq!(second.position, 0x1000 + 125 * 1008);
            }
            _ => panic!("expected ready answer"),
        }
    }

    #[test]
    fn verify_seek_past_last_keyframe_returns_floor_only() {
        let index = full_video_index();

        match index.seek_points(9_999_999) {
            SeekAnswer::Ready(points) => {
                assert_eq!(points.first.position, 0x1000 + 225 * 1008);
                assert!(points.second.is_none());
            }
            _ => panic!("expected ready answer"),
        }
    }

    #[test]
    fn verify_all_frames_timestamps() {
        let index = full_video_index();

        // Ordinal-proportional: key frame 50 of 250 in 10 s.
        let ts = index.timestamp_for_offset(0x1000 + 50 * 1008).unwrap();
        assert_eq!(ts, 2_000_000);

        // Unknown offsets resolve to nothing.
        assert!(index.timestamp_for_offset(0x1001).is_none());
    }

    #[test]
    fn verify_sparse_audio_timestamps() {
        let index = sparse_audio_index();

        // Byte-proportional against the start of the last key frame: entry 50 of 100 equal-size
        // entries sits at 50/99 of the duration.
        let ts = index.timestamp_for_offset(0x2000 + 50 * 512).unwrap();
        assert_eq!(ts, 50 * 8_000_000 / 99);

        assert_eq!(index.timestamp_for_offset(0x2000).unwrap(), 0);
        assert_eq!(index.timestamp_for_offset(0x2000 + 99 * 512).unwrap(), 8_000_000);
    }

    #[test]
    fn verify_timestamp_roundtrips_through_seek() {
        let index = sparse_audio_index();

        for k in [0u64, 13, 50, 99] {
            let offset = 0x2000 + k * 512;
            let ts = index.timestamp_for_offset(offset).unwrap();
            match index.seek_points(ts) {
                SeekAnswer::Ready(points) => assert_eq!(points.first.position, offset),
                _ => panic!("expected ready answer"),
            }
        }
    }

    #[test]
    fn verify_lazy_segment_seek_is_pending_until_loaded() {
        let mut index = StreamIndex::new(200, 10_000_000);

        index.install_super_index(vec![
            SuperIndexEntry { offset: 0x8000, size: 64, duration: 500 },
            SuperIndexEntry { offset: 0x20000, size: 64, duration: 500 },
        ]);

        // Row 0 loads; each entry is 100 chunks of 400 bytes, key every 10th.
        let entries: Vec<(u32, u32, bool)> =
            (0..100).map(|i| (8 + i * 408, 400, i % 10 == 0)).collect();
        let row0 = parse_standard(build_standard_index(*b"00dc", 0x1000, &entries));
        index.install_standard_index(&row0, Some(0x8000));

        // A seek into the loaded half resolves.
        match index.seek_points(2_000_000) {
            SeekAnswer::Ready(points) => {
                assert!(points.first.time_us <= 2_000_000);
            }
            _ => panic!("expected ready answer"),
        }

        // A seek into the unloaded half reports the responsible ix## chunk.
        assert!(index.pending_seek_offset().is_none());
        match index.seek_points(7_500_000) {
            SeekAnswer::Pending { segment, position } => {
                assert_eq!(segment, 1);
                assert_eq!(position, 0x20000);
            }
            _ => panic!("expected pending answer"),
        }

        assert!(index.will_seek_to(0x20000, 7_500_000));
        assert_eq!(index.pending_seek_offset(), Some(0x20000));

        // Loading row 1 clears the pending seek and the same query now resolves.
        let row1 = parse_standard(build_standard_index(*b"00dc", 0x11000, &entries));
        index.install_standard_index(&row1, Some(0x20000));

        assert!(index.pending_seek_offset().is_none());
        match index.seek_points(7_500_000) {
            SeekAnswer::Ready(points) => {
                assert!(points.first.time_us <= 7_500_000);
                assert!(points.first.position >= 0x11000);
                if let Some(second) = points.second {
                    assert!(second.time_us >= 7_500_000);
                }
            }
            _ => panic!("expected ready answer"),
        }
    }

    #[test]
    fn verify_segment_install_is_idempotent() {
        let mut index = StreamIndex::new(100, 4_000_000);

        index
            .install_super_index(vec![SuperIndexEntry { offset: 0x8000, size: 64, duration: 100 }]);

        let entries: Vec<(u32, u32, bool)> =
            (0..100).map(|i| (8 + i * 208, 200, i % 4 == 0)).collect();
        let chunk = parse_standard(build_standard_index(*b"00dc", 0x1000, &entries));

        index.install_standard_index(&chunk, Some(0x8000));
        let count = index.key_frame_count();
        let ts = index.timestamp_for_offset(0x1000 + 8 * 208).unwrap();

        index.install_standard_index(&chunk, Some(0x8000));
        assert_eq!(index.key_frame_count(), count);
        assert_eq!(index.timestamp_for_offset(0x1000 + 8 * 208).unwrap(), ts);
    }

    #[test]
    fn verify_idx1_invariants_and_recovery() {
        let mut index = StreamIndex::new(10, 1_000_000);

        index.append_idx1_key_frame(100, 10);
        index.increment_chunk_count();
        index.append_idx1_key_frame(200, 10);
        index.increment_chunk_count();
        // Out-of-order entry is dropped, not installed.
        index.append_idx1_key_frame(150, 10);
        index.increment_chunk_count();
        index.append_idx1_key_frame(300, 10);
        index.increment_chunk_count();
        index.compact();

        assert_eq!(index.key_frame_count(), 3);
        assert!(index.is_key_frame_offset(200));
        assert!(!index.is_key_frame_offset(150));
    }

    #[test]
    fn verify_timestamps_stay_in_duration_bounds() {
        let index = sparse_audio_index();

        for i in 0..100u64 {
            let ts = index.timestamp_for_offset(0x2000 + i * 512).unwrap();
            assert!(ts >= 0 && ts <= 8_000_000);
        }
    }
}
