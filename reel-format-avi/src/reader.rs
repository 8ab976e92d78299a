// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-stream chunk readers.
//!
//! A [`ChunkReader`] consumes the bodies of a stream's `movi` payload chunks and turns them into
//! timed samples. The shared [`ReaderBase`] carries the chunk routing state and owns the
//! stream's [`StreamIndex`]; the per-variant state is a tagged enum, dispatched in
//! [`ChunkReader::on_chunk_data`].

use log::debug;

use reel_core::demux::{SampleFlags, TimeUs, TrackOutput, TrackType};
use reel_core::errors::{end_of_stream_error, Result};
use reel_core::io::{ByteCursor, Input};

use crate::chunks::IndexChunk;
use crate::index::StreamIndex;
use crate::{make_chunk_id, make_ix_chunk_id, mpeg, quad_at, FourCc};

/// An AC-3 elementary stream reader, supplied by the host as a capability. It knows how to
/// segment the byte stream into syncframes and emits the resulting samples itself.
pub trait Ac3PacketReader {
    /// Called before the first payload byte of each chunk with the chunk's timestamp.
    fn packet_started(&mut self, time_us: TimeUs);

    /// Consume up-to `len` bytes from the input, emitting any completed samples to `output`.
    /// Returns the number of bytes consumed.
    fn consume(
        &mut self,
        input: &mut dyn Input,
        len: usize,
        output: &mut dyn TrackOutput,
    ) -> Result<usize>;

    /// Drop any partially assembled syncframe. Called when the read position jumps.
    fn reset(&mut self);
}

/// Creates one [`Ac3PacketReader`] per AC-3 stream of a file.
pub trait Ac3ReaderFactory {
    fn create(&self) -> Box<dyn Ac3PacketReader>;
}

/// State shared by every chunk reader variant.
pub struct ReaderBase {
    pub stream_id: u32,
    pub track_type: TrackType,
    chunk_id: FourCc,
    /// The alternative payload chunk ID; `NNdb` for video streams.
    alt_chunk_id: Option<FourCc>,
    index_chunk_id: FourCc,
    alt_index_chunk_id: FourCc,
    current_chunk_size: u32,
    bytes_remaining: u32,
    current_chunk_offset: u64,
    index_chunk_start: bool,
    pub index: StreamIndex,
}

struct VideoState {
    /// Ordinal of the next chunk; `None` after a seek until re-resolved by offset lookup.
    next_ordinal: Option<u32>,
}

struct Mp3State {
    /// Bytes left of the MPEG frame currently being assembled, including its header.
    frame_remaining: usize,
    /// Total size of that frame.
    frame_size: usize,
    frame_duration_us: TimeUs,
    time_us: TimeUs,
    /// Cleared after a seek; set again once a chunk-offset timestamp is derived.
    ts_valid: bool,
    /// True once a frame header was found in the current chunk.
    found_in_chunk: bool,
    scratch: Vec<u8>,
    scratch_len: usize,
    scratch_pos: usize,
    /// Counts chunk starts where a timestamp was deliberately not requested because a segment
    /// index was pending.
    timestamp_holds: u32,
}

struct Ac3State {
    reader: Box<dyn Ac3PacketReader>,
    last_ts: TimeUs,
}

enum Kind {
    Video(VideoState),
    Mp3(Mp3State),
    Ac3(Ac3State),
}

const MP3_SCRATCH_LEN: usize = 16;

/// A per-stream consumer of `movi` payload and index chunks.
pub struct ChunkReader {
    base: ReaderBase,
    kind: Kind,
}

impl ChunkReader {
    fn new(
        stream_id: u32,
        track_type: TrackType,
        suffix: [u8; 2],
        alt_suffix: Option<[u8; 2]>,
        index: StreamIndex,
        kind: Kind,
    ) -> Self {
        ChunkReader {
            base: ReaderBase {
                stream_id,
                track_type,
                chunk_id: make_chunk_id(stream_id, suffix),
                alt_chunk_id: alt_suffix.map(|s| make_chunk_id(stream_id, s)),
                index_chunk_id: make_ix_chunk_id(stream_id),
                alt_index_chunk_id: make_chunk_id(stream_id, *b"ix"),
                current_chunk_size: 0,
                bytes_remaining: 0,
                current_chunk_offset: 0,
                index_chunk_start: false,
                index,
            },
            kind,
        }
    }

    /// A reader for a video stream; handles `NNdc` and `NNdb` chunks and forwards their bytes.
    pub fn new_video(stream_id: u32, index: StreamIndex) -> Self {
        ChunkReader::new(
            stream_id,
            TrackType::Video,
            *b"dc",
            Some(*b"db"),
            index,
            Kind::Video(VideoState { next_ordinal: Some(0) }),
        )
    }

    /// A reader for an MP3 audio stream; re-synchronizes on MPEG frame headers inside `NNwb`
    /// chunk bodies.
    pub fn new_mp3(stream_id: u32, sample_rate: u32, index: StreamIndex) -> Self {
        let frame_duration_us = if sample_rate > 0 {
            (1152u64 * 1_000_000 / u64::from(sample_rate)) as i64
        }
        else {
            0
        };

        ChunkReader::new(
            stream_id,
            TrackType::Audio,
            *b"wb",
            None,
            index,
            Kind::Mp3(Mp3State {
                frame_remaining: 0,
                frame_size: 0,
                frame_duration_us,
                time_us: 0,
                ts_valid: false,
                found_in_chunk: false,
                scratch: vec![0; MP3_SCRATCH_LEN],
                scratch_len: 0,
                scratch_pos: 0,
                timestamp_holds: 0,
            }),
        )
    }

    /// A reader for an AC-3 audio stream; hands `NNwb` chunk bodies to the host's packet
    /// reader.
    pub fn new_ac3(stream_id: u32, reader: Box<dyn Ac3PacketReader>, index: StreamIndex) -> Self {
        ChunkReader::new(
            stream_id,
            TrackType::Audio,
            *b"wb",
            None,
            index,
            Kind::Ac3(Ac3State { reader, last_ts: 0 }),
        )
    }

    pub fn index(&self) -> &StreamIndex {
        &self.base.index
    }

    pub fn index_mut(&mut self) -> &mut StreamIndex {
        &mut self.base.index
    }

    pub fn stream_id(&self) -> u32 {
        self.base.stream_id
    }

    pub fn track_type(&self) -> TrackType {
        self.base.track_type
    }

    /// True for the stream's payload, alternative, and index chunk IDs.
    pub fn handles(&self, cc: FourCc) -> bool {
        cc == self.base.chunk_id
            || self.base.alt_chunk_id == Some(cc)
            || self.is_index_chunk(cc)
    }

    fn is_index_chunk(&self, cc: FourCc) -> bool {
        cc == self.base.index_chunk_id || cc == self.base.alt_index_chunk_id
    }

    /// Begin a chunk. `offset` is the file position of the chunk header.
    pub fn on_chunk_start(&mut self, cc: FourCc, size: u32, offset: u64) {
        self.base.current_chunk_size = size;
        self.base.bytes_remaining = size;
        self.base.current_chunk_offset = offset;
        self.base.index_chunk_start = self.is_index_chunk(cc);

        if let Kind::Mp3(state) = &mut self.kind {
            state.found_in_chunk = false;
            if state.frame_remaining == 0 {
                state.scratch_pos = 0;
                state.scratch_len = 0;
            }
        }
    }

    /// Consume chunk body bytes. Returns true once the chunk is fully consumed.
    pub fn on_chunk_data(
        &mut self,
        input: &mut dyn Input,
        output: &mut dyn TrackOutput,
    ) -> Result<bool> {
        let ChunkReader { base, kind } = self;

        if base.index_chunk_start {
            let len = base.bytes_remaining;
            let mut cursor = ByteCursor::new(input);

            match IndexChunk::read(&mut cursor, len)? {
                IndexChunk::Super(chunk) => base.index.install_super_index(chunk.entries),
                IndexChunk::Standard(chunk) => {
                    base.index.install_standard_index(&chunk, Some(base.current_chunk_offset));
                }
            }

            base.bytes_remaining = 0;
            base.index_chunk_start = false;
            return Ok(true);
        }

        match kind {
            Kind::Video(state) => read_video(base, state, input, output),
            Kind::Mp3(state) => read_mp3(base, state, input, output),
            Kind::Ac3(state) => read_ac3(base, state, input, output),
        }
    }

    /// Forget the position within the current chunk. Called when the read position jumps.
    pub fn invalidate_current_chunk_position(&mut self) {
        self.base.current_chunk_size = 0;
        self.base.bytes_remaining = 0;
        self.base.index_chunk_start = false;

        match &mut self.kind {
            Kind::Video(state) => {
                state.next_ordinal = None;
            }
            Kind::Mp3(state) => {
                state.frame_remaining = 0;
                state.ts_valid = false;
                state.scratch_pos = 0;
                state.scratch_len = 0;
            }
            Kind::Ac3(state) => {
                state.reader.reset();
            }
        }
    }

    #[cfg(test)]
    pub fn timestamp_holds(&self) -> u32 {
        match &self.kind {
            Kind::Mp3(state) => state.timestamp_holds,
            _ => 0,
        }
    }
}

fn read_video(
    base: &mut ReaderBase,
    state: &mut VideoState,
    input: &mut dyn Input,
    output: &mut dyn TrackOutput,
) -> Result<bool> {
    if base.bytes_remaining == base.current_chunk_size && state.next_ordinal.is_none() {
        // First byte after a seek: re-resolve the chunk ordinal by offset.
        match base.index.ordinal_for_offset(base.current_chunk_offset) {
            Some(ordinal) => state.next_ordinal = Some(ordinal),
            None => {
                if base.index.pending_seek_offset().is_none() {
                    debug!(
                        "avi: skipping unindexed chunk at {:#x} for stream {}",
                        base.current_chunk_offset, base.stream_id
                    );
                }
                input.skip_fully(u64::from(base.bytes_remaining))?;
                base.bytes_remaining = 0;
                return Ok(true);
            }
        }
    }

    if base.current_chunk_size == 0 {
        // An empty chunk still occupies an ordinal.
        if let Some(ordinal) = state.next_ordinal {
            state.next_ordinal = Some(ordinal + 1);
        }
        return Ok(true);
    }

    while base.bytes_remaining > 0 {
        let n = output.sample_input(input, base.bytes_remaining as usize, false)?;
        if n == 0 {
            return end_of_stream_error();
        }
        base.bytes_remaining -= n as u32;
    }

    let ordinal = state.next_ordinal.unwrap_or(0);
    let ts = base.index.timestamp_for_ordinal(ordinal);

    let flags = if base.index.is_key_frame_offset(base.current_chunk_offset) {
        SampleFlags::KEYFRAME
    }
    else {
        SampleFlags::empty()
    };

    output.sample_metadata(ts, flags, base.current_chunk_size, 0);
    state.next_ordinal = Some(ordinal + 1);

    Ok(true)
}

fn read_mp3(
    base: &mut ReaderBase,
    state: &mut Mp3State,
    input: &mut dyn Input,
    output: &mut dyn TrackOutput,
) -> Result<bool> {
    if base.bytes_remaining == base.current_chunk_size && !state.ts_valid {
        if base.index.pending_seek_offset().is_none() {
            if let Some(ts) = base.index.timestamp_for_offset(base.current_chunk_offset) {
                state.time_us = ts;
                state.ts_valid = true;
            }
        }
        else {
            // First packet of a seek run with a segment index pending: hold the clock.
            state.timestamp_holds += 1;
        }
    }

    // An empty chunk advances the clock by exactly one frame.
    if base.current_chunk_size == 0 {
        state.time_us += state.frame_duration_us;
        return Ok(true);
    }

    loop {
        if state.frame_remaining == 0 {
            if !scan_mp3_header(base, state, input, output)? {
                // No frame header in the rest of the chunk. If none was found at all, the
                // chunk is dropped and the clock still advances by one frame so stray ID3 or
                // zero padding does not confuse the decoder.
                if !state.found_in_chunk {
                    state.time_us += state.frame_duration_us;
                }
                state.scratch_pos = 0;
                state.scratch_len = 0;
                return Ok(true);
            }
            state.found_in_chunk = true;
        }

        // Drain scratch bytes into the sample first, then stream straight from the input.
        if state.scratch_pos < state.scratch_len {
            let n = state.frame_remaining.min(state.scratch_len - state.scratch_pos);
            output.sample_data(&state.scratch[state.scratch_pos..state.scratch_pos + n]);
            state.scratch_pos += n;
            state.frame_remaining -= n;
        }

        while state.frame_remaining > 0 && base.bytes_remaining > 0 {
            let want = state.frame_remaining.min(base.bytes_remaining as usize);
            let n = output.sample_input(input, want, false)?;
            if n == 0 {
                return end_of_stream_error();
            }
            base.bytes_remaining -= n as u32;
            state.frame_remaining -= n;
        }

        if state.frame_remaining > 0 {
            // The frame continues in the next chunk.
            return Ok(true);
        }

        output.sample_metadata(state.time_us, SampleFlags::KEYFRAME, state.frame_size as u32, 0);
        state.time_us += state.frame_duration_us;

        if base.bytes_remaining == 0 && state.scratch_pos >= state.scratch_len {
            return Ok(true);
        }
    }
}

/// Scans the remainder of the chunk for a valid MPEG audio frame header, sliding one byte at a
/// time through the scratch buffer. On success the four header bytes are appended to the sample
/// and `frame_remaining`/`frame_size` are set. Returns false when the chunk is exhausted.
fn scan_mp3_header(
    base: &mut ReaderBase,
    state: &mut Mp3State,
    input: &mut dyn Input,
    output: &mut dyn TrackOutput,
) -> Result<bool> {
    loop {
        let avail = state.scratch_len - state.scratch_pos;

        if avail < mpeg::MPEG_HEADER_LEN {
            if base.bytes_remaining == 0 {
                return Ok(false);
            }

            // Shift the partial window to the front and refill from the chunk.
            state.scratch.copy_within(state.scratch_pos..state.scratch_len, 0);
            state.scratch_len = avail;
            state.scratch_pos = 0;

            let want =
                (state.scratch.len() - state.scratch_len).min(base.bytes_remaining as usize);
            input.read_fully(&mut state.scratch[state.scratch_len..state.scratch_len + want])?;
            state.scratch_len += want;
            base.bytes_remaining -= want as u32;
            continue;
        }

        let word = u32::from_be_bytes(quad_at(&state.scratch, state.scratch_pos));

        if let Some(info) = mpeg::parse_frame(word) {
            state.frame_size = info.size;
            state.frame_remaining = info.size;
            state.frame_duration_us =
                (u64::from(info.samples_per_frame) * 1_000_000 / u64::from(info.sample_rate))
                    as i64;

            // The header bytes are the start of the sample.
            output.sample_data(&state.scratch[state.scratch_pos..state.scratch_pos + 4]);
            state.scratch_pos += 4;
            state.frame_remaining -= 4;
            return Ok(true);
        }

        state.scratch_pos += 1;
    }
}

fn read_ac3(
    base: &mut ReaderBase,
    state: &mut Ac3State,
    input: &mut dyn Input,
    output: &mut dyn TrackOutput,
) -> Result<bool> {
    if base.bytes_remaining == base.current_chunk_size {
        if let Some(ts) = base.index.timestamp_for_offset(base.current_chunk_offset) {
            state.last_ts = ts;
        }
        state.reader.packet_started(state.last_ts);
    }

    while base.bytes_remaining > 0 {
        let n = state.reader.consume(input, base.bytes_remaining as usize, output)?;
        if n == 0 {
            return end_of_stream_error();
        }
        base.bytes_remaining -= n as u32;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use reel_core::demux::SampleFlags;
    use reel_core::io::{BufInput, Input};
    use reel_core::sink::CaptureTrack;

    use crate::index::StreamIndex;

    use super::ChunkReader;

    /// A 417-byte MPEG 1 layer 3 frame (128 kbit/s, 44.1 kHz): header plus payload filler.
    fn mp3_frame() -> Vec<u8> {
        let mut frame = vec![0xff, 0xfb, 0x90, 0x00];
        frame.resize(417, 0xaa);
        frame
    }

    fn drive_chunk(reader: &mut ChunkReader, cc: [u8; 4], body: &[u8], track: &mut CaptureTrack) {
        let mut input = BufInput::new(body.to_vec());
        reader.on_chunk_start(cc, body.len() as u32, 0x1000);
        loop {
            if reader.on_chunk_data(&mut input, track).unwrap() {
                break;
            }
        }
    }

    #[test]
    fn verify_mp3_resync_skips_leading_junk() {
        let mut body = vec![0x49, 0x44, 0x33, 0x04, 0x00, 0x00, 0x00, 0x00]; // "ID3" junk
        body.extend_from_slice(&mp3_frame());

        let mut reader = ChunkReader::new_mp3(1, 44_100, StreamIndex::new(10, 1_000_000));
        let mut track = CaptureTrack::default();

        drive_chunk(&mut reader, *b"01wb", &body, &mut track);

        assert_eq!(track.samples.len(), 1);
        let sample = track.samples[0];
        assert_eq!(sample.time_us, 0);
        assert_eq!(sample.flags, SampleFlags::KEYFRAME);
        assert_eq!(sample.size, 417);
        assert_eq!(track.sample_bytes(0)[0..4], [0xff, 0xfb, 0x90, 0x00]);
    }

    #[test]
    fn verify_mp3_empty_chunk_advances_clock_one_frame() {
        let mut reader = ChunkReader::new_mp3(1, 44_100, StreamIndex::new(10, 1_000_000));
        let mut track = CaptureTrack::default();

        drive_chunk(&mut reader, *b"01wb", &[], &mut track);
        assert!(track.samples.is_empty());

        drive_chunk(&mut reader, *b"01wb", &mp3_frame(), &mut track);

        // One frame of silence: 1152 samples at 44.1 kHz.
        assert_eq!(track.samples.len(), 1);
        assert_eq!(track.samples[0].time_us, 1152 * 1_000_000 / 44_100);
    }

    #[test]
    fn verify_mp3_chunk_without_header_is_dropped() {
        let mut reader = ChunkReader::new_mp3(1, 44_100, StreamIndex::new(10, 1_000_000));
        let mut track = CaptureTrack::default();

        // Zero padding only; no sync word anywhere.
        drive_chunk(&mut reader, *b"01wb", &[0u8; 64], &mut track);
        assert!(track.samples.is_empty());

        drive_chunk(&mut reader, *b"01wb", &mp3_frame(), &mut track);
        assert_eq!(track.samples.len(), 1);
        assert_eq!(track.samples[0].time_us, 1152 * 1_000_000 / 44_100);
    }

    #[test]
    fn verify_mp3_two_frames_in_one_chunk() {
        let mut body = mp3_frame();
        body.extend_from_slice(&mp3_frame());

        let mut reader = ChunkReader::new_mp3(1, 44_100, StreamIndex::new(10, 1_000_000));
        let mut track = CaptureTrack::default();

        drive_chunk(&mut reader, *b"01wb", &body, &mut track);

        assert_eq!(track.samples.len(), 2);
        assert_eq!(track.samples[0].time_us, 0);
        assert_eq!(track.samples[1].time_us, 1152 * 1_000_000 / 44_100);
        assert_eq!(track.sample_bytes(1).len(), 417);
    }

    #[test]
    fn verify_mp3_frame_spanning_chunks() {
        let frame = mp3_frame();
        let (head, tail) = frame.split_at(100);

        let mut reader = ChunkReader::new_mp3(1, 44_100, StreamIndex::new(10, 1_000_000));
        let mut track = CaptureTrack::default();

        drive_chunk(&mut reader, *b"01wb", head, &mut track);
        assert!(track.samples.is_empty());

        drive_chunk(&mut reader, *b"01wb", tail, &mut track);
        assert_eq!(track.samples.len(), 1);
        assert_eq!(track.samples[0].size, 417);
        assert_eq!(track.sample_bytes(0).len(), 417);
    }

    #[test]
    fn verify_mp3_holds_timestamp_while_segment_index_pending() {
        use crate::chunks::SuperIndexEntry;

        // A stream whose only index is an unloaded segment; a seek into it leaves the index
        // pending.
        let mut index = StreamIndex::new(100, 10_000_000);
        index.install_super_index(vec![SuperIndexEntry { offset: 0x8000, size: 64, duration: 100 }]);
        assert!(index.will_seek_to(0x8000, 5_000_000));

        let mut reader = ChunkReader::new_mp3(1, 44_100, StreamIndex::new(10, 1_000_000));
        *reader.index_mut() = index;
        reader.invalidate_current_chunk_position();

        let mut track = CaptureTrack::default();
        drive_chunk(&mut reader, *b"01wb", &mp3_frame(), &mut track);

        // The frame is still emitted, but no chunk-offset timestamp was requested.
        assert_eq!(track.samples.len(), 1);
        assert_eq!(reader.timestamp_holds(), 1);
    }

    #[test]
    fn verify_video_reader_emits_ordinal_timestamps_and_key_flags() {
        // 4 chunks, all indexed, key frames at ordinals 0 and 2.
        let mut index = StreamIndex::new(4, 400_000);
        for ordinal in 0..4u32 {
            if ordinal % 2 == 0 {
                index.append_idx1_key_frame(0x1000 + u64::from(ordinal) * 0x100, 64);
            }
            index.increment_chunk_count();
        }
        index.compact();

        let mut reader = ChunkReader::new_video(0, index);
        let mut track = CaptureTrack::default();

        for ordinal in 0..4u64 {
            let body = vec![0u8; 64];
            let mut input = BufInput::new(body);
            reader.on_chunk_start(*b"00dc", 64, 0x1000 + ordinal * 0x100);
            while !reader.on_chunk_data(&mut input, &mut track).unwrap() {}
        }

        assert_eq!(track.samples.len(), 4);
        for (ordinal, sample) in track.samples.iter().enumerate() {
            assert_eq!(sample.time_us, ordinal as i64 * 100_000);
            assert_eq!(
                sample.flags.contains(SampleFlags::KEYFRAME),
                ordinal % 2 == 0,
                "key flag mismatch at ordinal {}",
                ordinal
            );
        }
    }

    #[test]
    fn verify_video_reader_skips_unknown_chunk_after_seek() {
        let mut index = StreamIndex::new(4, 400_000);
        index.append_idx1_key_frame(0x1000, 64);
        index.increment_chunk_count();
        index.compact();

        let mut reader = ChunkReader::new_video(0, index);
        let mut track = CaptureTrack::default();

        // After a seek the ordinal is unknown; an unindexed chunk offset is discarded.
        reader.invalidate_current_chunk_position();

        let mut input = BufInput::new(vec![0u8; 64]);
        reader.on_chunk_start(*b"00dc", 64, 0x9999);
        assert!(reader.on_chunk_data(&mut input, &mut track).unwrap());
        assert!(track.samples.is_empty());
        assert_eq!(input.position(), 64);

        // A chunk at a known key-frame offset re-resolves the ordinal.
        let mut input = BufInput::new(vec![0u8; 64]);
        reader.on_chunk_start(*b"00dc", 64, 0x1000);
        assert!(reader.on_chunk_data(&mut input, &mut track).unwrap());
        assert_eq!(track.samples.len(), 1);
        assert_eq!(track.samples[0].time_us, 0);
    }
}
