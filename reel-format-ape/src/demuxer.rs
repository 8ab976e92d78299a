// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The APE demuxer.

use log::debug;

use reel_core::demux::{
    Demuxer, ReadResult, SampleFlags, SeekMap, SeekPoint, SeekPoints, TimeUs, TrackFormat,
    TrackSink, TrackType,
};
use reel_core::errors::{end_of_stream_error, malformed_error, Error, Result};
use reel_core::io::{ByteCursor, Input};

use crate::header::{read_header, ApeHeader, APE_MAGIC, BIT_TABLE_VERSION};
use crate::MIME_AUDIO_APE;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    ReadHeader,
    ReadFrames,
}

/// Options for the [`ApeReader`].
#[derive(Default)]
pub struct ApeReaderOptions {}

/// One entry of the reconstructed frame table.
#[derive(Copy, Clone, Debug)]
struct ApeFrame {
    /// Absolute file offset of the frame's first byte.
    pos: u64,
    /// Byte size, 4-byte aligned.
    size: u32,
    /// Audio blocks the frame decodes to.
    blocks: u32,
    /// Leading data to skip: bytes for new files, bits for files older than 3.81.
    skip: u32,
    /// Presentation offset in blocks.
    pts: u64,
}

/// Monkey's Audio (APE) demuxer.
///
/// `ApeReader` implements a demuxer for the APE format. Every frame is emitted as a key sample,
/// prefixed with the 8-byte frame header the FFmpeg decoder consumes; the matching 6-byte
/// decoder configuration is published as codec initialization data.
pub struct ApeReader {
    state: State,
    header: Option<ApeHeader>,
    frames: Vec<ApeFrame>,
    duration_us: TimeUs,
    current_frame: usize,
    /// The last up-to-4 bytes read, spanning the 4-byte-alignment overlap between adjacent
    /// frames so the next frame can be assembled without a backwards seek.
    tail: [u8; 4],
    tail_len: usize,
    /// File offset one past the cached tail bytes.
    tail_end: u64,
}

impl ApeReader {
    pub fn new(_options: ApeReaderOptions) -> Self {
        ApeReader {
            state: State::ReadHeader,
            header: None,
            frames: Vec::new(),
            duration_us: 0,
            current_frame: 0,
            tail: [0; 4],
            tail_len: 0,
            tail_end: 0,
        }
    }

    fn frame_time_us(&self, frame: usize) -> TimeUs {
        let sample_rate = self.header.as_ref().map_or(0, |h| h.sample_rate);
        if sample_rate == 0 {
            return 0;
        }
        (self.frames[frame].pts * 1_000_000 / u64::from(sample_rate)) as i64
    }

    /// The frame with the largest start time at or before `time_us`.
    fn floor_frame_for_time(&self, time_us: TimeUs) -> usize {
        let mut lo = 0;
        let mut hi = self.frames.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.frame_time_us(mid) <= time_us {
                lo = mid + 1;
            }
            else {
                hi = mid;
            }
        }
        lo.saturating_sub(1)
    }

    fn read_header_state(
        &mut self,
        input: &mut dyn Input,
        sink: &mut dyn TrackSink,
    ) -> Result<ReadResult> {
        let file_len = input.len();

        let mut cursor = ByteCursor::new(input);
        let header = read_header(&mut cursor)?;

        // The seek table carries one offset per frame; surplus entries are ignored.
        let mut seek_table = Vec::with_capacity(header.total_frames as usize);
        for _ in 0..header.total_frames {
            seek_table.push(cursor.read_u32()?);
        }
        cursor.skip(u64::from(header.seek_table_entries - header.total_frames) * 4)?;

        let bit_table = if header.file_version < BIT_TABLE_VERSION {
            let mut table = Vec::with_capacity(header.total_frames as usize);
            for _ in 0..header.total_frames {
                table.push(cursor.read_u16()?);
            }
            table
        }
        else {
            Vec::new()
        };

        let frames = build_frames(&header, &seek_table, &bit_table, file_len)?;

        // The decoder configuration FFmpeg's decoder expects.
        let mut codec_init = Vec::with_capacity(6);
        codec_init.extend_from_slice(&header.file_version.to_le_bytes());
        codec_init.extend_from_slice(&header.compression_type.to_le_bytes());
        codec_init.extend_from_slice(&header.format_flags.to_le_bytes());

        let max_frame_size = frames.iter().map(|f| f.size).max().unwrap_or(0);

        let format = TrackFormat::new(0, MIME_AUDIO_APE)
            .with_sample_rate(header.sample_rate)
            .with_channels(u32::from(header.channels))
            .with_max_input_size(max_frame_size + 8)
            .with_codec_init(codec_init.into_boxed_slice());

        sink.track(0, TrackType::Audio).format(&format);
        sink.end_tracks();

        self.duration_us =
            (header.total_blocks() * 1_000_000 / u64::from(header.sample_rate)) as i64;

        debug!(
            "ape: version {} with {} frames, {} blocks per frame",
            header.file_version, header.total_frames, header.blocks_per_frame
        );

        self.frames = frames;
        self.header = Some(header);
        self.state = State::ReadFrames;

        sink.seek_map(&*self);

        let start = self.frames[0].pos;
        if input.position() == start {
            Ok(ReadResult::Continue)
        }
        else {
            Ok(ReadResult::Seek(start))
        }
    }

    fn read_frame(&mut self, input: &mut dyn Input, sink: &mut dyn TrackSink) -> Result<ReadResult> {
        if self.current_frame >= self.frames.len() {
            return Ok(ReadResult::End);
        }

        let frame = self.frames[self.current_frame];

        // Adjacent frames overlap by up-to 4 bytes after alignment; serve the overlap from the
        // cached tail of the previous frame when reading sequentially.
        let mut reuse = 0usize;
        if self.tail_len > 0
            && frame.pos < self.tail_end
            && self.tail_end - frame.pos <= self.tail_len as u64
            && input.position() == self.tail_end
        {
            reuse = (self.tail_end - frame.pos) as usize;
            reuse = reuse.min(frame.size as usize);
        }

        if reuse == 0 && input.position() != frame.pos {
            return Ok(ReadResult::Seek(frame.pos));
        }

        let output = sink.track(0, TrackType::Audio);

        let mut frame_header = [0u8; 8];
        frame_header[0..4].copy_from_slice(&frame.blocks.to_le_bytes());
        frame_header[4..8].copy_from_slice(&frame.skip.to_le_bytes());
        output.sample_data(&frame_header);

        if reuse > 0 {
            output.sample_data(&self.tail[self.tail_len - reuse..self.tail_len]);
        }

        let remaining = frame.size as usize - reuse;
        let tail_len = remaining.min(4);
        let mut stream_left = remaining - tail_len;

        while stream_left > 0 {
            let n = output.sample_input(input, stream_left, false)?;
            if n == 0 {
                return end_of_stream_error();
            }
            stream_left -= n;
        }

        let mut tail = [0u8; 4];
        input.read_fully(&mut tail[..tail_len])?;
        output.sample_data(&tail[..tail_len]);

        if tail_len > 0 {
            self.tail[..tail_len].copy_from_slice(&tail[..tail_len]);
            self.tail_len = tail_len;
            self.tail_end = frame.pos + u64::from(frame.size);
        }

        let mut flags = SampleFlags::KEYFRAME;
        if self.current_frame + 1 == self.frames.len() {
            flags |= SampleFlags::LAST_SAMPLE;
        }

        output.sample_metadata(
            self.frame_time_us(self.current_frame),
            flags,
            frame.size + 8,
            0,
        );

        self.current_frame += 1;
        Ok(ReadResult::Continue)
    }
}

impl Demuxer for ApeReader {
    fn sniff(&mut self, input: &mut dyn Input) -> Result<bool> {
        let mut magic = [0u8; 4];
        input.reset_peek();
        let result = input.peek_fully(&mut magic);
        input.reset_peek();

        match result {
            Ok(()) => Ok(magic == APE_MAGIC || &magic[0..3] == b"ID3"),
            Err(Error::EndOfFile) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn read(&mut self, input: &mut dyn Input, sink: &mut dyn TrackSink) -> Result<ReadResult> {
        match self.state {
            State::ReadHeader => self.read_header_state(input, sink),
            State::ReadFrames => self.read_frame(input, sink),
        }
    }

    fn seek(&mut self, position: u64, time_us: TimeUs) {
        self.tail_len = 0;
        self.tail_end = 0;

        if self.frames.is_empty() {
            return;
        }

        self.current_frame = match self.frames.binary_search_by_key(&position, |f| f.pos) {
            Ok(i) => i,
            Err(_) => self.floor_frame_for_time(time_us),
        };
    }
}

impl SeekMap for ApeReader {
    fn is_seekable(&self) -> bool {
        !self.frames.is_empty()
    }

    fn duration_us(&self) -> TimeUs {
        self.duration_us
    }

    fn seek_points(&self, time_us: TimeUs) -> SeekPoints {
        if self.frames.is_empty() {
            return SeekPoints::one(SeekPoint::new(0, 0));
        }

        let time_us = time_us.clamp(0, self.duration_us.max(0));
        let k = self.floor_frame_for_time(time_us);

        let first = SeekPoint::new(self.frame_time_us(k), self.frames[k].pos);

        if first.time_us == time_us || k + 1 >= self.frames.len() {
            return SeekPoints::one(first);
        }

        let second = SeekPoint::new(self.frame_time_us(k + 1), self.frames[k + 1].pos);
        SeekPoints::two(first, second)
    }
}

/// Reconstructs the frame table from the seek table.
fn build_frames(
    header: &ApeHeader,
    seek_table: &[u32],
    bit_table: &[u16],
    file_len: Option<u64>,
) -> Result<Vec<ApeFrame>> {
    let n = header.total_frames as usize;
    let mut frames = Vec::with_capacity(n);

    frames.push(ApeFrame {
        pos: header.data_offset,
        size: 0,
        blocks: header.blocks_per_frame,
        skip: 0,
        pts: 0,
    });

    for i in 1..n {
        let pos = u64::from(seek_table[i]) + header.junk_length;

        if pos <= frames[i - 1].pos {
            return malformed_error("ape: seek table is not monotonic");
        }

        frames[i - 1].size = (pos - frames[i - 1].pos) as u32;
        frames.push(ApeFrame {
            pos,
            size: 0,
            blocks: header.blocks_per_frame,
            skip: ((pos - frames[0].pos) & 3) as u32,
            pts: i as u64 * u64::from(header.blocks_per_frame),
        });
    }

    frames[n - 1].blocks = header.final_frame_blocks;

    // The final frame's size comes from the file length; with an unknown length, fall back to
    // a conservative per-block estimate.
    let mut final_size = match file_len {
        Some(len) if len > 0 => {
            let mut size =
                len as i64 - frames[n - 1].pos as i64 - i64::from(header.wav_tail_length);
            size -= size & 3;
            size
        }
        _ => 0,
    };
    if final_size <= 0 {
        final_size = i64::from(header.final_frame_blocks) * 8;
    }
    frames[n - 1].size = final_size as u32;

    for frame in frames.iter_mut() {
        if frame.skip != 0 {
            frame.pos -= u64::from(frame.skip);
            frame.size += frame.skip;
        }
        frame.size = (frame.size + 3) & !3;
    }

    // Very old files store the bit offset into the first byte in a trailing table; sizes grow
    // to cover a successor's unaligned start and the skip becomes a bit count.
    if header.file_version < BIT_TABLE_VERSION {
        for i in 0..n {
            if i + 1 < n && bit_table[i + 1] != 0 {
                frames[i].size += 4;
            }
            frames[i].skip = (frames[i].skip << 3) + u32::from(bit_table[i]);
        }
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use reel_core::demux::{Demuxer, ReadResult, SampleFlags, SeekMap};
    use reel_core::io::BufInput;
    use reel_core::sink::CaptureSink;

    use super::{ApeReader, ApeReaderOptions};

    fn put_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Builds a version 3.99 file: descriptor + header + seek table, then frame data filled
    /// with each byte's file offset. Frame starts are spaced `spacing` bytes apart; the last
    /// frame runs to the end of the file.
    fn build_ape(total_frames: u32, spacing: u32, final_frame_blocks: u32) -> Vec<u8> {
        let seek_table_bytes = total_frames * 4;
        let data_offset = 52 + 24 + seek_table_bytes;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"MAC ");
        put_u16(&mut buf, 3990);
        put_u16(&mut buf, 0); // padding
        put_u32(&mut buf, 52); // descriptor bytes
        put_u32(&mut buf, 24); // header bytes
        put_u32(&mut buf, seek_table_bytes);
        put_u32(&mut buf, 0); // wav header bytes
        put_u32(&mut buf, 0); // audio data bytes
        put_u32(&mut buf, 0); // audio data bytes high
        put_u32(&mut buf, 0); // wav tail bytes
        buf.extend_from_slice(&[0u8; 16]); // md5
        put_u16(&mut buf, 2000); // compression
        put_u16(&mut buf, 0); // format flags
        put_u32(&mut buf, 294_912); // blocks per frame
        put_u32(&mut buf, final_frame_blocks);
        put_u32(&mut buf, total_frames);
        put_u16(&mut buf, 16); // bits per sample
        put_u16(&mut buf, 2); // channels
        put_u32(&mut buf, 44_100); // sample rate

        for i in 0..total_frames {
            put_u32(&mut buf, data_offset + i * spacing);
        }
        assert_eq!(buf.len() as u32, data_offset);

        // Frame data: each byte is its own file offset, truncated.
        let end = data_offset + total_frames * spacing;
        for offset in data_offset..end {
            buf.push(offset as u8);
        }

        buf
    }

    fn drive(reader: &mut ApeReader, input: &mut BufInput, sink: &mut CaptureSink) {
        loop {
            match reader.read(input, sink).unwrap() {
                ReadResult::Continue => {}
                ReadResult::Seek(position) => input.seek(position),
                ReadResult::End => break,
            }
        }
    }

    #[test]
    fn verify_reads_all_frames_with_synthesized_headers() {
        let file = build_ape(10, 32, 100_000);
        let data_offset: usize = 52 + 24 + 40;

        let mut input = BufInput::new(file);
        let mut sink = CaptureSink::new();
        let mut reader = ApeReader::new(ApeReaderOptions::default());

        assert!(reader.sniff(&mut input).unwrap());
        drive(&mut reader, &mut input, &mut sink);

        assert!(sink.tracks_ended);
        assert_eq!(sink.seekable, Some(true));

        let track = sink.track_by_id(0).unwrap();
        let format = track.format.as_ref().unwrap();
        assert_eq!(format.mime, "audio/x-ape");
        assert_eq!(format.sample_rate, Some(44_100));
        // Decoder config: file version, compression type, format flags.
        assert_eq!(&format.codec_init[0][..], &[0x96, 0x0f, 0xd0, 0x07, 0x00, 0x00]);

        assert_eq!(track.samples.len(), 10);
        for (i, sample) in track.samples.iter().enumerate() {
            assert_eq!(sample.size, 32 + 8);
            assert!(sample.flags.contains(SampleFlags::KEYFRAME));
            assert_eq!(
                sample.time_us,
                (i as u64 * 294_912 * 1_000_000 / 44_100) as i64
            );

            let bytes = track.sample_bytes(i);
            let blocks = if i == 9 { 100_000u32 } else { 294_912 };
            assert_eq!(&bytes[0..4], &blocks.to_le_bytes());
            assert_eq!(&bytes[4..8], &0u32.to_le_bytes()); // skip
            assert_eq!(bytes[8], (data_offset + i * 32) as u8);
        }

        assert!(track.samples[9].flags.contains(SampleFlags::LAST_SAMPLE));
    }

    #[test]
    fn verify_alignment_overlap_is_served_from_tail_cache() {
        // 30-byte spacing: aligned sizes overlap the next frame's start by up-to 4 bytes and
        // odd deltas produce byte skips.
        let file = build_ape(3, 30, 100_000);
        let data_offset = (52 + 24 + 12) as u64;

        let mut input = BufInput::new(file);
        let mut sink = CaptureSink::new();
        let mut reader = ApeReader::new(ApeReaderOptions::default());

        drive(&mut reader, &mut input, &mut sink);

        let track = sink.track_by_id(0).unwrap();
        assert_eq!(track.samples.len(), 3);

        // Frame 1 starts at delta 30, so it is pulled back 2 bytes and grows to 32.
        assert_eq!(track.samples[0].size, 32 + 8);
        assert_eq!(track.samples[1].size, 32 + 8);
        let bytes = track.sample_bytes(1);
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        // Payload starts at the pulled-back position, served partly from the cached tail.
        assert_eq!(bytes[8], (data_offset + 28) as u8);
        assert_eq!(bytes[9], (data_offset + 29) as u8);
        assert_eq!(bytes[12], (data_offset + 32) as u8);
    }

    #[test]
    fn verify_seek_points_floor_into_frame_samples() {
        let file = build_ape(10, 32, 100_000);
        let data_offset = (52 + 24 + 40) as u64;

        let mut input = BufInput::new(file);
        let mut sink = CaptureSink::new();
        let mut reader = ApeReader::new(ApeReaderOptions::default());

        drive(&mut reader, &mut input, &mut sink);

        // Two seconds is inside frame 0 (one frame spans ~6.7 s at 44.1 kHz).
        let points = reader.seek_points(2_000_000);
        assert_eq!(points.first.time_us, 0);
        assert_eq!(points.first.position, data_offset);
        let second = points.second.expect("successor expected");
        assert_eq!(second.position, data_offset + 32);

        // An exact frame start returns a single point, and seeking there replays from it.
        let t5 = (5u64 * 294_912 * 1_000_000 / 44_100) as i64;
        let points = reader.seek_points(t5);
        assert_eq!(points.first.time_us, t5);
        assert_eq!(points.first.position, data_offset + 5 * 32);
        assert!(points.second.is_none());

        input.seek(points.first.position);
        reader.seek(points.first.position, t5);

        let mut sink = CaptureSink::new();
        drive(&mut reader, &mut input, &mut sink);

        let track = sink.track_by_id(0).unwrap();
        assert_eq!(track.samples.len(), 5);
        assert_eq!(track.samples[0].time_us, t5);
    }

    #[test]
    fn verify_unknown_length_falls_back_to_block_estimate() {
        // With an unknown input length the final frame size cannot be derived from the file;
        // the conservative final_frame_blocks * 8 estimate applies. Known to under-estimate
        // for some profiles; kept for parity until tightened.
        let file = build_ape(2, 32, 4);

        let mut input = BufInput::new_unknown_len(file);
        let mut sink = CaptureSink::new();
        let mut reader = ApeReader::new(ApeReaderOptions::default());

        drive(&mut reader, &mut input, &mut sink);

        let track = sink.track_by_id(0).unwrap();
        assert_eq!(track.samples.len(), 2);
        // final_frame_blocks(4) * 8 = 32 payload bytes.
        assert_eq!(track.samples[1].size, 32 + 8);
    }
}
