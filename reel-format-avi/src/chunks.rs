// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-format parsers for the chunks of the `hdrl` header list and the OpenDML index chunks.
//!
//! Every parser consumes exactly `len` bytes of chunk body from the cursor, skipping trailing
//! fields it does not use, so callers can rely on the cursor position afterwards.

use reel_core::errors::{limit_error, malformed_error, Result};
use reel_core::io::ByteCursor;

use crate::FourCc;

/// `avih` flag: the file has a legacy `idx1` index.
pub const AVIF_HAS_INDEX: u32 = 0x10;

/// The main AVI header carried by the `avih` chunk.
#[derive(Copy, Clone, Debug)]
pub struct AviMainHeader {
    /// Duration of a video frame in microseconds.
    pub micros_per_frame: u32,
    pub flags: u32,
    pub total_frames: u32,
    pub streams: u32,
}

impl AviMainHeader {
    pub fn read(cursor: &mut ByteCursor<'_>, len: u32) -> Result<AviMainHeader> {
        if len < 32 {
            return malformed_error("avi: avih chunk too small");
        }

        let micros_per_frame = cursor.read_u32()?;
        let _max_bytes_per_sec = cursor.read_u32()?;
        let _padding_granularity = cursor.read_u32()?;
        let flags = cursor.read_u32()?;
        let total_frames = cursor.read_u32()?;
        let _initial_frames = cursor.read_u32()?;
        let streams = cursor.read_u32()?;
        let _suggested_buffer_size = cursor.read_u32()?;

        cursor.skip(u64::from(len - 32))?;

        Ok(AviMainHeader { micros_per_frame, flags, total_frames, streams })
    }

    pub fn has_index(&self) -> bool {
        self.flags & AVIF_HAS_INDEX != 0
    }
}

/// A stream header carried by a `strh` chunk.
#[derive(Copy, Clone, Debug)]
pub struct AviStreamHeader {
    pub stream_type: FourCc,
    pub handler: FourCc,
    pub initial_frames: u32,
    pub scale: u32,
    pub rate: u32,
    /// The number of payload chunks of the stream.
    pub length: u32,
    pub suggested_buffer_size: u32,
}

impl AviStreamHeader {
    pub fn read(cursor: &mut ByteCursor<'_>, len: u32) -> Result<AviStreamHeader> {
        if len < 40 {
            return malformed_error("avi: strh chunk too small");
        }

        let stream_type = cursor.read_quad_bytes()?;
        let handler = cursor.read_quad_bytes()?;
        let _flags = cursor.read_u32()?;
        let _priority = cursor.read_u16()?;
        let _language = cursor.read_u16()?;
        let initial_frames = cursor.read_u32()?;
        let scale = cursor.read_u32()?;
        let rate = cursor.read_u32()?;
        let _start = cursor.read_u32()?;
        let length = cursor.read_u32()?;
        let suggested_buffer_size = cursor.read_u32()?;

        cursor.skip(u64::from(len - 40))?;

        Ok(AviStreamHeader {
            stream_type,
            handler,
            initial_frames,
            scale,
            rate,
            length,
            suggested_buffer_size,
        })
    }

    /// The duration of the stream in microseconds, derived from the chunk count and the
    /// rate/scale pair.
    pub fn duration_us(&self) -> i64 {
        if self.rate == 0 {
            return 0;
        }
        (u64::from(self.length) * u64::from(self.scale) * 1_000_000 / u64::from(self.rate)) as i64
    }

    /// The frame rate in frames per second.
    pub fn frame_rate(&self) -> f64 {
        if self.scale == 0 {
            return 0.0;
        }
        f64::from(self.rate) / f64::from(self.scale)
    }
}

/// The `strf` chunk of a video stream (a BITMAPINFOHEADER).
#[derive(Copy, Clone, Debug)]
pub struct VideoFormat {
    pub width: i32,
    pub height: i32,
    pub compression: FourCc,
}

impl VideoFormat {
    pub fn read(cursor: &mut ByteCursor<'_>, len: u32) -> Result<VideoFormat> {
        if len < 20 {
            return malformed_error("avi: video strf chunk too small");
        }

        let _size = cursor.read_u32()?;
        let width = cursor.read_i32()?;
        let height = cursor.read_i32()?;
        let _planes = cursor.read_u16()?;
        let _bit_count = cursor.read_u16()?;
        let compression = cursor.read_quad_bytes()?;

        cursor.skip(u64::from(len - 20))?;

        Ok(VideoFormat { width, height, compression })
    }
}

/// The `strf` chunk of an audio stream (a WAVEFORMATEX).
#[derive(Clone, Debug)]
pub struct AudioFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub bits_per_sample: u16,
    /// The codec-specific bytes trailing the fixed fields.
    pub codec_data: Box<[u8]>,
}

impl AudioFormat {
    pub fn read(cursor: &mut ByteCursor<'_>, len: u32) -> Result<AudioFormat> {
        if len < 16 {
            return malformed_error("avi: audio strf chunk too small");
        }

        let format_tag = cursor.read_u16()?;
        let channels = cursor.read_u16()?;
        let sample_rate = cursor.read_u32()?;
        let avg_bytes_per_sec = cursor.read_u32()?;
        let _block_align = cursor.read_u16()?;
        let bits_per_sample = cursor.read_u16()?;

        let mut remaining = len - 16;

        let codec_data = if remaining >= 2 {
            let cb_size = cursor.read_u16()?;
            remaining -= 2;
            let take = u32::from(cb_size).min(remaining);
            remaining -= take;
            cursor.read_boxed_slice_exact(take as usize)?
        }
        else {
            Box::default()
        };

        cursor.skip(u64::from(remaining))?;

        Ok(AudioFormat {
            format_tag,
            channels,
            sample_rate,
            avg_bytes_per_sec,
            bits_per_sample,
            codec_data,
        })
    }
}

/// WAVEFORMATEX format tags the demuxer recognizes.
pub const WAVE_FORMAT_MPEGLAYER3: u16 = 0x0055;
pub const WAVE_FORMAT_AC3: u16 = 0x2000;

const INDEX_OF_INDEXES: u8 = 0x00;
const INDEX_OF_CHUNKS: u8 = 0x01;

/// A row of an OpenDML super-index: the location and presentation span of one `ix##` segment
/// index chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SuperIndexEntry {
    /// Absolute file offset of the segment index chunk header.
    pub offset: u64,
    /// Byte size of the segment index chunk.
    pub size: u32,
    /// Presentation span of the segment in muxer-defined ticks.
    pub duration: u32,
}

/// An OpenDML `indx` super-index chunk.
#[derive(Clone, Debug)]
pub struct SuperIndexChunk {
    pub chunk_id: FourCc,
    pub entries: Vec<SuperIndexEntry>,
}

/// An OpenDML standard (segment) index chunk, from an `ix##` chunk in `movi` or an `indx` chunk
/// of type `AVI_INDEX_OF_CHUNKS` in `hdrl`.
#[derive(Clone, Debug)]
pub struct StandardIndexChunk {
    pub chunk_id: FourCc,
    pub base_offset: u64,
    /// Payload offsets relative to `base_offset`.
    offsets: Vec<u32>,
    /// Sizes; bit 31 set marks a non-key frame.
    sizes: Vec<u32>,
}

impl StandardIndexChunk {
    pub fn entry_count(&self) -> usize {
        self.offsets.len()
    }

    /// Absolute file offset of the chunk header of entry `i`. The stored offset points at the
    /// chunk payload, so the header starts 8 bytes earlier.
    pub fn chunk_header_offset(&self, i: usize) -> u64 {
        self.base_offset + u64::from(self.offsets[i]) - 8
    }

    pub fn chunk_size(&self, i: usize) -> u32 {
        self.sizes[i] & 0x7fff_ffff
    }

    pub fn is_key_frame(&self, i: usize) -> bool {
        self.sizes[i] & 0x8000_0000 == 0
    }
}

/// An OpenDML index chunk of either tier.
#[derive(Clone, Debug)]
pub enum IndexChunk {
    Super(SuperIndexChunk),
    Standard(StandardIndexChunk),
}

impl IndexChunk {
    pub fn read(cursor: &mut ByteCursor<'_>, len: u32) -> Result<IndexChunk> {
        if len < 24 {
            return malformed_error("avi: index chunk too small");
        }

        let longs_per_entry = cursor.read_u16()?;
        let _sub_type = cursor.read_u8()?;
        let index_type = cursor.read_u8()?;
        let entries_in_use = cursor.read_u32()?;
        let chunk_id = cursor.read_quad_bytes()?;

        match index_type {
            INDEX_OF_INDEXES => {
                if longs_per_entry != 4 {
                    return malformed_error("avi: invalid super index entry stride");
                }

                // Three reserved dwords precede the entries.
                cursor.skip(12)?;

                if u64::from(entries_in_use) * 16 > u64::from(len - 24) {
                    return limit_error("avi: super index entry count exceeds chunk");
                }

                let mut entries = Vec::with_capacity(entries_in_use as usize);

                for _ in 0..entries_in_use {
                    let offset = cursor.read_u64()?;
                    let size = cursor.read_u32()?;
                    let duration = cursor.read_u32()?;
                    entries.push(SuperIndexEntry { offset, size, duration });
                }

                cursor.skip(u64::from(len - 24 - 16 * entries_in_use))?;

                Ok(IndexChunk::Super(SuperIndexChunk { chunk_id, entries }))
            }
            INDEX_OF_CHUNKS => {
                if longs_per_entry != 2 {
                    return malformed_error("avi: invalid standard index entry stride");
                }

                let base_offset = cursor.read_u64()?;
                let _reserved = cursor.read_u32()?;

                if u64::from(entries_in_use) * 8 > u64::from(len - 24) {
                    return limit_error("avi: standard index entry count exceeds chunk");
                }

                let mut offsets = Vec::with_capacity(entries_in_use as usize);
                let mut sizes = Vec::with_capacity(entries_in_use as usize);

                for _ in 0..entries_in_use {
                    offsets.push(cursor.read_u32()?);
                    sizes.push(cursor.read_u32()?);
                }

                cursor.skip(u64::from(len - 24 - 8 * entries_in_use))?;

                Ok(IndexChunk::Standard(StandardIndexChunk {
                    chunk_id,
                    base_offset,
                    offsets,
                    sizes,
                }))
            }
            _ => malformed_error("avi: unknown index chunk type"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use reel_core::io::{BufInput, ByteCursor};

    use super::*;

    pub fn put_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Serializes a standard index chunk body for a stream, as found in an `ix##` chunk.
    pub fn build_standard_index(
        chunk_id: [u8; 4],
        base_offset: u64,
        entries: &[(u32, u32, bool)],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u16(&mut buf, 2); // longs per entry
        buf.push(0); // sub type
        buf.push(0x01); // AVI_INDEX_OF_CHUNKS
        put_u32(&mut buf, entries.len() as u32);
        buf.extend_from_slice(&chunk_id);
        put_u64(&mut buf, base_offset);
        put_u32(&mut buf, 0); // reserved
        for &(offset, size, key) in entries {
            put_u32(&mut buf, offset);
            put_u32(&mut buf, if key { size } else { size | 0x8000_0000 });
        }
        buf
    }

    /// Serializes a super index chunk body, as found in an `indx` chunk.
    pub fn build_super_index(chunk_id: [u8; 4], entries: &[(u64, u32, u32)]) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u16(&mut buf, 4); // longs per entry
        buf.push(0); // sub type
        buf.push(0x00); // AVI_INDEX_OF_INDEXES
        put_u32(&mut buf, entries.len() as u32);
        buf.extend_from_slice(&chunk_id);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, 0);
        for &(offset, size, duration) in entries {
            put_u64(&mut buf, offset);
            put_u32(&mut buf, size);
            put_u32(&mut buf, duration);
        }
        buf
    }

    #[test]
    fn verify_read_super_index() {
        let body = build_super_index(*b"00dc", &[(1024, 256, 500), (65536, 256, 500)]);
        let len = body.len() as u32;

        let mut input = BufInput::new(body);
        let mut cursor = ByteCursor::new(&mut input);

        match IndexChunk::read(&mut cursor, len).unwrap() {
            IndexChunk::Super(super_index) => {
                assert_eq!(super_index.chunk_id, *b"00dc");
                assert_eq!(
                    super_index.entries,
                    vec![
                        SuperIndexEntry { offset: 1024, size: 256, duration: 500 },
                        SuperIndexEntry { offset: 65536, size: 256, duration: 500 },
                    ]
                );
            }
            _ => panic!("expected super index"),
        }
    }

    #[test]
    fn verify_read_standard_index() {
        let body =
            build_standard_index(*b"00dc", 2048, &[(8, 100, true), (112, 100, false)]);
        let len = body.len() as u32;

        let mut input = BufInput::new(body);
        let mut cursor = ByteCursor::new(&mut input);

        match IndexChunk::read(&mut cursor, len).unwrap() {
            IndexChunk::Standard(index) => {
                assert_eq!(index.entry_count(), 2);
                assert_eq!(index.chunk_header_offset(0), 2048);
                assert_eq!(index.chunk_header_offset(1), 2152);
                assert!(index.is_key_frame(0));
                assert!(!index.is_key_frame(1));
                assert_eq!(index.chunk_size(1), 100);
            }
            _ => panic!("expected standard index"),
        }
    }

    #[test]
    fn verify_bad_super_index_stride_is_malformed() {
        let mut body = build_super_index(*b"00dc", &[(1024, 256, 500)]);
        body[0] = 3; // corrupt longs-per-entry
        let len = body.len() as u32;

        let mut input = BufInput::new(body);
        let mut cursor = ByteCursor::new(&mut input);

        assert!(IndexChunk::read(&mut cursor, len).is_err());
    }

    #[test]
    fn verify_read_main_and_stream_headers() {
        let mut avih = Vec::new();
        put_u32(&mut avih, 40_000); // micros per frame
        put_u32(&mut avih, 0);
        put_u32(&mut avih, 0);
        put_u32(&mut avih, AVIF_HAS_INDEX);
        put_u32(&mut avih, 250); // total frames
        put_u32(&mut avih, 0);
        put_u32(&mut avih, 1); // streams
        put_u32(&mut avih, 0);
        put_u32(&mut avih, 320); // width, skipped
        put_u32(&mut avih, 240); // height, skipped

        let len = avih.len() as u32;
        let mut input = BufInput::new(avih);
        let mut cursor = ByteCursor::new(&mut input);

        let main = AviMainHeader::read(&mut cursor, len).unwrap();
        assert!(main.has_index());
        assert_eq!(main.total_frames, 250);
        assert_eq!(cursor.pos(), u64::from(len));

        let mut strh = Vec::new();
        strh.extend_from_slice(b"vids");
        strh.extend_from_slice(b"xvid");
        put_u32(&mut strh, 0); // flags
        put_u16(&mut strh, 0); // priority
        put_u16(&mut strh, 0); // language
        put_u32(&mut strh, 0); // initial frames
        put_u32(&mut strh, 1); // scale
        put_u32(&mut strh, 25); // rate
        put_u32(&mut strh, 0); // start
        put_u32(&mut strh, 250); // length
        put_u32(&mut strh, 4096); // suggested buffer size

        let len = strh.len() as u32;
        let mut input = BufInput::new(strh);
        let mut cursor = ByteCursor::new(&mut input);

        let header = AviStreamHeader::read(&mut cursor, len).unwrap();
        assert_eq!(header.stream_type, *b"vids");
        assert_eq!(header.length, 250);
        assert_eq!(header.duration_us(), 10_000_000);
        assert_eq!(header.frame_rate(), 25.0);
    }
}
