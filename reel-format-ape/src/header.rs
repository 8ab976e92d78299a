// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! APE file header parsing.
//!
//! Two header dialects exist. Files of version 3.98 and later start with a 52-byte descriptor
//! followed by a 24-byte header. Older files carry a single compact header whose
//! blocks-per-frame value is not stored but derived from the version and compression level.

use reel_core::errors::{limit_error, malformed_error, unsupported_error, Result};
use reel_core::io::ByteCursor;

/// APE stream marker.
pub const APE_MAGIC: [u8; 4] = *b"MAC ";

/// The oldest supported format version (3.80).
const MIN_VERSION: u16 = 3800;
/// Versions at or above this use the descriptor + header dialect.
const DESCRIPTOR_VERSION: u16 = 3980;
/// Versions below this store per-frame bit offsets in a table after the seek table.
pub const BIT_TABLE_VERSION: u16 = 3810;

const FLAG_8_BIT: u16 = 1;
const FLAG_HAS_PEAK_LEVEL: u16 = 4;
const FLAG_24_BIT: u16 = 8;
const FLAG_HAS_SEEK_ELEMENTS: u16 = 16;

/// The parsed APE header, normalized across both dialects.
#[derive(Clone, Debug)]
pub struct ApeHeader {
    pub file_version: u16,
    pub compression_type: u16,
    pub format_flags: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub blocks_per_frame: u32,
    pub final_frame_blocks: u32,
    pub total_frames: u32,
    pub wav_tail_length: u32,
    pub seek_table_entries: u32,
    /// Bytes preceding the stream marker (an ID3v2 tag, usually).
    pub junk_length: u64,
    /// Absolute file offset of the first frame's data.
    pub data_offset: u64,
}

impl ApeHeader {
    /// The total number of audio blocks of the stream.
    pub fn total_blocks(&self) -> u64 {
        if self.total_frames == 0 {
            return 0;
        }
        u64::from(self.total_frames - 1) * u64::from(self.blocks_per_frame)
            + u64::from(self.final_frame_blocks)
    }
}

/// Parses the header from the start of the stream. The cursor is left positioned at the first
/// seek table entry.
pub fn read_header(cursor: &mut ByteCursor<'_>) -> Result<ApeHeader> {
    // An ID3v2 tag may precede the stream marker; skip it by its syncsafe length.
    let mut junk_length = 0u64;
    let mut magic = cursor.read_quad_bytes()?;

    if &magic[0..3] == b"ID3" {
        let mut id3 = [0u8; 6];
        cursor.read_buf_exact(&mut id3)?;
        let size = (u64::from(id3[2]) << 21)
            | (u64::from(id3[3]) << 14)
            | (u64::from(id3[4]) << 7)
            | u64::from(id3[5]);
        cursor.skip(size)?;
        junk_length = 10 + size;
        magic = cursor.read_quad_bytes()?;
    }

    if magic != APE_MAGIC {
        return malformed_error("ape: missing MAC stream marker");
    }

    let file_version = cursor.read_u16()?;

    if file_version < MIN_VERSION {
        return unsupported_error("ape: format version is too old");
    }

    let header = if file_version >= DESCRIPTOR_VERSION {
        read_descriptor_header(cursor, file_version, junk_length)?
    }
    else {
        read_legacy_header(cursor, file_version, junk_length)?
    };

    if header.total_frames == 0 {
        return malformed_error("ape: no frames");
    }
    if header.total_frames > u32::MAX / 32 {
        return limit_error("ape: too many frames");
    }
    if header.seek_table_entries < header.total_frames {
        return malformed_error("ape: seek table does not cover all frames");
    }
    if header.sample_rate == 0 {
        return malformed_error("ape: invalid sample rate");
    }

    Ok(header)
}

fn read_descriptor_header(
    cursor: &mut ByteCursor<'_>,
    file_version: u16,
    junk_length: u64,
) -> Result<ApeHeader> {
    let _padding = cursor.read_u16()?;
    let descriptor_bytes = cursor.read_u32()?;
    let header_bytes = cursor.read_u32()?;
    let seek_table_bytes = cursor.read_u32()?;
    let wav_header_bytes = cursor.read_u32()?;
    let _audio_data_bytes = cursor.read_u32()?;
    let _audio_data_bytes_high = cursor.read_u32()?;
    let wav_tail_length = cursor.read_u32()?;

    let mut md5 = [0u8; 16];
    cursor.read_buf_exact(&mut md5)?;

    if descriptor_bytes < 52 {
        return malformed_error("ape: descriptor is too small");
    }
    // Skip descriptor extensions.
    cursor.skip(u64::from(descriptor_bytes - 52))?;

    if header_bytes < 24 {
        return malformed_error("ape: header is too small");
    }

    let compression_type = cursor.read_u16()?;
    let format_flags = cursor.read_u16()?;
    let blocks_per_frame = cursor.read_u32()?;
    let final_frame_blocks = cursor.read_u32()?;
    let total_frames = cursor.read_u32()?;
    let bits_per_sample = cursor.read_u16()?;
    let channels = cursor.read_u16()?;
    let sample_rate = cursor.read_u32()?;

    cursor.skip(u64::from(header_bytes - 24))?;

    let data_offset = junk_length
        + u64::from(descriptor_bytes)
        + u64::from(header_bytes)
        + u64::from(seek_table_bytes)
        + u64::from(wav_header_bytes);

    Ok(ApeHeader {
        file_version,
        compression_type,
        format_flags,
        channels,
        sample_rate,
        bits_per_sample,
        blocks_per_frame,
        final_frame_blocks,
        total_frames,
        wav_tail_length,
        seek_table_entries: seek_table_bytes / 4,
        junk_length,
        data_offset,
    })
}

fn read_legacy_header(
    cursor: &mut ByteCursor<'_>,
    file_version: u16,
    junk_length: u64,
) -> Result<ApeHeader> {
    let compression_type = cursor.read_u16()?;
    let format_flags = cursor.read_u16()?;
    let channels = cursor.read_u16()?;
    let sample_rate = cursor.read_u32()?;
    let wav_header_bytes = cursor.read_u32()?;
    let wav_tail_length = cursor.read_u32()?;
    let total_frames = cursor.read_u32()?;
    let final_frame_blocks = cursor.read_u32()?;

    // Magic (4) + version (2) + the fixed fields (26).
    let mut header_length = 32u64;

    if format_flags & FLAG_HAS_PEAK_LEVEL != 0 {
        cursor.skip(4)?;
        header_length += 4;
    }

    let seek_table_entries = if format_flags & FLAG_HAS_SEEK_ELEMENTS != 0 {
        header_length += 4;
        cursor.read_u32()?
    }
    else {
        total_frames
    };

    let bits_per_sample = if format_flags & FLAG_8_BIT != 0 {
        8
    }
    else if format_flags & FLAG_24_BIT != 0 {
        24
    }
    else {
        16
    };

    let blocks_per_frame = if file_version >= 3950 {
        73_728 * 4
    }
    else if file_version >= 3900 || (file_version >= 3800 && compression_type >= 4000) {
        73_728
    }
    else {
        9_216
    };

    // The seek table, the per-frame bit table of very old files, and any RIFF header precede
    // the frame data.
    let mut data_offset = junk_length
        + header_length
        + u64::from(seek_table_entries) * 4
        + u64::from(wav_header_bytes);
    if file_version < BIT_TABLE_VERSION {
        data_offset += u64::from(total_frames) * 2;
    }

    Ok(ApeHeader {
        file_version,
        compression_type,
        format_flags,
        channels,
        sample_rate,
        bits_per_sample,
        blocks_per_frame,
        final_frame_blocks,
        total_frames,
        wav_tail_length,
        seek_table_entries,
        junk_length,
        data_offset,
    })
}

#[cfg(test)]
mod tests {
    use reel_core::io::{BufInput, ByteCursor};

    use super::*;

    fn put_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn verify_descriptor_dialect() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"MAC ");
        put_u16(&mut buf, 3990);
        put_u16(&mut buf, 0); // padding
        put_u32(&mut buf, 52); // descriptor bytes
        put_u32(&mut buf, 24); // header bytes
        put_u32(&mut buf, 40); // seek table bytes
        put_u32(&mut buf, 0); // wav header bytes
        put_u32(&mut buf, 0); // audio data bytes
        put_u32(&mut buf, 0); // audio data bytes high
        put_u32(&mut buf, 0); // wav tail bytes
        buf.extend_from_slice(&[0u8; 16]); // md5
        put_u16(&mut buf, 2000); // compression
        put_u16(&mut buf, 0); // flags
        put_u32(&mut buf, 294_912); // blocks per frame
        put_u32(&mut buf, 100_000); // final frame blocks
        put_u32(&mut buf, 10); // total frames
        put_u16(&mut buf, 16); // bits per sample
        put_u16(&mut buf, 2); // channels
        put_u32(&mut buf, 44_100); // sample rate

        let mut input = BufInput::new(buf);
        let mut cursor = ByteCursor::new(&mut input);

        let header = read_header(&mut cursor).unwrap();
        assert_eq!(header.file_version, 3990);
        assert_eq!(header.blocks_per_frame, 294_912);
        assert_eq!(header.seek_table_entries, 10);
        assert_eq!(header.data_offset, 52 + 24 + 40);
        assert_eq!(header.total_blocks(), 9 * 294_912 + 100_000);
        assert_eq!(cursor.pos(), 52 + 24);
    }

    #[test]
    fn verify_legacy_dialect_blocks_per_frame_table() {
        let build = |version: u16, compression: u16| {
            let mut buf = Vec::new();
            buf.extend_from_slice(b"MAC ");
            put_u16(&mut buf, version);
            put_u16(&mut buf, compression);
            put_u16(&mut buf, 0); // flags
            put_u16(&mut buf, 2); // channels
            put_u32(&mut buf, 44_100);
            put_u32(&mut buf, 0); // wav header bytes
            put_u32(&mut buf, 0); // wav tail bytes
            put_u32(&mut buf, 3); // total frames
            put_u32(&mut buf, 100); // final frame blocks
            buf
        };

        let mut input = BufInput::new(build(3950, 2000));
        let header = read_header(&mut ByteCursor::new(&mut input)).unwrap();
        assert_eq!(header.blocks_per_frame, 73_728 * 4);

        let mut input = BufInput::new(build(3900, 1000));
        let header = read_header(&mut ByteCursor::new(&mut input)).unwrap();
        assert_eq!(header.blocks_per_frame, 73_728);

        let mut input = BufInput::new(build(3800, 4000));
        let header = read_header(&mut ByteCursor::new(&mut input)).unwrap();
        assert_eq!(header.blocks_per_frame, 73_728);

        let mut input = BufInput::new(build(3800, 2000));
        let header = read_header(&mut ByteCursor::new(&mut input)).unwrap();
        assert_eq!(header.blocks_per_frame, 9_216);

        // Legacy data offset: 32-byte header, 3 seek entries, and for pre-3810 files a
        // two-byte-per-frame bit table.
        assert_eq!(header.data_offset, 32 + 3 * 4 + 3 * 2);
    }

    #[test]
    fn verify_id3_preamble_is_skipped() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"ID3\x04\x00\x00");
        buf.extend_from_slice(&[0, 0, 0, 8]); // syncsafe size: 8 bytes of tag body
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(b"MAC ");
        put_u16(&mut buf, 3950);
        // Legacy fields.
        put_u16(&mut buf, 2000);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 2);
        buf.extend_from_slice(&44_100u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&100u32.to_le_bytes());

        let mut input = BufInput::new(buf);
        let header = read_header(&mut ByteCursor::new(&mut input)).unwrap();
        assert_eq!(header.junk_length, 18);
        assert_eq!(header.file_version, 3950);
    }

    #[test]
    fn verify_old_versions_are_unsupported() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"MAC ");
        put_u16(&mut buf, 3500);

        let mut input = BufInput::new(buf);
        assert!(read_header(&mut ByteCursor::new(&mut input)).is_err());
    }
}
