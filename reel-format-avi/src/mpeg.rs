// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MPEG audio frame header validation and sizing, as needed to re-synchronize the MP3 chunk
//! reader on frame boundaries inside AVI payload chunks.

/// The length in bytes of a MPEG frame header word.
pub const MPEG_HEADER_LEN: usize = 4;

/// Bit-rate lookup table for MPEG version 1 layer 1.
const BIT_RATES_MPEG1_L1: [u32; 15] = [
    0, 32_000, 64_000, 96_000, 128_000, 160_000, 192_000, 224_000, 256_000, 288_000, 320_000,
    352_000, 384_000, 416_000, 448_000,
];

/// Bit-rate lookup table for MPEG version 1 layer 2.
const BIT_RATES_MPEG1_L2: [u32; 15] = [
    0, 32_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 160_000, 192_000, 224_000,
    256_000, 320_000, 384_000,
];

/// Bit-rate lookup table for MPEG version 1 layer 3.
const BIT_RATES_MPEG1_L3: [u32; 15] = [
    0, 32_000, 40_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 160_000, 192_000,
    224_000, 256_000, 320_000,
];

/// Bit-rate lookup table for MPEG version 2 & 2.5 audio layer 1.
const BIT_RATES_MPEG2_L1: [u32; 15] = [
    0, 32_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000, 128_000, 144_000, 160_000, 176_000,
    192_000, 224_000, 256_000,
];

/// Bit-rate lookup table for MPEG version 2 & 2.5 audio layers 2 & 3.
const BIT_RATES_MPEG2_L23: [u32; 15] = [
    0, 8_000, 16_000, 24_000, 32_000, 40_000, 48_000, 56_000, 64_000, 80_000, 96_000, 112_000,
    128_000, 144_000, 160_000,
];

/// Returns true if the provided frame header word is synced.
#[inline(always)]
pub fn is_frame_header_word_synced(word: u32) -> bool {
    (word & 0xffe0_0000) == 0xffe0_0000
}

/// Quickly check if a synced header word may be the start of a valid frame.
#[inline]
pub fn check_header(word: u32) -> bool {
    // Version (0x1 is not allowed).
    if (word >> 19) & 0x3 == 0x1 {
        return false;
    }
    // Layer (0x0 is not allowed).
    if (word >> 17) & 0x3 == 0x0 {
        return false;
    }
    // Bitrate (0xf is not allowed).
    if (word >> 12) & 0xf == 0xf {
        return false;
    }
    // Sample rate (0x3 is not allowed).
    if (word >> 10) & 0x3 == 0x3 {
        return false;
    }
    true
}

/// The sizing information of one MPEG audio frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    /// The total frame size in bytes, including the 4 header bytes.
    pub size: usize,
    /// The number of audio samples per channel the frame decodes to.
    pub samples_per_frame: u32,
    /// The sample rate in Hz.
    pub sample_rate: u32,
}

/// Parse a synced and checked header word into its frame sizing. Returns `None` for words that
/// do not pass [`check_header`], and for the "free" bit-rate, whose frames carry no size
/// information and therefore cannot be scanned for.
pub fn parse_frame(word: u32) -> Option<FrameInfo> {
    if !is_frame_header_word_synced(word) || !check_header(word) {
        return None;
    }

    // Version: 00 = MPEG 2.5, 10 = MPEG 2, 11 = MPEG 1.
    let version = (word >> 19) & 0x3;
    // Layer: 01 = layer 3, 10 = layer 2, 11 = layer 1.
    let layer = (word >> 17) & 0x3;
    let bitrate_idx = ((word >> 12) & 0xf) as usize;

    if bitrate_idx == 0 {
        return None;
    }
    let sample_rate_idx = (word >> 10) & 0x3;
    let has_padding = (word >> 9) & 0x1 != 0;

    let is_mpeg1 = version == 0b11;

    let bitrate = match (layer, is_mpeg1) {
        (0b11, true) => BIT_RATES_MPEG1_L1[bitrate_idx],
        (0b10, true) => BIT_RATES_MPEG1_L2[bitrate_idx],
        (0b01, true) => BIT_RATES_MPEG1_L3[bitrate_idx],
        (0b11, false) => BIT_RATES_MPEG2_L1[bitrate_idx],
        (_, false) => BIT_RATES_MPEG2_L23[bitrate_idx],
        _ => return None,
    };

    let sample_rate = match (sample_rate_idx, version) {
        (0b00, 0b11) => 44_100,
        (0b01, 0b11) => 48_000,
        (0b10, 0b11) => 32_000,
        (0b00, 0b10) => 22_050,
        (0b01, 0b10) => 24_000,
        (0b10, 0b10) => 16_000,
        (0b00, 0b00) => 11_025,
        (0b01, 0b00) => 12_000,
        (0b10, 0b00) => 8_000,
        _ => return None,
    };

    // Constants provided for size calculation in ISO-11172 section 2.4.3.1. The header states
    // the frame size in "slots": 4 bytes for layer 1, 1 byte otherwise.
    let (factor, slot_size) = match layer {
        0b11 => (12, 4),
        0b10 => (144, 1),
        0b01 if is_mpeg1 => (144, 1),
        0b01 => (72, 1),
        _ => return None,
    };

    let slots = (factor * bitrate / sample_rate) as usize + usize::from(has_padding);
    let size = slots * slot_size;

    let samples_per_frame = match layer {
        0b11 => 384,
        0b10 => 1152,
        _ if is_mpeg1 => 1152,
        _ => 576,
    };

    Some(FrameInfo { size, samples_per_frame, sample_rate })
}
