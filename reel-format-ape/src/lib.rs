// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Monkey's Audio (APE) demuxer.
//!
//! The demuxer reconstructs the per-frame table from the seek table of either header dialect,
//! produces a sample-accurate seek map over it, and emits each compressed frame as a key sample
//! prefixed with the frame header the FFmpeg decoder expects, alongside a matching decoder
//! configuration blob.

mod demuxer;
mod header;

pub use demuxer::{ApeReader, ApeReaderOptions};

pub(crate) const MIME_AUDIO_APE: &str = "audio/x-ape";
