// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `sink` module provides [`CaptureSink`], an in-memory [`TrackSink`] that records
//! everything pushed into it. It backs the format crates' tests and is useful for hosts that
//! want to inspect a whole file.

use crate::demux::{SampleFlags, SeekMap, TimeUs, TrackFormat, TrackOutput, TrackSink, TrackType};
use crate::errors::Result;
use crate::io::Input;

/// The committed metadata of one sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CaptureSample {
    pub time_us: TimeUs,
    pub flags: SampleFlags,
    pub size: u32,
    pub offset: u32,
}

/// One recorded track: its format, the concatenated payload bytes, and per-sample metadata.
#[derive(Default)]
pub struct CaptureTrack {
    pub id: u32,
    pub track_type: Option<TrackType>,
    pub format: Option<TrackFormat>,
    pub data: Vec<u8>,
    pub samples: Vec<CaptureSample>,
}

impl CaptureTrack {
    /// The payload bytes of sample `i`, sliced out of the recorded byte stream.
    pub fn sample_bytes(&self, i: usize) -> &[u8] {
        let mut end = self.data.len();
        for sample in self.samples[i + 1..].iter() {
            // Not recoverable for samples committed with a trailing offset.
            debug_assert_eq!(sample.offset, 0);
            end -= sample.size as usize;
        }
        let start = end - self.samples[i].size as usize;
        &self.data[start..end]
    }
}

impl TrackOutput for CaptureTrack {
    fn format(&mut self, format: &TrackFormat) {
        self.format = Some(format.clone());
    }

    fn sample_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    fn sample_input(
        &mut self,
        input: &mut dyn Input,
        len: usize,
        _allow_end_of_input: bool,
    ) -> Result<usize> {
        let start = self.data.len();
        self.data.resize(start + len, 0);
        let n = input.read(&mut self.data[start..])?;
        self.data.truncate(start + n);
        Ok(n)
    }

    fn sample_metadata(&mut self, time_us: TimeUs, flags: SampleFlags, size: u32, offset: u32) {
        self.samples.push(CaptureSample { time_us, flags, size, offset });
    }
}

/// An in-memory [`TrackSink`] recording formats, sample bytes, sample metadata, and the
/// published seek-map summary.
#[derive(Default)]
pub struct CaptureSink {
    pub tracks: Vec<CaptureTrack>,
    pub tracks_ended: bool,
    /// `Some` once a seek map was published; the value is its seekability.
    pub seekable: Option<bool>,
    pub duration_us: TimeUs,
}

impl CaptureSink {
    pub fn new() -> Self {
        Default::default()
    }

    /// Get the recorded track with the given ID, if any.
    pub fn track_by_id(&self, id: u32) -> Option<&CaptureTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

impl TrackSink for CaptureSink {
    fn track(&mut self, id: u32, track_type: TrackType) -> &mut dyn TrackOutput {
        if let Some(i) = self.tracks.iter().position(|t| t.id == id) {
            return &mut self.tracks[i];
        }

        self.tracks.push(CaptureTrack {
            id,
            track_type: Some(track_type),
            ..Default::default()
        });
        self.tracks.last_mut().unwrap()
    }

    fn end_tracks(&mut self) {
        self.tracks_ended = true;
    }

    fn seek_map(&mut self, seek_map: &dyn SeekMap) {
        self.seekable = Some(seek_map.is_seekable());
        self.duration_us = seek_map.duration_us();
    }
}
