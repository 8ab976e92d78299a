// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `demux` module provides the traits and support structures necessary to implement media
//! demuxers.
//!
//! A [`Demuxer`] is driven by the host through repeated calls to [`Demuxer::read`]. Each call
//! performs a bounded amount of work against the provided [`Input`] and either continues, asks
//! the host to reposition the input, or signals the end of the media. Samples and their metadata
//! are pushed into a host-provided [`TrackSink`].

use bitflags::bitflags;

use crate::errors::Result;
use crate::io::Input;

/// A timestamp or duration in microseconds.
pub type TimeUs = i64;

/// The track type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// An audio track.
    Audio,
    /// A video track.
    Video,
}

/// The PCM sample encoding of a raw audio track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PcmEncoding {
    /// Unsigned 8-bit samples.
    U8,
    /// Signed 16-bit little-endian samples.
    S16Le,
    /// Signed 24-bit little-endian samples.
    S24Le,
    /// Signed 32-bit little-endian samples.
    S32Le,
}

bitflags! {
    /// Flags attached to a sample through [`TrackOutput::sample_metadata`].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SampleFlags: u32 {
        /// The sample is a key frame (a decode can start here).
        const KEYFRAME    = 1 << 0;
        /// The sample is known to be the last sample of the track.
        const LAST_SAMPLE = 1 << 1;
    }
}

/// `TrackFormat` describes one track of a container to the sink.
#[derive(Clone, Debug, Default)]
pub struct TrackFormat {
    /// A container-unique identifier for the track.
    pub id: u32,
    /// The sample MIME type.
    pub mime: &'static str,
    /// An RFC 6381 codecs string, if known.
    pub codecs: Option<String>,
    /// A human-readable track label, if the container carries one.
    pub label: Option<String>,
    /// The audio sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// The audio channel count.
    pub channels: Option<u32>,
    /// The PCM sample encoding for raw audio.
    pub pcm_encoding: Option<PcmEncoding>,
    /// The average bitrate in bits per second.
    pub average_bitrate: Option<u32>,
    /// The maximum size of a single sample in bytes, if the container advertises one.
    pub max_input_size: Option<u32>,
    /// The video frame rate in frames per second.
    pub frame_rate: Option<f64>,
    /// Codec initialization data blobs.
    pub codec_init: Vec<Box<[u8]>>,
}

impl TrackFormat {
    /// Instantiate a new format for the track with the given ID and MIME type.
    pub fn new(id: u32, mime: &'static str) -> Self {
        TrackFormat { id, mime, ..Default::default() }
    }

    /// Provide the track label.
    pub fn with_label(mut self, label: String) -> Self {
        self.label = Some(label);
        self
    }

    /// Provide the audio sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Provide the audio channel count.
    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Provide the PCM sample encoding.
    pub fn with_pcm_encoding(mut self, encoding: PcmEncoding) -> Self {
        self.pcm_encoding = Some(encoding);
        self
    }

    /// Provide the average bitrate.
    pub fn with_average_bitrate(mut self, bitrate: u32) -> Self {
        self.average_bitrate = Some(bitrate);
        self
    }

    /// Provide the maximum single-sample size.
    pub fn with_max_input_size(mut self, size: u32) -> Self {
        self.max_input_size = Some(size);
        self
    }

    /// Provide the video frame rate.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Append a codec initialization data blob.
    pub fn with_codec_init(mut self, data: Box<[u8]>) -> Self {
        self.codec_init.push(data);
        self
    }
}

/// `TrackOutput` receives the format, sample payloads, and sample metadata of a single track.
///
/// Sample payload bytes arrive through any number of `sample_data`/`sample_input` calls and are
/// committed by a single `sample_metadata` call carrying the timing and flags of the completed
/// sample.
pub trait TrackOutput {
    /// Provide the track format.
    fn format(&mut self, format: &TrackFormat);

    /// Append memory-backed sample payload bytes.
    fn sample_data(&mut self, data: &[u8]);

    /// Append up-to `len` sample payload bytes streamed directly from the input. Returns the
    /// number of bytes consumed, or `Ok(0)` at the end of the input when `allow_end_of_input`
    /// is set.
    fn sample_input(
        &mut self,
        input: &mut dyn Input,
        len: usize,
        allow_end_of_input: bool,
    ) -> Result<usize>;

    /// Commit a sample. `size` counts all payload bytes of the sample; `offset` is the number of
    /// already-appended bytes that trail the sample (usually zero).
    fn sample_metadata(&mut self, time_us: TimeUs, flags: SampleFlags, size: u32, offset: u32);
}

/// `TrackSink` is the downstream consumer of a demuxer.
pub trait TrackSink {
    /// Get (creating on first use) the output for the track with the given ID.
    fn track(&mut self, id: u32, track_type: TrackType) -> &mut dyn TrackOutput;

    /// Called when no further tracks will be announced.
    fn end_tracks(&mut self);

    /// Publish the seek map. The sink may inspect the map during the call; hosts requiring seek
    /// points later re-query them through the demuxer, which implements [`SeekMap`] itself.
    fn seek_map(&mut self, seek_map: &dyn SeekMap);
}

/// A `SeekPoint` maps a presentation timestamp to a byte position of the media.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    /// The media time of the seek point.
    pub time_us: TimeUs,
    /// The byte offset of the seek point.
    pub position: u64,
}

impl SeekPoint {
    pub fn new(time_us: TimeUs, position: u64) -> Self {
        SeekPoint { time_us, position }
    }
}

/// One or two [`SeekPoint`]s straddling a requested seek time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekPoints {
    /// The seek point at or before the requested time.
    pub first: SeekPoint,
    /// The seek point after the requested time, when the first point is not exact and a
    /// successor exists.
    pub second: Option<SeekPoint>,
}

impl SeekPoints {
    /// A single, possibly exact, seek point.
    pub fn one(point: SeekPoint) -> Self {
        SeekPoints { first: point, second: None }
    }

    /// Two seek points straddling the requested time.
    pub fn two(first: SeekPoint, second: SeekPoint) -> Self {
        SeekPoints { first, second: Some(second) }
    }
}

/// A `SeekMap` resolves media times to byte positions.
pub trait SeekMap {
    /// Returns true if the media supports seeking.
    fn is_seekable(&self) -> bool;

    /// The duration of the media in microseconds.
    fn duration_us(&self) -> TimeUs;

    /// Get the seek points for the requested time.
    fn seek_points(&self, time_us: TimeUs) -> SeekPoints;
}

/// An unseekable [`SeekMap`] that only carries a duration. Every query resolves to the start of
/// the media.
pub struct Unseekable {
    duration_us: TimeUs,
    start_position: u64,
}

impl Unseekable {
    pub fn new(duration_us: TimeUs, start_position: u64) -> Self {
        Unseekable { duration_us, start_position }
    }
}

impl SeekMap for Unseekable {
    fn is_seekable(&self) -> bool {
        false
    }

    fn duration_us(&self) -> TimeUs {
        self.duration_us
    }

    fn seek_points(&self, _time_us: TimeUs) -> SeekPoints {
        SeekPoints::one(SeekPoint::new(0, self.start_position))
    }
}

/// The outcome of one [`Demuxer::read`] call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadResult {
    /// Progress was made; call `read` again.
    Continue,
    /// The host must reposition the input to the given byte position before the next `read`.
    Seek(u64),
    /// The end of the media was reached.
    End,
}

/// A `Demuxer` is a container demuxer driven by the host.
///
/// All state mutation happens inside [`Demuxer::read`]; there is no internal thread and no
/// callback. The only blocking point is the provided [`Input`].
pub trait Demuxer {
    /// Checks whether the input looks like media this demuxer can read. Only peeks; the read
    /// position is left unchanged.
    fn sniff(&mut self, input: &mut dyn Input) -> Result<bool>;

    /// Performs a bounded amount of demuxing work.
    fn read(&mut self, input: &mut dyn Input, sink: &mut dyn TrackSink) -> Result<ReadResult>;

    /// Notifies the demuxer that the host repositioned the input to `position` in order to play
    /// from `time_us`. `position` should come from a prior [`SeekMap::seek_points`] query.
    fn seek(&mut self, position: u64, time_us: TimeUs);
}
