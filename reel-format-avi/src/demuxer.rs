// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The AVI demuxer state machine.

use log::{debug, info, warn};

use reel_core::demux::{
    Demuxer, ReadResult, SeekMap, SeekPoint, SeekPoints, TimeUs, TrackFormat, TrackSink,
    Unseekable,
};
use reel_core::errors::{malformed_error, Error, Result};
use reel_core::io::{BufInput, ByteCursor, Input};

use crate::chunks::{
    AudioFormat, AviMainHeader, AviStreamHeader, IndexChunk, VideoFormat, WAVE_FORMAT_AC3,
    WAVE_FORMAT_MPEGLAYER3,
};
use crate::index::{SeekAnswer, StreamIndex};
use crate::reader::{Ac3ReaderFactory, ChunkReader};
use crate::{
    quad_at, FourCc, AUDS_STREAM_TYPE, AVIH_CHUNK_ID, AVIX_RIFF_FORM, AVI_RIFF_FORM,
    DMLH_CHUNK_ID, HDRL_LIST_TYPE, IDX1_CHUNK_ID, INDX_CHUNK_ID, JUNK_CHUNK_ID, LIST_CHUNK_ID,
    MIME_AUDIO_AC3, MIME_AUDIO_MPEG, MIME_VIDEO_AVC, MIME_VIDEO_MJPEG, MIME_VIDEO_MP4V,
    MOVI_LIST_TYPE, ODML_LIST_TYPE, REC_LIST_TYPE, RIFF_CHUNK_ID, STRF_CHUNK_ID, STRH_CHUNK_ID,
    STRL_LIST_TYPE, STRN_CHUNK_ID, TXTS_STREAM_TYPE, VIDS_STREAM_TYPE,
};

/// Repositions this far forward are performed by skipping instead of a transport seek.
const RELOAD_MIN_SKIP: u64 = 256 * 1024;

/// `idx1` flag bit 4: the entry is a key frame.
const AVIIF_KEYFRAME: u32 = 0x10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    SkipToHdrl,
    ReadHdrlHeader,
    ReadHdrlBody,
    FindMovi,
    FindIdx1,
    ReadIdx1,
    ReadSamples,
    RequestIndices,
}

/// Options for the [`AviReader`].
#[derive(Default)]
pub struct AviReaderOptions {
    /// The AC-3 packet-reader capability. AC-3 streams of files demuxed without one are skipped.
    pub ac3: Option<Box<dyn Ac3ReaderFactory>>,
}

/// The per-stream pieces collected while parsing one `strl` list.
#[derive(Default)]
struct StreamBuilder {
    header: Option<AviStreamHeader>,
    video: Option<VideoFormat>,
    audio: Option<AudioFormat>,
    name: Option<String>,
    index: Option<IndexChunk>,
}

/// Audio Video Interleave (AVI) demuxer.
///
/// `AviReader` implements a demuxer for the AVI container format with OpenDML extensions.
pub struct AviReader {
    state: State,
    options: AviReaderOptions,
    readers: Vec<ChunkReader>,
    duration_us: TimeUs,
    hdrl_len: u32,
    /// File offset of the `LIST` fourcc of the `movi` list; zero until located.
    movi_start: u64,
    movi_end: u64,
    idx1_len: u32,
    has_legacy_index: bool,
    seekable: bool,
    published_seek_map: bool,
    /// Reader of the chunk whose body is partially consumed, if any.
    current_reader: Option<usize>,
    pending_seek_time_us: TimeUs,
}

impl AviReader {
    pub fn new(options: AviReaderOptions) -> Self {
        AviReader {
            state: State::SkipToHdrl,
            options,
            readers: Vec::new(),
            duration_us: 0,
            hdrl_len: 0,
            movi_start: 0,
            movi_end: 0,
            idx1_len: 0,
            has_legacy_index: false,
            seekable: false,
            published_seek_map: false,
            current_reader: None,
            pending_seek_time_us: 0,
        }
    }

    /// The byte position of the first payload chunk header.
    fn first_chunk_position(&self) -> u64 {
        self.movi_start + 12
    }

    /// Skips forward when the target is close ahead, otherwise requests a transport seek.
    fn reposition(&mut self, input: &mut dyn Input, target: u64) -> Result<ReadResult> {
        let pos = input.position();
        if target >= pos && target - pos < RELOAD_MIN_SKIP {
            input.skip_fully(target - pos)?;
            Ok(ReadResult::Continue)
        }
        else {
            Ok(ReadResult::Seek(target))
        }
    }

    fn skip_to_hdrl(&mut self, input: &mut dyn Input) -> Result<ReadResult> {
        let mut header = [0u8; 12];
        input.read_fully(&mut header)?;

        if header[0..4] != RIFF_CHUNK_ID || header[8..12] != AVI_RIFF_FORM {
            return malformed_error("avi: missing RIFF/AVI stream marker");
        }

        self.state = State::ReadHdrlHeader;
        Ok(ReadResult::Continue)
    }

    fn read_hdrl_header(&mut self, input: &mut dyn Input) -> Result<ReadResult> {
        let mut cursor = ByteCursor::new(input);

        let cc = cursor.read_quad_bytes()?;
        let len = cursor.read_u32()?;
        let list_type = cursor.read_quad_bytes()?;

        if cc != LIST_CHUNK_ID || list_type != HDRL_LIST_TYPE {
            return malformed_error("avi: expected hdrl list");
        }
        if len < 4 {
            return malformed_error("avi: hdrl list too small");
        }

        self.hdrl_len = len - 4;
        self.state = State::ReadHdrlBody;
        Ok(ReadResult::Continue)
    }

    fn read_hdrl_body(
        &mut self,
        input: &mut dyn Input,
        sink: &mut dyn TrackSink,
    ) -> Result<ReadResult> {
        let mut body = vec![0u8; self.hdrl_len as usize];
        input.read_fully(&mut body)?;

        let mut buf = BufInput::new(body);
        let mut cursor = ByteCursor::new(&mut buf);

        let mut main: Option<AviMainHeader> = None;
        let mut builders: Vec<StreamBuilder> = Vec::new();
        let mut dmlh_total_frames: Option<u32> = None;

        while cursor.pos() + 8 <= u64::from(self.hdrl_len) {
            let cc = cursor.read_quad_bytes()?;
            let len = cursor.read_u32()?;

            match cc {
                AVIH_CHUNK_ID => {
                    main = Some(AviMainHeader::read(&mut cursor, len)?);
                }
                LIST_CHUNK_ID => {
                    if len < 4 {
                        return malformed_error("avi: list chunk too small");
                    }
                    let list_type = cursor.read_quad_bytes()?;

                    match list_type {
                        STRL_LIST_TYPE => {
                            builders.push(parse_stream_list(&mut cursor, len - 4)?);
                        }
                        ODML_LIST_TYPE => {
                            dmlh_total_frames = parse_odml_list(&mut cursor, len - 4)?;
                        }
                        _ => {
                            info!(
                                "ignoring unknown hdrl list: type={}",
                                String::from_utf8_lossy(&list_type)
                            );
                            cursor.skip(u64::from(len - 4))?;
                        }
                    }
                }
                _ => {
                    if cc != JUNK_CHUNK_ID {
                        info!("ignoring unknown hdrl chunk: tag={}", String::from_utf8_lossy(&cc));
                    }
                    cursor.skip(u64::from(len))?;
                }
            }

            // Chunks are dword aligned.
            if len & 1 == 1 {
                cursor.skip(1)?;
            }
        }

        let main = match main {
            Some(main) => main,
            None => return malformed_error("avi: missing avih chunk"),
        };

        self.has_legacy_index = main.has_index();
        self.build_streams(&main, builders, dmlh_total_frames, sink);

        self.state = State::FindMovi;
        Ok(ReadResult::Continue)
    }

    /// Constructs a chunk reader per supported audio/video stream and publishes the track
    /// formats.
    fn build_streams(
        &mut self,
        main: &AviMainHeader,
        builders: Vec<StreamBuilder>,
        dmlh_total_frames: Option<u32>,
        sink: &mut dyn TrackSink,
    ) {
        let mut video_duration_us: Option<TimeUs> = None;
        let mut max_duration_us: TimeUs = 0;

        for (stream_id, builder) in builders.into_iter().enumerate() {
            let stream_id = stream_id as u32;

            let mut header = match builder.header {
                Some(header) => header,
                None => {
                    warn!("avi: stream {} has no strh chunk, skipping", stream_id);
                    continue;
                }
            };

            let is_video = header.stream_type == VIDS_STREAM_TYPE;

            // An OpenDML dmlh chunk carries the real frame count for files whose 32-bit avih
            // field overflowed.
            if is_video {
                if let Some(total) = dmlh_total_frames {
                    if total > header.length {
                        header.length = total;
                    }
                }
            }

            let duration_us = header.duration_us();
            let index = StreamIndex::new(header.length, duration_us);

            let built = match header.stream_type {
                VIDS_STREAM_TYPE => build_video_stream(stream_id, &header, builder.video, index),
                AUDS_STREAM_TYPE => build_audio_stream(
                    stream_id,
                    &header,
                    builder.audio,
                    index,
                    self.options.ac3.as_deref(),
                ),
                TXTS_STREAM_TYPE => {
                    info!("avi: text stream {} is not supported, skipping", stream_id);
                    None
                }
                _ => {
                    info!(
                        "avi: unsupported stream type {} for stream {}, skipping",
                        String::from_utf8_lossy(&header.stream_type),
                        stream_id
                    );
                    None
                }
            };

            let (mut reader, mut format) = match built {
                Some(built) => built,
                None => continue,
            };

            if let Some(name) = builder.name {
                format = format.with_label(name);
            }

            match builder.index {
                Some(IndexChunk::Super(chunk)) => {
                    reader.index_mut().install_super_index(chunk.entries);
                }
                Some(IndexChunk::Standard(chunk)) => {
                    reader.index_mut().install_standard_index(&chunk, None);
                }
                None => {}
            }

            if is_video {
                video_duration_us = Some(duration_us);
            }
            max_duration_us = max_duration_us.max(duration_us);

            sink.track(stream_id, reader.track_type()).format(&format);
            self.readers.push(reader);
        }

        sink.end_tracks();

        self.duration_us = video_duration_us.unwrap_or(max_duration_us);
        if self.duration_us == 0 {
            self.duration_us = (u64::from(main.total_frames)
                * u64::from(main.micros_per_frame)) as i64;
        }
    }

    fn publish_seek_map(&mut self, sink: &mut dyn TrackSink) {
        if self.published_seek_map {
            return;
        }
        self.published_seek_map = true;

        self.seekable = self.readers.iter().any(|r| r.index().has_entries());

        if self.seekable {
            sink.seek_map(&*self);
        }
        else {
            sink.seek_map(&Unseekable::new(self.duration_us, self.first_chunk_position()));
        }
    }

    fn find_movi(&mut self, input: &mut dyn Input, sink: &mut dyn TrackSink) -> Result<ReadResult> {
        // Re-entered after a seek to time zero: the movi list is already located.
        if self.movi_start != 0 {
            self.state = State::ReadSamples;
            return self.reposition(input, self.first_chunk_position());
        }

        let mut header = [0u8; 12];
        input.reset_peek();
        input.peek_fully(&mut header)?;

        let cc = quad_at(&header, 0);
        let len = u32::from_le_bytes(quad_at(&header, 4));
        let list_type = quad_at(&header, 8);

        if cc == LIST_CHUNK_ID && list_type == MOVI_LIST_TYPE {
            self.movi_start = input.position();
            self.movi_end = self.movi_start + 8 + u64::from(len);
            input.skip_fully(12)?;

            debug!("movi list at [{:#x}, {:#x})", self.movi_start, self.movi_end);

            if self.has_legacy_index && input.len().is_some() {
                // The legacy index trails the movi list.
                self.state = State::FindIdx1;
                return self.reposition(input, self.movi_end);
            }

            self.publish_seek_map(sink);
            self.state = State::ReadSamples;
            return Ok(ReadResult::Continue);
        }

        // Not the movi list; skip the chunk.
        if cc == LIST_CHUNK_ID {
            input.skip_fully(8 + u64::from(len))?;
        }
        else {
            input.skip_fully(8 + u64::from(len) + u64::from(len & 1))?;
        }
        Ok(ReadResult::Continue)
    }

    fn find_idx1(&mut self, input: &mut dyn Input, sink: &mut dyn TrackSink) -> Result<ReadResult> {
        if input.position() & 1 == 1 {
            input.skip_fully(1)?;
        }

        let at_end = match input.len() {
            Some(len) => input.position() + 8 > len,
            None => false,
        };

        if at_end {
            info!("avi: no idx1 chunk found");
            self.publish_seek_map(sink);
            self.state = State::ReadSamples;
            return self.reposition(input, self.first_chunk_position());
        }

        let mut header = [0u8; 8];
        input.reset_peek();
        input.peek_fully(&mut header)?;

        let cc = quad_at(&header, 0);
        let len = u32::from_le_bytes(quad_at(&header, 4));

        match cc {
            IDX1_CHUNK_ID => {
                input.skip_fully(8)?;
                self.idx1_len = len;
                self.state = State::ReadIdx1;
                Ok(ReadResult::Continue)
            }
            RIFF_CHUNK_ID => {
                // A continuation RIFF before any idx1: the file relies on OpenDML indexes.
                self.publish_seek_map(sink);
                self.state = State::ReadSamples;
                self.reposition(input, self.first_chunk_position())
            }
            _ => {
                input.skip_fully(8 + u64::from(len))?;
                Ok(ReadResult::Continue)
            }
        }
    }

    fn read_idx1(&mut self, input: &mut dyn Input, sink: &mut dyn TrackSink) -> Result<ReadResult> {
        let mut body = vec![0u8; self.idx1_len as usize];
        input.read_fully(&mut body)?;

        let mut buf = BufInput::new(body);
        let mut cursor = ByteCursor::new(&mut buf);

        // The entry offsets are relative either to the file start or to the movi fourcc,
        // depending on the muxer; infer the base from the first entry.
        let mut base: Option<u64> = None;

        let entry_count = self.idx1_len / 16;

        for _ in 0..entry_count {
            let cc = cursor.read_quad_bytes()?;
            let flags = cursor.read_u32()?;
            let offset = cursor.read_u32()?;
            let size = cursor.read_u32()?;

            let base = *base.get_or_insert_with(|| {
                if u64::from(offset) > self.movi_start {
                    0
                }
                else {
                    self.movi_start + 8
                }
            });

            if let Some(reader) = self.readers.iter_mut().find(|r| r.handles(cc)) {
                let position = base + u64::from(offset);
                if flags & AVIIF_KEYFRAME != 0 {
                    reader.index_mut().append_idx1_key_frame(position, size);
                }
                reader.index_mut().increment_chunk_count();
            }
        }

        for reader in &mut self.readers {
            reader.index_mut().compact();
        }

        debug!("parsed idx1 with {} entries", entry_count);

        self.publish_seek_map(sink);
        self.state = State::ReadSamples;
        self.reposition(input, self.first_chunk_position())
    }

    fn read_samples(
        &mut self,
        input: &mut dyn Input,
        sink: &mut dyn TrackSink,
    ) -> Result<ReadResult> {
        // Continue the chunk in progress, if any.
        if let Some(i) = self.current_reader {
            let reader = &mut self.readers[i];
            let output = sink.track(reader.stream_id(), reader.track_type());
            if reader.on_chunk_data(input, output)? {
                self.current_reader = None;
            }
            return Ok(ReadResult::Continue);
        }

        // Chunks are dword aligned; odd-sized chunks are followed by one pad byte.
        if input.position() & 1 == 1 {
            input.skip_fully(1)?;
        }

        if let Some(len) = input.len() {
            if input.position() + 8 > len {
                return Ok(ReadResult::End);
            }
        }

        let mut header = [0u8; 8];
        input.reset_peek();
        match input.peek_fully(&mut header) {
            Ok(()) => {}
            Err(Error::EndOfFile) => return Ok(ReadResult::End),
            Err(err) => return Err(err),
        }

        let cc = quad_at(&header, 0);
        let len = u32::from_le_bytes(quad_at(&header, 4));

        // A second RIFF chunk with the AVIX form carries continuation payload.
        if cc == RIFF_CHUNK_ID {
            let mut form = [0u8; 4];
            input.peek_fully(&mut form)?;

            if form != AVIX_RIFF_FORM {
                warn!("avi: unexpected RIFF form {}", String::from_utf8_lossy(&form));
            }
            input.skip_fully(12)?;
            return Ok(ReadResult::Continue);
        }

        // Payload may be wrapped in nested movi or rec lists; descend into them.
        if cc == LIST_CHUNK_ID {
            let mut list_type = [0u8; 4];
            input.peek_fully(&mut list_type)?;

            if list_type == MOVI_LIST_TYPE || list_type == REC_LIST_TYPE {
                input.skip_fully(12)?;
            }
            else {
                info!("ignoring unknown list: type={}", String::from_utf8_lossy(&list_type));
                input.skip_fully(8 + u64::from(len))?;
            }
            return Ok(ReadResult::Continue);
        }

        if let Some(i) = self.readers.iter().position(|r| r.handles(cc)) {
            let offset = input.position();
            input.skip_fully(8)?;

            let reader = &mut self.readers[i];
            reader.on_chunk_start(cc, len, offset);

            let output = sink.track(reader.stream_id(), reader.track_type());
            if !reader.on_chunk_data(input, output)? {
                self.current_reader = Some(i);
            }
            return Ok(ReadResult::Continue);
        }

        if cc != JUNK_CHUNK_ID && cc != IDX1_CHUNK_ID {
            info!("ignoring unknown chunk: tag={}, len={}", String::from_utf8_lossy(&cc), len);
        }
        input.skip_fully(8 + u64::from(len))?;
        Ok(ReadResult::Continue)
    }

    /// Routes to every pending `ix##` chunk in turn, then repositions to the resolved seek
    /// target and resumes sample reading.
    fn request_indices(
        &mut self,
        input: &mut dyn Input,
        sink: &mut dyn TrackSink,
    ) -> Result<ReadResult> {
        for i in 0..self.readers.len() {
            let pending = self.readers[i].index().pending_seek_offset();

            if let Some(position) = pending {
                if input.position() != position {
                    return self.reposition(input, position);
                }

                let mut header = [0u8; 8];
                input.reset_peek();
                input.peek_fully(&mut header)?;

                let cc = quad_at(&header, 0);
                let len = u32::from_le_bytes(quad_at(&header, 4));

                if !self.readers[i].handles(cc) {
                    warn!(
                        "avi: expected index chunk at {:#x}, found {}",
                        position,
                        String::from_utf8_lossy(&cc)
                    );
                    self.readers[i].index_mut().cancel_pending();
                    return Ok(ReadResult::Continue);
                }

                input.skip_fully(8)?;

                let reader = &mut self.readers[i];
                reader.on_chunk_start(cc, len, position);

                let output = sink.track(reader.stream_id(), reader.track_type());
                reader.on_chunk_data(input, output)?;

                return Ok(ReadResult::Continue);
            }
        }

        // Every pending segment is loaded; the transport target is the minimum of the
        // per-stream first candidates.
        let time_us = self.pending_seek_time_us;
        let mut target: Option<u64> = None;

        for reader in &mut self.readers {
            if !reader.index().has_entries() {
                continue;
            }

            match reader.index().seek_points(time_us) {
                SeekAnswer::Ready(points) => {
                    target =
                        Some(target.map_or(points.first.position, |t| t.min(points.first.position)));
                }
                SeekAnswer::Pending { position, .. } => {
                    // Another detour surfaced; record it and keep iterating the fixed point.
                    reader.index_mut().will_seek_to(position, time_us);
                    return Ok(ReadResult::Continue);
                }
            }
        }

        let target = target.unwrap_or_else(|| self.first_chunk_position());

        for reader in &mut self.readers {
            reader.invalidate_current_chunk_position();
        }
        self.current_reader = None;
        self.state = State::ReadSamples;

        debug!("index detour complete, resuming at {:#x}", target);

        self.reposition(input, target)
    }
}

impl Demuxer for AviReader {
    fn sniff(&mut self, input: &mut dyn Input) -> Result<bool> {
        let mut header = [0u8; 12];
        input.reset_peek();
        let result = input.peek_fully(&mut header);
        input.reset_peek();

        match result {
            Ok(()) => {
                Ok(header[0..4] == RIFF_CHUNK_ID && header[8..12] == AVI_RIFF_FORM)
            }
            Err(Error::EndOfFile) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn read(&mut self, input: &mut dyn Input, sink: &mut dyn TrackSink) -> Result<ReadResult> {
        match self.state {
            State::SkipToHdrl => self.skip_to_hdrl(input),
            State::ReadHdrlHeader => self.read_hdrl_header(input),
            State::ReadHdrlBody => self.read_hdrl_body(input, sink),
            State::FindMovi => self.find_movi(input, sink),
            State::FindIdx1 => self.find_idx1(input, sink),
            State::ReadIdx1 => self.read_idx1(input, sink),
            State::ReadSamples => self.read_samples(input, sink),
            State::RequestIndices => self.request_indices(input, sink),
        }
    }

    fn seek(&mut self, position: u64, time_us: TimeUs) {
        self.current_reader = None;

        for reader in &mut self.readers {
            reader.index_mut().cancel_pending();
            reader.invalidate_current_chunk_position();
        }

        // Not yet past the header parse; nothing to restore.
        if self.movi_start == 0 {
            return;
        }

        if time_us == 0 {
            self.state = State::FindMovi;
            return;
        }

        let mut pending = false;
        for reader in &mut self.readers {
            if reader.index().has_entries() && reader.index_mut().will_seek_to(position, time_us)
            {
                pending = true;
            }
        }

        self.pending_seek_time_us = time_us;
        self.state = if pending { State::RequestIndices } else { State::ReadSamples };
    }
}

impl SeekMap for AviReader {
    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn duration_us(&self) -> TimeUs {
        self.duration_us
    }

    fn seek_points(&self, time_us: TimeUs) -> SeekPoints {
        let mut primary: Option<SeekPoints> = None;
        let mut min_position: Option<u64> = None;

        for reader in &self.readers {
            if !reader.index().has_entries() {
                continue;
            }

            match reader.index().seek_points(time_us) {
                // An unloaded segment: the interim target is the index chunk itself.
                SeekAnswer::Pending { position, .. } => {
                    return SeekPoints::one(SeekPoint::new(time_us, position));
                }
                SeekAnswer::Ready(points) => {
                    if primary.is_none() {
                        primary = Some(points);
                    }
                    min_position = Some(
                        min_position.map_or(points.first.position, |p| {
                            p.min(points.first.position)
                        }),
                    );
                }
            }
        }

        match (primary, min_position) {
            (Some(mut points), Some(min_position)) => {
                // Every stream must receive data from the seek position onwards.
                points.first.position = min_position;
                points
            }
            _ => SeekPoints::one(SeekPoint::new(0, self.first_chunk_position())),
        }
    }
}

/// Parses one `strl` list body (`len` bytes past the list type).
fn parse_stream_list(cursor: &mut ByteCursor<'_>, len: u32) -> Result<StreamBuilder> {
    let end = cursor.pos() + u64::from(len);
    let mut builder = StreamBuilder::default();

    while cursor.pos() + 8 <= end {
        let cc = cursor.read_quad_bytes()?;
        let chunk_len = cursor.read_u32()?;

        if cursor.pos() + u64::from(chunk_len) > end {
            return malformed_error("avi: strl chunk length exceeds parent list");
        }

        match cc {
            STRH_CHUNK_ID => {
                builder.header = Some(AviStreamHeader::read(cursor, chunk_len)?);
            }
            STRF_CHUNK_ID => match builder.header.map(|h| h.stream_type) {
                Some(VIDS_STREAM_TYPE) => {
                    builder.video = Some(VideoFormat::read(cursor, chunk_len)?);
                }
                Some(AUDS_STREAM_TYPE) => {
                    builder.audio = Some(AudioFormat::read(cursor, chunk_len)?);
                }
                _ => {
                    cursor.skip(u64::from(chunk_len))?;
                }
            },
            STRN_CHUNK_ID => {
                let raw = cursor.read_boxed_slice_exact(chunk_len as usize)?;
                let name: Vec<u8> =
                    raw.iter().copied().take_while(|&b| b != 0).collect();
                if !name.is_empty() {
                    builder.name = Some(String::from_utf8_lossy(&name).into_owned());
                }
            }
            INDX_CHUNK_ID => {
                builder.index = Some(IndexChunk::read(cursor, chunk_len)?);
            }
            _ => {
                cursor.skip(u64::from(chunk_len))?;
            }
        }

        if chunk_len & 1 == 1 {
            cursor.skip(1)?;
        }
    }

    // Leave the cursor exactly at the end of the list so the outer loop stays aligned.
    if cursor.pos() < end {
        cursor.skip(end - cursor.pos())?;
    }

    Ok(builder)
}

/// Parses an `odml` list body looking for the `dmlh` extended frame count.
fn parse_odml_list(cursor: &mut ByteCursor<'_>, len: u32) -> Result<Option<u32>> {
    let end = cursor.pos() + u64::from(len);
    let mut total_frames = None;

    while cursor.pos() + 8 <= end {
        let cc = cursor.read_quad_bytes()?;
        let chunk_len = cursor.read_u32()?;

        if cursor.pos() + u64::from(chunk_len) > end {
            return malformed_error("avi: odml chunk length exceeds parent list");
        }

        if cc == DMLH_CHUNK_ID && chunk_len >= 4 {
            total_frames = Some(cursor.read_u32()?);
            cursor.skip(u64::from(chunk_len - 4))?;
        }
        else {
            cursor.skip(u64::from(chunk_len))?;
        }

        if chunk_len & 1 == 1 {
            cursor.skip(1)?;
        }
    }

    if cursor.pos() < end {
        cursor.skip(end - cursor.pos())?;
    }

    Ok(total_frames)
}

fn video_mime(compression: FourCc) -> Option<&'static str> {
    match &compression {
        b"H264" | b"h264" | b"X264" | b"x264" | b"AVC1" | b"avc1" | b"DAVC" => {
            Some(MIME_VIDEO_AVC)
        }
        b"XVID" | b"xvid" | b"DIVX" | b"divx" | b"DX50" | b"FMP4" | b"MP4V" | b"mp4v" => {
            Some(MIME_VIDEO_MP4V)
        }
        b"MJPG" | b"mjpg" => Some(MIME_VIDEO_MJPEG),
        _ => None,
    }
}

fn build_video_stream(
    stream_id: u32,
    header: &AviStreamHeader,
    format: Option<VideoFormat>,
    index: StreamIndex,
) -> Option<(ChunkReader, TrackFormat)> {
    let format = match format {
        Some(format) => format,
        None => {
            warn!("avi: video stream {} has no strf chunk, skipping", stream_id);
            return None;
        }
    };

    let mime = match video_mime(format.compression) {
        Some(mime) => mime,
        None => {
            info!(
                "avi: unsupported video codec {} for stream {}, skipping",
                String::from_utf8_lossy(&format.compression),
                stream_id
            );
            return None;
        }
    };

    let mut track_format = TrackFormat::new(stream_id, mime);
    if header.suggested_buffer_size > 0 {
        track_format = track_format.with_max_input_size(header.suggested_buffer_size);
    }
    if header.frame_rate() > 0.0 {
        track_format = track_format.with_frame_rate(header.frame_rate());
    }

    Some((ChunkReader::new_video(stream_id, index), track_format))
}

fn build_audio_stream(
    stream_id: u32,
    header: &AviStreamHeader,
    format: Option<AudioFormat>,
    index: StreamIndex,
    ac3: Option<&dyn Ac3ReaderFactory>,
) -> Option<(ChunkReader, TrackFormat)> {
    let format = match format {
        Some(format) => format,
        None => {
            warn!("avi: audio stream {} has no strf chunk, skipping", stream_id);
            return None;
        }
    };

    let (mime, reader) = match format.format_tag {
        WAVE_FORMAT_MPEGLAYER3 => (
            MIME_AUDIO_MPEG,
            ChunkReader::new_mp3(stream_id, format.sample_rate, index),
        ),
        WAVE_FORMAT_AC3 => match ac3 {
            Some(factory) => {
                (MIME_AUDIO_AC3, ChunkReader::new_ac3(stream_id, factory.create(), index))
            }
            None => {
                info!(
                    "avi: no AC-3 reader available for stream {}, skipping",
                    stream_id
                );
                return None;
            }
        },
        tag => {
            info!(
                "avi: unsupported audio format {:#06x} for stream {}, skipping",
                tag, stream_id
            );
            return None;
        }
    };

    let mut track_format = TrackFormat::new(stream_id, mime)
        .with_sample_rate(format.sample_rate)
        .with_channels(u32::from(format.channels));

    if format.avg_bytes_per_sec > 0 {
        track_format = track_format.with_average_bitrate(format.avg_bytes_per_sec * 8);
    }
    if header.suggested_buffer_size > 0 {
        track_format = track_format.with_max_input_size(header.suggested_buffer_size);
    }

    Some((reader, track_format))
}
