// Reel
// Copyright (c) 2026 The Project Reel Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements byte-level I/O over positionable media sources.
//!
//! An [`Input`] is the byte source a demuxer is driven with. It maintains two cursors: the read
//! cursor, which consumes bytes, and an independent peek cursor that may run ahead of the read
//! cursor without consuming anything. A [`ByteCursor`] wraps an `Input` and layers little-endian
//! integer readers on top.

use crate::errors::{end_of_stream_error, Result};

/// `Input` is a positionable, peekable byte source.
///
/// The peek cursor always starts at the read position and advances independently. Any read or
/// skip resets the peek cursor back to the read position, so bytes observed through
/// [`Input::peek_fully`] are guaranteed to be returned by a subsequent read.
pub trait Input {
    /// Gets the position of the read cursor.
    fn position(&self) -> u64;

    /// Returns the total length of the source in bytes, if known.
    fn len(&self) -> Option<u64>;

    /// Reads up-to `buf.len()` bytes into `buf` and returns the number of bytes read. Returns
    /// `Ok(0)` only at the end of the source.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reads exactly `buf.len()` bytes into `buf` or fails with an end-of-stream error.
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Fills `buf` from the peek cursor and advances it, without consuming any bytes from the
    /// read cursor.
    fn peek_fully(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Advances the peek cursor by `len` bytes.
    fn advance_peek(&mut self, len: usize) -> Result<()>;

    /// Resets the peek cursor to the read position.
    fn reset_peek(&mut self);

    /// Skips exactly `len` bytes or fails with an end-of-stream error.
    fn skip_fully(&mut self, len: u64) -> Result<()>;
}

/// `BufInput` is an in-memory [`Input`] over an owned byte buffer.
pub struct BufInput {
    buf: Box<[u8]>,
    pos: usize,
    peek_pos: usize,
    /// When set, `len()` reports an unknown total length. Sources of unknown length still read
    /// from the underlying buffer.
    unknown_len: bool,
}

impl BufInput {
    pub fn new(buf: impl Into<Box<[u8]>>) -> Self {
        BufInput { buf: buf.into(), pos: 0, peek_pos: 0, unknown_len: false }
    }

    /// Like [`BufInput::new`], but `len()` will report an unknown length.
    pub fn new_unknown_len(buf: impl Into<Box<[u8]>>) -> Self {
        BufInput { buf: buf.into(), pos: 0, peek_pos: 0, unknown_len: true }
    }

    /// Repositions the read cursor. The host-side analogue of honouring a demuxer seek request.
    pub fn seek(&mut self, pos: u64) {
        self.pos = (pos as usize).min(self.buf.len());
        self.peek_pos = self.pos;
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl Input for BufInput {
    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn len(&self) -> Option<u64> {
        if self.unknown_len {
            None
        }
        else {
            Some(self.buf.len() as u64)
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        self.peek_pos = self.pos;
        Ok(n)
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.remaining() {
            return end_of_stream_error();
        }
        buf.copy_from_slice(&self.buf[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        self.peek_pos = self.pos;
        Ok(())
    }

    fn peek_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.peek_pos + buf.len() > self.buf.len() {
            return end_of_stream_error();
        }
        buf.copy_from_slice(&self.buf[self.peek_pos..self.peek_pos + buf.len()]);
        self.peek_pos += buf.len();
        Ok(())
    }

    fn advance_peek(&mut self, len: usize) -> Result<()> {
        if self.peek_pos + len > self.buf.len() {
            return end_of_stream_error();
        }
        self.peek_pos += len;
        Ok(())
    }

    fn reset_peek(&mut self) {
        self.peek_pos = self.pos;
    }

    fn skip_fully(&mut self, len: u64) -> Result<()> {
        if len > self.remaining() as u64 {
            return end_of_stream_error();
        }
        self.pos += len as usize;
        self.peek_pos = self.pos;
        Ok(())
    }
}

/// `ByteCursor` is a view over an [`Input`] providing little-endian integer readers.
///
/// Reads fail with an end-of-stream error when fewer bytes than requested are available. A peek
/// leaves the read cursor unchanged, and a subsequent read returns the peeked bytes.
pub struct ByteCursor<'a> {
    inner: &'a mut dyn Input,
}

impl<'a> ByteCursor<'a> {
    pub fn new(inner: &'a mut dyn Input) -> Self {
        ByteCursor { inner }
    }

    /// Gets the position of the read cursor.
    pub fn pos(&self) -> u64 {
        self.inner.position()
    }

    /// Skips `len` bytes.
    pub fn skip(&mut self, len: u64) -> Result<()> {
        self.inner.skip_fully(len)
    }

    /// Reads exactly the number of bytes required to fill the provided buffer.
    pub fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_fully(buf)
    }

    /// Reads four bytes from the stream and returns them in read-order.
    pub fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.inner.read_fully(&mut buf)?;
        Ok(buf)
    }

    /// Reads a single unsigned byte from the stream.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_fully(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads two bytes and interprets them as an unsigned 16-bit little-endian integer.
    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.inner.read_fully(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads three bytes and interprets them as an unsigned 24-bit little-endian integer.
    pub fn read_u24(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.inner.read_fully(&mut buf[0..3])?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads four bytes and interprets them as an unsigned 32-bit little-endian integer.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads four bytes and interprets them as a signed 32-bit little-endian integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads eight bytes and interprets them as an unsigned 64-bit little-endian integer.
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.inner.read_fully(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads exactly `len` bytes and returns them as a boxed slice.
    pub fn read_boxed_slice_exact(&mut self, len: usize) -> Result<Box<[u8]>> {
        let mut buf = vec![0u8; len];
        self.inner.read_fully(&mut buf)?;
        Ok(buf.into_boxed_slice())
    }

    /// Peeks four bytes in read-order without consuming them.
    pub fn peek_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.inner.reset_peek();
        let result = self.inner.peek_fully(&mut buf);
        self.inner.reset_peek();
        result.map(|_| buf)
    }
}
