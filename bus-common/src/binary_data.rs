/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Trailing binary payloads and the byte sources they are read from.
//!
//! A binary envelope is `[json][raw bytes]`. When it is decoded the JSON parser
//! usually pulls more bytes off the wire than the JSON head needs; those bytes
//! become the in-memory prefix of a [`BinaryData`] and the untouched remainder of
//! the wire stream becomes its tail.

use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io::{self, Cursor, Empty, Read};

/// A readable byte source that can report how much is readable without blocking.
///
/// `available` is advisory in the same way a socket's readable byte count is:
/// `0` means "unknown or nothing buffered", not end of stream.
pub trait InputStream: Read + Send {
    fn available(&self) -> io::Result<usize> {
        Ok(0)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: AsRef<[u8]> + Send> InputStream for Cursor<T> {
    fn available(&self) -> io::Result<usize> {
        let len = self.get_ref().as_ref().len() as u64;
        Ok(len.saturating_sub(self.position()) as usize)
    }
}

impl InputStream for File {}

impl InputStream for Empty {}

impl<S: InputStream + ?Sized> InputStream for Box<S> {
    fn available(&self) -> io::Result<usize> {
        (**self).available()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

type CloseAction = Box<dyn FnOnce() + Send>;

/// Buffered prefix followed by a trailing stream.
///
/// Only `read`, `skip`, `available` and `close` are offered. Mark and reset are
/// not supported and there is no way to rewind a `BinaryData`.
pub struct BinaryData {
    prefix: Vec<u8>,
    position: usize,
    stream: Box<dyn InputStream>,
    on_close: Option<CloseAction>,
    closed: bool,
}

impl BinaryData {
    pub fn new(prefix: Vec<u8>, stream: impl InputStream + 'static) -> Self {
        Self {
            prefix,
            position: 0,
            stream: Box::new(stream),
            on_close: None,
            closed: false,
        }
    }

    pub fn from_stream(stream: impl InputStream + 'static) -> Self {
        Self::new(Vec::new(), stream)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes.into(), io::empty())
    }

    /// Registers an action that runs once, the first time this source is closed or dropped.
    pub fn with_on_close(mut self, action: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(action));
        self
    }

    pub fn set_on_close(&mut self, action: impl FnOnce() + Send + 'static) {
        self.on_close = Some(Box::new(action));
    }

    /// Reads a single byte; `None` means end of stream. Every value `0..=255` is data.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(byte) = self.prefix.get(self.position).copied() {
            self.position += 1;
            return Ok(Some(byte));
        }

        let mut single = [0u8; 1];
        loop {
            match self.stream.read(&mut single) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(single[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Skips up to `n` bytes and returns how many were actually skipped.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let from_prefix = (self.prefix_remaining() as u64).min(n);
        self.position += from_prefix as usize;

        let wanted = n - from_prefix;
        if wanted == 0 {
            return Ok(from_prefix);
        }

        let from_stream = io::copy(&mut (&mut self.stream).take(wanted), &mut io::sink())?;
        Ok(from_prefix + from_stream)
    }

    /// Remaining prefix bytes plus whatever the trailing stream reports.
    pub fn available(&self) -> io::Result<usize> {
        Ok(self.prefix_remaining() + self.stream.available()?)
    }

    /// Drops the prefix, closes the trailing stream, then runs the close action.
    ///
    /// The close action runs at most once even if closing the stream fails or
    /// `close` is called again.
    pub fn close(&mut self) -> io::Result<()> {
        self.prefix = Vec::new();
        self.position = 0;
        let result = if self.closed {
            Ok(())
        } else {
            self.closed = true;
            self.stream.close()
        };

        if let Some(action) = self.on_close.take() {
            action();
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Always `false`; a `BinaryData` cannot be marked or reset.
    pub fn mark_supported(&self) -> bool {
        false
    }

    fn prefix_remaining(&self) -> usize {
        self.prefix.len() - self.position
    }
}

impl Read for BinaryData {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let remaining = &self.prefix[self.position..];
        if remaining.is_empty() {
            return self.stream.read(buf);
        }

        let copied = remaining.len().min(buf.len());
        buf[..copied].copy_from_slice(&remaining[..copied]);
        self.position += copied;

        if copied == buf.len() {
            return Ok(copied);
        }

        // Prefix drained mid-read; top up from the stream. Data already copied wins
        // over a stream error, which will surface again on the next call.
        match self.stream.read(&mut buf[copied..]) {
            Ok(more) => Ok(copied + more),
            Err(_) => Ok(copied),
        }
    }
}

impl InputStream for BinaryData {
    fn available(&self) -> io::Result<usize> {
        BinaryData::available(self)
    }

    fn close(&mut self) -> io::Result<()> {
        BinaryData::close(self)
    }
}

impl Drop for BinaryData {
    fn drop(&mut self) {
        if !self.closed || self.on_close.is_some() {
            let _ = self.close();
        }
    }
}

impl Debug for BinaryData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryData")
            .field("prefix_remaining", &self.prefix_remaining())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryData, InputStream};
    use std::io::{self, Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn splice(prefix: &[u8], tail: &[u8]) -> BinaryData {
        BinaryData::new(prefix.to_vec(), Cursor::new(tail.to_vec()))
    }

    fn expected(prefix: &[u8], tail: &[u8]) -> Vec<u8> {
        let mut all = prefix.to_vec();
        all.extend_from_slice(tail);
        all
    }

    #[derive(Clone, Copy, Debug)]
    enum Op {
        Byte,
        Bulk(usize),
        Skip(u64),
    }

    /// Walks the source with a rotating mix of operations, checking every byte
    /// read against `logical` and `available` against the unread length.
    fn walk(data: &mut BinaryData, logical: &[u8], ops: &[Op]) {
        let mut position = 0usize;
        let mut step = 0usize;
        while position < logical.len() {
            assert_eq!(
                data.available().expect("available"),
                logical.len() - position
            );
            match ops[step % ops.len()] {
                Op::Byte => {
                    let byte = data.read_byte().expect("read byte");
                    assert_eq!(byte, Some(logical[position]));
                    position += 1;
                }
                Op::Bulk(size) => {
                    let mut buf = vec![0u8; size];
                    let n = data.read(&mut buf).expect("bulk read");
                    assert!(n > 0);
                    assert_eq!(&buf[..n], &logical[position..position + n]);
                    position += n;
                }
                Op::Skip(n) => {
                    let skipped = data.skip(n).expect("skip") as usize;
                    assert_eq!(skipped, (n as usize).min(logical.len() - position));
                    position += skipped;
                }
            }
            step += 1;
        }
        assert_eq!(data.available().expect("available"), 0);
        assert_eq!(data.read_byte().expect("eof"), None);
    }

    #[test]
    fn mixed_reads_and_skips_reproduce_prefix_then_tail() {
        let prefix: Vec<u8> = (0u8..=20).collect();
        let tail: Vec<u8> = vec![0xFF, 0x00, 0x80, 0x7F, 0xFE, 0x01];
        let patterns: [&[Op]; 5] = [
            &[Op::Byte],
            &[Op::Bulk(3)],
            &[Op::Bulk(7), Op::Byte],
            &[Op::Skip(2), Op::Bulk(64)],
            &[Op::Byte, Op::Skip(4), Op::Bulk(5), Op::Skip(1)],
        ];

        for ops in patterns {
            for prefix_len in [0usize, 1, 5, prefix.len()] {
                for tail_len in [0usize, 2, tail.len()] {
                    let mut data = splice(&prefix[..prefix_len], &tail[..tail_len]);
                    let logical = expected(&prefix[..prefix_len], &tail[..tail_len]);
                    walk(&mut data, &logical, ops);
                }
            }
        }
    }

    #[test]
    fn byte_0xff_is_data_not_end_of_stream() {
        let mut data = splice(&[0xFF], &[0xFF]);
        assert_eq!(data.read_byte().expect("first"), Some(0xFF));
        assert_eq!(data.read_byte().expect("second"), Some(0xFF));
        assert_eq!(data.read_byte().expect("eof"), None);
    }

    #[test]
    fn bulk_read_crosses_from_prefix_into_tail() {
        let mut data = splice(b"abc", b"defg");
        let mut buf = [0u8; 5];
        assert_eq!(data.read(&mut buf).expect("read"), 5);
        assert_eq!(&buf, b"abcde");
        assert_eq!(data.available().expect("available"), 2);
    }

    #[test]
    fn skip_spans_prefix_and_tail() {
        let mut data = splice(b"0123", b"456789");
        assert_eq!(data.skip(2).expect("skip"), 2);
        assert_eq!(data.available().expect("available"), 8);
        assert_eq!(data.skip(5).expect("skip"), 5);
        assert_eq!(data.available().expect("available"), 3);

        let mut rest = Vec::new();
        data.read_to_end(&mut rest).expect("rest");
        assert_eq!(rest, b"789");
        assert_eq!(data.skip(10).expect("skip past end"), 0);
    }

    #[test]
    fn available_tracks_remaining_length() {
        let mut data = splice(b"xy", b"z");
        let mut remaining = 3;
        while remaining > 0 {
            assert_eq!(data.available().expect("available"), remaining);
            data.read_byte().expect("read");
            remaining -= 1;
        }
        assert_eq!(data.available().expect("available"), 0);
    }

    struct CountingStream {
        inner: Cursor<Vec<u8>>,
        closes: Arc<AtomicUsize>,
    }

    impl Read for CountingStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl InputStream for CountingStream {
        fn available(&self) -> io::Result<usize> {
            self.inner.available()
        }

        fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn close_discards_prefix_and_runs_action_once() {
        let stream_closes = Arc::new(AtomicUsize::new(0));
        let action_runs = Arc::new(AtomicUsize::new(0));
        let action_counter = action_runs.clone();

        let mut data = BinaryData::new(
            b"prefix".to_vec(),
            CountingStream {
                inner: Cursor::new(b"tail".to_vec()),
                closes: stream_closes.clone(),
            },
        )
        .with_on_close(move || {
            action_counter.fetch_add(1, Ordering::SeqCst);
        });

        data.close().expect("first close");
        assert_eq!(data.available().expect("available after close"), 4);
        data.close().expect("second close");
        drop(data);

        assert_eq!(stream_closes.load(Ordering::SeqCst), 1);
        assert_eq!(action_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_without_close_still_runs_action() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let data = BinaryData::from_bytes(b"abc".to_vec()).with_on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!data.mark_supported());
        drop(data);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
