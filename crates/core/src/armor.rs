// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! ASCII armor: a strict PEM-like encapsulation of the binary file for
//! textual transport.
//!
//! The armored form is the begin marker, standard (padded) base64 wrapped at
//! exactly 64 columns, and the end marker. The writer always emits LF line
//! endings and a final line strictly shorter than 64 columns. The reader
//! tolerates CRLF line endings and up to 1024 bytes of whitespace on either
//! side of the markers, and rejects everything else.

use std::io;
use std::io::{BufRead, BufReader, Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ArmorError;

/// Armor begin marker.
pub const BEGIN_MARKER: &str = "-----BEGIN AGE ENCRYPTED FILE-----";

/// Armor end marker.
pub const END_MARKER: &str = "-----END AGE ENCRYPTED FILE-----";

/// Base64 columns per armor body line.
const COLUMNS_PER_LINE: usize = 64;

/// Raw bytes per full armor body line.
const BYTES_PER_LINE: usize = 48;

/// Whitespace budget on each side of the armored block.
const MAX_WHITESPACE: usize = 1024;

fn is_armor_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
}

/// Armoring writer: wraps a sink and encodes everything written to it.
///
/// [`ArmoredWriter::finish`] emits the final partial line and the end
/// marker; without it the armor is truncated.
pub struct ArmoredWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    started: bool,
    finished: bool,
}

impl<W: Write> ArmoredWriter<W> {
    /// Wrap a sink in an armoring encoder.
    pub fn new(inner: W) -> Self {
        ArmoredWriter {
            inner,
            buffer: Vec::with_capacity(BYTES_PER_LINE),
            started: false,
            finished: false,
        }
    }

    fn write_begin(&mut self) -> io::Result<()> {
        if !self.started {
            self.started = true;
            self.inner.write_all(BEGIN_MARKER.as_bytes())?;
            self.inner.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Emit the final (possibly empty) base64 line, the end marker, and a
    /// trailing LF, then flush the sink.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "armor already finished",
            ));
        }
        self.write_begin()?;
        self.finished = true;
        let line = STANDARD.encode(&self.buffer);
        self.buffer.clear();
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.write_all(END_MARKER.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()
    }

    /// Consume the writer and return the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ArmoredWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write after armor was finished",
            ));
        }
        self.write_begin()?;
        let mut remaining = data;
        while !remaining.is_empty() {
            let take = usize::min(BYTES_PER_LINE - self.buffer.len(), remaining.len());
            self.buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.buffer.len() == BYTES_PER_LINE {
                let line = STANDARD.encode(&self.buffer);
                self.buffer.clear();
                self.inner.write_all(line.as_bytes())?;
                self.inner.write_all(b"\n")?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum ReaderState {
    /// Begin marker not yet consumed.
    Start,
    /// Inside the base64 body; holds the last line pending its successor.
    Body { pending: Option<Vec<u8>> },
    /// End marker and trailing whitespace fully validated.
    Done,
}

/// Dearmoring reader: wraps a source and decodes the armored block.
///
/// Armor failures surface as `io::Error` values wrapping an [`ArmorError`].
pub struct ArmoredReader<R: Read> {
    inner: BufReader<R>,
    state: ReaderState,
    decoded: Vec<u8>,
    position: usize,
}

impl<R: Read> ArmoredReader<R> {
    /// Wrap a source in a dearmoring decoder.
    pub fn new(inner: R) -> Self {
        ArmoredReader {
            inner: BufReader::new(inner),
            state: ReaderState::Start,
            decoded: Vec::new(),
            position: 0,
        }
    }

    /// Skip leading whitespace, enforcing the byte budget.
    fn skip_leading_whitespace(&mut self) -> io::Result<()> {
        let mut skipped = 0usize;
        loop {
            let buf = self.inner.fill_buf()?;
            if buf.is_empty() {
                return Err(ArmorError::MissingBegin.into());
            }
            let ws = buf.iter().take_while(|&&b| is_armor_whitespace(b)).count();
            skipped += ws;
            if skipped > MAX_WHITESPACE {
                return Err(ArmorError::LeadingWhitespace(MAX_WHITESPACE).into());
            }
            let done = ws < buf.len();
            self.inner.consume(ws);
            if done {
                return Ok(());
            }
        }
    }

    /// Read one line, accepting LF or CRLF terminators.
    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        let n = self.inner.read_until(b'\n', &mut line)?;
        if n == 0 || line.pop() != Some(b'\n') {
            return Err(ArmorError::MissingEnd.into());
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Validate the trailing whitespace budget after the end marker.
    fn check_trailing(&mut self) -> io::Result<()> {
        let mut trailing = 0usize;
        loop {
            let buf = self.inner.fill_buf()?;
            if buf.is_empty() {
                return Ok(());
            }
            if let Some(_bad) = buf.iter().find(|&&b| !is_armor_whitespace(b)) {
                return Err(ArmorError::TrailingGarbage.into());
            }
            trailing += buf.len();
            if trailing > MAX_WHITESPACE {
                return Err(ArmorError::TrailingWhitespace(MAX_WHITESPACE).into());
            }
            let n = buf.len();
            self.inner.consume(n);
        }
    }

    fn decode_line(&mut self, line: &[u8]) -> io::Result<()> {
        let bytes = STANDARD.decode(line).map_err(ArmorError::from)?;
        self.decoded.extend_from_slice(&bytes);
        Ok(())
    }

    /// Advance the state machine until decoded bytes are available or the
    /// armor is fully consumed.
    fn fill(&mut self) -> io::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ReaderState::Done) {
                ReaderState::Start => {
                    self.skip_leading_whitespace()?;
                    let line = self.read_line()?;
                    if line != BEGIN_MARKER.as_bytes() {
                        return Err(ArmorError::MissingBegin.into());
                    }
                    self.state = ReaderState::Body { pending: None };
                }
                ReaderState::Body { mut pending } => {
                    let line = self.read_line()?;
                    if line == END_MARKER.as_bytes() {
                        let last = pending.take().unwrap_or_default();
                        if last.len() >= COLUMNS_PER_LINE {
                            return Err(ArmorError::InvalidLineLength(last.len()).into());
                        }
                        self.decode_line(&last)?;
                        self.check_trailing()?;
                        self.state = ReaderState::Done;
                        return Ok(());
                    }
                    if let Some(previous) = pending.take() {
                        // The previous line has a successor, so it must be a
                        // full, unpadded line.
                        if previous.len() != COLUMNS_PER_LINE {
                            return Err(ArmorError::InvalidLineLength(previous.len()).into());
                        }
                        if let Some(at) = previous.iter().position(|&b| b == b'=') {
                            return Err(ArmorError::InvalidBase64(
                                base64::DecodeError::InvalidByte(at, b'='),
                            )
                            .into());
                        }
                        self.decode_line(&previous)?;
                    }
                    if line.len() > COLUMNS_PER_LINE {
                        return Err(ArmorError::InvalidLineLength(line.len()).into());
                    }
                    self.state = ReaderState::Body {
                        pending: Some(line),
                    };
                    if self.position < self.decoded.len() {
                        return Ok(());
                    }
                }
                ReaderState::Done => return Ok(()),
            }
        }
    }
}

impl<R: Read> Read for ArmoredReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.position == self.decoded.len() {
            if matches!(self.state, ReaderState::Done) {
                return Ok(0);
            }
            // Reclaim the buffer between refills.
            self.decoded.clear();
            self.position = 0;
            self.fill()?;
        }
        let n = usize::min(out.len(), self.decoded.len() - self.position);
        out[..n].copy_from_slice(&self.decoded[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armor(data: &[u8]) -> String {
        let mut writer = ArmoredWriter::new(Vec::new());
        writer.write_all(data).expect("Failed to write");
        writer.finish().expect("Failed to finish");
        String::from_utf8(writer.into_inner()).expect("Armor is ASCII")
    }

    fn dearmor(text: &str) -> io::Result<Vec<u8>> {
        let mut reader = ArmoredReader::new(text.as_bytes());
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_round_trip() {
        for len in [0usize, 1, 47, 48, 49, 96, 100, 5000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let text = armor(&data);
            assert!(text.starts_with("-----BEGIN AGE ENCRYPTED FILE-----\n"));
            assert!(text.ends_with("-----END AGE ENCRYPTED FILE-----\n"));
            assert_eq!(dearmor(&text).unwrap(), data, "length {len}");
        }
    }

    #[test]
    fn test_writer_line_discipline() {
        let text = armor(&[0u8; 96]);
        let lines: Vec<&str> = text.lines().collect();
        // Marker, two full lines, the mandatory empty final line, marker.
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1].len(), 64);
        assert_eq!(lines[2].len(), 64);
        assert_eq!(lines[3], "");
    }

    #[test]
    fn test_reader_accepts_crlf() {
        let text = armor(b"crlf tolerant").replace('\n', "\r\n");
        assert_eq!(dearmor(&text).unwrap(), b"crlf tolerant");
    }

    #[test]
    fn test_reader_accepts_bounded_whitespace() {
        let text = format!("\n\n  \t{}\n \t\n", armor(b"padded"));
        assert_eq!(dearmor(&text).unwrap(), b"padded");
    }

    #[test]
    fn test_reader_rejects_excess_leading_whitespace() {
        let text = format!("{}{}", " ".repeat(1025), armor(b"x"));
        assert!(dearmor(&text).is_err());
    }

    #[test]
    fn test_reader_rejects_excess_trailing_whitespace() {
        let text = format!("{}{}", armor(b"x"), " ".repeat(1025));
        assert!(dearmor(&text).is_err());
    }

    #[test]
    fn test_reader_rejects_trailing_garbage() {
        let text = format!("{}oops", armor(b"x"));
        assert!(dearmor(&text).is_err());
    }

    #[test]
    fn test_reader_rejects_missing_begin() {
        assert!(dearmor("QUJD\n-----END AGE ENCRYPTED FILE-----\n").is_err());
    }

    #[test]
    fn test_reader_rejects_short_internal_line() {
        // Two short lines in a row: the first one is no longer final.
        let text = "-----BEGIN AGE ENCRYPTED FILE-----\nQUJD\nQUJD\n-----END AGE ENCRYPTED FILE-----\n";
        assert!(dearmor(text).is_err());
    }

    #[test]
    fn test_reader_rejects_overlong_final_line() {
        let body = "A".repeat(64);
        let text =
            format!("-----BEGIN AGE ENCRYPTED FILE-----\n{body}\n-----END AGE ENCRYPTED FILE-----\n");
        assert!(dearmor(&text).is_err());
    }

    #[test]
    fn test_reader_rejects_truncated_armor() {
        let text = armor(b"cut me off");
        let cut = &text[..text.len() - 10];
        assert!(dearmor(cut).is_err());
    }

    #[test]
    fn test_reader_rejects_whitespace_inside_body() {
        let text = "-----BEGIN AGE ENCRYPTED FILE-----\nQU JD\n-----END AGE ENCRYPTED FILE-----\n";
        assert!(dearmor(text).is_err());
    }

    #[test]
    fn test_error_class_is_armor() {
        let err = dearmor("garbage").unwrap_err();
        assert!(err
            .get_ref()
            .map(|e| e.is::<ArmorError>())
            .unwrap_or(false));
    }
}
