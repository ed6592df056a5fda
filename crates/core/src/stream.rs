// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Chunked ChaCha20-Poly1305 payload encryption.
//!
//! The payload after the header is a 16-byte random nonce followed by
//! back-to-back encrypted chunks. Each chunk seals up to 64 KiB of plaintext
//! under a per-chunk nonce made of an 88-bit big-endian counter and a
//! last-chunk flag byte. The flag byte is the only end-of-stream marker, so
//! the reader treats framing very strictly: a short chunk must be final, an
//! empty final chunk is only allowed for an empty plaintext, and nothing may
//! follow the final chunk.

use std::io;
use std::io::{Read, Seek, SeekFrom, Write};

use aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::PayloadError;
use crate::FileKey;

/// Plaintext bytes per non-final chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Poly1305 authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Ciphertext bytes per non-final chunk.
pub const ENCRYPTED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// Length of the random nonce written between header and first chunk.
pub const PAYLOAD_NONCE_SIZE: usize = 16;

const AEAD_NONCE_SIZE: usize = 12;
const LAST_CHUNK_FLAG: u8 = 0x01;
const PAYLOAD_INFO: &[u8] = b"payload";

/// Derive the stream key from the file key and the per-file payload nonce.
pub(crate) fn derive_stream_key(file_key: &FileKey, nonce: &[u8; PAYLOAD_NONCE_SIZE]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(nonce), file_key.expose_secret());
    let mut key = [0u8; 32];
    hkdf.expand(PAYLOAD_INFO, &mut key)
        .expect("HKDF-SHA-256 produces 32 bytes");
    key
}

fn chunk_nonce(counter: u128, last: bool) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    let bytes = counter.to_be_bytes();
    nonce[..11].copy_from_slice(&bytes[5..]);
    nonce[11] = if last { LAST_CHUNK_FLAG } else { 0 };
    nonce
}

fn new_cipher(stream_key: &[u8; 32]) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(stream_key))
}

/// Read until `buf` is full or the source reaches EOF. Returns the number of
/// bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypting writer over an arbitrary sink.
///
/// Plaintext is buffered into 64 KiB chunks; a full buffer is only sealed
/// once more plaintext arrives, so the buffered chunk can still become the
/// flagged final chunk. [`StreamWriter::finish`] seals the final chunk;
/// dropping the writer without calling it leaves the file unterminated and
/// undecryptable.
pub struct StreamWriter<W: Write> {
    inner: W,
    cipher: ChaCha20Poly1305,
    buffer: Vec<u8>,
    counter: u128,
    finished: bool,
}

impl<W: Write> StreamWriter<W> {
    pub(crate) fn new(stream_key: &[u8; 32], inner: W) -> Self {
        StreamWriter {
            inner,
            cipher: new_cipher(stream_key),
            buffer: Vec::with_capacity(CHUNK_SIZE),
            counter: 0,
            finished: false,
        }
    }

    fn seal_chunk(&mut self, last: bool) -> io::Result<()> {
        let nonce = chunk_nonce(self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), self.buffer.as_slice())
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "chunk encryption failed"))?;
        self.inner.write_all(&ciphertext)?;
        self.counter += 1;
        self.buffer.zeroize();
        self.buffer.clear();
        Ok(())
    }

    /// Seal the final chunk and flush the sink.
    ///
    /// Must be called exactly once; any later write (or second finish) fails
    /// with a distinct error.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Err(PayloadError::WriteAfterFinish.into());
        }
        self.finished = true;
        // The buffer is only empty here if no plaintext was ever written, in
        // which case the single empty final chunk is the legal encoding.
        self.seal_chunk(true)?;
        self.inner.flush()
    }

    /// Consume the writer and return the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(PayloadError::WriteAfterFinish.into());
        }
        let mut remaining = data;
        while !remaining.is_empty() {
            if self.buffer.len() == CHUNK_SIZE {
                // More plaintext is pending, so this chunk is not the last.
                self.seal_chunk(false)?;
            }
            let take = usize::min(CHUNK_SIZE - self.buffer.len(), remaining.len());
            self.buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // The buffered chunk is intentionally retained: it may still need the
        // last-chunk flag.
        self.inner.flush()
    }
}

/// Decrypting reader over an arbitrary source.
///
/// Payload failures surface as `io::Error` values wrapping a
/// [`PayloadError`], so callers can recover the failure class with
/// `err.get_ref()`. All plaintext decrypted before a failure is returned
/// first.
pub struct StreamReader<R: Read> {
    inner: R,
    cipher: ChaCha20Poly1305,
    counter: u128,
    plaintext: Vec<u8>,
    position: usize,
    peeked: Option<u8>,
    done: bool,
}

impl<R: Read> StreamReader<R> {
    pub(crate) fn new(stream_key: &[u8; 32], inner: R) -> Self {
        StreamReader {
            inner,
            cipher: new_cipher(stream_key),
            counter: 0,
            plaintext: Vec::new(),
            position: 0,
            peeked: None,
            done: false,
        }
    }

    fn open_chunk(&mut self, ciphertext: &[u8], last: bool) -> Result<Vec<u8>, PayloadError> {
        let nonce = chunk_nonce(self.counter, last);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| PayloadError::ChunkAuthentication(self.counter))
    }

    /// Read and decrypt the next chunk into the plaintext buffer.
    fn read_chunk(&mut self) -> io::Result<()> {
        let mut ciphertext = vec![0u8; ENCRYPTED_CHUNK_SIZE];
        let mut filled = 0;
        if let Some(byte) = self.peeked.take() {
            ciphertext[0] = byte;
            filled = 1;
        }
        filled += read_full(&mut self.inner, &mut ciphertext[filled..])?;
        ciphertext.truncate(filled);

        if filled < TAG_SIZE {
            // Includes the fully-empty payload and EOF after an unflagged
            // chunk: the final chunk never arrived.
            return Err(PayloadError::Truncated.into());
        }

        let plaintext = if filled < ENCRYPTED_CHUNK_SIZE {
            // A short chunk can only be the flagged final chunk.
            if filled == TAG_SIZE && self.counter > 0 {
                return Err(PayloadError::EmptyFinalChunk.into());
            }
            let plaintext = self.open_chunk(&ciphertext, true)?;
            self.done = true;
            plaintext
        } else {
            let mut probe = [0u8; 1];
            let more = read_full(&mut self.inner, &mut probe)? == 1;
            if more {
                self.peeked = Some(probe[0]);
            }
            match self.open_chunk(&ciphertext, false) {
                Ok(plaintext) => plaintext,
                Err(err) => {
                    // A full-length final chunk carries the flag, so retry
                    // exactly once with it set.
                    let plaintext = self.open_chunk(&ciphertext, true).map_err(|_| err)?;
                    if more {
                        return Err(PayloadError::TrailingData.into());
                    }
                    self.done = true;
                    plaintext
                }
            }
        };

        self.counter += 1;
        self.plaintext.zeroize();
        self.plaintext = plaintext;
        self.position = 0;
        Ok(())
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.position == self.plaintext.len() {
            if self.done {
                return Ok(0);
            }
            self.read_chunk()?;
        }
        let n = usize::min(out.len(), self.plaintext.len() - self.position);
        out[..n].copy_from_slice(&self.plaintext[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl<R: Read> Drop for StreamReader<R> {
    fn drop(&mut self) {
        self.plaintext.zeroize();
    }
}

/// Random-access decrypting reader over a seekable source.
///
/// The total payload length is validated up front and the final chunk is
/// authenticated during construction, so a truncated file fails early.
/// Reads decrypt the containing chunk and cache the most recent one. The
/// reader is not thread-safe; wrap it in a mutex to share it.
pub struct SeekableReader<R: Read + Seek> {
    inner: R,
    cipher: ChaCha20Poly1305,
    payload_start: u64,
    chunk_count: u64,
    last_chunk_size: usize,
    plaintext_len: u64,
    offset: u64,
    cached_index: Option<u64>,
    cache: Vec<u8>,
}

impl<R: Read + Seek> SeekableReader<R> {
    /// `payload_start` is the source offset of the first encrypted chunk,
    /// immediately after the 16-byte payload nonce.
    pub(crate) fn new(
        stream_key: &[u8; 32],
        mut inner: R,
        payload_start: u64,
    ) -> Result<Self, PayloadError> {
        let end = inner
            .seek(SeekFrom::End(0))
            .map_err(|_| PayloadError::Truncated)?;
        let length = end.saturating_sub(payload_start);
        if end < payload_start || length < TAG_SIZE as u64 {
            return Err(PayloadError::InvalidLength(length));
        }

        let encrypted_chunk = ENCRYPTED_CHUNK_SIZE as u64;
        let chunk_count = u64::max(1, (length - TAG_SIZE as u64).div_ceil(encrypted_chunk));
        let last_chunk_size = length - (chunk_count - 1) * encrypted_chunk;
        if last_chunk_size < TAG_SIZE as u64 || last_chunk_size > encrypted_chunk {
            return Err(PayloadError::InvalidLength(length));
        }
        if chunk_count > 1 && last_chunk_size == TAG_SIZE as u64 {
            return Err(PayloadError::EmptyFinalChunk);
        }
        let plaintext_len =
            (chunk_count - 1) * CHUNK_SIZE as u64 + (last_chunk_size - TAG_SIZE as u64);

        let mut reader = SeekableReader {
            inner,
            cipher: new_cipher(stream_key),
            payload_start,
            chunk_count,
            last_chunk_size: last_chunk_size as usize,
            plaintext_len,
            offset: 0,
            cached_index: None,
            cache: Vec::new(),
        };
        // Authenticate the flagged final chunk before serving any reads.
        reader.load_chunk(chunk_count - 1)?;
        Ok(reader)
    }

    /// Total plaintext length of the stream.
    pub fn len(&self) -> u64 {
        self.plaintext_len
    }

    /// Whether the plaintext is empty.
    pub fn is_empty(&self) -> bool {
        self.plaintext_len == 0
    }

    fn load_chunk(&mut self, index: u64) -> Result<(), PayloadError> {
        if self.cached_index == Some(index) {
            return Ok(());
        }
        let last = index == self.chunk_count - 1;
        let size = if last {
            self.last_chunk_size
        } else {
            ENCRYPTED_CHUNK_SIZE
        };
        let position = self.payload_start + index * ENCRYPTED_CHUNK_SIZE as u64;
        self.inner
            .seek(SeekFrom::Start(position))
            .map_err(|_| PayloadError::Truncated)?;
        let mut ciphertext = vec![0u8; size];
        self.inner
            .read_exact(&mut ciphertext)
            .map_err(|_| PayloadError::Truncated)?;

        let nonce = chunk_nonce(u128::from(index), last);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| PayloadError::ChunkAuthentication(u128::from(index)))?;
        self.cache.zeroize();
        self.cache = plaintext;
        self.cached_index = Some(index);
        Ok(())
    }
}

impl<R: Read + Seek> Read for SeekableReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.plaintext_len || out.is_empty() {
            return Ok(0);
        }
        let index = self.offset / CHUNK_SIZE as u64;
        self.load_chunk(index)?;
        let within = (self.offset % CHUNK_SIZE as u64) as usize;
        let n = usize::min(out.len(), self.cache.len() - within);
        out[..n].copy_from_slice(&self.cache[within..within + n]);
        self.offset += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SeekableReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.plaintext_len.checked_add_signed(delta),
        };
        match target {
            Some(offset) => {
                self.offset = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the stream",
            )),
        }
    }
}

impl<R: Read + Seek> Drop for SeekableReader<R> {
    fn drop(&mut self) {
        self.cache.zeroize();
    }
}
