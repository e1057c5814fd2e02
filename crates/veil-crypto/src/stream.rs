//! Chunked streaming of large inputs through a transform, with progress
//!
//! Encrypted container format (binary):
//! ```text
//! header:
//!   "VEIL" | version (1) | algorithm id (1)
//!   kdf len (1) | kdf block            (passphrase-keyed AES only)
//!   wrapped len (2, BE) | wrapped key  (RSA only)
//!   nonce prefix (7) | chunk size (4, BE)
//! body:
//!   chunk 0 .. chunk n, each [ciphertext][16-byte tag]
//! ```
//! Every chunk except the last holds exactly `chunk size` plaintext bytes;
//! the last holds fewer (possibly zero), so truncation at a chunk boundary
//! is detectable. Chunk nonce = prefix || counter (u32 BE) || last flag, and
//! the whole header is the AAD of every chunk. Reordering, truncation,
//! extension and header edits all fail authentication.

use aes_gcm::Aes256Gcm;
use rand::RngCore;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use veil_core::config::MAX_CHUNK_SIZE;
use veil_core::{Algorithm, VeilError, VeilResult};

use crate::asymmetric::{unwrap_key, wrap_key};
use crate::digest::{DigestAccumulator, DigestResult};
use crate::kdf::{KdfParams, KeyDerivation};
use crate::keys::{KeyMaterial, SecretKey, SymmetricSecret};
use crate::symmetric::{cipher_for, open_in_place, seal_in_place};
use crate::{NONCE_SIZE, TAG_SIZE};

pub const MAGIC: &[u8; 4] = b"VEIL";
pub const CONTAINER_VERSION: u8 = 1;

const NONCE_PREFIX_SIZE: usize = 7;

/// Cooperative cancellation, checked at every chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback plus optional cancellation flag for one run.
pub struct Progress<'a> {
    callback: &'a mut dyn FnMut(u8),
    cancel: Option<CancelFlag>,
}

impl<'a> Progress<'a> {
    pub fn new(callback: &'a mut dyn FnMut(u8)) -> Self {
        Self {
            callback,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancelled(&self) -> VeilResult<()> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(VeilError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Percentage tracker. Reported values never decrease; `finish` always
/// reports 100.
struct Tracker {
    total: u64,
    consumed: u64,
    last: u8,
}

impl Tracker {
    fn new(total: u64) -> Self {
        Self {
            total,
            consumed: 0,
            last: 0,
        }
    }

    fn advance(&mut self, n: u64) -> u8 {
        self.consumed = self.consumed.saturating_add(n);
        let pct = if self.total == 0 {
            0
        } else {
            (u128::from(self.consumed.min(self.total)) * 100 / u128::from(self.total)) as u8
        };
        self.last = self.last.max(pct);
        self.last
    }
}

/// One transform applied chunk by chunk, in source order.
pub trait ChunkStep {
    /// Transform one chunk and write its output. `last` is set exactly once,
    /// on the final (possibly empty) chunk.
    fn step(&mut self, chunk: &[u8], last: bool, out: &mut dyn Write) -> VeilResult<()>;
}

/// Header of an encrypted container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub algorithm: Algorithm,
    pub kdf: Option<KeyDerivation>,
    pub wrapped_key: Option<Vec<u8>>,
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    pub chunk_size: u32,
}

impl StreamHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let kdf = self.kdf.as_ref().map(KeyDerivation::to_bytes).unwrap_or_default();
        let wrapped = self.wrapped_key.as_deref().unwrap_or_default();

        let mut out = Vec::with_capacity(4 + 2 + 1 + kdf.len() + 2 + wrapped.len() + 11);
        out.extend_from_slice(MAGIC);
        out.push(CONTAINER_VERSION);
        out.push(self.algorithm.id());
        out.push(kdf.len() as u8);
        out.extend_from_slice(&kdf);
        out.extend_from_slice(&(wrapped.len() as u16).to_be_bytes());
        out.extend_from_slice(wrapped);
        out.extend_from_slice(&self.nonce_prefix);
        out.extend_from_slice(&self.chunk_size.to_be_bytes());
        out
    }

    /// Read and validate a header. Returns the header and its raw bytes
    /// (the AAD of every chunk).
    pub fn read_from<R: Read>(reader: &mut R) -> VeilResult<(Self, Vec<u8>)> {
        let mut raw = Vec::new();

        let fixed = read_exact_vec(reader, 7)?;
        raw.extend_from_slice(&fixed);
        if &fixed[..4] != MAGIC || fixed[4] != CONTAINER_VERSION {
            return Err(VeilError::InvalidKeyOrCorruptPayload);
        }
        let algorithm = Algorithm::from_id(fixed[5])
            .filter(Algorithm::is_cipher)
            .ok_or(VeilError::InvalidKeyOrCorruptPayload)?;

        let kdf = match fixed[6] as usize {
            0 => None,
            len => {
                let block = read_exact_vec(reader, len)?;
                raw.extend_from_slice(&block);
                Some(KeyDerivation::from_bytes(&block).ok_or(VeilError::InvalidKeyOrCorruptPayload)?)
            }
        };

        let len_bytes = read_exact_vec(reader, 2)?;
        raw.extend_from_slice(&len_bytes);
        let wrapped_key = match u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize {
            0 => None,
            len => {
                let wrapped = read_exact_vec(reader, len)?;
                raw.extend_from_slice(&wrapped);
                Some(wrapped)
            }
        };

        let tail = read_exact_vec(reader, NONCE_PREFIX_SIZE + 4)?;
        raw.extend_from_slice(&tail);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&tail[..NONCE_PREFIX_SIZE]);
        let chunk_size = u32::from_be_bytes([tail[7], tail[8], tail[9], tail[10]]);

        if chunk_size == 0 || chunk_size as usize > MAX_CHUNK_SIZE {
            return Err(VeilError::InvalidKeyOrCorruptPayload);
        }
        match algorithm {
            Algorithm::Aes256 if wrapped_key.is_some() => {
                return Err(VeilError::InvalidKeyOrCorruptPayload)
            }
            Algorithm::Rsa if wrapped_key.is_none() || kdf.is_some() => {
                return Err(VeilError::InvalidKeyOrCorruptPayload)
            }
            _ => {}
        }

        Ok((
            Self {
                algorithm,
                kdf,
                wrapped_key,
                nonce_prefix,
                chunk_size,
            },
            raw,
        ))
    }
}

/// Seals plaintext chunks.
pub struct SealStep {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    aad: Vec<u8>,
    counter: u32,
    finished: bool,
    scratch: Vec<u8>,
}

/// Opens sealed chunks; writes plaintext only for chunks whose tag verifies.
pub struct OpenStep {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    aad: Vec<u8>,
    counter: u32,
    scratch: Vec<u8>,
}

/// Feeds chunks into a SHA-256 accumulator; writes nothing.
#[derive(Default)]
pub struct DigestStep {
    acc: DigestAccumulator,
}

impl DigestStep {
    pub fn finalize(self) -> DigestResult {
        self.acc.finalize()
    }
}

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32, last: bool) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..NONCE_SIZE - 1].copy_from_slice(&counter.to_be_bytes());
    nonce[NONCE_SIZE - 1] = u8::from(last);
    nonce
}

fn next_counter(counter: u32) -> VeilResult<u32> {
    counter
        .checked_add(1)
        .ok_or_else(|| VeilError::Encoding("stream exceeds 2^32 chunks; use a larger chunk size".into()))
}

impl ChunkStep for SealStep {
    fn step(&mut self, chunk: &[u8], last: bool, out: &mut dyn Write) -> VeilResult<()> {
        if self.finished {
            return Err(VeilError::Encoding("chunk after final chunk".into()));
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(chunk);
        let nonce = chunk_nonce(&self.nonce_prefix, self.counter, last);
        let tag = seal_in_place(&self.cipher, &nonce, &self.aad, &mut self.scratch)?;
        out.write_all(&self.scratch)?;
        out.write_all(&tag)?;
        self.finished = last;
        if !last {
            self.counter = next_counter(self.counter)?;
        }
        Ok(())
    }
}

impl ChunkStep for OpenStep {
    fn step(&mut self, chunk: &[u8], last: bool, out: &mut dyn Write) -> VeilResult<()> {
        if chunk.len() < TAG_SIZE {
            // truncated at a chunk boundary, or a stray tail
            return Err(VeilError::InvalidKeyOrCorruptPayload);
        }
        let (ciphertext, tag_bytes) = chunk.split_at(chunk.len() - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        self.scratch.clear();
        self.scratch.extend_from_slice(ciphertext);
        let nonce = chunk_nonce(&self.nonce_prefix, self.counter, last);
        open_in_place(&self.cipher, &nonce, &tag, &self.aad, &mut self.scratch)?;
        out.write_all(&self.scratch)?;
        if !last {
            self.counter = next_counter(self.counter)?;
        }
        Ok(())
    }
}

impl ChunkStep for DigestStep {
    fn step(&mut self, chunk: &[u8], _last: bool, _out: &mut dyn Write) -> VeilResult<()> {
        self.acc.update(chunk);
        Ok(())
    }
}

/// Drives a [`ChunkStep`] over a reader in bounded chunks.
pub struct StreamProcessor<'a> {
    chunk_size: usize,
    progress: Progress<'a>,
}

impl<'a> StreamProcessor<'a> {
    pub fn new(chunk_size: usize, progress: Progress<'a>) -> VeilResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(VeilError::Config(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE}, got {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            progress,
        })
    }

    /// Read `reader` in pieces of `read_size` bytes and feed each to `step`.
    ///
    /// A short read marks the final chunk. `total` is the full source size
    /// used for progress. Returns the number of bytes read.
    pub fn process<R: Read, W: Write, S: ChunkStep>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        read_size: usize,
        total: u64,
        step: &mut S,
    ) -> VeilResult<u64> {
        if read_size == 0 || read_size > MAX_CHUNK_SIZE + TAG_SIZE {
            return Err(VeilError::Config(format!(
                "read size must be between 1 and {}, got {read_size}",
                MAX_CHUNK_SIZE + TAG_SIZE
            )));
        }
        self.run(reader, writer, read_size, Tracker::new(total), step)
    }

    fn run<R: Read, W: Write, S: ChunkStep>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        read_size: usize,
        mut tracker: Tracker,
        step: &mut S,
    ) -> VeilResult<u64> {
        let mut buf = vec![0u8; read_size];
        let mut read_total = 0u64;

        loop {
            self.progress.check_cancelled()?;

            let n = read_full(reader, &mut buf)?;
            let last = n < read_size;
            step.step(&buf[..n], last, writer)?;

            read_total += n as u64;
            let pct = tracker.advance(n as u64);
            if last {
                break;
            }
            (self.progress.callback)(pct);
        }

        writer.flush()?;
        (self.progress.callback)(100);
        Ok(read_total)
    }

    /// Encrypt `reader` (of `total` bytes) into a container on `writer`.
    pub fn encrypt<R: Read, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        total: u64,
        key: &KeyMaterial,
        kdf_params: &KdfParams,
    ) -> VeilResult<u64> {
        let (header, cipher_key) = self.seal_header(key, kdf_params)?;
        let aad = header.to_bytes();
        writer.write_all(&aad)?;

        let mut step = SealStep {
            cipher: cipher_for(&cipher_key),
            nonce_prefix: header.nonce_prefix,
            aad,
            counter: 0,
            finished: false,
            scratch: Vec::with_capacity(self.chunk_size),
        };
        let chunk_size = self.chunk_size;
        self.run(reader, writer, chunk_size, Tracker::new(total), &mut step)
    }

    /// Decrypt a container from `reader` (of `total` bytes) onto `writer`.
    ///
    /// The container's own chunk size applies; `algorithm` must match the
    /// one recorded in the header.
    pub fn decrypt<R: Read, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        total: u64,
        key: &KeyMaterial,
        algorithm: Algorithm,
    ) -> VeilResult<u64> {
        let (header, aad) = StreamHeader::read_from(reader)?;
        if header.algorithm != algorithm {
            return Err(VeilError::AlgorithmMismatch {
                expected: algorithm,
                found: header.algorithm,
            });
        }
        let cipher_key = recover_key(&header, key)?;

        let mut tracker = Tracker::new(total);
        tracker.advance(aad.len() as u64);

        let chunk_size = header.chunk_size as usize;
        let mut step = OpenStep {
            cipher: cipher_for(&cipher_key),
            nonce_prefix: header.nonce_prefix,
            aad,
            counter: 0,
            scratch: Vec::with_capacity(chunk_size),
        };
        self.run(reader, writer, chunk_size + TAG_SIZE, tracker, &mut step)
    }

    /// Digest `reader` (of `total` bytes).
    pub fn digest<R: Read>(&mut self, reader: &mut R, total: u64) -> VeilResult<DigestResult> {
        let mut step = DigestStep::default();
        let chunk_size = self.chunk_size;
        self.run(reader, &mut std::io::sink(), chunk_size, Tracker::new(total), &mut step)?;
        Ok(step.finalize())
    }

    fn seal_header(
        &self,
        key: &KeyMaterial,
        kdf_params: &KdfParams,
    ) -> VeilResult<(StreamHeader, SecretKey)> {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_prefix);
        let chunk_size = self.chunk_size as u32;

        let (header, cipher_key) = match key {
            KeyMaterial::Symmetric(SymmetricSecret::Raw(raw)) => (
                StreamHeader {
                    algorithm: Algorithm::Aes256,
                    kdf: None,
                    wrapped_key: None,
                    nonce_prefix,
                    chunk_size,
                },
                raw.clone(),
            ),
            KeyMaterial::Symmetric(SymmetricSecret::Passphrase(passphrase)) => {
                let kd = KeyDerivation::generate(*kdf_params);
                let derived = kd.derive(passphrase)?;
                (
                    StreamHeader {
                        algorithm: Algorithm::Aes256,
                        kdf: Some(kd),
                        wrapped_key: None,
                        nonce_prefix,
                        chunk_size,
                    },
                    derived,
                )
            }
            KeyMaterial::Asymmetric(pair) => {
                let one_time = SecretKey::generate();
                let wrapped = wrap_key(pair.public(), &one_time)?;
                (
                    StreamHeader {
                        algorithm: Algorithm::Rsa,
                        kdf: None,
                        wrapped_key: Some(wrapped),
                        nonce_prefix,
                        chunk_size,
                    },
                    one_time,
                )
            }
        };
        Ok((header, cipher_key))
    }
}

fn recover_key(header: &StreamHeader, key: &KeyMaterial) -> VeilResult<SecretKey> {
    match header.algorithm {
        Algorithm::Aes256 => match (key.symmetric()?, &header.kdf) {
            (SymmetricSecret::Raw(raw), None) => Ok(raw.clone()),
            (SymmetricSecret::Passphrase(passphrase), Some(kd)) => kd.derive(passphrase),
            _ => Err(VeilError::InvalidKeyOrCorruptPayload),
        },
        Algorithm::Rsa => {
            let private = key.asymmetric()?.private()?;
            let wrapped = header
                .wrapped_key
                .as_deref()
                .ok_or(VeilError::InvalidKeyOrCorruptPayload)?;
            unwrap_key(private, wrapped)
        }
        Algorithm::Sha256 => Err(VeilError::InvalidKeyOrCorruptPayload),
    }
}

/// Fill `buf` as far as the source allows. Returns fewer than `buf.len()`
/// bytes only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> VeilResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(VeilError::Io(e)),
        }
    }
    Ok(filled)
}

fn read_exact_vec<R: Read>(reader: &mut R, len: usize) -> VeilResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => VeilError::InvalidKeyOrCorruptPayload,
        _ => VeilError::Io(e),
    })?;
    Ok(buf)
}
