//! Hashed spooling buffer for package uploads.
//!
//! Parsers need to read an upload several times (archive walk, then the blob
//! push) while the engine needs MD5/SHA-1/SHA-256/SHA-512 of the exact bytes
//! received. `HashedBuffer` computes all four digests while the body is
//! written and keeps the bytes replayable, spilling to an anonymous temp file
//! once the in-memory threshold is exceeded.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

/// Keep small uploads in memory, spill the rest to disk.
const SPILL_THRESHOLD: usize = 8 * 1024 * 1024;

/// Finalized digests of everything written into a [`HashedBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sums {
    pub md5: Vec<u8>,
    pub sha1: Vec<u8>,
    pub sha256: Vec<u8>,
    pub sha512: Vec<u8>,
}

impl Sums {
    pub fn md5_hex(&self) -> String {
        hex::encode(&self.md5)
    }

    pub fn sha1_hex(&self) -> String {
        hex::encode(&self.sha1)
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(&self.sha256)
    }

    pub fn sha512_hex(&self) -> String {
        hex::encode(&self.sha512)
    }
}

enum Spool {
    Memory(io::Cursor<Vec<u8>>),
    File(std::fs::File),
}

/// Seekable buffer that hashes everything written to it.
///
/// All writes must happen before the first read; the digests cover the
/// written bytes only.
pub struct HashedBuffer {
    spool: Spool,
    dir: Option<PathBuf>,
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
    size: u64,
}

impl HashedBuffer {
    pub fn new() -> Self {
        Self::with_dir(None)
    }

    /// Spill into `dir` instead of the system temp directory, tying the
    /// buffer's disk usage to a storage handle's scratch directory.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::with_dir(Some(dir.as_ref().to_path_buf()))
    }

    fn with_dir(dir: Option<PathBuf>) -> Self {
        HashedBuffer {
            spool: Spool::Memory(io::Cursor::new(Vec::new())),
            dir,
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha512: Sha512::new(),
            size: 0,
        }
    }

    /// Drain `r` into a new buffer and rewind it for the first read.
    pub fn from_reader<R: Read>(mut r: R) -> io::Result<Self> {
        let mut buf = HashedBuffer::new();
        io::copy(&mut r, &mut buf)?;
        buf.seek(SeekFrom::Start(0))?;
        Ok(buf)
    }

    /// Total number of bytes written.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Digests of the written bytes. May be called repeatedly.
    pub fn sums(&self) -> Sums {
        Sums {
            md5: self.md5.clone().finalize().to_vec(),
            sha1: self.sha1.clone().finalize().to_vec(),
            sha256: self.sha256.clone().finalize().to_vec(),
            sha512: self.sha512.clone().finalize().to_vec(),
        }
    }

    // Move the in-memory contents to an anonymous temp file.
    fn spill(&mut self) -> io::Result<()> {
        let data = match &mut self.spool {
            Spool::Memory(cursor) => std::mem::take(cursor.get_mut()),
            Spool::File(_) => return Ok(()),
        };
        let mut file = match &self.dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        file.write_all(&data)?;
        self.spool = Spool::File(file);
        Ok(())
    }
}

impl Default for HashedBuffer {
    fn default() -> Self {
        HashedBuffer::new()
    }
}

impl Write for HashedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Spool::Memory(cursor) = &self.spool {
            if cursor.get_ref().len() + buf.len() > SPILL_THRESHOLD {
                self.spill()?;
            }
        }
        let n = match &mut self.spool {
            Spool::Memory(cursor) => cursor.write(buf)?,
            Spool::File(file) => file.write(buf)?,
        };
        self.md5.update(&buf[..n]);
        self.sha1.update(&buf[..n]);
        self.sha256.update(&buf[..n]);
        self.sha512.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.spool {
            Spool::Memory(_) => Ok(()),
            Spool::File(file) => file.flush(),
        }
    }
}

impl Read for HashedBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.spool {
            Spool::Memory(cursor) => cursor.read(buf),
            Spool::File(file) => file.read(buf),
        }
    }
}

impl Seek for HashedBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.spool {
            Spool::Memory(cursor) => cursor.seek(pos),
            Spool::File(file) => file.seek(pos),
        }
    }
}
