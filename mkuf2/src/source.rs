//! Block sources: existing UF2 capsules and flat binaries.

use crate::block::Block;
use crate::error::{Error, ParseInputError, Result};
use crate::format::{BLOCK_PAYLOAD_SIZE, UF2_RECORD_SIZE, Uf2Flags, Uf2Record};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, trace};

/// Lazily produced blocks of one input.
pub type BlockSource = Box<dyn Iterator<Item = Result<Block>>>;

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| Error::Open {
            path: path.to_owned(),
            source,
        })
}

/// Fill `buf` from `reader`, stopping early only at end of input. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads blocks out of an existing UF2 file.
///
/// Records with bad magic or with the not-main-flash flag set are skipped. A record declaring more
/// payload than a UF2 record can carry is a fatal error, after which the reader yields nothing
/// more. A trailing partial record ends the stream.
pub struct Uf2Reader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl Uf2Reader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(open(path.as_ref())?))
    }
}

impl<R: Read> Uf2Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            done: false,
        }
    }

    fn read_block(&mut self) -> Result<Option<Block>> {
        loop {
            let mut raw = [0u8; UF2_RECORD_SIZE];
            let n = read_full(&mut self.inner, &mut raw)?;
            if n < UF2_RECORD_SIZE {
                if n > 0 {
                    debug!("ignoring {n} trailing bytes at {:08X}", self.offset);
                }
                return Ok(None);
            }
            let offset = self.offset;
            self.offset += UF2_RECORD_SIZE as u64;

            let record = Uf2Record::from_bytes(&raw);
            let Some(payload) = record.payload() else {
                return Err(Error::PayloadTooLarge {
                    offset,
                    len: record.payload_size,
                });
            };
            if !record.has_start_magic() {
                trace!("skipping record at {offset:08X}: bad magic at start");
                continue;
            }
            if !record.has_end_magic() {
                trace!("skipping record at {offset:08X}: bad magic at end");
                continue;
            }
            if record.flags.not_main_flash() {
                trace!("skipping record at {offset:08X}: not main flash");
                continue;
            }
            return Block::new(record.flags, record.target_address, payload.to_vec()).map(Some);
        }
    }
}

impl<R: Read> Iterator for Uf2Reader<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.read_block().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

/// Cuts a flat binary into consecutive blocks starting at a load address. The last block may be
/// short.
pub struct BinaryReader<R> {
    inner: R,
    base: u32,
    offset: u64,
    done: bool,
}

impl BinaryReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, base: u32) -> Result<Self> {
        Ok(Self::new(open(path.as_ref())?, base))
    }
}

impl<R: Read> BinaryReader<R> {
    pub fn new(inner: R, base: u32) -> Self {
        Self {
            inner,
            base,
            offset: 0,
            done: false,
        }
    }

    fn read_block(&mut self) -> Result<Option<Block>> {
        let mut chunk = vec![0u8; BLOCK_PAYLOAD_SIZE];
        let n = read_full(&mut self.inner, &mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        chunk.truncate(n);

        let start = u64::from(self.base) + self.offset;
        let address = u32::try_from(start)
            .ok()
            .filter(|_| start + n as u64 <= 1 << 32)
            .ok_or(Error::AddressOverflow {
                base: self.base,
                offset: self.offset,
            })?;
        self.offset += n as u64;

        Block::new(Uf2Flags::FAMILY_ID_PRESENT, address, chunk).map(Some)
    }
}

impl<R: Read> Iterator for BinaryReader<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.read_block().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

/// One input argument: `PATH` for a UF2 capsule, or `ADDR:PATH` for a flat binary loaded at the
/// hexadecimal address `ADDR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    Uf2(PathBuf),
    Binary { address: u32, path: PathBuf },
}

impl InputSpec {
    pub fn path(&self) -> &Path {
        match self {
            Self::Uf2(path) | Self::Binary { path, .. } => path,
        }
    }

    pub fn open(&self) -> Result<BlockSource> {
        Ok(match self {
            Self::Uf2(path) => Box::new(Uf2Reader::open(path)?),
            Self::Binary { address, path } => Box::new(BinaryReader::open(path, *address)?),
        })
    }
}

impl FromStr for InputSpec {
    type Err = ParseInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((address, path)) = s.split_once(':') else {
            if s.is_empty() {
                return Err(ParseInputError::EmptyPath);
            }
            return Ok(Self::Uf2(s.into()));
        };
        if path.is_empty() {
            return Err(ParseInputError::EmptyPath);
        }
        let digits = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .unwrap_or(address);
        let address = u32::from_str_radix(digits, 16).map_err(|source| {
            ParseInputError::BadAddress {
                text: address.to_owned(),
                source,
            }
        })?;
        Ok(Self::Binary {
            address,
            path: path.into(),
        })
    }
}

impl fmt::Display for InputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uf2(path) => write!(f, "UF2 -- {}", path.display()),
            Self::Binary { address, path } => write!(f, "@{address:08X} -- {}", path.display()),
        }
    }
}
