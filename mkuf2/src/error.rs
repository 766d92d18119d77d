use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to open {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid UF2 data size {len} in record at {offset:08X}")]
    PayloadTooLarge { offset: u64, len: u32 },
    #[error("block at {address:08X} carries {len} bytes, more than fit in one block")]
    OversizedBlock { address: u32, len: usize },
    #[error("binary loaded at {base:08X} runs past the end of the address space at offset {offset:#x}")]
    AddressOverflow { base: u32, offset: u64 },
    #[error("internal error: should have {expected} blocks for {pages} pages but have {actual}")]
    BlockCountMismatch {
        pages: usize,
        expected: usize,
        actual: usize,
    },
}

/// Error parsing a `PATH` or `ADDR:PATH` input argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseInputError {
    #[error("missing input path")]
    EmptyPath,
    #[error("invalid load address {text:?}: {source}")]
    BadAddress {
        text: String,
        #[source]
        source: ParseIntError,
    },
}
