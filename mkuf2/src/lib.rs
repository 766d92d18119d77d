//! Merge existing UF2 capsules and flat binaries into a single UF2 image.
//!
//! Inputs are applied in order to one address space, 4 KiB pages that end up entirely zero are
//! dropped, and the remaining pages are written out as consecutively numbered 512-byte UF2
//! records.

pub mod block;
pub mod error;
pub mod format;
pub mod merge;
pub mod source;

pub use block::{Block, Page, PageMap};
pub use error::{Error, ParseInputError, Result};
pub use merge::{EmitSummary, Run, emit, merge_inputs};
pub use source::{BinaryReader, BlockSource, InputSpec, Uf2Reader};
