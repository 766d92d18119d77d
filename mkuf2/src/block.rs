//! In-memory model of the merged address space.
//!
//! Input sources produce [`Block`]s, which are collected into 4 KiB [`Page`]s inside a
//! [`PageMap`]. Pages are the unit at which unprogrammed (all-zero) memory is dropped from the
//! output, and a page that is kept always contributes exactly [`BLOCKS_PER_PAGE`] blocks.

use crate::error::{Error, Result};
use crate::format::{BLOCK_PAYLOAD_SIZE, BLOCKS_PER_PAGE, PAGE_SIZE, Uf2Flags};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Contiguous piece of target memory, at most [`BLOCK_PAYLOAD_SIZE`] bytes long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    flags: Uf2Flags,
    address: u32,
    data: Vec<u8>,
}

impl Block {
    pub fn new(flags: Uf2Flags, address: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() > BLOCK_PAYLOAD_SIZE {
            return Err(Error::OversizedBlock {
                address,
                len: data.len(),
            });
        }
        Ok(Self {
            flags,
            address,
            data,
        })
    }

    /// Zero-filled block standing in for a slot no input wrote to.
    pub fn filler(address: u32) -> Self {
        Self {
            flags: Uf2Flags::FAMILY_ID_PRESENT,
            address,
            data: vec![0; BLOCK_PAYLOAD_SIZE],
        }
    }

    pub fn flags(&self) -> Uf2Flags {
        self.flags
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Address one past the last byte of this block. Wider than `u32` so a block ending exactly
    /// at the top of the address space does not wrap.
    pub fn end_address(&self) -> u64 {
        u64::from(self.address) + self.data.len() as u64
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

/// Aligned 4 KiB region made of [`BLOCKS_PER_PAGE`] block slots.
#[derive(Debug, Clone)]
pub struct Page {
    base_address: u32,
    slots: [Option<Block>; BLOCKS_PER_PAGE],
}

impl Page {
    pub fn new(base_address: u32) -> Self {
        debug_assert_eq!(base_address as usize % PAGE_SIZE, 0);
        Self {
            base_address,
            slots: Default::default(),
        }
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Store `block` in the slot covering its address, returning whatever it replaced.
    ///
    /// Panics if the block does not lie inside this page.
    pub fn add_block(&mut self, block: Block) -> Option<Block> {
        let slot = block
            .address
            .checked_sub(self.base_address)
            .map(|offset| offset as usize / BLOCK_PAYLOAD_SIZE)
            .filter(|&slot| slot < BLOCKS_PER_PAGE);
        let Some(slot) = slot else {
            panic!(
                "block at {:08X} does not belong to page {:08X}",
                block.address, self.base_address
            );
        };
        self.slots[slot].replace(block)
    }

    /// Whether every slot is either empty or holds only zero bytes.
    pub fn all_zero(&self) -> bool {
        self.slots.iter().flatten().all(Block::is_zero)
    }

    /// All [`BLOCKS_PER_PAGE`] blocks of this page in address order, with zero-filled blocks
    /// synthesized for empty slots.
    pub fn blocks(&self) -> impl Iterator<Item = Cow<'_, Block>> {
        self.slots.iter().enumerate().map(move |(i, slot)| match slot {
            Some(block) => Cow::Borrowed(block),
            None => Cow::Owned(Block::filler(
                self.base_address + (i * BLOCK_PAYLOAD_SIZE) as u32,
            )),
        })
    }
}

/// Pages keyed by base address.
#[derive(Debug, Default)]
pub struct PageMap {
    pages: BTreeMap<u32, Page>,
}

impl PageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `block` to its page, creating the page on first touch. Later blocks overwrite earlier
    /// ones occupying the same slot.
    pub fn add_block(&mut self, block: Block) {
        let base = block.address & !(PAGE_SIZE as u32 - 1);
        let page = self.pages.entry(base).or_insert_with(|| Page::new(base));
        if let Some(previous) = page.add_block(block) {
            tracing::trace!("overlaying block at {:08X}", previous.address);
        }
    }

    /// Drain a block source into the map. Stops at the first error; returns the number of blocks
    /// added otherwise.
    pub fn ingest<I>(&mut self, source: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<Block>>,
    {
        let mut count = 0;
        for block in source {
            self.add_block(block?);
            count += 1;
        }
        Ok(count)
    }

    /// Pages in ascending order of base address, independent of insertion order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
