//! Merging inputs into one address space and writing it back out as UF2.
//!
//! Block generation is a two-step process, since we need to know, before writing out the first
//! record, the total number of records in the file. All inputs are first applied to a [`PageMap`]
//! (a page's emptiness is only known once every input had a chance to write to it), then the
//! non-empty pages are counted and serialized in address order.

use crate::block::{Block, Page, PageMap};
use crate::error::{Error, Result};
use crate::format::{BLOCKS_PER_PAGE, Uf2Record};
use crate::source::InputSpec;
use std::fmt;
use std::io::Write;
use tracing::{debug, info};

/// Apply every input, in order, to a fresh page map. Later inputs overwrite earlier ones where
/// they touch the same 256-byte slot.
pub fn merge_inputs(inputs: &[InputSpec]) -> Result<PageMap> {
    let mut pagemap = PageMap::new();
    for input in inputs {
        info!("{input}");
        let count = pagemap.ingest(input.open()?)?;
        debug!("{count} blocks from {}", input.path().display());
    }
    Ok(pagemap)
}

/// Half-open range of addresses covered by consecutive output blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: u32,
    pub end: u64,
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X} - {:08X}", self.start, self.end)
    }
}

/// What [`emit`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitSummary {
    pub pages: usize,
    pub blocks: usize,
    pub runs: Vec<Run>,
}

#[derive(Default)]
struct RunTracker {
    current: Option<Run>,
    closed: Vec<Run>,
}

impl RunTracker {
    fn push(&mut self, block: &Block) {
        match &mut self.current {
            Some(run) if run.end == u64::from(block.address()) => run.end = block.end_address(),
            current => {
                let next = Run {
                    start: block.address(),
                    end: block.end_address(),
                };
                if let Some(run) = current.replace(next) {
                    info!("{run}");
                    self.closed.push(run);
                }
            }
        }
    }

    fn finish(mut self) -> Vec<Run> {
        if let Some(run) = self.current.take() {
            info!("{run}");
            self.closed.push(run);
        }
        self.closed
    }
}

/// Serialize every non-empty page of `pagemap` to `out`, numbering the records sequentially and
/// stamping each with `family_id`.
pub fn emit<W: Write>(pagemap: &PageMap, family_id: u32, mut out: W) -> Result<EmitSummary> {
    let pages: Vec<&Page> = pagemap.pages().filter(|page| !page.all_zero()).collect();
    let blocks: Vec<_> = pages.iter().copied().flat_map(Page::blocks).collect();

    let expected = pages.len() * BLOCKS_PER_PAGE;
    if blocks.len() != expected {
        return Err(Error::BlockCountMismatch {
            pages: pages.len(),
            expected,
            actual: blocks.len(),
        });
    }

    info!("Pages: {}", pages.len());
    info!("Blocks: {}", blocks.len());

    // a 32-bit address space holds at most 2^24 blocks
    let block_count = blocks.len() as u32;
    let mut runs = RunTracker::default();
    for (block_no, block) in (0..block_count).zip(&blocks) {
        runs.push(block);
        let record = Uf2Record::new(
            block.flags(),
            block.address(),
            block_no,
            block_count,
            family_id,
            block.data(),
        );
        out.write_all(record.as_bytes())?;
    }
    out.flush()?;

    Ok(EmitSummary {
        pages: pages.len(),
        blocks: blocks.len(),
        runs: runs.finish(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{RP2040_FAMILY_ID, UF2_RECORD_SIZE, Uf2Flags};

    fn block(address: u32, data: Vec<u8>) -> Block {
        Block::new(Uf2Flags::FAMILY_ID_PRESENT, address, data).unwrap()
    }

    fn records(out: &[u8]) -> Vec<Uf2Record> {
        out.chunks_exact(UF2_RECORD_SIZE)
            .map(|raw| Uf2Record::from_bytes(raw.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn empty_map_emits_nothing() {
        let mut out = Vec::new();
        let summary = emit(&PageMap::new(), RP2040_FAMILY_ID, &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(
            summary,
            EmitSummary {
                pages: 0,
                blocks: 0,
                runs: vec![]
            }
        );
    }

    #[test]
    fn zero_pages_are_dropped() {
        let mut map = PageMap::new();
        map.add_block(block(0x1000, vec![0; 256]));
        map.add_block(block(0x3000, vec![0, 9]));

        let mut out = Vec::new();
        let summary = emit(&map, RP2040_FAMILY_ID, &mut out).unwrap();
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.blocks, 16);
        assert_eq!(out.len(), 16 * UF2_RECORD_SIZE);

        let records = records(&out);
        assert_eq!(records[0].target_address, 0x3000);
        assert_eq!(records[0].payload_size, 2);
        assert_eq!(records[0].payload(), Some(&[0, 9][..]));
        assert_eq!(records[15].target_address, 0x3f00);
        assert_eq!(records[15].payload_size, 256);
    }

    #[test]
    fn records_are_numbered_across_pages() {
        let mut map = PageMap::new();
        // inserted out of order on purpose
        map.add_block(block(0x8000, vec![1; 256]));
        map.add_block(block(0x0, vec![1; 256]));
        map.add_block(block(0x1000, vec![1; 256]));

        let mut out = Vec::new();
        let summary = emit(&map, 0x1234_5678, &mut out).unwrap();
        assert_eq!(summary.blocks, 48);

        let records = records(&out);
        assert_eq!(records.len(), 48);
        for (i, record) in records.iter().enumerate() {
            assert!(record.has_start_magic() && record.has_end_magic());
            assert_eq!(record.block_no, i as u32);
            assert_eq!(record.block_count, 48);
            assert_eq!(record.family_id, 0x1234_5678);
        }
        assert_eq!(records[0].target_address, 0x0);
        assert_eq!(records[16].target_address, 0x1000);
        assert_eq!(records[32].target_address, 0x8000);
    }

    #[test]
    fn runs_split_on_discontinuity() {
        let mut map = PageMap::new();
        map.add_block(block(0x0, vec![1; 256]));
        map.add_block(block(0x1000, vec![1; 256]));
        map.add_block(block(0x8000, vec![1; 256]));

        let summary = emit(&map, RP2040_FAMILY_ID, std::io::sink()).unwrap();
        assert_eq!(
            summary.runs,
            [
                Run {
                    start: 0x0,
                    end: 0x2000
                },
                Run {
                    start: 0x8000,
                    end: 0x9000
                },
            ]
        );
        assert_eq!(summary.runs[1].to_string(), "00008000 - 00009000");
    }

    #[test]
    fn short_block_breaks_run() {
        let mut map = PageMap::new();
        map.add_block(block(0x0, vec![1; 16]));

        let summary = emit(&map, RP2040_FAMILY_ID, std::io::sink()).unwrap();
        assert_eq!(
            summary.runs,
            [
                Run {
                    start: 0x0,
                    end: 0x10
                },
                Run {
                    start: 0x100,
                    end: 0x1000
                },
            ]
        );
    }

    #[test]
    fn run_reaching_top_of_address_space() {
        let mut map = PageMap::new();
        map.add_block(block(0xffff_ff00, vec![1; 256]));

        let summary = emit(&map, RP2040_FAMILY_ID, std::io::sink()).unwrap();
        assert_eq!(summary.runs.len(), 1);
        assert_eq!(summary.runs[0].to_string(), "FFFFF000 - 100000000");
    }

    #[test]
    fn flags_are_carried_through() {
        let mut map = PageMap::new();
        map.add_block(Block::new(Uf2Flags::from(0x2000u32 | 0x4000), 0x0, vec![1; 256]).unwrap());

        let mut out = Vec::new();
        emit(&map, RP2040_FAMILY_ID, &mut out).unwrap();
        let records = records(&out);
        assert_eq!(u32::from(records[0].flags), 0x6000);
        assert_eq!(u32::from(records[1].flags), 0x2000);
    }
}
