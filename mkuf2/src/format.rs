//! UF2 binary record format.
//!
//! A UF2 file is a flat sequence of 512-byte records. Each record carries a 32-byte header, up to
//! 476 bytes of payload (of which this tool only ever uses the first 256), and a trailing magic
//! word. See <https://github.com/microsoft/uf2> for the format description.

#[cfg(not(target_endian = "little"))]
compile_error!("Uf2Record is read and written in native byte order, which must be little-endian");

proc_bitfield::bitfield! {
    /// Flag structure used by UF2 blocks.
    #[derive(Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
    pub struct Uf2Flags(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub extension_tags_present: bool @ 15,
        pub md5_present: bool @ 14,
        pub family_id_present: bool @ 13,
        pub file_container: bool @ 12,
        pub not_main_flash: bool @ 0,
    }
}
impl Uf2Flags {
    pub const EMPTY: Self = Self(0);
    /// Flags carried by blocks this tool creates itself.
    pub const FAMILY_ID_PRESENT: Self = Self(0x2000);
}

/// Size of one serialized record.
pub const UF2_RECORD_SIZE: usize = 512;

/// Maximum amount of data that can be contained in a UF2 block.
pub const UF2_BLOCK_DATA_SIZE: usize = 476;

/// Payload bytes per block in the merged address space.
pub const BLOCK_PAYLOAD_SIZE: usize = 256;

/// Flash page size; the unit at which empty memory is dropped from the output.
pub const PAGE_SIZE: usize = 4096;

pub const BLOCKS_PER_PAGE: usize = PAGE_SIZE / BLOCK_PAYLOAD_SIZE;

/// Family ID written to every output record unless overridden.
pub const RP2040_FAMILY_ID: u32 = 0xe48b_ff56;

/// UF2 record. Layout in memory matches the on-disk format, and so a `&Uf2Record` can be
/// directly cast to a byte slice and written out (using e.g. [`bytemuck::bytes_of`]).
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Uf2Record {
    pub magic0: u32,
    pub magic1: u32,

    pub flags: Uf2Flags,
    pub target_address: u32,
    pub payload_size: u32,
    pub block_no: u32,
    pub block_count: u32,
    pub family_id: u32,
    pub data: [u8; UF2_BLOCK_DATA_SIZE],

    pub magic2: u32,
}
const _: () = assert!(size_of::<Uf2Record>() == UF2_RECORD_SIZE);

impl Uf2Record {
    // Magic constants used by UF2 format
    pub const MAGIC0: u32 = 0x0a32_4655;
    pub const MAGIC1: u32 = 0x9e5d_5157;
    pub const MAGIC2: u32 = 0x0ab1_6f30;

    /// Build a record around `data`. The payload region past `data` and the reserved region are
    /// zero-filled.
    pub fn new(
        flags: Uf2Flags,
        target_address: u32,
        block_no: u32,
        block_count: u32,
        family_id: u32,
        data: &[u8],
    ) -> Self {
        assert!(
            data.len() <= UF2_BLOCK_DATA_SIZE,
            "Data too long for UF2 block"
        );
        let mut this = Self {
            magic0: Self::MAGIC0,
            magic1: Self::MAGIC1,
            flags,
            target_address,
            // bounded by the assertion above
            payload_size: data.len() as u32,
            block_no,
            block_count,
            family_id,
            data: [0; UF2_BLOCK_DATA_SIZE],
            magic2: Self::MAGIC2,
        };
        this.data[..data.len()].copy_from_slice(data);
        this
    }

    pub fn from_bytes(raw: &[u8; UF2_RECORD_SIZE]) -> Self {
        bytemuck::pod_read_unaligned(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn has_start_magic(&self) -> bool {
        self.magic0 == Self::MAGIC0 && self.magic1 == Self::MAGIC1
    }

    pub fn has_end_magic(&self) -> bool {
        self.magic2 == Self::MAGIC2
    }

    /// The declared payload, or `None` if `payload_size` exceeds the data region.
    pub fn payload(&self) -> Option<&[u8]> {
        self.data.get(..self.payload_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_is_bit_exact() {
        let record = Uf2Record::new(
            Uf2Flags::FAMILY_ID_PRESENT,
            0x1000_0100,
            3,
            16,
            RP2040_FAMILY_ID,
            &[0xaa; 4],
        );
        let bytes = record.as_bytes();
        assert_eq!(bytes.len(), UF2_RECORD_SIZE);

        let word = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        assert_eq!(word(0), 0x0A32_4655);
        assert_eq!(word(4), 0x9E5D_5157);
        assert_eq!(word(8), 0x2000);
        assert_eq!(word(12), 0x1000_0100);
        assert_eq!(word(16), 4);
        assert_eq!(word(20), 3);
        assert_eq!(word(24), 16);
        assert_eq!(word(28), 0xE48B_FF56);
        assert_eq!(&bytes[32..36], &[0xaa; 4]);
        assert!(bytes[36..508].iter().all(|&b| b == 0));
        assert_eq!(word(508), 0x0AB1_6F30);
    }

    #[test]
    fn flags_decode() {
        let flags = Uf2Flags::from(0x2001u32);
        assert!(flags.not_main_flash());
        assert!(flags.family_id_present());
        assert!(!flags.md5_present());
        assert!(!Uf2Flags::FAMILY_ID_PRESENT.not_main_flash());
        assert_eq!(u32::from(Uf2Flags::FAMILY_ID_PRESENT), 0x2000);
    }

    #[test]
    fn payload_respects_declared_size() {
        let mut record = Uf2Record::new(Uf2Flags::EMPTY, 0, 0, 1, 0, &[1, 2, 3]);
        assert_eq!(record.payload(), Some(&[1, 2, 3][..]));

        record.payload_size = UF2_BLOCK_DATA_SIZE as u32;
        assert_eq!(record.payload().map(<[u8]>::len), Some(UF2_BLOCK_DATA_SIZE));

        record.payload_size = UF2_BLOCK_DATA_SIZE as u32 + 1;
        assert_eq!(record.payload(), None);
    }

    #[test]
    fn magic_checks() {
        let record = Uf2Record::new(Uf2Flags::EMPTY, 0, 0, 1, 0, &[]);
        assert!(record.has_start_magic() && record.has_end_magic());

        let mut raw = [0u8; UF2_RECORD_SIZE];
        raw.copy_from_slice(record.as_bytes());
        raw[4] ^= 0xff;
        raw[511] ^= 0xff;
        let broken = Uf2Record::from_bytes(&raw);
        assert!(!broken.has_start_magic());
        assert!(!broken.has_end_magic());
    }
}
