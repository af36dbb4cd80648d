//! AGX Snapshot Format v1 Constants
//!
//! All values are little-endian. Strings are referenced as `(offset, length)`
//! pairs into the string pool; absent optional strings use [`NO_STRING`].

/// Magic bytes: "AGX1"
pub const AGX_MAGIC: [u8; 4] = [0x41, 0x47, 0x58, 0x31];

/// Current format version
pub const AGX_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Section directory entry size
pub const SECTION_ENTRY_SIZE: usize = 24;

// =============================================================================
// Header Field Offsets
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "AGX1"
    pub const MAGIC: usize = 0;
    /// u16 version
    pub const VERSION: usize = 4;
    /// u16 flags
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 64)
    pub const HEADER_BYTES: usize = 8;
    /// u32 sectionCount
    pub const SECTION_COUNT: usize = 12;
    /// u32 sectionDirOffset
    pub const SECTION_DIR_OFFSET: usize = 16;
    /// u32 sectionDirBytes
    pub const SECTION_DIR_BYTES: usize = 20;
    /// u32 buildId
    pub const BUILD_ID: usize = 24;
    /// u32 snapshotCrc32
    pub const SNAPSHOT_CRC32: usize = 28;
}

/// Header flags.
pub mod header_flags {
    /// Snapshot includes CRC32 checksum
    pub const HAS_CRC32: u16 = 1 << 0;
}

// =============================================================================
// Section Directory Entry Offsets
// =============================================================================

pub mod section_entry {
    /// u16 section id
    pub const ID: usize = 0;
    /// u16 flags
    pub const FLAGS: usize = 2;
    /// u32 file offset
    pub const OFFSET: usize = 4;
    /// u32 byte length
    pub const LENGTH: usize = 8;
    /// u32 record count (0 for pools)
    pub const COUNT: usize = 12;
    /// u32 CRC32 (0 if unused)
    pub const CRC32: usize = 16;
}

// =============================================================================
// Section IDs
// =============================================================================

/// Section type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum SectionId {
    /// String pool for all interned strings
    StrPool = 0x0001,
    /// Compiled pattern programs
    PatternPool = 0x0002,
    /// Network rules table
    NetworkRules = 0x0003,
    /// Domain constraint data
    DomainConstraintPool = 0x0004,
    /// Cosmetic rules table
    CosmeticRules = 0x0005,
    /// Named resources
    Resources = 0x0006,
    /// Enabled tags
    Tags = 0x0007,
}

impl SectionId {
    pub fn name(self) -> &'static str {
        match self {
            Self::StrPool => "str_pool",
            Self::PatternPool => "pattern_pool",
            Self::NetworkRules => "network_rules",
            Self::DomainConstraintPool => "domain_constraints",
            Self::CosmeticRules => "cosmetic_rules",
            Self::Resources => "resources",
            Self::Tags => "tags",
        }
    }
}

impl TryFrom<u16> for SectionId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::StrPool),
            0x0002 => Ok(Self::PatternPool),
            0x0003 => Ok(Self::NetworkRules),
            0x0004 => Ok(Self::DomainConstraintPool),
            0x0005 => Ok(Self::CosmeticRules),
            0x0006 => Ok(Self::Resources),
            0x0007 => Ok(Self::Tags),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Table Layouts
// =============================================================================

/// Pools (strings, patterns, constraints) start with a u32 byte length.
pub const POOL_HEADER_SIZE: usize = 4;

/// Tables start with a u32 record count.
pub const TABLE_HEADER_SIZE: usize = 4;

pub const NETWORK_RULE_SIZE: usize = 56;

pub mod network_rule {
    pub const RAW_OFF: usize = 0;
    pub const RAW_LEN: usize = 4;
    /// u16 RuleFlags
    pub const FLAGS: usize = 8;
    /// u8 AnchorType
    pub const ANCHOR: usize = 10;
    /// u8 PartyMask
    pub const PARTY_MASK: usize = 11;
    /// u32 RequestType
    pub const TYPE_MASK: usize = 12;
    pub const PROG_OFF: usize = 16;
    pub const PROG_LEN: usize = 20;
    pub const CONSTRAINT_OFF: usize = 24;
    pub const REDIRECT_OFF: usize = 28;
    pub const REDIRECT_LEN: usize = 32;
    pub const TAG_OFF: usize = 36;
    pub const TAG_LEN: usize = 40;
    /// u64 fingerprint
    pub const FINGERPRINT: usize = 44;
}

pub const COSMETIC_RULE_SIZE: usize = 24;

pub mod cosmetic_rule {
    pub const RAW_OFF: usize = 0;
    pub const RAW_LEN: usize = 4;
    pub const SELECTOR_OFF: usize = 8;
    pub const SELECTOR_LEN: usize = 12;
    /// Hostnames as includes, negated hostnames as excludes
    pub const CONSTRAINT_OFF: usize = 16;
    /// u8 CosmeticKind
    pub const KIND: usize = 20;
}

pub const RESOURCE_ENTRY_SIZE: usize = 24;

pub mod resource_entry {
    pub const NAME_OFF: usize = 0;
    pub const NAME_LEN: usize = 4;
    pub const TYPE_OFF: usize = 8;
    pub const TYPE_LEN: usize = 12;
    pub const CONTENT_OFF: usize = 16;
    pub const CONTENT_LEN: usize = 20;
}

pub const TAG_ENTRY_SIZE: usize = 8;

// =============================================================================
// Pattern Bytecode Opcodes
// =============================================================================

/// Pattern bytecode opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PatternOp {
    /// Find literal substring (u32 str offset, u32 length)
    FindLit = 0x01,
    /// Assert at start (`|`)
    AssertStart = 0x02,
    /// Assert at end (trailing `|`)
    AssertEnd = 0x03,
    /// Assert boundary (`^`)
    AssertBoundary = 0x04,
    /// Skip any (`*`)
    SkipAny = 0x05,
    /// Host anchor (`||`)
    HostAnchor = 0x06,
    /// Done
    Done = 0x07,
    /// Regular expression (u32 str offset, u32 length)
    Regex = 0x08,
}

impl TryFrom<u8> for PatternOp {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::FindLit),
            0x02 => Ok(Self::AssertStart),
            0x03 => Ok(Self::AssertEnd),
            0x04 => Ok(Self::AssertBoundary),
            0x05 => Ok(Self::SkipAny),
            0x06 => Ok(Self::HostAnchor),
            0x07 => Ok(Self::Done),
            0x08 => Ok(Self::Regex),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Sentinels
// =============================================================================

/// Absent optional string
pub const NO_STRING: u32 = 0xFFFF_FFFF;

/// No constraint sentinel
pub const NO_CONSTRAINT: u32 = 0xFFFF_FFFF;

// =============================================================================
// Helpers
// =============================================================================

/// Align offset to boundary.
#[inline]
pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Validate magic bytes.
#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == AGX_MAGIC
}

/// Read u8, `None` when out of bounds.
#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

/// Read u16 little-endian, `None` when out of bounds.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read u32 little-endian, `None` when out of bounds.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read u64 little-endian, `None` when out of bounds.
#[inline]
pub fn read_u64_le(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(read_u16_le(&data, 0), Some(0x0201));
        assert_eq!(read_u32_le(&data, 1), Some(0x05040302));
        assert_eq!(read_u32_le(&data, 2), None);
        assert_eq!(read_u64_le(&data, 0), None);
        assert_eq!(read_u32_le(&data, usize::MAX), None);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_offset(0, 4), 0);
        assert_eq!(align_offset(5, 4), 8);
        assert_eq!(align_offset(8, 4), 8);
    }

    #[test]
    fn section_ids_round_trip() {
        for raw in 1u16..=7 {
            let id = SectionId::try_from(raw).expect("known section");
            assert_eq!(id as u16, raw);
        }
        assert!(SectionId::try_from(0x00FF).is_err());
    }
}
