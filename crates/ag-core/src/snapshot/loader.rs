//! AGX Snapshot Loader
//!
//! [`Snapshot::load`] validates the header, checksum and section directory
//! without copying. [`Snapshot::contents`] decodes the tables into owned rule
//! records; every read is bounds-checked and a malformed snapshot yields an
//! error, never a partial result.

use std::collections::BTreeMap;

use crate::filters::{CosmeticFilter, CosmeticKind, DomainConstraint, NetworkFilter};
use crate::hash::crc32;
use crate::pattern::{Pattern, PatternBody, PatternPart};
use crate::resources::Resource;
use crate::types::{AnchorType, PartyMask, RequestType, RuleFlags};
use super::format::*;

/// Error type for snapshot loading.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("Snapshot has no checksum")]
    MissingChecksum,
    #[error("CRC32 mismatch: stored={stored}, computed={computed}")]
    Crc32Mismatch { stored: u32, computed: u32 },
    #[error("Invalid section: {0}")]
    InvalidSection(String),
    #[error("Data too short")]
    DataTooShort,
    #[error("Read out of bounds in {section} at offset {offset}")]
    OutOfBounds { section: &'static str, offset: usize },
    #[error("Invalid UTF-8 string in {0}")]
    InvalidUtf8(&'static str),
    #[error("Invalid pattern program: {0}")]
    InvalidPattern(String),
    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
}

/// Section metadata.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub id: SectionId,
    pub flags: u16,
    pub offset: usize,
    pub length: usize,
    pub count: u32,
    pub crc32: u32,
}

/// Everything an engine persists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotContents {
    pub network: Vec<NetworkFilter>,
    pub cosmetic: Vec<CosmeticFilter>,
    pub resources: Vec<Resource>,
    pub tags: Vec<String>,
}

/// Validated, zero-copy snapshot view.
pub struct Snapshot<'a> {
    data: &'a [u8],
    pub version: u16,
    pub flags: u16,
    pub build_id: u32,
    sections: BTreeMap<SectionId, SectionInfo>,
}

fn out_of_bounds(section: &'static str, offset: usize) -> SnapshotError {
    SnapshotError::OutOfBounds { section, offset }
}

impl<'a> Snapshot<'a> {
    /// Load a snapshot from bytes.
    pub fn load(data: &'a [u8]) -> Result<Self, SnapshotError> {
        if data.len() < HEADER_SIZE {
            return Err(SnapshotError::DataTooShort);
        }

        if !validate_magic(data) {
            return Err(SnapshotError::InvalidMagic);
        }

        let header_u16 = |offset: usize| read_u16_le(data, offset).ok_or(SnapshotError::DataTooShort);
        let header_u32 = |offset: usize| read_u32_le(data, offset).ok_or(SnapshotError::DataTooShort);

        let version = header_u16(header::VERSION)?;
        if version != AGX_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let flags = header_u16(header::FLAGS)?;
        let section_count = header_u32(header::SECTION_COUNT)? as usize;
        let section_dir_offset = header_u32(header::SECTION_DIR_OFFSET)? as usize;
        let build_id = header_u32(header::BUILD_ID)?;

        if flags & header_flags::HAS_CRC32 == 0 {
            return Err(SnapshotError::MissingChecksum);
        }
        let stored = header_u32(header::SNAPSHOT_CRC32)?;
        let computed = snapshot_crc32(data);
        if stored != computed {
            return Err(SnapshotError::Crc32Mismatch { stored, computed });
        }

        let dir_end = section_count
            .checked_mul(SECTION_ENTRY_SIZE)
            .and_then(|bytes| bytes.checked_add(section_dir_offset))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| out_of_bounds("section_directory", section_dir_offset))?;

        let mut sections = BTreeMap::new();
        for entry_offset in (section_dir_offset..dir_end).step_by(SECTION_ENTRY_SIZE) {
            let field_u16 = |field: usize| read_u16_le(data, entry_offset + field).ok_or(SnapshotError::DataTooShort);
            let field_u32 = |field: usize| read_u32_le(data, entry_offset + field).ok_or(SnapshotError::DataTooShort);

            let id_raw = field_u16(section_entry::ID)?;
            let Ok(id) = SectionId::try_from(id_raw) else {
                log::debug!("Skipping unknown snapshot section {id_raw:#06x}");
                continue;
            };

            let info = SectionInfo {
                id,
                flags: field_u16(section_entry::FLAGS)?,
                offset: field_u32(section_entry::OFFSET)? as usize,
                length: field_u32(section_entry::LENGTH)? as usize,
                count: field_u32(section_entry::COUNT)?,
                crc32: field_u32(section_entry::CRC32)?,
            };

            if info.offset.checked_add(info.length).map_or(true, |end| end > data.len()) {
                return Err(SnapshotError::InvalidSection(format!(
                    "{} exceeds snapshot bounds",
                    id.name()
                )));
            }

            sections.insert(id, info);
        }

        Ok(Self {
            data,
            version,
            flags,
            build_id,
            sections,
        })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Section metadata in id order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionInfo> {
        self.sections.values()
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn get_section(&self, id: SectionId) -> Option<&'a [u8]> {
        let info = self.sections.get(&id)?;
        self.data.get(info.offset..info.offset + info.length)
    }

    /// Payload of a length-prefixed pool. A missing section is an empty pool.
    fn pool(&self, id: SectionId) -> Result<&'a [u8], SnapshotError> {
        let Some(section) = self.get_section(id) else {
            return Ok(&[]);
        };
        let len = read_u32_le(section, 0).ok_or_else(|| out_of_bounds(id.name(), 0))? as usize;
        section
            .get(POOL_HEADER_SIZE..POOL_HEADER_SIZE.saturating_add(len))
            .ok_or_else(|| out_of_bounds(id.name(), POOL_HEADER_SIZE))
    }

    /// Records of a count-prefixed table. A missing section is an empty table.
    fn table(&self, id: SectionId, record_size: usize) -> Result<Vec<&'a [u8]>, SnapshotError> {
        let Some(section) = self.get_section(id) else {
            return Ok(Vec::new());
        };
        let count = read_u32_le(section, 0).ok_or_else(|| out_of_bounds(id.name(), 0))? as usize;
        let bytes = count
            .checked_mul(record_size)
            .filter(|&bytes| bytes <= section.len() - TABLE_HEADER_SIZE)
            .ok_or_else(|| out_of_bounds(id.name(), TABLE_HEADER_SIZE))?;

        Ok(section[TABLE_HEADER_SIZE..TABLE_HEADER_SIZE + bytes]
            .chunks_exact(record_size)
            .collect())
    }

    /// Decode all rule records, resources and tags.
    pub fn contents(&self) -> Result<SnapshotContents, SnapshotError> {
        let decoder = Decoder {
            strings: self.pool(SectionId::StrPool)?,
            patterns: self.pool(SectionId::PatternPool)?,
            constraints: self.pool(SectionId::DomainConstraintPool)?,
        };

        let network = self
            .table(SectionId::NetworkRules, NETWORK_RULE_SIZE)?
            .into_iter()
            .map(|record| decoder.network_rule(record))
            .collect::<Result<Vec<_>, _>>()?;

        let cosmetic = self
            .table(SectionId::CosmeticRules, COSMETIC_RULE_SIZE)?
            .into_iter()
            .map(|record| decoder.cosmetic_rule(record))
            .collect::<Result<Vec<_>, _>>()?;

        let resources = self
            .table(SectionId::Resources, RESOURCE_ENTRY_SIZE)?
            .into_iter()
            .map(|record| decoder.resource(record))
            .collect::<Result<Vec<_>, _>>()?;

        let tags = self
            .table(SectionId::Tags, TAG_ENTRY_SIZE)?
            .into_iter()
            .map(|record| decoder.string_at(record, 0, 4, "tags").map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SnapshotContents {
            network,
            cosmetic,
            resources,
            tags,
        })
    }
}

/// Checksum over the whole snapshot except the CRC field itself.
pub fn snapshot_crc32(data: &[u8]) -> u32 {
    let mut crc_data = Vec::with_capacity(data.len().saturating_sub(4));
    crc_data.extend_from_slice(&data[..header::SNAPSHOT_CRC32]);
    crc_data.extend_from_slice(&data[header::SNAPSHOT_CRC32 + 4..]);
    crc32(&crc_data)
}

/// Validate and decode a snapshot in one step.
pub fn load_snapshot(data: &[u8]) -> Result<SnapshotContents, SnapshotError> {
    Snapshot::load(data)?.contents()
}

// =============================================================================
// Record decoding
// =============================================================================

struct Decoder<'a> {
    strings: &'a [u8],
    patterns: &'a [u8],
    constraints: &'a [u8],
}

fn field_u32(record: &[u8], offset: usize, section: &'static str) -> Result<u32, SnapshotError> {
    read_u32_le(record, offset).ok_or_else(|| out_of_bounds(section, offset))
}

impl<'a> Decoder<'a> {
    fn string(&self, offset: u32, len: u32, section: &'static str) -> Result<&'a str, SnapshotError> {
        let start = offset as usize;
        let bytes = self
            .strings
            .get(start..start.saturating_add(len as usize))
            .ok_or_else(|| out_of_bounds("str_pool", start))?;
        std::str::from_utf8(bytes).map_err(|_| SnapshotError::InvalidUtf8(section))
    }

    /// String referenced by `(offset, length)` fields of a record.
    fn string_at(
        &self,
        record: &[u8],
        off_field: usize,
        len_field: usize,
        section: &'static str,
    ) -> Result<&'a str, SnapshotError> {
        let offset = field_u32(record, off_field, section)?;
        let len = field_u32(record, len_field, section)?;
        self.string(offset, len, section)
    }

    fn optional_string_at(
        &self,
        record: &[u8],
        off_field: usize,
        len_field: usize,
        section: &'static str,
    ) -> Result<Option<String>, SnapshotError> {
        if field_u32(record, off_field, section)? == NO_STRING {
            return Ok(None);
        }
        self.string_at(record, off_field, len_field, section).map(|s| Some(s.to_string()))
    }

    fn constraint(&self, offset: u32) -> Result<Option<DomainConstraint>, SnapshotError> {
        if offset == NO_CONSTRAINT {
            return Ok(None);
        }
        let base = offset as usize;
        let read_count = |at: usize| {
            read_u32_le(self.constraints, at)
                .map(|n| n as usize)
                .ok_or_else(|| out_of_bounds("domain_constraints", at))
        };
        let include_count = read_count(base)?;
        let exclude_count = read_count(base + 4)?;

        let read_hashes = |start: usize, count: usize| -> Result<Vec<u64>, SnapshotError> {
            (0..count)
                .map(|i| {
                    let at = start + i * 8;
                    read_u64_le(self.constraints, at).ok_or_else(|| out_of_bounds("domain_constraints", at))
                })
                .collect()
        };

        let include_start = base + 8;
        let exclude_start = include_count
            .checked_mul(8)
            .and_then(|bytes| bytes.checked_add(include_start))
            .filter(|&end| end <= self.constraints.len())
            .ok_or_else(|| out_of_bounds("domain_constraints", include_start))?;
        if exclude_count
            .checked_mul(8)
            .and_then(|bytes| bytes.checked_add(exclude_start))
            .map_or(true, |end| end > self.constraints.len())
        {
            return Err(out_of_bounds("domain_constraints", exclude_start));
        }

        Ok(Some(DomainConstraint {
            include: read_hashes(include_start, include_count)?,
            exclude: read_hashes(exclude_start, exclude_count)?,
        }))
    }

    fn pattern(&self, offset: u32, len: u32) -> Result<Pattern, SnapshotError> {
        let start = offset as usize;
        let program = self
            .patterns
            .get(start..start.saturating_add(len as usize))
            .ok_or_else(|| out_of_bounds("pattern_pool", start))?;

        let mut anchor = AnchorType::None;
        let mut right_anchor = false;
        let mut parts = Vec::new();
        let mut pc = 0;

        loop {
            let op = read_u8(program, pc).ok_or_else(|| out_of_bounds("pattern_pool", start + pc))?;
            pc += 1;

            match PatternOp::try_from(op) {
                Ok(PatternOp::HostAnchor) => anchor = AnchorType::Hostname,
                Ok(PatternOp::AssertStart) => anchor = AnchorType::Left,
                Ok(PatternOp::AssertEnd) => right_anchor = true,
                Ok(PatternOp::AssertBoundary) => parts.push(PatternPart::Separator),
                Ok(PatternOp::SkipAny) => parts.push(PatternPart::Wildcard),
                Ok(PatternOp::FindLit) => {
                    let literal = self.string_at(program, pc, pc + 4, "pattern_pool")?;
                    parts.push(PatternPart::Literal(literal.to_string()));
                    pc += 8;
                }
                Ok(PatternOp::Regex) => {
                    let source = self.string_at(program, pc, pc + 4, "pattern_pool")?;
                    return Pattern::regex(source).map_err(|err| SnapshotError::InvalidRegex(err.to_string()));
                }
                Ok(PatternOp::Done) => break,
                Err(()) => {
                    return Err(SnapshotError::InvalidPattern(format!("unknown opcode {op:#04x}")));
                }
            }
        }

        Ok(Pattern {
            anchor,
            right_anchor,
            body: PatternBody::Parts(parts),
        })
    }

    fn network_rule(&self, record: &[u8]) -> Result<NetworkFilter, SnapshotError> {
        const SECTION: &str = "network_rules";
        use super::format::network_rule as f;

        let flags = read_u16_le(record, f::FLAGS).ok_or_else(|| out_of_bounds(SECTION, f::FLAGS))?;
        let anchor_raw = read_u8(record, f::ANCHOR).ok_or_else(|| out_of_bounds(SECTION, f::ANCHOR))?;
        let party = read_u8(record, f::PARTY_MASK).ok_or_else(|| out_of_bounds(SECTION, f::PARTY_MASK))?;
        let fingerprint = read_u64_le(record, f::FINGERPRINT).ok_or_else(|| out_of_bounds(SECTION, f::FINGERPRINT))?;

        let pattern = self.pattern(
            field_u32(record, f::PROG_OFF, SECTION)?,
            field_u32(record, f::PROG_LEN, SECTION)?,
        )?;
        match AnchorType::try_from(anchor_raw) {
            Ok(anchor) if anchor == pattern.anchor => {}
            _ => {
                return Err(SnapshotError::InvalidPattern(format!(
                    "anchor byte {anchor_raw} disagrees with program"
                )));
            }
        }

        Ok(NetworkFilter {
            raw: self.string_at(record, f::RAW_OFF, f::RAW_LEN, SECTION)?.to_string(),
            flags: RuleFlags::from_bits_truncate(flags),
            pattern,
            type_mask: RequestType::from_bits_truncate(field_u32(record, f::TYPE_MASK, SECTION)?),
            party_mask: PartyMask::from_bits_truncate(party),
            domains: self.constraint(field_u32(record, f::CONSTRAINT_OFF, SECTION)?)?,
            redirect: self.optional_string_at(record, f::REDIRECT_OFF, f::REDIRECT_LEN, SECTION)?,
            tag: self.optional_string_at(record, f::TAG_OFF, f::TAG_LEN, SECTION)?,
            fingerprint,
        })
    }

    fn cosmetic_rule(&self, record: &[u8]) -> Result<CosmeticFilter, SnapshotError> {
        const SECTION: &str = "cosmetic_rules";
        use super::format::cosmetic_rule as f;

        let kind_raw = read_u8(record, f::KIND).ok_or_else(|| out_of_bounds(SECTION, f::KIND))?;
        let kind = CosmeticKind::try_from(kind_raw)
            .map_err(|()| SnapshotError::InvalidSection(format!("unknown cosmetic kind {kind_raw}")))?;
        let scope = self
            .constraint(field_u32(record, f::CONSTRAINT_OFF, SECTION)?)?
            .unwrap_or_default();

        Ok(CosmeticFilter {
            raw: self.string_at(record, f::RAW_OFF, f::RAW_LEN, SECTION)?.to_string(),
            kind,
            selector: self.string_at(record, f::SELECTOR_OFF, f::SELECTOR_LEN, SECTION)?.to_string(),
            hostnames: scope.include,
            not_hostnames: scope.exclude,
        })
    }

    fn resource(&self, record: &[u8]) -> Result<Resource, SnapshotError> {
        const SECTION: &str = "resources";
        use super::format::resource_entry as f;

        Ok(Resource {
            name: self.string_at(record, f::NAME_OFF, f::NAME_LEN, SECTION)?.to_string(),
            content_type: self.string_at(record, f::TYPE_OFF, f::TYPE_LEN, SECTION)?.to_string(),
            content: self.string_at(record, f::CONTENT_OFF, f::CONTENT_LEN, SECTION)?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_only(version: u16) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..4].copy_from_slice(&AGX_MAGIC);
        data[header::VERSION..header::VERSION + 2].copy_from_slice(&version.to_le_bytes());
        data[header::FLAGS..header::FLAGS + 2].copy_from_slice(&header_flags::HAS_CRC32.to_le_bytes());
        data[header::HEADER_BYTES..header::HEADER_BYTES + 4].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        data[header::SECTION_DIR_OFFSET..header::SECTION_DIR_OFFSET + 4]
            .copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        seal(&mut data);
        data
    }

    fn seal(data: &mut [u8]) {
        let crc = snapshot_crc32(data);
        data[header::SNAPSHOT_CRC32..header::SNAPSHOT_CRC32 + 4].copy_from_slice(&crc.to_le_bytes());
    }

    #[test]
    fn rejects_short_and_foreign_data() {
        assert_eq!(Snapshot::load(&[]).err(), Some(SnapshotError::DataTooShort));
        assert_eq!(Snapshot::load(&[0u8; 64]).err(), Some(SnapshotError::InvalidMagic));
        assert_eq!(
            Snapshot::load(&header_only(9)).err(),
            Some(SnapshotError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn empty_snapshot_decodes_to_nothing() {
        let contents = load_snapshot(&header_only(AGX_VERSION)).expect("valid snapshot");
        assert_eq!(contents, SnapshotContents::default());
    }

    #[test]
    fn section_directory_must_fit() {
        let mut data = header_only(AGX_VERSION);
        data[header::SECTION_COUNT..header::SECTION_COUNT + 4].copy_from_slice(&3u32.to_le_bytes());
        seal(&mut data);
        assert!(matches!(
            Snapshot::load(&data),
            Err(SnapshotError::OutOfBounds { section: "section_directory", .. })
        ));
    }

    #[test]
    fn crc_is_verified() {
        let mut data = header_only(AGX_VERSION);
        data[header::BUILD_ID] ^= 0x01;
        assert!(matches!(
            Snapshot::load(&data),
            Err(SnapshotError::Crc32Mismatch { .. })
        ));
    }

    #[test]
    fn unchecksummed_snapshot_is_rejected() {
        let mut data = header_only(AGX_VERSION);
        data[header::FLAGS..header::FLAGS + 2].copy_from_slice(&0u16.to_le_bytes());
        seal(&mut data);
        assert_eq!(Snapshot::load(&data).err(), Some(SnapshotError::MissingChecksum));
    }

    #[test]
    fn anchor_byte_must_agree_with_program() {
        let strings = b"ads.example.com";
        let mut program = vec![PatternOp::HostAnchor as u8, PatternOp::FindLit as u8];
        program.extend_from_slice(&0u32.to_le_bytes());
        program.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        program.push(PatternOp::Done as u8);
        let decoder = Decoder {
            strings,
            patterns: &program,
            constraints: &[],
        };

        let mut record = vec![0u8; NETWORK_RULE_SIZE];
        record[network_rule::PROG_LEN..network_rule::PROG_LEN + 4]
            .copy_from_slice(&(program.len() as u32).to_le_bytes());
        record[network_rule::CONSTRAINT_OFF..network_rule::CONSTRAINT_OFF + 4]
            .copy_from_slice(&NO_CONSTRAINT.to_le_bytes());
        for field in [network_rule::REDIRECT_OFF, network_rule::TAG_OFF] {
            record[field..field + 4].copy_from_slice(&NO_STRING.to_le_bytes());
        }

        record[network_rule::ANCHOR] = AnchorType::Hostname as u8;
        let rule = decoder.network_rule(&record).expect("valid record");
        assert_eq!(rule.pattern.anchor, AnchorType::Hostname);

        record[network_rule::ANCHOR] = AnchorType::Left as u8;
        assert!(matches!(decoder.network_rule(&record), Err(SnapshotError::InvalidPattern(_))));

        record[network_rule::ANCHOR] = 7;
        assert!(matches!(decoder.network_rule(&record), Err(SnapshotError::InvalidPattern(_))));
    }

    #[test]
    fn pattern_programs_decode() {
        let strings = b"ads.example.com";
        let program = {
            let mut p = vec![PatternOp::HostAnchor as u8, PatternOp::FindLit as u8];
            p.extend_from_slice(&0u32.to_le_bytes());
            p.extend_from_slice(&(strings.len() as u32).to_le_bytes());
            p.push(PatternOp::AssertBoundary as u8);
            p.push(PatternOp::Done as u8);
            p
        };
        let decoder = Decoder {
            strings,
            patterns: &program,
            constraints: &[],
        };

        let pattern = decoder.pattern(0, program.len() as u32).expect("valid program");
        assert_eq!(pattern.hostname(), Some("ads.example.com"));

        assert!(matches!(
            decoder.pattern(0, 3),
            Err(SnapshotError::OutOfBounds { .. })
        ));

        let bad = [0x7Fu8];
        let decoder = Decoder {
            strings,
            patterns: &bad,
            constraints: &[],
        };
        assert!(matches!(decoder.pattern(0, 1), Err(SnapshotError::InvalidPattern(_))));
    }
}
