//! AGX snapshot builder
//!
//! Serializes rule records, resources and tags into the layout described in
//! `ag_core::snapshot`. Sections are written in a fixed order so identical
//! input always produces identical bytes.

use std::collections::HashMap;

use ag_core::filters::{CosmeticFilter, DomainConstraint, NetworkFilter};
use ag_core::hash::crc32;
use ag_core::pattern::{Pattern, PatternBody, PatternPart};
use ag_core::snapshot::{
    align_offset, cosmetic_rule, header, header_flags, network_rule, resource_entry, section_entry, PatternOp,
    SectionId, SnapshotContents, AGX_MAGIC, AGX_VERSION, COSMETIC_RULE_SIZE, HEADER_SIZE, NETWORK_RULE_SIZE,
    NO_CONSTRAINT, NO_STRING, RESOURCE_ENTRY_SIZE, SECTION_ENTRY_SIZE, TAG_ENTRY_SIZE,
    snapshot_crc32,
};
use ag_core::types::AnchorType;

/// Serialize `contents` into an AGX1 snapshot.
pub fn build_snapshot(contents: &SnapshotContents) -> Vec<u8> {
    let mut str_pool = StringPool::new();
    let mut constraint_pool = ConstraintPool::new();

    let (pattern_pool, program_refs) = build_pattern_pool(&contents.network, &mut str_pool);
    let network_rules = build_network_rules_section(
        &contents.network,
        &program_refs,
        &mut str_pool,
        &mut constraint_pool,
    );
    let cosmetic_rules = build_cosmetic_rules_section(&contents.cosmetic, &mut str_pool, &mut constraint_pool);
    let resources = build_resources_section(contents, &mut str_pool);
    let tags = build_tags_section(&contents.tags, &mut str_pool);

    let mut sections = vec![
        SectionData::new(SectionId::StrPool, str_pool.build(), 0),
        SectionData::new(SectionId::PatternPool, pattern_pool, 0),
        SectionData::new(SectionId::NetworkRules, network_rules, contents.network.len()),
        SectionData::new(SectionId::DomainConstraintPool, constraint_pool.build(), 0),
        SectionData::new(SectionId::CosmeticRules, cosmetic_rules, contents.cosmetic.len()),
        SectionData::new(SectionId::Resources, resources, contents.resources.len()),
        SectionData::new(SectionId::Tags, tags, contents.tags.len()),
    ];

    let section_count = sections.len();
    let section_dir_offset = HEADER_SIZE;
    let section_dir_bytes = section_count * SECTION_ENTRY_SIZE;
    let mut data_offset = align_offset(section_dir_offset + section_dir_bytes, 4);

    for section in &mut sections {
        section.offset = data_offset;
        data_offset = align_offset(data_offset + section.data.len(), 4);
    }

    let total_size = data_offset;
    let mut buffer = vec![0u8; total_size];

    buffer[0..4].copy_from_slice(&AGX_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, AGX_VERSION);
    write_u16_le(&mut buffer, header::FLAGS, header_flags::HAS_CRC32);
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::SECTION_COUNT, section_count as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_OFFSET, section_dir_offset as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_BYTES, section_dir_bytes as u32);
    write_u32_le(&mut buffer, header::BUILD_ID, 0);

    for (index, section) in sections.iter().enumerate() {
        let entry_offset = section_dir_offset + index * SECTION_ENTRY_SIZE;
        write_u16_le(&mut buffer, entry_offset + section_entry::ID, section.id as u16);
        write_u16_le(&mut buffer, entry_offset + section_entry::FLAGS, 0);
        write_u32_le(&mut buffer, entry_offset + section_entry::OFFSET, section.offset as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::LENGTH, section.data.len() as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::COUNT, section.count as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::CRC32, crc32(&section.data));

        let end = section.offset + section.data.len();
        buffer[section.offset..end].copy_from_slice(&section.data);
    }

    let checksum = snapshot_crc32(&buffer);
    write_u32_le(&mut buffer, header::SNAPSHOT_CRC32, checksum);

    log::debug!(
        "Built snapshot: {} network, {} cosmetic, {} resources, {} tags, {} bytes",
        contents.network.len(),
        contents.cosmetic.len(),
        contents.resources.len(),
        contents.tags.len(),
        buffer.len()
    );

    buffer
}

struct SectionData {
    id: SectionId,
    data: Vec<u8>,
    count: usize,
    offset: usize,
}

impl SectionData {
    fn new(id: SectionId, data: Vec<u8>, count: usize) -> Self {
        Self { id, data, count, offset: 0 }
    }
}

struct StringPool {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> (u32, u32) {
        if let Some(&offset) = self.index.get(s) {
            return (offset, s.len() as u32);
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.index.insert(s.to_string(), offset);
        (offset, s.len() as u32)
    }

    fn intern_optional(&mut self, s: Option<&str>) -> (u32, u32) {
        match s {
            Some(s) => self.intern(s),
            None => (NO_STRING, 0),
        }
    }

    fn build(self) -> Vec<u8> {
        length_prefixed(self.data)
    }
}

/// Include/exclude hash lists, deduplicated by content.
struct ConstraintPool {
    data: Vec<u8>,
    index: HashMap<(Vec<u64>, Vec<u64>), u32>,
}

impl ConstraintPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn add(&mut self, include: &[u64], exclude: &[u64]) -> u32 {
        if include.is_empty() && exclude.is_empty() {
            return NO_CONSTRAINT;
        }
        let key = (include.to_vec(), exclude.to_vec());
        if let Some(&offset) = self.index.get(&key) {
            return offset;
        }

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(&(include.len() as u32).to_le_bytes());
        self.data.extend_from_slice(&(exclude.len() as u32).to_le_bytes());
        for hash in include.iter().chain(exclude) {
            self.data.extend_from_slice(&hash.to_le_bytes());
        }
        self.index.insert(key, offset);
        offset
    }

    fn add_domains(&mut self, domains: Option<&DomainConstraint>) -> u32 {
        match domains {
            Some(constraint) => self.add(&constraint.include, &constraint.exclude),
            None => NO_CONSTRAINT,
        }
    }

    fn build(self) -> Vec<u8> {
        length_prefixed(self.data)
    }
}

fn length_prefixed(data: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + data.len());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&data);
    buf
}

fn table_with_count(count: usize, record_size: usize) -> Vec<u8> {
    let mut section = Vec::with_capacity(4 + count * record_size);
    section.extend_from_slice(&(count as u32).to_le_bytes());
    section
}

// =============================================================================
// Patterns
// =============================================================================

/// Returns the pool and each rule's `(offset, length)` into it.
fn build_pattern_pool(rules: &[NetworkFilter], str_pool: &mut StringPool) -> (Vec<u8>, Vec<(u32, u32)>) {
    let mut prog_bytes: Vec<u8> = Vec::new();
    let mut refs = Vec::with_capacity(rules.len());
    let mut seen: HashMap<Vec<u8>, u32> = HashMap::new();

    for rule in rules {
        let bytecode = compile_pattern(&rule.pattern, str_pool);
        let len = bytecode.len() as u32;
        let offset = match seen.get(&bytecode) {
            Some(&offset) => offset,
            None => {
                let offset = prog_bytes.len() as u32;
                prog_bytes.extend_from_slice(&bytecode);
                seen.insert(bytecode, offset);
                offset
            }
        };
        refs.push((offset, len));
    }

    (length_prefixed(prog_bytes), refs)
}

fn compile_pattern(pattern: &Pattern, str_pool: &mut StringPool) -> Vec<u8> {
    let mut bytecode = Vec::new();

    let parts = match &pattern.body {
        PatternBody::Regex(regex) => {
            emit_string(&mut bytecode, PatternOp::Regex, regex.as_str(), str_pool);
            return bytecode;
        }
        PatternBody::Parts(parts) => parts,
    };

    match pattern.anchor {
        AnchorType::Hostname => bytecode.push(PatternOp::HostAnchor as u8),
        AnchorType::Left => bytecode.push(PatternOp::AssertStart as u8),
        AnchorType::None => {}
    }

    for part in parts {
        match part {
            PatternPart::Literal(literal) => emit_string(&mut bytecode, PatternOp::FindLit, literal, str_pool),
            PatternPart::Wildcard => bytecode.push(PatternOp::SkipAny as u8),
            PatternPart::Separator => bytecode.push(PatternOp::AssertBoundary as u8),
        }
    }

    if pattern.right_anchor {
        bytecode.push(PatternOp::AssertEnd as u8);
    }
    bytecode.push(PatternOp::Done as u8);
    bytecode
}

fn emit_string(bytecode: &mut Vec<u8>, op: PatternOp, text: &str, str_pool: &mut StringPool) {
    let (offset, len) = str_pool.intern(text);
    bytecode.push(op as u8);
    bytecode.extend_from_slice(&offset.to_le_bytes());
    bytecode.extend_from_slice(&len.to_le_bytes());
}

// =============================================================================
// Tables
// =============================================================================

fn build_network_rules_section(
    rules: &[NetworkFilter],
    program_refs: &[(u32, u32)],
    str_pool: &mut StringPool,
    constraints: &mut ConstraintPool,
) -> Vec<u8> {
    let mut section = table_with_count(rules.len(), NETWORK_RULE_SIZE);

    for (rule, &(prog_off, prog_len)) in rules.iter().zip(program_refs) {
        let mut record = [0u8; NETWORK_RULE_SIZE];
        let (raw_off, raw_len) = str_pool.intern(&rule.raw);
        let (redirect_off, redirect_len) = str_pool.intern_optional(rule.redirect.as_deref());
        let (tag_off, tag_len) = str_pool.intern_optional(rule.tag.as_deref());

        write_u32_le(&mut record, network_rule::RAW_OFF, raw_off);
        write_u32_le(&mut record, network_rule::RAW_LEN, raw_len);
        write_u16_le(&mut record, network_rule::FLAGS, rule.flags.bits());
        record[network_rule::ANCHOR] = rule.pattern.anchor as u8;
        record[network_rule::PARTY_MASK] = rule.party_mask.bits();
        write_u32_le(&mut record, network_rule::TYPE_MASK, rule.type_mask.bits());
        write_u32_le(&mut record, network_rule::PROG_OFF, prog_off);
        write_u32_le(&mut record, network_rule::PROG_LEN, prog_len);
        write_u32_le(&mut record, network_rule::CONSTRAINT_OFF, constraints.add_domains(rule.domains.as_ref()));
        write_u32_le(&mut record, network_rule::REDIRECT_OFF, redirect_off);
        write_u32_le(&mut record, network_rule::REDIRECT_LEN, redirect_len);
        write_u32_le(&mut record, network_rule::TAG_OFF, tag_off);
        write_u32_le(&mut record, network_rule::TAG_LEN, tag_len);
        write_u64_le(&mut record, network_rule::FINGERPRINT, rule.fingerprint);

        section.extend_from_slice(&record);
    }

    section
}

fn build_cosmetic_rules_section(
    rules: &[CosmeticFilter],
    str_pool: &mut StringPool,
    constraints: &mut ConstraintPool,
) -> Vec<u8> {
    let mut section = table_with_count(rules.len(), COSMETIC_RULE_SIZE);

    for rule in rules {
        let mut record = [0u8; COSMETIC_RULE_SIZE];
        let (raw_off, raw_len) = str_pool.intern(&rule.raw);
        let (selector_off, selector_len) = str_pool.intern(&rule.selector);

        write_u32_le(&mut record, cosmetic_rule::RAW_OFF, raw_off);
        write_u32_le(&mut record, cosmetic_rule::RAW_LEN, raw_len);
        write_u32_le(&mut record, cosmetic_rule::SELECTOR_OFF, selector_off);
        write_u32_le(&mut record, cosmetic_rule::SELECTOR_LEN, selector_len);
        write_u32_le(
            &mut record,
            cosmetic_rule::CONSTRAINT_OFF,
            constraints.add(&rule.hostnames, &rule.not_hostnames),
        );
        record[cosmetic_rule::KIND] = rule.kind as u8;

        section.extend_from_slice(&record);
    }

    section
}

fn build_resources_section(contents: &SnapshotContents, str_pool: &mut StringPool) -> Vec<u8> {
    let mut section = table_with_count(contents.resources.len(), RESOURCE_ENTRY_SIZE);

    for resource in &contents.resources {
        let mut record = [0u8; RESOURCE_ENTRY_SIZE];
        let (name_off, name_len) = str_pool.intern(&resource.name);
        let (type_off, type_len) = str_pool.intern(&resource.content_type);
        let (content_off, content_len) = str_pool.intern(&resource.content);

        write_u32_le(&mut record, resource_entry::NAME_OFF, name_off);
        write_u32_le(&mut record, resource_entry::NAME_LEN, name_len);
        write_u32_le(&mut record, resource_entry::TYPE_OFF, type_off);
        write_u32_le(&mut record, resource_entry::TYPE_LEN, type_len);
        write_u32_le(&mut record, resource_entry::CONTENT_OFF, content_off);
        write_u32_le(&mut record, resource_entry::CONTENT_LEN, content_len);

        section.extend_from_slice(&record);
    }

    section
}

fn build_tags_section(tags: &[String], str_pool: &mut StringPool) -> Vec<u8> {
    let mut section = table_with_count(tags.len(), TAG_ENTRY_SIZE);
    for tag in tags {
        let (offset, len) = str_pool.intern(tag);
        section.extend_from_slice(&offset.to_le_bytes());
        section.extend_from_slice(&len.to_le_bytes());
    }
    section
}

fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    let bytes = value.to_le_bytes();
    data[offset..offset + 2].copy_from_slice(&bytes);
}

fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    let bytes = value.to_le_bytes();
    data[offset..offset + 4].copy_from_slice(&bytes);
}

fn write_u64_le(data: &mut [u8], offset: usize, value: u64) {
    let bytes = value.to_le_bytes();
    data[offset..offset + 8].copy_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use ag_core::resources::Resource;
    use ag_core::snapshot::{load_snapshot, Snapshot, SnapshotError, TABLE_HEADER_SIZE};

    use crate::parser::parse_filter_list;

    use super::*;

    fn contents(list: &str) -> SnapshotContents {
        let parsed = parse_filter_list(list);
        SnapshotContents {
            network: parsed.network,
            cosmetic: parsed.cosmetic,
            resources: vec![Resource::new("noop.js", "application/javascript", "(function() {})();")],
            tags: vec!["social".to_string()],
        }
    }

    const LIST: &str = "\
||ads.example.com^$script,third-party
@@||ads.example.com/allowed.js
|https://cdn.example.org/*.gif|
/banner\\d+/$image,domain=example.com|~sub.example.com
||tracker.example.net^$redirect=noop.js,tag=social
||ads.example.com^$badfilter
example.com,~sub.example.com##.ad-banner
##.sponsored
example.com##+js(set-constant, ads, false)
";

    #[test]
    fn records_survive_serialization() {
        let original = contents(LIST);
        let bytes = build_snapshot(&original);
        let restored = load_snapshot(&bytes).expect("snapshot should load");
        assert_eq!(restored, original);
    }

    #[test]
    fn output_is_deterministic() {
        let original = contents(LIST);
        assert_eq!(build_snapshot(&original), build_snapshot(&original));
    }

    #[test]
    fn header_and_directory() {
        let bytes = build_snapshot(&contents(LIST));
        let snapshot = Snapshot::load(&bytes).expect("snapshot should load");
        assert_eq!(snapshot.version, AGX_VERSION);
        assert_ne!(snapshot.flags & header_flags::HAS_CRC32, 0);
        assert_eq!(snapshot.section_count(), 7);
        assert_eq!(snapshot.total_bytes(), bytes.len());

        let network = snapshot
            .sections()
            .find(|s| s.id == SectionId::NetworkRules)
            .expect("network section");
        assert_eq!(network.count, 6);
        assert_eq!(network.offset % 4, 0);
    }

    #[test]
    fn corruption_is_detected() {
        let mut bytes = build_snapshot(&contents(LIST));
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(load_snapshot(&bytes), Err(SnapshotError::Crc32Mismatch { .. })));

        let bytes = build_snapshot(&contents(LIST));
        assert_eq!(load_snapshot(&bytes[..40]), Err(SnapshotError::DataTooShort));
    }

    #[test]
    fn anchor_byte_is_checked_on_load() {
        let mut bytes = build_snapshot(&contents(LIST));
        let network = Snapshot::load(&bytes)
            .expect("snapshot should load")
            .sections()
            .find(|s| s.id == SectionId::NetworkRules)
            .map(|s| s.offset)
            .expect("network section");

        // First record is `||ads.example.com^`, stored as a hostname anchor.
        let anchor_at = network + TABLE_HEADER_SIZE + network_rule::ANCHOR;
        assert_eq!(bytes[anchor_at], AnchorType::Hostname as u8);
        bytes[anchor_at] = AnchorType::Left as u8;
        let checksum = snapshot_crc32(&bytes);
        write_u32_le(&mut bytes, header::SNAPSHOT_CRC32, checksum);

        assert!(matches!(load_snapshot(&bytes), Err(SnapshotError::InvalidPattern(_))));
    }

    #[test]
    fn empty_contents() {
        let bytes = build_snapshot(&SnapshotContents::default());
        assert_eq!(load_snapshot(&bytes), Ok(SnapshotContents::default()));
    }

    #[test]
    fn strings_and_programs_are_shared() {
        let single = build_snapshot(&contents("||ads.example.com^$script"));
        let doubled = build_snapshot(&contents("||ads.example.com^$script\n||ads.example.com^$image"));
        let pool_len = |bytes: &[u8]| {
            let snapshot = Snapshot::load(bytes).expect("snapshot should load");
            snapshot.get_section(SectionId::PatternPool).map(<[u8]>::len)
        };
        assert_eq!(pool_len(&single), pool_len(&doubled));
    }
}
