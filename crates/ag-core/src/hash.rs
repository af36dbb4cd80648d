//! Hash functions used by the rule indexes
//!
//! Hostnames are keyed by a 64-bit value built from two Murmur3 passes with
//! different seeds. URL tokens use a single 32-bit pass. Both are computed over
//! ASCII-lowercased input so lookups are case-insensitive.
//!
//! `0` is reserved as the "no hash" sentinel in the snapshot format and is never
//! returned by [`hash_domain`] or [`hash_token`].

const SEED_LO: u32 = 0x9e37_79b9;
const SEED_HI: u32 = 0x85eb_ca6b;
const SEED_TOKEN: u32 = 0x811c_9dc5;

/// Longest hostname that is hashed without truncation (RFC 1035 limit).
const MAX_DOMAIN_LEN: usize = 253;

/// Murmur3 32-bit hash.
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= scramble(k);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k |= (b as u32) << (8 * i);
        }
        h ^= scramble(k);
    }

    h ^= data.len() as u32;
    fmix32(h)
}

#[inline]
fn scramble(k: u32) -> u32 {
    k.wrapping_mul(0xcc9e_2d51)
        .rotate_left(15)
        .wrapping_mul(0x1b87_3593)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Hash a hostname (or entity name such as `google.*`) for bucket lookups.
#[inline]
pub fn hash_domain(domain: &str) -> u64 {
    let mut buf = [0u8; MAX_DOMAIN_LEN];
    let len = domain.len().min(MAX_DOMAIN_LEN);
    for (dst, &b) in buf.iter_mut().zip(&domain.as_bytes()[..len]) {
        *dst = b.to_ascii_lowercase();
    }

    let lo = murmur3_32(&buf[..len], SEED_LO) as u64;
    let hi = murmur3_32(&buf[..len], SEED_HI) as u64;
    let h = (hi << 32) | lo;
    if h == 0 {
        1
    } else {
        h
    }
}

/// Hash a URL or pattern token. The bytes are lowercased first.
#[inline]
pub fn hash_token(token: &[u8]) -> u32 {
    let mut h = if token.iter().any(u8::is_ascii_uppercase) {
        let lowered: Vec<u8> = token.iter().map(u8::to_ascii_lowercase).collect();
        murmur3_32(&lowered, SEED_TOKEN)
    } else {
        murmur3_32(token, SEED_TOKEN)
    };
    if h == 0 {
        h = 1;
    }
    h
}

/// Hash arbitrary text, case-sensitively. Used for rule fingerprints.
#[inline]
pub fn hash_text(text: &str) -> u64 {
    let lo = murmur3_32(text.as_bytes(), SEED_LO) as u64;
    let hi = murmur3_32(text.as_bytes(), SEED_TOKEN) as u64;
    (hi << 32) | lo
}

/// CRC32 (IEEE 802.3) for snapshot integrity checking.
pub fn crc32(data: &[u8]) -> u32 {
    static TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 { 0xedb8_8320 ^ (c >> 1) } else { c >> 1 };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    let mut crc = 0xffff_ffff_u32;
    for &byte in data {
        crc = TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    crc ^ 0xffff_ffff
}
