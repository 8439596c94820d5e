//! Conversion of asymmetric key material to and from the HSM vector format
//!
//! The HSM takes big integers as a list of sub-vectors. Each one starts with a 32-bit header
//! (modulus size in bits, item index, item count and domain ID) followed by the integer, least
//! significant byte first, zero padded to a whole number of words.
//!
//! Host side key material is either big endian octet strings, where a Weierstrass public key
//! carries the `0x04` uncompressed point marker, or little endian as used by Curve25519.

/// Size of the sub-vector header.
pub const VHEADER: usize = 4;
pub const WORD_LENGTH: usize = 4;
pub const SIGNATURE_VCOUNT: u8 = 2;
pub const ECC_PUB_KEY_VCOUNT: u8 = 2;
pub const CURVE25519_PUB_KEY_VCOUNT: u8 = 1;
pub const ECC_UNCOMPRESSED_MARKER: u8 = 0x04;

/// Asset policies for the HSM asset store.
pub mod policy {
    pub const SYM_HASH_MAC: u64 = 0x0001_2800;
    pub const SYM_AES_MAC: u64 = 0x0002_2800;
    pub const SYM_AES_BULK: u64 = 0x0003_2800;
    pub const SYM_AES_AUTH: u64 = 0x0004_2800;
    /// Public key domain parameters.
    pub const ASYM_KEYPARAMS: u64 = 0x000F_4400;

    pub const NON_MODIFIABLE: u64 = 0x0000_0001;
    pub const TEMPORARY: u64 = 0x0000_0002;

    pub const DIR_ENC_GEN: u64 = 0x0010_0000;
    pub const DIR_DEC_VRFY: u64 = 0x0020_0000;

    pub const SYM_MODE_ECB: u64 = 0x0000_0000;
    pub const SYM_MODE_CBC: u64 = 0x0800_0000;
    pub const SYM_MODE_CTR: u64 = 0x1800_0000;
    pub const SYM_MODE_CCM: u64 = 0x0000_0000;
    pub const SYM_MODE_GCM: u64 = 0x0800_0000;
    pub const SYM_MODE_CMAC: u64 = 0x0000_0000;
    pub const SYM_MODE_CBC_MAC: u64 = 0x0800_0000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big = 0,
    Little = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The destination cannot hold the encoded data.
    OutputTooSmall,
    /// The source is shorter than the modulus requires.
    InputTooShort,
    /// Item count or index does not fit the header.
    InvalidItems,
    /// Modulus size of 0 or wider than the header can describe.
    InvalidModulus,
}

impl CodecError {
    pub const fn code(self) -> i32 {
        match self {
            CodecError::OutputTooSmall => -1,
            CodecError::InputTooShort => -2,
            CodecError::InvalidItems => -3,
            CodecError::InvalidModulus => -4,
        }
    }
}

pub const fn bits_to_bytes(bits: usize) -> usize {
    (bits + 7) / 8
}

/// Words needed for a `bits` wide integer.
pub const fn data_size_b2w(bits: usize) -> usize {
    (bits + 31) / 32
}

/// Bytes of word aligned data for a `bits` wide integer.
pub const fn data_size_b2wb(bits: usize) -> usize {
    WORD_LENGTH * data_size_b2w(bits)
}

/// Bytes of a complete sub-vector, header included.
pub const fn data_size_vwb(bits: usize) -> usize {
    VHEADER + data_size_b2wb(bits)
}

/// Size of an output buffer for `len` bytes of data. With token ID checking the firmware
/// appends the token ID after the word aligned data.
pub const fn output_buffer_length(len: usize, token_id_check: bool) -> usize {
    let aligned = (len + 3) & !3;
    if token_id_check {
        aligned + 4
    } else {
        aligned
    }
}

/// Copy `src` into the start of `dest` in reverse byte order.
pub fn reverse_mem_cpy(dest: &mut [u8], src: &[u8]) -> Result<usize, CodecError> {
    let dest = dest
        .get_mut(..src.len())
        .ok_or(CodecError::OutputTooSmall)?;
    for (d, s) in dest.iter_mut().zip(src.iter().rev()) {
        *d = *s;
    }
    Ok(src.len())
}

/// Header word of a sub-vector.
pub const fn vector_header(bits: usize, items: u8, idx: u8, domain: u8) -> u32 {
    ((domain as u32 & 0xF) << 28)
        | ((items as u32 & 0xF) << 24)
        | ((idx as u32) << 16)
        | (bits as u32 & 0xFFFF)
}

fn check_layout(bits: usize, items: u8, idx: u8) -> Result<(), CodecError> {
    if bits == 0 || bits > 0xFFFF {
        return Err(CodecError::InvalidModulus);
    }
    if items == 0 || items > 0xF || idx >= items {
        return Err(CodecError::InvalidItems);
    }
    Ok(())
}

/// Write the header of a sub-vector into the first four bytes of `blob`.
pub fn asym_vector_header_format(
    bits: usize,
    items: u8,
    idx: u8,
    domain: u8,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    check_layout(bits, items, idx)?;
    let header = blob.get_mut(..VHEADER).ok_or(CodecError::OutputTooSmall)?;
    header.copy_from_slice(&vector_header(bits, items, idx, domain).to_le_bytes());
    Ok(VHEADER)
}

/// Encode one integer as sub-vector `idx` of `items`.
///
/// Only the least significant `ceil(bits/32)*4` bytes of `input` are used. The rest of the
/// sub-vector is zeroed.
pub fn asym_bigint_to_hw(
    input: &[u8],
    bits: usize,
    items: u8,
    idx: u8,
    domain: u8,
    endianness: Endianness,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    let total = data_size_vwb(bits);
    if blob.len() < total {
        return Err(CodecError::OutputTooSmall);
    }
    asym_vector_header_format(bits, items, idx, domain, blob)?;

    let body = &mut blob[VHEADER..total];
    let copy = input.len().min(body.len());
    match endianness {
        Endianness::Big => {
            reverse_mem_cpy(body, &input[input.len() - copy..])?;
        }
        Endianness::Little => body[..copy].copy_from_slice(&input[..copy]),
    }
    for b in body[copy..].iter_mut() {
        *b = 0;
    }

    Ok(total)
}

/// Decode the integer of the sub-vector at the start of `blob` into `ceil(bits/8)` bytes.
pub fn asym_bigint_from_hw(
    blob: &[u8],
    bits: usize,
    endianness: Endianness,
    out: &mut [u8],
) -> Result<usize, CodecError> {
    let len = bits_to_bytes(bits);
    let data = blob
        .get(VHEADER..VHEADER + len)
        .ok_or(CodecError::InputTooShort)?;
    let out = out.get_mut(..len).ok_or(CodecError::OutputTooSmall)?;

    match endianness {
        Endianness::Big => reverse_mem_cpy(out, data),
        Endianness::Little => {
            out.copy_from_slice(data);
            Ok(len)
        }
    }
}

fn components_to_hw(
    key: &[u8],
    bits: usize,
    items: u8,
    domain: u8,
    endianness: Endianness,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    check_layout(bits, items, 0)?;
    let len = bits_to_bytes(bits);
    let vector = data_size_vwb(bits);
    if key.len() < len * items as usize {
        return Err(CodecError::InputTooShort);
    }
    if blob.len() < vector * items as usize {
        return Err(CodecError::OutputTooSmall);
    }

    for (i, component) in key.chunks(len).take(items as usize).enumerate() {
        asym_bigint_to_hw(
            component,
            bits,
            items,
            i as u8,
            domain,
            endianness,
            &mut blob[i * vector..],
        )?;
    }
    Ok(vector * items as usize)
}

pub fn asym_dh_pri_key_to_hw(
    input: &[u8],
    bits: usize,
    domain: u8,
    endianness: Endianness,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    components_to_hw(input, bits, 1, domain, endianness, blob)
}

fn has_marker(items: u8, endianness: Endianness) -> bool {
    items == ECC_PUB_KEY_VCOUNT && endianness == Endianness::Big
}

/// Encode a public key of 1 (Montgomery/Edwards `u`) or 2 (Weierstrass `x`, `y`) components.
/// A big endian Weierstrass key starts with the uncompressed point marker, which is skipped.
pub fn asym_dh_pub_key_to_hw(
    input: &[u8],
    bits: usize,
    items: u8,
    domain: u8,
    endianness: Endianness,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    if items != CURVE25519_PUB_KEY_VCOUNT && items != ECC_PUB_KEY_VCOUNT {
        return Err(CodecError::InvalidItems);
    }
    let key = if has_marker(items, endianness) {
        input.get(1..).ok_or(CodecError::InputTooShort)?
    } else {
        input
    };
    components_to_hw(key, bits, items, domain, endianness, blob)
}

/// Decode a public key, re-inserting the uncompressed point marker for big endian Weierstrass
/// keys. Returns the length of the host side key.
pub fn asym_dh_pub_key_from_hw(
    blob: &[u8],
    bits: usize,
    items: u8,
    endianness: Endianness,
    out: &mut [u8],
) -> Result<usize, CodecError> {
    if items != CURVE25519_PUB_KEY_VCOUNT && items != ECC_PUB_KEY_VCOUNT {
        return Err(CodecError::InvalidItems);
    }
    let len = bits_to_bytes(bits);
    let vector = data_size_vwb(bits);
    let prefix = if has_marker(items, endianness) { 1 } else { 0 };
    let total = prefix + len * items as usize;
    if out.len() < total {
        return Err(CodecError::OutputTooSmall);
    }

    if prefix == 1 {
        out[0] = ECC_UNCOMPRESSED_MARKER;
    }
    for i in 0..items as usize {
        let src = blob.get(i * vector..).ok_or(CodecError::InputTooShort)?;
        let start = prefix + i * len;
        asym_bigint_from_hw(src, bits, endianness, &mut out[start..start + len])?;
    }
    Ok(total)
}

/// Split a signature vector into `r` and `s`.
pub fn asym_dsa_signature_from_hw(
    blob: &[u8],
    bits: usize,
    endianness: Endianness,
    r: &mut [u8],
    s: &mut [u8],
) -> Result<usize, CodecError> {
    let vector = data_size_vwb(bits);
    let second = blob.get(vector..).ok_or(CodecError::InputTooShort)?;
    let n = asym_bigint_from_hw(blob, bits, endianness, r)?;
    Ok(n + asym_bigint_from_hw(second, bits, endianness, s)?)
}

pub fn asym_dsa_signature_to_hw(
    r: &[u8],
    s: &[u8],
    bits: usize,
    endianness: Endianness,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    let vector = data_size_vwb(bits);
    if blob.len() < vector * SIGNATURE_VCOUNT as usize {
        return Err(CodecError::OutputTooSmall);
    }
    let len = bits_to_bytes(bits);
    if r.len() < len || s.len() < len {
        return Err(CodecError::InputTooShort);
    }

    asym_bigint_to_hw(&r[..len], bits, SIGNATURE_VCOUNT, 0, 0, endianness, blob)?;
    asym_bigint_to_hw(
        &s[..len],
        bits,
        SIGNATURE_VCOUNT,
        1,
        0,
        endianness,
        &mut blob[vector..],
    )?;
    Ok(vector * 2)
}

/// Encode a big endian `x || y` public key, without point marker.
pub fn asym_dsa_pub_key_to_hw(
    pub_key: &[u8],
    bits: usize,
    domain: u8,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    components_to_hw(pub_key, bits, ECC_PUB_KEY_VCOUNT, domain, Endianness::Big, blob)
}

pub fn asym_dsa_pri_key_to_hw(
    pri_key: &[u8],
    bits: usize,
    domain: u8,
    blob: &mut [u8],
) -> Result<usize, CodecError> {
    components_to_hw(pri_key, bits, 1, domain, Endianness::Big, blob)
}
