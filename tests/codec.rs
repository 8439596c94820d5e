use proptest::prelude::*;

use cc27xx_hsm::utility::*;

const CURVE_BITS: [usize; 5] = [192, 224, 256, 384, 521];

fn curve_bits() -> impl Strategy<Value = usize> {
    prop::sample::select(CURVE_BITS.to_vec())
}

/// A host side public key of `items` components, with the point marker where it belongs.
fn public_key(bits: usize, items: u8, endianness: Endianness) -> impl Strategy<Value = Vec<u8>> {
    let len = bits_to_bytes(bits) * items as usize;
    prop::collection::vec(any::<u8>(), len).prop_map(move |mut key| {
        // The top byte of a `bits` wide integer only holds the remaining bits.
        let top_bits = bits % 8;
        if top_bits != 0 {
            let stride = bits_to_bytes(bits);
            for i in 0..items as usize {
                let top = match endianness {
                    Endianness::Big => i * stride,
                    Endianness::Little => (i + 1) * stride - 1,
                };
                key[top] &= (1 << top_bits) - 1;
            }
        }
        if items == ECC_PUB_KEY_VCOUNT && endianness == Endianness::Big {
            key.insert(0, ECC_UNCOMPRESSED_MARKER);
        }
        key
    })
}

fn endianness() -> impl Strategy<Value = Endianness> {
    prop_oneof![Just(Endianness::Big), Just(Endianness::Little)]
}

fn family() -> impl Strategy<Value = u8> {
    prop_oneof![Just(CURVE25519_PUB_KEY_VCOUNT), Just(ECC_PUB_KEY_VCOUNT)]
}

proptest! {
    #[test]
    fn public_key_round_trip(
        (bits, items, endianness, key) in (curve_bits(), family(), endianness())
            .prop_flat_map(|(bits, items, e)| (Just(bits), Just(items), Just(e), public_key(bits, items, e)))
    ) {
        let mut blob = vec![0u8; data_size_vwb(bits) * items as usize];
        let written = asym_dh_pub_key_to_hw(&key, bits, items, 0, endianness, &mut blob).unwrap();
        prop_assert_eq!(written, blob.len());

        let mut back = vec![0u8; key.len()];
        let read = asym_dh_pub_key_from_hw(&blob, bits, items, endianness, &mut back).unwrap();
        prop_assert_eq!(read, key.len());
        prop_assert_eq!(back, key);
    }

    #[test]
    fn bigint_copy_is_clamped_and_padded(
        bits in curve_bits(),
        input in prop::collection::vec(any::<u8>(), 0..100),
        endianness in endianness(),
    ) {
        let total = data_size_vwb(bits);
        let mut blob = vec![0xEEu8; total + 8];

        let written = asym_bigint_to_hw(&input, bits, 1, 0, 0, endianness, &mut blob).unwrap();
        prop_assert_eq!(written, total);
        prop_assert!(written - VHEADER <= data_size_b2w(bits) * 4);

        let copied = input.len().min(data_size_b2wb(bits));
        prop_assert!(blob[VHEADER + copied..total].iter().all(|b| *b == 0));
        prop_assert!(blob[total..].iter().all(|b| *b == 0xEE));

        let header = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
        prop_assert_eq!(header, vector_header(bits, 1, 0, 0));
    }

    #[test]
    fn signature_round_trip(
        bits in curve_bits(),
        seed in any::<u8>(),
    ) {
        let len = bits_to_bytes(bits);
        let r: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_add(seed)).collect();
        let s: Vec<u8> = r.iter().rev().copied().collect();

        let mut blob = vec![0u8; 2 * data_size_vwb(bits)];
        asym_dsa_signature_to_hw(&r, &s, bits, Endianness::Big, &mut blob).unwrap();

        let (mut r2, mut s2) = (vec![0u8; len], vec![0u8; len]);
        let n = asym_dsa_signature_from_hw(&blob, bits, Endianness::Big, &mut r2, &mut s2).unwrap();
        prop_assert_eq!(n, 2 * len);
        prop_assert_eq!(r2, r);
        prop_assert_eq!(s2, s);
    }
}

#[test]
fn short_buffers_are_errors_not_panics() {
    let key = [0u8; 65];
    let mut blob = [0u8; 71];
    assert_eq!(
        asym_dh_pub_key_to_hw(&key, 256, 2, 0, Endianness::Big, &mut blob),
        Err(CodecError::OutputTooSmall)
    );
    assert_eq!(
        asym_dh_pub_key_from_hw(&blob, 256, 2, Endianness::Big, &mut [0u8; 65]),
        Err(CodecError::InputTooShort)
    );
    assert_eq!(
        reverse_mem_cpy(&mut [0u8; 3], &[1, 2, 3, 4]),
        Err(CodecError::OutputTooSmall)
    );
    assert_eq!(
        asym_vector_header_format(0, 1, 0, 0, &mut [0u8; 4]),
        Err(CodecError::InvalidModulus)
    );
    assert_eq!(CodecError::InvalidModulus.code(), -4);
}
