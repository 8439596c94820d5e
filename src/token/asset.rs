//! Asset management tokens

use super::{
    pk::DmaSpan, subcode, CommandToken, Opcode, ResultToken, COMMAND_WORDS, MASK_10_BITS,
    MASK_8_BITS,
};

const LOAD_DERIVE: u32 = 1 << 24;
const LOAD_RANDOM: u32 = 1 << 25;
const LOAD_IMPORT: u32 = 1 << 26;
const LOAD_PLAINTEXT: u32 = 1 << 27;
const LOAD_UNWRAP: u32 = 1 << 28;
const LOAD_EXPORT: u32 = 1 << 31;

const AAD_WORD: usize = 10;
const AAD_MAX: usize = (COMMAND_WORDS - AAD_WORD) * 4;

/// Key derivation options of an asset load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Derivation {
    pub counter: bool,
    pub rfc5869: bool,
    pub asset_number: u8,
}

impl CommandToken {
    pub fn asset_search(&mut self, asset_number: u32) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::ASSET_SEARCH;
        self.w[4] = (asset_number & MASK_8_BITS) << 16;
    }

    pub fn asset_create(&mut self, policy: u64, length: u32) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::ASSET_CREATE;
        self.w[2] = policy as u32;
        self.w[3] = (policy >> 32) as u32;
        self.w[4] = length & MASK_10_BITS;
        self.w[5] = 0;
        self.w[6] = 0;
    }

    pub fn asset_delete(&mut self, asset_id: u32) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::ASSET_DELETE;
        self.w[2] = asset_id;
    }

    fn asset_load(&mut self, asset_id: u32, flags: u32) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::ASSET_LOAD;
        self.w[2] = asset_id;
        self.w[3] = flags;
    }

    pub fn asset_load_derive(&mut self, asset_id: u32, kdk_asset_id: u32, d: Derivation) {
        let mut flags = LOAD_DERIVE;
        if d.counter {
            flags |= 1 << 14;
        }
        if d.rfc5869 {
            flags |= 1 << 15;
        }
        self.asset_load(asset_id, flags);
        self.w[4..8].copy_from_slice(&[0; 4]);
        self.w[8] = (d.asset_number as u32) << 24;
        self.w[9] = kdk_asset_id;
    }

    pub fn asset_load_random(&mut self, asset_id: u32) {
        self.asset_load(asset_id, LOAD_RANDOM);
        self.w[6..9].copy_from_slice(&[0; 3]);
    }

    /// Import a key blob wrapped with the AES-SIV key `kek_asset_id`.
    pub fn asset_load_import(&mut self, asset_id: u32, kek_asset_id: u32) {
        self.asset_load(asset_id, LOAD_IMPORT);
        self.w[4] = 0;
        self.w[5] = 0;
        self.w[9] = kek_asset_id;
    }

    pub fn asset_load_plaintext(&mut self, asset_id: u32) {
        self.asset_load(asset_id, LOAD_PLAINTEXT);
        self.w[4..9].copy_from_slice(&[0; 5]);
    }

    pub fn asset_load_sym_unwrap(&mut self, asset_id: u32, kek_asset_id: u32, algorithm: u8) {
        self.asset_load(asset_id, LOAD_UNWRAP);
        self.w[4] = 0;
        self.w[5] = 0;
        self.w[8] = (algorithm as u32) << 16;
        self.w[9] = kek_asset_id;
    }

    pub fn asset_load_set_aad(&mut self, associated_data: &[u8]) {
        self.w[3] |= (associated_data.len() as u32) << 16;
        self.write_byte_array(AAD_WORD, associated_data);
    }

    pub fn asset_load_set_input(&mut self, input: DmaSpan) {
        self.w[3] |= input.length & MASK_10_BITS;
        self.set_address(4, input.address);
    }

    pub fn asset_load_set_output(&mut self, output: DmaSpan) {
        self.w[8] |= output.length & MASK_10_BITS;
        self.set_address(6, output.address);
    }

    /// Also produce a key blob, wrapped with `kek_asset_id`.
    pub fn asset_load_export(&mut self, kek_asset_id: u32) {
        self.w[3] |= LOAD_EXPORT;
        self.w[9] = kek_asset_id;
    }

    pub fn asset_store_reset(&mut self) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::ASSET_STORE_RESET;
    }

    /// Derivations are bound to the application, whose ID goes in front of the AAD.
    pub fn needs_app_id(&self) -> bool {
        self.w[0] & 0xFF00_0000 == Opcode::AssetManagement.word() | subcode::ASSET_LOAD
            && self.w[3] & LOAD_DERIVE != 0
    }

    /// Prepend `app_id` to the associated data of a derive token.
    ///
    /// The current AAD is truncated if both do not fit.
    pub fn insert_app_id(&mut self, app_id: &[u8]) {
        if !self.needs_app_id() {
            return;
        }

        let new_len = app_id.len().min(AAD_MAX);
        let mut old_len = ((self.w[3] >> 16) & MASK_8_BITS) as usize;
        if old_len + new_len > AAD_MAX {
            old_len = AAD_MAX - new_len;
        }

        let mut aad = [0u8; AAD_MAX];
        for (chunk, word) in aad.chunks_mut(4).zip(&self.w[AAD_WORD..]) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        aad.copy_within(0..old_len, new_len);
        aad[..new_len].copy_from_slice(&app_id[..new_len]);
        self.write_byte_array(AAD_WORD, &aad[..old_len + new_len]);

        self.w[3] &= !(MASK_8_BITS << 16);
        self.w[3] |= ((old_len + new_len) as u32) << 16;
    }
}

impl ResultToken {
    /// Asset ID and data length of a search.
    pub fn asset_search(&self) -> (u32, u32) {
        (self.w[1], self.w[2] & MASK_10_BITS)
    }

    /// Asset ID of a create.
    pub fn asset_id(&self) -> u32 {
        self.w[1]
    }

    pub fn asset_load_output_size(&self) -> u32 {
        self.w[1] & MASK_10_BITS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_splits_policy() {
        let mut cmd = CommandToken::new();
        cmd.asset_create(0x0000_0002_000F_4400, 0x500);

        assert_eq!(cmd.w[0], 0x1700_0000);
        assert_eq!(cmd.w[2], 0x000F_4400);
        assert_eq!(cmd.w[3], 2);
        assert_eq!(cmd.w[4], 0x100);
    }

    #[test]
    fn load_variants() {
        let mut cmd = CommandToken::new();
        cmd.asset_load_derive(
            0x10,
            0x20,
            Derivation {
                counter: true,
                rfc5869: false,
                asset_number: 3,
            },
        );
        assert_eq!(cmd.w[0], 0x2700_0000);
        assert_eq!(cmd.w[3], (1 << 24) | (1 << 14));
        assert_eq!(cmd.w[8], 3 << 24);
        assert_eq!(cmd.w[9], 0x20);
        assert!(cmd.needs_app_id());

        cmd.asset_load_plaintext(0x10);
        assert_eq!(cmd.w[3], 1 << 27);
        assert!(!cmd.needs_app_id());
        cmd.asset_load_set_input(DmaSpan::new(0x2000_0000, 0x41));
        assert_eq!(cmd.w[3], (1 << 27) | 0x41);
        assert_eq!(cmd.address(4), 0x2000_0000);

        cmd.asset_load_sym_unwrap(0x10, 0x30, 2);
        cmd.asset_load_set_output(DmaSpan::new(0x40, 0x20));
        assert_eq!(cmd.w[8], (2 << 16) | 0x20);
        cmd.asset_load_export(0x31);
        assert_eq!(cmd.w[3] >> 31, 1);
        assert_eq!(cmd.w[9], 0x31);
    }

    #[test]
    fn app_id_goes_in_front_of_aad() {
        let mut cmd = CommandToken::new();
        cmd.asset_load_derive(1, 2, Derivation::default());
        cmd.asset_load_set_aad(b"label");
        cmd.insert_app_id(&[0xA1, 0xA2]);

        assert_eq!((cmd.w[3] >> 16) & 0xFF, 7);
        let mut aad = [0u8; 7];
        let mut res = ResultToken::new();
        res.w = cmd.w;
        res.read_byte_array(AAD_WORD, &mut aad);
        assert_eq!(&aad, &[0xA1, 0xA2, b'l', b'a', b'b', b'e', b'l']);
    }

    #[test]
    fn search_result() {
        let mut cmd = CommandToken::new();
        cmd.asset_search(0x1FF);
        assert_eq!(cmd.w[4], 0xFF << 16);

        let mut res = ResultToken::new();
        res.w[1] = 0x5A5A;
        res.w[2] = 0xFC20;
        assert_eq!(res.asset_search(), (0x5A5A, 0x20));
    }
}
