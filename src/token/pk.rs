//! Public key tokens

use core::convert::TryFrom;

use super::{subcode, CommandToken, Opcode, MASK_12_BITS, MASK_4_BITS};

/// Largest hash that can be handed to the firmware in one token.
pub const CMD_MAX_HASH_SIZE: u32 = 4095;

const SAVE_SHARED_SECRET: u32 = 1 << 31;
const EXPLICIT_DIGEST: u32 = 1 << 30;
const ADDLEN_MASK: u32 = 0xFF;
const ADDITIONAL_DATA_WORD: usize = 12;

/// Asset based public key methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkAssetMethod {
    EcdhEcdsaKeyCheck = 0x001,
    DhDsaKeyCheck = 0x002,
    EcdsaSign = 0x006,
    EcdsaVerify = 0x007,
    RsaPkcs1v15Sign = 0x008,
    RsaPkcs1v15Verify = 0x009,
    RsaPssSign = 0x00C,
    RsaPssVerify = 0x00D,
    DhGenPubKey = 0x010,
    DhGenKeyPair = 0x011,
    DhGenSingleKeyPairSharedSecret = 0x012,
    DhGenDualKeyPairSharedSecret = 0x013,
    EcdhEcdsaGenPubKey = 0x014,
    EcdhEcdsaGenKeyPair = 0x015,
    EcdhGenSingleKeyPairSharedSecret = 0x016,
    EcdhGenDualKeyPairSharedSecret = 0x017,
    RsaOaepWrapString = 0x018,
    RsaOaepWrapHash = 0x019,
    RsaOaepUnwrapString = 0x01A,
    RsaOaepUnwrapHash = 0x01B,
    RsaPkcs1v15Unwrap = 0x021,
    RsaPkcs1v15Wrap = 0x022,
    Curve25519GenPubKey = 0x028,
    Curve25519GenKeyPair = 0x029,
    Curve25519GenSharedSecret = 0x02A,
    EddsaGenPubKey = 0x02B,
    EddsaGenKeyPair = 0x02C,
    EddsaSignInitial = 0x02D,
    EddsaSignUpdate = 0x02E,
    EddsaSignFinal = 0x02F,
    EddsaVerifyInitial = 0x030,
    EddsaVerifyFinal = 0x031,
    Sm2dsaSign = 0x032,
    Sm2dsaVerify = 0x033,
    Sm2encWrap = 0x034,
    Sm2encUnwrap = 0x035,
    Sm2kexGenSharedSecret = 0x036,
    EciesWrap = 0x038,
    EciesUnwrap = 0x039,
    InstallEcCurve = 0x100,
}

/// The handler family a method belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFamily {
    KeyCheck,
    Sign,
    Verify,
    GenPublicKey,
    GenKeyPair,
    SharedSecret,
    KeyWrap,
    Ecies,
    InstallCurve,
}

impl PkAssetMethod {
    pub const fn family(self) -> MethodFamily {
        use PkAssetMethod::*;

        match self {
            EcdhEcdsaKeyCheck | DhDsaKeyCheck => MethodFamily::KeyCheck,
            EcdsaSign | Sm2dsaSign | RsaPkcs1v15Sign | RsaPssSign | EddsaSignInitial
            | EddsaSignUpdate | EddsaSignFinal => MethodFamily::Sign,
            EcdsaVerify | Sm2dsaVerify | RsaPkcs1v15Verify | RsaPssVerify | EddsaVerifyInitial
            | EddsaVerifyFinal => MethodFamily::Verify,
            DhGenPubKey | EcdhEcdsaGenPubKey | Curve25519GenPubKey | EddsaGenPubKey => {
                MethodFamily::GenPublicKey
            }
            DhGenKeyPair | EcdhEcdsaGenKeyPair | Curve25519GenKeyPair | EddsaGenKeyPair => {
                MethodFamily::GenKeyPair
            }
            DhGenSingleKeyPairSharedSecret
            | DhGenDualKeyPairSharedSecret
            | EcdhGenSingleKeyPairSharedSecret
            | EcdhGenDualKeyPairSharedSecret
            | Curve25519GenSharedSecret
            | Sm2kexGenSharedSecret => MethodFamily::SharedSecret,
            RsaOaepWrapString | RsaOaepWrapHash | RsaOaepUnwrapString | RsaOaepUnwrapHash
            | RsaPkcs1v15Unwrap | RsaPkcs1v15Wrap | Sm2encWrap | Sm2encUnwrap => {
                MethodFamily::KeyWrap
            }
            EciesWrap | EciesUnwrap => MethodFamily::Ecies,
            InstallEcCurve => MethodFamily::InstallCurve,
        }
    }

    /// True for the key wrap methods that produce wrapped output.
    pub const fn is_wrap(self) -> bool {
        matches!(
            self,
            PkAssetMethod::RsaOaepWrapString
                | PkAssetMethod::RsaOaepWrapHash
                | PkAssetMethod::RsaPkcs1v15Wrap
                | PkAssetMethod::Sm2encWrap
                | PkAssetMethod::EciesWrap
        )
    }

    /// True for the shared secret methods that take a second key pair.
    pub const fn is_dual_key_pair(self) -> bool {
        matches!(
            self,
            PkAssetMethod::DhGenDualKeyPairSharedSecret
                | PkAssetMethod::EcdhGenDualKeyPairSharedSecret
                | PkAssetMethod::Sm2kexGenSharedSecret
        )
    }

    /// The command byte of word 2. `InstallEcCurve` does not fit and is handled by the host.
    pub const fn command(self) -> u8 {
        (self as u32 & 0xFF) as u8
    }
}

impl TryFrom<u32> for PkAssetMethod {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use PkAssetMethod::*;

        Ok(match value {
            0x001 => EcdhEcdsaKeyCheck,
            0x002 => DhDsaKeyCheck,
            0x006 => EcdsaSign,
            0x007 => EcdsaVerify,
            0x008 => RsaPkcs1v15Sign,
            0x009 => RsaPkcs1v15Verify,
            0x00C => RsaPssSign,
            0x00D => RsaPssVerify,
            0x010 => DhGenPubKey,
            0x011 => DhGenKeyPair,
            0x012 => DhGenSingleKeyPairSharedSecret,
            0x013 => DhGenDualKeyPairSharedSecret,
            0x014 => EcdhEcdsaGenPubKey,
            0x015 => EcdhEcdsaGenKeyPair,
            0x016 => EcdhGenSingleKeyPairSharedSecret,
            0x017 => EcdhGenDualKeyPairSharedSecret,
            0x018 => RsaOaepWrapString,
            0x019 => RsaOaepWrapHash,
            0x01A => RsaOaepUnwrapString,
            0x01B => RsaOaepUnwrapHash,
            0x021 => RsaPkcs1v15Unwrap,
            0x022 => RsaPkcs1v15Wrap,
            0x028 => Curve25519GenPubKey,
            0x029 => Curve25519GenKeyPair,
            0x02A => Curve25519GenSharedSecret,
            0x02B => EddsaGenPubKey,
            0x02C => EddsaGenKeyPair,
            0x02D => EddsaSignInitial,
            0x02E => EddsaSignUpdate,
            0x02F => EddsaSignFinal,
            0x030 => EddsaVerifyInitial,
            0x031 => EddsaVerifyFinal,
            0x032 => Sm2dsaSign,
            0x033 => Sm2dsaVerify,
            0x034 => Sm2encWrap,
            0x035 => Sm2encUnwrap,
            0x036 => Sm2kexGenSharedSecret,
            0x038 => EciesWrap,
            0x039 => EciesUnwrap,
            0x100 => InstallEcCurve,
            other => return Err(other),
        })
    }
}

/// Raw PKA operations, used without assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkOperation {
    NumLoad = 0x01,
    NumSetN = 0x03,
    ModExpE = 0x04,
    ModExpD = 0x05,
    ModExpCrt = 0x06,
    EcMontMul = 0x0A,
    EccMul = 0x0B,
    EccAdd = 0x0C,
    EcdsaSign = 0x0F,
    EcdsaVerify = 0x10,
}

impl TryFrom<u32> for PkOperation {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use PkOperation::*;

        Ok(match value {
            0x01 => NumLoad,
            0x03 => NumSetN,
            0x04 => ModExpE,
            0x05 => ModExpD,
            0x06 => ModExpCrt,
            0x0A => EcMontMul,
            0x0B => EccMul,
            0x0C => EccAdd,
            0x0F => EcdsaSign,
            0x10 => EcdsaVerify,
            other => return Err(other),
        })
    }
}

/// A DMA buffer as seen from a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaSpan {
    pub address: u64,
    pub length: u32,
}

impl DmaSpan {
    pub const fn new(address: u64, length: u32) -> Self {
        Self { address, length }
    }
}

/// Parameters of an asset based public key command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PkAssetCommand {
    pub command: u8,
    pub nwords: u8,
    pub mwords: u8,
    pub other_len: u8,
    pub key_asset: u32,
    pub param_asset: u32,
    pub io_asset: u32,
    pub input: DmaSpan,
    pub output: DmaSpan,
}

impl CommandToken {
    pub fn pk_asset_command(&mut self, c: &PkAssetCommand) {
        self.w[0] = Opcode::PublicKey.word() | subcode::PK_WITHASSETS;
        self.w[2] = c.command as u32 | ((c.nwords as u32) << 16) | ((c.mwords as u32) << 24);
        self.w[3] = (c.other_len as u32) << 8;
        self.w[4] = c.key_asset;
        self.w[5] = c.param_asset;
        self.w[6] = c.io_asset;
        self.w[7] = ((c.output.length & MASK_12_BITS) << 16) | (c.input.length & MASK_12_BITS);
        self.set_address(8, c.input.address);
        self.set_address(10, c.output.address);
    }

    /// Reserve `len` bytes of additional data after the word-aligned current additional length
    /// and return the word index they start at.
    fn pk_reserve_additional(&mut self, len: u32) -> usize {
        let offset = ((self.w[3] & ADDLEN_MASK) + 3) & !3;
        self.w[3] &= !ADDLEN_MASK;
        self.w[3] |= offset + len;
        ADDITIONAL_DATA_WORD + (offset as usize / 4)
    }

    pub fn pk_asset_set_additional_data(&mut self, data: &[u8]) {
        let len = data.len().min(u8::MAX as usize);
        let word = self.pk_reserve_additional(len as u32);
        self.write_byte_array(word, &data[..len]);
    }

    pub fn pk_asset_set_additional_asset_id(&mut self, asset_id: u32) {
        let word = self.pk_reserve_additional(4);
        if word < self.w.len() {
            self.w[word] = asset_id;
        }
    }

    pub fn pk_asset_set_additional_length(&mut self, length: u64) {
        let word = self.pk_reserve_additional(8);
        if word + 1 < self.w.len() {
            self.set_address(word, length);
        }
    }

    /// Describe a second output buffer.
    pub fn pk_asset_set_additional_output(&mut self, output: DmaSpan) {
        self.w[12] = output.length;
        self.set_address(13, output.address);
    }

    pub fn pk_asset_addlen_correction(&mut self, correction: u8) {
        self.w[3] = self.w[3].wrapping_sub(correction as u32);
    }

    pub fn pk_asset_save_shared_secret(&mut self) {
        self.w[3] |= SAVE_SHARED_SECRET;
    }

    /// Hand the digest over inside the token instead of through an asset.
    pub fn pk_asset_set_explicit_digest(&mut self, digest: &[u8]) {
        let len = digest.len().min(ADDLEN_MASK as usize);
        self.w[3] &= !ADDLEN_MASK;
        self.w[3] |= EXPLICIT_DIGEST;
        self.w[3] |= len as u32;
        self.w[6] = 0;
        self.write_byte_array(ADDITIONAL_DATA_WORD, &digest[..len]);
    }

    pub fn additional_length(&self) -> u32 {
        self.w[3] & ADDLEN_MASK
    }

    /// Claim the PKA engine (NUMSETN).
    pub fn pk_claim(&mut self, nwords: u8, mwords: u8, mmask: u8) {
        self.w[0] = Opcode::PublicKey.word() | subcode::PK_NOASSETS;
        self.w[2] = PkOperation::NumSetN as u32
            | ((mmask as u32) << 8)
            | ((nwords as u32) << 16)
            | ((mwords as u32) << 24);
    }

    pub fn pk_num_load(&mut self, index: u8, input: DmaSpan) {
        self.w[0] = Opcode::PublicKey.word() | subcode::PK_NOASSETS;
        self.w[2] = PkOperation::NumLoad as u32 | (((index as u32) & MASK_4_BITS) << 24);
        self.w[5] = input.length & MASK_12_BITS;
        self.set_address(6, input.address);
    }

    pub fn pk_operation(
        &mut self,
        operation: u8,
        public_exponent: u32,
        input: DmaSpan,
        output: DmaSpan,
    ) {
        self.w[0] = Opcode::PublicKey.word() | subcode::PK_NOASSETS;
        self.w[2] = operation as u32 & 0x1F;
        self.w[3] = public_exponent;
        self.w[5] = ((output.length & MASK_12_BITS) << 16) | (input.length & MASK_12_BITS);
        self.set_address(6, input.address);
        self.set_address(8, output.address);
    }

    /// Release the PKA engine.
    pub fn pk_release(&mut self) {
        self.w[0] = Opcode::PublicKey.word() | subcode::PK_NOASSETS;
        self.w[2] = PkOperation::NumSetN as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_command_layout() {
        let mut cmd = CommandToken::new();
        cmd.pk_asset_command(&PkAssetCommand {
            command: PkAssetMethod::EcdsaSign.command(),
            nwords: 8,
            mwords: 8,
            other_len: 0,
            key_asset: 0x1111,
            param_asset: 0x2222,
            io_asset: 0x3333,
            input: DmaSpan::new(0x1_2000_0000, 32),
            output: DmaSpan::new(0x2000_0100, 72),
        });

        assert_eq!(cmd.w[0], 0x1900_0000);
        assert_eq!(cmd.w[2], 0x0808_0006);
        assert_eq!(cmd.w[3], 0);
        assert_eq!(cmd.w[4..7], [0x1111, 0x2222, 0x3333]);
        assert_eq!(cmd.w[7], (72 << 16) | 32);
        assert_eq!(cmd.w[8..12], [0x2000_0000, 0x1, 0x2000_0100, 0]);
    }

    #[test]
    fn additional_fields_are_word_aligned() {
        let mut cmd = CommandToken::new();
        cmd.pk_asset_command(&PkAssetCommand::default());

        cmd.pk_asset_set_additional_asset_id(0xAABB);
        assert_eq!(cmd.additional_length(), 4);
        assert_eq!(cmd.w[12], 0xAABB);

        cmd.pk_asset_set_additional_data(&[1, 2, 3]);
        assert_eq!(cmd.additional_length(), 7);
        assert_eq!(cmd.w[13], 0x0003_0201);

        cmd.pk_asset_set_additional_length(0x0000_0001_0000_0002);
        assert_eq!(cmd.additional_length(), 16);
        assert_eq!(cmd.w[14..16], [2, 1]);

        cmd.pk_asset_addlen_correction(4);
        assert_eq!(cmd.additional_length(), 12);
    }

    #[test]
    fn explicit_digest_clears_io_asset() {
        let mut cmd = CommandToken::new();
        cmd.pk_asset_command(&PkAssetCommand {
            io_asset: 5,
            ..Default::default()
        });
        cmd.pk_asset_set_explicit_digest(&[0xAA; 32]);

        assert_eq!(cmd.w[6], 0);
        assert_eq!(cmd.w[3], EXPLICIT_DIGEST | 32);
        assert!(cmd.w[12..20].iter().all(|w| *w == 0xAAAA_AAAA));
    }

    #[test]
    fn pka_primitives() {
        let mut cmd = CommandToken::new();
        cmd.pk_claim(8, 2, 0x3);
        assert_eq!(cmd.w[0], 0x0900_0000);
        assert_eq!(cmd.w[2], 0x0208_0303);

        let mut cmd = CommandToken::new();
        cmd.pk_num_load(0x13, DmaSpan::new(0x2000_0000, 36));
        assert_eq!(cmd.w[2], 0x0300_0001);
        assert_eq!(cmd.w[5], 36);
        assert_eq!(cmd.address(6), 0x2000_0000);

        let mut cmd = CommandToken::new();
        cmd.pk_operation(
            PkOperation::EccMul as u8,
            65537,
            DmaSpan::new(0x10, 8),
            DmaSpan::new(0x20, 16),
        );
        assert_eq!(cmd.w[2], 0x0B);
        assert_eq!(cmd.w[3], 65537);
        assert_eq!(cmd.w[5], (16 << 16) | 8);
        assert_eq!(cmd.address(8), 0x20);
    }

    #[test]
    fn method_families() {
        assert_eq!(PkAssetMethod::EddsaSignUpdate.family(), MethodFamily::Sign);
        assert_eq!(PkAssetMethod::RsaPssVerify.family(), MethodFamily::Verify);
        assert_eq!(PkAssetMethod::Sm2encUnwrap.family(), MethodFamily::KeyWrap);
        assert_eq!(PkAssetMethod::InstallEcCurve.family(), MethodFamily::InstallCurve);
        assert_eq!(PkAssetMethod::try_from(0x039), Ok(PkAssetMethod::EciesUnwrap));
        assert_eq!(PkAssetMethod::try_from(0x037), Err(0x037));
    }
}
