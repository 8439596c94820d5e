//! EIP-130 command and result tokens
//!
//! A token is a fixed array of 32-bit words. Word 0 of a command carries the opcode in bits
//! 24..27, the subcode in bits 28..31 and the token ID in bits 0..15. DMA addresses always
//! take two consecutive words, low half first.

pub mod asset;
pub mod otp;
pub mod pk;
pub mod system;

/// Number of words in a command token.
pub const COMMAND_WORDS: usize = 64;
/// Number of words in a result token.
pub const RESULT_WORDS: usize = 64;

/// Largest DMA transfer a token can describe.
pub const DMA_MAXLENGTH: u32 = 0x001F_FFFF;
/// Size of the token ID word the firmware appends to an output DMA stream.
pub const DMA_TOKENID_SIZE: usize = 4;

/// "Firmware/application service" flag of a result token. Surfaces on bit 16 of the result code.
pub const RESULT_FASVC: u32 = 1 << 16;

const WRITE_TOKEN_ID: u32 = 1 << 18;
const TOKEN_ID_MASK: u32 = 0xFFFF;

pub(crate) const MASK_4_BITS: u32 = 0x0F;
pub(crate) const MASK_8_BITS: u32 = 0xFF;
pub(crate) const MASK_10_BITS: u32 = 0x3FF;
pub(crate) const MASK_12_BITS: u32 = 0xFFF;

/// Service groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Nop = 0,
    Encryption = 1,
    Hash = 2,
    Mac = 3,
    Trng = 4,
    SpecialFunctions = 5,
    SymWrap = 6,
    AssetManagement = 7,
    AuthUnlock = 8,
    PublicKey = 9,
    Service = 14,
    System = 15,
}

impl Opcode {
    pub const fn word(self) -> u32 {
        (self as u32) << 24
    }
}

impl From<u32> for Opcode {
    fn from(word0: u32) -> Self {
        match (word0 >> 24) & MASK_4_BITS {
            1 => Opcode::Encryption,
            2 => Opcode::Hash,
            3 => Opcode::Mac,
            4 => Opcode::Trng,
            5 => Opcode::SpecialFunctions,
            6 => Opcode::SymWrap,
            7 => Opcode::AssetManagement,
            8 => Opcode::AuthUnlock,
            9 => Opcode::PublicKey,
            14 => Opcode::Service,
            15 => Opcode::System,
            _ => Opcode::Nop,
        }
    }
}

/// Subcodes, already shifted into place. Their meaning depends on the opcode.
pub mod subcode {
    const fn sub(value: u32) -> u32 {
        value << 28
    }

    pub const ASSET_SEARCH: u32 = sub(0);
    pub const ASSET_CREATE: u32 = sub(1);
    pub const ASSET_LOAD: u32 = sub(2);
    pub const ASSET_DELETE: u32 = sub(3);
    pub const PUBLIC_DATA: u32 = sub(4);
    pub const MONOTONIC_READ: u32 = sub(5);
    pub const MONOTONIC_INCR: u32 = sub(6);
    pub const OTP_DATA_WRITE: u32 = sub(7);
    pub const SECURE_TIMER: u32 = sub(8);
    pub const PROVISION_RANDOM_HUK: u32 = sub(9);
    pub const CPIF_EXPORT: u32 = sub(10);
    pub const ASSET_STORE_RESET: u32 = sub(15);

    pub const PK_NOASSETS: u32 = sub(0);
    pub const PK_WITHASSETS: u32 = sub(1);

    pub const REGISTER_READ: u32 = sub(0);
    pub const REGISTER_WRITE: u32 = sub(1);
    pub const CLOCK_SWITCH: u32 = sub(2);
    pub const ZERO_OUT_MAILBOX: u32 = sub(3);
    pub const SELECT_OTP_ZERO: u32 = sub(4);
    pub const ZEROIZE_OTP: u32 = sub(5);
    pub const FIRMWARE_CHECK: u32 = sub(6);
    pub const UPDATE_ROLLBACK_ID: u32 = sub(7);

    pub const SYSTEM_INFO: u32 = sub(0);
    pub const SELF_TEST: u32 = sub(1);
    pub const RESET: u32 = sub(2);
    pub const LOGIN: u32 = sub(3);
    pub const SLEEP: u32 = sub(4);
    pub const RESUME_FROM_SLEEP: u32 = sub(5);
    pub const SET_TIME: u32 = sub(8);
}

/// Pack `len` bytes into little-endian words, zero-padding the last one.
fn pack_bytes(words: &mut [u32], data: &[u8]) {
    for (word, chunk) in words.iter_mut().zip(data.chunks(4)) {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        *word = u32::from_le_bytes(bytes);
    }
}

fn unpack_bytes(words: &[u32], dest: &mut [u8]) {
    for (word, chunk) in words.iter().zip(dest.chunks_mut(4)) {
        let bytes = word.to_le_bytes();
        let n = chunk.len();
        chunk.copy_from_slice(&bytes[..n]);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandToken {
    pub w: [u32; COMMAND_WORDS],
}

impl Default for CommandToken {
    fn default() -> Self {
        Self {
            w: [0; COMMAND_WORDS],
        }
    }
}

impl CommandToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the token with a recognisable pattern.
    pub fn clear(&mut self) {
        self.w = [0xAAAA_AAAA; COMMAND_WORDS];
    }

    pub fn opcode(&self) -> Opcode {
        Opcode::from(self.w[0])
    }

    pub fn subcode(&self) -> u32 {
        self.w[0] & (MASK_4_BITS << 28)
    }

    /// Set the identity of the user in word 1.
    pub fn set_identity(&mut self, identity: u32) {
        self.w[1] = identity;
    }

    pub fn token_id(&self) -> u16 {
        (self.w[0] & TOKEN_ID_MASK) as u16
    }

    /// Replace the token ID. With `write_token_id` set the firmware appends the ID to the end
    /// of the output DMA stream, which lets the host poll for completion of the data.
    pub fn set_token_id(&mut self, id: u16, write_token_id: bool) {
        self.w[0] &= !(TOKEN_ID_MASK | WRITE_TOKEN_ID);
        self.w[0] |= id as u32;
        if write_token_id {
            self.w[0] |= WRITE_TOKEN_ID;
        }
    }

    pub fn writes_token_id(&self) -> bool {
        self.w[0] & WRITE_TOKEN_ID != 0
    }

    /// Write `data` LSB-first into consecutive words starting at `start_word`.
    ///
    /// Bytes that do not fit in the token are dropped.
    pub fn write_byte_array(&mut self, start_word: usize, data: &[u8]) {
        if start_word >= COMMAND_WORDS {
            return;
        }
        pack_bytes(&mut self.w[start_word..], data);
    }

    pub(crate) fn set_address(&mut self, word: usize, address: u64) {
        self.w[word] = address as u32;
        self.w[word + 1] = (address >> 32) as u32;
    }

    pub fn address(&self, word: usize) -> u64 {
        (self.w[word] as u64) | ((self.w[word + 1] as u64) << 32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultToken {
    pub w: [u32; RESULT_WORDS],
}

impl Default for ResultToken {
    fn default() -> Self {
        Self {
            w: [0; RESULT_WORDS],
        }
    }
}

impl ResultToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a result token that decodes to `code`.
    pub fn from_code(code: i32) -> Self {
        let mut token = Self::default();
        token.set_code(code);
        token
    }

    /// Encode `code` into word 0, the mirror of [`ResultToken::result_code`].
    pub fn set_code(&mut self, code: i32) {
        let fasvc = code as u32 & RESULT_FASVC;
        let word = if code < 0 {
            let magnitude = (code | RESULT_FASVC as i32).wrapping_neg() as u32 & 0x7F;
            ((0x80 | magnitude) << 24) | fasvc
        } else {
            ((code as u32 & 0x7F) << 24) | fasvc
        };
        self.w[0] = (self.w[0] & 0x0000_FFFF & !RESULT_FASVC) | word;
    }

    /// Result of the operation: 0 is success, > 0 a warning, < 0 an error.
    ///
    /// The FASVC flag is returned on bit 16.
    pub fn result_code(&self) -> i32 {
        let result = self.w[0] >> 24;
        let fasvc = self.w[0] & RESULT_FASVC;

        if result & 0x80 != 0 {
            let rv = -((result & 0x7F) as i32);
            if fasvc == 0 {
                (rv as u32 & !RESULT_FASVC) as i32
            } else {
                rv
            }
        } else {
            (result | fasvc) as i32
        }
    }

    pub fn is_error(&self) -> bool {
        self.w[0] & 0x8000_0000 != 0
    }

    pub fn token_id(&self) -> u16 {
        (self.w[0] & TOKEN_ID_MASK) as u16
    }

    /// Read bytes LSB-first out of consecutive words starting at `start_word`.
    pub fn read_byte_array(&self, start_word: usize, dest: &mut [u8]) {
        if start_word >= RESULT_WORDS {
            return;
        }
        unpack_bytes(&self.w[start_word..], dest);
    }
}
