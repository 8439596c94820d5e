//! System tokens

use super::{subcode, CommandToken, Opcode, ResultToken, MASK_12_BITS, MASK_4_BITS, MASK_8_BITS};

pub const OTP_NO_ANOMALY: u8 = 0;
pub const OTP_EMPTY: u8 = 1;
pub const OTP_UNSUPPORTED_SIZE: u8 = 2;
pub const OTP_FAT_ERROR: u8 = 3;
pub const OTP_ZEROIZED: u8 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    fn from_word(word: u32) -> Self {
        Self {
            major: (word >> 16) as u8,
            minor: (word >> 8) as u8,
            patch: word as u8,
        }
    }
}

/// Decoded SystemInfo result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub firmware: Version,
    pub test_firmware: bool,
    pub hardware: Version,
    pub memory_size: u16,
    pub host_id: u8,
    pub identity: u32,
    pub non_secure: bool,
    pub crypto_officer: bool,
    /// 0 is active, 4..6 are error modes, 15 is active after a successful login.
    pub mode: u8,
    /// Only valid when the fatal error was raised by a self-test.
    pub error_test: u8,
    pub otp_error_code: u8,
    pub otp_error_location: u16,
}

impl CommandToken {
    pub fn system_info(&mut self) {
        self.w[0] = Opcode::System.word() | subcode::SYSTEM_INFO;
    }

    pub fn system_self_test(&mut self) {
        self.w[0] = Opcode::System.word() | subcode::SELF_TEST;
    }

    pub fn system_login(&mut self) {
        self.w[0] = Opcode::System.word() | subcode::LOGIN;
    }

    pub fn system_reset(&mut self) {
        self.w[0] = Opcode::System.word() | subcode::RESET;
    }

    pub fn system_sleep(&mut self) {
        self.w[0] = Opcode::System.word() | subcode::SLEEP;
    }

    pub fn system_resume_from_sleep(&mut self) {
        self.w[0] = Opcode::System.word() | subcode::RESUME_FROM_SLEEP;
    }
}

impl ResultToken {
    pub fn system_info(&self) -> SystemInfo {
        let w = &self.w;

        SystemInfo {
            firmware: Version::from_word(w[1]),
            test_firmware: w[1] & (1 << 31) != 0,
            hardware: Version::from_word(w[2]),
            memory_size: w[3] as u16,
            host_id: ((w[3] >> 16) & MASK_4_BITS) as u8,
            identity: w[4],
            non_secure: (w[3] >> 19) & 1 != 0,
            crypto_officer: (w[3] >> 27) & 1 != 0,
            mode: ((w[3] >> 28) & MASK_4_BITS) as u8,
            error_test: ((w[5] >> 16) & MASK_8_BITS) as u8,
            otp_error_code: ((w[5] >> 12) & MASK_4_BITS) as u8,
            otp_error_location: (w[5] & MASK_12_BITS) as u16,
        }
    }
}
