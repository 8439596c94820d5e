//! OTP tokens

use super::{
    pk::DmaSpan, subcode, CommandToken, Opcode, ResultToken, MASK_10_BITS, MASK_4_BITS,
    MASK_8_BITS,
};

/// TRNG settings used to generate a random hardware unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HukProvisioning {
    pub key_128bit: bool,
    pub auto_seed: u8,
    pub sample_cycles: u16,
    pub sample_div: u8,
    pub scale: u8,
    pub noise_blocks: u8,
    pub rep_cnt_cutoff: u8,
    pub adapt_prop_64_cutoff: u8,
    pub adapt_prop_512_cutoff: u16,
}

impl CommandToken {
    pub fn otp_data_write(&mut self, policy: u32, input: DmaSpan, associated_data: &[u8]) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::OTP_DATA_WRITE;
        self.w[2] = policy;
        self.w[3] =
            (input.length & MASK_10_BITS) | ((associated_data.len() as u32 & MASK_10_BITS) << 16);
        self.set_address(4, input.address);
        if input.length != 0 {
            self.write_byte_array(6, associated_data);
        }
    }

    pub fn otp_select_zeroize(&mut self) {
        self.w[0] = Opcode::Service.word() | subcode::SELECT_OTP_ZERO;
    }

    pub fn otp_zeroize(&mut self) {
        self.w[0] = Opcode::Service.word() | subcode::ZEROIZE_OTP;
    }

    pub fn otp_monotonic_counter_read(&mut self, asset_id: u32, output: DmaSpan) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::MONOTONIC_READ;
        self.w[2] = asset_id;
        self.w[3] = output.length;
        self.set_address(4, output.address);
    }

    pub fn otp_monotonic_counter_increment(&mut self, asset_id: u32) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::MONOTONIC_INCR;
        self.w[2] = asset_id;
    }

    /// Without an output buffer the key blob is not exported.
    pub fn provision_random_huk(
        &mut self,
        p: &HukProvisioning,
        output: DmaSpan,
        associated_data: &[u8],
    ) {
        self.w[0] = Opcode::AssetManagement.word() | subcode::PROVISION_RANDOM_HUK;
        self.w[2] = (p.auto_seed as u32) << 8;
        self.w[2] |= if p.key_128bit { 1 << 16 } else { 1 << 17 };
        self.w[3] = ((p.sample_cycles as u32) << 16)
            | ((p.sample_div as u32 & MASK_4_BITS) << 8)
            | ((p.scale as u32 & 0x3) << 6)
            | (p.noise_blocks as u32 & 0x1F);
        self.w[4] = ((p.adapt_prop_512_cutoff as u32 & 0x1FF) << 16)
            | ((p.adapt_prop_64_cutoff as u32 & 0x3F) << 8)
            | (p.rep_cnt_cutoff as u32 & 0x3F);

        if output.length != 0 {
            self.w[2] |= 1 << 31;
            self.w[5] = (output.length & MASK_10_BITS)
                | ((associated_data.len() as u32 & MASK_8_BITS) << 16);
            self.set_address(6, output.address);
            self.write_byte_array(8, associated_data);
        }
    }
}

impl ResultToken {
    pub fn otp_monotonic_counter_read_length(&self) -> u32 {
        self.w[1] & MASK_10_BITS
    }

    pub fn provision_random_huk_blob_length(&self) -> u32 {
        self.w[1] & MASK_10_BITS
    }
}
