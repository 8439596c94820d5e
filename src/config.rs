//! Driver configuration

/// Where the HSM related blocks live, and the HSM bits of the clock controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    pub hsmcrypto_base: usize,
    pub hsm_base: usize,
    pub vims_base: usize,
    pub clkctl_base: usize,
    pub clkctl_clkcfg1: usize,
    pub clkctl_clkenset1: usize,
    pub clkctl_clkenclr1: usize,
    /// CLKCFG1.HSM and the matching CLKENSET1/CLKENCLR1 bit.
    pub clkctl_hsm_mask: u32,
    pub clkctl_hsmcfg: usize,
    /// CLKCTL.HSMCFG bit that enables the power-on self test.
    pub clkctl_hsmcfg_post_mask: u32,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self {
            hsmcrypto_base: 0x4002_0000,
            hsm_base: 0x4000_5000,
            vims_base: 0x4000_4000,
            clkctl_base: 0x4000_0000,
            clkctl_clkcfg1: 0x10,
            clkctl_clkenset1: 0x14,
            clkctl_clkenclr1: 0x18,
            clkctl_hsm_mask: 0x0000_0200,
            clkctl_hsmcfg: 0x2C,
            clkctl_hsmcfg_post_mask: 0x1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsmConfig {
    /// Polls of FWIMGACCEPTED after the boot token was accepted.
    pub boot_delay: u32,
    /// Bound on every other status register poll.
    pub poll_limit: u32,
    /// Microseconds between two FWIMGACCEPTED polls of a timed boot.
    pub boot_poll_us: u32,
    pub memory_map: MemoryMap,
    /// Wait for the firmware CRC check after enabling the clock, when the POST is enabled.
    pub verify_post: bool,
}

impl Default for HsmConfig {
    fn default() -> Self {
        Self {
            boot_delay: 0xF_FFFF,
            poll_limit: 0xF_FFFF,
            boot_poll_us: 10,
            memory_map: MemoryMap::default(),
            verify_post: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufManagerConfig {
    /// Always bounce, even if the buffer is DMA capable.
    pub bounce: bool,
    pub polling_skip_first_delays: u32,
    pub polling_max_loops: u32,
    pub polling_delay_us: u32,
}

impl Default for BufManagerConfig {
    fn default() -> Self {
        Self {
            bounce: true,
            polling_skip_first_delays: 50,
            polling_max_loops: 5000,
            polling_delay_us: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VexConfig {
    /// Let the firmware append the token ID to DMA output and poll for it before unmapping.
    pub check_dma_with_token_id: bool,
    /// Pass ECDSA/SM2 digests inside the token instead of a hash asset.
    pub explicit_digest: bool,
    /// Key pair generation does not write the token ID even when DMA checking is on.
    pub disable_token_id_write_keypair: bool,
    /// Identity written into word 1 of every token.
    pub identity: u32,
}

impl Default for VexConfig {
    fn default() -> Self {
        Self {
            check_dma_with_token_id: true,
            explicit_digest: true,
            disable_token_id_write_keypair: false,
            identity: 0,
        }
    }
}
