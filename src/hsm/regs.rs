//! Registers used by the mailbox protocol

use paste::paste;

use crate::config::MemoryMap;

pub const MBXSTAT_MBX1INFULL: u32 = 0x0000_0001;
pub const MBXSTAT_MBX1OUTFULL: u32 = 0x0000_0002;

pub const MBXCTRL_MBX1INFULL: u32 = 0x0000_0001;
pub const MBXCTRL_MBX1OUTEMPTY: u32 = 0x0000_0002;
pub const MBXCTRL_MBX1LINK: u32 = 0x0000_0004;

pub const MODULESTATUS_CRC24OK: u32 = 0x0000_0200;
pub const MODULESTATUS_FWIMGACCEPTED: u32 = 0x0080_0000;
pub const MODULESTATUS_FATALERROR: u32 = 0x8000_0000;

pub const HSM_CTL_CPUIDUNLK_UNLOCK: u32 = 0x8000_0000;
pub const HSM_CTL_CPUIDUNLK_LOCK: u32 = 0x0000_0000;
pub const HSM_CTL_CPUIDSEL_APPID: u32 = 0x0000_0000;
pub const HSM_CTL_DMAFWDIS_DIS: u32 = 0x0000_0040;

pub const VIMS_CFG_HSMSZ_M: u32 = 0x0000_0700;
pub const VIMS_CFG_HSMSZ_SIZE_96: u32 = 0x0000_0300;
pub const VIMS_CFG_LOCK_DIS: u32 = 0x0000_0001;

/// Lockout value that hands CPUID0 and CPUID1 over to the application.
pub const MBXLOCKOUT_UNLOCK_CPUID: u32 = 0xFFFF_FCFC;
/// Mask that clears the mailbox 1 and 2 lockout of host CPU_ID 0.
pub const MBXLOCKOUT_HOST_ACCESS: u32 = 0xFFFF_FF77;

const HSMCRYPTO_O_MBX1IN: usize = 0x0000;
const HSMCRYPTO_O_MBX1OUT: usize = 0x0000;
const HSMCRYPTO_O_MBXSTAT: usize = 0x3F00;
const HSMCRYPTO_O_MBXCTRL: usize = 0x3F00;
const HSMCRYPTO_O_MBXLINKID: usize = 0x3F08;
const HSMCRYPTO_O_MBXLOCKOUT: usize = 0x3F10;
const HSMCRYPTO_O_MODULESTATUS: usize = 0x3FE0;
const HSM_O_CTL: usize = 0x0004;
const VIMS_O_CFG: usize = 0x03FC;

/// A register of the HSM, HSMCRYPTO, VIMS or CLKCTL blocks.
///
/// MBXSTAT/MBXCTRL and MBX1IN/MBX1OUT share an address; reads and writes go to different
/// registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Mbx1In(usize),
    Mbx1Out(usize),
    MbxStat,
    MbxCtrl,
    MbxLinkId,
    MbxLockout,
    ModuleStatus,
    HsmCtl,
    VimsCfg,
    ClkCfg1,
    ClkEnSet1,
    ClkEnClr1,
    ClkHsmCfg,
}

impl Reg {
    pub fn address(self, map: &MemoryMap) -> usize {
        let crypto = map.hsmcrypto_base;
        match self {
            Reg::Mbx1In(word) => crypto + HSMCRYPTO_O_MBX1IN + word * 4,
            Reg::Mbx1Out(word) => crypto + HSMCRYPTO_O_MBX1OUT + word * 4,
            Reg::MbxStat => crypto + HSMCRYPTO_O_MBXSTAT,
            Reg::MbxCtrl => crypto + HSMCRYPTO_O_MBXCTRL,
            Reg::MbxLinkId => crypto + HSMCRYPTO_O_MBXLINKID,
            Reg::MbxLockout => crypto + HSMCRYPTO_O_MBXLOCKOUT,
            Reg::ModuleStatus => crypto + HSMCRYPTO_O_MODULESTATUS,
            Reg::HsmCtl => map.hsm_base + HSM_O_CTL,
            Reg::VimsCfg => map.vims_base + VIMS_O_CFG,
            Reg::ClkCfg1 => map.clkctl_base + map.clkctl_clkcfg1,
            Reg::ClkEnSet1 => map.clkctl_base + map.clkctl_clkenset1,
            Reg::ClkEnClr1 => map.clkctl_base + map.clkctl_clkenclr1,
            Reg::ClkHsmCfg => map.clkctl_base + map.clkctl_hsmcfg,
        }
    }
}

/// 32-bit register access.
pub trait HsmRegisters {
    fn read(&mut self, reg: Reg) -> u32;
    fn write(&mut self, reg: Reg, value: u32);
}

macro_rules! impl_register_accessors {
    ($($name:ident => $reg:ident),+ $(,)?) => {
        paste! {
            /// Named accessors on top of [`HsmRegisters`].
            pub trait HsmRegistersExt: HsmRegisters {
                $(
                    #[inline]
                    fn [<read_ $name>](&mut self) -> u32 {
                        self.read(Reg::$reg)
                    }

                    #[inline]
                    fn [<write_ $name>](&mut self, value: u32) {
                        self.write(Reg::$reg, value)
                    }
                )+
            }

            impl<T: HsmRegisters + ?Sized> HsmRegistersExt for T {}
        }
    };
}

impl_register_accessors!(
    mbxstat => MbxStat,
    mbxctrl => MbxCtrl,
    mbxlinkid => MbxLinkId,
    mbxlockout => MbxLockout,
    modulestatus => ModuleStatus,
    hsm_ctl => HsmCtl,
    vims_cfg => VimsCfg,
    clkcfg1 => ClkCfg1,
    clkenset1 => ClkEnSet1,
    clkenclr1 => ClkEnClr1,
    clk_hsmcfg => ClkHsmCfg,
);

/// Memory mapped registers.
pub struct Mmio {
    map: MemoryMap,
}

impl Mmio {
    /// # Safety
    ///
    /// `map` must describe the registers of the running device, and no other code may drive the
    /// HSM mailbox while this instance exists.
    pub unsafe fn new(map: MemoryMap) -> Self {
        Self { map }
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }
}

impl HsmRegisters for Mmio {
    #[inline]
    fn read(&mut self, reg: Reg) -> u32 {
        unsafe { core::ptr::read_volatile(reg.address(&self.map) as *const u32) }
    }

    #[inline]
    fn write(&mut self, reg: Reg, value: u32) {
        unsafe { core::ptr::write_volatile(reg.address(&self.map) as *mut u32, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses() {
        let map = MemoryMap::default();
        let crypto = map.hsmcrypto_base;
        assert_eq!(Reg::Mbx1In(3).address(&map), crypto + 12);
        assert_eq!(Reg::MbxStat.address(&map), Reg::MbxCtrl.address(&map));
        assert_eq!(Reg::ModuleStatus.address(&map), crypto + 0x3FE0);
        assert_eq!(Reg::VimsCfg.address(&map), map.vims_base + 0x3FC);
        assert_eq!(Reg::ClkEnSet1.address(&map), map.clkctl_base + 0x14);
    }
}
