//! HSM clock, mailbox link and firmware boot

use embedded_hal::delay::DelayNs;
use log::{debug, error, warn};

use crate::config::HsmConfig;
use crate::token::system::SystemInfo;
use crate::token::{CommandToken, ResultToken};

pub mod driver;
pub mod mailbox;
pub mod regs;

use regs::*;

/// Boot token: opcode word and the magic value.
pub const BOOT_TOKEN: [u32; 2] = [0xCF00_0000, 0x0372_5746];
/// Sleep token: opcode word and the magic value.
pub const SLEEP_TOKEN: [u32; 2] = [0x5F00_0000, 0x0372_5746];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsmState {
    ClockDisabled,
    ClockEnabled,
    MailboxLinked,
    Booted,
    Asleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsmError {
    /// MODULESTATUS reports a fatal error.
    Fatal,
    /// The firmware answered with the error bit set; the first output word.
    TokenError(u32),
    /// A status register did not reach the expected value within `poll_limit` reads.
    Timeout,
    /// The firmware image was not accepted in time.
    BootTimeout,
    /// The operation needs a booted HSM.
    InvalidState(HsmState),
}

impl HsmError {
    pub const fn code(self) -> i32 {
        match self {
            HsmError::Timeout | HsmError::BootTimeout => -2,
            _ => -1,
        }
    }
}

pub struct Hsm<R> {
    regs: R,
    config: HsmConfig,
    state: HsmState,
}

impl<R: HsmRegisters> Hsm<R> {
    pub fn new(regs: R, config: HsmConfig) -> Self {
        Self {
            regs,
            config,
            state: HsmState::ClockDisabled,
        }
    }

    pub fn state(&self) -> HsmState {
        self.state
    }

    pub fn config(&self) -> &HsmConfig {
        &self.config
    }

    pub fn registers(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Give the HSM 96 KB of VIMS, enable its clock and open its registers to the application.
    pub fn enable_clock(&mut self) -> Result<(), HsmError> {
        let map = self.config.memory_map;

        let vims = self.regs.read_vims_cfg();
        self.regs
            .write_vims_cfg((vims & !VIMS_CFG_HSMSZ_M) | VIMS_CFG_HSMSZ_SIZE_96 | VIMS_CFG_LOCK_DIS);

        self.regs.write_clkenset1(map.clkctl_hsm_mask);
        self.wait_for(Reg::ClkCfg1, map.clkctl_hsm_mask, true)?;

        self.regs.write_mbxlockout(MBXLOCKOUT_UNLOCK_CPUID);

        self.regs
            .write_hsm_ctl(HSM_CTL_CPUIDSEL_APPID | HSM_CTL_CPUIDUNLK_UNLOCK);
        self.regs
            .write_hsm_ctl(HSM_CTL_CPUIDUNLK_LOCK | HSM_CTL_DMAFWDIS_DIS);

        if self.config.verify_post
            && self.regs.read_clk_hsmcfg() & map.clkctl_hsmcfg_post_mask != 0
        {
            self.wait_for(Reg::ModuleStatus, MODULESTATUS_CRC24OK, true)?;
        }

        self.state = HsmState::ClockEnabled;
        debug!("hsm: clock enabled");
        Ok(())
    }

    /// Link mailbox 1 to the host and lift its lockout.
    pub fn init_mbox(&mut self) -> Result<(), HsmError> {
        if self.state == HsmState::ClockDisabled {
            return Err(HsmError::InvalidState(self.state));
        }

        let status = self.regs.read_mbxstat();
        self.regs.write_mbxctrl(MBXCTRL_MBX1LINK | status);
        self.regs.write_mbxlinkid(0);

        let lockout = self.regs.read_mbxlockout();
        self.regs.write_mbxlockout(lockout & MBXLOCKOUT_HOST_ACCESS);

        if self.state == HsmState::ClockEnabled {
            self.state = HsmState::MailboxLinked;
        }
        debug!("hsm: mailbox 1 linked");
        Ok(())
    }

    /// Hand the boot token to the firmware, then poll FWIMGACCEPTED up to `boot_delay` times.
    pub fn boot(&mut self) -> Result<(), HsmError> {
        if self.start_boot()? {
            return Ok(());
        }

        for _ in 0..self.config.boot_delay {
            if self.image_accepted() {
                return self.booted();
            }
        }

        error!("hsm: firmware image not accepted");
        Err(HsmError::BootTimeout)
    }

    /// Same as [`Hsm::boot`] but waits at most `timeout_us` microseconds for the image, polling
    /// every `boot_poll_us`.
    pub fn boot_with_delay<D: DelayNs>(
        &mut self,
        delay: &mut D,
        timeout_us: u32,
    ) -> Result<(), HsmError> {
        if self.start_boot()? {
            return Ok(());
        }

        let step = self.config.boot_poll_us.max(1);
        let mut remaining = timeout_us;
        loop {
            if self.image_accepted() {
                return self.booted();
            }
            if remaining == 0 {
                break;
            }
            let wait = step.min(remaining);
            delay.delay_us(wait);
            remaining -= wait;
        }

        error!("hsm: firmware image not accepted after {} us", timeout_us);
        Err(HsmError::BootTimeout)
    }

    /// Returns `true` when the firmware was already running.
    fn start_boot(&mut self) -> Result<bool, HsmError> {
        let status = self.regs.read_modulestatus();

        if status & MODULESTATUS_FATALERROR != 0 {
            error!("hsm: fatal error, status {:#010x}", status);
            return Err(HsmError::Fatal);
        }

        if status & MODULESTATUS_FWIMGACCEPTED != 0 {
            self.state = HsmState::Booted;
            debug!("hsm: firmware already running");
            return Ok(true);
        }

        self.short_token(BOOT_TOKEN)?;
        Ok(false)
    }

    fn image_accepted(&mut self) -> bool {
        self.regs.read_modulestatus() & MODULESTATUS_FWIMGACCEPTED != 0
    }

    fn booted(&mut self) -> Result<(), HsmError> {
        self.state = HsmState::Booted;
        debug!("hsm: booted");
        Ok(())
    }

    /// Put the firmware to sleep. A sleeping HSM still accepts another sleep token.
    pub fn sleep(&mut self) -> Result<(), HsmError> {
        self.short_token(SLEEP_TOKEN)?;
        self.state = HsmState::Asleep;
        debug!("hsm: asleep");
        Ok(())
    }

    /// Wake the firmware up with a resume-from-sleep token.
    pub fn resume(&mut self) -> Result<(), HsmError> {
        let mut cmd = CommandToken::new();
        cmd.system_resume_from_sleep();

        let mut result = ResultToken::new();
        self.exchange(&cmd, &mut result)?;
        if result.is_error() {
            warn!("hsm: resume failed with {}", result.result_code());
            return Err(HsmError::TokenError(result.w[0]));
        }

        self.state = HsmState::Booted;
        debug!("hsm: resumed");
        Ok(())
    }

    pub fn disable_clock(&mut self) -> Result<(), HsmError> {
        let mask = self.config.memory_map.clkctl_hsm_mask;
        self.regs.write_clkenclr1(mask);
        self.wait_for(Reg::ClkCfg1, mask, false)?;

        self.state = HsmState::ClockDisabled;
        debug!("hsm: clock disabled");
        Ok(())
    }

    /// Ask the firmware for its versions and state.
    pub fn system_info(&mut self) -> Result<SystemInfo, HsmError> {
        let mut cmd = CommandToken::new();
        cmd.system_info();

        let mut result = ResultToken::new();
        self.exchange(&cmd, &mut result)?;
        if result.is_error() {
            return Err(HsmError::TokenError(result.w[0]));
        }
        Ok(result.system_info())
    }

    /// Write a full command token and wait for its result token.
    pub fn exchange(
        &mut self,
        cmd: &CommandToken,
        result: &mut ResultToken,
    ) -> Result<(), HsmError> {
        match self.state {
            HsmState::Booted | HsmState::Asleep => {}
            state => return Err(HsmError::InvalidState(state)),
        }
        self.write_token(&cmd.w)?;
        self.read_result(result)
    }

    /// Releases the register block.
    pub fn free(self) -> R {
        self.regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::vec::Vec;

    /// Registers hold their last written value; writes are logged.
    #[derive(Default)]
    struct FakeRegs {
        values: HashMap<Reg, u32>,
        writes: Vec<(Reg, u32)>,
        /// Value of MBX1OUT word 0 once the boot or sleep token is in.
        answer: u32,
        accept_after_boot: bool,
    }

    impl HsmRegisters for FakeRegs {
        fn read(&mut self, reg: Reg) -> u32 {
            match reg {
                Reg::Mbx1Out(0) => self.answer,
                Reg::ClkCfg1 => self.values.get(&Reg::ClkEnSet1).copied().unwrap_or(0),
                _ => self.values.get(&reg).copied().unwrap_or(0),
            }
        }

        fn write(&mut self, reg: Reg, value: u32) {
            self.writes.push((reg, value));
            match reg {
                Reg::MbxCtrl if value == MBXCTRL_MBX1INFULL => {
                    self.values.insert(Reg::MbxStat, MBXSTAT_MBX1OUTFULL);
                    if self.accept_after_boot {
                        self.values
                            .insert(Reg::ModuleStatus, MODULESTATUS_FWIMGACCEPTED);
                    }
                }
                Reg::MbxCtrl if value == MBXCTRL_MBX1OUTEMPTY => {
                    self.values.insert(Reg::MbxStat, 0);
                }
                Reg::ClkEnClr1 => {
                    self.values.insert(Reg::ClkEnSet1, 0);
                }
                _ => {
                    self.values.insert(reg, value);
                }
            }
        }
    }

    fn config() -> HsmConfig {
        HsmConfig {
            boot_delay: 16,
            poll_limit: 16,
            ..Default::default()
        }
    }

    fn mbox_writes(regs: &FakeRegs) -> Vec<(Reg, u32)> {
        regs.writes
            .iter()
            .copied()
            .filter(|(r, _)| matches!(r, Reg::Mbx1In(_)))
            .collect()
    }

    #[test]
    fn enable_clock_sequence() {
        let mut hsm = Hsm::new(FakeRegs::default(), config());
        hsm.enable_clock().unwrap();
        assert_eq!(hsm.state(), HsmState::ClockEnabled);

        let regs = hsm.free();
        assert_eq!(
            regs.writes,
            [
                (Reg::VimsCfg, 0x301),
                (Reg::ClkEnSet1, 0x200),
                (Reg::MbxLockout, 0xFFFF_FCFC),
                (Reg::HsmCtl, 0x8000_0000),
                (Reg::HsmCtl, 0x40),
            ]
        );
    }

    #[test]
    fn enable_clock_waits_for_post() {
        let mut regs = FakeRegs::default();
        regs.values.insert(Reg::ClkHsmCfg, 1);
        let mut hsm = Hsm::new(regs, config());
        assert_eq!(hsm.enable_clock(), Err(HsmError::Timeout));

        hsm.registers()
            .values
            .insert(Reg::ModuleStatus, MODULESTATUS_CRC24OK);
        assert_eq!(hsm.enable_clock(), Ok(()));
    }

    #[test]
    fn init_mbox_needs_clock() {
        let mut hsm = Hsm::new(FakeRegs::default(), config());
        assert_eq!(
            hsm.init_mbox(),
            Err(HsmError::InvalidState(HsmState::ClockDisabled))
        );

        hsm.enable_clock().unwrap();
        hsm.registers().values.insert(Reg::MbxLockout, 0xFFFF_FFFF);
        hsm.init_mbox().unwrap();
        assert_eq!(hsm.state(), HsmState::MailboxLinked);

        let regs = hsm.free();
        let tail = &regs.writes[regs.writes.len() - 3..];
        assert_eq!(
            tail,
            [
                (Reg::MbxCtrl, MBXCTRL_MBX1LINK),
                (Reg::MbxLinkId, 0),
                (Reg::MbxLockout, 0xFFFF_FF77),
            ]
        );
    }

    #[test]
    fn init_mbox_carries_the_mailbox_status() {
        let mut hsm = Hsm::new(FakeRegs::default(), config());
        hsm.enable_clock().unwrap();
        hsm.registers()
            .values
            .insert(Reg::MbxStat, MBXSTAT_MBX1OUTFULL);
        hsm.init_mbox().unwrap();

        let regs = hsm.free();
        let ctrl: Vec<_> = regs
            .writes
            .iter()
            .filter(|(r, _)| *r == Reg::MbxCtrl)
            .collect();
        assert_eq!(ctrl, [&(Reg::MbxCtrl, MBXCTRL_MBX1LINK | MBXSTAT_MBX1OUTFULL)]);
        assert_eq!(ctrl[0].1 & MBXCTRL_MBX1INFULL, 0);
    }

    #[test]
    fn boot_writes_token_and_waits() {
        let mut regs = FakeRegs::default();
        regs.accept_after_boot = true;
        let mut hsm = Hsm::new(regs, config());
        hsm.boot().unwrap();
        assert_eq!(hsm.state(), HsmState::Booted);

        let regs = hsm.free();
        assert_eq!(
            mbox_writes(&regs),
            [(Reg::Mbx1In(0), 0xCF00_0000), (Reg::Mbx1In(1), 0x0372_5746)]
        );
        assert_eq!(regs.writes.last(), Some(&(Reg::MbxCtrl, MBXCTRL_MBX1OUTEMPTY)));
    }

    #[test]
    fn boot_is_idempotent() {
        let mut regs = FakeRegs::default();
        regs.values
            .insert(Reg::ModuleStatus, MODULESTATUS_FWIMGACCEPTED);
        let mut hsm = Hsm::new(regs, config());
        hsm.boot().unwrap();
        hsm.boot().unwrap();
        assert!(hsm.free().writes.is_empty());
    }

    #[test]
    fn boot_failures() {
        let mut regs = FakeRegs::default();
        regs.values.insert(
            Reg::ModuleStatus,
            MODULESTATUS_FATALERROR | MODULESTATUS_FWIMGACCEPTED,
        );
        let mut hsm = Hsm::new(regs, config());
        assert_eq!(hsm.boot(), Err(HsmError::Fatal));
        assert!(hsm.free().writes.is_empty());

        let mut regs = FakeRegs::default();
        regs.answer = 0x8000_0010;
        let mut hsm = Hsm::new(regs, config());
        assert_eq!(hsm.boot(), Err(HsmError::TokenError(0x8000_0010)));

        let mut hsm = Hsm::new(FakeRegs::default(), config());
        assert_eq!(hsm.boot(), Err(HsmError::BootTimeout));
        assert_eq!(HsmError::BootTimeout.code(), -2);
    }

    struct CountingDelay(u64);

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0 += u64::from(ns / 1000);
        }
    }

    #[test]
    fn boot_with_delay_times_out() {
        let mut hsm = Hsm::new(FakeRegs::default(), config());
        let mut delay = CountingDelay(0);
        assert_eq!(
            hsm.boot_with_delay(&mut delay, 100),
            Err(HsmError::BootTimeout)
        );
        assert_eq!(delay.0, 100);
    }

    #[test]
    fn boot_with_delay_longest_timeout() {
        let mut hsm = Hsm::new(
            FakeRegs::default(),
            HsmConfig {
                boot_poll_us: 0x1000_0000,
                ..config()
            },
        );
        let mut delay = CountingDelay(0);
        assert_eq!(
            hsm.boot_with_delay(&mut delay, u32::MAX),
            Err(HsmError::BootTimeout)
        );
        assert_eq!(delay.0, u64::from(u32::MAX));
    }

    #[test]
    fn sleep_and_disable() {
        let mut regs = FakeRegs::default();
        regs.accept_after_boot = true;
        let mut hsm = Hsm::new(regs, config());
        hsm.enable_clock().unwrap();
        hsm.init_mbox().unwrap();
        hsm.boot().unwrap();

        hsm.sleep().unwrap();
        assert_eq!(hsm.state(), HsmState::Asleep);
        hsm.sleep().unwrap();

        hsm.disable_clock().unwrap();
        assert_eq!(hsm.state(), HsmState::ClockDisabled);

        let regs = hsm.free();
        let sleeps = mbox_writes(&regs)
            .iter()
            .filter(|w| **w == (Reg::Mbx1In(0), 0x5F00_0000))
            .count();
        assert_eq!(sleeps, 2);
    }

    #[test]
    fn exchange_needs_boot() {
        let mut hsm = Hsm::new(FakeRegs::default(), config());
        assert_eq!(
            hsm.system_info().err(),
            Some(HsmError::InvalidState(HsmState::ClockDisabled))
        );
    }
}
