//! Mailbox 1 token transfer

use log::warn;

use super::regs::*;
use super::{Hsm, HsmError};
use crate::token::{ResultToken, RESULT_WORDS};

/// Set in the first output word when the firmware rejected the token.
pub const OUTPUT_TOKEN_ERROR: u32 = 0x8000_0000;

impl<R: HsmRegisters> Hsm<R> {
    /// Spin until `reg & mask` is (`set`) or is not set, at most `poll_limit` reads.
    pub(crate) fn wait_for(&mut self, reg: Reg, mask: u32, set: bool) -> Result<(), HsmError> {
        for _ in 0..self.config.poll_limit {
            if (self.regs.read(reg) & mask != 0) == set {
                return Ok(());
            }
        }
        warn!("hsm: timeout on {:?} mask {:#x}", reg, mask);
        Err(HsmError::Timeout)
    }

    /// Write `token` into mailbox 1 and mark it full.
    pub fn write_token(&mut self, token: &[u32]) -> Result<(), HsmError> {
        self.wait_for(Reg::MbxStat, MBXSTAT_MBX1INFULL, false)?;

        for (i, word) in token.iter().enumerate() {
            self.regs.write(Reg::Mbx1In(i), *word);
        }
        crate::dma_fence();

        self.regs.write_mbxctrl(MBXCTRL_MBX1INFULL);
        Ok(())
    }

    pub fn is_output_full(&mut self) -> bool {
        self.regs.read_mbxstat() & MBXSTAT_MBX1OUTFULL != 0
    }

    /// Copy a result token out of mailbox 1 and hand the mailbox back to the firmware.
    pub fn try_read_result(&mut self, result: &mut ResultToken) -> nb::Result<(), HsmError> {
        if !self.is_output_full() {
            return Err(nb::Error::WouldBlock);
        }

        for i in 0..RESULT_WORDS {
            result.w[i] = self.regs.read(Reg::Mbx1Out(i));
        }
        self.regs.write_mbxctrl(MBXCTRL_MBX1OUTEMPTY);
        Ok(())
    }

    /// Poll for a result token, at most `poll_limit` times.
    pub fn read_result(&mut self, result: &mut ResultToken) -> Result<(), HsmError> {
        for _ in 0..self.config.poll_limit {
            match self.try_read_result(result) {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        Err(HsmError::Timeout)
    }

    /// Run one of the two word system tokens (boot, sleep, resume) and check the error bit
    /// of the answer.
    pub(crate) fn short_token(&mut self, token: [u32; 2]) -> Result<(), HsmError> {
        self.write_token(&token)?;
        self.wait_for(Reg::MbxStat, MBXSTAT_MBX1OUTFULL, true)?;

        let out = self.regs.read(Reg::Mbx1Out(0));
        self.regs.write_mbxctrl(MBXCTRL_MBX1OUTEMPTY);

        if out & OUTPUT_TOKEN_ERROR != 0 {
            warn!("hsm: token {:#010x} rejected with {:#010x}", token[0], out);
            return Err(HsmError::TokenError(out));
        }
        Ok(())
    }
}
