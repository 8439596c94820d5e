use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use super::{AsymResult, Mappings, PkaSlot, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::{DmaSpan, PkOperation};
use crate::token::{CommandToken, ResultToken};

/// A raw PKA primitive on vectors loaded into the engine.
///
/// `NumSetN` claims the engine with the operand sizes, `NumLoad` loads `input` into vector
/// `index`, every other operation runs on the loaded vectors with `input` as extra operand and
/// writes `output`.
#[derive(Debug)]
pub struct PkaCommand<'a> {
    pub operation: PkOperation,
    pub nwords: u8,
    pub mwords: u8,
    pub mmask: u8,
    pub index: u8,
    pub public_exponent: u32,
    pub input: Option<&'a [u8]>,
    pub output: Option<&'a mut [u8]>,
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    pub(super) fn pka_submit(&mut self, c: &mut PkaCommand<'_>) -> Result<AsymResult, VexStatus> {
        if self.pka.busy {
            return Err(VexStatus::MailboxInUse);
        }
        if c.operation == PkOperation::NumLoad && c.input.map_or(true, |i| i.is_empty()) {
            return Err(VexStatus::BadArgument);
        }

        let mut maps = Mappings::default();
        let (mut cmd, token_id) = self.token();
        let mut slot = PkaSlot {
            busy: true,
            token_id,
            ..PkaSlot::empty()
        };

        let prepared = self.pka_prepare(&mut maps, &mut slot, &mut cmd, c);
        let outcome = match prepared {
            Ok(()) => {
                cmd.set_token_id(token_id, self.write_token_id());
                self.exchange(&mut cmd)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(token) => {
                debug!(
                    "vex: pka {:?} in flight, token {:#06x}",
                    c.operation, slot.token_id
                );
                self.pka = slot;
                Ok(AsymResult::from_token(&token))
            }
            Err(e) => {
                let _ = self.unmap_all(&maps, false);
                Err(e)
            }
        }
    }

    fn pka_prepare(
        &mut self,
        maps: &mut Mappings,
        slot: &mut PkaSlot,
        cmd: &mut CommandToken,
        c: &mut PkaCommand<'_>,
    ) -> Result<(), VexStatus> {
        match c.operation {
            PkOperation::NumSetN => cmd.pk_claim(c.nwords, c.mwords, c.mmask),
            PkOperation::NumLoad => {
                let data = c.input.unwrap_or_default();
                slot.vector = self.map_input(maps, data)?;
                cmd.pk_num_load(c.index, DmaSpan::new(slot.vector, data.len() as u32));
            }
            _ => {
                let mut input = DmaSpan::default();
                if let Some(data) = c.input.filter(|d| !d.is_empty()) {
                    slot.input = self.map_input(maps, data)?;
                    input = DmaSpan::new(slot.input, data.len() as u32);
                }

                let mut output = DmaSpan::default();
                if let Some(data) = c.output.as_deref_mut().filter(|d| !d.is_empty()) {
                    slot.output_host = data.as_ptr() as usize;
                    slot.output_len = data.len();
                    slot.output = self.map_output(maps, data, slot.token_id)?;
                    output = DmaSpan::new(slot.output, self.bufs.get_size(slot.output) as u32);
                }

                cmd.pk_operation(c.operation as u8, c.public_exponent, input, output);
            }
        }
        Ok(())
    }

    pub(super) fn pka_complete(
        &mut self,
        c: &mut PkaCommand<'_>,
        result: &ResultToken,
    ) -> Result<AsymResult, VexStatus> {
        if !self.pka.busy {
            return Err(VexStatus::OperationNotAllowed);
        }
        let slot = core::mem::replace(&mut self.pka, PkaSlot::empty());
        let result = AsymResult::from_token(result);

        for address in [slot.vector, slot.input].iter().copied() {
            if address != 0 {
                let _ = self.bufs.unmap(address, false, false, 0);
            }
        }
        if slot.output == 0 {
            return Ok(result);
        }

        let same_output = c.output.as_deref().map_or(false, |o| {
            o.as_ptr() as usize == slot.output_host && o.len() == slot.output_len
        });
        if !same_output {
            warn!("vex: pka output does not match the submitted buffer");
            let _ = self.bufs.unmap(slot.output, false, false, 0);
            return Err(VexStatus::BadArgument);
        }

        self.bufs
            .unmap(slot.output, true, result.result >= 0, 0)
            .map_err(VexStatus::from)?;
        Ok(result)
    }
}
