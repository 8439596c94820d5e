use embedded_hal::delay::DelayNs;

use super::{words, AsymResult, Mappings, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::{DmaSpan, PkAssetCommand, PkAssetMethod};
use crate::token::MASK_12_BITS;

/// Longest OAEP label or other additional input.
pub const MAX_ADDITIONAL_INPUT: usize = 208;

#[derive(Debug)]
pub enum KeyWrapData<'a> {
    /// Receives the wrapped key.
    Wrap(&'a mut [u8]),
    /// The wrapped key to load into the asset.
    Unwrap(&'a [u8]),
}

/// RSA OAEP/PKCS#1 v1.5 and SM2 encryption of a key asset.
#[derive(Debug)]
pub struct KeyWrap<'a> {
    pub method: PkAssetMethod,
    pub modulus_bits: u32,
    pub domain_asset: u32,
    pub key_asset: u32,
    /// The asset that is wrapped, or that receives the unwrapped key.
    pub asset_id: u32,
    pub data: KeyWrapData<'a>,
    pub additional_input: &'a [u8],
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    pub(super) fn key_wrap(&mut self, c: &mut KeyWrap<'_>) -> Result<AsymResult, VexStatus> {
        let shape_ok = matches!(
            (&c.data, c.method.is_wrap()),
            (KeyWrapData::Wrap(_), true) | (KeyWrapData::Unwrap(_), false)
        );
        if !shape_ok
            || c.key_asset == 0
            || c.asset_id == 0
            || c.additional_input.len() > MAX_ADDITIONAL_INPUT
        {
            return Err(VexStatus::BadArgument);
        }

        let mut maps = Mappings::default();
        let outcome = self.key_wrap_inner(&mut maps, c);
        self.finish(&maps, outcome, true)
    }

    fn key_wrap_inner(
        &mut self,
        maps: &mut Mappings,
        c: &mut KeyWrap<'_>,
    ) -> Result<AsymResult, VexStatus> {
        let (mut cmd, token_id) = self.token();

        let mut input = DmaSpan::default();
        let mut output = DmaSpan::default();
        match &mut c.data {
            KeyWrapData::Wrap(out) => {
                let address = self.map_output(maps, out, token_id)?;
                output = DmaSpan::new(address, self.bufs.get_size(address) as u32);
            }
            KeyWrapData::Unwrap(data) => {
                input = DmaSpan::new(self.map_input(maps, data)?, data.len() as u32);
            }
        }

        let nwords = words(c.modulus_bits);
        cmd.pk_asset_command(&PkAssetCommand {
            command: c.method.command(),
            nwords,
            mwords: nwords,
            other_len: 0,
            key_asset: c.key_asset,
            param_asset: c.domain_asset,
            io_asset: c.asset_id,
            input,
            output,
        });
        if !c.additional_input.is_empty() {
            cmd.pk_asset_set_additional_data(c.additional_input);
        }
        cmd.set_token_id(token_id, output.address != 0 && self.write_token_id());

        let token = self.exchange(&mut cmd)?;
        let mut result = AsymResult::from_token(&token);
        if result.result >= 0 && output.address != 0 {
            result.wrapped_size = token.w[1] & MASK_12_BITS;
        }
        Ok(result)
    }
}
