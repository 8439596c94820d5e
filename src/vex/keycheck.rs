use embedded_hal::delay::DelayNs;

use super::{words, AsymResult, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::{DmaSpan, PkAssetCommand, PkAssetMethod};

/// Check that a public and/or private key asset is valid for its domain.
#[derive(Debug, Clone, Copy)]
pub struct KeyCheck {
    pub method: PkAssetMethod,
    pub modulus_bits: u32,
    pub divisor_bits: u32,
    pub domain_asset: u32,
    pub pub_key_asset: u32,
    pub priv_key_asset: u32,
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    pub(super) fn key_check(&mut self, c: &KeyCheck) -> Result<AsymResult, VexStatus> {
        if c.pub_key_asset == 0 && c.priv_key_asset == 0 {
            return Err(VexStatus::BadArgument);
        }

        let (mut cmd, token_id) = self.token();
        cmd.pk_asset_command(&PkAssetCommand {
            command: c.method.command(),
            nwords: words(c.modulus_bits),
            mwords: words(c.divisor_bits),
            other_len: 0,
            key_asset: c.priv_key_asset,
            param_asset: c.domain_asset,
            io_asset: c.pub_key_asset,
            input: DmaSpan::default(),
            output: DmaSpan::default(),
        });
        cmd.set_token_id(token_id, false);

        let token = self.exchange(&mut cmd)?;
        Ok(AsymResult::from_token(&token))
    }
}
