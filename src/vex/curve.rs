use embedded_hal::delay::DelayNs;
use log::warn;

use super::{AsymResult, Mappings, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::DmaSpan;
use crate::utility::policy;

/// Load domain parameters into a new, non-modifiable asset.
#[derive(Debug)]
pub struct InstallCurve<'a> {
    pub params: &'a [u8],
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    pub(super) fn install_curve(&mut self, c: &InstallCurve<'_>) -> Result<AsymResult, VexStatus> {
        if c.params.is_empty() {
            return Err(VexStatus::BadArgument);
        }

        let (mut cmd, _) = self.token();
        cmd.asset_create(
            policy::ASYM_KEYPARAMS | policy::NON_MODIFIABLE,
            c.params.len() as u32,
        );
        let created = self.exchange(&mut cmd)?;
        if created.result_code() < 0 {
            return Ok(AsymResult::from_token(&created));
        }
        let asset_id = created.asset_id();

        let mut maps = Mappings::default();
        let outcome = self.load_curve(&mut maps, asset_id, c.params);
        let outcome = self.finish(&maps, outcome, false);

        match outcome {
            Ok(r) if r.result >= 0 => Ok(AsymResult { asset_id, ..r }),
            other => {
                warn!("vex: dropping curve asset {:#x}", asset_id);
                let (mut cmd, _) = self.token();
                cmd.asset_delete(asset_id);
                let _ = self.exchange(&mut cmd);
                other
            }
        }
    }

    fn load_curve(
        &mut self,
        maps: &mut Mappings,
        asset_id: u32,
        params: &[u8],
    ) -> Result<AsymResult, VexStatus> {
        let input = DmaSpan::new(self.map_input(maps, params)?, params.len() as u32);

        let (mut cmd, _) = self.token();
        cmd.asset_load_plaintext(asset_id);
        cmd.asset_load_set_input(input);

        let token = self.exchange(&mut cmd)?;
        Ok(AsymResult::from_token(&token))
    }
}
