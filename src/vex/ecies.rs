use embedded_hal::delay::DelayNs;

use super::{words, AsymResult, Mappings, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::{DmaSpan, PkAssetCommand, PkAssetMethod};

#[derive(Debug)]
pub enum EciesData<'a> {
    /// Receives the ephemeral public key and the wrapped data.
    Wrap {
        eph_pub_key: &'a mut [u8],
        wrapped: &'a mut [u8],
    },
    /// Wrapped data, and the asset that holds the sender's ephemeral public key.
    Unwrap {
        wrapped: &'a [u8],
        eph_pub_key_asset: u32,
    },
}

/// ECIES wrap/unwrap of the key asset `asset_data_id`.
#[derive(Debug)]
pub struct Ecies<'a> {
    pub method: PkAssetMethod,
    pub modulus_bits: u32,
    pub domain_asset: u32,
    pub key_asset: u32,
    pub asset_data_id: u32,
    pub data: EciesData<'a>,
    pub other_info: Option<&'a [u8]>,
}

impl Ecies<'_> {
    fn check(&self) -> Result<(), VexStatus> {
        if self.key_asset == 0 || self.domain_asset == 0 || self.asset_data_id == 0 {
            return Err(VexStatus::BadArgument);
        }

        let ok = match &self.data {
            EciesData::Wrap {
                eph_pub_key,
                wrapped,
            } => {
                self.method == PkAssetMethod::EciesWrap
                    && !eph_pub_key.is_empty()
                    && !wrapped.is_empty()
            }
            EciesData::Unwrap {
                wrapped,
                eph_pub_key_asset,
            } => {
                self.method == PkAssetMethod::EciesUnwrap
                    && !wrapped.is_empty()
                    && *eph_pub_key_asset != 0
            }
        };

        if ok {
            Ok(())
        } else {
            Err(VexStatus::BadArgument)
        }
    }
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    pub(super) fn ecies(&mut self, c: &mut Ecies<'_>) -> Result<AsymResult, VexStatus> {
        c.check()?;

        let mut maps = Mappings::default();
        let outcome = self.ecies_inner(&mut maps, c);
        let wrap = matches!(c.data, EciesData::Wrap { .. });
        self.finish(&maps, outcome, wrap)
    }

    fn ecies_inner(
        &mut self,
        maps: &mut Mappings,
        c: &mut Ecies<'_>,
    ) -> Result<AsymResult, VexStatus> {
        let (mut cmd, token_id) = self.token();

        let mut output = DmaSpan::default();
        let mut wrapped_output = None;
        let mut eph_pub_key_asset = 0;
        match &mut c.data {
            EciesData::Wrap {
                eph_pub_key,
                wrapped,
            } => {
                let eph = self.map_output(maps, eph_pub_key, token_id)?;
                let data = self.map_output(maps, wrapped, token_id)?;
                output = DmaSpan::new(eph, self.bufs.get_size(eph) as u32);
                wrapped_output = Some(DmaSpan::new(data, self.bufs.get_size(data) as u32));
            }
            EciesData::Unwrap {
                wrapped,
                eph_pub_key_asset: asset,
            } => {
                output = DmaSpan::new(self.map_input(maps, wrapped)?, wrapped.len() as u32);
                eph_pub_key_asset = *asset;
            }
        }

        let mut other_info = DmaSpan::default();
        if let Some(info) = c.other_info.filter(|i| !i.is_empty()) {
            other_info = DmaSpan::new(self.map_input(maps, info)?, info.len() as u32);
        }

        let nwords = words(c.modulus_bits);
        cmd.pk_asset_command(&PkAssetCommand {
            command: c.method.command(),
            nwords,
            mwords: nwords,
            other_len: 0,
            key_asset: c.key_asset,
            param_asset: c.domain_asset,
            io_asset: c.asset_data_id,
            input: other_info,
            output,
        });
        match wrapped_output {
            Some(span) => cmd.pk_asset_set_additional_output(span),
            None => cmd.pk_asset_set_additional_asset_id(eph_pub_key_asset),
        }
        cmd.set_token_id(token_id, true);

        let token = self.exchange(&mut cmd)?;
        Ok(AsymResult::from_token(&token))
    }
}
