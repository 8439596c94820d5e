use embedded_hal::delay::DelayNs;

use super::{words, AsymResult, Mappings, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::{DmaSpan, PkAssetCommand, PkAssetMethod};

/// Most key assets a shared secret can be derived into.
pub const MAX_ASSET_IDS: usize = 24;
/// Room for additional data in a public key token.
const ADDITIONAL_DATA_SIZE: usize = 208;

/// Key agreement: (EC)DH with one or two key pairs, X25519 and SM2 key exchange.
///
/// The secret either stays in the HSM (`save_shared_secret`) or is expanded into the key assets
/// of `asset_ids`, with `other_info` as KDF input.
#[derive(Debug)]
pub struct SharedSecret<'a> {
    pub method: PkAssetMethod,
    pub modulus_bits: u32,
    pub divisor_bits: u32,
    pub domain_asset: u32,
    pub pub_key_asset: u32,
    pub priv_key_asset: u32,
    /// Second key pair of the dual key pair methods.
    pub pub_key2_asset: u32,
    pub priv_key2_asset: u32,
    pub other_info: &'a [u8],
    /// SM2 key exchange only.
    pub local_eph_pub_key: Option<&'a [u8]>,
    pub asset_ids: &'a [u32],
    pub save_shared_secret: bool,
}

impl SharedSecret<'_> {
    fn additional_size(&self) -> usize {
        let dual = if self.method.is_dual_key_pair() { 2 } else { 0 };
        ((self.other_info.len() + 3) & !3) + 4 * (dual + self.asset_ids.len())
    }
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    pub(super) fn shared_secret(&mut self, c: &SharedSecret<'_>) -> Result<AsymResult, VexStatus> {
        if c.pub_key_asset == 0
            || c.priv_key_asset == 0
            || c.asset_ids.len() > MAX_ASSET_IDS
            || c.additional_size() > ADDITIONAL_DATA_SIZE
        {
            return Err(VexStatus::BadArgument);
        }
        if c.method.is_dual_key_pair() && (c.pub_key2_asset == 0 || c.priv_key2_asset == 0) {
            return Err(VexStatus::BadArgument);
        }

        let mut maps = Mappings::default();
        let outcome = self.shared_secret_inner(&mut maps, c);
        self.finish(&maps, outcome, false)
    }

    fn shared_secret_inner(
        &mut self,
        maps: &mut Mappings,
        c: &SharedSecret<'_>,
    ) -> Result<AsymResult, VexStatus> {
        let mut input = DmaSpan::default();
        if let Some(key) = c.local_eph_pub_key {
            input = DmaSpan::new(self.map_input(maps, key)?, key.len() as u32);
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
            input,
            output: DmaSpan::default(),
        });

        if c.method.is_dual_key_pair() {
            cmd.pk_asset_set_additional_asset_id(c.pub_key2_asset);
            cmd.pk_asset_set_additional_asset_id(c.priv_key2_asset);
        }
        if !c.other_info.is_empty() {
            cmd.pk_asset_set_additional_data(c.other_info);
        }
        for id in c.asset_ids {
            cmd.pk_asset_set_additional_asset_id(*id);
        }
        if c.save_shared_secret {
            cmd.pk_asset_save_shared_secret();
        }
        cmd.set_token_id(token_id, false);

        let token = self.exchange(&mut cmd)?;
        Ok(AsymResult::from_token(&token))
    }
}
