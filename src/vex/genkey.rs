use embedded_hal::delay::DelayNs;

use super::{words, AsymResult, Mappings, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::{DmaSpan, PkAssetCommand, PkAssetMethod};

/// Associated data of a wrapped private key must leave room for the KEK asset ID.
pub const MAX_ASSOCIATED_DATA: usize = 256 - 4;

/// Public key or key pair generation.
///
/// With a KEK the generated private key is also exported, wrapped, into `key_blob`.
#[derive(Debug)]
pub struct GenKey<'a> {
    pub method: PkAssetMethod,
    pub modulus_bits: u32,
    pub divisor_bits: u32,
    pub domain_asset: u32,
    pub pub_key_asset: u32,
    pub priv_key_asset: u32,
    pub kek_asset: u32,
    pub associated_data: &'a [u8],
    pub key_blob: Option<&'a mut [u8]>,
    pub pub_key: Option<&'a mut [u8]>,
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    pub(super) fn gen_key_pair(&mut self, c: &mut GenKey<'_>) -> Result<AsymResult, VexStatus> {
        if c.kek_asset != 0
            && (c.key_blob.is_none() || c.associated_data.len() >= MAX_ASSOCIATED_DATA)
        {
            return Err(VexStatus::BadArgument);
        }

        let mut maps = Mappings::default();
        let outcome = self.gen_key_pair_inner(&mut maps, c);
        self.finish(&maps, outcome, true)
    }

    /// Map an output of the key pair generation and return its span in the token.
    fn key_pair_output(
        &mut self,
        maps: &mut Mappings,
        data: &mut [u8],
        token_id: u16,
    ) -> Result<DmaSpan, VexStatus> {
        let len = data.len();
        let address = self.map_output(maps, data, token_id)?;

        let size = if self.config.disable_token_id_write_keypair {
            self.bufs.zeroize(address);
            len
        } else {
            self.bufs.get_size(address)
        };
        Ok(DmaSpan::new(address, size as u32))
    }

    fn gen_key_pair_inner(
        &mut self,
        maps: &mut Mappings,
        c: &mut GenKey<'_>,
    ) -> Result<AsymResult, VexStatus> {
        let (mut cmd, token_id) = self.token();
        let buffer_token_id = if self.config.disable_token_id_write_keypair {
            0
        } else {
            token_id
        };

        let mut key_blob = DmaSpan::default();
        if c.kek_asset != 0 {
            if let Some(blob) = c.key_blob.as_deref_mut() {
                key_blob = self.key_pair_output(maps, blob, buffer_token_id)?;
            }
        }

        let mut pub_key = DmaSpan::default();
        if let Some(key) = c.pub_key.as_deref_mut() {
            pub_key = self.key_pair_output(maps, key, buffer_token_id)?;
        }

        cmd.pk_asset_command(&PkAssetCommand {
            command: c.method.command(),
            nwords: words(c.modulus_bits),
            mwords: words(c.divisor_bits),
            other_len: 0,
            key_asset: c.priv_key_asset,
            param_asset: c.domain_asset,
            io_asset: c.pub_key_asset,
            input: key_blob,
            output: pub_key,
        });

        if key_blob.address != 0 {
            cmd.pk_asset_set_additional_asset_id(c.kek_asset);
            cmd.pk_asset_set_additional_data(c.associated_data);
            cmd.pk_asset_addlen_correction(4);
        }

        let write = !self.config.disable_token_id_write_keypair
            && (key_blob.address != 0 || pub_key.address != 0)
            && self.write_token_id();
        cmd.set_token_id(token_id, write);

        let token = self.exchange(&mut cmd)?;
        Ok(AsymResult::from_token(&token))
    }

    pub(super) fn gen_public_key(&mut self, c: &mut GenKey<'_>) -> Result<AsymResult, VexStatus> {
        let mut maps = Mappings::default();
        let outcome = self.gen_public_key_inner(&mut maps, c);
        self.finish(&maps, outcome, true)
    }

    fn gen_public_key_inner(
        &mut self,
        maps: &mut Mappings,
        c: &mut GenKey<'_>,
    ) -> Result<AsymResult, VexStatus> {
        let (mut cmd, token_id) = self.token();

        let mut pub_key = DmaSpan::default();
        if let Some(key) = c.pub_key.as_deref_mut() {
            let len = key.len() as u32;
            pub_key = DmaSpan::new(self.map_output(maps, key, token_id)?, len);
        }

        cmd.pk_asset_command(&PkAssetCommand {
            command: c.method.command(),
            nwords: words(c.modulus_bits),
            mwords: words(c.divisor_bits),
            other_len: 0,
            key_asset: c.priv_key_asset,
            param_asset: c.domain_asset,
            io_asset: c.pub_key_asset,
            input: DmaSpan::default(),
            output: pub_key,
        });
        cmd.set_token_id(token_id, pub_key.address != 0 && self.write_token_id());

        let token = self.exchange(&mut cmd)?;
        Ok(AsymResult::from_token(&token))
    }
}
