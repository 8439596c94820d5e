use embedded_hal::delay::DelayNs;

use super::{words, AsymResult, Mappings, TokenIdSource, Transport, Vex, VexStatus};
use crate::bufmanager::DmaResource;
use crate::token::pk::{DmaSpan, PkAssetCommand, PkAssetMethod};
use crate::token::CommandToken;

/// Largest digest that travels inside the token.
pub const MAX_EXPLICIT_DIGEST: usize = 64;

/// Signature generation: ECDSA, SM2, RSA PKCS#1 v1.5/PSS and the EdDSA steps.
#[derive(Debug)]
pub struct Sign<'a> {
    pub method: PkAssetMethod,
    pub modulus_bits: u32,
    pub domain_asset: u32,
    pub key_asset: u32,
    /// Hash state asset of a multi part operation.
    pub digest_asset: u32,
    /// RSA-PSS only.
    pub salt_size: u8,
    /// Message or digest handed over through DMA.
    pub hash_data: Option<&'a [u8]>,
    /// Digest handed over inside the token instead.
    pub explicit_digest: Option<&'a [u8]>,
    /// Total message length for the final step of a multi part hash.
    pub total_message_size: u64,
    pub signature: Option<&'a mut [u8]>,
}

#[derive(Debug)]
pub struct Verify<'a> {
    pub method: PkAssetMethod,
    pub modulus_bits: u32,
    pub domain_asset: u32,
    pub key_asset: u32,
    pub digest_asset: u32,
    pub salt_size: u8,
    pub hash_data: Option<&'a [u8]>,
    pub explicit_digest: Option<&'a [u8]>,
    pub total_message_size: u64,
    pub signature: Option<&'a [u8]>,
}

fn digest_given(hash_data: Option<&[u8]>, explicit: Option<&[u8]>) -> Result<(), VexStatus> {
    match explicit {
        Some(d) if d.len() > MAX_EXPLICIT_DIGEST => Err(VexStatus::BadArgument),
        Some(d) if !d.is_empty() => Ok(()),
        _ if hash_data.is_some() => Ok(()),
        _ => Err(VexStatus::BadArgument),
    }
}

struct Digest<'a> {
    explicit: Option<&'a [u8]>,
    total_message_size: u64,
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    fn set_digest(&self, cmd: &mut CommandToken, digest: &Digest<'_>) {
        match digest.explicit {
            Some(d) if self.config.explicit_digest && !d.is_empty() => {
                cmd.pk_asset_set_explicit_digest(d)
            }
            _ => cmd.pk_asset_set_additional_length(digest.total_message_size),
        }
    }

    pub(super) fn sign(&mut self, c: &mut Sign<'_>) -> Result<AsymResult, VexStatus> {
        let partial = matches!(
            c.method,
            PkAssetMethod::EddsaSignInitial | PkAssetMethod::EddsaSignUpdate
        );
        digest_given(c.hash_data, c.explicit_digest)?;
        if c.signature.is_none() && !partial {
            return Err(VexStatus::BadArgument);
        }

        let mut maps = Mappings::default();
        let outcome = self.sign_inner(&mut maps, c);
        self.finish(&maps, outcome, true)
    }

    fn sign_inner(
        &mut self,
        maps: &mut Mappings,
        c: &mut Sign<'_>,
    ) -> Result<AsymResult, VexStatus> {
        let mut input = DmaSpan::default();
        if let Some(hash) = c.hash_data {
            input = DmaSpan::new(self.map_input(maps, hash)?, hash.len() as u32);
        }

        let (mut cmd, token_id) = self.token();
        let mut output = DmaSpan::default();
        if let Some(signature) = c.signature.as_deref_mut() {
            let len = signature.len() as u32;
            output = DmaSpan::new(self.map_output(maps, signature, token_id)?, len);
        }

        let nwords = words(c.modulus_bits);
        cmd.pk_asset_command(&PkAssetCommand {
            command: c.method.command(),
            nwords,
            mwords: nwords,
            other_len: c.salt_size,
            key_asset: c.key_asset,
            param_asset: c.domain_asset,
            io_asset: c.digest_asset,
            input,
            output,
        });
        self.set_digest(
            &mut cmd,
            &Digest {
                explicit: c.explicit_digest,
                total_message_size: c.total_message_size,
            },
        );
        cmd.set_token_id(token_id, self.write_token_id());

        let token = self.exchange(&mut cmd)?;
        let mut result = AsymResult::from_token(&token);
        if result.result >= 0 && c.method == PkAssetMethod::EddsaSignInitial {
            result.state_asset_id = token.asset_id();
        }
        Ok(result)
    }

    pub(super) fn verify(&mut self, c: &Verify<'_>) -> Result<AsymResult, VexStatus> {
        digest_given(c.hash_data, c.explicit_digest)?;
        if c.signature.is_none() && c.method != PkAssetMethod::EddsaVerifyFinal {
            return Err(VexStatus::BadArgument);
        }

        let mut maps = Mappings::default();
        let outcome = self.verify_inner(&mut maps, c);
        self.finish(&maps, outcome, false)
    }

    fn verify_inner(&mut self, maps: &mut Mappings, c: &Verify<'_>) -> Result<AsymResult, VexStatus> {
        let mut input = DmaSpan::default();
        if let Some(hash) = c.hash_data {
            input = DmaSpan::new(self.map_input(maps, hash)?, hash.len() as u32);
        }

        let mut signature = DmaSpan::default();
        if let Some(sig) = c.signature {
            signature = DmaSpan::new(self.map_input(maps, sig)?, sig.len() as u32);
        }

        let (mut cmd, token_id) = self.token();
        let nwords = words(c.modulus_bits);
        cmd.pk_asset_command(&PkAssetCommand {
            command: c.method.command(),
            nwords,
            mwords: nwords,
            other_len: c.salt_size,
            key_asset: c.key_asset,
            param_asset: c.domain_asset,
            io_asset: c.digest_asset,
            input,
            output: signature,
        });
        self.set_digest(
            &mut cmd,
            &Digest {
                explicit: c.explicit_digest,
                total_message_size: c.total_message_size,
            },
        );
        cmd.set_token_id(token_id, false);

        let token = self.exchange(&mut cmd)?;
        let mut result = AsymResult::from_token(&token);
        if result.result >= 0 && c.method == PkAssetMethod::EddsaVerifyInitial {
            result.state_asset_id = token.asset_id();
        }
        Ok(result)
    }
}
