//! Asymmetric crypto dispatch
//!
//! [`Vex::asym`] turns a typed [`AsymCommand`] into an EIP-130 command token, exchanges it through
//! a [`Transport`] and hands back the firmware result. Caller buffers are mapped through the
//! [`BufManager`] for the duration of the call; outputs are copied back only when the firmware
//! reports success.
//!
//! The raw PKA primitives are split in two: [`Vex::asym`] submits, [`Vex::post_processing`]
//! releases the buffers once the result token is known. Only one of them can be in flight.

use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::bufmanager::{BufError, BufManager, BufferType, DmaResource};
use crate::config::VexConfig;
use crate::hsm::regs::HsmRegisters;
use crate::hsm::{Hsm, HsmError};
use crate::token::pk::{MethodFamily, PkAssetMethod};
use crate::token::{CommandToken, ResultToken, DMA_TOKENID_SIZE};

mod curve;
mod ecies;
mod genkey;
mod keycheck;
mod keywrap;
mod pka;
mod shared_secret;
mod signverify;

pub use curve::InstallCurve;
pub use ecies::{Ecies, EciesData};
pub use genkey::GenKey;
pub use keycheck::KeyCheck;
pub use keywrap::{KeyWrap, KeyWrapData};
pub use pka::PkaCommand;
pub use shared_secret::SharedSecret;
pub use signverify::{Sign, Verify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VexStatus {
    Success = 0,
    Unsupported = -1,
    NotConnected = -2,
    PowerStateError = -3,
    OperationNotAllowed = -4,
    OperationFailed = -5,
    InvalidOpcode = -6,
    InvalidSubcode = -7,
    InvalidLength = -8,
    BadArgument = -9,
    NoMemory = -10,
    NoIdentity = -11,
    NoMailbox = -12,
    MailboxInUse = -13,
    ResponseTimeout = -14,
    DataTimeout = -15,
    DataMappingError = -16,
    LockTimeout = -17,
    TokenTimeout = -18,
    InternalError = -19,
}

impl VexStatus {
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl From<BufError> for VexStatus {
    fn from(e: BufError) -> Self {
        match e {
            BufError::NotReady => VexStatus::DataTimeout,
            _ => VexStatus::DataMappingError,
        }
    }
}

/// Synchronous command/result token exchange with the firmware.
pub trait Transport {
    fn exchange(&mut self, cmd: &CommandToken, result: &mut ResultToken) -> Result<(), VexStatus>;
}

impl<R: HsmRegisters> Transport for Hsm<R> {
    fn exchange(&mut self, cmd: &CommandToken, result: &mut ResultToken) -> Result<(), VexStatus> {
        Hsm::exchange(self, cmd, result).map_err(|e| match e {
            HsmError::Timeout => VexStatus::ResponseTimeout,
            HsmError::InvalidState(_) | HsmError::BootTimeout => VexStatus::NotConnected,
            HsmError::Fatal => VexStatus::PowerStateError,
            HsmError::TokenError(_) => VexStatus::OperationFailed,
        })
    }
}

/// Source of token identifiers.
pub trait TokenIdSource {
    fn next_token_id(&mut self) -> u16;
}

/// Wrapping counter that never hands out 0.
#[derive(Debug, Default)]
pub struct TokenIdCounter {
    last: u16,
}

impl TokenIdCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenIdSource for TokenIdCounter {
    fn next_token_id(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        self.last
    }
}

/// Make room for the token ID the firmware appends to DMA output.
pub fn token_id_size_alignment(size: usize) -> usize {
    size + DMA_TOKENID_SIZE
}

/// Put the inverted token ID in the last word so a stale buffer never looks complete.
pub fn token_id_check_clear(buffer: &mut [u8], token_id: u32) -> bool {
    match last_word_mut(buffer) {
        Some(word) => {
            word.copy_from_slice(&(!token_id).to_le_bytes());
            true
        }
        None => false,
    }
}

/// The output is complete once the firmware wrote the token ID into the last word.
pub fn token_id_check_ready(buffer: &[u8], token_id: u32) -> bool {
    let len = buffer.len();
    if len < DMA_TOKENID_SIZE {
        return false;
    }
    let mut word = [0; 4];
    word.copy_from_slice(&buffer[len - DMA_TOKENID_SIZE..]);
    u32::from_le_bytes(word) == token_id
}

fn last_word_mut(buffer: &mut [u8]) -> Option<&mut [u8]> {
    let len = buffer.len();
    if len < DMA_TOKENID_SIZE {
        return None;
    }
    Some(&mut buffer[len - DMA_TOKENID_SIZE..])
}

/// One asymmetric request. Asset based requests carry their method, which must belong to the
/// family of the variant.
#[derive(Debug)]
pub enum AsymCommand<'a> {
    Pka(PkaCommand<'a>),
    KeyCheck(KeyCheck),
    Sign(Sign<'a>),
    Verify(Verify<'a>),
    GenPublicKey(GenKey<'a>),
    GenKeyPair(GenKey<'a>),
    SharedSecret(SharedSecret<'a>),
    KeyWrap(KeyWrap<'a>),
    Ecies(Ecies<'a>),
    InstallCurve(InstallCurve<'a>),
}

/// What the firmware answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsymResult {
    /// Result code of the token: 0 is success, < 0 an error, > 0 a warning.
    pub result: i32,
    /// State asset of an EdDSA sign/verify that was started.
    pub state_asset_id: u32,
    /// Size of the produced wrapped key.
    pub wrapped_size: u32,
    /// Asset created by the request.
    pub asset_id: u32,
}

impl AsymResult {
    pub(crate) fn from_token(token: &ResultToken) -> Self {
        Self {
            result: token.result_code(),
            ..Default::default()
        }
    }
}

const MAX_MAPPINGS: usize = 3;

/// Buffers mapped for one token.
#[derive(Default)]
pub(crate) struct Mappings {
    entries: [(u64, bool); MAX_MAPPINGS],
    len: usize,
}

impl Mappings {
    fn is_full(&self) -> bool {
        self.len == MAX_MAPPINGS
    }

    /// Callers check [`Mappings::is_full`] before mapping the buffer.
    fn push(&mut self, address: u64, output: bool) {
        debug_assert!(!self.is_full());
        if let Some(entry) = self.entries.get_mut(self.len) {
            *entry = (address, output);
            self.len += 1;
        }
    }

    fn iter(&self) -> impl Iterator<Item = &(u64, bool)> {
        self.entries[..self.len].iter()
    }
}

pub(crate) struct PkaSlot {
    busy: bool,
    token_id: u16,
    vector: u64,
    input: u64,
    output: u64,
    output_host: usize,
    output_len: usize,
}

impl PkaSlot {
    const fn empty() -> Self {
        Self {
            busy: false,
            token_id: 0,
            vector: 0,
            input: 0,
            output: 0,
            output_host: 0,
            output_len: 0,
        }
    }
}

pub struct Vex<X, T, R: DmaResource, D> {
    transport: X,
    ids: T,
    bufs: BufManager<R, D>,
    config: VexConfig,
    pka: PkaSlot,
    last_result: ResultToken,
}

impl<X, T, R, D> Vex<X, T, R, D>
where
    X: Transport,
    T: TokenIdSource,
    R: DmaResource,
    D: DelayNs,
{
    /// Install the token ID buffer checks when DMA completion is checked through token IDs.
    pub fn new(
        transport: X,
        ids: T,
        mut bufs: BufManager<R, D>,
        config: VexConfig,
    ) -> Result<Self, VexStatus> {
        if config.check_dma_with_token_id {
            bufs.register(
                Some(token_id_size_alignment),
                Some(token_id_check_clear),
                Some(token_id_check_ready),
            )
            .map_err(|_| VexStatus::InternalError)?;
        }

        Ok(Self {
            transport,
            ids,
            bufs,
            config,
            pka: PkaSlot::empty(),
            last_result: ResultToken::new(),
        })
    }

    pub fn config(&self) -> &VexConfig {
        &self.config
    }

    pub fn transport(&mut self) -> &mut X {
        &mut self.transport
    }

    pub fn buffers(&self) -> &BufManager<R, D> {
        &self.bufs
    }

    /// The last result token received.
    pub fn last_result(&self) -> &ResultToken {
        &self.last_result
    }

    /// True while a PKA primitive waits for [`Vex::post_processing`].
    pub fn pka_in_flight(&self) -> bool {
        self.pka.busy
    }

    pub fn free(self) -> (X, T, BufManager<R, D>) {
        (self.transport, self.ids, self.bufs)
    }

    /// Run one asymmetric request.
    ///
    /// `Ok` means the token went through; the firmware verdict is in [`AsymResult::result`].
    pub fn asym(&mut self, cmd: &mut AsymCommand<'_>) -> Result<AsymResult, VexStatus> {
        match cmd {
            AsymCommand::Pka(c) => self.pka_submit(c),
            AsymCommand::KeyCheck(c) if family(c.method, MethodFamily::KeyCheck) => {
                self.key_check(c)
            }
            AsymCommand::Sign(c) if family(c.method, MethodFamily::Sign) => self.sign(c),
            AsymCommand::Verify(c) if family(c.method, MethodFamily::Verify) => self.verify(c),
            AsymCommand::GenPublicKey(c) if family(c.method, MethodFamily::GenPublicKey) => {
                self.gen_public_key(c)
            }
            AsymCommand::GenKeyPair(c) if family(c.method, MethodFamily::GenKeyPair) => {
                self.gen_key_pair(c)
            }
            AsymCommand::SharedSecret(c) if family(c.method, MethodFamily::SharedSecret) => {
                self.shared_secret(c)
            }
            AsymCommand::KeyWrap(c) if family(c.method, MethodFamily::KeyWrap) => {
                self.key_wrap(c)
            }
            AsymCommand::Ecies(c) if family(c.method, MethodFamily::Ecies) => self.ecies(c),
            AsymCommand::InstallCurve(c) => self.install_curve(c),
            _ => Err(VexStatus::Unsupported),
        }
    }

    /// Complete a PKA primitive submitted by [`Vex::asym`], given its result token.
    ///
    /// `cmd` must be the command that was submitted; its output is where the result is copied.
    pub fn post_processing(
        &mut self,
        cmd: &mut AsymCommand<'_>,
        result: &ResultToken,
    ) -> Result<AsymResult, VexStatus> {
        match cmd {
            AsymCommand::Pka(c) => self.pka_complete(c, result),
            _ => Err(VexStatus::Unsupported),
        }
    }

    fn token(&mut self) -> (CommandToken, u16) {
        (CommandToken::new(), self.ids.next_token_id())
    }

    fn exchange(&mut self, cmd: &mut CommandToken) -> Result<ResultToken, VexStatus> {
        cmd.set_identity(self.config.identity);

        let mut result = ResultToken::new();
        self.transport.exchange(cmd, &mut result).map_err(|e| {
            warn!("vex: exchange of {:#010x} failed: {:?}", cmd.w[0], e);
            e
        })?;

        self.last_result = result.clone();
        Ok(result)
    }

    fn map_input(&mut self, maps: &mut Mappings, data: &[u8]) -> Result<u64, VexStatus> {
        if maps.is_full() {
            return Err(VexStatus::InternalError);
        }

        // The slice outlives the mapping: every caller unmaps before returning.
        let address = unsafe {
            self.bufs
                .map(false, BufferType::In, data.as_ptr(), data.len(), 0)
        }
        .map_err(|e| {
            warn!("vex: input mapping failed: {:?}", e);
            VexStatus::NoMemory
        })?;

        maps.push(address, false);
        Ok(address)
    }

    fn map_output(
        &mut self,
        maps: &mut Mappings,
        data: &mut [u8],
        token_id: u16,
    ) -> Result<u64, VexStatus> {
        if maps.is_full() {
            return Err(VexStatus::InternalError);
        }

        let address = unsafe {
            self.bufs.map(
                false,
                BufferType::Out,
                data.as_mut_ptr(),
                data.len(),
                token_id as u32,
            )
        }
        .map_err(|e| {
            warn!("vex: output mapping failed: {:?}", e);
            VexStatus::NoMemory
        })?;

        maps.push(address, true);
        Ok(address)
    }

    /// Release all buffers. Inputs are dropped silently; the first output failure is reported.
    fn unmap_all(&mut self, maps: &Mappings, copy: bool) -> Result<(), VexStatus> {
        let mut status = Ok(());

        for &(address, output) in maps.iter() {
            if output {
                if let Err(e) = self.bufs.unmap(address, true, copy, 0) {
                    if status.is_ok() {
                        status = Err(VexStatus::from(e));
                    }
                }
            } else {
                let _ = self.bufs.unmap(address, false, false, 0);
            }
        }
        status
    }

    /// Release the buffers of a finished request, copying outputs back if it succeeded.
    ///
    /// A transport or mapping error of the request takes precedence over unmap errors.
    fn finish(
        &mut self,
        maps: &Mappings,
        outcome: Result<AsymResult, VexStatus>,
        copy_outputs: bool,
    ) -> Result<AsymResult, VexStatus> {
        let copy = copy_outputs && matches!(outcome, Ok(r) if r.result >= 0);
        let released = self.unmap_all(maps, copy);

        let result = outcome?;
        released?;
        debug!("vex: request done with {}", result.result);
        Ok(result)
    }

    fn write_token_id(&self) -> bool {
        self.config.check_dma_with_token_id
    }
}

fn family(method: PkAssetMethod, family: MethodFamily) -> bool {
    method.family() == family
}

/// Words needed for an operand of `bits` bits.
pub(crate) fn words(bits: u32) -> u8 {
    ((bits + 31) / 32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_id_checks() {
        let mut buf = [0u8; 12];
        assert_eq!(token_id_size_alignment(8), 12);

        assert!(token_id_check_clear(&mut buf, 0x1234));
        assert_eq!(&buf[8..], &[0xCB, 0xED, 0xFF, 0xFF]);
        assert!(!token_id_check_ready(&buf, 0x1234));

        buf[8..].copy_from_slice(&0x1234u32.to_le_bytes());
        assert!(token_id_check_ready(&buf, 0x1234));

        assert!(!token_id_check_clear(&mut buf[..3], 1));
        assert!(!token_id_check_ready(&buf[..3], 1));
    }

    #[test]
    fn unmap_errors_map_to_status() {
        assert_eq!(VexStatus::from(BufError::NotReady), VexStatus::DataTimeout);
        assert_eq!(
            VexStatus::from(BufError::UnknownAddress),
            VexStatus::DataMappingError
        );
        assert_eq!(VexStatus::from(BufError::Internal).code(), -16);
        assert_eq!(VexStatus::InternalError.code(), -19);
    }

    #[test]
    fn token_ids_skip_zero() {
        let mut ids = TokenIdCounter { last: u16::MAX - 1 };
        assert_eq!(ids.next_token_id(), u16::MAX);
        assert_eq!(ids.next_token_id(), 1);
    }

    struct Unplugged;

    impl Transport for Unplugged {
        fn exchange(&mut self, _: &CommandToken, _: &mut ResultToken) -> Result<(), VexStatus> {
            Err(VexStatus::NotConnected)
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn mappings_are_bounded() {
        use crate::bufmanager::HeapDma;
        use crate::config::BufManagerConfig;

        let bufs = BufManager::new(HeapDma::new(), NoDelay, BufManagerConfig::default());
        let config = VexConfig {
            check_dma_with_token_id: false,
            ..Default::default()
        };
        let mut vex = Vex::new(Unplugged, TokenIdCounter::new(), bufs, config).unwrap();

        let data = [0u8; 4];
        let mut out = [0u8; 4];
        let mut maps = Mappings::default();
        for _ in 0..MAX_MAPPINGS {
            vex.map_input(&mut maps, &data).unwrap();
        }
        assert_eq!(vex.map_input(&mut maps, &data), Err(VexStatus::InternalError));
        assert_eq!(
            vex.map_output(&mut maps, &mut out, 1),
            Err(VexStatus::InternalError)
        );
        assert_eq!(vex.buffers().in_use(), MAX_MAPPINGS);

        vex.unmap_all(&maps, false).unwrap();
        assert_eq!(vex.buffers().in_use(), 0);
    }

    #[test]
    fn operand_words() {
        assert_eq!(words(256), 8);
        assert_eq!(words(521), 17);
        assert_eq!(words(0), 0);
    }
}
