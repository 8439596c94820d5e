//! Shared HSM access for crypto drivers
//!
//! One [`HsmDriver`] owns the mailbox. A crypto driver takes the lock with
//! [`HsmDriver::acquire_lock`], builds its command token, submits it and collects the result in
//! polling, blocking or callback fashion. The result interrupt calls
//! [`HsmDriver::handle_interrupt`].

use core::cell::RefCell;

use critical_section::Mutex;
use log::{debug, warn};

use super::regs::HsmRegisters;
use super::{Hsm, HsmError};
use crate::token::pk::{DmaSpan, PkAssetCommand, PkOperation};
use crate::token::{CommandToken, ResultToken};
use crate::utility::{bits_to_bytes, data_size_b2w, data_size_vwb, SIGNATURE_VCOUNT};

/// Post-processing function of a crypto driver; gets the driver handle.
pub type CallbackFn = fn(usize);

/// How [`HsmDriver::wait_for_result`] returns after a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnBehavior {
    /// Return immediately, the callback runs from the interrupt handler.
    Callback = 1,
    /// Wait for the interrupt handler to signal the result.
    Blocking = 2,
    /// Poll the mailbox with the interrupt disabled.
    Polling = 4,
}

/// The HSM result interrupt line.
pub trait InterruptLine {
    fn clear(&mut self);
    fn enable(&mut self);
    fn disable(&mut self);
}

/// For polling-only setups without an interrupt.
impl InterruptLine for () {
    fn clear(&mut self) {}
    fn enable(&mut self) {}
    fn disable(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    Hsm(HsmError),
    NotInitialized,
    /// The caller does not hold the lock.
    NotOwner,
    /// No result arrived in time.
    Timeout,
}

impl DriverError {
    pub const fn code(self) -> i32 {
        match self {
            DriverError::Timeout => -2,
            DriverError::Hsm(e) => e.code(),
            _ => -1,
        }
    }
}

impl From<HsmError> for DriverError {
    fn from(e: HsmError) -> Self {
        match e {
            HsmError::Timeout => DriverError::Timeout,
            e => DriverError::Hsm(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcdsaOperation {
    Sign,
    Verify,
}

/// Asset based ECDSA request. The digest travels inside the token.
#[derive(Debug, Clone, Copy)]
pub struct EcdsaRequest<'a> {
    pub operation: EcdsaOperation,
    pub curve_bits: usize,
    pub key_asset: u32,
    pub param_asset: u32,
    pub digest: &'a [u8],
    pub digest_bits: usize,
    /// r followed by s, each as a hardware vector.
    pub signature: u64,
}

struct Operation {
    command: CommandToken,
    result: ResultToken,
    behavior: ReturnBehavior,
    callback: Option<CallbackFn>,
    owner: Option<usize>,
    in_progress: bool,
    posted: bool,
}

struct Inner<R, I> {
    hsm: Hsm<R>,
    irq: I,
    op: Operation,
    initialized: bool,
}

pub struct HsmDriver<R, I = ()> {
    inner: Mutex<RefCell<Inner<R, I>>>,
    poll_limit: u32,
}

impl<R: HsmRegisters, I: InterruptLine> HsmDriver<R, I> {
    pub fn new(hsm: Hsm<R>, irq: I) -> Self {
        let poll_limit = hsm.config().poll_limit;

        Self {
            inner: Mutex::new(RefCell::new(Inner {
                hsm,
                irq,
                op: Operation {
                    command: CommandToken::new(),
                    result: ResultToken::new(),
                    behavior: ReturnBehavior::Polling,
                    callback: None,
                    owner: None,
                    in_progress: false,
                    posted: false,
                },
                initialized: false,
            })),
            poll_limit,
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner<R, I>) -> T) -> T {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Enable the clock, link the mailbox and boot the firmware, once.
    ///
    /// Each step runs in its own critical section and the wait for the firmware image polls
    /// with interrupts enabled.
    pub fn init(&self) -> Result<(), DriverError> {
        if self.is_initialized() {
            return Ok(());
        }

        self.with(|inner| inner.hsm.enable_clock())?;
        self.with(|inner| inner.hsm.init_mbox())?;

        if !self.with(|inner| inner.hsm.start_boot())? {
            let boot_delay = self.with(|inner| inner.hsm.config().boot_delay);
            let mut accepted = false;
            for _ in 0..boot_delay {
                if self.with(|inner| inner.hsm.image_accepted()) {
                    accepted = true;
                    break;
                }
            }
            if !accepted {
                warn!("hsm: firmware image not accepted");
                return Err(DriverError::Hsm(HsmError::BootTimeout));
            }
            self.with(|inner| inner.hsm.booted())?;
        }

        self.with(|inner| inner.initialized = true);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.with(|inner| inner.initialized)
    }

    /// Take the lock for `handle`, trying up to `timeout + 1` times. Clears both tokens.
    pub fn acquire_lock(&self, timeout: u32, handle: usize) -> bool {
        for _ in 0..=timeout {
            let taken = self.with(|inner| {
                if inner.op.owner.is_some() {
                    return false;
                }
                inner.op.owner = Some(handle);
                inner.op.command = CommandToken::new();
                inner.op.result = ResultToken::new();
                true
            });
            if taken {
                return true;
            }
        }
        false
    }

    pub fn release_lock(&self) {
        self.with(|inner| inner.op.owner = None);
    }

    pub fn lock_owner(&self) -> Option<usize> {
        self.with(|inner| inner.op.owner)
    }

    /// Edit the pending command token.
    pub fn with_command<T>(&self, f: impl FnOnce(&mut CommandToken) -> T) -> T {
        self.with(|inner| f(&mut inner.op.command))
    }

    /// Copy of the last result token.
    pub fn result(&self) -> ResultToken {
        self.with(|inner| inner.op.result.clone())
    }

    pub fn result_code(&self) -> i32 {
        self.with(|inner| inner.op.result.result_code())
    }

    pub fn result_asset_id(&self) -> u32 {
        self.with(|inner| inner.op.result.asset_id())
    }

    pub fn is_operation_in_progress(&self) -> bool {
        self.with(|inner| inner.op.in_progress)
    }

    /// Write the pending command token into the mailbox on behalf of the lock owner.
    pub fn submit_token(
        &self,
        behavior: ReturnBehavior,
        callback: Option<CallbackFn>,
        handle: usize,
    ) -> Result<(), DriverError> {
        self.with(|inner| {
            if inner.op.owner != Some(handle) {
                warn!("hsm: submit from {:#x} without the lock", handle);
                return Err(DriverError::NotOwner);
            }

            inner.op.behavior = behavior;
            inner.op.callback = callback;
            inner.op.posted = false;

            inner.irq.clear();
            if behavior == ReturnBehavior::Polling {
                inner.irq.disable();
            } else {
                inner.irq.enable();
            }

            let Inner { hsm, op, irq, .. } = inner;
            match hsm.write_token(&op.command.w) {
                Ok(()) => {
                    op.in_progress = true;
                    Ok(())
                }
                Err(e) => {
                    irq.clear();
                    irq.disable();
                    Err(e.into())
                }
            }
        })
    }

    /// Collect the result of the last submission according to its return behavior.
    ///
    /// In polling and blocking mode the callback runs before returning.
    pub fn wait_for_result(&self) -> Result<(), DriverError> {
        let behavior = self.with(|inner| inner.op.behavior);

        match behavior {
            ReturnBehavior::Polling => self.poll_result()?,
            ReturnBehavior::Blocking => self.pend()?,
            ReturnBehavior::Callback => return Ok(()),
        }

        self.run_callback();
        Ok(())
    }

    /// Poll the mailbox for the result, at most `poll_limit` times. Only each read is done in
    /// a critical section. On timeout the operation stays in progress.
    fn poll_result(&self) -> Result<(), DriverError> {
        for _ in 0..self.poll_limit {
            let read = self.with(|inner| {
                match inner.hsm.try_read_result(&mut inner.op.result) {
                    Ok(()) => {
                        inner.op.in_progress = false;
                        Ok(true)
                    }
                    Err(nb::Error::WouldBlock) => Ok(false),
                    Err(nb::Error::Other(e)) => Err(DriverError::from(e)),
                }
            })?;
            if read {
                return Ok(());
            }
        }
        Err(DriverError::Timeout)
    }

    /// Wait for [`HsmDriver::handle_interrupt`] to post the result, checking at most
    /// `poll_limit` times. On timeout the operation stays in progress and a later interrupt
    /// still completes it.
    fn pend(&self) -> Result<(), DriverError> {
        for _ in 0..self.poll_limit {
            let posted = self.with(|inner| core::mem::replace(&mut inner.op.posted, false));
            if posted {
                return Ok(());
            }
        }
        Err(DriverError::Timeout)
    }

    fn run_callback(&self) {
        let (callback, owner) = self.with(|inner| (inner.op.callback, inner.op.owner));
        if let Some(callback) = callback {
            callback(owner.unwrap_or(0));
        }
    }

    /// Result interrupt handler.
    pub fn handle_interrupt(&self) {
        let behavior = self.with(|inner| {
            inner.irq.clear();
            inner.irq.disable();

            if inner.hsm.try_read_result(&mut inner.op.result).is_err() {
                warn!("hsm: interrupt without a result token");
            }
            inner.op.in_progress = false;

            if inner.op.behavior == ReturnBehavior::Blocking {
                inner.op.posted = true;
            }
            inner.op.behavior
        });

        if behavior == ReturnBehavior::Callback {
            self.run_callback();
        }
    }

    /// Drain an in-flight token and give up the lock. The HSM cannot abort a running token.
    pub fn cancel_operation(&self) -> Result<(), DriverError> {
        let in_progress = self.with(|inner| {
            if inner.op.in_progress {
                inner.irq.disable();
            }
            inner.op.in_progress
        });
        if !in_progress {
            return Ok(());
        }

        let res = self.poll_result();
        self.with(|inner| {
            inner.irq.clear();
            inner.op.in_progress = false;
            inner.op.owner = None;
        });
        debug!("hsm: operation cancelled");
        res
    }

    pub fn construct_create_asset_token(&self, policy: u64, length: u32) {
        self.with_command(|cmd| cmd.asset_create(policy, length));
    }

    pub fn construct_load_plaintext_asset_token(&self, input: DmaSpan, asset_id: u32) {
        self.with_command(|cmd| {
            cmd.asset_load_plaintext(asset_id);
            cmd.asset_load_set_input(input);
        });
    }

    pub fn construct_delete_asset_token(&self, asset_id: u32) {
        self.with_command(|cmd| cmd.asset_delete(asset_id));
    }

    pub fn construct_ecdsa_token(&self, req: &EcdsaRequest<'_>) {
        let nwords = data_size_b2w(req.curve_bits) as u8;
        let sign_size = SIGNATURE_VCOUNT as u32 * data_size_vwb(req.curve_bits) as u32;
        let command = match req.operation {
            EcdsaOperation::Sign => PkOperation::EcdsaSign,
            EcdsaOperation::Verify => PkOperation::EcdsaVerify,
        };
        let digest_len = bits_to_bytes(req.digest_bits).min(req.digest.len());

        self.with_command(|cmd| {
            cmd.pk_asset_command(&PkAssetCommand {
                command: command as u8,
                nwords,
                mwords: nwords,
                key_asset: req.key_asset,
                param_asset: req.param_asset,
                output: DmaSpan::new(req.signature, sign_size),
                ..Default::default()
            });
            cmd.pk_asset_set_explicit_digest(&req.digest[..digest_len]);
        });
    }

    pub fn construct_ecdh_num_load_token(&self, index: u8, buffer: DmaSpan) {
        self.with_command(|cmd| cmd.pk_num_load(index, buffer));
    }

    pub fn construct_ecdh_num_set_token(&self, length: u8) {
        self.with_command(|cmd| cmd.pk_claim(length, 0, 0));
    }

    pub fn construct_ecdh_pka_operation_token(
        &self,
        operation: PkOperation,
        input: u64,
        output: u64,
        length: u32,
    ) {
        self.with_command(|cmd| {
            cmd.pk_operation(
                operation as u8,
                0,
                DmaSpan::new(input, length),
                DmaSpan::new(output, length),
            )
        });
    }

    /// Put the firmware to sleep. Fails while an operation is in flight.
    pub fn sleep(&self) -> Result<(), DriverError> {
        self.with(|inner| {
            if inner.op.in_progress {
                return Err(DriverError::Hsm(HsmError::InvalidState(inner.hsm.state())));
            }
            inner.hsm.sleep().map_err(DriverError::from)
        })
    }

    pub fn disable_clock(&self) -> Result<(), DriverError> {
        self.with(|inner| {
            inner.initialized = false;
            inner.hsm.disable_clock().map_err(DriverError::from)
        })
    }

    pub fn system_info(&self) -> Result<crate::token::system::SystemInfo, DriverError> {
        self.with(|inner| {
            if !inner.initialized {
                return Err(DriverError::NotInitialized);
            }
            inner.hsm.system_info().map_err(DriverError::from)
        })
    }

    pub fn free(self) -> (Hsm<R>, I) {
        let inner = self.inner.into_inner().into_inner();
        (inner.hsm, inner.irq)
    }
}
