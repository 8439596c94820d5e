//! This crate drives the HSM of the CC23xx/CC27xx: the mailbox boot protocol, the EIP-130
//! token format and the asymmetric crypto dispatch on top of it.

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod bufmanager;
pub mod config;
pub mod hsm;
pub mod logger;
pub mod token;
pub mod utility;
pub mod vex;

pub use config::{BufManagerConfig, HsmConfig, VexConfig};

/// Memory barrier around hand-offs between the CPU and the HSM DMA engine.
#[inline]
pub(crate) fn dma_fence() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::asm::dsb();
}
