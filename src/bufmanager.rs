//! Buffer manager
//!
//! Keeps track of the host buffers handed to the HSM DMA engine. A buffer is used in place when
//! the platform can DMA from it directly, otherwise it is bounced through a buffer allocated from
//! the [`DmaResource`]. Bounced input data is copied in on map, bounced output data is copied back
//! on unmap.

use core::ptr::{self, NonNull};
use core::slice;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};
use zeroize::Zeroize;

use crate::config::BufManagerConfig;

/// Number of buffers that can be mapped at the same time.
pub const ADMIN_ENTRIES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    In,
    Out,
    InOut,
}

impl BufferType {
    pub const fn is_output(self) -> bool {
        matches!(self, BufferType::Out | BufferType::InOut)
    }

    pub const fn is_input(self) -> bool {
        matches!(self, BufferType::In | BufferType::InOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufError {
    /// The address was never mapped, or already unmapped.
    UnknownAddress,
    /// No free entry, allocation or translation failed, or a callback refused the buffer.
    Internal,
    /// The output buffer did not become ready in time.
    NotReady,
    /// Callbacks cannot change while buffers are mapped.
    Busy,
}

impl BufError {
    pub const fn code(self) -> i32 {
        match self {
            BufError::UnknownAddress | BufError::Busy => -1,
            BufError::Internal => -2,
            BufError::NotReady => -3,
        }
    }
}

/// Platform memory that the HSM can reach.
pub trait DmaResource {
    type Handle: Copy;

    /// Register an existing host buffer. Returns `None` when the HSM cannot DMA from it.
    fn check_and_register(&mut self, host: NonNull<u8>, size: usize) -> Option<Self::Handle>;

    /// Allocate a DMA capable buffer.
    fn alloc(&mut self, size: usize, alignment: usize) -> Option<(Self::Handle, NonNull<u8>)>;

    fn release(&mut self, handle: Self::Handle);

    /// Bus address of the buffer, as seen by the HSM.
    fn translate(&self, handle: Self::Handle) -> Option<u64>;

    /// Hand the buffer over to the device.
    fn pre_dma(&mut self, handle: Self::Handle, offset: usize, len: usize);

    /// Take the buffer back from the device.
    fn post_dma(&mut self, handle: Self::Handle, offset: usize, len: usize);
}

/// Grow the size of an output buffer, eg. to make room for a trailer.
pub type SizeAlignmentFn = fn(usize) -> usize;
/// Prepare an output buffer before it is handed out. Returning false fails the mapping.
pub type CheckClearFn = fn(&mut [u8], u32) -> bool;
/// Returns true once the device finished writing the output buffer.
pub type CheckReadyFn = fn(&[u8], u32) -> bool;

#[derive(Debug, Clone, Copy, Default)]
struct Callbacks {
    size_alignment: Option<SizeAlignmentFn>,
    check_clear: Option<CheckClearFn>,
    check_ready: Option<CheckReadyFn>,
}

#[derive(Debug, Clone, Copy)]
struct AdminEntry<H> {
    handle: H,
    bus_address: u64,
    buffer: NonNull<u8>,
    buffer_size: usize,
    bounced: bool,
    kind: BufferType,
    data: *mut u8,
    data_size: usize,
    user_data: u32,
}

impl<H> AdminEntry<H> {
    fn buffer(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.buffer.as_ptr(), self.buffer_size) }
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.buffer.as_ptr(), self.buffer_size) }
    }
}

pub struct BufManager<R: DmaResource, D> {
    dma: R,
    delay: D,
    config: BufManagerConfig,
    callbacks: Callbacks,
    admin: [Option<AdminEntry<R::Handle>>; ADMIN_ENTRIES],
}

const fn align_word(size: usize) -> usize {
    (size + 3) & !3
}

impl<R: DmaResource, D: DelayNs> BufManager<R, D> {
    pub fn new(dma: R, delay: D, config: BufManagerConfig) -> Self {
        Self {
            dma,
            delay,
            config,
            callbacks: Callbacks::default(),
            admin: [None; ADMIN_ENTRIES],
        }
    }

    /// Return the resources
    pub fn free(self) -> (R, D) {
        (self.dma, self.delay)
    }

    pub fn config(&self) -> &BufManagerConfig {
        &self.config
    }

    pub fn dma(&self) -> &R {
        &self.dma
    }

    /// Number of buffers currently mapped.
    pub fn in_use(&self) -> usize {
        self.admin.iter().filter(|e| e.is_some()).count()
    }

    /// Install the buffer callbacks. Fails while buffers are mapped, as those were prepared for
    /// the previous set.
    pub fn register(
        &mut self,
        size_alignment: Option<SizeAlignmentFn>,
        check_clear: Option<CheckClearFn>,
        check_ready: Option<CheckReadyFn>,
    ) -> Result<(), BufError> {
        if self.in_use() != 0 {
            warn!("bufmanager: callbacks changed with {} buffers mapped", self.in_use());
            return Err(BufError::Busy);
        }

        self.callbacks = Callbacks {
            size_alignment,
            check_clear,
            check_ready,
        };
        Ok(())
    }

    /// Map `size` bytes at `data` for DMA and return the bus address.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads of `size` bytes, and for writes as well when `kind` is an
    /// output type. The memory must stay valid and must not be accessed by the caller until the
    /// returned address is passed to [`BufManager::unmap`].
    pub unsafe fn map(
        &mut self,
        from_user_space: bool,
        kind: BufferType,
        data: *const u8,
        size: usize,
        user_data: u32,
    ) -> Result<u64, BufError> {
        if data.is_null() {
            return Err(BufError::Internal);
        }

        let address = self.alloc_buffer(
            from_user_space,
            self.config.bounce,
            kind,
            size,
            data,
            size,
            user_data,
        )?;
        self.pre_dma_address(address)?;
        Ok(address)
    }

    /// Like [`BufManager::map`] but always bounces through a buffer of `buffer_size` bytes, and
    /// does not hand the buffer over to the device yet. `data` may be null for output buffers
    /// that are not copied back.
    ///
    /// # Safety
    ///
    /// Same contract as [`BufManager::map`] for the `data_size` bytes at `data`.
    pub unsafe fn alloc(
        &mut self,
        from_user_space: bool,
        kind: BufferType,
        buffer_size: usize,
        data: *const u8,
        data_size: usize,
        user_data: u32,
    ) -> Result<u64, BufError> {
        self.alloc_buffer(
            from_user_space,
            true,
            kind,
            buffer_size,
            data,
            data_size,
            user_data,
        )
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn alloc_buffer(
        &mut self,
        from_user_space: bool,
        bounce: bool,
        kind: BufferType,
        buffer_size: usize,
        data: *const u8,
        data_size: usize,
        user_data: u32,
    ) -> Result<u64, BufError> {
        let slot = self
            .admin
            .iter()
            .position(Option::is_none)
            .ok_or(BufError::Internal)?;

        let mut size = align_word(buffer_size);
        if kind.is_output() {
            if let Some(size_alignment) = self.callbacks.size_alignment {
                size = size_alignment(size);
            }
        }

        let mut registered = None;
        if !from_user_space && !bounce && size == align_word(data_size) {
            if let Some(host) = NonNull::new(data as *mut u8) {
                registered = self
                    .dma
                    .check_and_register(host, size)
                    .map(|handle| (handle, host));
            }
        }

        let bounced = registered.is_none();
        let (handle, buffer) = match registered {
            Some(r) => r,
            None => self.dma.alloc(size, 4).ok_or(BufError::Internal)?,
        };

        let mut entry = AdminEntry {
            handle,
            bus_address: 0,
            buffer,
            buffer_size: size,
            bounced,
            kind,
            data: data as *mut u8,
            data_size,
            user_data,
        };

        match self.prepare(&mut entry) {
            Ok(address) => {
                entry.bus_address = address;
                self.admin[slot] = Some(entry);
                Ok(address)
            }
            Err(e) => {
                self.dma.release(handle);
                Err(e)
            }
        }
    }

    unsafe fn prepare(&mut self, entry: &mut AdminEntry<R::Handle>) -> Result<u64, BufError> {
        let address = match self.dma.translate(entry.handle) {
            Some(a) if a != 0 => a,
            _ => return Err(BufError::Internal),
        };

        if entry.kind.is_output() {
            if let Some(check_clear) = self.callbacks.check_clear {
                let user_data = entry.user_data;
                if !check_clear(entry.buffer_mut(), user_data) {
                    return Err(BufError::Internal);
                }
            }
        }

        if entry.bounced && entry.kind.is_input() && !entry.data.is_null() {
            let len = entry.data_size.min(entry.buffer_size);
            ptr::copy_nonoverlapping(entry.data, entry.buffer.as_ptr(), len);
        }

        Ok(address)
    }

    fn find(&self, address: u64, output: bool) -> Option<usize> {
        if address == 0 {
            return None;
        }
        self.admin.iter().position(|e| match e {
            Some(e) => e.bus_address == address && (!output || e.kind.is_output()),
            None => false,
        })
    }

    /// Release a mapped buffer.
    ///
    /// With `copy` set, an output buffer is taken back from the device, polled until ready and,
    /// when bounced, `actual_size` bytes (all data when 0) are copied back to the caller.
    /// The buffer is released even when that fails.
    pub fn unmap(
        &mut self,
        address: u64,
        output: bool,
        copy: bool,
        actual_size: usize,
    ) -> Result<(), BufError> {
        let index = self
            .find(address, output)
            .ok_or(BufError::UnknownAddress)?;
        let entry = match self.admin[index].take() {
            Some(e) => e,
            None => return Err(BufError::UnknownAddress),
        };

        let mut rc = Ok(());
        if copy && entry.kind.is_output() {
            self.dma.post_dma(entry.handle, 0, entry.buffer_size);

            if let Some(check_ready) = self.callbacks.check_ready {
                rc = self.wait_ready(&entry, check_ready);
            }

            if rc.is_ok() && entry.bounced && !entry.data.is_null() {
                let len = if actual_size == 0 {
                    entry.data_size
                } else {
                    actual_size
                };
                let len = len.min(entry.data_size).min(entry.buffer_size);
                unsafe { ptr::copy_nonoverlapping(entry.buffer.as_ptr(), entry.data, len) };
            }
        }

        self.dma.release(entry.handle);
        rc
    }

    fn wait_ready(
        &mut self,
        entry: &AdminEntry<R::Handle>,
        check_ready: CheckReadyFn,
    ) -> Result<(), BufError> {
        let mut skip = self.config.polling_skip_first_delays;
        let mut loops_left = self.config.polling_max_loops;

        loop {
            if check_ready(entry.buffer(), entry.user_data) {
                return Ok(());
            }

            if skip > 0 {
                skip -= 1;
            } else {
                self.delay.delay_us(self.config.polling_delay_us);
                loops_left = loops_left.saturating_sub(1);
                if loops_left == 0 {
                    warn!("bufmanager: output at {:#x} not ready", entry.bus_address);
                    return Err(BufError::NotReady);
                }
            }

            self.dma.post_dma(entry.handle, 0, entry.buffer_size);
        }
    }

    /// Clear the contents of an output buffer. Unknown addresses are ignored.
    pub fn zeroize(&mut self, address: u64) {
        if let Some(index) = self.find(address, true) {
            if let Some(entry) = self.admin[index].as_mut() {
                entry.buffer_mut().zeroize();
                let (handle, size) = (entry.handle, entry.buffer_size);
                self.dma.pre_dma(handle, 0, size);
            }
        }
    }

    /// Size of the output buffer at `address`, 0 if unknown.
    pub fn get_size(&self, address: u64) -> usize {
        self.find(address, true)
            .and_then(|i| self.admin[i].as_ref())
            .map_or(0, |e| e.buffer_size)
    }

    /// Host side pointer of the (possibly bounced) buffer at `address`.
    pub fn get_host_address(&self, address: u64) -> Option<NonNull<u8>> {
        self.find(address, false)
            .and_then(|i| self.admin[i].as_ref())
            .map(|e| e.buffer)
    }

    pub fn pre_dma_address(&mut self, address: u64) -> Result<(), BufError> {
        let entry = self
            .find(address, false)
            .and_then(|i| self.admin[i])
            .ok_or(BufError::UnknownAddress)?;
        self.dma.pre_dma(entry.handle, 0, entry.buffer_size);
        Ok(())
    }

    /// Take back the buffer whose host side pointer is `buffer`.
    pub fn post_dma_address(&mut self, buffer: NonNull<u8>) {
        let found = self.admin.iter().flatten().find(|e| e.buffer == buffer);
        if let Some(entry) = found {
            let (handle, size) = (entry.handle, entry.buffer_size);
            self.dma.post_dma(handle, 0, size);
        } else {
            debug!("bufmanager: post-DMA on unmapped buffer");
        }
    }
}

#[cfg(feature = "alloc")]
pub use heap::{HeapDma, HeapHandle};

#[cfg(feature = "alloc")]
mod heap {
    use alloc::alloc::{alloc_zeroed, dealloc, Layout};
    use core::ptr::NonNull;

    use super::DmaResource;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeapHandle {
        ptr: NonNull<u8>,
        layout: Option<Layout>,
    }

    /// DMA resource for targets where all RAM is reachable by the HSM. Bounce buffers come from
    /// the global allocator.
    #[derive(Debug, Default)]
    pub struct HeapDma {
        allocations: usize,
    }

    impl HeapDma {
        pub fn new() -> Self {
            Self::default()
        }

        /// Bounce buffers currently allocated.
        pub fn allocations(&self) -> usize {
            self.allocations
        }
    }

    impl DmaResource for HeapDma {
        type Handle = HeapHandle;

        fn check_and_register(&mut self, host: NonNull<u8>, _size: usize) -> Option<HeapHandle> {
            // The DMA engine only does word accesses.
            if host.as_ptr() as usize % 4 != 0 {
                return None;
            }
            Some(HeapHandle {
                ptr: host,
                layout: None,
            })
        }

        fn alloc(&mut self, size: usize, alignment: usize) -> Option<(HeapHandle, NonNull<u8>)> {
            let layout = Layout::from_size_align(size.max(1), alignment).ok()?;
            let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
            self.allocations += 1;
            Some((
                HeapHandle {
                    ptr,
                    layout: Some(layout),
                },
                ptr,
            ))
        }

        fn release(&mut self, handle: HeapHandle) {
            if let Some(layout) = handle.layout {
                unsafe { dealloc(handle.ptr.as_ptr(), layout) };
                self.allocations -= 1;
            }
        }

        fn translate(&self, handle: HeapHandle) -> Option<u64> {
            Some(handle.ptr.as_ptr() as usize as u64)
        }

        fn pre_dma(&mut self, _handle: HeapHandle, _offset: usize, _len: usize) {
            crate::dma_fence();
        }

        fn post_dma(&mut self, _handle: HeapHandle, _offset: usize, _len: usize) {
            crate::dma_fence();
        }
    }
}
