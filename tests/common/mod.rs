#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;

use cc27xx_hsm::bufmanager::{BufManager, DmaResource, HeapDma, HeapHandle};
use cc27xx_hsm::config::{BufManagerConfig, HsmConfig, MemoryMap, VexConfig};
use cc27xx_hsm::hsm::driver::InterruptLine;
use cc27xx_hsm::hsm::regs::*;
use cc27xx_hsm::hsm::{BOOT_TOKEN, SLEEP_TOKEN};
use cc27xx_hsm::token::{CommandToken, ResultToken, COMMAND_WORDS, RESULT_WORDS};
use cc27xx_hsm::vex::{TokenIdCounter, Transport, Vex, VexStatus};

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

pub fn hsm_config() -> HsmConfig {
    HsmConfig {
        boot_delay: 32,
        poll_limit: 32,
        ..Default::default()
    }
}

/// Firmware side of the simulated HSM.
pub struct SimState {
    pub writes: Vec<(Reg, u32)>,
    /// Every token written to mailbox 1, trimmed to the words written.
    pub tokens: Vec<Vec<u32>>,
    /// Answers to full size tokens, in order. A default success token when empty.
    pub replies: VecDeque<ResultToken>,
    /// Keep answers back until [`SimHsm::release`].
    pub hold: bool,
    /// First output word of the boot token answer.
    pub boot_answer: u32,
    pub firmware_running: bool,
    pub fatal: bool,
    /// Raised on every MBXSTAT read.
    pub polling: Option<&'static AtomicBool>,
    /// A held answer is delivered on the first MBXSTAT read after this is raised.
    pub release_when: Option<&'static AtomicBool>,
    values: HashMap<Reg, u32>,
    inbox: [u32; COMMAND_WORDS],
    inbox_len: usize,
    pending: Option<[u32; RESULT_WORDS]>,
    outbox: [u32; RESULT_WORDS],
    out_full: bool,
    clock: bool,
}

impl SimState {
    fn token_in(&mut self) {
        let words = self.inbox[..self.inbox_len].to_vec();
        self.inbox_len = 0;

        let mut answer = [0u32; RESULT_WORDS];
        if words.len() == 2 && words[0] == BOOT_TOKEN[0] {
            answer[0] = self.boot_answer;
            if self.boot_answer & 0x8000_0000 == 0 {
                self.firmware_running = true;
            }
        } else if words.len() == 2 && words[0] == SLEEP_TOKEN[0] {
            answer[0] = 0;
        } else {
            let mut reply = self.replies.pop_front().unwrap_or_default();
            reply.w[0] |= words.first().copied().unwrap_or(0) & 0xFFFF;
            answer = reply.w;
        }

        self.tokens.push(words);
        self.pending = Some(answer);
        if !self.hold {
            self.deliver();
        }
    }

    fn deliver(&mut self) {
        if let Some(answer) = self.pending.take() {
            self.outbox = answer;
            self.out_full = true;
        }
    }

    pub fn boot_tokens(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| t.len() == 2 && t[0] == BOOT_TOKEN[0])
            .count()
    }
}

/// Register block of a simulated HSM. Clones share the same state.
#[derive(Clone)]
pub struct SimHsm(Rc<RefCell<SimState>>);

impl SimHsm {
    pub fn new() -> Self {
        SimHsm(Rc::new(RefCell::new(SimState {
            writes: Vec::new(),
            tokens: Vec::new(),
            replies: VecDeque::new(),
            hold: false,
            boot_answer: 0,
            firmware_running: false,
            fatal: false,
            polling: None,
            release_when: None,
            values: HashMap::new(),
            inbox: [0; COMMAND_WORDS],
            inbox_len: 0,
            pending: None,
            outbox: [0; RESULT_WORDS],
            out_full: false,
            clock: false,
        })))
    }

    pub fn state(&self) -> RefMut<'_, SimState> {
        self.0.borrow_mut()
    }

    pub fn reply(&self, token: ResultToken) {
        self.state().replies.push_back(token);
    }

    /// Hand a held answer to the host.
    pub fn release(&self) {
        let mut s = self.state();
        s.hold = false;
        s.deliver();
    }
}

impl HsmRegisters for SimHsm {
    fn read(&mut self, reg: Reg) -> u32 {
        let mut s = self.0.borrow_mut();
        match reg {
            Reg::MbxStat => {
                if let Some(polling) = s.polling {
                    polling.store(true, Ordering::SeqCst);
                }
                if s.release_when.map_or(false, |f| f.load(Ordering::SeqCst)) {
                    s.hold = false;
                    s.deliver();
                }
                if s.out_full {
                    MBXSTAT_MBX1OUTFULL
                } else {
                    0
                }
            }
            Reg::Mbx1Out(i) => s.outbox.get(i).copied().unwrap_or(0),
            Reg::ClkCfg1 => {
                if s.clock {
                    MemoryMap::default().clkctl_hsm_mask
                } else {
                    0
                }
            }
            Reg::ModuleStatus => {
                let mut status = MODULESTATUS_CRC24OK;
                if s.firmware_running {
                    status |= MODULESTATUS_FWIMGACCEPTED;
                }
                if s.fatal {
                    status |= MODULESTATUS_FATALERROR;
                }
                status
            }
            _ => s.values.get(&reg).copied().unwrap_or(0),
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        let mut s = self.0.borrow_mut();
        s.writes.push((reg, value));
        match reg {
            Reg::Mbx1In(i) => {
                if i < COMMAND_WORDS {
                    s.inbox[i] = value;
                    s.inbox_len = s.inbox_len.max(i + 1);
                }
            }
            Reg::MbxCtrl if value == MBXCTRL_MBX1INFULL => s.token_in(),
            Reg::MbxCtrl if value == MBXCTRL_MBX1OUTEMPTY => s.out_full = false,
            Reg::ClkEnSet1 => s.clock = true,
            Reg::ClkEnClr1 => s.clock = false,
            _ => {
                s.values.insert(reg, value);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct IrqState {
    pub enabled: bool,
    pub clears: usize,
}

#[derive(Clone, Default)]
pub struct MockIrq(pub Rc<RefCell<IrqState>>);

impl InterruptLine for MockIrq {
    fn clear(&mut self) {
        self.0.borrow_mut().clears += 1;
    }

    fn enable(&mut self) {
        self.0.borrow_mut().enabled = true;
    }

    fn disable(&mut self) {
        self.0.borrow_mut().enabled = false;
    }
}

/// What the scripted firmware does with the next token.
pub enum Reply {
    Code(i32),
    Token(ResultToken),
    Fail(VexStatus),
    /// Act on the token, eg. write into its DMA output, and answer.
    With(fn(&CommandToken) -> ResultToken),
}

/// Transport that records the tokens it is given and answers from a script. An empty script
/// answers `ResponseTimeout`.
#[derive(Default)]
pub struct ScriptedTransport {
    pub sent: Vec<CommandToken>,
    pub script: VecDeque<Reply>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Reply>) -> Self {
        Self {
            sent: Vec::new(),
            script: script.into(),
        }
    }
}

impl Transport for ScriptedTransport {
    fn exchange(&mut self, cmd: &CommandToken, result: &mut ResultToken) -> Result<(), VexStatus> {
        self.sent.push(cmd.clone());
        match self.script.pop_front() {
            Some(Reply::Code(code)) => *result = ResultToken::from_code(code),
            Some(Reply::Token(token)) => *result = token,
            Some(Reply::With(firmware)) => *result = firmware(cmd),
            Some(Reply::Fail(e)) => return Err(e),
            None => return Err(VexStatus::ResponseTimeout),
        }
        Ok(())
    }
}

/// Write `data` at a bus address handed out by [`HeapDma`], which is the host address.
///
/// # Safety
///
/// `address` must be a live mapping of at least `offset + data.len()` bytes.
pub unsafe fn dma_write(address: u64, offset: usize, data: &[u8]) {
    let dst = (address as usize as *mut u8).add(offset);
    std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
}

/// Heap DMA that refuses the `fail_at`-th allocation (1 based).
pub struct FailingDma {
    pub inner: HeapDma,
    pub fail_at: usize,
    pub allocs: usize,
}

impl FailingDma {
    pub fn new(fail_at: usize) -> Self {
        Self {
            inner: HeapDma::new(),
            fail_at,
            allocs: 0,
        }
    }
}

impl DmaResource for FailingDma {
    type Handle = HeapHandle;

    fn check_and_register(&mut self, host: NonNull<u8>, size: usize) -> Option<HeapHandle> {
        self.inner.check_and_register(host, size)
    }

    fn alloc(&mut self, size: usize, alignment: usize) -> Option<(HeapHandle, NonNull<u8>)> {
        self.allocs += 1;
        if self.allocs == self.fail_at {
            return None;
        }
        self.inner.alloc(size, alignment)
    }

    fn release(&mut self, handle: HeapHandle) {
        self.inner.release(handle)
    }

    fn translate(&self, handle: HeapHandle) -> Option<u64> {
        self.inner.translate(handle)
    }

    fn pre_dma(&mut self, handle: HeapHandle, offset: usize, len: usize) {
        self.inner.pre_dma(handle, offset, len)
    }

    fn post_dma(&mut self, handle: HeapHandle, offset: usize, len: usize) {
        self.inner.post_dma(handle, offset, len)
    }
}

pub fn buf_config() -> BufManagerConfig {
    BufManagerConfig {
        bounce: true,
        polling_skip_first_delays: 1,
        polling_max_loops: 2,
        polling_delay_us: 1,
    }
}

pub fn vex_with<R: DmaResource>(
    dma: R,
    script: Vec<Reply>,
    config: VexConfig,
) -> Vex<ScriptedTransport, TokenIdCounter, R, NoopDelay> {
    let bufs = BufManager::new(dma, NoopDelay, buf_config());
    match Vex::new(ScriptedTransport::new(script), TokenIdCounter::new(), bufs, config) {
        Ok(vex) => vex,
        Err(e) => panic!("vex setup failed: {:?}", e),
    }
}

/// A dispatcher on heap DMA without token ID checking.
pub fn vex(script: Vec<Reply>) -> Vex<ScriptedTransport, TokenIdCounter, HeapDma, NoopDelay> {
    vex_with(
        HeapDma::new(),
        script,
        VexConfig {
            check_dma_with_token_id: false,
            ..Default::default()
        },
    )
}
