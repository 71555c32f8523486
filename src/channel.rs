// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! DMA channels and their worker threads.
//!
//! Every open memory-mapped channel owns one worker thread. Callers push
//! requests onto the channel's request queue and block on the completion
//! queue; the worker runs each request to completion, fences included. The
//! register window, staging pool and fence buffer live on the worker, so
//! only the two queues are shared.
//!
//! # Lifecycle
//!
//! `Closed -> Opening -> Open -> Closing -> Closed`. Opening allocates the
//! staging pool and fence, registers the channel interrupt and starts the
//! worker, then waits for the worker to report that the dispatcher is reset.
//! Only then does the opener enable the block's interrupts. Any failure
//! stops and joins the worker before unwinding what was set up.

use crate::ase::SpanExpander;
use crate::backoff::Backoff;
use crate::buffer::StagingPool;
use crate::config::DmaConfig;
use crate::device::{ChannelDesc, ChannelType, FpgaHandle};
use crate::error::{DmaError, DmaResult};
use crate::event::InterruptSource;
use crate::fence::WriteFence;
use crate::queue::{CompletionQueue, RequestQueue, WorkItem};
use crate::submit::DescriptorPort;
use crate::transfer::{MmTransfer, TransferRequest};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Operations every channel kind provides.
pub(crate) trait DmaBackend: Sized {
    fn open(desc: ChannelDesc, handle: &FpgaHandle, config: &DmaConfig) -> DmaResult<Self>;
    fn close(&self) -> DmaResult<()>;
    fn transfer_sync(&self, request: TransferRequest) -> DmaResult<usize>;
    fn transfer_async(&self, request: TransferRequest) -> DmaResult<()>;
}

/// State shared by every channel kind.
#[derive(Debug)]
pub(crate) struct ChannelHeader {
    desc: ChannelDesc,
    state: Mutex<ChannelState>,
}

impl ChannelHeader {
    fn new(desc: ChannelDesc) -> Self {
        Self {
            desc,
            state: Mutex::new(ChannelState::Closed),
        }
    }

    pub fn desc(&self) -> &ChannelDesc {
        &self.desc
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn set_state(&self, state: ChannelState) {
        log::trace!("channel {}: {:?}", self.desc.index, state);
        *self.state.lock() = state;
    }

    /// Move from `from` to `to`, failing if the channel is elsewhere.
    fn transition(&self, from: ChannelState, to: ChannelState) -> DmaResult<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(DmaError::InvalidParameter(format!(
                "channel {} is {:?}, expected {:?}",
                self.desc.index, *state, from
            )));
        }
        *state = to;
        Ok(())
    }
}

/// A channel of any supported kind.
pub(crate) enum Channel {
    Mm(MmChannel),
}

impl Channel {
    pub fn header(&self) -> &ChannelHeader {
        match self {
            Channel::Mm(ch) => &ch.header,
        }
    }
}

impl DmaBackend for Channel {
    fn open(desc: ChannelDesc, handle: &FpgaHandle, config: &DmaConfig) -> DmaResult<Self> {
        match desc.channel_type {
            ChannelType::Mm => MmChannel::open(desc, handle, config).map(Channel::Mm),
            other => Err(DmaError::NotSupported(format!(
                "{other} DMA channels (channel {})",
                desc.index
            ))),
        }
    }

    fn close(&self) -> DmaResult<()> {
        match self {
            Channel::Mm(ch) => ch.close(),
        }
    }

    fn transfer_sync(&self, request: TransferRequest) -> DmaResult<usize> {
        match self {
            Channel::Mm(ch) => ch.transfer_sync(request),
        }
    }

    fn transfer_async(&self, request: TransferRequest) -> DmaResult<()> {
        match self {
            Channel::Mm(ch) => ch.transfer_async(request),
        }
    }
}

type Completions = CompletionQueue<DmaResult<usize>>;

/// Memory-mapped channel served by a worker thread.
pub(crate) struct MmChannel {
    header: ChannelHeader,
    requests: Arc<RequestQueue<TransferRequest>>,
    completions: Arc<Completions>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    /// Opener-side control registers, used at teardown.
    control: DescriptorPort,
    interrupts: Arc<dyn InterruptSource>,
}

impl MmChannel {
    fn vector(&self) -> u32 {
        self.header.desc.index as u32
    }
}

/// Body of a channel worker thread.
fn worker_main(
    mut mm: MmTransfer,
    reset: Backoff,
    ready: SyncSender<DmaResult<()>>,
    requests: Arc<RequestQueue<TransferRequest>>,
    completions: Arc<Completions>,
) {
    let init = mm.port().reset(&reset);
    let failed = init.is_err();
    if ready.send(init).is_err() || failed {
        return;
    }

    loop {
        match requests.pop() {
            WorkItem::Terminate => break,
            WorkItem::Job { id, payload } => {
                // SAFETY: the submitter blocks on this job's completion, so
                // the host memory it references outlives `execute`
                let result = catch_unwind(AssertUnwindSafe(|| unsafe { mm.execute(&payload) }))
                    .unwrap_or_else(|_| {
                        Err(DmaError::Exception("channel worker panicked".into()))
                    });
                if let Err(e) = &result {
                    log::error!("{} transfer {} failed: {}", payload.direction(), id, e);
                }
                completions.post(id, result);
            }
        }
    }
    log::debug!("channel worker exiting");
}

/// Ask a worker to exit and wait for it.
fn stop_worker(
    index: usize,
    requests: &RequestQueue<TransferRequest>,
    worker: JoinHandle<()>,
) {
    if let Err(e) = requests.terminate() {
        log::warn!("channel {index}: stop worker: {e}");
    }
    if worker.join().is_err() {
        log::warn!("channel {index}: worker panicked during start-up");
    }
}

impl DmaBackend for MmChannel {
    fn open(desc: ChannelDesc, handle: &FpgaHandle, config: &DmaConfig) -> DmaResult<Self> {
        let header = ChannelHeader::new(desc);
        header.set_state(ChannelState::Opening);
        let vector = desc.index as u32;
        let mmio = handle.mmio().clone();

        let pool = StagingPool::allocate(
            handle.allocator(),
            config.staging_buffers(),
            config.staging_buffer_size(),
        )?;

        let irq = handle.interrupts().register(vector)?;
        let irq_guard = scopeguard::guard(handle.interrupts().clone(), move |src| {
            if let Err(e) = src.unregister(vector) {
                log::warn!("rollback: unregister vector {vector}: {e}");
            }
        });
        let fence = WriteFence::new(
            handle.allocator(),
            irq,
            config.irq_timeout(),
            config.fence_backoff(),
        )?;

        let control = DescriptorPort::new(mmio.clone(), desc.base, config.fifo_backoff());
        let irq_en_guard = scopeguard::guard(&control, |control| {
            if let Err(e) = control.set_global_irq(false) {
                log::warn!("rollback: disable interrupts: {e}");
            }
        });

        let mm = MmTransfer::new(
            DescriptorPort::new(mmio.clone(), desc.base, config.fifo_backoff()),
            SpanExpander::new(mmio, desc.base),
            fence,
            pool,
        );
        let requests = Arc::new(RequestQueue::new());
        let completions = Arc::new(CompletionQueue::new());
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let worker = thread::Builder::new()
            .name(format!("fpga-dma-mm{}", desc.index))
            .spawn({
                let requests = Arc::clone(&requests);
                let completions = Arc::clone(&completions);
                let reset = config.reset_backoff();
                move || worker_main(mm, reset, ready_tx, requests, completions)
            })
            .map_err(|e| DmaError::Exception(format!("spawn channel worker: {e}")))?;

        let started = match ready_rx.recv_timeout(config.readiness_timeout()) {
            Ok(Ok(())) => control.set_global_irq(true),
            Ok(Err(e)) => Err(match e {
                DmaError::Timeout { .. } => DmaError::Exception(e.to_string()),
                other => other,
            }),
            Err(RecvTimeoutError::Timeout) => Err(DmaError::Exception(format!(
                "channel {} worker not ready within {:?}",
                desc.index,
                config.readiness_timeout()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(DmaError::Exception(format!(
                "channel {} worker exited during start-up",
                desc.index
            ))),
        };
        if let Err(e) = started {
            // The worker owns the pool and fence; it must be gone before the
            // guards disable interrupts and release the vector.
            stop_worker(desc.index, &requests, worker);
            return Err(e);
        }

        scopeguard::ScopeGuard::into_inner(irq_en_guard);
        let interrupts = scopeguard::ScopeGuard::into_inner(irq_guard);
        header.set_state(ChannelState::Open);
        log::info!("opened mm channel {} at {:#x}", desc.index, desc.base);

        Ok(Self {
            header,
            requests,
            completions,
            worker: Mutex::new(Some(worker)),
            next_id: AtomicU64::new(0),
            control,
            interrupts,
        })
    }

    fn close(&self) -> DmaResult<()> {
        self.header
            .transition(ChannelState::Open, ChannelState::Closing)?;
        let mut first_err: Option<DmaError> = None;

        if let Err(e) = self.requests.terminate() {
            first_err.get_or_insert(e);
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                first_err.get_or_insert(DmaError::Exception("channel worker panicked".into()));
            }
        }
        if let Err(e) = self.control.set_global_irq(false) {
            log::warn!("channel {}: disable interrupts: {e}", self.header.desc.index);
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.interrupts.unregister(self.vector()) {
            log::warn!("channel {}: unregister interrupt: {e}", self.header.desc.index);
            first_err.get_or_insert(e);
        }

        self.header.set_state(ChannelState::Closed);
        log::info!("closed mm channel {}", self.header.desc.index);
        first_err.map_or(Ok(()), Err)
    }

    fn transfer_sync(&self, request: TransferRequest) -> DmaResult<usize> {
        if self.header.state() != ChannelState::Open {
            return Err(DmaError::InvalidParameter(format!(
                "channel {} is not open",
                self.header.desc.index
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.requests.push(id, request)?;
        self.completions.wait_for(id)
    }

    fn transfer_async(&self, _request: TransferRequest) -> DmaResult<()> {
        Err(DmaError::NotSupported(
            "asynchronous transfers are not implemented".into(),
        ))
    }
}
