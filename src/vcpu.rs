// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use alloc::sync::Arc;
use core::cell::{RefCell, UnsafeCell};

use axerrno::{ax_err, AxError, AxResult};

use crate::config::{ArmVCpuCreateConfig, ArmVCpuSetupConfig};
use crate::context::{PendingExceptions, VCpuContext};
use crate::cp15::{emulate_cp10_id, emulate_cp15_access};
use crate::exit::ArmVCpuExitReason;
use crate::hal::ArmVCpuHal;
use crate::hsr::{ArmExceptionIndex, ExceptionClass};
use crate::irq::VirtIrq;
use crate::mmio::handle_guest_abort;
use crate::trace::{self, TraceEvent};

/// The constant part of `ArmVCpu`.
struct ArmVCpuInnerConst {
    /// The id of the vcpu.
    id: usize,
    /// Inject an undefined instruction instead of failing `run` when emulation fails.
    undef_on_unsupported: bool,
}

/// The state of a virtual CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VCpuState {
    /// An invalid state.
    Invalid = 0,
    /// The vcpu is created but not set up yet.
    Created = 1,
    /// The vcpu is set up and can be run.
    Ready = 2,
    /// The guest is executing.
    Running = 3,
    /// The guest trapped and the exit is being handled.
    Trapped = 4,
    /// An MMIO access was reported and waits for [`ArmVCpu::complete_mmio`].
    MmioPending = 5,
    /// The guest waits for an interrupt.
    Blocked = 6,
}

/// Exit counters of one vcpu.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VCpuStats {
    /// Traps taken from the guest.
    pub exits: u64,
    /// MMIO accesses reported to the host.
    pub mmio_exits: u64,
    /// Trapped WFI and WFE instructions.
    pub wfi_exits: u64,
    /// Trapped CP15 accesses.
    pub cp15_exits: u64,
    /// Runs ended by a pending signal.
    pub signal_exits: u64,
    /// Wake-ups from a wait for interrupts.
    pub halt_wakeups: u64,
}

/// The mutable part of [`ArmVCpu`].
struct ArmVCpuInnerMut {
    /// The state of the vcpu.
    state: VCpuState,
    stats: VCpuStats,
}

/// What the run loop does after an exit has been handled.
enum ExitAction {
    /// Re-enter the guest.
    Resume,
    /// Return to the caller.
    Exit(ArmVCpuExitReason),
}

/// An ARMv7 virtual CPU.
///
/// Traps are handled in place whenever possible: coprocessor accesses, wait for interrupts and
/// identification register reads never leave [`ArmVCpu::run`]. Only MMIO accesses and pending
/// signals are reported to the caller.
///
/// Note that:
/// - This struct handles internal mutability itself, almost all the methods are `&self`.
/// - This struct is not thread-safe. Only the handle returned by [`ArmVCpu::irq_handle`] may be
///   used from other threads.
pub struct ArmVCpu<H: ArmVCpuHal> {
    /// The constant part of the vcpu.
    inner_const: ArmVCpuInnerConst,
    /// The mutable part of the vcpu.
    inner_mut: RefCell<ArmVCpuInnerMut>,
    /// The guest state.
    ///
    /// `UnsafeCell` is used to allow interior mutability. `RefCell` is not suitable here because
    /// the borrow would have to be held across the world switch.
    ctx: UnsafeCell<VCpuContext>,
    /// The host services.
    hal: UnsafeCell<H>,
    /// Virtual interrupt lines, shared with the raisers.
    irq: Arc<VirtIrq>,
}

impl<H: ArmVCpuHal> ArmVCpu<H> {
    /// Create a new [`ArmVCpu`] in its reset state.
    pub fn new(id: usize, config: ArmVCpuCreateConfig, hal: H) -> Self {
        Self {
            inner_const: ArmVCpuInnerConst {
                id,
                undef_on_unsupported: config.undef_on_unsupported,
            },
            inner_mut: RefCell::new(ArmVCpuInnerMut {
                state: VCpuState::Created,
                stats: VCpuStats::default(),
            }),
            ctx: UnsafeCell::new(VCpuContext::new(&config)),
            hal: UnsafeCell::new(hal),
            irq: Arc::new(VirtIrq::new()),
        }
    }

    /// Setup the vcpu.
    pub fn setup(&self, config: ArmVCpuSetupConfig) -> AxResult {
        self.with_state_transition(VCpuState::Created, VCpuState::Ready, || {
            if (config.vttbr >> 48) & 0xff == 0 {
                return ax_err!(InvalidInput, "VTTBR carries the host VMID");
            }
            let ctx = self.context_mut();
            ctx.regs.pc = config.entry;
            ctx.vttbr = config.vttbr;
            Ok(())
        })
    }

    /// Get the id of the vcpu.
    pub const fn id(&self) -> usize {
        self.inner_const.id
    }

    /// Get whether the vcpu is the BSP. We always assume the first vcpu (vcpu with id #0) is the BSP.
    pub const fn is_bsp(&self) -> bool {
        self.inner_const.id == 0
    }

    /// Get the state of the vcpu.
    pub fn state(&self) -> VCpuState {
        self.inner_mut.borrow().state
    }

    fn set_state(&self, state: VCpuState) {
        self.inner_mut.borrow_mut().state = state;
    }

    /// Get the exit counters of the vcpu.
    pub fn stats(&self) -> VCpuStats {
        self.inner_mut.borrow().stats
    }

    fn count(&self, f: impl FnOnce(&mut VCpuStats)) {
        f(&mut self.inner_mut.borrow_mut().stats);
    }

    /// Execute a block with the state of the vcpu transitioned from `from` to `to`. If the current state is not `from`, return an error.
    ///
    /// The state will be set to [`VCpuState::Invalid`] if an error occurs (including the case that the current state is not `from`).
    ///
    /// The state will be set to `to` if the block is executed successfully.
    pub fn with_state_transition<F, T>(&self, from: VCpuState, to: VCpuState, f: F) -> AxResult<T>
    where
        F: FnOnce() -> AxResult<T>,
    {
        let mut inner_mut = self.inner_mut.borrow_mut();
        if inner_mut.state != from {
            inner_mut.state = VCpuState::Invalid;
            ax_err!(
                BadState,
                format!("VCpu state is not {:?}, but {:?}", from, inner_mut.state)
            )
        } else {
            let result = f();
            inner_mut.state = if result.is_err() {
                VCpuState::Invalid
            } else {
                to
            };
            result
        }
    }

    /// Transition the state of the vcpu. If the current state is not `from`, return an error.
    pub fn transition_state(&self, from: VCpuState, to: VCpuState) -> AxResult {
        self.with_state_transition(from, to, || Ok(()))
    }

    /// Get the guest state.
    pub fn context(&self) -> &VCpuContext {
        unsafe { &*self.ctx.get() }
    }

    /// Get the guest state for modification.
    #[allow(clippy::mut_from_ref)]
    pub fn context_mut(&self) -> &mut VCpuContext {
        unsafe { &mut *self.ctx.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn hal(&self) -> &mut H {
        unsafe { &mut *self.hal.get() }
    }

    /// Get the interrupt lines of the vcpu. The handle may be sent to other threads.
    pub fn irq_handle(&self) -> Arc<VirtIrq> {
        self.irq.clone()
    }

    /// Run the vcpu until an exit the caller has to handle.
    ///
    /// A pending MMIO write is completed first. A pending MMIO read must be completed with
    /// [`ArmVCpu::complete_mmio`] before running again.
    pub fn run(&self) -> AxResult<ArmVCpuExitReason> {
        if self.state() == VCpuState::MmioPending {
            let is_write = self
                .context()
                .mmio
                .as_ref()
                .is_some_and(|pending| pending.is_write());
            if !is_write {
                return ax_err!(BadState, "MMIO read is waiting for its data");
            }
            if let Some(reason) = self.complete_mmio(0)? {
                return Ok(reason);
            }
        }
        self.transition_state(VCpuState::Ready, VCpuState::Running)?;

        loop {
            if !self.irq.is_runnable() {
                self.set_state(VCpuState::Blocked);
                self.hal().block(&self.irq);
                self.set_state(VCpuState::Running);
                if self.irq.is_runnable() {
                    self.count(|s| s.halt_wakeups += 1);
                }
            }

            if self.hal().signal_pending() {
                self.count(|s| s.signal_exits += 1);
                self.set_state(VCpuState::Ready);
                return Ok(ArmVCpuExitReason::IrqWindowOpen);
            }

            if !self.irq.is_runnable() {
                continue;
            }

            let ctx = self.context_mut();
            ctx.hcr_virt = self.irq.hcr_bits();
            trace::emit(TraceEvent::Entry { pc: ctx.regs.pc });
            let index = self.hal().enter_guest(ctx);
            ctx.exception_pending = PendingExceptions::empty();
            self.set_state(VCpuState::Trapped);
            self.count(|s| s.exits += 1);
            trace::emit(TraceEvent::Exit { pc: ctx.regs.pc });

            match self.handle_exit(index) {
                Ok(ExitAction::Resume) => {}
                Ok(ExitAction::Exit(reason)) => {
                    self.count(|s| s.mmio_exits += 1);
                    self.set_state(VCpuState::MmioPending);
                    return Ok(reason);
                }
                Err(err) => {
                    self.set_state(VCpuState::Ready);
                    return Err(err);
                }
            }
            self.set_state(VCpuState::Running);

            if self.hal().need_resched() {
                self.hal().yield_now();
            }
        }
    }

    /// Complete the outstanding MMIO access with `data`, the value read by the host (ignored
    /// for a write).
    ///
    /// Returns the exit for the second half of a register pair if there is one; the access is
    /// then still pending. Otherwise the trapped instruction has completed and the vcpu is
    /// ready to run.
    pub fn complete_mmio(&self, data: u64) -> AxResult<Option<ArmVCpuExitReason>> {
        if self.state() != VCpuState::MmioPending {
            return ax_err!(
                BadState,
                format!("VCpu state is not MmioPending, but {:?}", self.state())
            );
        }
        let ctx = self.context_mut();
        let Some(pending) = ctx.mmio.as_mut() else {
            return ax_err!(BadState, "no MMIO access is pending");
        };
        if pending.complete(&mut ctx.regs, data) {
            ctx.mmio = None;
            self.set_state(VCpuState::Ready);
            Ok(None)
        } else {
            self.count(|s| s.mmio_exits += 1);
            Ok(Some(pending.exit_reason()))
        }
    }

    fn handle_exit(&self, index: ArmExceptionIndex) -> AxResult<ExitAction> {
        match index {
            ArmExceptionIndex::Irq => Ok(ExitAction::Resume),
            ArmExceptionIndex::Hvc => self.handle_hyp_trap(),
            other => ax_err!(
                Unsupported,
                format!("unsupported exception index {:?}", other)
            ),
        }
    }

    fn handle_hyp_trap(&self) -> AxResult<ExitAction> {
        let ctx = self.context_mut();
        let hsr = ctx.fault.hsr;
        let Some(ec) = hsr.exception_class() else {
            panic!("unknown exception class {:#04x}, {:?}", hsr.ec(), hsr);
        };
        let result = match ec {
            ExceptionClass::Wfi => {
                self.count(|s| s.wfi_exits += 1);
                ctx.regs.advance_pc(hsr.instr_len());
                if !hsr.wfx_is_wfe() && self.irq.hcr_bits().is_empty() {
                    self.irq.start_waiting();
                }
                Ok(None)
            }
            ExceptionClass::Cp15_32 | ExceptionClass::Cp15_64 => {
                self.count(|s| s.cp15_exits += 1);
                emulate_cp15_access(ctx).map(|_| None)
            }
            ExceptionClass::Cp14Mr | ExceptionClass::Cp14_64 => {
                ax_err!(Unsupported, "CP14 register access")
            }
            ExceptionClass::Cp14Ls => ax_err!(Unsupported, "CP14 load/store"),
            ExceptionClass::Cp0To13 => ax_err!(Unsupported, "CP0-CP13 access"),
            ExceptionClass::Cp10Id => emulate_cp10_id(ctx).map(|_| None),
            ExceptionClass::Hvc => {
                info!(
                    "hvc: {:#x} (at {:#010x}), {:?}",
                    hsr.hvc_imm(),
                    ctx.regs.pc,
                    hsr
                );
                Ok(None)
            }
            ExceptionClass::Iabt => handle_guest_abort(ctx, self.hal(), true),
            ExceptionClass::Dabt => handle_guest_abort(ctx, self.hal(), false),
            ExceptionClass::SvcHyp => panic!("SVC taken in Hyp mode reached the exit handler"),
            ExceptionClass::IabtHyp | ExceptionClass::DabtHyp => {
                panic!("the hypervisor itself caused an abort: {:?}", hsr)
            }
        };

        match result {
            Ok(Some(reason)) => Ok(ExitAction::Exit(reason)),
            Ok(None) => Ok(ExitAction::Resume),
            Err(err) => self.emulation_failed(err),
        }
    }

    /// Applies the undefined instruction policy to a failed emulation.
    fn emulation_failed(&self, err: AxError) -> AxResult<ExitAction> {
        let recoverable = matches!(err, AxError::Unsupported | AxError::InvalidData);
        if recoverable && self.inner_const.undef_on_unsupported {
            let ctx = self.context_mut();
            warn!(
                "vcpu {}: injecting undefined instruction at {:#010x} ({:?})",
                self.id(),
                ctx.regs.pc,
                err
            );
            ctx.exception_pending |= PendingExceptions::UNDEFINED;
            Ok(ExitAction::Resume)
        } else {
            Err(err)
        }
    }
}
