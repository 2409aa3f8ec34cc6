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

//! Services the host provides to a running vcpu.

use axerrno::AxResult;

use crate::context::VCpuContext;
use crate::hsr::ArmExceptionIndex;
use crate::irq::VirtIrq;
use crate::GuestPhysAddr;

/// How the host resolved a stage 2 fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage2Fault {
    /// The address is backed by guest memory and is now mapped; the guest re-executes the
    /// faulting instruction.
    Mapped,
    /// The address belongs to no memory slot and must be emulated as MMIO.
    Mmio,
}

/// The interfaces which the underlying software (kernel or hypervisor) must implement.
pub trait ArmVCpuHal {
    /// Switches to the guest described by `ctx` and runs it until the next trap.
    ///
    /// The implementation loads `ctx.regs`, `ctx.cp15`, `ctx.vttbr` and the virtual interrupt
    /// lines in `ctx.hcr_virt`, delivers `ctx.exception_pending`, and on return has saved the
    /// guest state and latched the syndrome into `ctx.fault`.
    ///
    /// # Returns
    ///
    /// * `ArmExceptionIndex` - The Hyp vector the guest came back through.
    fn enter_guest(&mut self, ctx: &mut VCpuContext) -> ArmExceptionIndex;

    /// Reads the guest instruction at `ctx.regs.pc`.
    ///
    /// Only called for data aborts that carry no valid instruction syndrome.
    fn fetch_instr(&mut self, ctx: &VCpuContext) -> AxResult<u32>;

    /// Resolves a stage 2 fault at `ipa`.
    ///
    /// # Parameters
    ///
    /// * `ipa` - The faulting intermediate physical address.
    /// * `is_write` - Whether the faulting access was a write.
    /// * `is_iabt` - Whether the fault was raised by an instruction fetch.
    fn handle_stage2_fault(
        &mut self,
        ipa: GuestPhysAddr,
        is_write: bool,
        is_iabt: bool,
    ) -> AxResult<Stage2Fault>;

    /// Parks the calling thread while the vcpu waits for an interrupt.
    ///
    /// Must return once `irq.is_runnable()` holds or a signal becomes pending. Spurious returns
    /// are allowed.
    fn block(&mut self, irq: &VirtIrq);

    /// Whether a signal is pending for the controlling process.
    fn signal_pending(&self) -> bool;

    /// Whether the host wants the physical CPU back.
    fn need_resched(&self) -> bool {
        false
    }

    /// Gives up the physical CPU.
    fn yield_now(&mut self) {}
}
