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

//! Per-vcpu guest state shared with the world switch.

use bitflags::bitflags;

use crate::config::ArmVCpuCreateConfig;
use crate::cp15::{Cp15Regs, VfpIdRegs};
use crate::hsr::FaultInfo;
use crate::irq::VirtIrqMask;
use crate::mmio::PendingMmio;
use crate::regs::{CpuMode, VCpuRegs, PSR_A_BIT, PSR_E_BIT, PSR_F_BIT, PSR_I_BIT};

/// SCTLR.M, the stage 1 MMU enable.
const SCTLR_M: u32 = 1 << 0;

bitflags! {
    /// Exceptions the world switch must deliver to the guest on its next entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PendingExceptions: u32 {
        const RESET = 0x80;
        const UNDEFINED = 0x40;
        const SOFTWARE = 0x20;
        const PREFETCH = 0x10;
        const DATA = 0x08;
        const IMPRECISE = 0x04;
        const IRQ = 0x02;
        const FIQ = 0x01;
    }
}

impl Default for PendingExceptions {
    fn default() -> Self {
        Self::empty()
    }
}

/// Everything the world switch and the emulation code share about one virtual CPU.
#[derive(Clone, Debug, Default)]
pub struct VCpuContext {
    /// General-purpose registers, PC and CPSR.
    pub regs: VCpuRegs,
    /// Emulated system control coprocessor state.
    pub cp15: Cp15Regs,
    /// Values returned for trapped VFP identification register reads.
    pub id_regs: VfpIdRegs,
    /// Syndrome and fault addresses of the last trap.
    pub fault: FaultInfo,
    /// Exceptions to raise in the guest after emulation.
    pub exception_pending: PendingExceptions,
    /// Virtual interrupt lines to assert (HCR.VI / HCR.VF) on the next entry.
    pub hcr_virt: VirtIrqMask,
    /// Stage 2 translation table base, including the VMID.
    pub vttbr: u64,
    /// The MMIO access waiting for the host to complete it.
    pub(crate) mmio: Option<PendingMmio>,
}

impl VCpuContext {
    /// Builds the reset state: supervisor mode with every asynchronous exception masked and the
    /// host's data endianness, and the host SCTLR with the MMU turned off.
    pub fn new(config: &ArmVCpuCreateConfig) -> Self {
        let mut ctx = Self::default();
        ctx.regs.cpsr = CpuMode::Svc.psr_bits()
            | PSR_I_BIT
            | PSR_F_BIT
            | PSR_A_BIT
            | (config.host_cpsr & PSR_E_BIT);
        ctx.cp15.c1_sctlr = config.host_sctlr & !SCTLR_M;
        ctx.id_regs = config.id_regs;
        ctx
    }

    /// Whether an MMIO access is waiting for completion.
    pub fn mmio_pending(&self) -> bool {
        self.mmio.is_some()
    }
}
