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

//! Diagnostic events keyed by a symbolic activity code.
//!
//! Events only go to the `arm32_vcpu::trace` log target at trace level. Nothing reads them
//! back, so emitting one never changes what the vcpu does.

use crate::irq::IrqLine;
use crate::GuestPhysAddr;

/// Log target of every [`TraceEvent`].
pub const TRACE_TARGET: &str = "arm32_vcpu::trace";

/// A point of interest in the life of a vcpu, logged under [`TRACE_TARGET`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceEvent {
    /// About to enter the guest at `pc`.
    Entry { pc: u32 },
    /// Came back from the guest at `pc`.
    Exit { pc: u32 },
    /// An interrupt line changed level.
    IrqLine { line: IrqLine, level: bool },
    /// A trapped load/store was decoded for MMIO emulation.
    MmioEmulate { instr: u32, pc: u32, cpsr: u32 },
    /// An MMIO access was handed to the host.
    Mmio {
        is_write: bool,
        len: usize,
        addr: GuestPhysAddr,
        data: u64,
    },
    /// Implementation defined CP15 register access.
    Cp15Imp {
        op1: u8,
        rt: u8,
        crn: u8,
        crm: u8,
        op2: u8,
        is_write: bool,
    },
}

impl TraceEvent {
    /// Stable symbolic name of the event.
    pub const fn code(&self) -> &'static str {
        match self {
            TraceEvent::Entry { .. } => "kvm_entry",
            TraceEvent::Exit { .. } => "kvm_exit",
            TraceEvent::IrqLine { .. } => "kvm_irq_line",
            TraceEvent::MmioEmulate { .. } => "kvm_mmio_emulate",
            TraceEvent::Mmio { .. } => "kvm_mmio",
            TraceEvent::Cp15Imp { .. } => "kvm_emulate_cp15_imp",
        }
    }
}

/// Emits `event` under [`TRACE_TARGET`].
pub fn emit(event: TraceEvent) {
    trace!(target: TRACE_TARGET, "{}: {:?}", event.code(), event);
}
