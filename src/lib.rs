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

//! arm32_vcpu - Trap-and-emulate core for ARMv7 virtual CPUs.
//!
//! This crate handles everything between two world switches of a guest running under the ARM
//! Virtualization Extensions: it routes the trap by its syndrome, emulates coprocessor
//! accesses, decodes loads and stores that hit MMIO regions, and hands the access to the host.
//! The world switch itself, stage 2 page tables and scheduling are provided by the host through
//! the [`ArmVCpuHal`] trait.
//!
//! # Features
//!
//! - Banked register file with per-mode register resolution
//! - A32 load/store decoding with base writeback and register pairs
//! - CP15 and VFP identification register emulation
//! - Blocking WFI with virtual IRQ/FIQ lines raised from any thread
//! - VMID allocation and VTTBR composition

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate log;

// Core modules
mod config; // Creation and setup parameters
mod context; // Guest state shared with the world switch
mod cp15; // Coprocessor access emulation
mod decode; // Load/store instruction decoder
mod exit; // VM exit reasons reported to the host
mod hal; // Host services the vcpu relies on
mod hsr; // Hyp syndrome register
mod irq; // Virtual interrupt lines
mod mmio; // Guest aborts and MMIO completion
mod regs; // Banked general-purpose registers
mod trace; // Diagnostic trace events
mod vcpu; // Main VCpu implementation and state management
mod vmid; // VMID allocator

memory_addr::def_usize_addr! {
    /// Guest physical address (intermediate physical address, IPA).
    pub type GuestPhysAddr;

    /// Host physical address.
    pub type HostPhysAddr;
}

memory_addr::def_usize_addr_formatter! {
    GuestPhysAddr = "GPA:{}";
    HostPhysAddr = "HPA:{}";
}

// Public API exports
pub use config::{ArmVCpuCreateConfig, ArmVCpuSetupConfig};
pub use context::{PendingExceptions, VCpuContext};
pub use cp15::{emulate_cp10_id, emulate_cp15_access, CoprocAccess, Cp15Regs, VfpIdRegs};
pub use decode::{
    decode_mmio_ls, ls_length, ls_offset, shift_rm, AddrMode, LsInstr, LsPattern, LsWord,
    MmioAccess, ShiftType, LS_DECODE_TABLE, NUM_LOAD_INSTRS,
};
pub use exit::{AccessWidth, ArmVCpuExitReason};
pub use hal::{ArmVCpuHal, Stage2Fault};
pub use hsr::{ArmExceptionIndex, ExceptionClass, FaultInfo, Hsr};
pub use irq::{IrqLine, VirtIrq, VirtIrqMask};
pub use regs::*;
pub use trace::{TraceEvent, TRACE_TARGET};
pub use vcpu::{ArmVCpu, VCpuState, VCpuStats};
pub use vmid::{vttbr, Vmid, VmidAllocator, NUM_VMIDS};
