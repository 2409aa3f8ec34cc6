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

//! Parameters for creating and setting up a vcpu.

use crate::cp15::VfpIdRegs;

/// Configuration for creating an [`ArmVCpu`](crate::ArmVCpu).
#[derive(Clone, Debug, Default)]
pub struct ArmVCpuCreateConfig {
    /// CPSR of the host; only the E bit is inherited by the guest.
    pub host_cpsr: u32,
    /// SCTLR of the host, inherited by the guest with the MMU turned off.
    pub host_sctlr: u32,
    /// Values reported for trapped VMRS reads of the VFP identification registers.
    pub id_regs: VfpIdRegs,
    /// Inject an undefined instruction exception into the guest when a trapped instruction
    /// cannot be emulated, instead of returning the error from `run`.
    pub undef_on_unsupported: bool,
}

/// Configuration for setting up an [`ArmVCpu`](crate::ArmVCpu) before its first run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArmVCpuSetupConfig {
    /// Guest address of the first instruction.
    pub entry: u32,
    /// Stage 2 translation table base, see [`vttbr`](crate::vttbr).
    pub vttbr: u64,
}
