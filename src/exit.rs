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

//! Reasons a vcpu returns control to the host.

use axerrno::{ax_err_type, AxError};

use crate::GuestPhysAddr;

#[allow(unused_imports)] // used in doc
use crate::ArmVCpu;

/// The width of an MMIO access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    Dword,
    /// 64-bit access.
    Qword,
}

impl AccessWidth {
    /// Size of the access in bytes.
    pub const fn size(self) -> usize {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Word => 2,
            AccessWidth::Dword => 4,
            AccessWidth::Qword => 8,
        }
    }

    /// Mask selecting the bits an access of this width carries.
    pub const fn mask(self) -> u64 {
        match self {
            AccessWidth::Qword => u64::MAX,
            _ => (1 << (self.size() * 8)) - 1,
        }
    }
}

impl TryFrom<usize> for AccessWidth {
    type Error = AxError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            1 => Ok(AccessWidth::Byte),
            2 => Ok(AccessWidth::Word),
            4 => Ok(AccessWidth::Dword),
            8 => Ok(AccessWidth::Qword),
            _ => Err(ax_err_type!(InvalidInput, "invalid access width")),
        }
    }
}

/// The result of [`ArmVCpu::run`] and [`ArmVCpu::complete_mmio`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmVCpuExitReason {
    /// The guest performs an MMIO read. Complete it with [`ArmVCpu::complete_mmio`].
    MmioRead {
        /// The physical address of the MMIO read.
        addr: GuestPhysAddr,
        /// The width of the MMIO read.
        width: AccessWidth,
        /// The index of the register to be loaded, as seen from the mode the guest trapped in.
        reg: usize,
        /// Whether the loaded value is sign-extended into the register.
        signed_ext: bool,
    },
    /// The guest performs an MMIO write.
    ///
    /// No data needs to be handed back; the write is completed by [`ArmVCpu::complete_mmio`]
    /// or implicitly by the next [`ArmVCpu::run`].
    MmioWrite {
        /// The physical address of the MMIO write.
        addr: GuestPhysAddr,
        /// The width of the MMIO write.
        width: AccessWidth,
        /// The data to be written.
        data: u64,
    },
    /// A signal is pending for the controlling process; the guest was stopped so that it can
    /// be handled.
    IrqWindowOpen,
}
