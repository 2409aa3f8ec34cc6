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

//! Emulation of trapped coprocessor register accesses.

use core::fmt;

use axerrno::{ax_err, AxResult};

use crate::context::VCpuContext;
use crate::hsr::{ExceptionClass, Hsr};
use crate::regs::{CpuMode, VCpuRegs};
use crate::trace::{self, TraceEvent};

/// The emulated part of the system control coprocessor (CP15).
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cp15Regs {
    /// System Control Register.
    pub c1_sctlr: u32,
    /// Auxiliary Control Register.
    pub c1_actlr: u32,
    /// Coprocessor Access Control Register.
    pub c1_cpacr: u32,
    /// Translation Table Base Register 0.
    pub c2_ttbr0: u64,
    /// Translation Table Base Register 1.
    pub c2_ttbr1: u64,
    /// Translation Table Base Control Register.
    pub c2_ttbcr: u32,
    /// Domain Access Control Register.
    pub c3_dacr: u32,
    /// Data Fault Status Register.
    pub c5_dfsr: u32,
    /// Primary Region Remap Register.
    pub c10_prrr: u32,
    /// Normal Memory Remap Register.
    pub c10_nmrr: u32,
}

/// VFP identification registers reported to the guest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VfpIdRegs {
    /// Floating-point System ID Register.
    pub fpsid: u32,
    /// Media and VFP Feature Register 0.
    pub mvfr0: u32,
    /// Media and VFP Feature Register 1.
    pub mvfr1: u32,
}

/// Operands of a trapped MCR/MRC or MCRR/MRRC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoprocAccess {
    /// CRm, the secondary register.
    pub crm: u8,
    /// CRn, the primary register; 0 for a 64-bit transfer.
    pub crn: u8,
    /// Opc1.
    pub op1: u8,
    /// Opc2; 0 for a 64-bit transfer.
    pub op2: u8,
    /// The general-purpose register transferred.
    pub rt1: u8,
    /// The second register of a 64-bit transfer.
    pub rt2: u8,
    /// MCRR/MRRC rather than MCR/MRC.
    pub is_64bit: bool,
    /// The guest writes the coprocessor register (MCR/MCRR).
    pub is_write: bool,
}

impl CoprocAccess {
    /// Extracts the access from a CP15/CP14/CP10 syndrome.
    pub fn from_hsr(hsr: Hsr) -> Self {
        let is_64bit = matches!(
            hsr.exception_class(),
            Some(ExceptionClass::Cp15_64 | ExceptionClass::Cp14_64)
        );
        let (crn, op1, op2, rt2) = if is_64bit {
            (0, hsr.cp64_opc1(), 0, hsr.cp64_rt2())
        } else {
            (hsr.cp_crn(), hsr.cp_opc1(), hsr.cp_opc2(), 0)
        };
        Self {
            crm: hsr.cp_crm(),
            crn,
            op1,
            op2,
            rt1: hsr.cp_rt(),
            rt2,
            is_64bit,
            is_write: !hsr.cp_is_read(),
        }
    }

    /// Moves a value between `rt1` and an emulated register, in the direction of the access.
    fn transfer(&self, regs: &mut VCpuRegs, mode: CpuMode, target: &mut u32) {
        if self.is_write {
            *target = regs.reg(self.rt1, mode);
        } else {
            *regs.reg_mut(self.rt1, mode) = *target;
        }
    }
}

impl fmt::Display for CoprocAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_64bit {
            write!(
                f,
                "{}\tp15, {}, r{}, r{}, c{}",
                if self.is_write { "mcrr" } else { "mrrc" },
                self.op1,
                self.rt1,
                self.rt2,
                self.crm
            )
        } else {
            write!(
                f,
                "{}\tp15, {}, r{}, c{}, c{}, {}",
                if self.is_write { "mcr" } else { "mrc" },
                self.op1,
                self.rt1,
                self.crn,
                self.crm,
                self.op2
            )
        }
    }
}

/// CRn == 10: TLB lockdown and memory remap.
///
/// Lockdown is meaningless to a guest whose TLB entries are tagged by VMID, so those
/// operations are accepted and dropped. PRRR and NMRR are backed by [`Cp15Regs`].
fn emulate_c10(regs: &mut VCpuRegs, cp15: &mut Cp15Regs, p: &CoprocAccess) -> AxResult {
    let mode = regs.current_mode();
    match (p.crm, p.op2) {
        (0 | 1 | 4 | 8, 0..=7) => Ok(()),
        (2, 0) => {
            p.transfer(regs, mode, &mut cp15.c10_prrr);
            Ok(())
        }
        (2, 1) => {
            p.transfer(regs, mode, &mut cp15.c10_nmrr);
            Ok(())
        }
        _ => ax_err!(Unsupported, format!("c10 access {}", p)),
    }
}

/// CRn == 15: implementation defined. Writes are dropped and reads return zero, so nothing of
/// the host leaks through.
fn emulate_c15(regs: &mut VCpuRegs, p: &CoprocAccess) -> AxResult {
    trace::emit(TraceEvent::Cp15Imp {
        op1: p.op1,
        rt: p.rt1,
        crn: p.crn,
        crm: p.crm,
        op2: p.op2,
        is_write: p.is_write,
    });
    if !p.is_write {
        let mode = regs.current_mode();
        *regs.reg_mut(p.rt1, mode) = 0;
    }
    Ok(())
}

fn dispatch_cp15(ctx: &mut VCpuContext, p: &CoprocAccess) -> AxResult {
    if p.is_64bit {
        return ax_err!(Unsupported, "64-bit CP15 transfers are not emulated");
    }
    if p.rt1 == 15 {
        return ax_err!(Unsupported, "CP15 transfer to APSR_nzcv");
    }
    match p.crn {
        10 => emulate_c10(&mut ctx.regs, &mut ctx.cp15, p),
        15 => emulate_c15(&mut ctx.regs, p),
        _ => ax_err!(Unsupported, format!("CP15 c{} is not emulated", p.crn)),
    }
}

/// Emulates the trapped CP15 access described by `ctx.fault.hsr`.
///
/// On success the guest PC is moved past the instruction. On failure the guest state is left
/// untouched, so the caller may report the error or inject an undefined instruction.
pub fn emulate_cp15_access(ctx: &mut VCpuContext) -> AxResult {
    let hsr = ctx.fault.hsr;
    let params = CoprocAccess::from_hsr(hsr);
    if let Err(err) = dispatch_cp15(ctx, &params) {
        warn!("Unsupported guest CP15 access at: {:#010x}", ctx.regs.pc);
        warn!("    {}", params);
        return Err(err);
    }
    ctx.regs.advance_pc(hsr.instr_len());
    Ok(())
}

/// Emulates a trapped VMRS read of FPSID, MVFR0 or MVFR1.
pub fn emulate_cp10_id(ctx: &mut VCpuContext) -> AxResult {
    let hsr = ctx.fault.hsr;
    let p = CoprocAccess::from_hsr(hsr);
    if p.is_write || p.rt1 == 15 {
        return ax_err!(Unsupported, format!("CP10 ID access {}", p));
    }
    let value = match p.crn {
        0 => ctx.id_regs.fpsid,
        6 => ctx.id_regs.mvfr1,
        7 => ctx.id_regs.mvfr0,
        reg => return ax_err!(Unsupported, format!("CP10 ID register {}", reg)),
    };
    let mode = ctx.regs.current_mode();
    *ctx.regs.reg_mut(p.rt1, mode) = value;
    ctx.regs.advance_pc(hsr.instr_len());
    Ok(())
}
