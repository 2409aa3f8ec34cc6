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

//! Guest aborts on unbacked addresses, and the MMIO exchange with the host that follows.

use axerrno::{ax_err, AxResult};

use crate::context::VCpuContext;
use crate::decode::{decode_mmio_ls, MmioAccess};
use crate::exit::{AccessWidth, ArmVCpuExitReason};
use crate::hal::{ArmVCpuHal, Stage2Fault};
use crate::regs::{CpuMode, VCpuRegs};
use crate::trace::{self, TraceEvent};
use crate::GuestPhysAddr;

/// An MMIO access handed to the host and not completed yet.
///
/// A register pair is moved as two 4-byte accesses, `rt` at `addr` first, then `rt + 1` at
/// `addr + 4`; `half` tells which of them is outstanding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PendingMmio {
    pub access: MmioAccess,
    pub addr: GuestPhysAddr,
    /// Mode the guest trapped in; the destination register is resolved in it.
    pub mode: CpuMode,
    /// Length of the trapped instruction, skipped once the access completes.
    pub instr_len: u32,
    half: u8,
}

impl PendingMmio {
    pub fn new(access: MmioAccess, addr: GuestPhysAddr, mode: CpuMode, instr_len: u32) -> Self {
        Self {
            access,
            addr,
            mode,
            instr_len,
            half: 0,
        }
    }

    pub fn is_write(&self) -> bool {
        self.access.is_write
    }

    fn is_pair(&self) -> bool {
        self.access.len == 8
    }

    fn width(&self) -> AccessWidth {
        // `decode_mmio_ls` and the syndrome path only produce 1, 2, 4 or 8.
        match self.access.len {
            1 => AccessWidth::Byte,
            2 => AccessWidth::Word,
            _ => AccessWidth::Dword,
        }
    }

    fn reg(&self) -> u8 {
        self.access.rt + self.half
    }

    /// The exit describing the outstanding access.
    pub fn exit_reason(&self) -> ArmVCpuExitReason {
        let addr = self.addr + 4 * self.half as usize;
        let width = self.width();
        let reason = if self.access.is_write {
            ArmVCpuExitReason::MmioWrite {
                addr,
                width,
                data: self.access.data[self.half as usize] as u64 & width.mask(),
            }
        } else {
            ArmVCpuExitReason::MmioRead {
                addr,
                width,
                reg: self.reg() as usize,
                signed_ext: self.access.sign_extend,
            }
        };
        trace::emit(TraceEvent::Mmio {
            is_write: self.access.is_write,
            len: width.size(),
            addr,
            data: match reason {
                ArmVCpuExitReason::MmioWrite { data, .. } => data,
                _ => 0,
            },
        });
        reason
    }

    /// Completes the outstanding access with `data`, the value read by the host (ignored for a
    /// write).
    ///
    /// Returns `true` when the whole instruction has completed and the PC has been advanced,
    /// `false` when the second half of a pair is now outstanding.
    pub fn complete(&mut self, regs: &mut VCpuRegs, data: u64) -> bool {
        if !self.access.is_write {
            let width = self.width();
            let mut value = (data & width.mask()) as u32;
            if self.access.sign_extend && width != AccessWidth::Dword {
                let shift = 32 - 8 * width.size() as u32;
                value = (((value << shift) as i32) >> shift) as u32;
            }
            *regs.reg_mut(self.reg(), self.mode) = value;
        }
        if self.is_pair() && self.half == 0 {
            self.half = 1;
            return false;
        }
        regs.advance_pc(self.instr_len);
        true
    }
}

/// Describes the access of a data abort from its instruction syndrome.
fn access_from_syndrome(ctx: &VCpuContext) -> AxResult<MmioAccess> {
    let hsr = ctx.fault.hsr;
    let len = hsr.dabt_access_len();
    if len == 8 {
        return ax_err!(InvalidData, "doubleword access size in a data abort syndrome");
    }
    let rt = hsr.dabt_srt();
    if rt == 15 {
        return ax_err!(Unsupported, "MMIO access with rt=pc in a data abort syndrome");
    }
    let is_write = hsr.dabt_wnr();
    let mut data = [0; 2];
    if is_write {
        data[0] = ctx.regs.reg(rt, ctx.regs.current_mode());
    }
    Ok(MmioAccess {
        op: None,
        is_write,
        len,
        sign_extend: hsr.dabt_sse(),
        rt,
        data,
    })
}

/// Handles a prefetch or data abort routed from the guest.
///
/// Returns `Ok(None)` when the guest can simply resume, and the exit to report when the access
/// has to be emulated by the host. In that case the access is left pending in `ctx`.
pub(crate) fn handle_guest_abort<H: ArmVCpuHal>(
    ctx: &mut VCpuContext,
    hal: &mut H,
    is_iabt: bool,
) -> AxResult<Option<ArmVCpuExitReason>> {
    let hsr = ctx.fault.hsr;
    let ipa = ctx.fault.ipa()?;
    let is_write = !is_iabt && hsr.dabt_wnr();

    match hal.handle_stage2_fault(ipa, is_write, is_iabt)? {
        Stage2Fault::Mapped => return Ok(None),
        Stage2Fault::Mmio => {}
    }

    if is_iabt {
        return ax_err!(
            Unsupported,
            format!("prefetch abort on MMIO address {:?}", ipa)
        );
    }
    if hsr.dabt_s1ptw() {
        return ax_err!(
            Unsupported,
            format!("stage 1 page table walk on MMIO address {:?}", ipa)
        );
    }

    let mode = ctx.regs.current_mode();
    let (access, instr_len) = if hsr.dabt_isv() {
        (access_from_syndrome(ctx)?, hsr.instr_len())
    } else {
        if ctx.regs.is_thumb() {
            return ax_err!(
                Unsupported,
                "Thumb load/store without instruction syndrome"
            );
        }
        let instr = hal.fetch_instr(ctx)?;
        trace::emit(TraceEvent::MmioEmulate {
            instr,
            pc: ctx.regs.pc,
            cpsr: ctx.regs.cpsr,
        });
        (decode_mmio_ls(&mut ctx.regs, instr)?, 4)
    };

    let pending = PendingMmio::new(access, ipa, mode, instr_len);
    let reason = pending.exit_reason();
    debug!("MMIO exit at pc {:#010x}: {:?}", ctx.regs.pc, reason);
    ctx.mmio = Some(pending);
    Ok(Some(reason))
}
