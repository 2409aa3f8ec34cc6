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

//! Decoder for the ARM load/store instructions that can fault on an MMIO region.
//!
//! Only the A32 encodings are handled. Anything that does not match [`LS_DECODE_TABLE`], or that
//! would need semantics a device access cannot provide (exclusives, loads into the PC), is
//! refused with [`AxError::Unsupported`](axerrno::AxError::Unsupported).

use axerrno::{ax_err, AxResult};

use crate::regs::{CpuMode, VCpuRegs};

/// A supported load/store instruction.
///
/// Loads are declared before stores, so the discriminant alone tells the direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LsInstr {
    Ldrbt,
    Ldrt,
    Ldr,
    Ldrb,
    Ldrd,
    Ldrex,
    Ldrh,
    Ldrsb,
    Ldrsh,
    Strbt,
    Strt,
    Str,
    Strb,
    Strd,
    Strex,
    Strh,
}

/// Number of load variants at the head of [`LsInstr`].
pub const NUM_LOAD_INSTRS: usize = 9;

/// One entry of the decode table: `instr` is `op` when `instr & mask == pattern & mask`.
#[derive(Clone, Copy, Debug)]
pub struct LsPattern {
    /// The instruction this entry identifies.
    pub op: LsInstr,
    /// Value of the fixed bits.
    pub pattern: u32,
    /// Which bits are fixed.
    pub mask: u32,
}

const fn ls(op: LsInstr, pattern: u32, mask: u32) -> LsPattern {
    LsPattern { op, pattern, mask }
}

/// The decode table, evaluated first match wins in this order.
///
/// Some later entries are supersets of earlier ones (`LDRB` covers `LDRBT`), so the order is
/// part of the contract.
pub static LS_DECODE_TABLE: [LsPattern; 16] = [
    ls(LsInstr::Ldrbt, 0x0470_0000, 0x0d70_0000),
    ls(LsInstr::Ldrt, 0x0430_0000, 0x0d70_0000),
    ls(LsInstr::Ldr, 0x0410_0000, 0x0c50_0000),
    ls(LsInstr::Ldrb, 0x0450_0000, 0x0c50_0000),
    ls(LsInstr::Ldrd, 0x0000_00d0, 0x0e10_00f0),
    ls(LsInstr::Ldrex, 0x0190_0090, 0x0ff0_00f0),
    ls(LsInstr::Ldrh, 0x0010_00b0, 0x0e10_00f0),
    ls(LsInstr::Ldrsb, 0x0010_00d0, 0x0e10_00f0),
    ls(LsInstr::Ldrsh, 0x0010_00f0, 0x0e10_00f0),
    ls(LsInstr::Strbt, 0x0460_0000, 0x0d70_0000),
    ls(LsInstr::Strt, 0x0420_0000, 0x0d70_0000),
    ls(LsInstr::Str, 0x0400_0000, 0x0c50_0000),
    ls(LsInstr::Strb, 0x0440_0000, 0x0c50_0000),
    ls(LsInstr::Strd, 0x0000_00f0, 0x0e10_00f0),
    ls(LsInstr::Strex, 0x0180_0090, 0x0ff0_00f0),
    ls(LsInstr::Strh, 0x0000_00b0, 0x0e10_00f0),
];

impl LsInstr {
    /// Classifies an instruction word, `None` if no table entry matches.
    pub fn decode(instr: u32) -> Option<Self> {
        LS_DECODE_TABLE
            .iter()
            .find(|e| instr & e.mask == e.pattern & e.mask)
            .map(|e| e.op)
    }

    /// Whether the instruction reads memory into a register.
    pub const fn is_load(self) -> bool {
        (self as usize) < NUM_LOAD_INSTRS
    }

    /// LDREX/STREX, which need an exclusive monitor.
    pub const fn is_exclusive(self) -> bool {
        matches!(self, LsInstr::Ldrex | LsInstr::Strex)
    }

    /// Whether the loaded value is sign-extended.
    pub const fn is_signed(self) -> bool {
        matches!(self, LsInstr::Ldrsb | LsInstr::Ldrsh)
    }

    /// Lower-case assembler mnemonic, for diagnostics.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            LsInstr::Ldrbt => "ldrbt",
            LsInstr::Ldrt => "ldrt",
            LsInstr::Ldr => "ldr",
            LsInstr::Ldrb => "ldrb",
            LsInstr::Ldrd => "ldrd",
            LsInstr::Ldrex => "ldrex",
            LsInstr::Ldrh => "ldrh",
            LsInstr::Ldrsb => "ldrsb",
            LsInstr::Ldrsh => "ldrsh",
            LsInstr::Strbt => "strbt",
            LsInstr::Strt => "strt",
            LsInstr::Str => "str",
            LsInstr::Strb => "strb",
            LsInstr::Strd => "strd",
            LsInstr::Strex => "strex",
            LsInstr::Strh => "strh",
        }
    }
}

/// Offset shift applied to a scaled register, bits \[6:5\].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    /// ROR, or RRX when the shift amount is zero.
    RorRrx,
}

/// How a word/unsigned-byte access forms its offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrMode {
    /// 12-bit immediate.
    Immediate,
    /// Plain Rm.
    Register,
    /// Rm shifted by an immediate.
    ScaledRegister,
}

/// A raw A32 load/store instruction word with named field accessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LsWord(pub u32);

impl LsWord {
    const fn bit(self, n: u32) -> bool {
        (self.0 >> n) & 1 != 0
    }

    /// Rm, bits \[3:0\].
    pub const fn rm(self) -> u8 {
        (self.0 & 0xf) as u8
    }

    /// H, bit \[5\]: halfword (misc. load/store group).
    pub const fn h(self) -> bool {
        self.bit(5)
    }

    /// S, bit \[6\]: signed or doubleword (misc. load/store group).
    pub const fn s(self) -> bool {
        self.bit(6)
    }

    /// Shift type of a scaled register offset, bits \[6:5\].
    pub const fn shift_type(self) -> ShiftType {
        match (self.0 >> 5) & 0x3 {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => ShiftType::RorRrx,
        }
    }

    /// Shift amount of a scaled register offset, bits \[11:7\].
    pub const fn shift_imm(self) -> u32 {
        (self.0 >> 7) & 0x1f
    }

    /// 12-bit immediate offset, bits \[11:0\].
    pub const fn imm12(self) -> u32 {
        self.0 & 0xfff
    }

    /// Split 8-bit immediate of the misc. group, imm4H \[11:8\] : imm4L \[3:0\].
    pub const fn imm8_split(self) -> u32 {
        ((self.0 >> 4) & 0xf0) | (self.0 & 0xf)
    }

    /// Rt, bits \[15:12\].
    pub const fn rt(self) -> u8 {
        ((self.0 >> 12) & 0xf) as u8
    }

    /// Rn, bits \[19:16\].
    pub const fn rn(self) -> u8 {
        ((self.0 >> 16) & 0xf) as u8
    }

    /// L, bit \[20\]: load.
    pub const fn l(self) -> bool {
        self.bit(20)
    }

    /// W, bit \[21\]: base writeback when pre-indexed.
    pub const fn w(self) -> bool {
        self.bit(21)
    }

    /// B, bit \[22\]: byte access in the word group, immediate offset in the misc. group.
    pub const fn b(self) -> bool {
        self.bit(22)
    }

    /// U, bit \[23\]: add the offset when set, subtract it otherwise.
    pub const fn u(self) -> bool {
        self.bit(23)
    }

    /// P, bit \[24\]: pre-indexed when set, post-indexed otherwise.
    pub const fn p(self) -> bool {
        self.bit(24)
    }

    /// Bit \[26\]: word/unsigned-byte group rather than the halfword/doubleword/signed group.
    pub const fn is_word_group(self) -> bool {
        self.bit(26)
    }

    /// Whether the base register is updated: post-indexed, or pre-indexed with W.
    pub const fn writes_back(self) -> bool {
        !self.p() || self.w()
    }

    /// Addressing mode of a word/unsigned-byte access; `None` for the misc. group and for
    /// media encodings that share the opcode space (bit 4 set with a register offset).
    pub const fn addr_mode(self) -> Option<AddrMode> {
        match self.0 & 0x0e00_0000 {
            0x0400_0000 => Some(AddrMode::Immediate),
            0x0600_0000 if self.0 & 0xff0 == 0 => Some(AddrMode::Register),
            0x0600_0000 if self.0 & 0x10 == 0 => Some(AddrMode::ScaledRegister),
            _ => None,
        }
    }

    /// Whether the offset is read from Rm.
    pub const fn has_register_offset(self) -> bool {
        if self.is_word_group() {
            self.bit(25)
        } else {
            !self.b()
        }
    }
}

/// Applies an immediate shift to a register offset.
///
/// A zero amount is special for every kind but LSL: LSR #0 and ASR #0 encode a shift by 32, and
/// ROR #0 encodes RRX, which shifts right by one and moves `carry` into bit 31.
pub fn shift_rm(value: u32, shift: ShiftType, imm: u32, carry: bool) -> u32 {
    let imm = imm & 0x1f;
    match (shift, imm) {
        (ShiftType::Lsl, n) => value << n,
        (ShiftType::Lsr, 0) => 0,
        (ShiftType::Lsr, n) => value >> n,
        (ShiftType::Asr, 0) => {
            if value & (1 << 31) != 0 {
                u32::MAX
            } else {
                0
            }
        }
        (ShiftType::Asr, n) => ((value as i32) >> n) as u32,
        (ShiftType::RorRrx, 0) => ((carry as u32) << 31) | (value >> 1),
        (ShiftType::RorRrx, n) => value.rotate_right(n),
    }
}

/// Signed byte offset the instruction applies to its base register, with U already applied.
///
/// Register operands are read in `mode`, the mode of the guest at trap time.
pub fn ls_offset(instr: LsWord, regs: &VCpuRegs, mode: CpuMode) -> i32 {
    let magnitude = if instr.is_word_group() {
        match instr.addr_mode() {
            Some(AddrMode::Immediate) => instr.imm12(),
            // A plain register offset only applies pre-indexed.
            Some(AddrMode::Register) if instr.p() => regs.reg(instr.rm(), mode),
            Some(AddrMode::Register) => 0,
            Some(AddrMode::ScaledRegister) => shift_rm(
                regs.reg(instr.rm(), mode),
                instr.shift_type(),
                instr.shift_imm(),
                regs.carry(),
            ),
            None => 0,
        }
    } else if instr.b() {
        instr.imm8_split()
    } else {
        regs.reg(instr.rm(), mode)
    };

    if instr.u() {
        magnitude as i32
    } else {
        (magnitude as i32).wrapping_neg()
    }
}

/// Number of bytes transferred by a load/store.
pub fn ls_length(instr: LsWord) -> usize {
    if instr.is_word_group() {
        if instr.b() {
            1
        } else {
            4
        }
    } else {
        let (h, s, l) = (instr.h(), instr.s(), instr.l());
        if !l && s {
            warn!("doubleword access to MMIO: {:#010x}", instr.0);
            8
        } else if l && s && !h {
            1
        } else {
            2
        }
    }
}

/// What a trapped load/store asks of the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmioAccess {
    /// The decoded instruction, `None` when the access was described by the syndrome.
    pub op: Option<LsInstr>,
    /// Store to the device rather than load from it.
    pub is_write: bool,
    /// Transfer length in bytes: 1, 2, 4, or 8 for a register pair.
    pub len: usize,
    /// Sign-extend the loaded value into the destination register.
    pub sign_extend: bool,
    /// Source or destination register; a pair uses `rt` and `rt + 1`.
    pub rt: u8,
    /// Values to store, captured before any base writeback.
    pub data: [u32; 2],
}

/// Decodes a load/store that faulted on an MMIO address.
///
/// When the instruction updates its base register, the update is applied to `regs` here, before
/// the device access has been performed.
pub fn decode_mmio_ls(regs: &mut VCpuRegs, instr: u32) -> AxResult<MmioAccess> {
    let mode = regs.current_mode();
    let Some(op) = LsInstr::decode(instr) else {
        return ax_err!(
            Unsupported,
            format!("unknown load/store instruction {:#010x}", instr)
        );
    };

    let word = LsWord(instr);
    if op.is_exclusive() {
        return ax_err!(
            Unsupported,
            format!("{} to an MMIO address", op.mnemonic())
        );
    }
    if word.is_word_group() && word.addr_mode().is_none() {
        return ax_err!(
            Unsupported,
            format!("invalid addressing mode in {:#010x}", instr)
        );
    }

    let rt = word.rt();
    let len = ls_length(word);
    if rt == 15 || (len == 8 && (rt % 2 != 0 || rt == 14)) {
        return ax_err!(
            Unsupported,
            format!("{} with rt=r{} to an MMIO address", op.mnemonic(), rt)
        );
    }

    let is_write = !op.is_load();
    let mut data = [0; 2];
    if is_write {
        data[0] = regs.reg(rt, mode);
        if len == 8 {
            data[1] = regs.reg(rt + 1, mode);
        }
    }

    if word.writes_back() {
        let rn = word.rn();
        if rn == 15 || (word.has_register_offset() && word.rm() == 15) {
            return ax_err!(
                Unsupported,
                format!("pc-relative writeback in {:#010x}", instr)
            );
        }
        let offset = ls_offset(word, regs, mode);
        let base = regs.reg_mut(rn, mode);
        *base = base.wrapping_add(offset as u32);
    }

    Ok(MmioAccess {
        op: Some(op),
        is_write,
        len,
        sign_extend: op.is_signed(),
        rt,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axerrno::AxError;

    const SVC: u32 = 0x13;

    /// One canonical encoding per variant, condition AL.
    const CANONICAL: [(LsInstr, u32); 16] = [
        (LsInstr::Ldrbt, 0xe4f1_0000), // ldrbt r0, [r1], #0
        (LsInstr::Ldrt, 0xe4b1_0000),  // ldrt r0, [r1], #0
        (LsInstr::Ldr, 0xe591_0008),   // ldr r0, [r1, #8]
        (LsInstr::Ldrb, 0xe5d1_0000),  // ldrb r0, [r1]
        (LsInstr::Ldrd, 0xe1c2_00d0),  // ldrd r0, r1, [r2]
        (LsInstr::Ldrex, 0xe191_0f9f), // ldrex r0, [r1]
        (LsInstr::Ldrh, 0xe1d1_00b0),  // ldrh r0, [r1]
        (LsInstr::Ldrsb, 0xe1d1_00d0), // ldrsb r0, [r1]
        (LsInstr::Ldrsh, 0xe1d1_00f0), // ldrsh r0, [r1]
        (LsInstr::Strbt, 0xe4e1_0000), // strbt r0, [r1], #0
        (LsInstr::Strt, 0xe4a1_0000),  // strt r0, [r1], #0
        (LsInstr::Str, 0xe581_0004),   // str r0, [r1, #4]
        (LsInstr::Strb, 0xe5c1_0000),  // strb r0, [r1]
        (LsInstr::Strd, 0xe1c2_00f0),  // strd r0, r1, [r2]
        (LsInstr::Strex, 0xe182_0f91), // strex r0, r1, [r2]
        (LsInstr::Strh, 0xe1c1_00b0),  // strh r0, [r1]
    ];

    fn svc_regs() -> VCpuRegs {
        VCpuRegs {
            cpsr: SVC,
            ..Default::default()
        }
    }

    #[test]
    fn test_table_order_matches_variants() {
        for (i, entry) in LS_DECODE_TABLE.iter().enumerate() {
            assert_eq!(entry.op as usize, i);
            assert_eq!(entry.op.is_load(), i < NUM_LOAD_INSTRS);
        }
    }

    #[test]
    fn test_canonical_encodings_are_not_shadowed() {
        for (op, word) in CANONICAL {
            assert_eq!(LsInstr::decode(word), Some(op), "{:#010x}", word);
            // Every entry before the winner must reject the word.
            let winner = op as usize;
            for entry in &LS_DECODE_TABLE[..winner] {
                assert_ne!(word & entry.mask, entry.pattern & entry.mask);
            }
        }
    }

    /// The instruction a word encodes, derived from the encoding rules rather than the table.
    fn classify(word: u32) -> Option<LsInstr> {
        let w = LsWord(word);
        if word & 0x0c00_0000 == 0x0400_0000 {
            let unprivileged = !w.p() && w.w();
            return Some(match (w.l(), w.b(), unprivileged) {
                (true, true, true) => LsInstr::Ldrbt,
                (true, false, true) => LsInstr::Ldrt,
                (true, false, false) => LsInstr::Ldr,
                (true, true, false) => LsInstr::Ldrb,
                (false, true, true) => LsInstr::Strbt,
                (false, false, true) => LsInstr::Strt,
                (false, false, false) => LsInstr::Str,
                (false, true, false) => LsInstr::Strb,
            });
        }
        if word & 0x0e00_0000 != 0 {
            return None;
        }
        match ((word >> 20) & 0xff, (word >> 4) & 0xf, w.l()) {
            (0x19, 0x9, _) => Some(LsInstr::Ldrex),
            (0x18, 0x9, _) => Some(LsInstr::Strex),
            (_, 0xb, true) => Some(LsInstr::Ldrh),
            (_, 0xd, true) => Some(LsInstr::Ldrsb),
            (_, 0xf, true) => Some(LsInstr::Ldrsh),
            (_, 0xb, false) => Some(LsInstr::Strh),
            (_, 0xd, false) => Some(LsInstr::Ldrd),
            (_, 0xf, false) => Some(LsInstr::Strd),
            _ => None,
        }
    }

    #[test]
    fn test_first_match_over_addressing_and_register_fields() {
        for (op, canonical) in CANONICAL {
            let sweep = if op.is_exclusive() {
                1u32 << 20
            } else if LsWord(canonical).is_word_group() {
                0x03f0_0000 // I P U B W L
            } else {
                0x01f0_0000 // P U B W L
            };
            let base = canonical & !(0xf000_0000 | 0x000f_f00f | sweep);

            let mut bits = sweep;
            loop {
                for cond in [0x0u32, 0xe] {
                    for rn in [0u32, 7, 14, 15] {
                        for rt in [0u32, 5, 14, 15] {
                            for rm in [0u32, 3, 15] {
                                let word = base
                                    | bits
                                    | cond << 28
                                    | rn << 16
                                    | rt << 12
                                    | rm;
                                let expected = classify(word);
                                assert!(expected.is_some(), "{:#010x}", word);
                                assert_eq!(LsInstr::decode(word), expected, "{:#010x}", word);
                            }
                        }
                    }
                }
                if bits == 0 {
                    break;
                }
                bits = (bits - 1) & sweep;
            }
        }
    }

    #[test]
    fn test_decode_is_deterministic() {
        for (_, word) in CANONICAL {
            let first = LsInstr::decode(word);
            for _ in 0..4 {
                assert_eq!(LsInstr::decode(word), first);
            }
        }
    }

    #[test]
    fn test_unmatched_words() {
        // mov r0, r1
        assert_eq!(LsInstr::decode(0xe1a0_0001), None);
        // b .
        assert_eq!(LsInstr::decode(0xeaff_fffe), None);

        let mut regs = svc_regs();
        let before = regs.clone();
        assert_eq!(decode_mmio_ls(&mut regs, 0xe1a0_0001), Err(AxError::Unsupported));
        assert_eq!(regs, before);
    }

    #[test]
    fn test_immediate_offset_magnitude_and_direction() {
        let regs = svc_regs();
        for magnitude in [0, 1, 8, 0x7ff, 0xfff] {
            let up = LsWord(0xe591_0000 | magnitude);
            let down = LsWord(0xe511_0000 | magnitude);
            assert_eq!(ls_offset(up, &regs, CpuMode::Svc), magnitude as i32);
            assert_eq!(ls_offset(down, &regs, CpuMode::Svc), -(magnitude as i32));
        }
    }

    #[test]
    fn test_register_offsets() {
        let mut regs = svc_regs();
        regs.usr[2] = 0x10;
        // ldr r0, [r1, r2]
        assert_eq!(ls_offset(LsWord(0xe791_0002), &regs, CpuMode::Svc), 0x10);
        // ldr r0, [r1, -r2]
        assert_eq!(ls_offset(LsWord(0xe711_0002), &regs, CpuMode::Svc), -0x10);
        // ldr r0, [r1, r2, lsl #2]
        assert_eq!(ls_offset(LsWord(0xe791_0102), &regs, CpuMode::Svc), 0x40);
        assert_eq!(LsWord(0xe791_0002).addr_mode(), Some(AddrMode::Register));
        assert_eq!(LsWord(0xe791_0102).addr_mode(), Some(AddrMode::ScaledRegister));
        assert_eq!(LsWord(0xe791_0012).addr_mode(), None);
    }

    #[test]
    fn test_halfword_group_offsets() {
        let mut regs = svc_regs();
        regs.usr[3] = 6;
        // ldrh r0, [r1, #0x24]
        assert_eq!(ls_offset(LsWord(0xe1d1_02b4), &regs, CpuMode::Svc), 0x24);
        // ldrh r0, [r1, -r3]
        assert_eq!(ls_offset(LsWord(0xe111_00b3), &regs, CpuMode::Svc), -6);
    }

    #[test]
    fn test_shift_by_zero_edge_cases() {
        assert_eq!(shift_rm(0xdead_beef, ShiftType::Lsr, 0, true), 0);
        assert_eq!(shift_rm(0x8000_0000, ShiftType::Asr, 0, false), u32::MAX);
        assert_eq!(shift_rm(0x7fff_ffff, ShiftType::Asr, 0, true), 0);
        assert_eq!(shift_rm(0x0000_0003, ShiftType::RorRrx, 0, true), 0x8000_0001);
        assert_eq!(shift_rm(0x0000_0003, ShiftType::RorRrx, 0, false), 0x0000_0001);
        assert_eq!(shift_rm(0x1234_5678, ShiftType::Lsl, 0, true), 0x1234_5678);
    }

    #[test]
    fn test_shift_nonzero_amounts() {
        assert_eq!(shift_rm(1, ShiftType::Lsl, 31, false), 0x8000_0000);
        assert_eq!(shift_rm(0x8000_0000, ShiftType::Lsr, 31, false), 1);
        assert_eq!(shift_rm(0x8000_0000, ShiftType::Asr, 4, false), 0xf800_0000);
        assert_eq!(shift_rm(0x0000_00f1, ShiftType::RorRrx, 4, false), 0x1000_000f);
    }

    #[test]
    fn test_rrx_offset_reads_guest_carry() {
        let mut regs = VCpuRegs {
            cpsr: SVC | crate::regs::PSR_C_BIT,
            ..Default::default()
        };
        regs.usr[2] = 2;
        // ldr r0, [r1, r2, rrx]
        let word = LsWord(0xe791_0062);
        assert_eq!(word.shift_type(), ShiftType::RorRrx);
        assert_eq!(ls_offset(word, &regs, CpuMode::Svc), 0x8000_0001u32 as i32);
        regs.cpsr = SVC;
        assert_eq!(ls_offset(word, &regs, CpuMode::Svc), 1);
    }

    #[test]
    fn test_transfer_lengths() {
        let expect = [
            (LsInstr::Ldr, 4),
            (LsInstr::Ldrb, 1),
            (LsInstr::Ldrbt, 1),
            (LsInstr::Ldrt, 4),
            (LsInstr::Str, 4),
            (LsInstr::Strb, 1),
            (LsInstr::Ldrh, 2),
            (LsInstr::Strh, 2),
            (LsInstr::Ldrsb, 1),
            (LsInstr::Ldrsh, 2),
            (LsInstr::Ldrd, 8),
            (LsInstr::Strd, 8),
        ];
        for (op, len) in expect {
            let (_, word) = CANONICAL[op as usize];
            assert_eq!(ls_length(LsWord(word)), len, "{}", op.mnemonic());
        }
    }

    #[test]
    fn test_pre_indexed_without_writeback_keeps_base() {
        let mut regs = svc_regs();
        regs.usr[1] = 0x1000;
        let access = decode_mmio_ls(&mut regs, 0xe591_0008).unwrap();
        assert_eq!(access.op, Some(LsInstr::Ldr));
        assert!(!access.is_write);
        assert_eq!(access.len, 4);
        assert_eq!(access.rt, 0);
        assert_eq!(regs.usr[1], 0x1000);
    }

    #[test]
    fn test_writeback_updates_base_in_place() {
        let mut regs = svc_regs();
        regs.usr[1] = 0x1000;
        regs.usr[0] = 0xaabb_ccdd;
        // str r0, [r1, #-4]!
        let access = decode_mmio_ls(&mut regs, 0xe521_0004).unwrap();
        assert!(access.is_write);
        assert_eq!(access.data[0], 0xaabb_ccdd);
        assert_eq!(regs.usr[1], 0x0ffc);

        // ldrb r0, [r1], #1
        decode_mmio_ls(&mut regs, 0xe4d1_0001).unwrap();
        assert_eq!(regs.usr[1], 0x0ffd);

        // ldr r0, [r1], r2: a post-indexed plain register adds nothing
        regs.usr[2] = 0x100;
        assert_eq!(ls_offset(LsWord(0xe691_0002), &regs, CpuMode::Svc), 0);
        decode_mmio_ls(&mut regs, 0xe691_0002).unwrap();
        assert_eq!(regs.usr[1], 0x0ffd);

        // ldr r0, [r1], r2, lsl #2: the scaled form still applies
        decode_mmio_ls(&mut regs, 0xe691_0102).unwrap();
        assert_eq!(regs.usr[1], 0x13fd);
    }

    #[test]
    fn test_writeback_uses_banked_base() {
        let mut regs = VCpuRegs {
            cpsr: 0x11, // FIQ
            ..Default::default()
        };
        regs.usr[9] = 0x100;
        regs.fiq[1] = 0x200;
        // ldr r0, [r9], #4
        decode_mmio_ls(&mut regs, 0xe499_0004).unwrap();
        assert_eq!(regs.fiq[1], 0x204);
        assert_eq!(regs.usr[9], 0x100);
    }

    #[test]
    fn test_store_pair_captures_both_registers() {
        let mut regs = svc_regs();
        regs.usr[2] = 0x11;
        regs.usr[3] = 0x22;
        // strd r2, r3, [r4]
        let access = decode_mmio_ls(&mut regs, 0xe1c4_20f0).unwrap();
        assert_eq!(access.op, Some(LsInstr::Strd));
        assert_eq!(access.len, 8);
        assert_eq!(access.data, [0x11, 0x22]);
        // strd r3, r4, [r5]: odd first register
        assert_eq!(decode_mmio_ls(&mut regs, 0xe1c5_30f0), Err(AxError::Unsupported));
    }

    #[test]
    fn test_signed_loads_request_sign_extension() {
        let mut regs = svc_regs();
        assert!(decode_mmio_ls(&mut regs, 0xe1d1_00d0).unwrap().sign_extend);
        assert!(decode_mmio_ls(&mut regs, 0xe1d1_00f0).unwrap().sign_extend);
        assert!(!decode_mmio_ls(&mut regs, 0xe1d1_00b0).unwrap().sign_extend);
    }

    #[test]
    fn test_unpredictable_forms_fail_closed() {
        let mut regs = svc_regs();
        // ldrex r0, [r1]
        assert_eq!(decode_mmio_ls(&mut regs, 0xe191_0f9f), Err(AxError::Unsupported));
        // ldr pc, [r1]
        assert_eq!(decode_mmio_ls(&mut regs, 0xe591_f000), Err(AxError::Unsupported));
        // ldr r0, [pc], #4
        assert_eq!(decode_mmio_ls(&mut regs, 0xe49f_0004), Err(AxError::Unsupported));
        // ldr r0, [pc, #4] has no writeback and is allowed
        assert!(decode_mmio_ls(&mut regs, 0xe59f_0004).is_ok());
        assert_eq!(regs.pc, 0);
    }
}
