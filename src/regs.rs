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

//! Banked general-purpose register file of an ARMv7 guest.

/// CPSR mode field, bits \[4:0\].
pub const PSR_MODE_MASK: u32 = 0x1f;
/// CPSR.T (Thumb state), bit 5.
pub const PSR_T_BIT: u32 = 1 << 5;
/// CPSR.F (FIQ mask), bit 6.
pub const PSR_F_BIT: u32 = 1 << 6;
/// CPSR.I (IRQ mask), bit 7.
pub const PSR_I_BIT: u32 = 1 << 7;
/// CPSR.A (asynchronous abort mask), bit 8.
pub const PSR_A_BIT: u32 = 1 << 8;
/// CPSR.E (data endianness), bit 9.
pub const PSR_E_BIT: u32 = 1 << 9;
/// CPSR.C (carry flag), bit 29.
pub const PSR_C_BIT: u32 = 1 << 29;

/// The guest processor modes, in the order of the banking table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CpuMode {
    /// Fast interrupt mode.
    Fiq = 0,
    /// Interrupt mode.
    Irq = 1,
    /// Supervisor mode.
    Svc = 2,
    /// Abort mode.
    Abt = 3,
    /// Undefined-instruction mode.
    Und = 4,
    /// User mode.
    Usr = 5,
    /// System mode. Shares every register with user mode.
    Sys = 6,
}

impl CpuMode {
    /// The highest mode index with a row in the banking table.
    pub const MAX: CpuMode = CpuMode::Sys;

    /// All modes, indexed by their table position.
    pub const ALL: [CpuMode; 7] = [
        CpuMode::Fiq,
        CpuMode::Irq,
        CpuMode::Svc,
        CpuMode::Abt,
        CpuMode::Und,
        CpuMode::Usr,
        CpuMode::Sys,
    ];

    /// Returns the mode with the given table index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is above [`CpuMode::MAX`]: such an index can only come from a decoding
    /// bug and must not be used to address register storage.
    pub fn from_index(index: u32) -> Self {
        assert!(
            index <= Self::MAX as u32,
            "processor mode index {} is out of range",
            index
        );
        Self::ALL[index as usize]
    }

    /// Decodes the mode field of a guest CPSR. Returns `None` for encodings a guest can never
    /// be trapped in (monitor, hyp, reserved).
    pub const fn from_cpsr(cpsr: u32) -> Option<Self> {
        match cpsr & PSR_MODE_MASK {
            0x10 => Some(CpuMode::Usr),
            0x11 => Some(CpuMode::Fiq),
            0x12 => Some(CpuMode::Irq),
            0x13 => Some(CpuMode::Svc),
            0x17 => Some(CpuMode::Abt),
            0x1b => Some(CpuMode::Und),
            0x1f => Some(CpuMode::Sys),
            _ => None,
        }
    }

    /// The CPSR mode field encoding of this mode.
    pub const fn psr_bits(self) -> u32 {
        match self {
            CpuMode::Usr => 0x10,
            CpuMode::Fiq => 0x11,
            CpuMode::Irq => 0x12,
            CpuMode::Svc => 0x13,
            CpuMode::Abt => 0x17,
            CpuMode::Und => 0x1b,
            CpuMode::Sys => 0x1f,
        }
    }
}

/// The storage backing one architectural register in one mode.
///
/// The index is a position inside the corresponding bank of [`VCpuRegs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegSlot {
    /// `usr[i]`, the unbanked r0-r14.
    Usr(usize),
    /// `svc[i]`: SP, LR.
    Svc(usize),
    /// `abt[i]`: SP, LR.
    Abt(usize),
    /// `und[i]`: SP, LR.
    Und(usize),
    /// `irq[i]`: SP, LR.
    Irq(usize),
    /// `fiq[i]`: r8-r14.
    Fiq(usize),
    /// The program counter, shared by every mode.
    Pc,
}

const fn bank_row(r13: RegSlot, r14: RegSlot) -> [RegSlot; 16] {
    let mut row = [RegSlot::Pc; 16];
    let mut i = 0;
    while i < 13 {
        row[i] = RegSlot::Usr(i);
        i += 1;
    }
    row[13] = r13;
    row[14] = r14;
    row
}

const fn fiq_row() -> [RegSlot; 16] {
    let mut row = bank_row(RegSlot::Fiq(5), RegSlot::Fiq(6));
    let mut i = 8;
    while i < 13 {
        row[i] = RegSlot::Fiq(i - 8);
        i += 1;
    }
    row
}

/// One row per [`CpuMode`], one column per register number.
static REG_BANKS: [[RegSlot; 16]; 7] = [
    fiq_row(),
    bank_row(RegSlot::Irq(0), RegSlot::Irq(1)),
    bank_row(RegSlot::Svc(0), RegSlot::Svc(1)),
    bank_row(RegSlot::Abt(0), RegSlot::Abt(1)),
    bank_row(RegSlot::Und(0), RegSlot::Und(1)),
    bank_row(RegSlot::Usr(13), RegSlot::Usr(14)),
    bank_row(RegSlot::Usr(13), RegSlot::Usr(14)),
];

/// Resolves register `reg` as seen from `mode` to its storage slot.
///
/// # Panics
///
/// Panics if `reg` is above 15.
pub fn reg_slot(reg: u8, mode: CpuMode) -> RegSlot {
    assert!(reg <= 15, "register number r{} is out of range", reg);
    REG_BANKS[mode as usize][reg as usize]
}

/// The architectural general-purpose state of a guest, laid out the way the world switch
/// saves and restores it.
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VCpuRegs {
    /// R0_usr - R14_usr.
    pub usr: [u32; 15],
    /// SP_svc, LR_svc, SPSR_svc.
    pub svc: [u32; 3],
    /// SP_abt, LR_abt, SPSR_abt.
    pub abt: [u32; 3],
    /// SP_und, LR_und, SPSR_und.
    pub und: [u32; 3],
    /// SP_irq, LR_irq, SPSR_irq.
    pub irq: [u32; 3],
    /// R8_fiq - R14_fiq, SPSR_fiq.
    pub fiq: [u32; 8],
    /// The program counter (r15).
    pub pc: u32,
    /// Guest CPSR.
    pub cpsr: u32,
}

impl VCpuRegs {
    fn slot(&self, slot: RegSlot) -> &u32 {
        match slot {
            RegSlot::Usr(i) => &self.usr[i],
            RegSlot::Svc(i) => &self.svc[i],
            RegSlot::Abt(i) => &self.abt[i],
            RegSlot::Und(i) => &self.und[i],
            RegSlot::Irq(i) => &self.irq[i],
            RegSlot::Fiq(i) => &self.fiq[i],
            RegSlot::Pc => &self.pc,
        }
    }

    fn slot_mut(&mut self, slot: RegSlot) -> &mut u32 {
        match slot {
            RegSlot::Usr(i) => &mut self.usr[i],
            RegSlot::Svc(i) => &mut self.svc[i],
            RegSlot::Abt(i) => &mut self.abt[i],
            RegSlot::Und(i) => &mut self.und[i],
            RegSlot::Irq(i) => &mut self.irq[i],
            RegSlot::Fiq(i) => &mut self.fiq[i],
            RegSlot::Pc => &mut self.pc,
        }
    }

    /// Reads register `reg` as seen from `mode`.
    pub fn reg(&self, reg: u8, mode: CpuMode) -> u32 {
        *self.slot(reg_slot(reg, mode))
    }

    /// Returns the storage of register `reg` as seen from `mode`.
    ///
    /// The reference borrows the whole register file, so it cannot outlive the trap-handling
    /// pass that requested it.
    pub fn reg_mut(&mut self, reg: u8, mode: CpuMode) -> &mut u32 {
        self.slot_mut(reg_slot(reg, mode))
    }

    /// The mode the guest was executing in when it trapped.
    ///
    /// # Panics
    ///
    /// Panics if the latched CPSR holds a mode a guest cannot be in.
    pub fn current_mode(&self) -> CpuMode {
        CpuMode::from_cpsr(self.cpsr).unwrap_or_else(|| {
            panic!(
                "guest CPSR {:#010x} holds an invalid mode {:#x}",
                self.cpsr,
                self.cpsr & PSR_MODE_MASK
            )
        })
    }

    /// CPSR.C.
    pub const fn carry(&self) -> bool {
        self.cpsr & PSR_C_BIT != 0
    }

    /// Whether the guest was executing Thumb code.
    pub const fn is_thumb(&self) -> bool {
        self.cpsr & PSR_T_BIT != 0
    }

    /// Moves the PC past a trapped instruction of `len` bytes.
    pub fn advance_pc(&mut self, len: u32) {
        self.pc = self.pc.wrapping_add(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usr_and_sys_share_storage() {
        for reg in 0..=15 {
            assert_eq!(reg_slot(reg, CpuMode::Usr), reg_slot(reg, CpuMode::Sys));
        }
        assert_eq!(reg_slot(9, CpuMode::Usr), RegSlot::Usr(9));
        assert_eq!(reg_slot(14, CpuMode::Usr), RegSlot::Usr(14));
    }

    #[test]
    fn test_fiq_banks_r8_to_r14() {
        for reg in 0..8 {
            assert_eq!(reg_slot(reg, CpuMode::Fiq), RegSlot::Usr(reg as usize));
        }
        assert_eq!(reg_slot(8, CpuMode::Fiq), RegSlot::Fiq(0));
        assert_eq!(reg_slot(9, CpuMode::Fiq), RegSlot::Fiq(1));
        assert_eq!(reg_slot(13, CpuMode::Fiq), RegSlot::Fiq(5));
        assert_eq!(reg_slot(14, CpuMode::Fiq), RegSlot::Fiq(6));
        assert_eq!(reg_slot(15, CpuMode::Fiq), RegSlot::Pc);
    }

    #[test]
    fn test_exception_modes_bank_sp_and_lr() {
        let cases = [
            (CpuMode::Irq, RegSlot::Irq(0), RegSlot::Irq(1)),
            (CpuMode::Svc, RegSlot::Svc(0), RegSlot::Svc(1)),
            (CpuMode::Abt, RegSlot::Abt(0), RegSlot::Abt(1)),
            (CpuMode::Und, RegSlot::Und(0), RegSlot::Und(1)),
        ];
        for (mode, sp, lr) in cases {
            for reg in 0..13 {
                assert_eq!(reg_slot(reg, mode), RegSlot::Usr(reg as usize));
            }
            assert_eq!(reg_slot(13, mode), sp);
            assert_eq!(reg_slot(14, mode), lr);
            assert_eq!(reg_slot(15, mode), RegSlot::Pc);
        }
    }

    #[test]
    fn test_banked_writes_are_isolated() {
        let mut regs = VCpuRegs::default();
        *regs.reg_mut(9, CpuMode::Usr) = 0x1111;
        *regs.reg_mut(9, CpuMode::Fiq) = 0x2222;
        *regs.reg_mut(13, CpuMode::Svc) = 0x3333;
        *regs.reg_mut(15, CpuMode::Irq) = 0x8000;

        assert_eq!(regs.usr[9], 0x1111);
        assert_eq!(regs.fiq[1], 0x2222);
        assert_eq!(regs.svc[0], 0x3333);
        assert_eq!(regs.reg(13, CpuMode::Usr), 0);
        assert_eq!(regs.reg(15, CpuMode::Usr), 0x8000);
        assert_eq!(regs.reg(9, CpuMode::Svc), 0x1111);
    }

    #[test]
    #[should_panic]
    fn test_register_number_above_15_panics() {
        reg_slot(16, CpuMode::Svc);
    }

    #[test]
    #[should_panic]
    fn test_mode_index_above_max_panics() {
        CpuMode::from_index(7);
    }

    #[test]
    fn test_mode_from_cpsr() {
        for mode in CpuMode::ALL {
            assert_eq!(CpuMode::from_cpsr(mode.psr_bits() | PSR_I_BIT), Some(mode));
            assert_eq!(CpuMode::from_index(mode as u32), mode);
        }
        assert_eq!(CpuMode::from_cpsr(0x1a), None);
        assert_eq!(CpuMode::from_cpsr(0x16), None);
    }

    #[test]
    fn test_cpsr_helpers() {
        let mut regs = VCpuRegs {
            cpsr: 0x13 | PSR_C_BIT,
            pc: 0xffff_fffe,
            ..Default::default()
        };
        assert_eq!(regs.current_mode(), CpuMode::Svc);
        assert!(regs.carry());
        assert!(!regs.is_thumb());
        regs.advance_pc(4);
        assert_eq!(regs.pc, 2);
    }
}
