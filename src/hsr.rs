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

//! The Hyp Syndrome Register and the fault state latched with it.

use axerrno::{ax_err_type, AxResult};

use crate::GuestPhysAddr;

const fn bits(value: u32, hi: u32, lo: u32) -> u32 {
    (value >> lo) & ((1 << (hi - lo + 1)) - 1)
}

const fn bit(value: u32, n: u32) -> bool {
    (value >> n) & 1 != 0
}

/// Exception classes the exit router knows about (`HSR.EC`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionClass {
    /// Trapped WFI or WFE.
    Wfi = 0x01,
    /// MCR/MRC to CP15.
    Cp15_32 = 0x03,
    /// MCRR/MRRC to CP15.
    Cp15_64 = 0x04,
    /// MCR/MRC to CP14.
    Cp14Mr = 0x05,
    /// LDC/STC to CP14.
    Cp14Ls = 0x06,
    /// Access to CP0-CP13 trapped by HCPTR.
    Cp0To13 = 0x07,
    /// VMRS access to the CP10 identification registers.
    Cp10Id = 0x08,
    /// MRRC to CP14.
    Cp14_64 = 0x0c,
    /// SVC taken while in Hyp mode.
    SvcHyp = 0x11,
    /// HVC executed by the guest.
    Hvc = 0x12,
    /// Prefetch abort routed from the guest.
    Iabt = 0x20,
    /// Prefetch abort taken in Hyp mode.
    IabtHyp = 0x21,
    /// Data abort routed from the guest.
    Dabt = 0x24,
    /// Data abort taken in Hyp mode.
    DabtHyp = 0x25,
}

impl ExceptionClass {
    /// Maps a raw `HSR.EC` value, `None` if the router has no path for it.
    pub const fn from_raw(ec: u32) -> Option<Self> {
        Some(match ec {
            0x01 => Self::Wfi,
            0x03 => Self::Cp15_32,
            0x04 => Self::Cp15_64,
            0x05 => Self::Cp14Mr,
            0x06 => Self::Cp14Ls,
            0x07 => Self::Cp0To13,
            0x08 => Self::Cp10Id,
            0x0c => Self::Cp14_64,
            0x11 => Self::SvcHyp,
            0x12 => Self::Hvc,
            0x20 => Self::Iabt,
            0x21 => Self::IabtHyp,
            0x24 => Self::Dabt,
            0x25 => Self::DabtHyp,
            _ => return None,
        })
    }
}

/// Which Hyp vector the world switch came back through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ArmExceptionIndex {
    /// Reset.
    Reset = 0,
    /// Undefined instruction.
    Undefined = 1,
    /// Software interrupt.
    Software = 2,
    /// Prefetch abort.
    PrefetchAbort = 3,
    /// Data abort.
    DataAbort = 4,
    /// A physical IRQ interrupted the guest.
    Irq = 5,
    /// A physical FIQ interrupted the guest.
    Fiq = 6,
    /// Hyp trap; the cause is in the HSR.
    Hvc = 7,
}

/// Hyp Syndrome Register value captured at the moment of the trap.
///
/// Every accessor is a pure function of the raw value; which of them are meaningful depends on
/// [`Hsr::exception_class`].
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Hsr(pub u32);

impl Hsr {
    /// Raw exception class, bits \[31:26\].
    pub const fn ec(self) -> u32 {
        bits(self.0, 31, 26)
    }

    /// Decoded exception class.
    pub const fn exception_class(self) -> Option<ExceptionClass> {
        ExceptionClass::from_raw(self.ec())
    }

    /// Instruction length bit, bit \[25\]. Set for a 32-bit trapped instruction.
    pub const fn il(self) -> bool {
        bit(self.0, 25)
    }

    /// Length in bytes of the trapped instruction.
    pub const fn instr_len(self) -> u32 {
        if self.il() {
            4
        } else {
            2
        }
    }

    /// Instruction specific syndrome, bits \[24:0\].
    pub const fn iss(self) -> u32 {
        bits(self.0, 24, 0)
    }

    // MCR/MRC, MCRR/MRRC and VMRS.

    /// Direction, bit \[0\]: set for a read from the coprocessor (MRC/MRRC).
    pub const fn cp_is_read(self) -> bool {
        bit(self.0, 0)
    }

    /// CRm, bits \[4:1\].
    pub const fn cp_crm(self) -> u8 {
        bits(self.0, 4, 1) as u8
    }

    /// Rt, bits \[8:5\].
    pub const fn cp_rt(self) -> u8 {
        bits(self.0, 8, 5) as u8
    }

    /// CRn, bits \[13:10\] (32-bit transfers).
    pub const fn cp_crn(self) -> u8 {
        bits(self.0, 13, 10) as u8
    }

    /// Opc1, bits \[16:14\] (32-bit transfers).
    pub const fn cp_opc1(self) -> u8 {
        bits(self.0, 16, 14) as u8
    }

    /// Opc2, bits \[19:17\] (32-bit transfers).
    pub const fn cp_opc2(self) -> u8 {
        bits(self.0, 19, 17) as u8
    }

    /// Rt2, bits \[13:10\] (64-bit transfers).
    pub const fn cp64_rt2(self) -> u8 {
        bits(self.0, 13, 10) as u8
    }

    /// Opc1, bits \[19:16\] (64-bit transfers).
    pub const fn cp64_opc1(self) -> u8 {
        bits(self.0, 19, 16) as u8
    }

    // Data and prefetch aborts.

    /// Instruction syndrome valid, bit \[24\].
    pub const fn dabt_isv(self) -> bool {
        bit(self.0, 24)
    }

    /// Syndrome access size, bits \[23:22\], converted to bytes.
    pub const fn dabt_access_len(self) -> usize {
        1 << bits(self.0, 23, 22)
    }

    /// Syndrome sign extend, bit \[21\].
    pub const fn dabt_sse(self) -> bool {
        bit(self.0, 21)
    }

    /// Syndrome register transfer, bits \[19:16\].
    pub const fn dabt_srt(self) -> u8 {
        bits(self.0, 19, 16) as u8
    }

    /// Stage 2 fault on a stage 1 translation table walk, bit \[7\].
    pub const fn dabt_s1ptw(self) -> bool {
        bit(self.0, 7)
    }

    /// Write not read, bit \[6\].
    pub const fn dabt_wnr(self) -> bool {
        bit(self.0, 6)
    }

    /// Fault status code, bits \[5:0\].
    pub const fn fsc(self) -> u8 {
        bits(self.0, 5, 0) as u8
    }

    /// HVC immediate, bits \[15:0\].
    pub const fn hvc_imm(self) -> u16 {
        bits(self.0, 15, 0) as u16
    }

    /// Set when the trapped instruction was WFE rather than WFI, bit \[0\].
    pub const fn wfx_is_wfe(self) -> bool {
        bit(self.0, 0)
    }
}

impl core::fmt::Debug for Hsr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Hsr({:#010x}, ec={:#04x})", self.0, self.ec())
    }
}

/// Fault state latched by the world switch together with the syndrome.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultInfo {
    /// The Hyp Syndrome Register.
    pub hsr: Hsr,
    /// HDFAR or HIFAR, whichever the abort populated.
    pub hxfar: u32,
    /// Hyp IPA Fault Address Register.
    pub hpfar: u32,
}

impl FaultInfo {
    /// The full 40-bit faulting intermediate physical address: HPFAR\[31:4\] holds
    /// IPA\[39:12\], the page offset comes from the virtual fault address.
    pub const fn ipa_bits(&self) -> u64 {
        ((self.hpfar as u64 >> 4) << 12) | (self.hxfar as u64 & 0xfff)
    }

    /// The faulting IPA as a [`GuestPhysAddr`].
    ///
    /// Fails with `BadAddress` when the IPA does not fit a `usize`, which on a 32-bit host is
    /// any fault above 4 GiB.
    pub fn ipa(&self) -> AxResult<GuestPhysAddr> {
        let ipa = self.ipa_bits();
        usize::try_from(ipa).map(GuestPhysAddr::from).map_err(|_| {
            ax_err_type!(
                BadAddress,
                format!("IPA {:#x} beyond the host address width", ipa)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ec_and_length() {
        let hsr = Hsr(0x24 << 26 | 1 << 25);
        assert_eq!(hsr.ec(), 0x24);
        assert_eq!(hsr.exception_class(), Some(ExceptionClass::Dabt));
        assert_eq!(hsr.instr_len(), 4);
        assert_eq!(Hsr(0x03 << 26).instr_len(), 2);
        assert_eq!(Hsr(0x3f << 26).exception_class(), None);
        assert_eq!(Hsr(0).exception_class(), None);
        assert_eq!(Hsr(u32::MAX).iss(), 0x1ff_ffff);
    }

    #[test]
    fn test_cp_fields_boundaries() {
        // mrc p15, 7, r15, c15, c15, 7
        let hsr = Hsr(0x03 << 26 | 1 << 25 | 7 << 17 | 7 << 14 | 0xf << 10 | 0xf << 5 | 0xf << 1 | 1);
        assert!(hsr.cp_is_read());
        assert_eq!(hsr.cp_crm(), 15);
        assert_eq!(hsr.cp_rt(), 15);
        assert_eq!(hsr.cp_crn(), 15);
        assert_eq!(hsr.cp_opc1(), 7);
        assert_eq!(hsr.cp_opc2(), 7);

        let zero = Hsr(0x03 << 26);
        assert!(!zero.cp_is_read());
        assert_eq!(
            (zero.cp_crm(), zero.cp_rt(), zero.cp_crn(), zero.cp_opc1(), zero.cp_opc2()),
            (0, 0, 0, 0, 0)
        );

        let wide = Hsr(0x04 << 26 | 0xf << 16 | 0x9 << 10);
        assert_eq!(wide.cp64_opc1(), 15);
        assert_eq!(wide.cp64_rt2(), 9);
    }

    #[test]
    fn test_dabt_fields() {
        let hsr = Hsr(0x24 << 26 | 1 << 25 | 1 << 24 | 0b10 << 22 | 1 << 21 | 0xc << 16 | 1 << 6 | 0x07);
        assert!(hsr.dabt_isv());
        assert_eq!(hsr.dabt_access_len(), 4);
        assert!(hsr.dabt_sse());
        assert_eq!(hsr.dabt_srt(), 12);
        assert!(hsr.dabt_wnr());
        assert!(!hsr.dabt_s1ptw());
        assert_eq!(hsr.fsc(), 7);
        assert_eq!(Hsr(0).dabt_access_len(), 1);
        assert_eq!(Hsr(0b11 << 22).dabt_access_len(), 8);
    }

    #[test]
    fn test_fault_ipa() {
        let fault = FaultInfo {
            hsr: Hsr(0),
            hxfar: 0xc000_1234,
            hpfar: 0x0090_0010,
        };
        assert_eq!(fault.ipa().unwrap().as_usize(), 0x9000_1234);

        let fault = FaultInfo {
            hsr: Hsr(0),
            hxfar: 0xffff_f008,
            hpfar: 0x0002_0000,
        };
        assert_eq!(fault.ipa().unwrap().as_usize(), 0x0200_0008);
    }

    #[test]
    fn test_fault_ipa_above_4g() {
        let fault = FaultInfo {
            hsr: Hsr(0),
            hxfar: 0x0000_0abc,
            hpfar: 0xf000_0000,
        };
        assert_eq!(fault.ipa_bits(), 0xf_0000_0abc);
        if cfg!(target_pointer_width = "64") {
            assert_eq!(fault.ipa().unwrap().as_usize() as u64, 0xf_0000_0abc);
        } else {
            assert_eq!(fault.ipa(), Err(axerrno::AxError::BadAddress));
        }

        let top = FaultInfo {
            hsr: Hsr(0),
            hxfar: u32::MAX,
            hpfar: u32::MAX,
        };
        assert_eq!(top.ipa_bits(), 0xff_ffff_ffff);
    }
}
