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

//! Virtual IRQ/FIQ lines of one vcpu, shared with the threads that raise them.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bitflags::bitflags;

use crate::trace::{self, TraceEvent};

bitflags! {
    /// The HCR bits that assert a virtual interrupt in the guest.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VirtIrqMask: u32 {
        /// HCR.VI, virtual IRQ.
        const VI = 1 << 7;
        /// HCR.VF, virtual FIQ.
        const VF = 1 << 6;
    }
}

impl Default for VirtIrqMask {
    fn default() -> Self {
        Self::empty()
    }
}

/// An interrupt input of the vcpu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqLine {
    /// The IRQ input, HCR.VI.
    Irq,
    /// The FIQ input, HCR.VF.
    Fiq,
}

impl IrqLine {
    /// The HCR bit driven by this line.
    pub const fn mask(self) -> VirtIrqMask {
        match self {
            IrqLine::Irq => VirtIrqMask::VI,
            IrqLine::Fiq => VirtIrqMask::VF,
        }
    }
}

/// Pending virtual interrupts and the wait-for-interrupt flag.
///
/// Every operation is a single atomic update, so it may be called from any thread while the
/// vcpu itself is running or blocked.
#[derive(Debug, Default)]
pub struct VirtIrq {
    pending: AtomicU32,
    wait_for_interrupts: AtomicBool,
}

impl VirtIrq {
    /// All lines low, not waiting.
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            wait_for_interrupts: AtomicBool::new(false),
        }
    }

    /// Drives `line` to `level`.
    ///
    /// Raising a line also ends a wait for interrupts. Returns `true` only for the call that
    /// actually ended the wait, so that the caller wakes the vcpu exactly once.
    pub fn set_line(&self, line: IrqLine, level: bool) -> bool {
        trace::emit(TraceEvent::IrqLine { line, level });
        let mask = line.mask().bits();
        if level {
            self.pending.fetch_or(mask, Ordering::SeqCst);
            self.wait_for_interrupts
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        } else {
            self.pending.fetch_and(!mask, Ordering::SeqCst);
            false
        }
    }

    /// The lines currently asserted.
    pub fn hcr_bits(&self) -> VirtIrqMask {
        VirtIrqMask::from_bits_truncate(self.pending.load(Ordering::SeqCst))
    }

    /// Whether `line` is asserted.
    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.hcr_bits().contains(line.mask())
    }

    /// Whether the vcpu is parked in WFI.
    pub fn wait_for_interrupts(&self) -> bool {
        self.wait_for_interrupts.load(Ordering::SeqCst)
    }

    /// Parks the vcpu until the next raise.
    ///
    /// A line raised concurrently either sees the flag and clears it, or is seen here and the
    /// wait is abandoned, so a raise is never lost.
    pub(crate) fn start_waiting(&self) {
        self.wait_for_interrupts.store(true, Ordering::SeqCst);
        if self.pending.load(Ordering::SeqCst) != 0 {
            let _ = self.wait_for_interrupts.compare_exchange(
                true,
                false,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    /// A vcpu is runnable unless it is waiting for an interrupt.
    pub fn is_runnable(&self) -> bool {
        !self.wait_for_interrupts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_wakes_exactly_once() {
        let irq = VirtIrq::new();
        irq.start_waiting();
        assert!(!irq.is_runnable());

        assert!(irq.set_line(IrqLine::Irq, true));
        assert!(irq.is_runnable());
        assert!(!irq.set_line(IrqLine::Irq, true));
        assert!(!irq.set_line(IrqLine::Fiq, true));
        assert_eq!(irq.hcr_bits(), VirtIrqMask::VI | VirtIrqMask::VF);
    }

    #[test]
    fn test_lower_clears_only_its_line() {
        let irq = VirtIrq::new();
        irq.set_line(IrqLine::Irq, true);
        irq.set_line(IrqLine::Fiq, true);
        assert!(!irq.set_line(IrqLine::Irq, false));
        assert!(!irq.is_pending(IrqLine::Irq));
        assert!(irq.is_pending(IrqLine::Fiq));
        assert_eq!(irq.hcr_bits().bits(), 1 << 6);
    }

    #[test]
    fn test_wait_with_pending_line_is_abandoned() {
        let irq = VirtIrq::new();
        irq.set_line(IrqLine::Fiq, true);
        irq.start_waiting();
        assert!(irq.is_runnable());
    }

    #[test]
    fn test_lower_does_not_wake() {
        let irq = VirtIrq::new();
        irq.start_waiting();
        assert!(!irq.set_line(IrqLine::Fiq, false));
        assert!(irq.wait_for_interrupts());
        assert!(irq.hcr_bits().is_empty());
    }
}
