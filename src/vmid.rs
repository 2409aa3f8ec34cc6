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

//! VM identifiers used to tag stage 2 TLB entries.

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use crate::HostPhysAddr;

/// Number of VMIDs, as VTTBR.VMID is 8 bits wide.
pub const NUM_VMIDS: usize = 256;

const WORDS: usize = NUM_VMIDS / 64;

/// An allocated VM identifier. Never 0, which belongs to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vmid(u8);

impl Vmid {
    /// The value programmed into VTTBR.VMID.
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// Allocator for [`Vmid`]s shared by every VM of the host.
///
/// The lock only covers the bitmap update and is never held while a guest runs.
pub struct VmidAllocator {
    map: Mutex<[u64; WORDS]>,
}

impl VmidAllocator {
    /// Creates an allocator with only the host's VMID 0 taken.
    pub const fn new() -> Self {
        let mut map = [0; WORDS];
        map[0] = 1;
        Self {
            map: Mutex::new(map),
        }
    }

    /// Takes the lowest free VMID.
    pub fn acquire(&self) -> AxResult<Vmid> {
        let mut map = self.map.lock();
        for (i, word) in map.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                *word |= 1 << bit;
                let vmid = Vmid((i * 64 + bit) as u8);
                debug!("acquired VMID {}", vmid.0);
                return Ok(vmid);
            }
        }
        ax_err!(ResourceBusy, "no VMID left")
    }

    /// Gives `vmid` back.
    ///
    /// # Panics
    ///
    /// Panics if `vmid` is not allocated.
    pub fn release(&self, vmid: Vmid) {
        let (word, bit) = (vmid.0 as usize / 64, vmid.0 as usize % 64);
        let mut map = self.map.lock();
        assert!(map[word] & (1 << bit) != 0, "VMID {} is not allocated", vmid.0);
        map[word] &= !(1 << bit);
        debug!("released VMID {}", vmid.0);
    }

    /// Whether `vmid` is currently handed out.
    pub fn is_allocated(&self, vmid: Vmid) -> bool {
        self.map.lock()[vmid.0 as usize / 64] & (1 << (vmid.0 % 64)) != 0
    }
}

impl Default for VmidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Composes VTTBR from the stage 2 root table and the VMID.
///
/// BADDR keeps bits \[39:6\] of `pgd`, VMID goes to bits \[55:48\].
pub fn vttbr(pgd: HostPhysAddr, vmid: Vmid) -> u64 {
    const PHYS_MASK: u64 = (1 << 40) - 1;
    const BADDR_MASK: u64 = PHYS_MASK & !((2 << 5) - 1);
    (pgd.as_usize() as u64 & BADDR_MASK) | (vmid.0 as u64) << 48
}
