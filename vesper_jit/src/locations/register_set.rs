//! Register sets with per-register GC visibility.

use std::fmt;

use super::location::Location;
use super::representation::Representation;
use crate::backend::x64::registers::{Gpr, GprSet, Xmm, XmmSet, ALLOCATABLE_GPRS, ALLOCATABLE_XMMS};

/// CPU and FPU registers, with the CPU registers that hold untagged values
/// tracked separately. Used both as a clobber/use descriptor and as the
/// set of registers saved around slow-path calls.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSet {
    cpu: GprSet,
    untagged: GprSet,
    fpu: XmmSet,
}

impl RegisterSet {
    pub const fn new() -> Self {
        RegisterSet {
            cpu: GprSet::EMPTY,
            untagged: GprSet::EMPTY,
            fpu: XmmSet::EMPTY,
        }
    }

    /// A set holding exactly the given registers, all tagged.
    pub const fn from_sets(cpu: GprSet, fpu: XmmSet) -> Self {
        RegisterSet {
            cpu,
            untagged: GprSet::EMPTY,
            fpu,
        }
    }

    /// Add a machine-register location. CPU registers holding anything
    /// other than a tagged value are marked untagged. Other locations are
    /// ignored.
    pub fn add(&mut self, loc: Location, rep: Representation) {
        match loc {
            Location::Register(reg) => {
                self.cpu = self.cpu.insert(reg);
                if rep != Representation::Tagged {
                    self.untagged = self.untagged.insert(reg);
                }
            }
            Location::FpuRegister(reg) => self.fpu = self.fpu.insert(reg),
            _ => {}
        }
    }

    pub fn remove(&mut self, loc: Location) {
        match loc {
            Location::Register(reg) => {
                self.cpu = self.cpu.remove(reg);
                self.untagged = self.untagged.remove(reg);
            }
            Location::FpuRegister(reg) => self.fpu = self.fpu.remove(reg),
            _ => {}
        }
    }

    pub fn contains(&self, loc: Location) -> bool {
        match loc {
            Location::Register(reg) => self.cpu.contains(reg),
            Location::FpuRegister(reg) => self.fpu.contains(reg),
            _ => false,
        }
    }

    pub fn contains_register(&self, reg: Gpr) -> bool {
        self.cpu.contains(reg)
    }

    pub fn contains_fpu_register(&self, reg: Xmm) -> bool {
        self.fpu.contains(reg)
    }

    /// Record that the register in `loc` holds a value the GC must skip.
    ///
    /// # Panics
    ///
    /// Panics unless `loc` is a CPU register in the set.
    pub fn mark_untagged(&mut self, loc: Location) {
        let reg = match loc {
            Location::Register(reg) => reg,
            other => panic!("cannot mark {other} untagged"),
        };
        assert!(self.cpu.contains(reg), "{reg} is not in the set");
        self.untagged = self.untagged.insert(reg);
    }

    pub fn is_tagged(&self, reg: Gpr) -> bool {
        !self.untagged.contains(reg)
    }

    pub fn has_untagged_values(&self) -> bool {
        !self.untagged.is_empty()
    }

    pub fn cpu_registers(&self) -> GprSet {
        self.cpu
    }

    pub fn untagged_registers(&self) -> GprSet {
        self.untagged
    }

    pub fn fpu_registers(&self) -> XmmSet {
        self.fpu
    }

    pub fn cpu_register_count(&self) -> u32 {
        self.cpu.count()
    }

    pub fn fpu_register_count(&self) -> u32 {
        self.fpu.count()
    }

    pub fn register_count(&self) -> u32 {
        self.cpu_register_count() + self.fpu_register_count()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.fpu.is_empty()
    }

    /// Add every register the allocator may hand out, as tagged values.
    pub fn add_all_non_reserved(&mut self, include_fpu: bool) {
        self.cpu = self.cpu.union(ALLOCATABLE_GPRS);
        if include_fpu {
            self.fpu = self.fpu.union(ALLOCATABLE_XMMS);
        }
    }

    pub fn clear(&mut self) {
        *self = RegisterSet::new();
    }
}

impl fmt::Debug for RegisterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterSet")
            .field("cpu", &self.cpu)
            .field("untagged", &self.untagged)
            .field("fpu", &self.fpu)
            .finish()
    }
}
