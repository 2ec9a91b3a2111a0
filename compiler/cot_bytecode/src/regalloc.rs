//! Linear-scan register allocation with farthest-next-use spilling
//!
//! The allocator is the single source of truth for register state: the
//! mapping register -> value and value -> {register, home slot, upcoming
//! uses} lives here and nowhere else. The emitter asks for operands with
//! [`RegAlloc::ensure_in_reg`] and destinations with [`RegAlloc::alloc_dest`],
//! and reports consumed uses with [`RegAlloc::end_use`].
//!
//! Use lists are built in a backward pre-pass over the linearized function:
//! per value, a sorted list of instruction positions. When no register is
//! free, the victim is the register whose value's next use is farthest in
//! the future (ties break toward the lower register number, keeping output
//! deterministic). The victim is stored to its spill slot and evicted.

use crate::buffer::CodeBuf;
use crate::opcode::{Opcode, ALLOCATABLE_REGS};
use cot_common::{CotError, CotResult};
use cot_ir::ValueId;
use hashbrown::HashMap;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct ValueState {
    pub reg: Option<u8>,
    /// Home slot: parameter local, phi slot, or spill slot.
    pub slot: Option<u16>,
    /// Upcoming use positions, ascending.
    pub uses: VecDeque<u32>,
}

#[derive(Debug)]
pub struct RegAlloc {
    regs: [Option<ValueId>; ALLOCATABLE_REGS as usize],
    /// Registers pinned for the instruction being emitted; never evicted.
    locked: [bool; ALLOCATABLE_REGS as usize],
    values: HashMap<ValueId, ValueState>,
    /// Next free local slot; seeded past the parameter slots.
    next_slot: u16,
}

impl RegAlloc {
    pub fn new(first_free_slot: u16) -> Self {
        Self {
            regs: [None; ALLOCATABLE_REGS as usize],
            locked: [false; ALLOCATABLE_REGS as usize],
            values: HashMap::new(),
            next_slot: first_free_slot,
        }
    }

    /// Pin a register for the duration of the current instruction.
    pub fn lock(&mut self, reg: u8) {
        self.locked[reg as usize] = true;
    }

    pub fn unlock_all(&mut self) {
        self.locked = [false; ALLOCATABLE_REGS as usize];
    }

    pub fn local_count(&self) -> u16 {
        self.next_slot
    }

    fn state_mut(&mut self, value: ValueId) -> &mut ValueState {
        self.values.entry(value).or_default()
    }

    pub fn add_use(&mut self, value: ValueId, pos: u32) {
        self.state_mut(value).uses.push_back(pos);
    }

    pub fn set_home_slot(&mut self, value: ValueId, slot: u16) {
        self.state_mut(value).slot = Some(slot);
    }

    pub fn alloc_slot(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    pub fn home_slot(&mut self, value: ValueId) -> u16 {
        if let Some(slot) = self.state_mut(value).slot {
            return slot;
        }
        let slot = self.alloc_slot();
        self.state_mut(value).slot = Some(slot);
        slot
    }

    pub fn in_reg(&self, value: ValueId) -> Option<u8> {
        self.values.get(&value).and_then(|s| s.reg)
    }

    fn next_use(&self, value: ValueId) -> Option<u32> {
        self.values.get(&value).and_then(|s| s.uses.front().copied())
    }

    /// Bring `value` into some register, loading from its home slot if it
    /// is not already resident.
    pub fn ensure_in_reg(&mut self, value: ValueId, buf: &mut CodeBuf) -> CotResult<u8> {
        if let Some(reg) = self.in_reg(value) {
            return Ok(reg);
        }
        let reg = self.take_reg(buf)?;
        let Some(slot) = self.values.get(&value).and_then(|s| s.slot) else {
            return Err(CotError::ice(format!(
                "value %{} has neither a register nor a home slot",
                value
            )));
        };
        buf.op(Opcode::LoadLocal);
        buf.regs(&[reg]);
        buf.u16(slot);
        self.regs[reg as usize] = Some(value);
        self.state_mut(value).reg = Some(reg);
        Ok(reg)
    }

    /// Claim a register for a value being defined now.
    pub fn alloc_dest(&mut self, value: ValueId, buf: &mut CodeBuf) -> CotResult<u8> {
        let reg = self.take_reg(buf)?;
        self.regs[reg as usize] = Some(value);
        self.state_mut(value).reg = Some(reg);
        Ok(reg)
    }

    /// Record that `pos` consumed one use of `value`; frees the register
    /// when the use list drains.
    pub fn end_use(&mut self, value: ValueId, pos: u32) {
        let state = self.state_mut(value);
        while state.uses.front().map_or(false, |&u| u <= pos) {
            state.uses.pop_front();
        }
        if state.uses.is_empty() {
            if let Some(reg) = state.reg.take() {
                self.regs[reg as usize] = None;
            }
        }
    }

    /// Free register, or evict the farthest-next-use victim. Locked
    /// registers are never candidates.
    fn take_reg(&mut self, buf: &mut CodeBuf) -> CotResult<u8> {
        if let Some(free) = self
            .regs
            .iter()
            .enumerate()
            .position(|(i, r)| r.is_none() && !self.locked[i])
        {
            return Ok(free as u8);
        }

        // Farthest next use wins; a register holding a value with no
        // remaining uses would already be free.
        let mut victim_reg = None;
        let mut victim_distance = 0u32;
        for (reg, occupant) in self.regs.iter().enumerate() {
            if self.locked[reg] {
                continue;
            }
            let value = occupant.expect("occupied register");
            let distance = self.next_use(value).unwrap_or(u32::MAX);
            if victim_reg.is_none() || distance > victim_distance {
                victim_distance = distance;
                victim_reg = Some(reg as u8);
            }
        }
        let Some(victim_reg) = victim_reg else {
            return Err(CotError::ice("register allocation infeasible: all registers locked"));
        };

        let victim = self.regs[victim_reg as usize].expect("occupied register");
        self.spill(victim, buf)?;
        Ok(victim_reg)
    }

    /// Store `value` to its spill slot and evict it from its register.
    fn spill(&mut self, value: ValueId, buf: &mut CodeBuf) -> CotResult<u8> {
        let Some(reg) = self.in_reg(value) else {
            return Err(CotError::ice(format!("spill of value %{} not in a register", value)));
        };
        let slot = self.home_slot(value);
        buf.op(Opcode::StoreLocal);
        buf.u16(slot);
        buf.regs(&[reg]);
        self.state_mut(value).reg = None;
        self.regs[reg as usize] = None;
        Ok(reg)
    }

    /// Spill every live register value (those with upcoming uses) and clear
    /// the register file. Used at block boundaries and around calls, where
    /// registers do not survive.
    pub fn spill_all_live(&mut self, buf: &mut CodeBuf) -> CotResult<()> {
        for reg in 0..self.regs.len() {
            let Some(value) = self.regs[reg] else { continue };
            if self.next_use(value).is_some() {
                self.spill(value, buf)?;
            } else {
                self.state_mut(value).reg = None;
                self.regs[reg] = None;
            }
        }
        Ok(())
    }

    /// Drop a value's register residency without writing its slot. Required
    /// after a phi copy rewrites the value's home slot: a later spill of the
    /// stale register copy would clobber the fresh value.
    pub fn evict_no_spill(&mut self, value: ValueId) {
        if let Some(reg) = self.in_reg(value) {
            self.state_mut(value).reg = None;
            self.regs[reg as usize] = None;
        }
    }

    /// Forget register residency without spilling (registers invalidated by
    /// a call that has already spilled).
    pub fn clear_regs(&mut self) {
        for reg in 0..self.regs.len() {
            if let Some(value) = self.regs[reg] {
                self.state_mut(value).reg = None;
                self.regs[reg] = None;
            }
        }
    }

    /// The spill slot of a value, if it has one.
    pub fn slot_of(&self, value: ValueId) -> Option<u16> {
        self.values.get(&value).and_then(|s| s.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_registers_after_last_use() {
        let mut ra = RegAlloc::new(0);
        let mut buf = CodeBuf::new();
        ra.add_use(0, 5);
        let r0 = ra.alloc_dest(0, &mut buf).unwrap();
        ra.end_use(0, 5);
        let r1 = ra.alloc_dest(1, &mut buf).unwrap();
        assert_eq!(r0, r1, "freed register must be reused");
    }

    #[test]
    fn farthest_next_use_is_evicted() {
        let mut ra = RegAlloc::new(0);
        let mut buf = CodeBuf::new();
        // Fill all 15 registers; value v's next use is at position 100 - v,
        // so value 0 (next use 100) is the farthest.
        for v in 0..15u32 {
            ra.add_use(v, 100 - v);
            ra.add_use(v, 200);
            ra.alloc_dest(v, &mut buf).unwrap();
        }
        ra.add_use(99, 300);
        let reg = ra.alloc_dest(99, &mut buf).unwrap();
        assert_eq!(reg, 0, "value 0 held r0 and had the farthest next use");
        assert_eq!(ra.in_reg(0), None);
        assert!(ra.slot_of(0).is_some(), "victim received a spill slot");
    }

    #[test]
    fn eviction_tie_breaks_to_lowest_register() {
        let mut ra = RegAlloc::new(0);
        let mut buf = CodeBuf::new();
        for v in 0..15u32 {
            ra.add_use(v, 50);
            ra.alloc_dest(v, &mut buf).unwrap();
        }
        ra.add_use(77, 60);
        let reg = ra.alloc_dest(77, &mut buf).unwrap();
        assert_eq!(reg, 0);
    }

    #[test]
    fn ensure_reloads_from_spill_slot() {
        let mut ra = RegAlloc::new(0);
        let mut buf = CodeBuf::new();
        ra.add_use(7, 10);
        ra.add_use(7, 20);
        ra.alloc_dest(7, &mut buf).unwrap();
        ra.spill_all_live(&mut buf).unwrap();
        assert_eq!(ra.in_reg(7), None);
        let reg = ra.ensure_in_reg(7, &mut buf).unwrap();
        assert_eq!(ra.in_reg(7), Some(reg));
    }

    #[test]
    fn value_without_home_is_an_ice() {
        let mut ra = RegAlloc::new(0);
        let mut buf = CodeBuf::new();
        assert!(ra.ensure_in_reg(42, &mut buf).is_err());
    }
}
