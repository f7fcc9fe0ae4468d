//! Safepoint transitions.
//!
//! A thread entering native code publishes that it is at a full safepoint by
//! swapping its `safepoint_state` word from `UNACQUIRED` to `FULL_ACQUIRED`
//! with `lock cmpxchg`; leaving swaps it back. If the word holds anything
//! else (a collector has requested a safepoint) the CAS fails and the
//! thread calls a runtime stub that takes the slow path under the
//! safepoint lock.
//!
//! Forcing the slow path (`use_slow_path` or a ThreadSanitizer build) adds
//! an unconditional jump in front of the CAS and drops the conditional
//! jump after it, so both configurations emit the same number of
//! instructions. JIT callback trampolines are generated with a fixed layout
//! that relies on this.

use crate::backend::x64::encoder::Condition;
use crate::backend::x64::label::{JumpDistance, Label};
use crate::backend::x64::registers::{Address, Gpr, THR, TMP};
use crate::backend::x64::Assembler;
use crate::runtime::{CodeEntryKind, ExecutionState, SafepointState, VmTag};

impl Assembler {
    /// Publish that this thread is at a full safepoint.
    pub fn enter_full_safepoint(&mut self) {
        let stub = self.offsets().thread.enter_safepoint_stub;
        self.safepoint_transition(SafepointState::UNACQUIRED, SafepointState::FULL_ACQUIRED, stub);
    }

    /// Leave the full safepoint. `ignore_unwind_in_progress` selects the
    /// stub variant that does not check for a pending unwind.
    pub fn exit_full_safepoint(&mut self, ignore_unwind_in_progress: bool) {
        let thread = &self.offsets().thread;
        let stub = if ignore_unwind_in_progress {
            thread.exit_safepoint_ignore_unwind_in_progress_stub
        } else {
            thread.exit_safepoint_stub
        };
        self.safepoint_transition(SafepointState::FULL_ACQUIRED, SafepointState::UNACQUIRED, stub);
    }

    fn safepoint_transition(&mut self, from: SafepointState, to: SafepointState, stub_offset: i32) {
        let force_slow_path = self.config().force_slow_path();
        let state = Address::new(THR, self.offsets().thread.safepoint_state);
        let entry = self.offsets().code.entry_point_offset(CodeEntryKind::Normal);

        let mut done = Label::new();
        let mut slow_path = Label::new();
        if force_slow_path {
            self.jmp(&mut slow_path, JumpDistance::Far);
        }

        // RAX is the implicit comparand of cmpxchg; preserve it.
        self.pushq_r(Gpr::Rax);
        self.movq_ri(Gpr::Rax, from.bits() as i64);
        self.movq_ri(TMP, to.bits() as i64);
        self.lock_cmpxchgq(state, TMP);
        self.movq_rr(TMP, Gpr::Rax);
        self.popq_r(Gpr::Rax);
        self.cmpq_ri(TMP, from.bits() as i64);

        if !force_slow_path {
            self.j(Condition::Equal, &mut done, JumpDistance::Far);
        }

        self.bind(&mut slow_path);
        self.movq_rm(TMP, Address::new(THR, stub_offset));
        self.movq_rm(TMP, Address::field(TMP, entry));
        // The stub takes no arguments and needs no shadow space.
        self.call_reg(TMP);
        self.bind(&mut done);
    }

    /// Record the exit frame, switch the thread to native and optionally
    /// enter the safepoint.
    pub fn transition_generated_to_native(
        &mut self,
        destination: Gpr,
        new_exit_frame: Gpr,
        new_exit_through_ffi: Gpr,
        enter_safepoint: bool,
    ) {
        let thread = self.offsets().thread.clone();
        self.movq_mr(Address::new(THR, thread.top_exit_frame_info), new_exit_frame);
        self.movq_mr(Address::new(THR, thread.exit_through_ffi), new_exit_through_ffi);
        self.movq_mr(Address::new(THR, thread.vm_tag), destination);
        self.movq_mi(Address::new(THR, thread.execution_state), ExecutionState::Native as i64);
        if enter_safepoint {
            self.enter_full_safepoint();
        }
    }

    /// Switch the thread back to generated code and clear the exit frame.
    pub fn transition_native_to_generated(
        &mut self,
        exit_safepoint: bool,
        ignore_unwind_in_progress: bool,
        set_tag: bool,
    ) {
        let thread = self.offsets().thread.clone();
        if exit_safepoint {
            self.exit_full_safepoint(ignore_unwind_in_progress);
        } else {
            assert!(
                !ignore_unwind_in_progress,
                "unwind check only applies when exiting the safepoint"
            );
            if self.config().verify_safepoint_state {
                // The caller must still hold the full safepoint.
                self.movq_rm(TMP, Address::new(THR, thread.safepoint_state));
                self.andq_ri(TMP, SafepointState::FULL_ACQUIRED.bits() as i64);
                let mut ok = Label::new();
                self.j(Condition::NOT_ZERO, &mut ok, JumpDistance::Near);
                self.breakpoint();
                self.bind(&mut ok);
            }
        }
        if set_tag {
            self.movq_mi(Address::new(THR, thread.vm_tag), VmTag::Dart as i64);
        }
        self.movq_mi(Address::new(THR, thread.execution_state), ExecutionState::Generated as i64);
        self.movq_mi(Address::new(THR, thread.top_exit_frame_info), 0);
        self.movq_mi(Address::new(THR, thread.exit_through_ffi), 0);
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::x64::registers::Gpr;
    use crate::backend::x64::Assembler;
    use crate::config::AssemblerConfig;

    fn assembler(use_slow_path: bool) -> Assembler {
        Assembler::new(AssemblerConfig {
            use_slow_path,
            ..Default::default()
        })
    }

    #[test]
    fn test_enter_fast_path_sequence() {
        let mut a = assembler(false);
        a.enter_full_safepoint();
        let code = a.bytes();
        // push rax; mov eax, 0; mov r11d, 0x15
        assert_eq!(&code[..1], &[0x50]);
        assert_eq!(&code[1..6], &[0xB8, 0, 0, 0, 0]);
        assert_eq!(&code[6..12], &[0x41, 0xBB, 0x15, 0, 0, 0]);
        // lock cmpxchg [r14 + 0x68], r11
        assert_eq!(&code[12..18], &[0xF0, 0x4D, 0x0F, 0xB1, 0x5E, 0x68]);
        // mov r11, rax; pop rax; cmp r11, 0
        assert_eq!(&code[18..21], &[0x49, 0x89, 0xC3]);
        assert_eq!(&code[21..22], &[0x58]);
        assert_eq!(&code[22..26], &[0x49, 0x83, 0xFB, 0x00]);
        // je done (long form, skips the 3 stub instructions)
        assert_eq!(&code[26..28], &[0x0F, 0x84]);
        let skip = i32::from_le_bytes(code[28..32].try_into().unwrap()) as usize;
        assert_eq!(32 + skip, code.len());
        // last instruction: call r11
        assert_eq!(&code[code.len() - 3..], &[0x41, 0xFF, 0xD3]);
    }

    #[test]
    fn test_same_instruction_count_both_paths() {
        for exit in [false, true] {
            let mut fast = assembler(false);
            let mut slow = assembler(true);
            if exit {
                fast.exit_full_safepoint(false);
                slow.exit_full_safepoint(false);
            } else {
                fast.enter_full_safepoint();
                slow.enter_full_safepoint();
            }
            assert_eq!(fast.instruction_count(), slow.instruction_count());
            assert_eq!(fast.instruction_count(), 11);
        }
    }

    #[test]
    fn test_forced_slow_path_jumps_to_stub() {
        let mut a = assembler(true);
        a.enter_full_safepoint();
        let code = a.bytes();
        assert_eq!(code[0], 0xE9);
        let target = 5 + i32::from_le_bytes(code[1..5].try_into().unwrap()) as usize;
        // The jump lands on `mov r11, [r14 + enter_safepoint_stub]`.
        assert_eq!(&code[target..target + 3], &[0x4D, 0x8B, 0x9E]);
    }

    #[test]
    fn test_tsan_counts_as_slow_path() {
        let mut tsan = Assembler::new(AssemblerConfig {
            thread_sanitizer: true,
            ..Default::default()
        });
        tsan.exit_full_safepoint(true);
        assert_eq!(tsan.bytes()[0], 0xE9);
    }

    #[test]
    fn test_transition_round_trip() {
        let mut a = assembler(false);
        a.transition_generated_to_native(Gpr::Rax, Gpr::Rbx, Gpr::Rcx, true);
        let after_native = a.instruction_count();
        assert_eq!(after_native, 4 + 11);
        a.transition_native_to_generated(true, false, true);
        assert_eq!(a.instruction_count() - after_native, 11 + 4);
    }

    #[test]
    fn test_verify_safepoint_state_check() {
        let mut plain = assembler(false);
        plain.transition_native_to_generated(false, false, false);
        assert_eq!(plain.instruction_count(), 3);

        let mut verified = Assembler::new(AssemblerConfig {
            verify_safepoint_state: true,
            ..Default::default()
        });
        verified.transition_native_to_generated(false, false, false);
        // mov, and, jnz, int3 before the stores.
        assert_eq!(verified.instruction_count(), 7);
        assert!(verified.bytes().contains(&0xCC));
    }
}
