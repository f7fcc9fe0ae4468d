//! Branch targets.
//!
//! An unbound label accumulates two kinds of pending fixups:
//!
//! - **Far** uses (rel32) are threaded through the not-yet-patched 4-byte
//!   slots themselves: each slot holds `previous_slot + 1`, and `0` ends the
//!   chain. The label only remembers the most recent slot.
//! - **Near** uses (rel8) have no room for a link, so their slot positions are
//!   kept in a small inline list.
//!
//! `Assembler::bind` walks both lists and patches every slot with the
//! distance from the end of the slot to the bound position.

use smallvec::SmallVec;

/// Encoding size requested for a forward branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JumpDistance {
    /// rel8; the branch must land within 127 bytes.
    Near,
    /// rel32.
    #[default]
    Far,
}

/// A branch target inside one code buffer.
#[derive(Default)]
pub struct Label {
    bound: Option<usize>,
    far_head: Option<usize>,
    near_links: SmallVec<[usize; 4]>,
}

impl Label {
    pub fn new() -> Self {
        Label::default()
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Whether unpatched uses are pending.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.far_head.is_some() || !self.near_links.is_empty()
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        !self.is_bound() && !self.is_linked()
    }

    /// The bound position.
    ///
    /// # Panics
    ///
    /// Panics if the label is not bound.
    pub fn position(&self) -> usize {
        match self.bound {
            Some(pos) => pos,
            None => panic!("label is not bound"),
        }
    }

    #[inline]
    pub fn bound_position(&self) -> Option<usize> {
        self.bound
    }

    /// Number of pending near fixups.
    pub fn near_link_count(&self) -> usize {
        self.near_links.len()
    }

    /// Record a far slot and return the chain link to store in it.
    pub(crate) fn link_far(&mut self, slot: usize) -> i32 {
        debug_assert!(!self.is_bound());
        let link = match self.far_head {
            Some(prev) => i32::try_from(prev + 1).unwrap_or_else(|_| panic!("code too large")),
            None => 0,
        };
        self.far_head = Some(slot);
        link
    }

    pub(crate) fn link_near(&mut self, slot: usize) {
        debug_assert!(!self.is_bound());
        self.near_links.push(slot);
    }

    /// Mark bound at `position` and hand back the pending fixups.
    pub(crate) fn bind_to(&mut self, position: usize) -> (Option<usize>, SmallVec<[usize; 4]>) {
        assert!(!self.is_bound(), "label is already bound");
        self.bound = Some(position);
        (self.far_head.take(), std::mem::take(&mut self.near_links))
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bound {
            Some(pos) => write!(f, "Label(bound @ {pos})"),
            None if self.is_linked() => write!(
                f,
                "Label(linked, far head {:?}, {} near)",
                self.far_head,
                self.near_links.len()
            ),
            None => f.write_str("Label(unused)"),
        }
    }
}

impl Drop for Label {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if self.is_linked() && !std::thread::panicking() {
            panic!("label dropped with unresolved uses");
        }
    }
}
