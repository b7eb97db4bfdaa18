//! Context life-cycle states.

/// Life-cycle state of a task-group context.
///
/// The binding protocol moves a context `Created → Locked → {Bound,
/// Isolated}`. `Locked` is transient and held only by the thread performing
/// the first-use binding; other observers spin until it clears. `Dead` is the
/// post-destroy poison state: any access after it is a caller bug, caught by
/// assertions rather than by reading freed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifetimeState {
    /// Constructed, never used.
    Created = 0,
    /// First-use binding in progress on the owner thread.
    Locked = 1,
    /// Bound without a parent; no list membership.
    Isolated = 2,
    /// Attached to a parent and linked into the owner's context list.
    Bound = 3,
    /// Destroyed.
    Dead = 4,
}

impl LifetimeState {
    /// Returns the raw state value stored in the context's atomic.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a raw state value.
    ///
    /// # Panics
    ///
    /// Panics on a value never produced by this crate, which would indicate
    /// state corruption.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Locked,
            2 => Self::Isolated,
            3 => Self::Bound,
            4 => Self::Dead,
            _ => panic!("corrupt context lifetime state"),
        }
    }
}
