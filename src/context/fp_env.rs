//! Captured floating-point environment.
//!
//! Contexts can carry a snapshot of the floating-point control environment so
//! that tasks in a group execute under the settings that were current when
//! the group was created (or under the parent's settings, inherited at bind
//! time). The environment itself is opaque to the cancellation core: this
//! module stores it as an inline 64-bit word and exposes the capture hook.
//!
//! The ambient environment is a thread-local cell. Embedders that drive real
//! FPU state install the control word they manage via
//! [`set_ambient_fp_env`]; the core only copies the value around.

use core::fmt;
use std::cell::Cell;

thread_local! {
    static AMBIENT_FP_ENV: Cell<u64> = const { Cell::new(FpEnv::DEFAULT.bits()) };
}

/// An opaque captured floating-point environment.
///
/// Copyable value type with inline storage; contexts hold it in a single
/// atomic word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpEnv(u64);

impl FpEnv {
    /// The environment in effect when no embedder installed one.
    pub const DEFAULT: Self = Self(0);

    /// Reconstructs an environment from its raw representation.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw representation.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Captures the calling thread's ambient environment.
    #[must_use]
    pub fn capture_current() -> Self {
        AMBIENT_FP_ENV.with(|env| Self(env.get()))
    }
}

impl fmt::Debug for FpEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FpEnv({:#x})", self.0)
    }
}

impl Default for FpEnv {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Installs the calling thread's ambient FP environment.
pub fn set_ambient_fp_env(env: FpEnv) {
    AMBIENT_FP_ENV.with(|cell| cell.set(env.bits()));
}

/// Returns the calling thread's ambient FP environment.
#[must_use]
pub fn ambient_fp_env() -> FpEnv {
    AMBIENT_FP_ENV.with(|cell| FpEnv::from_bits(cell.get()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_reads_ambient() {
        set_ambient_fp_env(FpEnv::from_bits(0xCAFE));
        assert_eq!(FpEnv::capture_current().bits(), 0xCAFE);
        set_ambient_fp_env(FpEnv::DEFAULT);
    }

    #[test]
    fn ambient_is_per_thread() {
        set_ambient_fp_env(FpEnv::from_bits(0x1));
        let other = std::thread::spawn(|| ambient_fp_env())
            .join()
            .expect("thread panicked");
        assert_eq!(other, FpEnv::DEFAULT);
        set_ambient_fp_env(FpEnv::DEFAULT);
    }
}
