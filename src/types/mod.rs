//! Core vocabulary types for the cancellation core.

pub mod panic_payload;
pub mod traits;

pub use panic_payload::PanicPayload;
pub use traits::ContextTraits;
