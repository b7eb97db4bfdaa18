//! Displayable summary of a captured panic.

use core::any::Any;
use core::fmt;

/// Payload summary from a caught panic.
///
/// The raw payload of a Rust panic is an opaque `Box<dyn Any + Send>`; this
/// type holds the human-readable part so diagnostics can mention the failure
/// without taking ownership of the payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a panic payload summary with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Derives a summary from a raw panic payload.
    ///
    /// String payloads (the common `panic!("...")` cases) are copied out;
    /// anything else is summarized as opaque.
    #[must_use]
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        if let Some(message) = payload.downcast_ref::<&'static str>() {
            Self::new(*message)
        } else if let Some(message) = payload.downcast_ref::<String>() {
            Self::new(message.clone())
        } else {
            Self::new("non-string panic payload")
        }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}
