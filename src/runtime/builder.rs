//! Runtime configuration and builder.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `label` | `"taskgrove"` |
//! | `context_list_capacity` | 16 |
//! | `default_fp_env` | captured from the building thread |

use std::sync::Arc;

use crate::context::fp_env::FpEnv;
use crate::runtime::Runtime;

/// Configuration for a runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Diagnostic label, included in trace events.
    pub label: String,
    /// Initial slot capacity of each registered thread's context list.
    pub context_list_capacity: usize,
    /// FP environment of the default root context; the building thread's
    /// ambient environment when `None`.
    pub default_fp_env: Option<FpEnv>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label: String::from("taskgrove"),
            context_list_capacity: 16,
            default_fp_env: None,
        }
    }
}

/// Builder for a [`Runtime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the diagnostic label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    /// Sets the initial context-list capacity per registered thread.
    #[must_use]
    pub fn context_list_capacity(mut self, capacity: usize) -> Self {
        self.config.context_list_capacity = capacity;
        self
    }

    /// Fixes the FP environment of the default root context.
    #[must_use]
    pub fn default_fp_env(mut self, env: FpEnv) -> Self {
        self.config.default_fp_env = Some(env);
        self
    }

    /// Builds the runtime.
    #[must_use]
    pub fn build(self) -> Arc<Runtime> {
        Runtime::with_config(self.config)
    }
}
