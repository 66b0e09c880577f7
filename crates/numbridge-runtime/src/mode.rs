#![forbid(unsafe_code)]

//! Runtime mode definitions for Strict and Hardened operation.

use serde::{Deserialize, Serialize};

/// Operational mode governing compatibility/safety trade-offs.
///
/// - **Strict**: Pass values to the native solver as given; only the checks
///   the solver itself needs are made.
/// - **Hardened**: Extra safety layer; rejects non-finite initial states,
///   non-finite tolerances and non-finite Jacobian entries before they reach
///   native code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeMode {
    #[default]
    Strict,
    Hardened,
}

impl RuntimeMode {
    #[must_use]
    pub const fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened)
    }
}
