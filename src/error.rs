//! Reported errors and fatal invariant checks.
//!
//! Two classes of failure exist. Internal-consistency violations (a
//! reference dereferenced against the wrong generation, an unresolved
//! forwarding slot at freeze time, ...) are programmer errors and panic
//! through [`internal_error!`]. Consistency problems a caller may want to
//! act on are reported as [`GraphError`].

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Provenance markers present before a rewrite were missing afterwards.
    #[error("{title}: {count} type attribute(s) not propagated: {missing:?}")]
    AttributesNotPropagated {
        title: String,
        count: usize,
        missing: Vec<u32>,
    },
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;

/// Abort with an internal-error condition.
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        panic!("internal error: {}", format_args!($($arg)*))
    };
}

/// Like `assert!`, but reports the failure as an internal error.
#[macro_export]
macro_rules! assert_internal {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::internal_error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_attributes_message_lists_markers() {
        let err = GraphError::AttributesNotPropagated {
            title: "combine classes".into(),
            count: 2,
            missing: vec![3, 7],
        };
        assert_eq!(
            err.to_string(),
            "combine classes: 2 type attribute(s) not propagated: [3, 7]"
        );
    }

    #[test]
    #[should_panic(expected = "internal error: slot 4 unresolved")]
    fn assert_internal_panics_with_prefix() {
        let slot = 4;
        assert_internal!(slot == 0, "slot {slot} unresolved");
    }
}
