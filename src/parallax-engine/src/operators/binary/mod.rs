//! Binary operators.
//!
//! Three physical operators cover `lhs ⊕ rhs`:
//!
//! - [`VectorBinaryExec`]: vector ⊕ vector with a pre-computed join index
//! - [`ScalarBinaryExec`]: vector ⊕ scalar, broadcasting the scalar operand
//! - [`SetOperationExec`]: `and` / `or` / `unless` on sample presence

mod scalar;
mod set;
mod vector;

pub use scalar::ScalarBinaryExec;
pub use set::SetOperationExec;
pub use vector::VectorBinaryExec;

use parallax_core::Labels;
use parallax_logical::{BinaryOp, VectorMatching};

/// Apply an arithmetic or comparison operator to a pair of values.
///
/// Comparisons outside bool mode filter: the predicate holding emits the left
/// operand, otherwise nothing. Division by zero follows IEEE-754 and never
/// errors. Set operators are evaluated by [`SetOperationExec`], not here.
pub(crate) fn apply_operation(
    op: BinaryOp,
    lhs: f64,
    rhs: f64,
    return_bool: bool,
) -> Option<f64> {
    let compare = |holds: bool| {
        if return_bool {
            Some(if holds { 1.0 } else { 0.0 })
        } else if holds {
            Some(lhs)
        } else {
            None
        }
    };
    match op {
        BinaryOp::Add => Some(lhs + rhs),
        BinaryOp::Sub => Some(lhs - rhs),
        BinaryOp::Mul => Some(lhs * rhs),
        BinaryOp::Div => Some(lhs / rhs),
        BinaryOp::Mod => Some(lhs % rhs),
        BinaryOp::Pow => Some(lhs.powf(rhs)),
        BinaryOp::Eq => compare(lhs == rhs),
        BinaryOp::Neq => compare(lhs != rhs),
        BinaryOp::Gtr => compare(lhs > rhs),
        BinaryOp::Lss => compare(lhs < rhs),
        BinaryOp::Gte => compare(lhs >= rhs),
        BinaryOp::Lte => compare(lhs <= rhs),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Unless => None,
    }
}

/// The 64-bit join signature of a series under a matching descriptor.
///
/// `ignoring` hashes everything except the ignored names and `__name__`;
/// `on` hashes exactly the listed names. An empty `on` list gives every
/// series the same signature, i.e. a cross-join.
pub(crate) fn join_signature(labels: &Labels, matching: &VectorMatching) -> u64 {
    if matching.on {
        labels.hash_for(&matching.matching_labels)
    } else {
        labels.hash_without(&matching.matching_labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::labels;

    #[test]
    fn test_arithmetic() {
        assert_eq!(apply_operation(BinaryOp::Add, 2.0, 3.0, false), Some(5.0));
        assert_eq!(apply_operation(BinaryOp::Pow, 2.0, 3.0, false), Some(8.0));
        assert_eq!(apply_operation(BinaryOp::Mod, 7.0, 4.0, false), Some(3.0));
    }

    #[test]
    fn test_division_by_zero_is_not_an_error() {
        assert_eq!(
            apply_operation(BinaryOp::Div, 1.0, 0.0, false),
            Some(f64::INFINITY)
        );
        assert_eq!(
            apply_operation(BinaryOp::Div, -1.0, 0.0, false),
            Some(f64::NEG_INFINITY)
        );
        assert!(apply_operation(BinaryOp::Div, 0.0, 0.0, false)
            .unwrap()
            .is_nan());
    }

    #[test]
    fn test_comparison_filters() {
        assert_eq!(apply_operation(BinaryOp::Gtr, 5.0, 3.0, false), Some(5.0));
        assert_eq!(apply_operation(BinaryOp::Gtr, 2.0, 3.0, false), None);
    }

    #[test]
    fn test_comparison_bool_mode() {
        assert_eq!(apply_operation(BinaryOp::Gtr, 5.0, 3.0, true), Some(1.0));
        assert_eq!(apply_operation(BinaryOp::Gtr, 2.0, 3.0, true), Some(0.0));
    }

    #[test]
    fn test_join_signature_on_and_ignoring() {
        let a = labels! {"__name__" => "up", "job" => "api", "cpu" => "0"};
        let b = labels! {"__name__" => "down", "job" => "api", "cpu" => "1"};

        let on = VectorMatching::on(["job"]);
        assert_eq!(join_signature(&a, &on), join_signature(&b, &on));

        let ignoring = VectorMatching::ignoring(["cpu"]);
        assert_eq!(join_signature(&a, &ignoring), join_signature(&b, &ignoring));

        let strict = VectorMatching::default();
        assert_ne!(join_signature(&a, &strict), join_signature(&b, &strict));
    }

    #[test]
    fn test_empty_on_is_cross_join() {
        let a = labels! {"job" => "api"};
        let b = labels! {"job" => "web"};
        let cross = VectorMatching::on(Vec::<String>::new());
        assert_eq!(join_signature(&a, &cross), join_signature(&b, &cross));
    }
}
