//! Expression-to-operator planning.
//!
//! The planner turns a [`parallax_logical::Expr`] tree into a tree of
//! physical operators. Selectors are sharded `parallelism`-ways and wrapped
//! in a coalesce exchange; everything above the selectors is oblivious to the
//! fan-out.

mod plan;

pub use plan::PhysicalPlan;

use std::sync::Arc;

use common_error::{ParallaxError, ParallaxResult};
use parallax_logical::{Expr, VectorSelector};
use parallax_storage::SeriesStorage;

use crate::executor::QueryOpts;
use crate::operators::{
    AggregateExec, BoxedOperator, CoalesceExec, MatrixSelectorExec, NumberLiteralExec,
    ScalarBinaryExec, SetOperationExec, VectorBinaryExec, VectorSelectorExec,
};
use crate::selector::SeriesSelector;

/// Build the operator tree for an expression.
pub fn build_operator(
    expr: &Expr,
    storage: &Arc<dyn SeriesStorage>,
    opts: &QueryOpts,
) -> ParallaxResult<BoxedOperator> {
    match expr {
        Expr::NumberLiteral(value) => Ok(Box::new(NumberLiteralExec::new(opts, *value, None))),

        Expr::VectorSelector(selector) => {
            check_at_modifier(selector, opts)?;
            let lookup_min = selector.at_ms.unwrap_or(opts.start_ms) - selector.offset_ms;
            let lookup_max = selector.at_ms.unwrap_or(opts.end_ms) - selector.offset_ms;
            let shared = Arc::new(SeriesSelector::new(
                Arc::clone(storage),
                selector.matchers.clone(),
                lookup_min - opts.lookback_delta_ms,
                lookup_max,
            ));
            let shards = opts.parallelism.max(1);
            let children = (0..shards)
                .map(|shard| {
                    Box::new(VectorSelectorExec::new(
                        Arc::clone(&shared),
                        opts,
                        selector.offset_ms,
                        selector.at_ms,
                        shard,
                        shards,
                    )) as BoxedOperator
                })
                .collect();
            Ok(Box::new(CoalesceExec::new(children, opts.steps_batch)))
        }

        Expr::RangeCall {
            func,
            selector,
            range_ms,
        } => {
            check_at_modifier(selector, opts)?;
            if *range_ms <= 0 {
                return Err(ParallaxError::planning("range must be positive"));
            }
            let lookup_min = selector.at_ms.unwrap_or(opts.start_ms) - selector.offset_ms;
            let lookup_max = selector.at_ms.unwrap_or(opts.end_ms) - selector.offset_ms;
            let shared = Arc::new(SeriesSelector::new(
                Arc::clone(storage),
                selector.matchers.clone(),
                lookup_min - range_ms,
                lookup_max,
            ));
            let shards = opts.parallelism.max(1);
            let children = (0..shards)
                .map(|shard| {
                    Box::new(MatrixSelectorExec::new(
                        Arc::clone(&shared),
                        opts,
                        *func,
                        *range_ms,
                        selector.offset_ms,
                        selector.at_ms,
                        shard,
                        shards,
                    )) as BoxedOperator
                })
                .collect();
            Ok(Box::new(CoalesceExec::new(children, opts.steps_batch)))
        }

        Expr::Binary {
            op,
            lhs,
            rhs,
            matching,
            return_bool,
        } => {
            if op.is_set_operator() {
                let lhs = build_operator(lhs, storage, opts)?;
                let rhs = build_operator(rhs, storage, opts)?;
                return Ok(Box::new(SetOperationExec::new(
                    lhs,
                    rhs,
                    *op,
                    matching.clone(),
                    opts.steps_batch,
                )));
            }
            // A literal operand turns the join into a broadcast.
            match (lhs.as_ref(), rhs.as_ref()) {
                (_, Expr::NumberLiteral(_)) => {
                    let vector = build_operator(lhs, storage, opts)?;
                    let scalar = build_operator(rhs, storage, opts)?;
                    Ok(Box::new(ScalarBinaryExec::new(
                        vector,
                        scalar,
                        *op,
                        false,
                        *return_bool,
                        opts.steps_batch,
                    )))
                }
                (Expr::NumberLiteral(_), _) => {
                    let scalar = build_operator(lhs, storage, opts)?;
                    let vector = build_operator(rhs, storage, opts)?;
                    Ok(Box::new(ScalarBinaryExec::new(
                        vector,
                        scalar,
                        *op,
                        true,
                        *return_bool,
                        opts.steps_batch,
                    )))
                }
                _ => {
                    let lhs = build_operator(lhs, storage, opts)?;
                    let rhs = build_operator(rhs, storage, opts)?;
                    Ok(Box::new(VectorBinaryExec::new(
                        lhs,
                        rhs,
                        matching.clone(),
                        *op,
                        *return_bool,
                        opts.steps_batch,
                    )))
                }
            }
        }

        Expr::Aggregate {
            func,
            grouping,
            expr,
        } => {
            let input = build_operator(expr, storage, opts)?;
            Ok(Box::new(AggregateExec::new(
                input,
                *func,
                grouping.clone(),
                opts.steps_batch,
            )))
        }
    }
}

fn check_at_modifier(selector: &VectorSelector, opts: &QueryOpts) -> ParallaxResult<()> {
    if selector.at_ms.is_some() && !opts.enable_at_modifier {
        return Err(ParallaxError::planning(
            "@ modifier is disabled; set enable_at_modifier",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::Sample;
    use parallax_logical::{metric, number, BinaryOp};
    use parallax_storage::MemoryStorage;

    fn storage() -> Arc<dyn SeriesStorage> {
        Arc::new(MemoryStorage::new().with_series(
            parallax_core::labels! {"__name__" => "m"},
            vec![Sample::new(0, 1.0)],
        ))
    }

    #[test]
    fn test_selector_plan_shape() {
        let opts = QueryOpts::instant(0).with_parallelism(4);
        let plan = build_operator(&metric("m").into(), &storage(), &opts).unwrap();
        assert_eq!(plan.explain(), "CoalesceExec(children=4)");
    }

    #[test]
    fn test_scalar_dispatch() {
        let opts = QueryOpts::instant(0).with_parallelism(1);
        let expr = Expr::binary(BinaryOp::Mul, metric("m").into(), number(2.0));
        let plan = build_operator(&expr, &storage(), &opts).unwrap();
        assert!(plan.explain().starts_with("ScalarBinaryExec("));
    }

    #[test]
    fn test_at_modifier_gate() {
        let opts = QueryOpts::instant(0).with_at_modifier(false);
        let expr: Expr = metric("m").at(1000).into();
        let err = build_operator(&expr, &storage(), &opts).unwrap_err();
        assert!(matches!(err, ParallaxError::PlanningError(_)));
    }

    #[test]
    fn test_negative_range_rejected() {
        let opts = QueryOpts::instant(0);
        let expr = Expr::range(parallax_logical::RangeFunc::Rate, metric("m"), 0);
        assert!(build_operator(&expr, &storage(), &opts).is_err());
    }
}
