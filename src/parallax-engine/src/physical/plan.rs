//! Physical plan structure.

use std::sync::Arc;

use common_error::ParallaxResult;
use parallax_logical::Expr;
use parallax_storage::SeriesStorage;

use crate::executor::QueryOpts;
use crate::operators::BoxedOperator;
use crate::physical::build_operator;

/// A physical execution plan: the operator tree for one query.
///
/// Plans are built per query and consumed by the engine driver; operators are
/// never shared across queries.
#[derive(Debug)]
pub struct PhysicalPlan {
    root: BoxedOperator,
}

impl PhysicalPlan {
    /// Plan an expression against a storage handle.
    pub fn new(
        expr: &Expr,
        storage: &Arc<dyn SeriesStorage>,
        opts: &QueryOpts,
    ) -> ParallaxResult<Self> {
        Ok(Self {
            root: build_operator(expr, storage, opts)?,
        })
    }

    /// The root operator.
    pub fn root_mut(&mut self) -> &mut BoxedOperator {
        &mut self.root
    }

    /// Consume the plan, returning the root operator.
    pub fn into_root(self) -> BoxedOperator {
        self.root
    }

    /// Generate EXPLAIN output.
    pub fn explain(&self) -> String {
        format!("Physical Plan:\n  {}\n", self.root.explain())
    }
}
