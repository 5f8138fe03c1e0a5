//! Query expression tree for Parallax.
//!
//! `parallax-logical` defines the expression tree the physical planner
//! consumes. Parsing query text into this tree is out of scope; tests and
//! embedders construct expressions programmatically:
//!
//! ```rust
//! use parallax_logical::{metric, Expr, Grouping, AggregateFunc};
//!
//! // sum by (pod) (http_requests)
//! let expr = Expr::aggregate(
//!     AggregateFunc::Sum,
//!     Grouping::by(["pod"]),
//!     metric("http_requests").into(),
//! );
//! println!("{expr}");
//! ```

pub mod expr;

pub use expr::{
    metric, number, AggregateFunc, BinaryOp, Expr, Grouping, RangeFunc, VectorMatchCardinality,
    VectorMatching, VectorSelector,
};
