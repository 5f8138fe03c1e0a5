//! Expression system for Parallax queries.

use std::fmt;

use parallax_core::{Matcher, METRIC_NAME};

/// A selection of series by label matchers, with optional time modifiers.
#[derive(Debug, Clone)]
pub struct VectorSelector {
    /// Label matchers selecting the series.
    pub matchers: Vec<Matcher>,
    /// `offset` modifier: subtracted from the evaluation timestamp.
    pub offset_ms: i64,
    /// `@` modifier: pins evaluation to an absolute timestamp.
    pub at_ms: Option<i64>,
}

impl VectorSelector {
    /// Create a selector from matchers.
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Self {
            matchers,
            offset_ms: 0,
            at_ms: None,
        }
    }

    /// Apply an `offset` modifier.
    pub fn with_offset(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    /// Apply an `@` modifier.
    pub fn at(mut self, at_ms: i64) -> Self {
        self.at_ms = Some(at_ms);
        self
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{m}")?;
        }
        if self.offset_ms != 0 {
            write!(f, " offset {}ms", self.offset_ms)?;
        }
        if let Some(at) = self.at_ms {
            write!(f, " @ {at}")?;
        }
        Ok(())
    }
}

/// Select a metric by name.
pub fn metric(name: impl Into<String>) -> VectorSelector {
    VectorSelector::new(vec![Matcher::equal(METRIC_NAME, name)])
}

/// A number literal expression.
pub fn number(value: f64) -> Expr {
    Expr::NumberLiteral(value)
}

/// Binary operators between vectors or between a vector and a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Neq,
    Gtr,
    Lss,
    Gte,
    Lte,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    /// Whether the operator is a comparison (filtering unless `bool` is set).
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Gtr | Self::Lss | Self::Gte | Self::Lte
        )
    }

    /// Whether the operator is a set operation on presence.
    pub fn is_set_operator(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Unless)
    }

    /// The query-language symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Gtr => ">",
            Self::Lss => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::And => "and",
            Self::Or => "or",
            Self::Unless => "unless",
        }
    }
}

/// Aggregations across series at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Sum,
    Max,
    Min,
    Avg,
    Count,
    Group,
}

impl AggregateFunc {
    /// The query-language name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Group => "group",
        }
    }
}

/// Functions over a range-vector window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFunc {
    Rate,
    Increase,
    Delta,
    SumOverTime,
    AvgOverTime,
    CountOverTime,
    MinOverTime,
    MaxOverTime,
    StddevOverTime,
    StdvarOverTime,
    LastOverTime,
    PresentOverTime,
}

impl RangeFunc {
    /// The query-language name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rate => "rate",
            Self::Increase => "increase",
            Self::Delta => "delta",
            Self::SumOverTime => "sum_over_time",
            Self::AvgOverTime => "avg_over_time",
            Self::CountOverTime => "count_over_time",
            Self::MinOverTime => "min_over_time",
            Self::MaxOverTime => "max_over_time",
            Self::StddevOverTime => "stddev_over_time",
            Self::StdvarOverTime => "stdvar_over_time",
            Self::LastOverTime => "last_over_time",
            Self::PresentOverTime => "present_over_time",
        }
    }
}

/// Which side of a vector match may contribute multiple series per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorMatchCardinality {
    #[default]
    OneToOne,
    /// `group_left`: many series on the left match one on the right.
    ManyToOne,
    /// `group_right`: one series on the left matches many on the right.
    OneToMany,
}

/// The `on`/`ignoring` + `group_left`/`group_right` descriptor of a binary
/// operation between two vectors.
#[derive(Debug, Clone, Default)]
pub struct VectorMatching {
    /// Join cardinality.
    pub card: VectorMatchCardinality,
    /// The label names the join key is computed over.
    pub matching_labels: Vec<String>,
    /// If true, `matching_labels` is an `on` list; otherwise `ignoring`.
    pub on: bool,
    /// Extra labels carried over from the one-side (`group_left(...)` list).
    pub include: Vec<String>,
}

impl VectorMatching {
    /// `on(labels)` matching.
    pub fn on<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            on: true,
            matching_labels: labels.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// `ignoring(labels)` matching.
    pub fn ignoring<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            on: false,
            matching_labels: labels.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// `group_left(include)`: the left side is the many-side.
    pub fn group_left<S: Into<String>>(mut self, include: impl IntoIterator<Item = S>) -> Self {
        self.card = VectorMatchCardinality::ManyToOne;
        self.include = include.into_iter().map(Into::into).collect();
        self
    }

    /// `group_right(include)`: the right side is the many-side.
    pub fn group_right<S: Into<String>>(mut self, include: impl IntoIterator<Item = S>) -> Self {
        self.card = VectorMatchCardinality::OneToMany;
        self.include = include.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for VectorMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.on {
            write!(f, "on({})", self.matching_labels.join(","))?;
        } else if !self.matching_labels.is_empty() {
            write!(f, "ignoring({})", self.matching_labels.join(","))?;
        }
        match self.card {
            VectorMatchCardinality::ManyToOne => write!(f, " group_left({})", self.include.join(","))?,
            VectorMatchCardinality::OneToMany => write!(f, " group_right({})", self.include.join(","))?,
            VectorMatchCardinality::OneToOne => {}
        }
        Ok(())
    }
}

/// Aggregation grouping: `by (labels)` or `without (labels)`.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub labels: Vec<String>,
    pub without: bool,
}

impl Grouping {
    /// `by (labels)`
    pub fn by<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            without: false,
        }
    }

    /// `without (labels)`
    pub fn without<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            without: true,
        }
    }
}

/// A query expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A scalar constant.
    NumberLiteral(f64),
    /// An instant-vector selection.
    VectorSelector(VectorSelector),
    /// A range-vector function over a matrix selection, e.g. `rate(m[60s])`.
    RangeCall {
        func: RangeFunc,
        selector: VectorSelector,
        range_ms: i64,
    },
    /// A binary operation between two expressions.
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        matching: VectorMatching,
        /// Comparison operators with the `bool` modifier emit 0/1.
        return_bool: bool,
    },
    /// An aggregation across series.
    Aggregate {
        func: AggregateFunc,
        grouping: Grouping,
        expr: Box<Expr>,
    },
}

impl Expr {
    /// A binary expression with default one-to-one matching.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::binary_with(op, lhs, rhs, VectorMatching::default())
    }

    /// A binary expression with an explicit matching descriptor.
    pub fn binary_with(op: BinaryOp, lhs: Expr, rhs: Expr, matching: VectorMatching) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            matching,
            return_bool: false,
        }
    }

    /// Set the `bool` modifier on a comparison.
    pub fn with_bool(mut self) -> Self {
        if let Self::Binary { return_bool, .. } = &mut self {
            *return_bool = true;
        }
        self
    }

    /// A range-vector function call.
    pub fn range(func: RangeFunc, selector: VectorSelector, range_ms: i64) -> Self {
        Self::RangeCall {
            func,
            selector,
            range_ms,
        }
    }

    /// An aggregation expression.
    pub fn aggregate(func: AggregateFunc, grouping: Grouping, expr: Expr) -> Self {
        Self::Aggregate {
            func,
            grouping,
            expr: Box::new(expr),
        }
    }
}

impl From<VectorSelector> for Expr {
    fn from(vs: VectorSelector) -> Self {
        Self::VectorSelector(vs)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NumberLiteral(v) => write!(f, "{v}"),
            Self::VectorSelector(vs) => write!(f, "{vs}"),
            Self::RangeCall {
                func,
                selector,
                range_ms,
            } => write!(f, "{}({selector}[{range_ms}ms])", func.name()),
            Self::Binary {
                op,
                lhs,
                rhs,
                matching,
                return_bool,
            } => {
                let bool_mod = if *return_bool { " bool" } else { "" };
                write!(f, "{lhs} {}{bool_mod} {matching} {rhs}", op.symbol())
            }
            Self::Aggregate {
                func,
                grouping,
                expr,
            } => {
                let kw = if grouping.without { "without" } else { "by" };
                if grouping.labels.is_empty() && !grouping.without {
                    write!(f, "{}({expr})", func.name())
                } else {
                    write!(f, "{} {kw} ({}) ({expr})", func.name(), grouping.labels.join(","))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_aggregate() {
        let expr = Expr::aggregate(
            AggregateFunc::Sum,
            Grouping::by(["pod"]),
            metric("http_requests").into(),
        );
        assert_eq!(expr.to_string(), r#"sum by (pod) (__name__="http_requests")"#);
    }

    #[test]
    fn test_display_rate() {
        let expr = Expr::range(RangeFunc::Rate, metric("m"), 60_000);
        assert_eq!(expr.to_string(), r#"rate(__name__="m"[60000ms])"#);
    }

    #[test]
    fn test_matching_builders() {
        let m = VectorMatching::on(["job", "instance"]).group_left(["region"]);
        assert!(m.on);
        assert_eq!(m.card, VectorMatchCardinality::ManyToOne);
        assert_eq!(m.include, vec!["region".to_string()]);
    }

    #[test]
    fn test_bool_modifier() {
        let expr = Expr::binary(BinaryOp::Gtr, metric("m").into(), number(1.0)).with_bool();
        match expr {
            Expr::Binary { return_bool, .. } => assert!(return_bool),
            _ => panic!("expected binary"),
        }
    }
}
