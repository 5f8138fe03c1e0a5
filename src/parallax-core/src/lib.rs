//! Core data model for Parallax.
//!
//! `parallax-core` provides the label model, label matchers and sample types
//! shared by the storage adaptor and the execution engine.
//!
//! # Overview
//!
//! - [`Labels`]: an ordered, name-unique list of `(name, value)` pairs with
//!   deterministic 64-bit signatures over configurable label subsets
//! - [`LabelsBuilder`]: derive a label set by deleting or keeping names
//! - [`Matcher`]: label selection predicates (`=`, `!=`, `=~`, `!~`)
//! - [`Sample`]: a `(timestamp, value)` pair

pub mod labels;
pub mod matchers;
mod sample;

pub use labels::{Label, Labels, LabelsBuilder, METRIC_NAME};
pub use matchers::{MatchType, Matcher};
pub use sample::Sample;
