//! Query building and live execution.
//!
//! - `transactor`: the business-logic contract and [`Query`]
//! - `builder`: [`OperationBuilder`] and [`ObservingTarget`]
//! - `prepared`: one-shot execution and relevance matching
//! - `subscription`: the live query driver

pub mod builder;
pub mod prepared;
pub mod subscription;
pub mod transactor;

pub use builder::{ObservingTarget, OperationBuilder};
pub use prepared::{is_relevant, PreparedOperation};
pub use subscription::Subscription;
pub use transactor::{Mode, Query, ReadOnly, ReadWrite, Transactor, TransactorResult};
