//! The three entry points of the resource: `check`, `in` and `out`.

pub mod check;
pub mod get;
pub mod put;
