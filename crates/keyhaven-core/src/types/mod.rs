//! Shared identifier types

pub mod identifiers;
