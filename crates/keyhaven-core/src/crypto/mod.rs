//! Cryptographic primitives shared by every crate

pub mod hash;
