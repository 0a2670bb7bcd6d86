//! Keyhaven Crypto - secret sharing for key backup
//!
//! - [`gf256`]: field arithmetic over GF(2^8) with polynomial 0x11B
//! - [`polynomial`]: Horner evaluation and Lagrange interpolation
//! - [`shamir`]: `M`-of-`N` split and reconstruct
//! - [`encoding`]: checksummed portable text form of a share

#![forbid(unsafe_code)]

pub mod encoding;
pub mod gf256;
pub mod polynomial;
pub mod shamir;

pub use encoding::{decode_share, encode_share, SHARE_PREFIX};
pub use polynomial::{interpolate_at_zero, Polynomial};
pub use shamir::{
    reconstruct, split, split_secret, SecretShare, ShamirParams, MAX_SHARES, MIN_THRESHOLD,
};
pub use zeroize::Zeroizing;
