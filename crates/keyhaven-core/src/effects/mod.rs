//! Effect interfaces
//!
//! Every side effect the recovery core needs is reached through one of these traits.
//! Services take their effect handler as a generic parameter; `Arc<T>` implements every
//! trait `T` does so handlers can be shared between services.

pub mod ledger;
pub mod random;
pub mod time;
pub mod transport;
