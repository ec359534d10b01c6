//! Single-use signed approval tokens.
//!
//! - [`codec::TokenCodec`] signs and verifies the compact HS256 payload.
//! - [`issuer::TokenIssuer`] mints tokens and persists their records first.
//! - [`validator::TokenValidator`] validates (read-only) and redeems (one
//!   conditional write).

pub mod codec;
pub mod issuer;
pub mod validator;

pub use codec::TokenCodec;
pub use issuer::{TokenIssuer, TokenPair};
pub use validator::TokenValidator;
