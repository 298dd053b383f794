//! Token signing, key management and issuance.

pub mod issuer;
pub mod jwt;
pub mod keys;

pub use issuer::{IssuedToken, RequestIssuer, TokenIssuer, VerifiedToken};
pub use jwt::{Jwk, Jwks, JwtError, SigningAlgorithm, SigningKeyPair};
pub use keys::{KeyRing, KeySet};
