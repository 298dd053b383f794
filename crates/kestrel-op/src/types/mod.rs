//! Domain types shared by the provider components.

pub mod client;
pub mod session;
pub mod token;

pub use client::{Client, ClientValidationError, GrantType, SubjectType, TokenEndpointAuthMethod};
pub use session::{AuthnEvent, Grant, Session, SessionState};
pub use token::{AuthorizationCode, TokenKind, TokenRecord};
