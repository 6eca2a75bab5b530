//! Credential handling for minichat.
//!
//! Tokens are stateless HS256 JWTs, so any replica holding the secret can
//! verify them. The [`Authenticator`] is the single verification core used by
//! both the HTTP middleware and the WebSocket handshake.

pub mod authenticator;
pub mod identity;
pub mod password;
pub mod token;

pub use authenticator::{AuthenticatedUser, Authenticator, bearer_token};
pub use identity::{Identity, IdentityStore};
pub use token::{Claims, TokenError, TokenService};
