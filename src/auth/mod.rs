//! Credentials: OAuth token exchange and the process-wide client cache.

pub mod identity;
pub mod oauth;

pub use identity::{shared_client, ClientFactory, Identity, IdentityCache, RestClientFactory};
pub use oauth::{OAuthApp, TokenPair};
