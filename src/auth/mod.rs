//! Authentication for providers that need more than a static key.
//!
//! Currently this is the OAuth2 client-credentials flow used by the agent
//! backend: exchange, cache, and refresh-once-on-rejection.

mod token;

pub use token::{TokenManager, DEFAULT_AUTH_URL};
