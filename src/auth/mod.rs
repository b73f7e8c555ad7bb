mod provider;

pub use provider::{AuthError, CredentialProvider, StaticTokenProvider};
