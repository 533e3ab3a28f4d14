//! Bearer token providers.
//!
//! The engine never reads credentials from ambient state; callers inject a
//! `TokenProvider` into the transport and thread API.

use crate::error::{EngineError, EngineResult};

/// Environment variable read by [`EnvToken::default`].
pub const TOKEN_ENV_VAR: &str = "AGENTDESK_TOKEN";

/// Supplies the bearer token attached to backend requests.
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, or `None` when the user is signed out.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token (tests, scripted use).
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        let token = self.0.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

/// Reads the token from an environment variable on every request, so a
/// refreshed value is picked up without restarting.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

impl TokenProvider for EnvToken {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

/// Resolves a token or fails with a precondition error.
pub fn require_token(provider: &dyn TokenProvider) -> EngineResult<String> {
    provider.bearer_token().ok_or_else(|| {
        EngineError::auth(format!(
            "No bearer token available. Set {TOKEN_ENV_VAR} or sign in."
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_static_token_blank_is_missing() {
        assert_eq!(StaticToken("  ".to_string()).bearer_token(), None);
        assert_eq!(
            StaticToken(" abc ".to_string()).bearer_token().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_require_token_reports_auth_kind() {
        let err = require_token(&StaticToken(String::new())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[test]
    fn test_env_token_missing_var() {
        let provider = EnvToken::new("AGENTDESK_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert_eq!(provider.bearer_token(), None);
    }
}
