//! Ambient AWS credentials.
//!
//! [`DefaultCredentials`] resolves through the standard AWS provider chain
//! (environment, shared profile, container endpoint, instance metadata), so
//! the runtime picks up role credentials when hosted and access keys when
//! run locally. Resolved credentials are reused until shortly before they
//! expire.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PlatformError;

/// Credentials closer than this to expiry are fetched again.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// An access key pair with an optional session token.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

impl From<&aws_credential_types::Credentials> for Credentials {
    fn from(creds: &aws_credential_types::Credentials) -> Self {
        Self {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(str::to_string),
        }
    }
}

// Never print the secret half.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Source of credentials for signing.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, PlatformError>;
}

/// The AWS default credential chain, with expiry-aware reuse.
pub struct DefaultCredentials {
    provider: SharedCredentialsProvider,
    cached: Mutex<Option<aws_credential_types::Credentials>>,
}

impl DefaultCredentials {
    /// Resolve the default chain for `region`.
    pub async fn load(region: &str) -> Result<Self, PlatformError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            PlatformError::MissingCredentials("no credential provider in the default chain".into())
        })?;
        Ok(Self::from_provider(provider))
    }

    pub fn from_provider(provider: SharedCredentialsProvider) -> Self {
        Self {
            provider,
            cached: Mutex::new(None),
        }
    }
}

fn still_fresh(creds: &aws_credential_types::Credentials) -> bool {
    match creds.expiry() {
        None => true,
        Some(expiry) => SystemTime::now() + REFRESH_MARGIN < expiry,
    }
}

#[async_trait]
impl CredentialsProvider for DefaultCredentials {
    async fn credentials(&self) -> Result<Credentials, PlatformError> {
        let mut cached = self.cached.lock().await;
        if let Some(creds) = cached.as_ref().filter(|c| still_fresh(c)) {
            return Ok(Credentials::from(creds));
        }
        let fresh = self
            .provider
            .provide_credentials()
            .await
            .map_err(|e| PlatformError::MissingCredentials(error_chain(&e)))?;
        debug!(expiry = ?fresh.expiry(), "Resolved AWS credentials");
        let resolved = Credentials::from(&fresh);
        *cached = Some(fresh);
        Ok(resolved)
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl std::fmt::Debug for DefaultCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCredentials").finish_non_exhaustive()
    }
}

/// Fixed credentials, for tests and explicit wiring.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials, PlatformError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::provider::error::CredentialsError;
    use aws_credential_types::provider::future;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Counting {
        calls: Arc<AtomicUsize>,
        expires_in: Option<Duration>,
    }

    impl ProvideCredentials for Counting {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            future::ProvideCredentials::ready(Ok(aws_credential_types::Credentials::new(
                format!("AKID{n}"),
                "secret",
                Some("token".into()),
                self.expires_in.map(|d| SystemTime::now() + d),
                "counting",
            )))
        }
    }

    #[derive(Debug)]
    struct Unavailable;

    impl ProvideCredentials for Unavailable {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            future::ProvideCredentials::ready(Err(CredentialsError::not_loaded(
                "no container endpoint",
            )))
        }
    }

    fn chain(expires_in: Option<Duration>) -> (DefaultCredentials, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = SharedCredentialsProvider::new(Counting {
            calls: calls.clone(),
            expires_in,
        });
        (DefaultCredentials::from_provider(provider), calls)
    }

    #[tokio::test]
    async fn chain_credentials_carry_session_token() {
        let (creds, _) = chain(None);
        let resolved = creds.credentials().await.unwrap();
        assert_eq!(resolved.access_key_id, "AKID0");
        assert_eq!(resolved.session_token.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn long_lived_credentials_are_reused() {
        let (creds, calls) = chain(Some(Duration::from_secs(3600)));
        creds.credentials().await.unwrap();
        let second = creds.credentials().await.unwrap();
        assert_eq!(second.access_key_id, "AKID0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nearly_expired_credentials_are_refetched() {
        let (creds, calls) = chain(Some(Duration::from_secs(60)));
        creds.credentials().await.unwrap();
        let second = creds.credentials().await.unwrap();
        assert_eq!(second.access_key_id, "AKID1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_missing_credentials() {
        let creds = DefaultCredentials::from_provider(SharedCredentialsProvider::new(Unavailable));
        let err = creds.credentials().await.unwrap_err();
        assert!(matches!(err, PlatformError::MissingCredentials(_)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::new("AKID", "super-secret", Some("tok".into()));
        let printed = format!("{creds:?}");
        assert!(printed.contains("AKID"));
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("tok\""));
    }
}
