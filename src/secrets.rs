//! Sealing and storing repository secrets.
//!
//! Secrets are encrypted client-side against the repository's public key
//! before upload. The cipher itself is pluggable through [`SecretSealer`];
//! [`ReadySealer`] adds base64 handling and a once-only async readiness
//! step, and [`store_secret`] wires it to the client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::client::ApiClient;
use crate::error::{ChainError, Result};
use crate::request::project;

/// Length of a curve25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A sealed-box style cipher.
#[async_trait]
pub trait SecretSealer: Send + Sync {
    /// One-time setup (e.g. loading a crypto library). Called at most once
    /// per [`ReadySealer`].
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Encrypt `plaintext` for the holder of `public_key`.
    fn seal(&self, public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Wraps a [`SecretSealer`] with memoised initialisation and base64 I/O.
///
/// A failed `init` is not remembered; the next `seal` retries it. Put the
/// `ReadySealer` in a `static` or share it behind an `Arc` to initialise
/// once per process.
pub struct ReadySealer<S> {
    inner: S,
    ready: OnceCell<()>,
}

impl<S: SecretSealer> ReadySealer<S> {
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            ready: OnceCell::const_new(),
        }
    }

    /// Run the inner sealer's `init` unless it already succeeded.
    pub async fn ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                debug!("initialising secret sealer");
                self.inner.init().await
            })
            .await
            .map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Seal `plaintext` for a base64 public key; returns base64 ciphertext.
    pub async fn seal(&self, public_key_b64: &str, plaintext: &str) -> Result<String> {
        self.ready().await?;
        let key = STANDARD
            .decode(public_key_b64.trim())
            .map_err(|e| ChainError::Encryption(format!("public key is not valid base64: {}", e)))?;
        if key.len() != PUBLIC_KEY_LEN {
            return Err(ChainError::Encryption(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LEN,
                key.len()
            )));
        }
        let sealed = self.inner.seal(&key, plaintext.as_bytes())?;
        Ok(STANDARD.encode(sealed))
    }
}

impl<S> std::fmt::Debug for ReadySealer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySealer")
            .field("ready", &self.ready.initialized())
            .finish()
    }
}

fn text_field(data: &Value, field: &str) -> Result<String> {
    match project(data.clone(), field)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Create or update secret `name` on `owner/repo`.
///
/// Fetches the repository public key, seals `value` against it and stores
/// the ciphertext under the key's id.
pub async fn store_secret<S: SecretSealer>(
    client: &dyn ApiClient,
    sealer: &ReadySealer<S>,
    owner: &str,
    repo: &str,
    name: &str,
    value: &str,
) -> Result<()> {
    let key = client.get_public_key(owner, repo).await?.data;
    let key_id = text_field(&key, "key_id")?;
    let public_key = text_field(&key, "key")?;

    let sealed = sealer.seal(&public_key, value).await.inspect_err(|e| {
        warn!(owner, repo, secret = name, error = %e, "sealing secret failed");
    })?;
    client
        .put_secret(owner, repo, name, &sealed, &key_id)
        .await?;
    debug!(owner, repo, secret = name, key_id = %key_id, "secret stored");
    Ok(())
}
