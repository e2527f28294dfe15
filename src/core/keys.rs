use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("private key is empty")]
    MissingPrivate,
    #[error("public key is empty")]
    MissingPublic,
}

/// Credentials supplied by the operator for one bootstrap session.
///
/// Both halves are opaque to this crate; they are only forwarded to the node
/// process and to the dashboard handoff. `Debug` never prints the private key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    private_key: String,
    public_key: String,
}

impl KeyPair {
    pub fn new(
        private_key: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let private_key = private_key.into();
        let public_key = public_key.into();
        if private_key.trim().is_empty() {
            return Err(KeyError::MissingPrivate);
        }
        if public_key.trim().is_empty() {
            return Err(KeyError::MissingPublic);
        }
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Raw private key, for the node start command and the dashboard handoff only.
    pub fn expose_private(&self) -> &str {
        &self.private_key
    }

    /// Short, log-safe identifier derived from the public key.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.public_key.as_bytes());
        digest[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.fingerprint())
            .field("private", &"<redacted>")
            .finish()
    }
}
