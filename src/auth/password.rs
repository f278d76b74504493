use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::config::HashingConfig;

#[derive(Debug, thiserror::Error)]
pub enum HashingError {
    #[error("invalid argon2 parameters: {0}")]
    Params(argon2::Error),
    #[error("argon2 hash_password error: {0}")]
    Hash(password_hash::Error),
    #[error("stored password hash is malformed: {0}")]
    Malformed(password_hash::Error),
}

/// Argon2id hasher with configurable cost. Each hash embeds its own salt
/// and parameters, so raising the cost later does not break old hashes.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
}

impl CredentialHasher {
    pub fn new(cfg: &HashingConfig) -> Result<Self, HashingError> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(HashingError::Params)?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plain: &str) -> Result<String, HashingError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashingError::Hash(e)
            })?
            .to_string();
        Ok(hash)
    }

    /// `Ok(false)` on a wrong password, `Err` only when `hash` cannot be used.
    pub fn verify(&self, hash: &str, plain: &str) -> Result<bool, HashingError> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            HashingError::Malformed(e)
        })?;
        match self.argon2().verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => {
                error!(error = %e, "argon2 verify_password error");
                Err(HashingError::Hash(e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    CredentialHasher::new(&HashingConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
    .expect("cheap argon2 params are valid")
}
