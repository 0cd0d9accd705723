//! Password hashing (PBKDF2-HMAC-SHA-256)
//!
//! Hash strings look like `pbkdf2-sha256$<iterations>$<salt b64url>$<hash b64url>`.

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use zeroize::Zeroizing;

use crate::base64url;
use crate::crypto;

pub const DEFAULT_ITERATIONS: u32 = 600_000;
pub const MIN_PASSWORD_LEN: usize = 8;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String, ErrorStack> {
        let salt = crypto::random_bytes(SALT_LEN)?;
        let derived = derive(password, &salt, self.iterations)?;
        Ok(format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            base64url::encode(&salt),
            base64url::encode(derived.as_slice())
        ))
    }

    /// Check `password` against a stored hash string. Malformed hashes never match.
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let Some((iterations, salt, expected)) = parse(encoded) else {
            tracing::warn!("Stored password hash is malformed");
            return false;
        };
        match derive(password, &salt, iterations) {
            Ok(derived) => crypto::constant_time_eq(derived.as_slice(), &expected),
            Err(e) => {
                tracing::error!(error = %e, "PBKDF2 derivation failed");
                false
            }
        }
    }

    /// Burn the same work as a real verification, for unknown accounts.
    pub fn dummy_verify(&self, password: &str) {
        let _ = derive(password, &[0u8; SALT_LEN], self.iterations);
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Zeroizing<Vec<u8>>, ErrorStack> {
    let mut out = Zeroizing::new(vec![0u8; HASH_LEN]);
    pbkdf2_hmac(
        password.as_bytes(),
        salt,
        iterations as usize,
        MessageDigest::sha256(),
        out.as_mut_slice(),
    )?;
    Ok(out)
}

fn parse(encoded: &str) -> Option<(u32, Vec<u8>, Vec<u8>)> {
    let mut parts = encoded.split('$');
    if parts.next()? != SCHEME {
        return None;
    }
    let iterations: u32 = parts.next()?.parse().ok().filter(|i| *i > 0)?;
    let salt = base64url::decode(parts.next()?).ok()?;
    let hash = base64url::decode(parts.next()?).ok()?;
    if parts.next().is_some() || hash.len() != HASH_LEN {
        return None;
    }
    Some((iterations, salt, hash))
}
