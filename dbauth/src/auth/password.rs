//! Password hashing and verification.
//!
//! New hashes are written in a self-describing form so verification never depends on the
//! current configuration:
//!
//! - `pbkdf2_sha256$<iterations>$<hex digest>`
//! - `argon2id$<memory_kib>,<iterations>,<parallelism>$<hex digest>`
//!
//! A bare 64-character hex digest is read as PBKDF2-HMAC-SHA256 with 100,000 iterations, the
//! format written by earlier deployments. In every case the salt is stored separately as a hex
//! string and its text is fed to the KDF as the salt input.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use sha2::Sha256;
use tracing::warn;

use crate::{
    config::{PasswordAlgorithm, PasswordConfig},
    errors::Error,
};

/// PBKDF2 iteration count used when none is configured, and for legacy bare-hex hashes.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Random salt bytes per password (hex-encoded to 64 characters).
const SALT_BYTES: usize = 32;

/// Derived key length: 256 bits.
const DIGEST_BYTES: usize = 32;

const PBKDF2_PREFIX: &str = "pbkdf2_sha256";
const ARGON2_PREFIX: &str = "argon2id";

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    /// Create Argon2 instance with these parameters.
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(DIGEST_BYTES)).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// KDF and cost parameters for one hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashParams {
    Pbkdf2Sha256 { iterations: u32 },
    Argon2id(Argon2Params),
}

impl Default for HashParams {
    fn default() -> Self {
        HashParams::Pbkdf2Sha256 {
            iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

impl HashParams {
    /// Parameters for newly written hashes.
    pub fn from_config(config: &PasswordConfig) -> Self {
        match config.algorithm {
            PasswordAlgorithm::Pbkdf2Sha256 => HashParams::Pbkdf2Sha256 {
                iterations: config.pbkdf2_iterations,
            },
            PasswordAlgorithm::Argon2id => HashParams::Argon2id(Argon2Params {
                memory_kib: config.argon2_memory_kib,
                iterations: config.argon2_iterations,
                parallelism: config.argon2_parallelism,
            }),
        }
    }

    fn encode(&self, digest: &[u8]) -> String {
        match self {
            HashParams::Pbkdf2Sha256 { iterations } => format!("{PBKDF2_PREFIX}${iterations}${}", hex::encode(digest)),
            HashParams::Argon2id(p) => format!(
                "{ARGON2_PREFIX}${},{},{}${}",
                p.memory_kib,
                p.iterations,
                p.parallelism,
                hex::encode(digest)
            ),
        }
    }

    /// Split a stored hash into its parameters and raw digest.
    fn decode(stored: &str) -> Result<(Self, Vec<u8>), Error> {
        let malformed = || Error::Internal {
            operation: "parse stored password hash: unrecognised format".to_string(),
        };

        let mut parts = stored.splitn(3, '$');
        let (params, digest_hex) = match (parts.next(), parts.next(), parts.next()) {
            (Some(PBKDF2_PREFIX), Some(iterations), Some(digest)) => {
                let iterations = iterations.parse::<u32>().map_err(|_| malformed())?;
                if iterations == 0 {
                    return Err(malformed());
                }
                (HashParams::Pbkdf2Sha256 { iterations }, digest)
            }
            (Some(ARGON2_PREFIX), Some(cost), Some(digest)) => {
                let mut cost = cost.split(',').map(str::parse::<u32>);
                let (Some(Ok(memory_kib)), Some(Ok(iterations)), Some(Ok(parallelism)), None) =
                    (cost.next(), cost.next(), cost.next(), cost.next())
                else {
                    return Err(malformed());
                };
                (
                    HashParams::Argon2id(Argon2Params {
                        memory_kib,
                        iterations,
                        parallelism,
                    }),
                    digest,
                )
            }
            (Some(legacy), None, None) if legacy.len() == DIGEST_BYTES * 2 => (HashParams::default(), legacy),
            _ => return Err(malformed()),
        };

        let digest = hex::decode(digest_hex).map_err(|_| malformed())?;
        if digest.len() != DIGEST_BYTES {
            return Err(malformed());
        }
        Ok((params, digest))
    }

    fn derive(&self, password: &str, salt: &str) -> Result<[u8; DIGEST_BYTES], Error> {
        let mut out = [0u8; DIGEST_BYTES];
        match self {
            HashParams::Pbkdf2Sha256 { iterations } => {
                pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), *iterations, &mut out);
            }
            HashParams::Argon2id(p) => {
                p.to_argon2()?
                    .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut out)
                    .map_err(|e| Error::Internal {
                        operation: format!("hash password: {e}"),
                    })?;
            }
        }
        Ok(out)
    }
}

/// A freshly derived password hash and the salt it was derived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    pub hash: String,
    pub salt: String,
}

/// Generate a hex-encoded random salt.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with a new random salt and the given parameters.
///
/// This is CPU-bound; call it from `tokio::task::spawn_blocking` in async code.
pub fn hash_password_with_params(password: &str, params: HashParams) -> Result<PasswordDigest, Error> {
    let salt = generate_salt();
    let digest = params.derive(password, &salt)?;
    Ok(PasswordDigest {
        hash: params.encode(&digest),
        salt,
    })
}

/// Hash a password with PBKDF2-HMAC-SHA256 at 100,000 iterations.
pub fn hash_password(password: &str) -> Result<PasswordDigest, Error> {
    hash_password_with_params(password, HashParams::default())
}

/// Verify a password against a stored hash and salt.
///
/// Verification uses the parameters embedded in the hash itself and compares digests in
/// constant time. A row whose hash or salt is empty or cannot be parsed never verifies.
pub fn verify_password(password: &str, stored_hash: &str, salt: &str) -> bool {
    if stored_hash.is_empty() || salt.is_empty() {
        warn!("Stored password hash or salt is empty; treating as a mismatch");
        return false;
    }
    let (params, expected) = match HashParams::decode(stored_hash) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "Stored password hash is unusable; treating as a mismatch");
            return false;
        }
    };
    match params.derive(password, salt) {
        Ok(actual) => constant_time_eq(&actual, &expected),
        Err(e) => {
            warn!(error = %e, "Stored password hash parameters are unusable; treating as a mismatch");
            false
        }
    }
}

/// Whether a stored hash and salt could ever verify a password.
pub fn is_usable_hash(stored_hash: &str, salt: &str) -> bool {
    !salt.is_empty() && HashParams::decode(stored_hash).is_ok()
}

/// Check a candidate password against the configured length policy.
pub fn check_policy(password: &str, config: &PasswordConfig) -> Result<(), Error> {
    let length = password.chars().count();
    if length < config.min_length {
        return Err(Error::invalid(
            "password",
            format!("must be at least {} characters", config.min_length),
        ));
    }
    if length > config.max_length {
        return Err(Error::invalid(
            "password",
            format!("must be no more than {} characters", config.max_length),
        ));
    }
    Ok(())
}

/// Generate a random password for accounts created without one
pub fn generate_random_password() -> String {
    // 24 bytes gives 32 base64url characters
    let mut bytes = [0u8; 24];
    rng().fill(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time byte comparison to prevent timing attacks.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keep unit tests fast; the default cost is exercised once below
    const FAST: HashParams = HashParams::Pbkdf2Sha256 { iterations: 1_000 };
    const FAST_ARGON2: HashParams = HashParams::Argon2id(Argon2Params {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    });

    #[test]
    fn test_password_hashing() {
        let digest = hash_password_with_params("test_password_123", FAST).unwrap();

        assert!(digest.hash.starts_with("pbkdf2_sha256$1000$"));
        assert_eq!(digest.salt.len(), SALT_BYTES * 2);

        assert!(verify_password("test_password_123", &digest.hash, &digest.salt));
        assert!(!verify_password("wrong_password", &digest.hash, &digest.salt));
    }

    #[test]
    fn test_default_parameters() {
        let digest = hash_password("password123").unwrap();
        assert!(digest.hash.starts_with("pbkdf2_sha256$100000$"));
        assert!(verify_password("password123", &digest.hash, &digest.salt));
    }

    #[test]
    fn test_argon2_hashing() {
        let digest = hash_password_with_params("test_password_123", FAST_ARGON2).unwrap();

        assert!(digest.hash.starts_with("argon2id$64,1,1$"));
        assert!(verify_password("test_password_123", &digest.hash, &digest.salt));
        assert!(!verify_password("test_password_124", &digest.hash, &digest.salt));
    }

    #[test]
    fn test_same_input_different_hashes() {
        let first = hash_password_with_params("same_password", FAST).unwrap();
        let second = hash_password_with_params("same_password", FAST).unwrap();

        // Same input should produce different hashes due to salt
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn test_wrong_salt_fails() {
        let digest = hash_password_with_params("password123", FAST).unwrap();
        let other_salt = generate_salt();
        assert!(!verify_password("password123", &digest.hash, &other_salt));
    }

    #[test]
    fn test_legacy_bare_hex_hash() {
        // Older rows hold only the hex digest: PBKDF2-HMAC-SHA256, 100k iterations, salt text as input
        let salt = "a3f1c2d4e5b6a7980112233445566778899aabbccddeeff00112233445566778";
        let mut digest = [0u8; DIGEST_BYTES];
        pbkdf2::pbkdf2_hmac::<Sha256>(b"dbgpt2024", salt.as_bytes(), DEFAULT_PBKDF2_ITERATIONS, &mut digest);
        let stored = hex::encode(digest);

        assert!(verify_password("dbgpt2024", &stored, salt));
        assert!(!verify_password("dbgpt2025", &stored, salt));
    }

    #[test]
    fn test_unusable_hash_never_verifies() {
        let salt = generate_salt();
        assert!(!verify_password("x", "", &salt));
        assert!(!verify_password("x", "not-a-hash", &salt));
        assert!(!verify_password("x", "pbkdf2_sha256$abc$00", &salt));
        assert!(!verify_password("x", "argon2id$1,2$00", &salt));
        assert!(!verify_password("x", "pbkdf2_sha256$1000$zz", &salt));
        let zero_rounds = format!("pbkdf2_sha256$0${}", "00".repeat(DIGEST_BYTES));
        assert!(!verify_password("x", &zero_rounds, &salt));
        // Argon2 rejects a zero time cost
        let zero_cost = format!("argon2id$19456,0,1${}", "00".repeat(DIGEST_BYTES));
        assert!(!verify_password("x", &zero_cost, &salt));
    }

    #[test]
    fn test_is_usable_hash() {
        let digest = hash_password_with_params("password123", FAST).unwrap();
        assert!(is_usable_hash(&digest.hash, &digest.salt));
        assert!(!is_usable_hash(&digest.hash, ""));
        assert!(!is_usable_hash("", &digest.salt));
        assert!(!is_usable_hash("not-a-hash", &digest.salt));
    }

    #[test]
    fn test_empty_salt_never_verifies() {
        let digest = hash_password_with_params("password123", FAST).unwrap();
        assert!(!verify_password("password123", &digest.hash, ""));
    }

    #[test]
    fn test_params_from_config() {
        let mut config = PasswordConfig::default();
        assert_eq!(HashParams::from_config(&config), HashParams::default());

        config.algorithm = PasswordAlgorithm::Argon2id;
        assert_eq!(HashParams::from_config(&config), HashParams::Argon2id(Argon2Params::default()));
    }

    #[test]
    fn test_check_policy() {
        let config = PasswordConfig {
            min_length: 8,
            max_length: 12,
            ..Default::default()
        };

        assert!(check_policy("12345678", &config).is_ok());
        assert!(matches!(check_policy("1234567", &config), Err(Error::InvalidInput { .. })));
        assert!(matches!(check_policy("1234567890123", &config), Err(Error::InvalidInput { .. })));
        // Counted in characters, not bytes
        assert!(check_policy("pässwörd", &config).is_ok());
    }

    #[test]
    fn test_generate_random_password() {
        let first = generate_random_password();
        let second = generate_random_password();

        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
