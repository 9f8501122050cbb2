//! Public key authentication
//!
//! Loads authorized client keys and evaluates authentication attempts
//! against them. Policy: only the publickey method with an ed25519 key
//! whose raw encoded bytes exactly match a loaded entry is accepted.

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;

/// Key algorithm accepted by the policy
const ACCEPTED_ALGORITHM: &str = "ssh-ed25519";

/// Outcome of evaluating one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Attempt matches policy
    Accept,
    /// Attempt fails policy; the client may retry with publickey
    Reject,
}

/// Immutable set of authorized public keys, loaded once at startup
#[derive(Debug, Default)]
pub struct AuthorizedKeySet {
    /// Raw encoded key bytes of every authorized key
    keys: HashSet<Vec<u8>>,
}

impl AuthorizedKeySet {
    /// Create an empty key set (rejects everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load authorized keys from multiple files
    pub fn load_from_files(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut set = Self::new();

        for path in paths {
            let path = path.as_ref();

            // Expand ~ to home directory
            let expanded = if path.starts_with("~") {
                if let Some(home) = dirs::home_dir() {
                    home.join(path.strip_prefix("~").unwrap_or(path))
                } else {
                    path.to_path_buf()
                }
            } else {
                path.to_path_buf()
            };

            if expanded.exists() {
                set.load_from_file(&expanded)?;
            } else {
                tracing::warn!("Authorized keys file not found: {:?}", expanded);
            }
        }

        Ok(set)
    }

    /// Load authorized keys from a single OpenSSH-format file
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        tracing::info!("Loading authorized keys from {:?}", path);

        let file =
            std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;

        let reader = BufReader::new(file);
        let mut count = 0;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read line {} of {:?}", line_num + 1, path))?;
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_openssh_line(line) {
                Some(key) => {
                    tracing::debug!("Loaded key: {} ({})", key.fingerprint(), key.name());
                    self.keys.insert(key.public_key_bytes());
                    count += 1;
                }
                None => {
                    tracing::warn!(
                        "Failed to parse key on line {} of {:?}",
                        line_num + 1,
                        path
                    );
                }
            }
        }

        tracing::info!("Loaded {} authorized keys from {:?}", count, path);
        Ok(())
    }

    /// Add a public key to the set
    pub fn add_key(&mut self, key: &PublicKey) {
        self.keys.insert(key.public_key_bytes());
    }

    /// Check whether a key's raw encoded bytes are authorized
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.contains(&key.public_key_bytes())
    }

    /// Number of authorized keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if there are no authorized keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Evaluates authentication attempts against the authorized key set
#[derive(Debug, Default)]
pub struct Authenticator {
    keys: AuthorizedKeySet,
}

impl Authenticator {
    /// Create an authenticator over a loaded key set
    pub fn new(keys: AuthorizedKeySet) -> Self {
        Self { keys }
    }

    /// Evaluate a publickey attempt.
    ///
    /// Only ed25519 keys are considered; any other algorithm is
    /// rejected before the key set is consulted.
    pub fn evaluate_publickey(&self, key: &PublicKey) -> AuthDecision {
        if key.name() != ACCEPTED_ALGORITHM {
            return AuthDecision::Reject;
        }

        if self.keys.contains(key) {
            AuthDecision::Accept
        } else {
            AuthDecision::Reject
        }
    }

    /// Non-publickey methods (password, none) always fail policy
    pub fn evaluate_other_method(&self) -> AuthDecision {
        AuthDecision::Reject
    }
}

/// Parse an OpenSSH public key line (type base64 [comment])
fn parse_openssh_line(line: &str) -> Option<PublicKey> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 2 {
        // The base64 key is the second part
        russh_keys::parse_public_key_base64(parts[1]).ok()
    } else {
        // Bare base64 without a type prefix
        russh_keys::parse_public_key_base64(line).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh_keys::key::KeyPair;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn generate_key() -> (KeyPair, PublicKey) {
        let pair = KeyPair::generate_ed25519().unwrap();
        let public = pair.clone_public_key().unwrap();
        (pair, public)
    }

    fn write_keys_file(keys: &[&PublicKey]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# authorized keys").unwrap();
        writeln!(file).unwrap();
        for key in keys {
            writeln!(
                file,
                "ssh-ed25519 {} test@example.com",
                key.public_key_base64()
            )
            .unwrap();
        }
        file
    }

    #[test]
    fn test_load_authorized_keys() {
        let (_, public) = generate_key();
        let file = write_keys_file(&[&public]);

        let set = AuthorizedKeySet::load_from_files(&[file.path()]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&public));
    }

    #[test]
    fn test_skips_comments_and_garbage() {
        let (_, public) = generate_key();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "not a key at all").unwrap();
        writeln!(
            file,
            "ssh-ed25519 {} host",
            public.public_key_base64()
        )
        .unwrap();

        let set = AuthorizedKeySet::load_from_files(&[file.path()]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_missing_file_is_not_fatal() {
        let set =
            AuthorizedKeySet::load_from_files(&[Path::new("/nonexistent/authorized_keys")])
                .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_authorized_key_accepted() {
        let (_, public) = generate_key();
        let mut set = AuthorizedKeySet::new();
        set.add_key(&public);

        let auth = Authenticator::new(set);
        assert_eq!(auth.evaluate_publickey(&public), AuthDecision::Accept);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let (_, authorized) = generate_key();
        let (_, other) = generate_key();

        let mut set = AuthorizedKeySet::new();
        set.add_key(&authorized);

        let auth = Authenticator::new(set);
        assert_eq!(auth.evaluate_publickey(&other), AuthDecision::Reject);
    }

    #[test]
    fn test_non_ed25519_key_rejected_even_when_listed() {
        // Static RSA key; the algorithm gate fires before the set lookup
        let line = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQCiaa/7mBcBh3ocoY7cevpK1xuaJeHR1jNCZVWK8rot/S4F60yJcYD7VFKncA7KT5sylbxfbky6CCgKJBC4STZNRSKHvvdU154R2JDmt+ZzHnNy5wI8AypPZm7WhCgO53fuW5gy+frxYCqwHMPmX2uRjuIvyIlwkCucIdsBs16fua44C1u2QOZUzex+L69PBx+9ip+dtw65q6BF5eGahfh+Fy58RTyJnp3cIwM54aIEdDJElbXcLArygbJNKUGArB8eoQcP9lkbeESRU/q1bbsNStkzKCGu5ncQt/fy5yZQvK7oBjtxvoY2F+ZvYA9tttKPIYde73xBiZ+vDyS8XG2b";
        let rsa = parse_openssh_line(line).expect("fixture key must parse");
        assert_ne!(rsa.name(), ACCEPTED_ALGORITHM);

        let mut set = AuthorizedKeySet::new();
        set.add_key(&rsa);
        assert!(set.contains(&rsa));

        let auth = Authenticator::new(set);
        assert_eq!(auth.evaluate_publickey(&rsa), AuthDecision::Reject);
    }

    #[test]
    fn test_empty_set_rejects_everything() {
        let (_, public) = generate_key();
        let auth = Authenticator::new(AuthorizedKeySet::new());
        assert_eq!(auth.evaluate_publickey(&public), AuthDecision::Reject);
        assert_eq!(auth.evaluate_other_method(), AuthDecision::Reject);
    }
}
