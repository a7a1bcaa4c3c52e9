//! Client authentication strategies.
//!
//! The handshake selects the wire exchange from the configured
//! [`AuthStrategy`]; credential verification itself is delegated to the
//! consumer through async callbacks. Every failure path produces a FATAL
//! `ErrorResponse` with SQLSTATE `28P01` and closes the connection.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use hmac::{Hmac, Mac};
use md5::{Digest as _, Md5};
use rand::Rng;
use sha2::{Digest as _, Sha256};

use crate::protocol::ErrorInfo;

/// Verifies a cleartext password. Receives the username and the password as
/// presented by the client.
pub type VerifyPasswordFn =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<bool, ErrorInfo>> + Send + Sync>;

/// Verifies an MD5-hashed password. Receives the username, the digest as
/// presented by the client (`md5<hex>`), and the salt that was sent in the
/// challenge. Use [`md5_password`] to compute the expected digest from a
/// known password.
pub type VerifyMd5Fn = Arc<
    dyn Fn(String, String, [u8; 4]) -> BoxFuture<'static, Result<bool, ErrorInfo>> + Send + Sync,
>;

/// Looks up the SCRAM verifier for a user. The proof exchange itself runs in
/// the core; the callback only supplies the stored credentials, typically
/// loaded from a `pg_authid`-style catalog or derived on the fly with
/// [`ScramSecret::derive`].
pub type ScramSecretFn =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<ScramSecret, ErrorInfo>> + Send + Sync>;

/// Authentication method negotiated during the handshake.
#[derive(Clone, Default)]
pub enum AuthStrategy {
    /// Accept every connection without credentials.
    #[default]
    Trust,
    /// Request a cleartext password and delegate verification.
    ClearText(VerifyPasswordFn),
    /// Request an MD5-hashed password and delegate verification.
    Md5(VerifyMd5Fn),
    /// Run a SCRAM-SHA-256 exchange (RFC 5802, channel binding disabled)
    /// against the stored verifier supplied by the callback.
    ScramSha256(ScramSecretFn),
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::Trust => write!(f, "Trust"),
            AuthStrategy::ClearText(_) => write!(f, "ClearText"),
            AuthStrategy::Md5(_) => write!(f, "Md5"),
            AuthStrategy::ScramSha256(_) => write!(f, "ScramSha256"),
        }
    }
}

/// Computes the PostgreSQL MD5 password digest:
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Stored SCRAM-SHA-256 verifier for one user.
#[derive(Clone)]
pub struct ScramSecret {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: [u8; 32],
    pub server_key: [u8; 32],
}

impl ScramSecret {
    /// Derives a verifier from a plaintext password (RFC 5802 §3).
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Self {
        let salted_password =
            pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password.as_bytes(), salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let stored_key = sha256(&client_key);
        Self {
            salt: salt.to_vec(),
            iterations,
            stored_key,
            server_key,
        }
    }

    /// Derives a verifier from a plaintext password with a random salt and
    /// the conventional 4096 iterations.
    pub fn generate(password: &str) -> Self {
        let salt: [u8; 16] = rand::thread_rng().gen();
        Self::derive(password, &salt, 4096)
    }
}

pub(crate) fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Server-side state of one SCRAM-SHA-256 exchange.
///
/// Drives the message contents; transport framing stays in the handshake.
pub(crate) struct ScramExchange {
    secret: ScramSecret,
    client_first_bare: String,
    server_first: String,
    combined_nonce: String,
}

/// SCRAM message-level failures, all surfaced to the client as `28P01`.
#[derive(Debug)]
pub(crate) enum ScramError {
    Malformed(&'static str),
    UnsupportedGs2Header,
    NonceMismatch,
    BadProof,
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::Malformed(what) => write!(f, "malformed SCRAM message: {}", what),
            ScramError::UnsupportedGs2Header => {
                write!(f, "channel binding is not supported")
            }
            ScramError::NonceMismatch => write!(f, "SCRAM nonce mismatch"),
            ScramError::BadProof => write!(f, "SCRAM proof verification failed"),
        }
    }
}

impl std::error::Error for ScramError {}

impl ScramExchange {
    /// Consumes the client-first-message and produces the
    /// server-first-message to send in `AuthenticationSASLContinue`.
    pub(crate) fn start(secret: ScramSecret, client_first: &str) -> Result<Self, ScramError> {
        // gs2 header: "n,," (no channel binding) or "y,," (client supports
        // none); "p=..." would demand channel binding, which is disabled.
        let bare = client_first
            .strip_prefix("n,,")
            .or_else(|| client_first.strip_prefix("y,,"))
            .ok_or(ScramError::UnsupportedGs2Header)?
            .to_string();

        let client_nonce = attribute(&bare, 'r').ok_or(ScramError::Malformed("missing nonce"))?;

        let server_nonce: [u8; 18] = rand::thread_rng().gen();
        let combined_nonce = format!("{}{}", client_nonce, BASE64.encode(server_nonce));

        let server_first = format!(
            "r={},s={},i={}",
            combined_nonce,
            BASE64.encode(&secret.salt),
            secret.iterations
        );

        Ok(Self {
            secret,
            client_first_bare: bare,
            server_first,
            combined_nonce,
        })
    }

    pub(crate) fn server_first(&self) -> &str {
        &self.server_first
    }

    /// Verifies the client-final-message and produces the
    /// server-final-message to send in `AuthenticationSASLFinal`.
    pub(crate) fn finish(self, client_final: &str) -> Result<String, ScramError> {
        let nonce = attribute(client_final, 'r').ok_or(ScramError::Malformed("missing nonce"))?;
        if nonce != self.combined_nonce {
            return Err(ScramError::NonceMismatch);
        }

        let proof_b64 =
            attribute(client_final, 'p').ok_or(ScramError::Malformed("missing proof"))?;
        let proof = BASE64
            .decode(proof_b64)
            .map_err(|_| ScramError::Malformed("proof is not valid base64"))?;

        let without_proof = client_final
            .split(',')
            .filter(|part| !part.starts_with("p="))
            .collect::<Vec<_>>()
            .join(",");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, without_proof
        );

        // ClientSignature = HMAC(StoredKey, AuthMessage)
        // ClientKey = ClientProof XOR ClientSignature
        // valid iff H(ClientKey) == StoredKey
        let client_signature = hmac_sha256(&self.secret.stored_key, auth_message.as_bytes());
        if proof.len() != client_signature.len() {
            return Err(ScramError::BadProof);
        }
        let mut client_key = [0u8; 32];
        for (i, byte) in client_key.iter_mut().enumerate() {
            *byte = proof[i] ^ client_signature[i];
        }
        if sha256(&client_key) != self.secret.stored_key {
            return Err(ScramError::BadProof);
        }

        let server_signature = hmac_sha256(&self.secret.server_key, auth_message.as_bytes());
        Ok(format!("v={}", BASE64.encode(server_signature)))
    }
}

/// Extracts a `<name>=<value>` attribute from a SCRAM message.
fn attribute(message: &str, name: char) -> Option<&str> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        (chars.next() == Some(name) && chars.next() == Some('=')).then(|| &part[2..])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_password_shape() {
        let digest = md5_password("alice", "secret", [1, 2, 3, 4]);
        assert!(digest.starts_with("md5"));
        assert_eq!(digest.len(), 3 + 32);
        // Deterministic for the same inputs.
        assert_eq!(digest, md5_password("alice", "secret", [1, 2, 3, 4]));
        // Salt changes the digest.
        assert_ne!(digest, md5_password("alice", "secret", [4, 3, 2, 1]));
    }

    /// Simulates the client side of the SCRAM exchange for a known password.
    fn client_final_for(
        password: &str,
        client_first_bare: &str,
        server_first: &str,
    ) -> String {
        let salt = BASE64
            .decode(attribute(server_first, 's').unwrap())
            .unwrap();
        let iterations: u32 = attribute(server_first, 'i').unwrap().parse().unwrap();
        let nonce = attribute(server_first, 'r').unwrap();

        let salted_password =
            pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password.as_bytes(), &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        let without_proof = format!("c={},r={}", BASE64.encode(b"n,,"), nonce);
        let auth_message = format!(
            "{},{},{}",
            client_first_bare, server_first, without_proof
        );
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();
        format!("{},p={}", without_proof, BASE64.encode(proof))
    }

    #[test]
    fn test_scram_exchange_accepts_correct_password() {
        let secret = ScramSecret::derive("hunter2", b"0123456789abcdef", 4096);
        let client_first = "n,,n=alice,r=clientnonce";

        let exchange = ScramExchange::start(secret, client_first).unwrap();
        let server_first = exchange.server_first().to_string();
        assert!(attribute(&server_first, 'r').unwrap().starts_with("clientnonce"));
        assert_eq!(attribute(&server_first, 'i'), Some("4096"));

        let client_final = client_final_for("hunter2", "n=alice,r=clientnonce", &server_first);
        let server_final = exchange.finish(&client_final).unwrap();
        assert!(server_final.starts_with("v="));
    }

    #[test]
    fn test_scram_exchange_rejects_wrong_password() {
        let secret = ScramSecret::derive("hunter2", b"0123456789abcdef", 4096);
        let client_first = "n,,n=alice,r=clientnonce";

        let exchange = ScramExchange::start(secret, client_first).unwrap();
        let server_first = exchange.server_first().to_string();

        let client_final = client_final_for("wrong", "n=alice,r=clientnonce", &server_first);
        assert!(matches!(
            exchange.finish(&client_final),
            Err(ScramError::BadProof)
        ));
    }

    #[test]
    fn test_scram_rejects_channel_binding() {
        let secret = ScramSecret::generate("pw");
        assert!(matches!(
            ScramExchange::start(secret, "p=tls-server-end-point,,n=alice,r=x"),
            Err(ScramError::UnsupportedGs2Header)
        ));
    }

    #[test]
    fn test_scram_rejects_tampered_nonce() {
        let secret = ScramSecret::derive("hunter2", b"salt", 4096);
        let exchange = ScramExchange::start(secret, "n,,n=alice,r=abc").unwrap();
        let client_final = format!("c={},r=evilnonce,p=AAAA", BASE64.encode(b"n,,"));
        assert!(matches!(
            exchange.finish(&client_final),
            Err(ScramError::NonceMismatch)
        ));
    }

    #[test]
    fn test_derive_matches_generate_roundtrip() {
        let secret = ScramSecret::derive("pw", b"fixed-salt", 4096);
        let again = ScramSecret::derive("pw", b"fixed-salt", 4096);
        assert_eq!(secret.stored_key, again.stored_key);
        assert_eq!(secret.server_key, again.server_key);
    }
}
