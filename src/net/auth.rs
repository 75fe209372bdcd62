//! Challenge-Response Authentication
//!
//! Gates every session before it sees any tick traffic. The server issues
//! a fresh challenge over the text-framed stream; the client proves it
//! holds the shared secret by returning `Base64(HMAC-SHA256(secret,
//! challenge))`. Verification is constant-time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::net::session::Session;
use crate::net::NetError;

type HmacSha256 = Hmac<Sha256>;

/// Challenge line prefix, server to client.
pub const AUTH_CHALLENGE_PREFIX: &str = "AUTH_CHALLENGE|";
/// Response line prefix, client to server.
pub const AUTH_RESPONSE_PREFIX: &str = "AUTH_RESPONSE|";
/// Success line, server to client.
pub const AUTH_SUCCESS_LINE: &str = "AUTH_SUCCESS";
/// Failure line, server to client.
pub const AUTH_FAILED_LINE: &str = "AUTH_FAILED";

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No response arrived within the window.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The response line did not carry the expected prefix.
    #[error("malformed response line")]
    MalformedResponse,

    /// The HMAC did not verify. Wrong secret or tampered challenge.
    #[error("response verification failed")]
    Mismatch,

    /// Stream error during the exchange.
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Runs the challenge-response exchange for new sessions.
pub struct Authenticator {
    secret: Vec<u8>,
    response_timeout: Duration,
}

impl Authenticator {
    /// Build an authenticator around the shared secret.
    pub fn new(secret: impl Into<Vec<u8>>, response_timeout: Duration) -> Self {
        Self {
            secret: secret.into(),
            response_timeout,
        }
    }

    /// Generate a fresh challenge: `<unix-seconds>:<base64 of 16 random
    /// bytes>`. The random component makes reuse across sessions
    /// vanishingly unlikely.
    pub fn issue_challenge(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut entropy = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut entropy);

        format!("{}:{}", now, BASE64.encode(entropy))
    }

    /// Run the exchange on a freshly bound session. On success the session
    /// is marked authenticated and `AUTH_SUCCESS` is sent; on any failure
    /// `AUTH_FAILED` is sent if the stream is still writable, and the
    /// caller is expected to disconnect the session.
    pub async fn authenticate(&self, session: &Session) -> Result<(), AuthError> {
        let result = self.run_exchange(session).await;

        match result {
            Ok(()) => {
                session.mark_authenticated();
                session.stream().write_line(AUTH_SUCCESS_LINE).await?;
                Ok(())
            }
            Err(e) => {
                debug!(session = session.id(), error = %e, "authentication failed");
                let _ = session.stream().write_line(AUTH_FAILED_LINE).await;
                Err(e)
            }
        }
    }

    async fn run_exchange(&self, session: &Session) -> Result<(), AuthError> {
        let challenge = self.issue_challenge();

        let exchange = async {
            session
                .stream()
                .write_line(&format!("{}{}", AUTH_CHALLENGE_PREFIX, challenge))
                .await?;
            session.stream().read_line().await
        };

        let line = timeout(self.response_timeout, exchange)
            .await
            .map_err(|_| AuthError::Timeout(self.response_timeout))??;

        let response = line
            .strip_prefix(AUTH_RESPONSE_PREFIX)
            .ok_or(AuthError::MalformedResponse)?;

        if verify_response(&self.secret, &challenge, response) {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

/// The response a holder of `secret` should produce for `challenge`.
/// Public so native clients and tests can complete the exchange.
pub fn expected_response(secret: &[u8], challenge: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(challenge.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a Base64 response against the expected
/// HMAC for `challenge`.
pub fn verify_response(secret: &[u8], challenge: &str, response: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(challenge.as_bytes());

    let Ok(raw) = BASE64.decode(response) else {
        return false;
    };
    mac.verify_slice(&raw).is_ok()
}
