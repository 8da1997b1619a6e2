//! Registration credentials.
//!
//! Producers present the shared producer secret. Operators and observers
//! present a session token: `base64url(claims).hex(hmac_sha256(claims))`,
//! signed with the session secret and scoped to a role and optionally a
//! project.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use vigil_types::{AuthConfig, ProjectId, VigilError};

use crate::protocol::{ClientRole, Registration};

type HmacSha256 = Hmac<Sha256>;

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        let _ = a.ct_eq(a);
        return false;
    }
    a.ct_eq(b).into()
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub role: ClientRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectId>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

impl SessionClaims {
    /// Whether these claims let a client register as `role` on `project`.
    pub fn permits(&self, role: ClientRole, project: &ProjectId) -> bool {
        let role_ok = match self.role {
            ClientRole::Operator => role != ClientRole::Producer,
            ClientRole::Observer => role == ClientRole::Observer,
            ClientRole::Producer => false,
        };
        role_ok && self.project.as_ref().map_or(true, |p| p == project)
    }
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionSigner {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
        }
    }

    fn mac(&self) -> Result<HmacSha256, VigilError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| VigilError::AuthError(format!("invalid session key: {e}")))
    }

    pub fn issue(
        &self,
        subject: &str,
        role: ClientRole,
        project: Option<ProjectId>,
    ) -> Result<String, VigilError> {
        if role == ClientRole::Producer {
            return Err(VigilError::AuthError(
                "producers authenticate with the producer secret".into(),
            ));
        }
        let claims = SessionClaims {
            sub: subject.to_string(),
            role,
            project,
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &SessionClaims) -> Result<String, VigilError> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| VigilError::AuthError(format!("failed to encode claims: {e}")))?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{body}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, VigilError> {
        let (body, signature) = token
            .split_once('.')
            .ok_or_else(|| VigilError::AuthError("malformed session token".into()))?;
        let signature = hex::decode(signature)
            .map_err(|_| VigilError::AuthError("malformed session token".into()))?;
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| VigilError::AuthError("bad session token signature".into()))?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| VigilError::AuthError("malformed session token".into()))?;
        let claims: SessionClaims = serde_json::from_slice(&json)
            .map_err(|e| VigilError::AuthError(format!("malformed session claims: {e}")))?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(VigilError::AuthError("session token expired".into()));
        }
        Ok(claims)
    }
}

/// Checks registration credentials for all three roles.
#[derive(Debug, Clone)]
pub struct Authenticator {
    producer_secret: String,
    signer: SessionSigner,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            producer_secret: config.producer_secret.clone(),
            signer: SessionSigner::new(&config.session_secret, config.session_ttl_secs),
        }
    }

    pub fn signer(&self) -> &SessionSigner {
        &self.signer
    }

    pub fn authorize(&self, registration: &Registration) -> Result<(), VigilError> {
        let token = registration
            .auth_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| VigilError::AuthError("missing credential".into()))?;
        match registration.client_type {
            ClientRole::Producer => {
                if self.producer_secret.is_empty()
                    || !constant_time_eq(token.as_bytes(), self.producer_secret.as_bytes())
                {
                    return Err(VigilError::AuthError("invalid producer secret".into()));
                }
                Ok(())
            }
            role => {
                self.authorize_session(token, role, &registration.project_id)?;
                Ok(())
            }
        }
    }

    /// Verify a session token for `role` on `project`.
    pub fn authorize_session(
        &self,
        token: &str,
        role: ClientRole,
        project: &ProjectId,
    ) -> Result<SessionClaims, VigilError> {
        let claims = self.signer.verify(token)?;
        if !claims.permits(role, project) {
            return Err(VigilError::AuthError(format!(
                "token does not permit {role} access to {project}"
            )));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::ClientId;

    fn auth() -> Authenticator {
        Authenticator::new(&AuthConfig {
            producer_secret: "producer-secret".into(),
            session_secret: "0123456789abcdef0123".into(),
            session_ttl_secs: 3600,
        })
    }

    fn registration(role: ClientRole, token: Option<&str>) -> Registration {
        Registration {
            client_type: role,
            client_id: ClientId::new("c"),
            project_id: ProjectId::new("p"),
            auth_token: token.map(String::from),
            last_sequence_number: None,
        }
    }

    #[test]
    fn constant_time_comparison() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"hellp"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }

    #[test]
    fn producer_secret() {
        let a = auth();
        assert!(a
            .authorize(&registration(ClientRole::Producer, Some("producer-secret")))
            .is_ok());
        assert!(a
            .authorize(&registration(ClientRole::Producer, Some("wrong")))
            .is_err());
        assert!(a.authorize(&registration(ClientRole::Producer, None)).is_err());
    }

    #[test]
    fn session_token_round_trip() {
        let a = auth();
        let token = a
            .signer()
            .issue("alice", ClientRole::Operator, None)
            .unwrap();
        let claims = a.signer().verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(a
            .authorize(&registration(ClientRole::Operator, Some(&token)))
            .is_ok());
        // an operator token may also observe
        assert!(a
            .authorize(&registration(ClientRole::Observer, Some(&token)))
            .is_ok());
    }

    #[test]
    fn observer_token_cannot_operate() {
        let a = auth();
        let token = a
            .signer()
            .issue("bob", ClientRole::Observer, None)
            .unwrap();
        assert!(a
            .authorize(&registration(ClientRole::Operator, Some(&token)))
            .is_err());
        // nor stand in for the producer secret
        assert!(a
            .authorize(&registration(ClientRole::Producer, Some(&token)))
            .is_err());
    }

    #[test]
    fn project_scope_enforced() {
        let a = auth();
        let token = a
            .signer()
            .issue("carol", ClientRole::Operator, Some(ProjectId::new("other")))
            .unwrap();
        assert!(a
            .authorize(&registration(ClientRole::Operator, Some(&token)))
            .is_err());
    }

    #[test]
    fn tampered_or_expired_tokens_fail() {
        let a = auth();
        let token = a
            .signer()
            .issue("dave", ClientRole::Operator, None)
            .unwrap();
        let mut tampered = token.clone();
        tampered.insert(0, 'x');
        assert!(a.signer().verify(&tampered).is_err());

        let other = SessionSigner::new("a-different-secret-key", 3600);
        assert!(other.verify(&token).is_err());

        let expired = a
            .signer()
            .sign(&SessionClaims {
                sub: "eve".into(),
                role: ClientRole::Operator,
                project: None,
                exp: Utc::now().timestamp() - 1,
            })
            .unwrap();
        assert!(matches!(
            a.signer().verify(&expired),
            Err(VigilError::AuthError(m)) if m.contains("expired")
        ));
    }

    #[test]
    fn producers_get_no_session_tokens() {
        assert!(auth()
            .signer()
            .issue("w", ClientRole::Producer, None)
            .is_err());
    }
}
