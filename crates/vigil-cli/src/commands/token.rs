use std::path::Path;

use anyhow::{bail, Context, Result};

use vigil_control::{ClientRole, SessionSigner};
use vigil_types::ProjectId;

use crate::commands::load_config;

/// Run `vigil token`: mint a session token for an operator or observer.
pub fn issue(
    config_path: Option<&Path>,
    subject: &str,
    role: &str,
    project: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    if config.auth.session_secret.is_empty() {
        bail!("auth.session_secret is not set; cannot sign session tokens");
    }
    let signer = SessionSigner::new(&config.auth.session_secret, config.auth.session_ttl_secs);
    let token = issue_with(&signer, subject, role, project)?;
    println!("{token}");
    Ok(())
}

pub(crate) fn issue_with(
    signer: &SessionSigner,
    subject: &str,
    role: &str,
    project: Option<String>,
) -> Result<String> {
    let role = match role {
        "operator" => ClientRole::Operator,
        "observer" => ClientRole::Observer,
        other => bail!("unsupported role '{other}'; valid options: operator, observer"),
    };
    signer
        .issue(subject, role, project.map(ProjectId::from))
        .context("failed to sign session token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_with_scope() {
        let signer = SessionSigner::new("0123456789abcdef0123", 3600);
        let token = issue_with(&signer, "alice", "observer", Some("proj".into())).unwrap();
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(claims.permits(ClientRole::Observer, &ProjectId::new("proj")));
        assert!(!claims.permits(ClientRole::Operator, &ProjectId::new("proj")));
        assert!(!claims.permits(ClientRole::Observer, &ProjectId::new("other")));
    }

    #[test]
    fn producer_tokens_are_refused() {
        let signer = SessionSigner::new("0123456789abcdef0123", 3600);
        assert!(issue_with(&signer, "agent", "producer", None).is_err());
    }
}
