//! RTSP authentication (RFC 2617 as used by RFC 2326 §12.5).
//!
//! The server's `WWW-Authenticate` challenge picks the scheme. Basic sends
//! `base64(user:password)`. Digest sends
//! `MD5(MD5(user:realm:password):nonce:MD5(method:uri))`.

use base64::{Engine, prelude::BASE64_STANDARD};

/// User name and password for servers that require authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Basic,
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
    },
}

impl AuthChallenge {
    /// Parse a challenge header value. Unknown schemes yield `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        if scheme.eq_ignore_ascii_case("basic") {
            Some(Self::Basic)
        } else if scheme.eq_ignore_ascii_case("digest") {
            Some(Self::Digest {
                realm: parse_auth_param(params, "realm")?,
                nonce: parse_auth_param(params, "nonce")?,
                opaque: parse_auth_param(params, "opaque"),
            })
        } else {
            None
        }
    }

    /// `Authorization` header value for `method` on `uri`.
    pub fn authorization(&self, credentials: &Credentials, method: &str, uri: &str) -> String {
        match self {
            Self::Basic => {
                let token = BASE64_STANDARD
                    .encode(format!("{}:{}", credentials.user, credentials.password));
                format!("Basic {}", token)
            }
            Self::Digest {
                realm,
                nonce,
                opaque,
            } => {
                let ha1 = md5::compute(format!(
                    "{}:{}:{}",
                    credentials.user, realm, credentials.password
                ));
                let ha2 = md5::compute(format!("{}:{}", method, uri));
                let response = md5::compute(format!("{:x}:{}:{:x}", ha1, nonce, ha2));

                let mut value = format!(
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{:x}\"",
                    credentials.user, realm, nonce, uri, response
                );
                if let Some(opaque) = opaque {
                    value.push_str(&format!(", opaque=\"{}\"", opaque));
                }
                value
            }
        }
    }
}

/// Value of `name="value"` (or `name=value`) in a comma-separated parameter list.
fn parse_auth_param(params: &str, name: &str) -> Option<String> {
    params.split(',').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().trim_matches('"').to_string())
    })
}
