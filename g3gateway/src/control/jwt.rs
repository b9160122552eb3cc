/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::hmac;
use serde::Serialize;

const JWT_HEADER_HS256: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
}

/// Sign short-lived HS256 bearer tokens with a shared secret.
pub(crate) struct JwtSigner {
    key: hmac::Key,
    expiration: Duration,
}

impl JwtSigner {
    pub(crate) fn new(secret: &str, expiration: Duration) -> Self {
        JwtSigner {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            expiration,
        }
    }

    fn sign_at(&self, now: i64) -> String {
        let claims = Claims {
            iat: now,
            exp: now + self.expiration.as_secs() as i64,
        };
        // serialization of plain integers never fails
        let claims = serde_json::to_vec(&claims).unwrap_or_default();

        let mut token = URL_SAFE_NO_PAD.encode(JWT_HEADER_HS256);
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(claims));
        let signature = hmac::sign(&self.key, token.as_bytes());
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(signature.as_ref()));
        token
    }

    pub(crate) fn sign(&self) -> String {
        self.sign_at(chrono::Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign() {
        let signer = JwtSigner::new("secret", Duration::from_secs(60));
        let token = signer.sign_at(1_700_000_000);
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9");

        let claims = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&claims).unwrap();
        assert_eq!(claims["iat"], 1_700_000_000);
        assert_eq!(claims["exp"], 1_700_000_060);

        let key = hmac::Key::new(hmac::HMAC_SHA256, b"secret");
        let signature = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        let signed = format!("{}.{}", parts[0], parts[1]);
        hmac::verify(&key, signed.as_bytes(), &signature).unwrap();
    }
}
