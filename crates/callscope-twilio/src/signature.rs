//! Webhook request validation.
//!
//! Twilio signs every webhook with HMAC-SHA1 over the full request URL plus
//! the POST parameters sorted by key and concatenated as `keyvalue`, then
//! base64-encodes the digest into `X-Twilio-Signature`. Validation is
//! mandatory before any state change; the comparison is constant time via
//! the Mac verifier.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{Result, TwilioError};

type HmacSha1 = Hmac<Sha1>;

/// Validate `X-Twilio-Signature` for a webhook request. `params` are the
/// decoded POST form parameters; ordering of the input slice is irrelevant.
pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> Result<()> {
    let expected = BASE64
        .decode(signature.trim())
        .map_err(|_| TwilioError::InvalidSignature)?;

    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = String::from(url);
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .map_err(|_| TwilioError::InvalidSignature)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| TwilioError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "12345abcdef";
    const URL: &str = "https://example.com/webhooks/twilio/voice";

    fn sign(url: &str, params: &[(String, String)]) -> String {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut payload = String::from(url);
        for (k, v) in sorted {
            payload.push_str(k);
            payload.push_str(v);
        }
        let mut mac = HmacSha1::new_from_slice(TOKEN.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn params() -> Vec<(String, String)> {
        vec![
            ("CallSid".into(), "CA123".into()),
            ("From".into(), "+15550001111".into()),
            ("To".into(), "+15550002222".into()),
        ]
    }

    #[test]
    fn valid_signature_passes_regardless_of_param_order() {
        let p = params();
        let sig = sign(URL, &p);
        assert!(validate_signature(TOKEN, URL, &p, &sig).is_ok());

        let mut reversed = p.clone();
        reversed.reverse();
        assert!(validate_signature(TOKEN, URL, &reversed, &sig).is_ok());
    }

    #[test]
    fn tampered_params_fail() {
        let p = params();
        let sig = sign(URL, &p);
        let mut tampered = p.clone();
        tampered[0].1 = "CA999".into();
        assert!(matches!(
            validate_signature(TOKEN, URL, &tampered, &sig),
            Err(TwilioError::InvalidSignature)
        ));
    }

    #[test]
    fn wrong_url_or_token_fails() {
        let p = params();
        let sig = sign(URL, &p);
        assert!(validate_signature(TOKEN, "https://example.com/other", &p, &sig).is_err());
        assert!(validate_signature("other-token", URL, &p, &sig).is_err());
    }

    #[test]
    fn garbage_signature_fails() {
        assert!(validate_signature(TOKEN, URL, &params(), "not base64 !!").is_err());
        assert!(validate_signature(TOKEN, URL, &params(), "").is_err());
    }
}
