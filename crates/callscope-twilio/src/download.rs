//! Recording downloads from the provider API.

use std::time::Duration;

use tracing::debug;

use callscope_core::settings::TwilioSettings;

use crate::{Result, TwilioError};

const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Download a recording as WAV. Twilio's `RecordingUrl` has no extension;
/// appending `.wav` selects the WAV rendition.
pub async fn download_recording(settings: &TwilioSettings, url: &str) -> Result<Vec<u8>> {
    let account_sid = settings
        .account_sid
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwilioError::Settings("accountSid is not set".into()))?;
    let auth_token = settings
        .auth_token
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwilioError::Settings("authToken is not set".into()))?;

    let url = wav_url(url);
    debug!(%url, "downloading twilio recording");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .build()?;
    let resp = client
        .get(&url)
        .basic_auth(account_sid, Some(auth_token))
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(TwilioError::RecordingStatus {
            status: resp.status().as_u16(),
        });
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Credential probe: fetch the account resource and report whether the
/// SID/token pair is accepted.
pub async fn test_connection(settings: &TwilioSettings) -> Result<bool> {
    let account_sid = settings
        .account_sid
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwilioError::Settings("accountSid is not set".into()))?;
    let auth_token = settings
        .auth_token
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwilioError::Settings("authToken is not set".into()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;
    let resp = client
        .get(format!(
            "https://api.twilio.com/2010-04-01/Accounts/{account_sid}.json"
        ))
        .basic_auth(account_sid, Some(auth_token))
        .send()
        .await?;
    Ok(resp.status().is_success())
}

fn wav_url(url: &str) -> String {
    let base = url.trim_end_matches('/');
    if base.ends_with(".wav") || base.ends_with(".mp3") {
        base.to_string()
    } else {
        format!("{base}.wav")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_suffix_is_appended_once() {
        assert_eq!(
            wav_url("https://api.twilio.com/2010-04-01/Accounts/AC/Recordings/RE1"),
            "https://api.twilio.com/2010-04-01/Accounts/AC/Recordings/RE1.wav"
        );
        assert_eq!(
            wav_url("https://api.twilio.com/r/RE1.wav"),
            "https://api.twilio.com/r/RE1.wav"
        );
    }
}
