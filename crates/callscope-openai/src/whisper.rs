use serde::Deserialize;
use tracing::{debug, warn};

use callscope_core::types::Word;

use crate::{OpenAiClient, OpenAiError, Result};

/// A completed transcription with word-level timestamps. `words` may be
/// empty for silent or music-only audio; redaction then falls back to
/// text-only sanitization.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub words: Vec<Word>,
    /// Audio duration as reported by the API, in seconds.
    pub duration: Option<f64>,
}

impl OpenAiClient {
    /// Transcribe WAV audio with word-level timestamps. The caller is
    /// responsible for counting the request on the call row BEFORE invoking
    /// this, so failed attempts are still billed.
    pub async fn transcribe(&self, audio: Vec<u8>, model: &str) -> Result<Transcription> {
        let file = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| OpenAiError::Parse(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", model.to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        debug!(%model, "sending transcription request");

        let resp = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "transcription API error");
            return Err(OpenAiError::Api {
                status,
                message: text,
            });
        }

        let api_resp: VerboseTranscription = resp
            .json()
            .await
            .map_err(|e| OpenAiError::Parse(e.to_string()))?;

        Ok(Transcription {
            text: api_resp.text,
            words: api_resp
                .words
                .unwrap_or_default()
                .into_iter()
                .map(|w| Word {
                    word: w.word,
                    start: w.start,
                    end: w.end,
                })
                .collect(),
            duration: api_resp.duration,
        })
    }
}

#[derive(Deserialize)]
struct VerboseTranscription {
    text: String,
    words: Option<Vec<ApiWord>>,
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct ApiWord {
    word: String,
    start: f64,
    end: f64,
}
