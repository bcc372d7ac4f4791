use serde::Deserialize;
use tracing::{debug, warn};

use crate::{OpenAiClient, OpenAiError, Result};

/// Platform-default analysis prompt, used when neither the tenant nor the
/// platform super tenant configured one. The numbered sections are load
/// bearing: `parse_report` keys off the `1.`–`6.` headings.
pub const DEFAULT_ANALYSIS_PROMPT: &str = "\
You are an assistant reviewing a transcribed phone call for a service business. \
Analyze the transcript and respond with exactly these numbered sections:\n\
1. Summary: Two or three sentences describing the purpose and outcome of the call.\n\
2. Action Items: A bulleted list of concrete follow-ups, or 'None'.\n\
3. Sentiment: One word - positive, neutral, or negative.\n\
4. Urgent Topics: Anything needing same-day attention, or 'None'.\n\
5. Booking Status: One of Booked, Not Booked, Rescheduled, Canceled.\n\
6. Additional Notes: Anything else a manager should know, or 'None'.\n\n\
Transcript:\n";

/// Result of one chat completion, with the usage numbers the call row records.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub text: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

impl OpenAiClient {
    /// Run the analysis prompt over a sanitized transcript.
    pub async fn analyze(
        &self,
        transcript: &str,
        prompt: Option<&str>,
        model: &str,
    ) -> Result<AnalysisOutcome> {
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_ANALYSIS_PROMPT);
        let user_content = format!("{prompt}{transcript}");

        debug!(%model, transcript_len = transcript.len(), "sending analysis request");

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": model,
                "messages": [
                    {"role": "user", "content": user_content}
                ],
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(OpenAiError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ChatResponse = resp
            .json()
            .await
            .map_err(|e| OpenAiError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(OpenAiError::Parse("empty completion".into()));
        }

        let usage = api_resp.usage.unwrap_or_default();
        Ok(AnalysisOutcome {
            text: content,
            model: api_resp.model,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}
