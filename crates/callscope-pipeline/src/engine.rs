use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use callscope_core::types::{CallSource, RedactionStatus};
use callscope_core::CoreError;
use callscope_openai::{parse_report, OpenAiClient};
use callscope_redact::{mute_audio, plan as redaction_plan, RedactionPlan, Span};
use callscope_remotefs::{resolve_path, RemoteFs, SshTarget};
use callscope_store::{Call, CallCommit, CallMetadata, CallStore, RedactionUpdate, VoicemailMessage};

use crate::duration::{parse_wav_duration, probe_duration, WAV_HEADER_PROBE_BYTES};

/// Downloaded audio plus the coordinates needed to write a redacted copy
/// back. Twilio recordings live at the provider and cannot be rewritten,
/// so their `remote` is `None` and redaction stays text-only on the audio
/// side.
struct FetchedAudio {
    bytes: Vec<u8>,
    remote: Option<(RemoteFs, String)>,
}

pub struct ProcessingEngine {
    store: Arc<CallStore>,
    permits: Arc<Semaphore>,
}

impl ProcessingEngine {
    pub fn new(store: Arc<CallStore>, max_concurrent: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Claim and process the oldest pending call. Returns the processed
    /// call id, or `None` when nothing was pending.
    pub async fn process_next_call(&self) -> Option<String> {
        // The permit bounds everything from claim to commit so a burst of
        // ticks cannot exceed the configured concurrency.
        let _permit = self.permits.clone().acquire_owned().await.ok()?;

        let call = match self.store.claim_next_pending_call() {
            Ok(Some(call)) => call,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "claim query failed");
                return None;
            }
        };
        let id = call.id.clone();

        match self.process_call(&call).await {
            Ok(()) => info!(call_id = %id, "call processed"),
            Err(e) => {
                let short = e.to_short_string();
                warn!(call_id = %id, error = %short, "call failed");
                if let Err(persist) = self.store.fail_call(&id, &short) {
                    error!(call_id = %id, error = %persist, "could not persist failure");
                }
            }
        }
        Some(id)
    }

    /// Claim and process the oldest pending voicemail.
    pub async fn process_next_voicemail(&self) -> Option<String> {
        let _permit = self.permits.clone().acquire_owned().await.ok()?;

        let message = match self.store.claim_next_pending_voicemail() {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "voicemail claim query failed");
                return None;
            }
        };
        let id = message.id.clone();

        match self.process_voicemail(&message).await {
            Ok(()) => info!(voicemail_id = %id, "voicemail processed"),
            Err(e) => {
                let short = e.to_short_string();
                warn!(voicemail_id = %id, error = %short, "voicemail failed");
                if let Err(persist) = self.store.fail_voicemail(&id, &short) {
                    error!(voicemail_id = %id, error = %persist, "could not persist failure");
                }
            }
        }
        Some(id)
    }

    #[instrument(skip(self, call), fields(call_id = %call.id, source = %call.source))]
    async fn process_call(&self, call: &Call) -> Result<(), CoreError> {
        let audio = self.fetch_call_audio(call).await?;

        let duration = self.compute_duration(&audio.bytes, call.duration_seconds).await;

        let models = self.store.effective_openai(&call.tenant_id).map_err(CoreError::from)?;
        let openai = OpenAiClient::new(models.api_key.clone()).map_err(CoreError::from)?;

        // Count the attempt before the request so retries are billed too.
        self.store
            .bump_whisper_requests(&call.id)
            .map_err(CoreError::from)?;
        let transcription = openai
            .transcribe(audio.bytes.clone(), &models.whisper_model)
            .await
            .map_err(CoreError::from)?;

        let plan = redaction_plan(&transcription.text, &transcription.words);
        // A failed audio redaction is recorded as such but never blocks the
        // analysis; the sanitized text below is committed either way.
        self.apply_redaction(&call.id, &plan, audio).await;

        let analysis = openai
            .analyze(
                &plan.sanitized_transcript,
                models.analysis_prompt.as_deref(),
                &models.gpt_model,
            )
            .await
            .map_err(CoreError::from)?;
        let sanitized_analysis = callscope_redact::sanitize_text(&analysis.text);

        self.store
            .complete_call(
                &call.id,
                &CallCommit {
                    transcript: plan.sanitized_transcript.clone(),
                    analysis: sanitized_analysis.clone(),
                    duration_seconds: duration,
                    gpt_model: Some(analysis.model.clone()),
                    gpt_input_tokens: Some(analysis.input_tokens),
                    gpt_output_tokens: Some(analysis.output_tokens),
                    gpt_total_tokens: Some(analysis.total_tokens),
                },
            )
            .map_err(CoreError::from)?;

        let report = parse_report(&sanitized_analysis);
        let metadata = CallMetadata {
            call_id: call.id.clone(),
            summary: report.summary,
            sentiment: report.sentiment,
            action_items: report.action_items,
            urgent_topics: report.urgent_topics,
            booking: report.booking,
        };
        if let Err(e) = self.store.upsert_call_metadata(&metadata) {
            warn!(call_id = %call.id, error = %e, "metadata upsert failed");
        }

        Ok(())
    }

    #[instrument(skip(self, message), fields(voicemail_id = %message.id))]
    async fn process_voicemail(&self, message: &VoicemailMessage) -> Result<(), CoreError> {
        let recording_path = message
            .recording_path
            .clone()
            .ok_or_else(|| CoreError::Data("voicemail has no recording path".into()))?;

        let settings = self
            .store
            .freepbx_settings(&message.tenant_id)
            .map_err(CoreError::from)?;
        let fs = RemoteFs::new(SshTarget::from_freepbx(&settings).map_err(CoreError::from)?);
        let bytes = fs.download(&recording_path).await.map_err(CoreError::from)?;

        let models = self
            .store
            .effective_openai(&message.tenant_id)
            .map_err(CoreError::from)?;
        let openai = OpenAiClient::new(models.api_key.clone()).map_err(CoreError::from)?;

        let transcription = openai
            .transcribe(bytes.clone(), &models.whisper_model)
            .await
            .map_err(CoreError::from)?;

        let plan = redaction_plan(&transcription.text, &transcription.words);
        if plan.any_redaction && !plan.spans.is_empty() {
            if let Err(e) = self
                .mute_and_replace(&fs, &recording_path, bytes, &plan.spans)
                .await
            {
                warn!(voicemail_id = %message.id, error = %e, "voicemail audio redaction failed");
            }
        }

        let analysis = openai
            .analyze(
                &plan.sanitized_transcript,
                models.analysis_prompt.as_deref(),
                &models.gpt_model,
            )
            .await
            .map_err(CoreError::from)?;
        let sanitized_analysis = callscope_redact::sanitize_text(&analysis.text);

        self.store
            .complete_voicemail(&message.id, &plan.sanitized_transcript, &sanitized_analysis)
            .map_err(CoreError::from)?;
        Ok(())
    }

    async fn fetch_call_audio(&self, call: &Call) -> Result<FetchedAudio, CoreError> {
        let recording_ref = call
            .recording_ref
            .clone()
            .ok_or_else(|| CoreError::Data("call has no recording reference".into()))?;

        match call.source {
            CallSource::Twilio => {
                let settings = self
                    .store
                    .twilio_settings(&call.tenant_id)
                    .map_err(CoreError::from)?;
                let bytes = callscope_twilio::download::download_recording(&settings, &recording_ref)
                    .await
                    .map_err(CoreError::from)?;
                Ok(FetchedAudio {
                    bytes,
                    remote: None,
                })
            }
            CallSource::FreepbxArchive | CallSource::FreepbxCdr => {
                let settings = self
                    .store
                    .freepbx_settings(&call.tenant_id)
                    .map_err(CoreError::from)?;
                let fs = RemoteFs::new(SshTarget::from_freepbx(&settings).map_err(CoreError::from)?);
                let path = resolve_path(&recording_ref, &settings.ssh_base_path);
                let bytes = fs.download(&path).await.map_err(CoreError::from)?;
                Ok(FetchedAudio {
                    bytes,
                    remote: Some((fs, path)),
                })
            }
        }
    }

    /// Duration preference: WAV header from the first 64 KiB, then an
    /// ffprobe run, then whatever the CDR reported.
    async fn compute_duration(&self, audio: &[u8], cdr_seconds: Option<i64>) -> Option<i64> {
        let header = &audio[..audio.len().min(WAV_HEADER_PROBE_BYTES)];
        if let Some(secs) = parse_wav_duration(header) {
            return Some(secs.round() as i64);
        }
        if let Some(secs) = probe_duration(audio).await {
            return Some(secs.round() as i64);
        }
        cdr_seconds
    }

    /// Run the audio side of redaction and record the outcome. Text results
    /// are never lost here: the sanitized transcript is committed by the
    /// caller regardless of what happens to the audio.
    async fn apply_redaction(
        &self,
        call_id: &str,
        plan: &RedactionPlan,
        audio: FetchedAudio,
    ) -> RedactionStatus {
        if !plan.any_redaction {
            let _ = self.store.set_call_redaction(
                call_id,
                &RedactionUpdate {
                    status: RedactionStatus::NotNeeded,
                    redacted: false,
                    segments: None,
                },
            );
            return RedactionStatus::NotNeeded;
        }

        let _ = self.store.set_call_redaction(
            call_id,
            &RedactionUpdate {
                status: RedactionStatus::Processing,
                redacted: false,
                segments: None,
            },
        );

        // Persist the sanitized transcript before touching the audio: a
        // failure in any later stage must not lose the text redaction.
        if let Err(e) = self
            .store
            .update_call_text(call_id, Some(&plan.sanitized_transcript), None)
        {
            warn!(call_id, error = %e, "sanitized transcript persist failed");
        }

        // No spans (text-only redaction) or no writable remote copy
        // (provider-hosted audio): skipping the mute still counts as a
        // completed redaction.
        let outcome = match &audio.remote {
            Some((fs, path)) if !plan.spans.is_empty() => {
                self.mute_and_replace(fs, path, audio.bytes.clone(), &plan.spans)
                    .await
            }
            _ => Ok(()),
        };

        let segments = serde_json::to_value(&plan.spans).ok();
        match outcome {
            Ok(()) => {
                let _ = self.store.set_call_redaction(
                    call_id,
                    &RedactionUpdate {
                        status: RedactionStatus::Completed,
                        redacted: true,
                        segments,
                    },
                );
                RedactionStatus::Completed
            }
            Err(e) => {
                warn!(call_id, error = %e, "audio redaction failed");
                let _ = self.store.set_call_redaction(
                    call_id,
                    &RedactionUpdate {
                        status: RedactionStatus::Failed,
                        redacted: false,
                        segments,
                    },
                );
                RedactionStatus::Failed
            }
        }
    }

    async fn mute_and_replace(
        &self,
        fs: &RemoteFs,
        path: &str,
        audio: Vec<u8>,
        spans: &[Span],
    ) -> Result<(), CoreError> {
        let muted = mute_audio(audio, spans).await.map_err(CoreError::from)?;
        if !muted.muted {
            return Ok(());
        }
        fs.replace_atomic(path, muted.bytes)
            .await
            .map_err(CoreError::from)
    }
}
