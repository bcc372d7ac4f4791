//! Audio muting via ffmpeg's volume filter.
//!
//! Each span becomes `volume=enable='between(t,a,b)':volume=0`; the filters
//! chain left to right so overlapping spans are harmless. Output is forced
//! to 16-bit little-endian PCM WAV, the format the PBX serves. Scratch
//! files are `NamedTempFile`s, removed on every exit path by RAII.

use std::process::Stdio;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use crate::{RedactError, Result, Span};

#[derive(Debug)]
pub struct MuteOutcome {
    pub bytes: Vec<u8>,
    /// False when there was nothing to mute and the input passed through.
    pub muted: bool,
}

/// Mute the given spans in a WAV file. With no spans the input is returned
/// unchanged; muting the same spans twice produces identical audio because
/// the muted ranges are already silent.
pub async fn mute_audio(wav: Vec<u8>, spans: &[Span]) -> Result<MuteOutcome> {
    if spans.is_empty() {
        return Ok(MuteOutcome {
            bytes: wav,
            muted: false,
        });
    }

    let ffmpeg = which::which("ffmpeg").map_err(|_| RedactError::FfmpegMissing)?;

    let input = NamedTempFile::new()?;
    std::fs::write(input.path(), &wav)?;
    let output = NamedTempFile::with_suffix(".wav")?;

    let filter = build_mute_filter(spans);
    debug!(spans = spans.len(), %filter, "muting audio ranges");

    let result = Command::new(ffmpeg)
        .arg("-y")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input.path())
        .arg("-af")
        .arg(&filter)
        .arg("-c:a")
        .arg("pcm_s16le")
        .arg(output.path())
        .stdin(Stdio::null())
        .output()
        .await?;

    if !result.status.success() {
        return Err(RedactError::FfmpegFailed {
            status: result.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        });
    }

    let bytes = std::fs::read(output.path())?;
    Ok(MuteOutcome { bytes, muted: true })
}

fn build_mute_filter(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|s| format!("volume=enable='between(t,{:.3},{:.3})':volume=0", s.start, s.end))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpanReason;

    fn span(start: f64, end: f64) -> Span {
        Span {
            start,
            end,
            reason: SpanReason::CardNumber,
            word_indices: vec![],
        }
    }

    #[test]
    fn filter_string_matches_ffmpeg_syntax() {
        let filter = build_mute_filter(&[span(10.5, 14.25), span(20.0, 21.5)]);
        assert_eq!(
            filter,
            "volume=enable='between(t,10.500,14.250)':volume=0,\
             volume=enable='between(t,20.000,21.500)':volume=0"
        );
    }

    #[tokio::test]
    async fn no_spans_passes_input_through() {
        let bytes = vec![1u8, 2, 3, 4];
        let outcome = mute_audio(bytes.clone(), &[]).await.unwrap();
        assert!(!outcome.muted);
        assert_eq!(outcome.bytes, bytes);
    }
}
