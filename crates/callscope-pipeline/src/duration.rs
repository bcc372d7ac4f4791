//! Audio duration probing.
//!
//! The cheap path parses the RIFF header from the first 64 KiB of the file
//! (byte rate from `fmt `, payload size from `data`). Non-RIFF variants
//! fall back to an ffprobe run over a scratch file; CDR-reported seconds
//! are the caller's last resort.

use std::process::Stdio;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

/// Bytes of header the pipeline fetches for the cheap parse.
pub const WAV_HEADER_PROBE_BYTES: usize = 64 * 1024;

/// Parse duration from a RIFF/WAVE header. Returns `None` for non-RIFF
/// data, missing chunks, or a zero byte rate.
pub fn parse_wav_duration(bytes: &[u8]) -> Option<f64> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut byte_rate: Option<u32> = None;
    let mut data_len: Option<u32> = None;
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().ok()?);
        match chunk_id {
            b"fmt " if offset + 16 <= bytes.len() => {
                // byte rate sits 8 bytes into the fmt payload
                if offset + 8 + 12 <= bytes.len() {
                    byte_rate = Some(u32::from_le_bytes(
                        bytes[offset + 16..offset + 20].try_into().ok()?,
                    ));
                }
            }
            b"data" => {
                data_len = Some(chunk_size);
                // The data payload follows; headers read with a range
                // request stop here.
                break;
            }
            _ => {}
        }
        // Chunks are word aligned.
        offset += 8 + chunk_size as usize + (chunk_size as usize & 1);
    }

    match (byte_rate, data_len) {
        (Some(rate), Some(len)) if rate > 0 => Some(len as f64 / rate as f64),
        _ => None,
    }
}

/// ffprobe fallback for audio whose header the cheap parse cannot read.
pub async fn probe_duration(audio: &[u8]) -> Option<f64> {
    let ffprobe = which::which("ffprobe").ok()?;
    let scratch = NamedTempFile::new().ok()?;
    std::fs::write(scratch.path(), audio).ok()?;

    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(scratch.path())
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        debug!("ffprobe failed on scratch file");
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}
