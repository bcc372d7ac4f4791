//! Voicemail spool discovery and maintenance.
//!
//! The spool layout is `base/context/<mailbox>/<folder>/msg<k>.{txt,wav,…}`.
//! One shell exec per discovery pass lists every message file and dumps the
//! metadata sidecars; everything else is parsed locally. Reconciliation is
//! the store's job: each parsed message carries a stable `pbx_identity`
//! that survives the PBX renumbering message slots.

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, instrument, warn};

use callscope_remotefs::RemoteFs;

use crate::error::{FreePbxError, Result};

/// Extensions a voicemail recording may use, in preference order.
const AUDIO_EXTENSIONS: &[&str] = &["wav", "WAV", "gsm", "mp3"];

/// One parsed spool message.
#[derive(Debug, Clone, PartialEq)]
pub struct SpoolMessage {
    pub context: String,
    pub mailbox: String,
    pub folder: String,
    /// `msg0000`-style slot name.
    pub msg_id: String,
    pub origtime: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub caller_id: Option<String>,
    pub metadata_path: String,
    pub recording_path: Option<String>,
}

impl SpoolMessage {
    /// Stable composite key: `mailbox|origtime|duration|callerid`. Folder
    /// moves and slot renumbering leave it unchanged.
    pub fn pbx_identity(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.mailbox,
            self.origtime.unwrap_or_default(),
            self.duration_seconds.unwrap_or_default(),
            self.caller_id.as_deref().unwrap_or_default(),
        )
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.origtime
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

/// Walk the spool for one context with a single shell exec and parse every
/// message. Folders outside `folders` are ignored.
#[instrument(skip(fs, folders))]
pub async fn discover(
    fs: &RemoteFs,
    base_path: &str,
    context: &str,
    folders: &[String],
) -> Result<Vec<SpoolMessage>> {
    let root = format!("{}/{}", base_path.trim_end_matches('/'), context);
    let command = format!(
        "find {root} -mindepth 3 -maxdepth 3 -type f -name 'msg*' | sort; \
         echo '==METADATA=='; \
         for f in $(find {root} -mindepth 3 -maxdepth 3 -type f -name 'msg*.txt' | sort); do \
           echo \"==> $f\"; cat \"$f\"; \
         done",
        root = shell_quote(&root),
    );
    let output = fs.exec(&command).await?;
    let messages = parse_spool_listing(&output, &root, context);
    let kept: Vec<SpoolMessage> = messages
        .into_iter()
        .filter(|m| folders.iter().any(|f| f == &m.folder))
        .collect();
    debug!(context, count = kept.len(), "voicemail messages discovered");
    Ok(kept)
}

/// Parse the two-section exec output: a file listing, then `==> path`
/// delimited metadata dumps.
fn parse_spool_listing(output: &str, root: &str, context: &str) -> Vec<SpoolMessage> {
    let (listing, metadata) = match output.split_once("==METADATA==") {
        Some((l, m)) => (l, m),
        None => (output, ""),
    };

    let all_files: Vec<&str> = listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut messages = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    for line in metadata.lines() {
        if let Some(path) = line.strip_prefix("==> ") {
            if let Some((path, body)) = current.take() {
                if let Some(msg) = build_message(&path, &body, root, context, &all_files) {
                    messages.push(msg);
                }
            }
            current = Some((path.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line.to_string());
        }
    }
    if let Some((path, body)) = current.take() {
        if let Some(msg) = build_message(&path, &body, root, context, &all_files) {
            messages.push(msg);
        }
    }
    messages
}

fn build_message(
    txt_path: &str,
    body: &[String],
    root: &str,
    context: &str,
    all_files: &[&str],
) -> Option<SpoolMessage> {
    // root/<mailbox>/<folder>/msgNNNN.txt
    let rel = txt_path.strip_prefix(root)?.trim_start_matches('/');
    let mut parts = rel.split('/');
    let mailbox = parts.next()?.to_string();
    let folder = parts.next()?.to_string();
    let file = parts.next()?;
    let msg_id = file.strip_suffix(".txt")?.to_string();
    if !msg_id.starts_with("msg") {
        return None;
    }

    let info = parse_message_info(body);
    let stem = format!("{root}/{mailbox}/{folder}/{msg_id}");
    let recording_path = AUDIO_EXTENSIONS
        .iter()
        .map(|ext| format!("{stem}.{ext}"))
        .find(|candidate| all_files.contains(&candidate.as_str()));
    if recording_path.is_none() {
        warn!(txt_path, "voicemail metadata without audio file");
    }

    Some(SpoolMessage {
        context: context.to_string(),
        mailbox,
        folder,
        msg_id,
        origtime: info.origtime,
        duration_seconds: info.duration,
        caller_id: info.callerid,
        metadata_path: txt_path.to_string(),
        recording_path,
    })
}

#[derive(Debug, Default, PartialEq)]
pub struct MessageInfo {
    pub origtime: Option<i64>,
    pub duration: Option<i64>,
    pub callerid: Option<String>,
}

/// Parse the `key=value` metadata sidecar. Section headers (`[message]`)
/// and unknown keys are skipped.
pub fn parse_message_info(lines: &[String]) -> MessageInfo {
    let mut info = MessageInfo::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('[') || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "origtime" => info.origtime = value.trim().parse().ok(),
            "duration" => info.duration = value.trim().parse().ok(),
            "callerid" => {
                let v = value.trim();
                if !v.is_empty() {
                    info.callerid = Some(v.to_string());
                }
            }
            _ => {}
        }
    }
    info
}

/// Move a message from INBOX to Old, renaming every file of the message to
/// the next free Old slot. Idempotent when the message already sits in Old.
/// Returns the new msg id.
#[instrument(skip(fs))]
pub async fn move_to_old(
    fs: &RemoteFs,
    base_path: &str,
    context: &str,
    mailbox: &str,
    msg_id: &str,
    current_folder: &str,
) -> Result<String> {
    if current_folder == "Old" {
        return Ok(msg_id.to_string());
    }

    let mailbox_root = format!("{}/{}/{}", base_path.trim_end_matches('/'), context, mailbox);
    let old_dir = format!("{mailbox_root}/Old");
    let inbox_dir = format!("{mailbox_root}/{current_folder}");

    let existing = fs.readdir(&old_dir).await.unwrap_or_default();
    let slot = next_old_slot(existing.iter().map(|(name, _)| name.as_str()));
    let new_id = format!("msg{slot:04}");

    let inbox_files = fs.readdir(&inbox_dir).await?;
    let mut moved = 0;
    for (name, is_dir) in inbox_files {
        if is_dir || !name.starts_with(&format!("{msg_id}.")) {
            continue;
        }
        let ext = name.rsplit('.').next().unwrap_or_default().to_string();
        fs.rename(
            &format!("{inbox_dir}/{name}"),
            &format!("{old_dir}/{new_id}.{ext}"),
        )
        .await?;
        moved += 1;
    }
    if moved == 0 {
        return Err(FreePbxError::Parse(format!(
            "no files found for {msg_id} in {inbox_dir}"
        )));
    }
    Ok(new_id)
}

/// Next free slot: max existing `msgNNNN` plus one.
pub fn next_old_slot<'a>(names: impl Iterator<Item = &'a str>) -> u32 {
    names
        .filter_map(|name| {
            let stem = name.split('.').next()?;
            stem.strip_prefix("msg")?.parse::<u32>().ok()
        })
        .max()
        .map(|max| max + 1)
        .unwrap_or(0)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
