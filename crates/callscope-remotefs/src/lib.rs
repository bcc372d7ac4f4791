//! File-level operations against a remote PBX host over SSH/SFTP.
//!
//! Every public operation opens its own session inside `spawn_blocking`,
//! performs one unit of work, and drops the session before returning; no
//! session outlives its operation. Deadlines wrap the whole
//! connect-work-close span.

pub mod error;
pub mod path;
mod session;

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use callscope_core::config::{
    RETENTION_SWEEP_TIMEOUT_SECS, SFTP_DOWNLOAD_TIMEOUT_SECS, SSH_COMMAND_TIMEOUT_SECS,
};

pub use error::{RemoteFsError, Result};
pub use path::{day_prefix_of, day_token, resolve_path};
pub use session::SshTarget;

use session::BlockingSession;

/// Aggregate numbers for one recording tree, produced by a single shell exec.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemoteDirStats {
    pub file_count: u64,
    pub total_bytes: u64,
    /// Oldest `YYYY/MM/DD` day directory present, if any.
    pub first_day: Option<String>,
    /// Newest `YYYY/MM/DD` day directory present, if any.
    pub last_day: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestConnectReport {
    pub ok: bool,
    pub base_path: String,
    pub path_exists: bool,
}

/// Handle for one tenant's PBX host. Cloning is cheap; each operation opens
/// its own session from the stored target.
#[derive(Debug, Clone)]
pub struct RemoteFs {
    target: SshTarget,
}

impl RemoteFs {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    /// Download a whole file.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let path = path.to_string();
        self.run(SFTP_DOWNLOAD_TIMEOUT_SECS, move |s| s.download(&path))
            .await
    }

    /// Range-read the first `n` bytes (used to parse WAV headers cheaply).
    pub async fn read_header(&self, path: &str, n: usize) -> Result<Vec<u8>> {
        let path = path.to_string();
        self.run(SSH_COMMAND_TIMEOUT_SECS, move |s| s.read_header(&path, n))
            .await
    }

    /// Atomically replace `path` with `bytes`: upload to a hidden temp
    /// sibling, delete the original, rename the temp into place. On any
    /// failure the temp is removed best-effort before the error surfaces.
    pub async fn replace_atomic(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let path = path.to_string();
        let temp = temp_sibling(&path);
        self.run(SFTP_DOWNLOAD_TIMEOUT_SECS, move |s| {
            let outcome = (|| {
                s.upload(&temp, &bytes)?;
                s.unlink(&path)?;
                s.rename(&temp, &path)
            })();
            if outcome.is_err() {
                if let Err(cleanup) = s.unlink(&temp) {
                    debug!(temp = %temp, error = %cleanup, "temp cleanup after failed replace");
                }
            }
            outcome
        })
        .await
    }

    pub async fn delete_recursive(&self, paths: &[String]) -> Result<()> {
        let paths = paths.to_vec();
        self.run(RETENTION_SWEEP_TIMEOUT_SECS, move |s| {
            for path in &paths {
                s.delete_recursive(path)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.run(SSH_COMMAND_TIMEOUT_SECS, move |s| s.rename(&from, &to))
            .await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.run(SSH_COMMAND_TIMEOUT_SECS, move |s| s.exists(&path))
            .await
    }

    /// Run one shell command, failing on non-zero exit.
    pub async fn exec(&self, command: &str) -> Result<String> {
        let command = command.to_string();
        self.run(SSH_COMMAND_TIMEOUT_SECS, move |s| s.exec_ok(&command))
            .await
    }

    /// List immediate directory entries as (name, is_dir).
    pub async fn readdir(&self, path: &str) -> Result<Vec<(String, bool)>> {
        let path = path.to_string();
        self.run(SSH_COMMAND_TIMEOUT_SECS, move |s| s.readdir(&path))
            .await
    }

    /// File count, byte total, and first/last day directory of a recording
    /// tree, via one shell exec.
    pub async fn stats(&self, base_path: &str) -> Result<RemoteDirStats> {
        let base = shell_quote(base_path.trim_end_matches('/'));
        let command = format!(
            "find {base} -type f | wc -l; \
             du -sk {base} | cut -f1; \
             find {base} -mindepth 3 -maxdepth 3 -type d | sort | sed -n '1p;$p'"
        );
        let base_owned = base_path.to_string();
        let stdout = self
            .run(SSH_COMMAND_TIMEOUT_SECS, move |s| s.exec_ok(&command))
            .await?;
        Ok(parse_stats_output(&stdout, &base_owned))
    }

    /// Delete day directories strictly older than `keep_from` and prune the
    /// month/year parents they leave empty. Returns the deleted `YYYY/MM/DD`
    /// labels. A second sweep with the same keep-from day is a no-op.
    pub async fn sweep_older_than_day(
        &self,
        base_path: &str,
        keep_from: NaiveDate,
    ) -> Result<Vec<String>> {
        let base = base_path.trim_end_matches('/').to_string();
        self.run(RETENTION_SWEEP_TIMEOUT_SECS, move |s| {
            let mut deleted = Vec::new();
            for (year_name, is_dir) in s.readdir(&base)? {
                if !is_dir || !is_numeric_component(&year_name, 4) {
                    continue;
                }
                let year_path = format!("{base}/{year_name}");
                for (month_name, is_dir) in s.readdir(&year_path)? {
                    if !is_dir || !is_numeric_component(&month_name, 2) {
                        continue;
                    }
                    let month_path = format!("{year_path}/{month_name}");
                    for (day_name, is_dir) in s.readdir(&month_path)? {
                        if !is_dir || !is_numeric_component(&day_name, 2) {
                            continue;
                        }
                        let Some(date) = component_date(&year_name, &month_name, &day_name) else {
                            continue;
                        };
                        if date < keep_from {
                            let day_path = format!("{month_path}/{day_name}");
                            s.delete_recursive(&day_path)?;
                            deleted.push(format!("{year_name}/{month_name}/{day_name}"));
                        }
                    }
                    s.rmdir_if_empty(&month_path)?;
                }
                s.rmdir_if_empty(&year_path)?;
            }
            deleted.sort();
            Ok(deleted)
        })
        .await
    }

    /// Connectivity probe for the settings screen: authenticates and checks
    /// whether the recording base path exists.
    pub async fn test_connect(&self, base_path: &str) -> Result<TestConnectReport> {
        let base = base_path.to_string();
        let base_report = base.clone();
        let path_exists = self
            .run(SSH_COMMAND_TIMEOUT_SECS, move |s| s.exists(&base))
            .await?;
        Ok(TestConnectReport {
            ok: true,
            base_path: base_report,
            path_exists,
        })
    }

    async fn run<T, F>(&self, timeout_secs: u64, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&BlockingSession) -> Result<T> + Send + 'static,
    {
        let target = self.target.clone();
        let work = tokio::task::spawn_blocking(move || {
            let session = BlockingSession::connect(&target, timeout_secs)?;
            f(&session)
        });
        match tokio::time::timeout(Duration::from_secs(timeout_secs), work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "remotefs blocking task panicked");
                Err(RemoteFsError::Ssh(join_err.to_string()))
            }
            Err(_) => Err(RemoteFsError::Timeout { secs: timeout_secs }),
        }
    }
}

/// Hidden temp sibling used by the atomic replace, e.g.
/// `/a/b/.tmp-redacted-5f3a9c1e-call.wav`.
pub fn temp_sibling(path: &str) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let nonce = &nonce[..8];
    match path.rfind('/') {
        Some(idx) => {
            let (dir, name) = path.split_at(idx + 1);
            format!("{dir}.tmp-redacted-{nonce}-{name}")
        }
        None => format!(".tmp-redacted-{nonce}-{path}"),
    }
}

fn is_numeric_component(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

fn component_date(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn parse_stats_output(stdout: &str, base_path: &str) -> RemoteDirStats {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let file_count = lines.next().and_then(|l| l.parse().ok()).unwrap_or(0);
    let total_kib: u64 = lines.next().and_then(|l| l.parse().ok()).unwrap_or(0);
    let days: Vec<String> = lines
        .filter_map(|l| day_prefix_of(l, base_path))
        .collect();
    RemoteDirStats {
        file_count,
        total_bytes: total_kib * 1024,
        first_day: days.first().cloned(),
        last_day: days.last().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_sibling_is_hidden_and_keeps_directory() {
        let t = temp_sibling("/var/spool/2025/01/15/call.wav");
        assert!(t.starts_with("/var/spool/2025/01/15/.tmp-redacted-"));
        assert!(t.ends_with("-call.wav"));

        let t = temp_sibling("call.wav");
        assert!(t.starts_with(".tmp-redacted-"));
    }

    #[test]
    fn temp_sibling_nonce_differs() {
        assert_ne!(temp_sibling("/a/b.wav"), temp_sibling("/a/b.wav"));
    }

    #[test]
    fn shell_quote_handles_quotes() {
        assert_eq!(shell_quote("/plain/path"), "'/plain/path'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn stats_output_parses() {
        let base = "/var/spool/asterisk/monitor";
        let out = format!(
            "142\n5120\n{base}/2025/01/03\n{base}/2025/02/10\n"
        );
        let stats = parse_stats_output(&out, base);
        assert_eq!(stats.file_count, 142);
        assert_eq!(stats.total_bytes, 5120 * 1024);
        assert_eq!(stats.first_day.as_deref(), Some("2025/01/03"));
        assert_eq!(stats.last_day.as_deref(), Some("2025/02/10"));
    }

    #[test]
    fn stats_output_tolerates_empty_tree() {
        let stats = parse_stats_output("0\n0\n", "/base");
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.first_day, None);
        assert_eq!(stats.last_day, None);
    }

    #[test]
    fn numeric_components() {
        assert!(is_numeric_component("2025", 4));
        assert!(!is_numeric_component("202a", 4));
        assert!(!is_numeric_component("2025", 2));
        assert!(is_numeric_component("02", 2));
    }
}
