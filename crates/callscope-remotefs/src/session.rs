//! Blocking SSH/SFTP internals.
//!
//! Everything here runs inside `tokio::task::spawn_blocking`. A session is
//! opened for exactly one operation and dropped when the closure returns;
//! nothing holds a session across await points.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::Session;

use callscope_core::settings::FreePbxSettings;

use crate::error::{RemoteFsError, Result};

/// Connection coordinates for one PBX host, extracted from tenant settings
/// with credentials already decrypted.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
}

impl SshTarget {
    pub fn from_freepbx(settings: &FreePbxSettings) -> Result<Self> {
        let host = settings
            .ssh_host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RemoteFsError::Settings("sshHost is not set".into()))?;
        let user = settings
            .ssh_user
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RemoteFsError::Settings("sshUser is not set".into()))?;
        if settings.ssh_password.is_none() && settings.ssh_private_key.is_none() {
            return Err(RemoteFsError::Settings(
                "neither sshPassword nor sshPrivateKey is set".into(),
            ));
        }
        Ok(Self {
            host,
            port: settings.ssh_port,
            user,
            password: settings.ssh_password.clone(),
            private_key: settings.ssh_private_key.clone(),
        })
    }
}

pub(crate) struct BlockingSession {
    session: Session,
}

impl BlockingSession {
    /// Open a TCP connection, handshake, and authenticate. `timeout_secs`
    /// bounds the connect and every subsequent blocking call on the session.
    pub(crate) fn connect(target: &SshTarget, timeout_secs: u64) -> Result<Self> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| RemoteFsError::Connect {
                host: target.host.clone(),
                port: target.port,
                message: e.to_string(),
            })?
            .next()
            .ok_or_else(|| RemoteFsError::Connect {
                host: target.host.clone(),
                port: target.port,
                message: "no address resolved".into(),
            })?;

        let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(timeout_secs.min(10)))
            .map_err(|e| RemoteFsError::Connect {
                host: target.host.clone(),
                port: target.port,
                message: e.to_string(),
            })?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout((timeout_secs * 1000) as u32);
        session.handshake()?;

        if let Some(key) = target.private_key.as_deref().filter(|k| !k.is_empty()) {
            session.userauth_pubkey_memory(&target.user, None, key, None)?;
        } else if let Some(password) = target.password.as_deref() {
            session.userauth_password(&target.user, password)?;
        }

        if !session.authenticated() {
            return Err(RemoteFsError::Auth {
                user: target.user.clone(),
                host: target.host.clone(),
            });
        }

        Ok(Self { session })
    }

    /// Run one shell command, capturing stdout/stderr and the exit status.
    pub(crate) fn exec(&self, command: &str) -> Result<(i32, String, String)> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(io_to_ssh)?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(io_to_ssh)?;

        channel.wait_close()?;
        let status = channel.exit_status()?;
        Ok((status, stdout, stderr))
    }

    /// Like `exec` but failing on non-zero exit.
    pub(crate) fn exec_ok(&self, command: &str) -> Result<String> {
        let (status, stdout, stderr) = self.exec(command)?;
        if status != 0 {
            return Err(RemoteFsError::Command { status, stderr });
        }
        Ok(stdout)
    }

    pub(crate) fn download(&self, path: &str) -> Result<Vec<u8>> {
        let sftp = self.session.sftp()?;
        let mut file = sftp
            .open(Path::new(path))
            .map_err(|e| path_err(path, e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(io_to_ssh)?;
        Ok(bytes)
    }

    /// Range read of the first `n` bytes. May return fewer on short files.
    pub(crate) fn read_header(&self, path: &str, n: usize) -> Result<Vec<u8>> {
        let sftp = self.session.sftp()?;
        let mut file = sftp
            .open(Path::new(path))
            .map_err(|e| path_err(path, e))?;
        let mut bytes = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = file.read(&mut bytes[filled..]).map_err(io_to_ssh)?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        bytes.truncate(filled);
        Ok(bytes)
    }

    pub(crate) fn upload(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let sftp = self.session.sftp()?;
        let mut file = sftp
            .create(Path::new(path))
            .map_err(|e| path_err(path, e))?;
        file.write_all(bytes).map_err(io_to_ssh)?;
        Ok(())
    }

    pub(crate) fn unlink(&self, path: &str) -> Result<()> {
        let sftp = self.session.sftp()?;
        sftp.unlink(Path::new(path)).map_err(|e| path_err(path, e))
    }

    pub(crate) fn rename(&self, from: &str, to: &str) -> Result<()> {
        let sftp = self.session.sftp()?;
        sftp.rename(Path::new(from), Path::new(to), None)
            .map_err(|e| path_err(from, e))
    }

    pub(crate) fn exists(&self, path: &str) -> Result<bool> {
        let sftp = self.session.sftp()?;
        Ok(sftp.stat(Path::new(path)).is_ok())
    }

    /// Directory entries as (name, is_dir). The SFTP listing already excludes
    /// `.` and `..`.
    pub(crate) fn readdir(&self, path: &str) -> Result<Vec<(String, bool)>> {
        let sftp = self.session.sftp()?;
        let entries = sftp
            .readdir(Path::new(path))
            .map_err(|e| path_err(path, e))?;
        Ok(entries
            .into_iter()
            .filter_map(|(p, stat)| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                Some((name, stat.is_dir()))
            })
            .collect())
    }

    /// Remove a file tree rooted at `path`. Files and empty directories are
    /// removed depth-first over SFTP so no shell quoting is involved.
    pub(crate) fn delete_recursive(&self, path: &str) -> Result<()> {
        let sftp = self.session.sftp()?;
        let root = PathBuf::from(path);
        let stat = match sftp.stat(&root) {
            Ok(s) => s,
            // Already gone: deletion is idempotent.
            Err(_) => return Ok(()),
        };
        if !stat.is_dir() {
            return sftp.unlink(&root).map_err(|e| path_err(path, e));
        }

        let mut stack = vec![root.clone()];
        let mut dirs = Vec::new();
        while let Some(dir) = stack.pop() {
            for (entry, entry_stat) in sftp
                .readdir(&dir)
                .map_err(|e| path_err(&dir.to_string_lossy(), e))?
            {
                if entry_stat.is_dir() {
                    stack.push(entry);
                } else {
                    sftp.unlink(&entry)
                        .map_err(|e| path_err(&entry.to_string_lossy(), e))?;
                }
            }
            dirs.push(dir);
        }
        // Deepest directories were pushed last.
        for dir in dirs.iter().rev() {
            sftp.rmdir(dir)
                .map_err(|e| path_err(&dir.to_string_lossy(), e))?;
        }
        Ok(())
    }

    /// Remove a directory only when it is empty. Returns whether it was removed.
    pub(crate) fn rmdir_if_empty(&self, path: &str) -> Result<bool> {
        let sftp = self.session.sftp()?;
        let entries = match sftp.readdir(Path::new(path)) {
            Ok(e) => e,
            Err(_) => return Ok(false),
        };
        if entries.is_empty() {
            sftp.rmdir(Path::new(path)).map_err(|e| path_err(path, e))?;
            return Ok(true);
        }
        Ok(false)
    }
}

fn path_err(path: &str, e: ssh2::Error) -> RemoteFsError {
    RemoteFsError::Path {
        path: path.to_string(),
        message: e.to_string(),
    }
}

fn io_to_ssh(e: std::io::Error) -> RemoteFsError {
    RemoteFsError::Ssh(e.to_string())
}
