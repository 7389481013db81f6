//! Remote executor over SSH.
//!
//! libssh2 is blocking, so every call opens a session inside
//! `spawn_blocking`. Sessions are not reused between calls.

use crate::config::SshConfig;
use anyhow::Context;
use async_trait::async_trait;
use snapshot_core::{Host, RemoteExecutor};
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum SshAuth {
    Key(PathBuf),
    Password(String),
    Agent,
}

#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: String,
    port: u16,
    auth: SshAuth,
}

/// Single-quote `s` for a POSIX shell.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

impl SshExecutor {
    pub fn new(config: &SshConfig) -> Self {
        let auth = match (&config.private_key, &config.password) {
            (Some(key), _) => SshAuth::Key(key.clone()),
            (None, Some(password)) => SshAuth::Password(password.clone()),
            (None, None) => SshAuth::Agent,
        };
        Self {
            user: config.user.clone(),
            port: config.port,
            auth,
        }
    }

    fn connect(&self, host: &str) -> anyhow::Result<ssh2::Session> {
        let tcp = TcpStream::connect((host, self.port))
            .with_context(|| format!("connecting to {}:{}", host, self.port))?;
        let mut sess = ssh2::Session::new()?;
        sess.set_tcp_stream(tcp);
        sess.handshake()?;

        let auth = match &self.auth {
            SshAuth::Key(key) => sess.userauth_pubkey_file(&self.user, None, key, None),
            SshAuth::Password(password) => sess.userauth_password(&self.user, password),
            SshAuth::Agent => sess.userauth_agent(&self.user),
        };
        auth.map_err(|e| anyhow::anyhow!("SSH authentication failed for {}@{}: {}", self.user, host, e))?;

        if !sess.authenticated() {
            anyhow::bail!("SSH authentication failed for {}@{}", self.user, host);
        }
        Ok(sess)
    }

    fn run_blocking(&self, host: &str, command: &str) -> anyhow::Result<String> {
        let sess = self.connect(host)?;
        exec(&sess, command)
    }

    fn upload_blocking(&self, host: &str, local: &Path, remote_dir: &str) -> anyhow::Result<()> {
        let name = local
            .file_name()
            .with_context(|| format!("{} has no file name", local.display()))?
            .to_string_lossy()
            .into_owned();
        let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), name);

        let sess = self.connect(host)?;
        exec(&sess, &format!("mkdir -p {}", quote(remote_dir)))?;

        let mut source = std::fs::File::open(local)
            .with_context(|| format!("opening {}", local.display()))?;
        let sftp = sess.sftp()?;
        let mut remote_file = sftp
            .create(Path::new(&remote_path))
            .with_context(|| format!("creating {host}:{remote_path}"))?;
        let bytes = std::io::copy(&mut source, &mut remote_file)?;
        tracing::debug!(host, remote_path = %remote_path, bytes, "Uploaded file");
        Ok(())
    }

    fn download_blocking(&self, host: &str, remote_path: &str, local_dir: &Path) -> anyhow::Result<PathBuf> {
        let name = remote_path
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .with_context(|| format!("{remote_path} has no file name"))?;
        std::fs::create_dir_all(local_dir)?;
        let local_path = local_dir.join(name);

        let sess = self.connect(host)?;
        let sftp = sess.sftp()?;
        let mut remote_file = sftp
            .open(Path::new(remote_path))
            .with_context(|| format!("opening {host}:{remote_path}"))?;
        let mut dest = std::fs::File::create(&local_path)?;
        let bytes = std::io::copy(&mut remote_file, &mut dest)?;
        tracing::debug!(host, remote_path, bytes, "Downloaded file");
        Ok(local_path)
    }
}

fn exec(sess: &ssh2::Session, command: &str) -> anyhow::Result<String> {
    let mut channel = sess.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;
    channel.wait_close()?;

    let status = channel.exit_status()?;
    if status != 0 {
        anyhow::bail!("`{}` exited with {}: {}", command, status, stderr.trim());
    }
    Ok(stdout)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &Host, command: &str) -> anyhow::Result<String> {
        let this = self.clone();
        let host = host.to_string();
        let command = command.to_string();
        tracing::debug!(host = %host, command = %command, "Running remote command");
        tokio::task::spawn_blocking(move || this.run_blocking(&host, &command)).await?
    }

    async fn upload_file(&self, host: &Host, local: &Path, remote_dir: &str) -> anyhow::Result<()> {
        let this = self.clone();
        let host = host.to_string();
        let local = local.to_path_buf();
        let remote_dir = remote_dir.to_string();
        tokio::task::spawn_blocking(move || this.upload_blocking(&host, &local, &remote_dir)).await?
    }

    async fn download_file(&self, host: &Host, remote_path: &str, local_dir: &Path) -> anyhow::Result<PathBuf> {
        let this = self.clone();
        let host = host.to_string();
        let remote_path = remote_path.to_string();
        let local_dir = local_dir.to_path_buf();
        tokio::task::spawn_blocking(move || this.download_blocking(&host, &remote_path, &local_dir)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_auth_selection() {
        let mut config = SshConfig::default();
        assert!(matches!(SshExecutor::new(&config).auth, SshAuth::Agent));

        config.password = Some("secret".into());
        assert!(matches!(SshExecutor::new(&config).auth, SshAuth::Password(_)));

        config.private_key = Some(PathBuf::from("/home/c/.ssh/id_ed25519"));
        assert!(matches!(SshExecutor::new(&config).auth, SshAuth::Key(_)));
    }
}
