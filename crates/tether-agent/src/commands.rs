//! Built-in command handlers
//!
//! Each command is a self-contained OS query or mutation with no cross-call
//! state: one subprocess or filesystem call, output captured as text, every
//! failure reported through the handler's `Err` and contained by dispatch.

use crate::error::TableError;
use crate::table::{CommandTable, Handler};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tether_proto::{Hello, Value};
use tokio::process::Command;

/// Run a command and capture its stdout as text
async fn capture(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to run {program}"))?;

    if !output.status.success() {
        bail!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a line through the platform shell and capture its output
async fn shell_capture(line: &str) -> Result<String> {
    #[cfg(windows)]
    {
        capture("cmd", &["/C", line]).await
    }
    #[cfg(not(windows))]
    {
        capture("sh", &["-c", line]).await
    }
}

/// Build the identification sent right after connecting
pub async fn identify() -> Hello {
    Hello {
        hostname: capture("hostname", &[])
            .await
            .ok()
            .map(|name| name.trim().to_string()),
        os: Some(format!(
            "{}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )),
    }
}

/// Reports the machine's hostname
pub struct HostnameCommand;

#[async_trait]
impl Handler for HostnameCommand {
    async fn call(&self, _args: &[String]) -> Result<Value> {
        Ok(Value::Text(capture("hostname", &[]).await?.trim().to_string()))
    }
}

/// Reports the operating system version string
pub struct OsCommand;

#[async_trait]
impl Handler for OsCommand {
    async fn call(&self, _args: &[String]) -> Result<Value> {
        #[cfg(windows)]
        let version = shell_capture("ver").await?;
        #[cfg(not(windows))]
        let version = capture("uname", &["-a"]).await?;

        Ok(Value::Text(version.trim().to_string()))
    }
}

/// Reports the machine's primary IP address
pub struct IpCommand;

#[async_trait]
impl Handler for IpCommand {
    async fn call(&self, _args: &[String]) -> Result<Value> {
        // Routing-table trick: no packet is sent, the local address of a
        // connected UDP socket is the address the default route would use.
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(Value::Text(socket.local_addr()?.ip().to_string()))
    }
}

/// Lists user accounts known to the machine
pub struct UsersCommand;

#[async_trait]
impl Handler for UsersCommand {
    async fn call(&self, _args: &[String]) -> Result<Value> {
        #[cfg(windows)]
        let listing = shell_capture("net user").await?;
        #[cfg(not(windows))]
        let listing = capture("who", &["-a"]).await?;

        Ok(Value::Text(listing))
    }
}

/// Lists running processes
pub struct ProcessesCommand;

#[async_trait]
impl Handler for ProcessesCommand {
    async fn call(&self, _args: &[String]) -> Result<Value> {
        #[cfg(windows)]
        let listing = shell_capture("tasklist").await?;
        #[cfg(not(windows))]
        let listing = capture("ps", &["-e"]).await?;

        Ok(Value::Text(listing))
    }
}

/// Lists a directory; an empty path means the current directory
pub struct FilesCommand;

#[async_trait]
impl Handler for FilesCommand {
    async fn call(&self, args: &[String]) -> Result<Value> {
        let path = if args[0].is_empty() { "." } else { &args[0] };

        let mut dir = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("cannot list {path}"))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        Ok(Value::List(entries.into_iter().map(Value::Text).collect()))
    }
}

/// Runs a line through the platform shell
pub struct ShellCommand;

#[async_trait]
impl Handler for ShellCommand {
    async fn call(&self, args: &[String]) -> Result<Value> {
        if args[0].is_empty() {
            bail!("empty shell command");
        }
        Ok(Value::Text(shell_capture(&args[0]).await?))
    }
}

/// Terminates a process by PID
pub struct KillCommand;

#[async_trait]
impl Handler for KillCommand {
    async fn call(&self, args: &[String]) -> Result<Value> {
        let pid: u32 = args[0]
            .parse()
            .with_context(|| format!("invalid PID: {:?}", args[0]))?;

        #[cfg(windows)]
        capture("taskkill", &["/PID", &pid.to_string(), "/F"]).await?;
        #[cfg(not(windows))]
        capture("kill", &["-9", &pid.to_string()]).await?;

        Ok(Value::Text(format!("killed {pid}")))
    }
}

/// Reports the process environment
pub struct EnvironmentCommand;

#[async_trait]
impl Handler for EnvironmentCommand {
    async fn call(&self, _args: &[String]) -> Result<Value> {
        let vars: BTreeMap<String, Value> = std::env::vars()
            .map(|(key, value)| (key, Value::Text(value)))
            .collect();
        Ok(Value::Map(vars))
    }
}

/// Reads a file and returns its raw content
pub struct DownloadCommand;

#[async_trait]
impl Handler for DownloadCommand {
    async fn call(&self, args: &[String]) -> Result<Value> {
        if args[0].is_empty() {
            bail!("no path given");
        }
        let content = tokio::fs::read(&args[0])
            .await
            .with_context(|| format!("cannot read {}", args[0]))?;
        Ok(Value::Binary(Bytes::from(content)))
    }
}

/// Summarizes host identity in one structured payload
pub struct SystemInfoCommand;

#[async_trait]
impl Handler for SystemInfoCommand {
    async fn call(&self, _args: &[String]) -> Result<Value> {
        let mut info = BTreeMap::new();
        info.insert(
            "os".to_string(),
            Value::Text(std::env::consts::OS.to_string()),
        );
        info.insert(
            "arch".to_string(),
            Value::Text(std::env::consts::ARCH.to_string()),
        );
        info.insert(
            "family".to_string(),
            Value::Text(std::env::consts::FAMILY.to_string()),
        );
        if let Ok(hostname) = capture("hostname", &[]).await {
            info.insert(
                "hostname".to_string(),
                Value::Text(hostname.trim().to_string()),
            );
        }
        Ok(Value::Map(info))
    }
}

/// Build the agent's standard command table
pub fn builtin_table() -> Result<CommandTable, TableError> {
    Ok(CommandTable::builder()
        .register("hostname", Arc::new(HostnameCommand))?
        .register("os", Arc::new(OsCommand))?
        .register("ip", Arc::new(IpCommand))?
        .register("users", Arc::new(UsersCommand))?
        .register("processes", Arc::new(ProcessesCommand))?
        .register_with_args(
            "files",
            Arc::new(FilesCommand),
            &["path"],
            &["Path to list (Enter for current): "],
        )?
        .register_with_args(
            "shell",
            Arc::new(ShellCommand),
            &["command"],
            &["Command to execute: "],
        )?
        .register_with_args(
            "kill",
            Arc::new(KillCommand),
            &["pid"],
            &["PID of the process to terminate: "],
        )?
        .register("environment", Arc::new(EnvironmentCommand))?
        .register_with_args(
            "download",
            Arc::new(DownloadCommand),
            &["remote_path"],
            &["Path of the remote file: "],
        )?
        .register("system_info", Arc::new(SystemInfoCommand))?
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_builds() {
        let table = builtin_table().unwrap();
        assert!(table.spec("shell").is_some());
        assert_eq!(table.spec("kill").unwrap().arg_names(), ["pid"]);
        assert_eq!(table.spec("hostname").unwrap().arity(), 0);
    }

    #[tokio::test]
    async fn test_environment_contains_known_var() {
        std::env::set_var("TETHER_TEST_MARKER", "present");
        let value = EnvironmentCommand.call(&[]).await.unwrap();
        match value {
            Value::Map(vars) => {
                assert_eq!(
                    vars.get("TETHER_TEST_MARKER"),
                    Some(&Value::Text("present".to_string()))
                );
            }
            _ => panic!("expected a map"),
        }
    }

    #[tokio::test]
    async fn test_files_lists_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let args = vec![dir.path().to_string_lossy().into_owned()];
        let value = FilesCommand.call(&args).await.unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::Text("a.txt".to_string()),
                Value::Text("sub/".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn test_files_bad_path_errors() {
        let args = vec!["/definitely/not/a/path".to_string()];
        assert!(FilesCommand.call(&args).await.is_err());
    }

    #[tokio::test]
    async fn test_download_roundtrips_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0u8, 159, 146, 150]).unwrap();

        let args = vec![path.to_string_lossy().into_owned()];
        let value = DownloadCommand.call(&args).await.unwrap();
        assert_eq!(value, Value::Binary(Bytes::from_static(&[0, 159, 146, 150])));
    }

    #[tokio::test]
    async fn test_kill_rejects_bad_pid() {
        let args = vec!["not-a-pid".to_string()];
        let err = KillCommand.call(&args).await.unwrap_err();
        assert!(err.to_string().contains("invalid PID"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_captures_output() {
        let args = vec!["echo shell-works".to_string()];
        let value = ShellCommand.call(&args).await.unwrap();
        assert_eq!(value.as_text().map(str::trim), Some("shell-works"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_failure_is_an_error() {
        let args = vec!["exit 3".to_string()];
        assert!(ShellCommand.call(&args).await.is_err());
    }

    #[tokio::test]
    async fn test_identify_reports_os() {
        let hello = identify().await;
        assert_eq!(
            hello.os.as_deref(),
            Some(format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH).as_str())
        );
    }
}
