//! 本地命令执行器
//!
//! 用于调用系统工具（如 ping），带超时控制

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout => write!(f, "Command timed out"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) => Some(e),
            CommandError::Timeout => None,
        }
    }
}

impl CommandRunner {
    /// 执行简单命令（无流式输出）
    ///
    /// 超时后子进程随 future 一起被丢弃并终止
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tokio::select! {
            result = command.output() => {
                result.map_err(CommandError::SpawnFailed)
            }
            _ = tokio::time::sleep(timeout) => {
                Err(CommandError::Timeout)
            }
        }
    }
}
