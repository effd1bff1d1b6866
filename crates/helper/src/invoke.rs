//! Subprocess execution seam for the helper script.
//! 執行輔助腳本子程序的介接層。
//!
//! Helper runs are synchronous and unbounded: the script drives the host
//! application itself, so there is no sensible timeout to enforce — a hung
//! helper stalls the pipeline, by the same token a hung host would.
//! 輔助腳本的執行為同步且不設時限：腳本本身就在驅動主機應用程式，
//! 沒有合理的逾時可言——輔助程序卡住時整條流程便停擺，與主機卡住無異。

use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;

/// One subprocess invocation: program, arguments, working directory.
/// 一次子程序呼叫：程式、引數與工作目錄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Captured result of a finished subprocess.
/// 子程序結束後擷取的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to run '{0}': {1}")]
    /// 子程序無法啟動或等待失敗。
    Run(String, #[source] std::io::Error),
}

/// Runs commands; faked in tests, backed by `std::process` in production.
/// 執行指令的介面；測試中以替身實作，正式環境由 `std::process` 支援。
pub trait Invoker {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, InvokeError>;
}

/// Production invoker: blocks until the child exits, capturing its output.
/// 正式環境的執行器：阻塞等待子程序結束並擷取輸出。
pub struct SystemInvoker;

impl Invoker for SystemInvoker {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, InvokeError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        log::debug!("running {} {}", spec.program, spec.args.join(" "));
        let output = command
            .output()
            .map_err(|err| InvokeError::Run(spec.program.clone(), err))?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn captures_stdout_and_exit_code() {
        let spec = CommandSpec::new("sh").with_args(["-c", "printf ok"]);
        let output = SystemInvoker.run(&spec).expect("command should run");
        assert!(output.success());
        assert_eq!(output.stdout, b"ok");
    }

    #[test]
    fn honors_the_working_directory() {
        let dir = tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .with_args(["-c", "pwd"])
            .with_working_dir(dir.path());
        let output = SystemInvoker.run(&spec).unwrap();
        let printed = String::from_utf8_lossy(&output.stdout);
        assert_eq!(
            printed.trim_end(),
            dir.path().to_str().expect("utf-8 path")
        );
    }

    #[test]
    fn reports_nonzero_exit_codes() {
        let spec = CommandSpec::new("sh").with_args(["-c", "exit 3"]);
        let output = SystemInvoker.run(&spec).unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
    }

    #[test]
    fn missing_program_is_a_run_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary");
        let err = SystemInvoker.run(&spec).unwrap_err();
        assert!(matches!(err, InvokeError::Run(..)));
    }
}
