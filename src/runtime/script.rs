//! Line-oriented script runtime
//!
//! One statement per line:
//!
//! ```text
//! print <text>                 write text and a newline to stdout
//! write <text>                 write text to stdout, no newline
//! eprint <text>                write text and a newline to stderr
//! let <name> = input <prompt>  read a line of input
//! let <name> = <text>          assign
//! run | popen | check_output | call | system <args>
//!                              process operations (intercepted)
//! spawn                        start a worker process (intercepted)
//! cpus                         query the CPU count (intercepted)
//! import <module>              builtin or installed module
//! sleep <ms>                   pause
//! echo <text>                  result value of the evaluation
//! raise <message>              fail
//! # comment
//! ```
//!
//! Text supports `{name}` interpolation and the escapes `\n`, `\r`, `\t`,
//! `\e` (ESC) and `\\`. Variables persist across evaluations.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{BootFailure, EvaluationFault, Runtime};
use crate::config::RuntimeConfig;
use crate::core::resilience::{
    MockValue, CPU_COUNT, OS_SYSTEM, PROCESS_START, SUBPROCESS_CALL, SUBPROCESS_CHECK_OUTPUT,
    SUBPROCESS_POPEN, SUBPROCESS_RUN,
};
use crate::core::session::ExecContext;

#[derive(Default)]
struct ScriptState {
    booted: bool,
    vars: HashMap<String, String>,
    installed: HashSet<String>,
}

pub struct ScriptRuntime {
    builtin_modules: HashSet<String>,
    preload_packages: Vec<String>,
    boot_error: Option<String>,
    state: Mutex<ScriptState>,
}

impl ScriptRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            builtin_modules: config.builtin_modules.iter().cloned().collect(),
            preload_packages: config.preload_packages.clone(),
            boot_error: None,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// A runtime whose boot always fails with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            boot_error: Some(message.to_string()),
            ..Self::new(&RuntimeConfig::default())
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn interpolate(&self, text: &str) -> Result<String, EvaluationFault> {
        let unescaped = unescape(text);
        let state = self.lock();
        let mut out = String::with_capacity(unescaped.len());
        let mut rest = unescaped.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    let value = state.vars.get(name).ok_or_else(|| {
                        EvaluationFault::new(format!("NameError: name '{}' is not defined", name))
                    })?;
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn set_var(&self, name: &str, value: String) {
        self.lock().vars.insert(name.to_string(), value);
    }

    fn intercept(
        &self,
        ctx: &ExecContext,
        operation: &str,
        args: &str,
    ) -> Result<MockValue, EvaluationFault> {
        ctx.intercept(operation, args).ok_or_else(|| {
            EvaluationFault::new(format!(
                "OSError: [Errno 52] Function not implemented: '{}'",
                operation
            ))
        })
    }

    async fn execute(
        &self,
        statement: &str,
        ctx: &ExecContext,
    ) -> Result<Option<String>, EvaluationFault> {
        let (keyword, rest) = statement
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim_start()))
            .unwrap_or((statement, ""));

        match keyword {
            "print" => {
                ctx.stdout(&format!("{}\n", self.interpolate(rest)?));
            }
            "write" => {
                ctx.stdout(&self.interpolate(rest)?);
            }
            "eprint" => {
                ctx.stderr(&format!("{}\n", self.interpolate(rest)?));
            }
            "let" => {
                let (name, expr) = rest.split_once('=').ok_or_else(|| {
                    EvaluationFault::new("SyntaxError: expected 'let <name> = <value>'")
                })?;
                let name = name.trim();
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(EvaluationFault::new(format!(
                        "SyntaxError: invalid name '{}'",
                        name
                    )));
                }
                let expr = expr.trim();
                let value = match expr.strip_prefix("input") {
                    Some(prompt) if prompt.is_empty() || prompt.starts_with(' ') => {
                        let prompt = self.interpolate(prompt.trim_start())?;
                        self.read_input(ctx, &prompt).await?
                    }
                    _ => self.interpolate(expr)?,
                };
                self.set_var(name, value);
            }
            "input" => {
                let prompt = self.interpolate(rest)?;
                self.read_input(ctx, &prompt).await?;
            }
            "run" => {
                if let MockValue::Completed(done) = self.intercept(ctx, SUBPROCESS_RUN, rest)? {
                    self.set_var("returncode", done.returncode.to_string());
                    self.set_var("output", String::from_utf8_lossy(&done.stdout).into_owned());
                }
            }
            "popen" => {
                if let MockValue::Process(mut proc) = self.intercept(ctx, SUBPROCESS_POPEN, rest)? {
                    let (out, _err) = proc.communicate(None);
                    self.set_var("output", String::from_utf8_lossy(&out).into_owned());
                    let code = match proc.poll() {
                        Some(code) => code,
                        None => proc.wait(),
                    };
                    self.set_var("returncode", code.to_string());
                }
            }
            "check_output" => {
                if let MockValue::Output(out) = self.intercept(ctx, SUBPROCESS_CHECK_OUTPUT, rest)? {
                    self.set_var("output", String::from_utf8_lossy(&out).into_owned());
                }
            }
            "call" | "system" => {
                let op = if keyword == "call" { SUBPROCESS_CALL } else { OS_SYSTEM };
                if let MockValue::ExitCode(code) = self.intercept(ctx, op, rest)? {
                    self.set_var("returncode", code.to_string());
                }
            }
            "spawn" => {
                self.intercept(ctx, PROCESS_START, rest)?;
            }
            "cpus" => {
                if let MockValue::Count(n) = self.intercept(ctx, CPU_COUNT, rest)? {
                    self.set_var("cpus", n.to_string());
                }
            }
            "import" => {
                let module = rest.trim();
                let root = module.split('.').next().unwrap_or(module);
                let available =
                    self.builtin_modules.contains(root) || self.lock().installed.contains(root);
                if !available {
                    return Err(EvaluationFault::new(format!(
                        "ModuleNotFoundError: No module named '{}'",
                        module
                    )));
                }
            }
            "sleep" => {
                let ms: u64 = rest.trim().parse().map_err(|_| {
                    EvaluationFault::new(format!("ValueError: invalid duration '{}'", rest))
                })?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "echo" => return Ok(Some(self.interpolate(rest)?)),
            "raise" => {
                let message = self.interpolate(rest)?;
                return Err(EvaluationFault::new(if message.is_empty() {
                    "RuntimeError".to_string()
                } else {
                    message
                }));
            }
            other => {
                return Err(EvaluationFault::new(format!(
                    "SyntaxError: unknown statement '{}'",
                    other
                )))
            }
        }
        Ok(None)
    }

    async fn read_input(&self, ctx: &ExecContext, prompt: &str) -> Result<String, EvaluationFault> {
        ctx.read_line(prompt)
            .await
            .map_err(|e| EvaluationFault::new(format!("EOFError: {}", e)))
    }
}

#[async_trait]
impl Runtime for ScriptRuntime {
    fn name(&self) -> &str {
        "script"
    }

    async fn boot(&self) -> Result<(), BootFailure> {
        if let Some(message) = &self.boot_error {
            return Err(BootFailure::new(message.clone()));
        }
        let mut state = self.lock();
        for package in &self.preload_packages {
            state.installed.insert(package.clone());
        }
        state.booted = true;
        tracing::debug!("Script runtime booted with {:?}", self.preload_packages);
        Ok(())
    }

    async fn evaluate(
        &self,
        source: &str,
        ctx: &ExecContext,
    ) -> Result<Option<String>, EvaluationFault> {
        if !self.lock().booted {
            return Err(EvaluationFault::new("RuntimeError: runtime not booted"));
        }

        let mut result = None;
        for statement in source.lines().map(str::trim) {
            if statement.is_empty() || statement.starts_with('#') {
                continue;
            }
            result = self.execute(statement, ctx).await?;
        }
        Ok(result)
    }

    async fn install_package(&self, name: &str) -> Result<(), EvaluationFault> {
        let mut installed = Vec::new();
        for requirement in name.split_whitespace() {
            let package = requirement.split(['=', '<', '>', '~', '!']).next().unwrap_or(requirement);
            let valid = !package.is_empty()
                && package
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid {
                return Err(EvaluationFault::new(format!(
                    "Can't find a pure Python 3 wheel for '{}'",
                    requirement
                )));
            }
            installed.push(package.to_lowercase().replace('-', "_"));
        }

        let mut state = self.lock();
        for package in installed {
            tracing::info!("Installed package {}", package);
            state.installed.insert(package);
        }
        Ok(())
    }
}

/// Expand backslash escapes
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('e') => out.push('\x1b'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb\rc\td"), "a\nb\rc\td");
        assert_eq!(unescape(r"\e[1mbold"), "\x1b[1mbold");
        assert_eq!(unescape(r"C:\\path\x"), "C:\\path\\x");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_interpolation() {
        let runtime = ScriptRuntime::new(&RuntimeConfig::default());
        runtime.set_var("name", "Ada".to_string());
        assert_eq!(runtime.interpolate("Hello, {name}!").unwrap(), "Hello, Ada!");
        assert_eq!(runtime.interpolate("open { brace").unwrap(), "open { brace");
        assert_eq!(
            runtime.interpolate("{missing}").unwrap_err().message,
            "NameError: name 'missing' is not defined"
        );
    }

    #[tokio::test]
    async fn test_failing_boot() {
        let runtime = ScriptRuntime::failing("network unreachable");
        assert_eq!(
            runtime.boot().await,
            Err(BootFailure::new("network unreachable"))
        );
    }

    #[tokio::test]
    async fn test_install_normalizes_names() {
        let runtime = ScriptRuntime::new(&RuntimeConfig::default());
        runtime.install_package("Typing-Extensions==4.0 rich").await.unwrap();
        let state = runtime.lock();
        assert!(state.installed.contains("typing_extensions"));
        assert!(state.installed.contains("rich"));
    }

    #[tokio::test]
    async fn test_install_rejects_invalid_names() {
        let runtime = ScriptRuntime::new(&RuntimeConfig::default());
        let err = runtime.install_package("../etc/passwd").await.unwrap_err();
        assert!(err.message.contains("../etc/passwd"));
    }
}
