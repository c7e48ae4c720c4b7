//! Resilience interception policy
//!
//! A capability table mapping operation names the sandbox cannot perform
//! (process spawning, shell commands, multi-process APIs) to substitute
//! handlers. A substitute never fails: it hands back a structurally valid
//! success value and one advisory line telling the user the side effect did
//! not happen.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ResilienceConfig;

pub const SUBPROCESS_RUN: &str = "subprocess.run";
pub const SUBPROCESS_POPEN: &str = "subprocess.Popen";
pub const SUBPROCESS_CHECK_OUTPUT: &str = "subprocess.check_output";
pub const SUBPROCESS_CALL: &str = "subprocess.call";
pub const OS_SYSTEM: &str = "os.system";
pub const PROCESS_START: &str = "multiprocessing.Process.start";
pub const CPU_COUNT: &str = "multiprocessing.cpu_count";

/// Result of a mocked `subprocess.run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    pub args: String,
    pub returncode: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Stand-in for a spawned process; every query reports a clean exit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyProcess {
    pub returncode: i32,
}

impl DummyProcess {
    pub fn communicate(&mut self, _input: Option<&[u8]>) -> (Vec<u8>, Vec<u8>) {
        (Vec::new(), Vec::new())
    }

    pub fn wait(&mut self) -> i32 {
        self.returncode
    }

    pub fn poll(&self) -> Option<i32> {
        Some(self.returncode)
    }
}

/// Value handed back to the intercepted caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockValue {
    Completed(CompletedProcess),
    Process(DummyProcess),
    ExitCode(i32),
    Output(Vec<u8>),
    Count(usize),
    Unit,
}

/// Outcome of one interception
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interception {
    pub operation: String,
    /// Full advisory line, prefix included
    pub advisory: String,
    pub value: MockValue,
}

/// A substitute returns the advisory body and the mock value
pub type Substitute = Arc<dyn Fn(&str) -> (String, MockValue) + Send + Sync>;

/// Operation name -> substitute handler
#[derive(Clone)]
pub struct CapabilityTable {
    handlers: HashMap<String, Substitute>,
    advisory_prefix: String,
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("operations", &self.operations())
            .field("advisory_prefix", &self.advisory_prefix)
            .finish()
    }
}

impl CapabilityTable {
    /// A table that intercepts nothing
    pub fn empty(advisory_prefix: &str) -> Self {
        Self {
            handlers: HashMap::new(),
            advisory_prefix: advisory_prefix.to_string(),
        }
    }

    /// The standard table, minus anything the config disables
    pub fn from_config(config: &ResilienceConfig) -> Self {
        let mut table = Self::empty(&config.advisory_prefix);
        if !config.enabled {
            tracing::info!("Resilience interception disabled");
            return table;
        }

        table.register(SUBPROCESS_RUN, |args| {
            (
                format!("Intercepted blocked call 'subprocess.run({})'.", args),
                MockValue::Completed(CompletedProcess {
                    args: args.to_string(),
                    returncode: 0,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }),
            )
        });
        table.register(SUBPROCESS_POPEN, |_| {
            (
                "'subprocess.Popen' prevented. Spawning dummy process.".to_string(),
                MockValue::Process(DummyProcess::default()),
            )
        });
        table.register(SUBPROCESS_CHECK_OUTPUT, |args| {
            (
                format!("'subprocess.check_output({})' intercepted. Returning empty output.", args),
                MockValue::Output(Vec::new()),
            )
        });
        table.register(SUBPROCESS_CALL, |args| {
            (
                format!("'subprocess.call({})' intercepted. Returning exit code 0.", args),
                MockValue::ExitCode(0),
            )
        });
        table.register(OS_SYSTEM, |cmd| {
            (
                format!("'os.system' ({}) intercepted. Terminal simulation only.", cmd),
                MockValue::ExitCode(0),
            )
        });
        table.register(PROCESS_START, |_| {
            (
                "Multiprocessing start() ignored in sandbox.".to_string(),
                MockValue::Unit,
            )
        });
        table.register(CPU_COUNT, |_| {
            (
                "'multiprocessing.cpu_count' reports a single CPU in sandbox.".to_string(),
                MockValue::Count(1),
            )
        });

        for op in &config.disabled_operations {
            if table.remove(op) {
                tracing::info!("Interception disabled for {}", op);
            } else {
                tracing::warn!("Unknown operation in disabled_operations: {}", op);
            }
        }
        table
    }

    /// Install or replace the substitute for `operation`
    pub fn register<F>(&mut self, operation: &str, handler: F)
    where
        F: Fn(&str) -> (String, MockValue) + Send + Sync + 'static,
    {
        self.handlers.insert(operation.to_string(), Arc::new(handler));
    }

    pub fn remove(&mut self, operation: &str) -> bool {
        self.handlers.remove(operation).is_some()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Registered operation names, sorted
    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        ops.sort_unstable();
        ops
    }

    /// Run the substitute for `operation`, if one is registered
    pub fn intercept(&self, operation: &str, args: &str) -> Option<Interception> {
        let handler = self.handlers.get(operation)?;
        let (body, value) = handler(args);
        tracing::info!("Intercepted {}({})", operation, args);
        Some(Interception {
            operation: operation.to_string(),
            advisory: format!("{}: {}", self.advisory_prefix, body),
            value,
        })
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}
