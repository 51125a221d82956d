//! # Extension Dispatcher
//!
//! Runs extension calls as child processes.
//!
//! The operation's command template is split on whitespace into a program and
//! its arguments, then `{{executable}}` and `{{value}}` are substituted in each
//! word. The value therefore always reaches the process as part of a single
//! argument and no shell ever sees it.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use log::{debug, warn};
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use crate::extension::{ExtensionDefinition, ExtensionRegistry, OutputMethod};

const EXECUTABLE_PLACEHOLDER: &str = "{{executable}}";
const VALUE_PLACEHOLDER: &str = "{{value}}";

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),
    #[error("operation '{operation}' not found for extension '{name}'")]
    OperationNotFound { name: String, operation: String },
    #[error("operation '{operation}' of extension '{name}' has an empty command template")]
    EmptyCommand { name: String, operation: String },
    #[error("could not run extension '{name}' operation '{operation}': {source}")]
    Spawn {
        name: String,
        operation: String,
        #[source]
        source: io::Error,
    },
    #[error("extension '{name}' operation '{operation}' timed out after {timeout:?}")]
    ExecutionTimeout {
        name: String,
        operation: String,
        timeout: Duration,
    },
    #[error("extension '{name}' operation '{operation}' exited with code {exit_code}: {stderr}")]
    ExecutionFailed {
        name: String,
        operation: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("could not read output file {} of extension '{name}' operation '{operation}': {source}", .path.display())]
    OutputFile {
        name: String,
        operation: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Executes a named extension operation with a value and returns its output.
pub trait ExtensionRunner {
    fn run(&self, name: &str, operation: &str, value: &str) -> Result<String, ExtensionError>;
}

/// Dispatches extension calls to external executables described by an [`ExtensionRegistry`].
///
/// Calls block the current thread until the process finishes or its timeout
/// expires. Do not call from inside an async runtime.
///
/// On unix each extension runs in its own process group, and a timeout kills the
/// whole group so background processes it started cannot outlive the call.
/// Elsewhere only the direct child is killed.
pub struct ExtensionDispatcher {
    registry: ExtensionRegistry,
    runtime: Runtime,
}

impl ExtensionDispatcher {
    pub fn new(registry: ExtensionRegistry) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        Ok(Self { registry, runtime })
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    async fn execute(&self, definition: &ExtensionDefinition, operation: &str, argv: Vec<String>) -> Result<String, ExtensionError> {
        let name = &definition.name;
        let spawn_error = |source: io::Error| ExtensionError::Spawn {
            name: name.clone(),
            operation: operation.to_string(),
            source,
        };

        let (program, args) = argv.split_first().ok_or_else(|| ExtensionError::EmptyCommand {
            name: name.clone(),
            operation: operation.to_string(),
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(spawn_error)?;
        let pid = child.id();

        // On timeout the child is dropped, which kills it; the rest of its group is killed below.
        let output = match tokio::time::timeout(definition.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(spawn_error)?,
            Err(_) => {
                warn!("extension '{}' operation '{}' timed out after {:?}", name, operation, definition.timeout);
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                return Err(ExtensionError::ExecutionTimeout {
                    name: name.clone(),
                    operation: operation.to_string(),
                    timeout: definition.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(ExtensionError::ExecutionFailed {
                name: name.clone(),
                operation: operation.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(trim_line_break(&stdout).to_string())
    }

    fn capture(&self, definition: &ExtensionDefinition, operation: &str, stdout: String) -> Result<String, ExtensionError> {
        match definition.output {
            OutputMethod::Stdout => Ok(stdout),
            OutputMethod::File { cleanup } => {
                let path = PathBuf::from(stdout.trim());
                let content = fs::read_to_string(&path).map_err(|source| ExtensionError::OutputFile {
                    name: definition.name.clone(),
                    operation: operation.to_string(),
                    path: path.clone(),
                    source,
                })?;
                if cleanup {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!("could not remove output file {}: {}", path.display(), err);
                    }
                }
                Ok(trim_line_break(&content).to_string())
            }
        }
    }
}

impl ExtensionRunner for ExtensionDispatcher {
    fn run(&self, name: &str, operation: &str, value: &str) -> Result<String, ExtensionError> {
        let definition = self
            .registry
            .lookup(name)
            .ok_or_else(|| ExtensionError::ExtensionNotFound(name.to_string()))?;

        let command_template = definition.operations.get(operation).ok_or_else(|| {
            ExtensionError::OperationNotFound {
                name: name.to_string(),
                operation: operation.to_string(),
            }
        })?;

        let argv = build_command(definition, command_template, value);
        debug!("running extension '{}' operation '{}': {:?}", name, operation, argv);

        let stdout = self.runtime.block_on(self.execute(definition, operation, argv))?;
        self.capture(definition, operation, stdout)
    }
}

/// Splits `command_template` into words and substitutes the executable path and value.
pub fn build_command(definition: &ExtensionDefinition, command_template: &str, value: &str) -> Vec<String> {
    let executable = definition.executable.to_string_lossy();
    command_template
        .split_whitespace()
        .map(|word| word.replace(EXECUTABLE_PLACEHOLDER, &executable).replace(VALUE_PLACEHOLDER, value))
        .collect()
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    debug!("killing process group {}", pid);
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {},
        Err(err) => warn!("could not kill process group {}: {}", pid, err),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

fn trim_line_break(text: &str) -> &str {
    match text.strip_suffix('\n') {
        Some(text) => text.strip_suffix('\r').unwrap_or(text),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_substitutes_words() {
        let definition = ExtensionDefinition::new("gen", "/usr/bin/gen");
        let argv = build_command(&definition, "{{executable}}  --mode upper --text={{value}}", "two words");
        assert_eq!(argv, vec!["/usr/bin/gen", "--mode", "upper", "--text=two words"]);
    }

    #[test]
    fn test_build_command_value_is_not_split() {
        let definition = ExtensionDefinition::new("sh", "sh");
        let argv = build_command(&definition, "{{executable}} -c {{value}}", "echo a; exit 3");
        assert_eq!(argv, vec!["sh", "-c", "echo a; exit 3"]);
    }

    #[test]
    fn test_trim_line_break() {
        assert_eq!(trim_line_break("hello\n"), "hello");
        assert_eq!(trim_line_break("hello\r\n"), "hello");
        assert_eq!(trim_line_break("hello\n\n"), "hello\n");
        assert_eq!(trim_line_break("hello"), "hello");
    }

    #[test]
    fn test_extension_not_found() {
        let dispatcher = ExtensionDispatcher::new(ExtensionRegistry::new()).unwrap();
        match dispatcher.run("missing", "op", "value") {
            Err(ExtensionError::ExtensionNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("Expected ExtensionNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_operation_not_found() {
        let mut registry = ExtensionRegistry::new();
        registry.register(ExtensionDefinition::new("echo", "echo").with_operation("say", "{{executable}} {{value}}"));
        let dispatcher = ExtensionDispatcher::new(registry).unwrap();

        match dispatcher.run("echo", "shout", "value") {
            Err(ExtensionError::OperationNotFound { name, operation }) => {
                assert_eq!(name, "echo");
                assert_eq!(operation, "shout");
            },
            other => panic!("Expected OperationNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_command_template() {
        let mut registry = ExtensionRegistry::new();
        registry.register(ExtensionDefinition::new("blank", "echo").with_operation("op", "   "));
        let dispatcher = ExtensionDispatcher::new(registry).unwrap();

        assert!(matches!(dispatcher.run("blank", "op", "x"), Err(ExtensionError::EmptyCommand { .. })));
    }

    #[test]
    fn test_missing_executable() {
        let mut registry = ExtensionRegistry::new();
        registry.register(
            ExtensionDefinition::new("ghost", "/nonexistent/stencil-ghost").with_operation("op", "{{executable}} {{value}}"),
        );
        let dispatcher = ExtensionDispatcher::new(registry).unwrap();

        assert!(matches!(dispatcher.run("ghost", "op", "x"), Err(ExtensionError::Spawn { .. })));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use tempfile::TempDir;

        fn dispatcher_with(definition: ExtensionDefinition) -> ExtensionDispatcher {
            let mut registry = ExtensionRegistry::new();
            registry.register(definition);
            ExtensionDispatcher::new(registry).unwrap()
        }

        #[test]
        fn test_run_captures_stdout() {
            let dispatcher = dispatcher_with(
                ExtensionDefinition::new("echo", "echo").with_operation("say", "{{executable}} {{value}}"),
            );
            let output = dispatcher.run("echo", "say", "hello world").unwrap();
            assert_eq!(output, "hello world");
        }

        #[test]
        fn test_run_keeps_inner_line_breaks() {
            let dispatcher = dispatcher_with(
                ExtensionDefinition::new("sh", "sh").with_operation("exec", "{{executable}} -c {{value}}"),
            );
            let output = dispatcher.run("sh", "exec", "printf 'a\\nb\\n\\n'").unwrap();
            assert_eq!(output, "a\nb\n");
        }

        #[test]
        fn test_run_non_zero_exit() {
            let dispatcher = dispatcher_with(
                ExtensionDefinition::new("sh", "sh").with_operation("exec", "{{executable}} -c {{value}}"),
            );
            match dispatcher.run("sh", "exec", "echo partial; echo oops >&2; exit 3") {
                Err(ExtensionError::ExecutionFailed { name, operation, exit_code, stderr }) => {
                    assert_eq!(name, "sh");
                    assert_eq!(operation, "exec");
                    assert_eq!(exit_code, 3);
                    assert_eq!(stderr, "oops");
                },
                other => panic!("Expected ExecutionFailed, got {:?}", other),
            }
        }

        #[test]
        fn test_run_timeout() {
            let dispatcher = dispatcher_with(
                ExtensionDefinition::new("sleep", "sleep")
                    .with_operation("wait", "{{executable}} {{value}}")
                    .with_timeout(Duration::from_millis(200)),
            );
            let started = std::time::Instant::now();
            match dispatcher.run("sleep", "wait", "5") {
                Err(ExtensionError::ExecutionTimeout { name, operation, timeout }) => {
                    assert_eq!(name, "sleep");
                    assert_eq!(operation, "wait");
                    assert_eq!(timeout, Duration::from_millis(200));
                },
                other => panic!("Expected ExecutionTimeout, got {:?}", other),
            }
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[test]
        fn test_run_timeout_kills_background_processes() {
            let temp_dir = TempDir::new().unwrap();
            let pid_file = temp_dir.path().join("sleep.pid");
            let script = format!("sleep 30 & echo $! > {}; echo started", pid_file.display());

            let dispatcher = dispatcher_with(
                ExtensionDefinition::new("sh", "sh")
                    .with_operation("exec", "{{executable}} -c {{value}}")
                    .with_timeout(Duration::from_millis(500)),
            );
            let started = std::time::Instant::now();
            let result = dispatcher.run("sh", "exec", &script);

            assert!(matches!(result, Err(ExtensionError::ExecutionTimeout { .. })));
            assert!(started.elapsed() < Duration::from_secs(10));

            let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while process_alive(pid) {
                assert!(std::time::Instant::now() < deadline, "background process {} survived the timeout", pid);
                std::thread::sleep(Duration::from_millis(50));
            }
        }

        // A killed process that has not been reaped yet counts as gone.
        fn process_alive(pid: i32) -> bool {
            if cfg!(target_os = "linux") {
                match fs::read_to_string(format!("/proc/{}/stat", pid)) {
                    Ok(stat) => !stat.contains(") Z "),
                    Err(_) => false,
                }
            } else {
                nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
            }
        }

        #[test]
        fn test_run_file_output() {
            let temp_dir = TempDir::new().unwrap();
            let output_path = temp_dir.path().join("result.txt");
            let script = format!("printf 'from file\\n' > {0}; echo {0}", output_path.display());

            let dispatcher = dispatcher_with(
                ExtensionDefinition::new("writer", "sh")
                    .with_operation("write", "{{executable}} -c {{value}}")
                    .with_output(OutputMethod::File { cleanup: true }),
            );
            let output = dispatcher.run("writer", "write", &script).unwrap();

            assert_eq!(output, "from file");
            assert!(!output_path.exists(), "output file should be cleaned up");
        }

        #[test]
        fn test_run_file_output_missing_file() {
            let dispatcher = dispatcher_with(
                ExtensionDefinition::new("liar", "echo")
                    .with_operation("write", "{{executable}} {{value}}")
                    .with_output(OutputMethod::File { cleanup: false }),
            );
            let result = dispatcher.run("liar", "write", "/nonexistent/stencil-output.txt");
            assert!(matches!(result, Err(ExtensionError::OutputFile { .. })));
        }
    }
}
