//! Command runners for tests.

use crate::errors::ExecutionError;
use crate::runner::{CommandInvocation, CommandOutput, CommandRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Script {
    writes: Vec<(String, String)>,
    exit_code: Option<i32>,
    stderr: String,
    launch_error: Option<String>,
    delay: Option<Duration>,
}

/// A runner that plays back per-stage scripts instead of spawning processes.
///
/// Each stage can be told to write files (relative to the invocation's
/// working directory), sleep, exit non-zero, or fail to launch. Stages
/// without a script succeed without side effects.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    /// Creates a runner with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `stage` write `contents` to `path` when it runs.
    #[must_use]
    pub fn writes(self, stage: &str, path: &str, contents: &str) -> Self {
        self.script(stage)
            .writes
            .push((path.to_string(), contents.to_string()));
        self
    }

    /// Makes `stage` exit with `code` and `stderr`.
    #[must_use]
    pub fn fails(self, stage: &str, code: i32, stderr: &str) -> Self {
        {
            let mut scripts = self.scripts.lock();
            let script = scripts.entry(stage.to_string()).or_default();
            script.exit_code = Some(code);
            script.stderr = stderr.to_string();
        }
        self
    }

    /// Makes `stage` fail to launch.
    #[must_use]
    pub fn fails_to_launch(self, stage: &str, message: &str) -> Self {
        self.script(stage).launch_error = Some(message.to_string());
        self
    }

    /// Makes `stage` sleep before finishing.
    #[must_use]
    pub fn sleeps(self, stage: &str, delay: Duration) -> Self {
        self.script(stage).delay = Some(delay);
        self
    }

    /// Replaces the contents a stage writes on its next runs.
    pub fn set_writes(&self, stage: &str, path: &str, contents: &str) {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(stage.to_string()).or_default();
        script.writes.retain(|(p, _)| p != path);
        script.writes.push((path.to_string(), contents.to_string()));
    }

    /// Returns the stages invoked, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns how many times `stage` was invoked.
    #[must_use]
    pub fn call_count(&self, stage: &str) -> usize {
        self.calls.lock().iter().filter(|s| *s == stage).count()
    }

    /// Returns the invoked stages, sorted.
    #[must_use]
    pub fn called_stages(&self) -> Vec<String> {
        let mut calls = self.calls();
        calls.sort();
        calls
    }

    /// Returns the highest number of commands that were running at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Forgets recorded calls.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
        self.peak.store(0, Ordering::SeqCst);
    }

    fn script(&self, stage: &str) -> parking_lot::MappedMutexGuard<'_, Script> {
        parking_lot::MutexGuard::map(self.scripts.lock(), |scripts| {
            scripts.entry(stage.to_string()).or_default()
        })
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, ExecutionError> {
        self.calls.lock().push(invocation.stage.clone());
        let script = self
            .scripts
            .lock()
            .get(&invocation.stage)
            .cloned()
            .unwrap_or_default();

        if let Some(message) = script.launch_error {
            return Err(ExecutionError::Launch(message));
        }

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        let mut result = Ok(());
        for (path, contents) in &script.writes {
            let target = invocation.working_dir.join(path);
            if let Some(parent) = target.parent() {
                result = tokio::fs::create_dir_all(parent).await;
            }
            if result.is_ok() {
                result = tokio::fs::write(&target, contents).await;
            }
            if result.is_err() {
                break;
            }
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = result {
            return Ok(CommandOutput::failure(1, e.to_string()));
        }

        Ok(match script.exit_code {
            Some(code) => CommandOutput::failure(code, script.stderr),
            None => CommandOutput::success(),
        })
    }
}
