//! Canned command output for scheduler unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use session_orchestrator::scheduler::runner::{CommandOutput, CommandRunner};
use session_orchestrator::{AppError, Result};

/// Replays queued outputs per program; the last output repeats.
#[derive(Default)]
pub struct ScriptedRunner {
    outputs: Mutex<HashMap<String, VecDeque<Result<CommandOutput>>>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    /// Queue a successful exit with `stdout`.
    pub fn ok(&self, program: &str, stdout: &str) -> &Self {
        self.push(program, Ok(output(0, stdout, "")))
    }

    /// Queue an exit with `code` and `stderr`.
    pub fn fail(&self, program: &str, code: i32, stderr: &str) -> &Self {
        self.push(program, Ok(output(code, "", stderr)))
    }

    /// Queue a runner-level error (spawn failure, timeout).
    pub fn error(&self, program: &str, message: &str) -> &Self {
        self.push(program, Err(AppError::Io(message.to_owned())))
    }

    fn push(&self, program: &str, result: Result<CommandOutput>) -> &Self {
        self.outputs
            .lock()
            .unwrap()
            .entry(program.to_owned())
            .or_default()
            .push_back(result);
        self
    }

    /// Every invocation so far.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations of one program.
    pub fn calls_to(&self, program: &str) -> usize {
        self.calls().iter().filter(|(p, _)| p == program).count()
    }
}

pub fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: stdout.to_owned(),
        stderr: stderr.to_owned(),
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_owned(), args.to_vec()));
            let mut outputs = self.outputs.lock().unwrap();
            let queue = outputs
                .get_mut(program)
                .unwrap_or_else(|| panic!("no scripted output for {program}"));
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        })
    }
}
