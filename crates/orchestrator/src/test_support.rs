use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::exec::{CommandExecutor, CommandOutput};

/// Records every script and replays queued outputs; an empty queue answers
/// with a successful, silent run.
#[derive(Default)]
pub(crate) struct FakeExecutor {
    scripts: StdMutex<Vec<String>>,
    outputs: StdMutex<VecDeque<CommandOutput>>,
}

impl FakeExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, stdout: &str, stderr: &str, exit_code: i32) {
        self.outputs.lock().unwrap().push_back(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
        });
    }

    pub(crate) fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn run(&self, script: &str) -> Result<CommandOutput> {
        self.scripts.lock().unwrap().push(script.to_string());
        let next = self.outputs.lock().unwrap().pop_front();
        Ok(next.unwrap_or(CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        }))
    }
}
