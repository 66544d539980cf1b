//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use precise_indexer::execution::Commander;
use precise_indexer::CommandError;

/// One recorded command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn is_git(&self, subcommand: &str) -> bool {
        self.program == "git" && self.args.iter().any(|a| a == subcommand)
    }

    pub fn is_docker_run(&self) -> bool {
        self.program == "docker" && self.args.first().map(String::as_str) == Some("run")
    }

    pub fn is_docker_rm(&self) -> bool {
        self.program == "docker" && self.args.first().map(String::as_str) == Some("rm")
    }

    /// Directory passed to `git -C`.
    pub fn git_dir(&self) -> Option<PathBuf> {
        let pos = self.args.iter().position(|a| a == "-C")?;
        self.args.get(pos + 1).map(PathBuf::from)
    }

    /// Host side of the `-v host:/data` mount.
    pub fn mounted_dir(&self) -> Option<PathBuf> {
        let pos = self.args.iter().position(|a| a == "-v")?;
        let mount = self.args.get(pos + 1)?;
        mount.strip_suffix(":/data").map(PathBuf::from)
    }

    pub fn script(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

type Behavior = Box<dyn Fn(&Invocation) -> Result<(), CommandError> + Send + Sync>;

/// Commander that records invocations instead of running anything.
pub struct FakeCommander {
    invocations: Mutex<Vec<Invocation>>,
    behavior: Behavior,
    hold_index: bool,
    index_started: Notify,
    release_index: Notify,
}

impl FakeCommander {
    /// Every command succeeds.
    pub fn succeeding() -> Self {
        Self::with_behavior(|_| Ok(()))
    }

    /// Commands fail when `predicate` matches.
    pub fn failing_when(predicate: impl Fn(&Invocation) -> bool + Send + Sync + 'static) -> Self {
        Self::with_behavior(move |invocation| {
            if predicate(invocation) {
                Err(CommandError::NonZeroExit {
                    program: invocation.program.clone(),
                    status: "exit status: 128".to_string(),
                    stderr: "fatal: simulated failure".to_string(),
                })
            } else {
                Ok(())
            }
        })
    }

    pub fn with_behavior(
        behavior: impl Fn(&Invocation) -> Result<(), CommandError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            behavior: Box::new(behavior),
            hold_index: false,
            index_started: Notify::new(),
            release_index: Notify::new(),
        }
    }

    /// Makes `docker run` block until released or cancelled.
    pub fn holding_index(mut self) -> Self {
        self.hold_index = true;
        self
    }

    /// Waits until a `docker run` is blocked.
    pub async fn wait_for_index(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.index_started.notified())
            .await
            .expect("index step should start");
    }

    /// Unblocks one held `docker run`.
    pub fn release_index(&self) {
        self.release_index.notify_one();
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Commander for FakeCommander {
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[String],
    ) -> Result<(), CommandError> {
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        };
        self.invocations.lock().unwrap().push(invocation.clone());

        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        if self.hold_index && invocation.is_docker_run() {
            self.index_started.notify_one();
            tokio::select! {
                _ = cancel.cancelled() => return Err(CommandError::Cancelled),
                _ = self.release_index.notified() => {}
            }
        }

        (self.behavior)(&invocation)
    }
}

/// Polls `condition` every 10ms for up to 10s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 10s");
}

/// Number of entries in `dir`.
pub fn dir_entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub fn shared(commander: FakeCommander) -> Arc<FakeCommander> {
    Arc::new(commander)
}
