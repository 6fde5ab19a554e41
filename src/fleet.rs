//! Fleet lifecycle operations: start/stop, core rebuild, quest rebuild.
//!
//! Thin compositions of command sequences over the task runner plus the
//! branch collaborator. Start/stop output is skipped on purpose; the game
//! launcher scripts are extremely noisy.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::branch::{BranchOps, RepoId};
use crate::config::Config;
use crate::notify::Notifier;
use crate::task::{CommandStep, ExecutionResult, RunOptions, TaskRunner};

/// File in the quest directory naming one compilable quest per line.
const QUEST_LIST: &str = "locale_list";
const QUEST_COMPILER: &str = "./qc";

pub struct Fleet {
    notifier: Arc<dyn Notifier>,
    branches: Arc<dyn BranchOps>,
    base_dir: PathBuf,
    server_dir: String,
    core_dir: String,
    quest_dir: String,
    compile_command: String,
    start_command: String,
    stop_command: String,
    service_user: Option<String>,
}

impl Fleet {
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>, branches: Arc<dyn BranchOps>) -> Self {
        Self {
            notifier,
            branches,
            base_dir: config.base_dir.clone(),
            server_dir: config.server_dir.clone(),
            core_dir: config.core_dir.clone(),
            quest_dir: config.quest_dir.clone(),
            compile_command: config.compile_command.clone(),
            start_command: config.start_command.clone(),
            stop_command: config.stop_command.clone(),
            service_user: config.service_user.clone(),
        }
    }

    fn runner(&self) -> TaskRunner {
        TaskRunner::new(
            self.notifier.clone(),
            self.base_dir.clone(),
            self.service_user.clone(),
        )
    }

    fn enter_server(&self) -> CommandStep {
        CommandStep::new(
            format!("cd {}", self.base_dir.join(&self.server_dir).display()),
            "Entering server directory..",
        )
    }

    pub async fn start(&self, opts: RunOptions) -> Result<()> {
        let sequence = [
            self.enter_server(),
            CommandStep::new(self.start_command.clone(), "Starting server.."),
        ];
        self.runner()
            .run(&sequence, RunOptions { skip_output: true, ..opts })
            .await?;
        Ok(())
    }

    pub async fn stop(&self, opts: RunOptions) -> Result<()> {
        let sequence = [
            self.enter_server(),
            CommandStep::new(self.stop_command.clone(), "Stopping server.."),
        ];
        self.runner()
            .run(&sequence, RunOptions { skip_output: true, ..opts })
            .await?;
        Ok(())
    }

    pub async fn restart(&self, opts: RunOptions) -> Result<()> {
        self.notifier.send("Restarting server..").await;
        self.stop(opts).await?;
        self.start(opts).await
    }

    /// Pull the latest locale changes. The caller decides what the outcome
    /// means; nothing here aborts on a bad pull.
    pub async fn update(&self) -> ExecutionResult {
        self.branches
            .update_repository(RepoId::Locale, RunOptions::default())
            .await
    }

    /// Full core rebuild: stop whatever is running, update the core
    /// checkout, recompile, start again.
    pub async fn rebuild_core(&self) -> Result<()> {
        self.notifier.send("Stopping server if running..").await;
        let _ = self
            .stop(RunOptions { ignore_result: true, ..Default::default() })
            .await;

        self.notifier.send("Updating server repo..").await;
        let update = self
            .branches
            .update_repository(RepoId::Core, RunOptions::default())
            .await;
        if !update.ok() {
            bail!("core repository update failed: {}", update.stderr);
        }

        self.notifier.send("Rebuilding core..").await;
        let sequence = [
            CommandStep::new(
                format!("cd {}", self.base_dir.join(&self.core_dir).display()),
                "Entering source directory..",
            ),
            CommandStep::new(
                self.compile_command.clone(),
                "Rebuilding source from scratch..",
            ),
        ];
        self.runner().run(&sequence, RunOptions::default()).await?;

        self.notifier.send("Starting server..").await;
        self.start(RunOptions::default()).await
    }

    /// Rebuild every quest named by the list file. Per-quest failures are
    /// collected into one aggregate report instead of a notification per
    /// quest.
    pub async fn rebuild_quest(&self) -> Result<()> {
        let quest_dir = self.base_dir.join(&self.quest_dir);

        self.notifier.send("Cleaning up old work..").await;
        let prebuild = [
            CommandStep::new(
                format!("cd {}", quest_dir.display()),
                "Entering quest directory..",
            ),
            CommandStep::new("rm -rf object", "Removing object directory.."),
            CommandStep::new("mkdir object", "Recreating object directory.."),
        ];
        self.runner().run(&prebuild, RunOptions::default()).await?;

        self.notifier.send("Updating server repo..").await;
        let update = self
            .branches
            .update_repository(RepoId::Locale, RunOptions::default())
            .await;
        if !update.ok() {
            bail!("locale repository update failed: {}", update.stderr);
        }

        self.notifier.send("Rebuilding quests..").await;
        let list = tokio::fs::read_to_string(quest_dir.join(QUEST_LIST))
            .await
            .with_context(|| format!("reading {}", quest_dir.join(QUEST_LIST).display()))?;

        let mut report = String::new();
        let mut compiled = 0usize;
        let mut total = 0usize;

        for name in list.lines().map(str::trim).filter(|line| !line.is_empty()) {
            total += 1;
            report.push_str(&format!("Compiling {name}..\n"));

            let sequence = [
                CommandStep::silent(format!("cd {}", quest_dir.display())),
                CommandStep::silent(format!("{QUEST_COMPILER} {name}")),
            ];
            let mut runner = self.runner();
            let _ = runner
                .run(&sequence, RunOptions { ignore_result: true, silent: true, ..Default::default() })
                .await;

            if runner.check_result() {
                report.push_str(&format!("{name} was compiled successfully!\n"));
                compiled += 1;
            } else {
                report.push_str(&format!("An error occurred during compilation of {name}\n"));
                report.push_str("Compilation produced the following error:\n");
                report.push_str(&format!("{}\n", runner.last_result().stderr));
            }
        }

        self.notifier.send(report.trim_end()).await;

        let permissions = [
            CommandStep::silent(format!("cd {}", quest_dir.display())),
            CommandStep::new("chmod -R 770 object", "Setting permission to object folder.."),
        ];
        self.runner().run(&permissions, RunOptions::default()).await?;

        self.notifier
            .send(&format!("{compiled}/{total} quests were compiled successfully!"))
            .await;

        Ok(())
    }
}
