//! Git branch bookkeeping for the managed repositories.
//!
//! Implemented as a thin consumer of the task runner: every operation is an
//! ordered command sequence run in the repository's directory, and the caller
//! reads the usual `(code, stdout, stderr)` result.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::Config;
use crate::notify::Notifier;
use crate::task::{CommandStep, ExecutionResult, RunOptions, TaskRunner};

const CURRENT_BRANCH: &str = "git branch --show-current";
const LIST_BRANCHES: &str = "git branch -r";

/// One managed repository checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoId {
    Core,
    Locale,
    Patcher,
}

impl RepoId {
    pub fn name(self) -> &'static str {
        match self {
            RepoId::Core => "core",
            RepoId::Locale => "locale",
            RepoId::Patcher => "patcher",
        }
    }
}

/// Resolve a user-supplied repository id; `all` fans out to every checkout.
pub fn parse_targets(raw: &str) -> Option<Vec<RepoId>> {
    match raw.to_ascii_lowercase().as_str() {
        "core" => Some(vec![RepoId::Core]),
        "locale" => Some(vec![RepoId::Locale]),
        "patcher" => Some(vec![RepoId::Patcher]),
        "all" => Some(vec![RepoId::Core, RepoId::Locale, RepoId::Patcher]),
        _ => None,
    }
}

pub const KNOWN_TARGETS: &str = "core, locale, patcher, all";

/// Branch operations per repository. Every call populates a
/// `(code, stdout, stderr)` result readable by the caller; failures are
/// reported through the result code, never panicked on.
#[async_trait]
pub trait BranchOps: Send + Sync {
    async fn current_branch(&self, repo: RepoId, opts: RunOptions) -> ExecutionResult;
    async fn switch_branch(&self, repo: RepoId, branch: &str, opts: RunOptions) -> ExecutionResult;
    async fn update_repository(&self, repo: RepoId, opts: RunOptions) -> ExecutionResult;
    async fn list_branches(&self, repo: RepoId, opts: RunOptions) -> ExecutionResult;
}

pub struct GitBranches {
    notifier: Arc<dyn Notifier>,
    base_dir: PathBuf,
    core_dir: String,
    locale_dir: String,
    patcher_dir: PathBuf,
    service_user: Option<String>,
}

impl GitBranches {
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            base_dir: config.base_dir.clone(),
            core_dir: config.core_dir.clone(),
            locale_dir: config.locale_dir.clone(),
            patcher_dir: config.patcher_files_dir.clone(),
            service_user: config.service_user.clone(),
        }
    }

    fn enter_repo(&self, repo: RepoId) -> CommandStep {
        let dir = match repo {
            RepoId::Core => self.base_dir.join(&self.core_dir),
            RepoId::Locale => self.base_dir.join(&self.locale_dir),
            RepoId::Patcher => self.patcher_dir.clone(),
        };
        CommandStep::silent(format!("cd {}", dir.display()))
    }

    async fn run_sequence(&self, sequence: &[CommandStep], opts: RunOptions) -> ExecutionResult {
        let mut runner = TaskRunner::new(
            self.notifier.clone(),
            self.base_dir.clone(),
            self.service_user.clone(),
        );
        // Validation failures are already notified by the runner; the caller
        // inspects the recorded result instead of an error value.
        let _ = runner.run(sequence, opts).await;
        runner.last_result().clone()
    }
}

#[async_trait]
impl BranchOps for GitBranches {
    async fn current_branch(&self, repo: RepoId, opts: RunOptions) -> ExecutionResult {
        let sequence = [
            self.enter_repo(repo),
            CommandStep::new(CURRENT_BRANCH, "Checking the branch.."),
        ];
        self.run_sequence(&sequence, opts).await
    }

    async fn switch_branch(&self, repo: RepoId, branch: &str, opts: RunOptions) -> ExecutionResult {
        let sequence = [
            self.enter_repo(repo),
            CommandStep::new(
                format!("git reset --hard origin/{branch}"),
                "Resetting branch..",
            ),
            CommandStep::new(
                format!("git switch {branch}"),
                format!("Switching branch to {branch}.."),
            ),
        ];
        let result = self.run_sequence(&sequence, opts).await;
        if !result.ok() {
            return result;
        }
        self.update_repository(repo, opts).await
    }

    async fn update_repository(&self, repo: RepoId, opts: RunOptions) -> ExecutionResult {
        let current = self
            .current_branch(repo, RunOptions { silent: true, ..opts })
            .await;
        if !current.ok() {
            return current;
        }
        let branch = current.stdout.trim().to_string();

        let sequence = [
            self.enter_repo(repo),
            CommandStep::new(
                format!("git reset --hard origin/{branch}"),
                format!("Resetting branch {branch}.."),
            ),
            CommandStep::new("git pull", "Pulling recent changes.."),
        ];
        self.run_sequence(&sequence, opts).await
    }

    async fn list_branches(&self, repo: RepoId, opts: RunOptions) -> ExecutionResult {
        let sequence = [
            self.enter_repo(repo),
            CommandStep::new("git pull", "Pulling recent changes.."),
            CommandStep::new(LIST_BRANCHES, "Fetching actual branches.."),
        ];
        let mut result = self.run_sequence(&sequence, opts).await;
        result.stdout = beautify_branches(&result.stdout);
        result
    }
}

/// Reduce `git branch -r` output to bare branch names: reference lines
/// (`origin/HEAD -> origin/main`) are dropped and the `origin/` prefix is
/// stripped from the rest.
pub fn beautify_branches(output: &str) -> String {
    static ORIGIN: OnceLock<Regex> = OnceLock::new();
    let origin = ORIGIN.get_or_init(|| Regex::new(r"origin/(\S+)").expect("pattern is valid"));

    output
        .lines()
        .filter(|line| !line.contains("->"))
        .map(|line| match origin.captures(line) {
            Some(caps) => caps[1].to_string(),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
