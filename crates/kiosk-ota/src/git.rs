use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiosk_core::OtaError;

use crate::command::{CommandClass, CommandError, CommandRunner, CommandTimeouts, Invocation};
use crate::layout::OtaLayout;

pub const DEFAULT_REMOTE: &str = "origin";

pub trait SourceControl: Send + Sync {
    fn remote(&self) -> &str;
    fn fetch(&self) -> Result<(), OtaError>;
    fn current_branch(&self) -> Result<String, OtaError>;
    fn head_commit(&self) -> Result<String, OtaError>;
    fn resolve_ref(&self, reference: &str) -> Result<Option<String>, OtaError>;
    fn status_porcelain(&self) -> Result<String, OtaError>;
    fn stash(&self) -> Result<String, OtaError>;
    fn checkout(&self, branch: &str) -> Result<String, OtaError>;
    fn pull(&self, branch: &str) -> Result<String, OtaError>;
    fn rev_list_count(&self, range: &str) -> Result<u64, OtaError>;
    fn log_oneline(&self, range: &str) -> Result<Vec<String>, OtaError>;
    fn remote_branches(&self) -> Result<Vec<String>, OtaError>;
    fn ls_remote(&self) -> Result<String, OtaError>;

    fn has_uncommitted_changes(&self) -> Result<bool, OtaError> {
        Ok(!self.status_porcelain()?.trim().is_empty())
    }

    fn remote_ref(&self, branch: &str) -> String {
        format!("{}/{}", self.remote(), branch)
    }
}

pub struct GitCli {
    repo_root: PathBuf,
    remote: String,
    runner: Arc<dyn CommandRunner>,
    timeouts: CommandTimeouts,
    status_exclusions: Vec<String>,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            repo_root: repo_root.into(),
            remote: DEFAULT_REMOTE.to_string(),
            runner,
            timeouts: CommandTimeouts::default(),
            status_exclusions: Vec::new(),
        }
    }

    pub fn for_layout(layout: &OtaLayout, runner: Arc<dyn CommandRunner>) -> Self {
        let layout = layout.clone().resolved();
        layout
            .owned_dirs_in_tree()
            .iter()
            .fold(Self::new(layout.repo_root(), runner), |git, relative| {
                git.exclude_from_status(relative)
            })
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: CommandTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn exclude_from_status(mut self, relative: &Path) -> Self {
        let normalized = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !normalized.is_empty() {
            self.status_exclusions.push(normalized);
        }
        self
    }

    fn invocation(&self, class: CommandClass, args: &[&str]) -> Invocation {
        Invocation::new("git", self.timeouts.for_class(class))
            .args(["-c", "core.autocrlf=false", "-c", "core.eol=lf"])
            .args(args.iter().copied())
            .current_dir(&self.repo_root)
            .env("GIT_TERMINAL_PROMPT", "0")
    }

    fn run_git(&self, class: CommandClass, args: &[&str]) -> Result<String, OtaError> {
        self.runner
            .run(&self.invocation(class, args))
            .map_err(|err| err.into_ota(class))
    }

    fn run_trimmed(&self, args: &[&str]) -> Result<String, OtaError> {
        Ok(self.run_git(CommandClass::Local, args)?.trim().to_string())
    }
}

impl SourceControl for GitCli {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn fetch(&self) -> Result<(), OtaError> {
        self.run_git(CommandClass::Network, &["fetch", "--prune", &self.remote])?;
        Ok(())
    }

    fn current_branch(&self) -> Result<String, OtaError> {
        self.run_trimmed(&["branch", "--show-current"])
    }

    fn head_commit(&self) -> Result<String, OtaError> {
        self.run_trimmed(&["rev-parse", "HEAD"])
    }

    fn resolve_ref(&self, reference: &str) -> Result<Option<String>, OtaError> {
        let verify = format!("{reference}^{{commit}}");
        match self.runner.run(&self.invocation(
            CommandClass::Local,
            &["rev-parse", "--verify", "--quiet", &verify],
        )) {
            Ok(output) => Ok(Some(output.trim().to_string())),
            Err(CommandError::Failed { exit_code: Some(1), .. }) => Ok(None),
            Err(err) => Err(err.into_ota(CommandClass::Local)),
        }
    }

    fn status_porcelain(&self) -> Result<String, OtaError> {
        let exclusions = self
            .status_exclusions
            .iter()
            .map(|path| format!(":(exclude){path}"))
            .collect::<Vec<_>>();
        let mut args = vec!["status", "--porcelain"];
        if !exclusions.is_empty() {
            args.push("--");
            args.push(".");
            args.extend(exclusions.iter().map(String::as_str));
        }
        self.run_git(CommandClass::Local, &args)
    }

    fn stash(&self) -> Result<String, OtaError> {
        self.run_git(CommandClass::Local, &["stash"])
    }

    fn checkout(&self, branch: &str) -> Result<String, OtaError> {
        self.run_git(CommandClass::Local, &["checkout", branch])
    }

    fn pull(&self, branch: &str) -> Result<String, OtaError> {
        let invocation = self.invocation(
            CommandClass::Network,
            &["pull", "--ff-only", &self.remote, branch],
        );
        self.runner.run(&invocation).map_err(|err| {
            let network = match &err {
                CommandError::Failed { stderr, .. } => {
                    looks_like_network_failure(stderr)
                }
                _ => true,
            };
            if network {
                err.into_ota(CommandClass::Network)
            } else {
                err.into_ota(CommandClass::Local)
            }
        })
    }

    fn rev_list_count(&self, range: &str) -> Result<u64, OtaError> {
        let raw = self.run_trimmed(&["rev-list", "--count", range])?;
        raw.parse::<u64>().map_err(|_| OtaError::Command {
            command: format!("git rev-list --count {range}"),
            exit_code: Some(0),
            stderr: format!("unexpected commit count output: '{raw}'"),
        })
    }

    fn log_oneline(&self, range: &str) -> Result<Vec<String>, OtaError> {
        let output = self.run_git(CommandClass::Local, &["log", "--oneline", range])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn remote_branches(&self) -> Result<Vec<String>, OtaError> {
        let namespace = format!("refs/remotes/{}", self.remote);
        let output = self.run_git(
            CommandClass::Local,
            &["for-each-ref", "--format=%(refname)", &namespace],
        )?;
        Ok(parse_remote_branches(&output, &self.remote))
    }

    fn ls_remote(&self) -> Result<String, OtaError> {
        self.run_git(CommandClass::Network, &["ls-remote", &self.remote])
    }
}

pub(crate) fn parse_remote_branches(output: &str, remote: &str) -> Vec<String> {
    let prefix = format!("refs/remotes/{remote}/");
    let mut branches = output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(&prefix))
        .filter(|branch| !branch.is_empty() && *branch != "HEAD")
        .map(str::to_string)
        .collect::<Vec<_>>();
    branches.sort();
    branches.dedup();
    branches
}

pub(crate) fn looks_like_network_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    [
        "could not resolve host",
        "could not read from remote repository",
        "unable to access",
        "connection refused",
        "connection timed out",
        "network is unreachable",
        "does not appear to be a git repository",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

pub fn validate_branch_name(branch: &str) -> Result<(), OtaError> {
    let trimmed = branch.trim();
    if trimmed.is_empty() {
        return Err(OtaError::invalid_input("branch name must not be empty"));
    }
    let bad = trimmed.starts_with('-')
        || trimmed.starts_with('/')
        || trimmed.ends_with('/')
        || trimmed.ends_with(".lock")
        || trimmed.contains("..")
        || trimmed.contains("@{")
        || trimmed
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || "~^:?*[\\".contains(ch));
    if bad || trimmed != branch {
        return Err(OtaError::invalid_input(format!(
            "invalid branch name: '{branch}'"
        )));
    }
    Ok(())
}
