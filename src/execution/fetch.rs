//! Fetching a repository at one commit into a workspace.
//!
//! The frontend serves repositories over git's smart HTTP protocol at
//! `<frontend>/.internal-code-intel/git/<repo>`, authenticated with the same
//! credentials as the queue API. Only the requested commit is fetched.

use std::path::Path;

use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::commander::Commander;
use crate::error::IndexerError;
use crate::queue::http::AUTH_USERNAME;

/// Path of the git endpoint relative to the frontend URL.
const GIT_PATH: &str = ".internal-code-intel/git/";

/// Placeholder shown instead of the token in step descriptions.
const REDACTED: &str = "REDACTED";

/// Builds the authenticated clone URL for `repo`.
pub fn make_clone_url(frontend_url: &str, auth_token: &str, repo: &str) -> Result<Url, IndexerError> {
    let clone_url_error = |reason: String| IndexerError::CloneUrl {
        repo: repo.to_string(),
        reason,
    };

    let mut base = Url::parse(frontend_url).map_err(|e| clone_url_error(e.to_string()))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let mut url = base
        .join(GIT_PATH)
        .and_then(|git| git.join(repo))
        .map_err(|e| clone_url_error(e.to_string()))?;

    url.set_username(AUTH_USERNAME)
        .and_then(|()| url.set_password(Some(auth_token)))
        .map_err(|()| clone_url_error("URL cannot carry credentials".to_string()))?;

    Ok(url)
}

/// Checks that a repository name is safe to use in URLs and command lines.
///
/// Accepts one or more `/`-separated segments such as `acme/widgets` or
/// `github.com/acme/widgets`.
pub fn validate_repository_name(name: &str) -> Result<(), IndexerError> {
    let invalid = |reason: String| Err(IndexerError::InvalidJob(reason));

    if name.is_empty() {
        return invalid("repository name is empty".to_string());
    }
    if name.len() > 256 {
        return invalid(format!(
            "repository name too long ({} chars, max 256)",
            name.len()
        ));
    }
    for part in name.split('/') {
        if part.is_empty() {
            return invalid(format!(
                "invalid repository name '{}': empty path segment",
                name
            ));
        }
        if part.starts_with('.') || part.starts_with('-') {
            return invalid(format!(
                "invalid repository name '{}': segments must not start with '.' or '-'",
                name
            ));
        }
        if let Some(ch) = part
            .chars()
            .find(|ch| !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.'))
        {
            return invalid(format!(
                "invalid character '{}' in repository name '{}'",
                ch, name
            ));
        }
    }
    Ok(())
}

/// Checks that a commit is a plausible git revision and not a flag.
pub fn validate_commit(commit: &str) -> Result<(), IndexerError> {
    let invalid = |reason: String| Err(IndexerError::InvalidJob(reason));

    if commit.is_empty() {
        return invalid("commit is empty".to_string());
    }
    if commit.len() > 256 {
        return invalid(format!("commit too long ({} chars, max 256)", commit.len()));
    }
    if commit.starts_with('-') {
        return invalid(format!("commit '{}' must not start with '-'", commit));
    }
    if commit.contains("..") {
        return invalid(format!("commit '{}' must not contain '..'", commit));
    }
    if let Some(ch) = commit
        .chars()
        .find(|ch| !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '/' | '.' | '-' | '_' | '~' | '^'))
    {
        return invalid(format!("invalid character '{}' in commit '{}'", ch, commit));
    }
    Ok(())
}

/// A git invocation and its printable form.
struct GitStep {
    args: Vec<String>,
    display: String,
}

impl GitStep {
    fn new(args: Vec<String>, secret: &str) -> Self {
        let display = std::iter::once("git".to_string())
            .chain(args.iter().map(|arg| {
                if secret.is_empty() {
                    arg.clone()
                } else {
                    arg.replace(secret, REDACTED)
                }
            }))
            .collect::<Vec<_>>()
            .join(" ");
        Self { args, display }
    }
}

fn git_steps(dir: &Path, clone_url: &Url, commit: &str) -> Vec<GitStep> {
    // The URL holds the token percent-encoded; redact that form.
    let secret = clone_url.password().unwrap_or_default();
    let dir = dir.display().to_string();
    let step = |args: &[&str]| {
        let mut full = vec!["-C".to_string(), dir.clone()];
        full.extend(args.iter().map(|a| a.to_string()));
        GitStep::new(full, secret)
    };

    vec![
        step(&["init"]),
        step(&["-c", "protocol.version=2", "fetch", clone_url.as_str(), commit]),
        step(&["checkout", commit]),
    ]
}

/// Fetches `repo` at `commit` into `dir`.
///
/// Runs `git init`, a protocol v2 fetch of the single commit, and a checkout,
/// stopping at the first failure. The returned error names the failed step
/// with the credential redacted.
pub async fn fetch_repository(
    commander: &dyn Commander,
    cancel: &CancellationToken,
    frontend_url: &str,
    auth_token: &str,
    repo: &str,
    commit: &str,
    dir: &Path,
) -> Result<(), IndexerError> {
    let clone_url = make_clone_url(frontend_url, auth_token, repo)?;

    for step in git_steps(dir, &clone_url, commit) {
        debug!(repo, commit, step = %step.display, "Running git step");
        commander
            .run(cancel, "git", &step.args)
            .await
            .map_err(|source| {
                if source.is_cancelled() {
                    IndexerError::Cancelled
                } else {
                    IndexerError::Fetch {
                        step: step.display.clone(),
                        source,
                    }
                }
            })?;
    }

    Ok(())
}
