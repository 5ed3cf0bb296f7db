//! Deployment job domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a DNS label, which bounds app identifiers.
pub const MAX_APP_ID_LEN: usize = 63;

/// A queued request to build and expose one repository branch.
///
/// Produced by the external job system (a PR webhook or a repository import)
/// and owned by the single pipeline invocation that processes it.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJob {
    /// Credential used to fetch the source tree
    pub token: String,
    /// Full repository name, `owner/name`
    pub repo: String,
    pub branch: String,
    /// Pull request number, or 0 for a plain import
    #[serde(default)]
    pub pr_number: u64,
    pub owner: String,
    pub repo_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

impl DeploymentJob {
    /// Creates a job with no correlation or persistence identifiers
    pub fn new(
        token: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        pr_number: u64,
    ) -> Self {
        let repo = repo.into();
        let (owner, repo_name) = match repo.split_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => (String::new(), repo.clone()),
        };

        Self {
            token: token.into(),
            repo,
            branch: branch.into(),
            pr_number,
            owner,
            repo_name,
            installation_id: None,
            comment_id: None,
            project_id: None,
            deployment_id: None,
        }
    }

    /// Derives the application identifier for this job.
    ///
    /// The identifier is deterministic in (owner, repo, request number), so a
    /// redeploy of the same PR lands on the same subdomain. The result is a
    /// valid DNS label: lowercase alphanumerics and single hyphens, at most
    /// 63 characters.
    pub fn app_id(&self) -> String {
        let raw = if self.pr_number == 0 {
            format!("{}-{}", self.owner, self.repo_name)
        } else {
            format!("{}-{}-pr{}", self.owner, self.repo_name, self.pr_number)
        };

        let mut id = sanitize_label(&raw);

        if id.len() > MAX_APP_ID_LEN {
            // Keep the request suffix so PRs of the same long-named repo stay distinct
            let suffix = if self.pr_number == 0 {
                String::new()
            } else {
                format!("-pr{}", self.pr_number)
            };
            let keep = MAX_APP_ID_LEN - suffix.len();
            let head = id[..keep].trim_end_matches('-').to_string();
            id = format!("{}{}", head, suffix);
        }

        if id.is_empty() {
            "app".to_string()
        } else {
            id
        }
    }

    /// Validates that the fields the pipeline relies on are present
    pub fn validate(&self) -> Result<(), String> {
        if self.repo.trim().is_empty() {
            return Err("repo cannot be empty".to_string());
        }
        if self.branch.trim().is_empty() {
            return Err("branch cannot be empty".to_string());
        }
        if self.owner.trim().is_empty() || self.repo_name.trim().is_empty() {
            return Err("owner and repoName cannot be empty".to_string());
        }
        if self.branch.starts_with('-') {
            return Err("branch cannot start with '-'".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for DeploymentJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentJob")
            .field("token", &"<redacted>")
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("pr_number", &self.pr_number)
            .field("owner", &self.owner)
            .field("repo_name", &self.repo_name)
            .field("installation_id", &self.installation_id)
            .field("comment_id", &self.comment_id)
            .field("project_id", &self.project_id)
            .field("deployment_id", &self.deployment_id)
            .finish()
    }
}

/// Lowercases and maps every run of non-alphanumeric characters to one hyphen
pub fn sanitize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_hyphen = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    out
}
