//! GitHub issue/PR link maps.
//!
//! The GitHub ingress translates webhooks into system calls and needs a
//! bidirectional mapping between issues/PRs and jobs. The mapping is
//! persisted through the store when one is enabled, with a process-wide
//! in-memory fallback otherwise.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use synapse_core::JobId;

type LinkKey = (String, String, u64);

/// Process-wide in-memory link maps (fallback when persistence is
/// disabled, and a fast path either way).
#[derive(Debug, Default)]
pub struct GithubLinks {
    issues: RwLock<HashMap<LinkKey, JobId>>,
    prs: RwLock<HashMap<LinkKey, JobId>>,
}

impl GithubLinks {
    /// Creates empty maps.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issue → job link.
    pub fn link_issue(&self, owner: &str, repo: &str, number: u64, job_id: JobId) {
        self.issues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((owner.to_string(), repo.to_string(), number), job_id);
    }

    /// Records a PR → job link.
    pub fn link_pr(&self, owner: &str, repo: &str, number: u64, job_id: JobId) {
        self.prs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((owner.to_string(), repo.to_string(), number), job_id);
    }

    /// Resolves an issue link.
    #[must_use]
    pub fn job_by_issue(&self, owner: &str, repo: &str, number: u64) -> Option<JobId> {
        self.issues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(owner.to_string(), repo.to_string(), number))
            .cloned()
    }

    /// Resolves a PR link.
    #[must_use]
    pub fn job_by_pr(&self, owner: &str, repo: &str, number: u64) -> Option<JobId> {
        self.prs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(owner.to_string(), repo.to_string(), number))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_are_bidirectionally_resolvable() {
        let links = GithubLinks::new();
        links.link_issue("octo", "repo", 12, JobId::from("job_1"));
        links.link_pr("octo", "repo", 34, JobId::from("job_1"));

        assert_eq!(links.job_by_issue("octo", "repo", 12), Some(JobId::from("job_1")));
        assert_eq!(links.job_by_pr("octo", "repo", 34), Some(JobId::from("job_1")));
        assert_eq!(links.job_by_issue("octo", "repo", 99), None);
    }

    #[test]
    fn test_relink_overwrites() {
        let links = GithubLinks::new();
        links.link_issue("octo", "repo", 12, JobId::from("job_1"));
        links.link_issue("octo", "repo", 12, JobId::from("job_2"));
        assert_eq!(links.job_by_issue("octo", "repo", 12), Some(JobId::from("job_2")));
    }
}
