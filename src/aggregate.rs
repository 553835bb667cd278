// src/aggregate.rs

//! Folds the health responses of one run into a single pass/fail verdict.

use crate::model::{AuthType, HealthResponse};
use serde::Serialize;

/// Strictness knobs applied on top of "at least one success".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictPolicy {
    /// Every URL must succeed under at least one mechanism.
    pub strict_url: bool,
    /// Every selected mechanism must succeed for at least one URL.
    pub strict_auth: bool,
}

/// Everything a run produced, plus the distinct URLs and mechanisms that passed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub results: Vec<HealthResponse>,
    pub ok_urls: Vec<String>,
    pub ok_auth_types: Vec<AuthType>,
}

impl RunReport {
    pub fn from_results(results: Vec<HealthResponse>) -> Self {
        let mut ok_urls: Vec<String> = Vec::new();
        let mut ok_auth_types: Vec<AuthType> = Vec::new();

        for response in results.iter().filter(|r| r.is_ok()) {
            if !ok_urls.contains(&response.url) {
                ok_urls.push(response.url.clone());
            }
            if !ok_auth_types.contains(&response.auth_type) {
                ok_auth_types.push(response.auth_type);
            }
        }

        Self {
            results,
            ok_urls,
            ok_auth_types,
        }
    }

    /// `url_count` and `mechanism_count` are the sizes of the run's inputs,
    /// not of what came back.
    pub fn verdict(&self, policy: VerdictPolicy, url_count: usize, mechanism_count: usize) -> bool {
        if self.ok_urls.is_empty() {
            return false;
        }
        if policy.strict_url && self.ok_urls.len() != url_count {
            return false;
        }
        if policy.strict_auth && self.ok_auth_types.len() != mechanism_count {
            return false;
        }
        true
    }

    pub fn failed(&self) -> impl Iterator<Item = &HealthResponse> {
        self.results.iter().filter(|r| !r.is_ok())
    }
}

/// Verdict of a finished run together with its evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub healthy: bool,
    pub report: RunReport,
}
