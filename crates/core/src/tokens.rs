// crates/core/src/tokens.rs
//! Short, stable, persisted aliases for opaque server ids.
//!
//! A top-level job gets its own (sanitized) name, suffixed `-2`, `-3`, ... for
//! later jobs with the same name. Schedules and executions get
//! `<parent token>/<n>`. Counters are per prefix (`etl` for top-level jobs
//! named etl, `etl/` for the children of token `etl`) and never reused.
//!
//! The store is rewritten in full, atomically, after every mint. It assumes a
//! single writer process; nothing locks the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::IdChain;
use crate::error::TokenError;

/// On-disk layout: three maps, read whole and written whole.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct TokenState {
    /// Innermost id -> token.
    #[serde(default)]
    tokens: BTreeMap<String, String>,
    /// Prefix -> last counter issued under it.
    #[serde(default)]
    counters: BTreeMap<String, u64>,
    /// Token -> full id chain.
    #[serde(default)]
    ids: BTreeMap<String, IdChain>,
}

#[derive(Debug)]
pub struct SessionTokenRegistry {
    path: Option<PathBuf>,
    state: TokenState,
}

impl SessionTokenRegistry {
    /// Load the store at `path`. A missing file is an empty store; it is
    /// created on the first mint.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TokenError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => TokenState::default(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| TokenError::Malformed {
                path: path.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TokenState::default(),
            Err(e) => return Err(TokenError::io(&path, e)),
        };
        tracing::debug!(path = %path.display(), tokens = state.ids.len(), "token store opened");
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    /// A registry that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: TokenState::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.state.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.ids.is_empty()
    }

    /// Token for the innermost id of `chain`, minting and persisting one on
    /// first sight.
    ///
    /// `name` only matters for a top-level chain (`[job]`); deeper chains
    /// derive their token from the parent's, which must already exist.
    pub fn token_for(&mut self, name: &str, chain: &[String]) -> Result<String, TokenError> {
        let Some(innermost) = chain.last() else {
            return Err(TokenError::InvalidChain { len: 0 });
        };
        if chain.len() > 3 {
            return Err(TokenError::InvalidChain { len: chain.len() });
        }
        if let Some(token) = self.state.tokens.get(innermost) {
            return Ok(token.clone());
        }

        let prefix = match chain.len() {
            1 => sanitize(name),
            n => {
                let parent = &chain[n - 2];
                let parent_token = self
                    .state
                    .tokens
                    .get(parent)
                    .ok_or_else(|| TokenError::UnknownParent { id: parent.clone() })?;
                format!("{parent_token}/")
            }
        };

        let previous_counter = self.state.counters.get(&prefix).copied();
        let mut counter = previous_counter.unwrap_or(0);
        let token = loop {
            counter += 1;
            let candidate = compose(&prefix, counter, chain.len() == 1);
            if !self.state.ids.contains_key(&candidate) {
                break candidate;
            }
        };

        self.state.counters.insert(prefix.clone(), counter);
        self.state.tokens.insert(innermost.clone(), token.clone());
        self.state.ids.insert(token.clone(), chain.to_vec());

        if let Err(e) = self.persist() {
            // Roll back so a token is never handed out without being stored.
            self.state.tokens.remove(innermost);
            self.state.ids.remove(&token);
            match previous_counter {
                Some(c) => self.state.counters.insert(prefix, c),
                None => self.state.counters.remove(&prefix),
            };
            return Err(e);
        }

        tracing::info!(%token, id = %innermost, depth = chain.len(), "session token minted");
        Ok(token)
    }

    /// Full id chain behind `token`.
    pub fn ids_for(&self, token: &str) -> Option<&[String]> {
        self.state.ids.get(token).map(Vec::as_slice)
    }

    /// Token already assigned to `id`, without minting.
    pub fn token_of(&self, id: &str) -> Option<&str> {
        self.state.tokens.get(id).map(String::as_str)
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<(), TokenError> {
        self.persist()
    }

    fn persist(&self) -> Result<(), TokenError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| TokenError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(&self.state).map_err(|e| TokenError::Malformed {
            path: path.clone(),
            message: e.to_string(),
        })?;

        // Write atomically (temp file + rename)
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| TokenError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, path).map_err(|e| TokenError::io(path, e))?;
        Ok(())
    }
}

fn compose(prefix: &str, counter: u64, top_level: bool) -> String {
    match (top_level, counter) {
        (true, 1) => prefix.to_string(),
        (true, n) => format!("{prefix}-{n}"),
        (false, n) => format!("{prefix}{n}"),
    }
}

/// Lowercase, `/`-free token stem. Falls back to `job`.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "job".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn chain(ids: &[&str]) -> IdChain {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_same_id_same_token() {
        let mut reg = SessionTokenRegistry::in_memory();
        let a = reg.token_for("nightly", &chain(&["j1"])).unwrap();
        let b = reg.token_for("ignored", &chain(&["j1"])).unwrap();
        assert_eq!(a, "nightly");
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_repeated_names_get_numeric_suffix() {
        let mut reg = SessionTokenRegistry::in_memory();
        assert_eq!(reg.token_for("etl", &chain(&["j1"])).unwrap(), "etl");
        assert_eq!(reg.token_for("etl", &chain(&["j2"])).unwrap(), "etl-2");
        assert_eq!(reg.token_for("etl", &chain(&["j3"])).unwrap(), "etl-3");
    }

    #[test]
    fn test_suffix_skips_tokens_taken_by_other_names() {
        let mut reg = SessionTokenRegistry::in_memory();
        assert_eq!(reg.token_for("etl-2", &chain(&["j0"])).unwrap(), "etl-2");
        assert_eq!(reg.token_for("etl", &chain(&["j1"])).unwrap(), "etl");
        assert_eq!(reg.token_for("etl", &chain(&["j2"])).unwrap(), "etl-3");
    }

    #[test]
    fn test_child_tokens_use_parent_prefix() {
        let mut reg = SessionTokenRegistry::in_memory();
        reg.token_for("Daily Report", &chain(&["j1"])).unwrap();
        let s1 = reg.token_for("", &chain(&["j1", "s1"])).unwrap();
        let s2 = reg.token_for("", &chain(&["j1", "s2"])).unwrap();
        let e1 = reg.token_for("", &chain(&["j1", "s2", "e1"])).unwrap();

        assert_eq!(s1, "daily-report/1");
        assert_eq!(s2, "daily-report/2");
        assert_eq!(e1, "daily-report/2/1");
        assert_eq!(reg.ids_for(&e1), Some(chain(&["j1", "s2", "e1"]).as_slice()));
        assert_eq!(reg.token_of("s1"), Some("daily-report/1"));
    }

    #[test]
    fn test_invalid_chains_rejected() {
        let mut reg = SessionTokenRegistry::in_memory();
        assert!(matches!(
            reg.token_for("x", &[]),
            Err(TokenError::InvalidChain { len: 0 })
        ));
        assert!(matches!(
            reg.token_for("x", &chain(&["a", "b", "c", "d"])),
            Err(TokenError::InvalidChain { len: 4 })
        ));
        assert!(matches!(
            reg.token_for("x", &chain(&["unknown", "s1"])),
            Err(TokenError::UnknownParent { .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_ids_for_unknown_token() {
        let reg = SessionTokenRegistry::in_memory();
        assert_eq!(reg.ids_for("nope"), None);
    }

    #[test]
    fn test_tokens_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session-tokens.json");

        let mut reg = SessionTokenRegistry::open(&path).unwrap();
        reg.token_for("etl", &chain(&["j1"])).unwrap();
        reg.token_for("etl", &chain(&["j1", "s1"])).unwrap();
        // Persisted on mint, before close.
        assert!(path.exists());
        drop(reg);

        let mut reloaded = SessionTokenRegistry::open(&path).unwrap();
        assert_eq!(reloaded.token_of("j1"), Some("etl"));
        assert_eq!(reloaded.ids_for("etl/1"), Some(chain(&["j1", "s1"]).as_slice()));
        // Counters survive too: the next schedule is /2, the next job etl-2.
        assert_eq!(reloaded.token_for("", &chain(&["j1", "s2"])).unwrap(), "etl/2");
        assert_eq!(reloaded.token_for("etl", &chain(&["j9"])).unwrap(), "etl-2");
        reloaded.close().unwrap();
    }

    #[test]
    fn test_malformed_store_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session-tokens.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SessionTokenRegistry::open(&path),
            Err(TokenError::Malformed { .. })
        ));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("My Job/v2"), "my-job-v2");
        assert_eq!(sanitize("  "), "job");
        assert_eq!(sanitize("daily_etl"), "daily_etl");
    }
}
