use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::authz::errors::AuthzError;
use crate::authz::policy::{parse_policy_text, render_policy_text};
use crate::authz::types::{GroupingEdge, PolicyLine, PolicyTuple};

/// In-memory policy tuples, grouped by subject.
///
/// Subjects are listed in the order they first appeared and each subject's
/// tuples keep insertion order, so listings are deterministic.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    by_subject: HashMap<String, Vec<PolicyTuple>>,
    subject_order: Vec<String>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if an identical tuple is already present.
    pub fn add(&mut self, tuple: PolicyTuple) -> bool {
        match self.by_subject.get_mut(&tuple.subject) {
            Some(existing) if existing.contains(&tuple) => false,
            Some(existing) => {
                existing.push(tuple);
                true
            }
            None => {
                self.subject_order.push(tuple.subject.clone());
                self.by_subject.insert(tuple.subject.clone(), vec![tuple]);
                true
            }
        }
    }

    pub fn remove(&mut self, tuple: &PolicyTuple) -> bool {
        let Some(existing) = self.by_subject.get_mut(&tuple.subject) else {
            return false;
        };
        let before = existing.len();
        existing.retain(|t| t != tuple);
        let removed = existing.len() != before;
        if existing.is_empty() {
            self.drop_subject(&tuple.subject);
        }
        removed
    }

    /// Removes every tuple whose subject is `subject` and returns them.
    pub fn remove_subject(&mut self, subject: &str) -> Vec<PolicyTuple> {
        let removed = self.by_subject.get(subject).cloned().unwrap_or_default();
        if !removed.is_empty() {
            self.drop_subject(subject);
        }
        removed
    }

    pub fn contains(&self, tuple: &PolicyTuple) -> bool {
        self.by_subject
            .get(&tuple.subject)
            .is_some_and(|tuples| tuples.contains(tuple))
    }

    pub fn tuples_for_subject(&self, subject: &str) -> &[PolicyTuple] {
        self.by_subject
            .get(subject)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All tuples whose subject is in `subjects`.
    pub fn tuples_for_subjects<'a, I>(&'a self, subjects: I) -> impl Iterator<Item = &'a PolicyTuple>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        subjects
            .into_iter()
            .filter(move |s| seen.insert(*s))
            .flat_map(move |s| self.tuples_for_subject(s).iter())
    }

    pub fn tuples(&self) -> impl Iterator<Item = &PolicyTuple> {
        self.subject_order
            .iter()
            .flat_map(move |s| self.tuples_for_subject(s).iter())
    }

    pub fn len(&self) -> usize {
        self.by_subject.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }

    fn drop_subject(&mut self, subject: &str) {
        self.by_subject.remove(subject);
        self.subject_order.retain(|s| s != subject);
    }
}

/// Durable backing for the policy set: read everything, or atomically
/// replace everything.
pub trait PolicyAdapter: Send + Sync {
    fn load(&self) -> Result<Vec<PolicyLine>, AuthzError>;

    fn save(&self, policies: &[PolicyTuple], groupings: &[GroupingEdge]) -> Result<(), AuthzError>;
}

/// Policy file in the `p, ...` / `g, ...` line format.
///
/// Saves go to a sibling temp file that is then renamed over the target,
/// so readers of the file never see a half-written policy set.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyAdapter for FileAdapter {
    fn load(&self) -> Result<Vec<PolicyLine>, AuthzError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "Policy file not found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AuthzError::EnforcementUnavailable(format!(
                    "cannot read `{}`: {e}",
                    self.path.display()
                )))
            }
        };
        parse_policy_text(&contents)
    }

    fn save(&self, policies: &[PolicyTuple], groupings: &[GroupingEdge]) -> Result<(), AuthzError> {
        let unavailable = |e: std::io::Error| {
            AuthzError::StoreUnavailable(format!("cannot write `{}`: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, render_policy_text(policies, groupings)).map_err(unavailable)?;
        fs::rename(&tmp, &self.path).map_err(unavailable)?;
        Ok(())
    }
}

/// Keeps the rendered policy text in memory. Useful for tests and for
/// running without a policy file.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    text: Mutex<String>,
}

impl MemoryAdapter {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
        }
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }
}

impl PolicyAdapter for MemoryAdapter {
    fn load(&self) -> Result<Vec<PolicyLine>, AuthzError> {
        parse_policy_text(&self.text.lock())
    }

    fn save(&self, policies: &[PolicyTuple], groupings: &[GroupingEdge]) -> Result<(), AuthzError> {
        *self.text.lock() = render_policy_text(policies, groupings);
        Ok(())
    }
}
