pub mod engine;
pub mod errors;
pub mod graph;
pub mod matcher;
pub mod mutator;
pub mod policy;
pub mod store;
pub mod types;
pub mod web;

use std::sync::Arc;

use parking_lot::RwLock;

use errors::AuthzError;
use graph::RoleGraph;
use store::{PolicyAdapter, PolicyStore};
use types::{PolicyLine, PolicyTuple};

pub use engine::Enforcer;
pub use mutator::PolicyMutator;

/// Whether decisions can currently be made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Availability {
    #[default]
    Ready,
    /// The durable store could not be read. Every decision is a deny and
    /// every mutation is refused until a successful reload.
    Unavailable(String),
}

/// Role graph and policy tuples. They are only ever read or written
/// together, behind the single lock in [`Shared`].
#[derive(Debug, Clone, Default)]
pub struct AuthzState {
    pub graph: RoleGraph,
    pub store: PolicyStore,
    pub availability: Availability,
    /// Bumped on every committed mutation and every reload.
    pub revision: u64,
}

impl AuthzState {
    /// Build state from persisted records, dropping duplicates.
    pub fn from_lines(lines: Vec<PolicyLine>) -> Result<Self, AuthzError> {
        let mut state = Self::default();
        for line in lines {
            match line {
                PolicyLine::Policy(tuple) => {
                    state.store.add(tuple);
                }
                PolicyLine::Grouping(edge) => {
                    state.graph.add_edge(&edge.member, &edge.role)?;
                }
            }
        }
        Ok(state)
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            availability: Availability::Unavailable(reason.into()),
            ..Self::default()
        }
    }

    pub fn ensure_ready(&self) -> Result<(), AuthzError> {
        match &self.availability {
            Availability::Ready => Ok(()),
            Availability::Unavailable(reason) => {
                Err(AuthzError::EnforcementUnavailable(reason.clone()))
            }
        }
    }

    /// Writes the complete state through `adapter`.
    pub fn persist(&self, adapter: &dyn PolicyAdapter) -> Result<(), AuthzError> {
        let policies: Vec<PolicyTuple> = self.store.tuples().cloned().collect();
        adapter
            .save(&policies, &self.graph.edges())
            .map_err(|e| match e {
                AuthzError::StoreUnavailable(_) => e,
                other => AuthzError::StoreUnavailable(other.to_string()),
            })
    }
}

/// Handle shared by an [`Enforcer`] and the [`PolicyMutator`]s made from it.
pub(crate) struct Shared {
    pub(crate) state: RwLock<AuthzState>,
    pub(crate) adapter: Arc<dyn PolicyAdapter>,
}

/// Reads the adapter and builds fresh state. Any failure is reported as
/// [`AuthzError::EnforcementUnavailable`].
pub(crate) fn read_state(adapter: &dyn PolicyAdapter) -> Result<AuthzState, AuthzError> {
    adapter
        .load()
        .and_then(AuthzState::from_lines)
        .map_err(|e| match e {
            AuthzError::EnforcementUnavailable(_) => e,
            other => AuthzError::EnforcementUnavailable(other.to_string()),
        })
}
