use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use crate::authz::{AuthzState, Shared};

/// Validated, persisted changes to the policy set.
///
/// Every change is staged on a copy of the current state while the write
/// lock is held, written through the adapter, and only then swapped in. A
/// failed write leaves the live state untouched and reports
/// [`AuthzError::StoreUnavailable`].
///
/// Each method returns whether anything changed.
#[derive(Clone)]
pub struct PolicyMutator {
    shared: Arc<Shared>,
}

impl PolicyMutator {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn add_policy(
        &self,
        subject: &str,
        pattern: &str,
        action: &str,
        effect: &str,
    ) -> Result<bool, AuthzError> {
        let tuple = PolicyTuple::new(subject, pattern, action, effect.parse()?)?;
        self.apply(vec![PolicyChange::AddPolicy(tuple)])
    }

    pub fn remove_policy(
        &self,
        subject: &str,
        pattern: &str,
        action: &str,
        effect: &str,
    ) -> Result<bool, AuthzError> {
        let tuple = PolicyTuple::new(subject, pattern, action, effect.parse()?)?;
        self.apply(vec![PolicyChange::RemovePolicy(tuple)])
    }

    /// Drops every tuple whose subject is `subject`. Grouping edges are kept.
    pub fn remove_policies_for(&self, subject: &str) -> Result<bool, AuthzError> {
        let subject = subject.trim();
        self.commit("remove_policies_for", |state| {
            Ok(!state.store.remove_subject(subject).is_empty())
        })
    }

    pub fn add_grouping(&self, member: &str, role: &str) -> Result<bool, AuthzError> {
        let edge = GroupingEdge::new(member, role)?;
        self.apply(vec![PolicyChange::AddGrouping(edge)])
    }

    pub fn remove_grouping(&self, member: &str, role: &str) -> Result<bool, AuthzError> {
        let edge = GroupingEdge::new(member, role)?;
        self.apply(vec![PolicyChange::RemoveGrouping(edge)])
    }

    /// Removes `name` from every grouping edge and drops its tuples.
    pub fn delete_principal(&self, name: &str) -> Result<bool, AuthzError> {
        self.cascade_delete("delete_principal", name)
    }

    /// Removes `name` on both sides of every grouping edge and drops the
    /// tuples it is the subject of. Former members lose whatever they
    /// inherited through it.
    pub fn delete_role(&self, name: &str) -> Result<bool, AuthzError> {
        self.cascade_delete("delete_role", name)
    }

    /// Applies `changes` in order with one write. Either all of them take
    /// effect or none does.
    pub fn apply(&self, changes: Vec<PolicyChange>) -> Result<bool, AuthzError> {
        self.commit("apply", |state| {
            let mut changed = false;
            for change in changes {
                changed |= match change {
                    PolicyChange::AddPolicy(tuple) => state.store.add(tuple),
                    PolicyChange::RemovePolicy(tuple) => state.store.remove(&tuple),
                    PolicyChange::AddGrouping(edge) => {
                        state.graph.add_edge(&edge.member, &edge.role)?
                    }
                    PolicyChange::RemoveGrouping(edge) => {
                        state.graph.remove_edge(&edge.member, &edge.role)
                    }
                };
            }
            Ok(changed)
        })
    }

    fn cascade_delete(&self, operation: &'static str, name: &str) -> Result<bool, AuthzError> {
        let name = name.trim();
        self.commit(operation, |state| {
            let edges = state.graph.remove_node(name);
            let tuples = state.store.remove_subject(name);
            tracing::debug!(
                name,
                edges = edges.len(),
                policies = tuples.len(),
                "Cascading delete"
            );
            Ok(!edges.is_empty() || !tuples.is_empty())
        })
    }

    fn commit<F>(&self, operation: &'static str, change: F) -> Result<bool, AuthzError>
    where
        F: FnOnce(&mut AuthzState) -> Result<bool, AuthzError>,
    {
        let mut state = self.shared.state.write();
        state.ensure_ready()?;

        let mut staged = state.clone();
        if !change(&mut staged)? {
            return Ok(false);
        }
        staged.revision += 1;

        if let Err(e) = staged.persist(self.shared.adapter.as_ref()) {
            tracing::error!(operation, error = %e, "Failed to persist policy change, rolled back");
            return Err(e);
        }

        *state = staged;
        tracing::info!(
            operation,
            policies = state.store.len(),
            groupings = state.graph.edge_count(),
            "Policy change committed"
        );
        Ok(true)
    }
}
