use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::authz::errors::AuthzError;
use crate::authz::mutator::PolicyMutator;
use crate::authz::store::{FileAdapter, PolicyAdapter};
use crate::authz::types::*;
use crate::authz::{read_state, Availability, AuthzState, Shared};

/// Answers access decisions over the shared role graph and policy store.
///
/// Cloning is cheap; clones observe the same state. Decisions take the
/// read lock for their whole duration, so a decision never sees half of a
/// mutation.
#[derive(Clone)]
pub struct Enforcer {
    shared: Arc<Shared>,
}

impl Enforcer {
    /// Loads the full policy set through `adapter`.
    ///
    /// Never fails: if the store cannot be read the enforcer starts out
    /// unavailable and denies everything.
    pub fn load(adapter: Arc<dyn PolicyAdapter>) -> Self {
        let state = match read_state(adapter.as_ref()) {
            Ok(state) => {
                tracing::info!(
                    policies = state.store.len(),
                    groupings = state.graph.edge_count(),
                    "Loaded authorization policies"
                );
                state
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load policies, denying all requests");
                AuthzState::unavailable(e.to_string())
            }
        };

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                adapter,
            }),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::load(Arc::new(FileAdapter::new(path)))
    }

    /// Re-reads the store and swaps the result in. On failure the enforcer
    /// becomes unavailable.
    ///
    /// The read happens without holding the lock. If a mutation committed
    /// meanwhile, the snapshot may predate it, so the store is read again
    /// under the write lock, which also excludes further commits.
    pub fn reload(&self) -> Result<(), AuthzError> {
        let seen = self.shared.state.read().revision;
        let loaded = read_state(self.shared.adapter.as_ref());

        let mut state = self.shared.state.write();
        let loaded = if state.revision == seen {
            loaded
        } else {
            tracing::debug!("Policies changed during reload, reading again");
            read_state(self.shared.adapter.as_ref())
        };

        let revision = state.revision + 1;
        match loaded {
            Ok(next) => {
                tracing::info!(
                    policies = next.store.len(),
                    groupings = next.graph.edge_count(),
                    "Reloaded authorization policies"
                );
                *state = AuthzState { revision, ..next };
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload policies, denying all requests");
                *state = AuthzState {
                    revision,
                    ..AuthzState::unavailable(e.to_string())
                };
                Err(e)
            }
        }
    }

    pub fn mutator(&self) -> PolicyMutator {
        PolicyMutator::new(self.shared.clone())
    }

    pub fn is_available(&self) -> bool {
        self.shared.state.read().availability == Availability::Ready
    }

    /// `true` only when some matching tuple allows and none denies.
    pub fn enforce(&self, subject: &str, path: &str, action: &str) -> bool {
        match self.try_enforce(subject, path, action) {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                tracing::warn!(subject, path, action, error = %e, "Denying request");
                false
            }
        }
    }

    pub fn try_enforce(
        &self,
        subject: &str,
        path: &str,
        action: &str,
    ) -> Result<Decision, AuthzError> {
        let state = self.shared.state.read();
        state.ensure_ready()?;

        let identities = identity_set(&state, subject);
        let decision = combine(matching(&state, &identities, path, action));

        tracing::debug!(subject, path, action, decision = ?decision, "Access decision");
        Ok(decision)
    }

    /// Same procedure as [`Enforcer::try_enforce`], also returning the
    /// identity set and matching tuples. Computed from one snapshot.
    pub fn explain(
        &self,
        subject: &str,
        path: &str,
        action: &str,
    ) -> Result<Explanation, AuthzError> {
        let state = self.shared.state.read();
        state.ensure_ready()?;

        let identities = identity_set(&state, subject);
        let matched = matching(&state, &identities, path, action);
        let decision = combine(matched.iter().copied());

        Ok(Explanation {
            decision,
            matched: matched.into_iter().map(PolicyView::from).collect(),
            identities,
        })
    }

    /// Direct roles of `subject`.
    pub fn roles_of(&self, subject: &str) -> Vec<String> {
        self.shared.state.read().graph.direct_roles(subject)
    }

    /// Every role `subject` holds, directly or through other roles.
    pub fn implicit_roles_of(&self, subject: &str) -> Vec<String> {
        self.shared.state.read().graph.all_roles(subject)
    }

    pub fn users_in_role(&self, role: &str) -> Vec<String> {
        self.shared.state.read().graph.users_in_role(role)
    }

    pub fn is_role(&self, name: &str) -> bool {
        self.shared.state.read().graph.is_role(name)
    }

    pub fn policies(&self) -> Vec<PolicyTuple> {
        self.shared.state.read().store.tuples().cloned().collect()
    }

    pub fn policies_for(&self, subject: &str) -> Vec<PolicyTuple> {
        self.shared
            .state
            .read()
            .store
            .tuples_for_subject(subject)
            .to_vec()
    }

    pub fn groupings(&self) -> Vec<GroupingEdge> {
        self.shared.state.read().graph.edges()
    }
}

/// `subject` followed by every role it transitively holds.
fn identity_set(state: &AuthzState, subject: &str) -> Vec<String> {
    let mut identities = vec![subject.to_string()];
    identities.extend(
        state
            .graph
            .all_roles(subject)
            .into_iter()
            .filter(|role| role != subject),
    );
    identities
}

fn matching<'a>(
    state: &'a AuthzState,
    identities: &'a [String],
    path: &str,
    action: &str,
) -> Vec<&'a PolicyTuple> {
    state
        .store
        .tuples_for_subjects(identities.iter().map(String::as_str))
        .filter(|t| t.applies_to_action(action) && t.pattern.matches(path))
        .collect()
}

/// Deny overrides allow; nothing matching is a deny.
fn combine<'a>(matched: impl IntoIterator<Item = &'a PolicyTuple>) -> Decision {
    let mut allowed = false;
    for tuple in matched {
        match tuple.effect {
            Effect::Deny => return Decision::Deny,
            Effect::Allow => allowed = true,
        }
    }
    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::store::MemoryAdapter;

    struct BrokenAdapter;

    impl PolicyAdapter for BrokenAdapter {
        fn load(&self) -> Result<Vec<PolicyLine>, AuthzError> {
            Err(AuthzError::EnforcementUnavailable("disk on fire".into()))
        }

        fn save(&self, _: &[PolicyTuple], _: &[GroupingEdge]) -> Result<(), AuthzError> {
            Err(AuthzError::StoreUnavailable("disk on fire".into()))
        }
    }

    fn enforcer(text: &str) -> Enforcer {
        Enforcer::load(Arc::new(MemoryAdapter::new(text)))
    }

    #[test]
    fn test_deny_overrides_allow() {
        let e = enforcer("p, alice, /x, GET, allow\np, alice, /x, GET, deny\n");
        assert!(!e.enforce("alice", "/x", "GET"));
        assert_eq!(e.try_enforce("alice", "/x", "GET").unwrap(), Decision::Deny);
    }

    #[test]
    fn test_default_deny() {
        let e = enforcer("p, alice, /x, GET, allow\n");
        assert!(e.enforce("alice", "/x", "GET"));
        assert!(!e.enforce("alice", "/x", "POST"));
        assert!(!e.enforce("alice", "/y", "GET"));
        assert!(!e.enforce("bob", "/x", "GET"));
    }

    #[test]
    fn test_role_policies_apply_transitively() {
        let e = enforcer(
            "p, staff, /products/{productId}, GET, allow\n\
             p, clerks, /products/{productId}/stocks/*, PATCH\n\
             g, alice, clerks\n\
             g, clerks, staff\n",
        );
        assert!(e.enforce("alice", "/products/3", "GET"));
        assert!(e.enforce("alice", "/products/3/stocks/in", "PATCH"));
        assert!(!e.enforce("alice", "/products/abc", "GET"));
        assert!(!e.enforce("staff", "/products/3/stocks/in", "PATCH"));
    }

    #[test]
    fn test_role_deny_beats_personal_allow() {
        let e = enforcer(
            "p, alice, /reports/products, GET, allow\n\
             p, interns, /reports/*, *, deny\n\
             g, alice, interns\n",
        );
        assert!(!e.enforce("alice", "/reports/products", "GET"));
    }

    #[test]
    fn test_explain_lists_identities_and_matches() {
        let e = enforcer(
            "p, admins, /*, *, allow\n\
             p, alice, /users/{username}, DELETE, deny\n\
             g, alice, admins\n",
        );
        let explanation = e.explain("alice", "/users/bob", "DELETE").unwrap();
        assert_eq!(explanation.decision, Decision::Deny);
        assert_eq!(explanation.identities, vec!["alice", "admins"]);
        assert_eq!(explanation.matched.len(), 1);
        assert_eq!(explanation.matched[0].effect, Effect::Deny);

        let explanation = e.explain("alice", "/products", "GET").unwrap();
        assert_eq!(explanation.decision, Decision::Allow);
        assert_eq!(explanation.matched[0].subject, "admins");
    }

    #[test]
    fn test_unreadable_store_fails_closed() {
        let e = Enforcer::load(Arc::new(BrokenAdapter));
        assert!(!e.is_available());
        assert!(!e.enforce("alice", "/x", "GET"));
        assert!(matches!(
            e.try_enforce("alice", "/x", "GET"),
            Err(AuthzError::EnforcementUnavailable(_))
        ));
        assert!(e.explain("alice", "/x", "GET").is_err());
        assert!(e.reload().is_err());
    }

    #[test]
    fn test_malformed_store_fails_closed() {
        let e = enforcer("p, alice, /x, GET, allow\nx, what\n");
        assert!(!e.is_available());
        assert!(!e.enforce("alice", "/x", "GET"));

        let e = enforcer("g, a, b\ng, b, a\n");
        assert!(!e.is_available());
    }

    #[test]
    fn test_reload_picks_up_external_changes() {
        let adapter = Arc::new(MemoryAdapter::new("p, alice, /x, GET, allow\n"));
        let e = Enforcer::load(adapter.clone());
        assert!(e.enforce("alice", "/x", "GET"));

        adapter
            .save(
                &[PolicyTuple::new("bob", "/x", "GET", Effect::Allow).unwrap()],
                &[],
            )
            .unwrap();
        assert!(e.enforce("alice", "/x", "GET"));

        e.reload().unwrap();
        assert!(!e.enforce("alice", "/x", "GET"));
        assert!(e.enforce("bob", "/x", "GET"));
    }

    /// Memory adapter whose next load takes its snapshot, then parks until
    /// released.
    #[derive(Default)]
    struct GatedAdapter {
        inner: MemoryAdapter,
        hold_next_load: std::sync::atomic::AtomicBool,
        entered: parking_lot::Mutex<Option<std::sync::mpsc::Sender<()>>>,
        release: parking_lot::Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl PolicyAdapter for GatedAdapter {
        fn load(&self) -> Result<Vec<PolicyLine>, AuthzError> {
            let lines = self.inner.load();
            if self.hold_next_load.swap(false, std::sync::atomic::Ordering::SeqCst) {
                if let Some(tx) = self.entered.lock().take() {
                    tx.send(()).unwrap();
                }
                if let Some(rx) = self.release.lock().take() {
                    rx.recv().unwrap();
                }
            }
            lines
        }

        fn save(&self, policies: &[PolicyTuple], groupings: &[GroupingEdge]) -> Result<(), AuthzError> {
            self.inner.save(policies, groupings)
        }
    }

    #[test]
    fn test_reload_reads_without_blocking_decisions() {
        let adapter = Arc::new(GatedAdapter {
            inner: MemoryAdapter::new("p, alice, /x, GET, allow\n"),
            ..Default::default()
        });
        let e = Enforcer::load(adapter.clone());

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        *adapter.entered.lock() = Some(entered_tx);
        *adapter.release.lock() = Some(release_rx);
        adapter
            .hold_next_load
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let reloading = {
            let e = e.clone();
            std::thread::spawn(move || e.reload())
        };
        entered_rx.recv().unwrap();

        // the reload is parked inside its read; decisions and commits proceed
        assert!(e.enforce("alice", "/x", "GET"));
        e.mutator().add_policy("bob", "/x", "GET", "allow").unwrap();
        release_tx.send(()).unwrap();

        reloading.join().unwrap().unwrap();
        assert!(e.is_available());
        assert!(e.enforce("alice", "/x", "GET"));
        assert!(e.enforce("bob", "/x", "GET"), "reload dropped a concurrent commit");
    }

    #[test]
    fn test_listing() {
        let e = enforcer(
            "p, alice, /a, GET, allow\n\
             p, bob, /b, GET, allow\n\
             p, alice, /a, GET, allow\n\
             g, alice, clerks\n",
        );
        assert_eq!(e.policies().len(), 2);
        assert_eq!(e.policies_for("alice").len(), 1);
        assert_eq!(e.groupings(), vec![GroupingEdge::new("alice", "clerks").unwrap()]);
        assert_eq!(e.roles_of("alice"), vec!["clerks"]);
        assert!(e.is_role("clerks"));
        assert!(!e.is_role("alice"));
        assert_eq!(e.users_in_role("clerks"), vec!["alice"]);
    }
}
