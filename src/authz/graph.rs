use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::authz::errors::AuthzError;
use crate::authz::types::GroupingEdge;

/// Membership edges `member -> role`, indexed in both directions.
///
/// Edges always form a DAG: `add_edge` refuses anything that would close a
/// cycle. Traversals still carry a visited set so a cycle that slipped in
/// through some other path cannot hang a lookup.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    /// member -> roles it belongs to
    roles_by_member: HashMap<String, BTreeSet<String>>,
    /// role -> its direct members
    members_by_role: HashMap<String, BTreeSet<String>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `member -> role`. Returns `false` when the edge already exists.
    pub fn add_edge(&mut self, member: &str, role: &str) -> Result<bool, AuthzError> {
        if self.has_edge(member, role) {
            return Ok(false);
        }
        if member == role || self.reaches(role, member) {
            return Err(AuthzError::InvalidEdge {
                member: member.to_string(),
                role: role.to_string(),
                reason: format!("`{role}` already belongs to `{member}`, this would create a cycle"),
            });
        }
        self.roles_by_member
            .entry(member.to_string())
            .or_default()
            .insert(role.to_string());
        self.members_by_role
            .entry(role.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(true)
    }

    /// Removes `member -> role`. Returns `false` when there was no such edge.
    pub fn remove_edge(&mut self, member: &str, role: &str) -> bool {
        let removed = remove_from(&mut self.roles_by_member, member, role);
        if removed {
            remove_from(&mut self.members_by_role, role, member);
        }
        removed
    }

    pub fn has_edge(&self, member: &str, role: &str) -> bool {
        self.roles_by_member
            .get(member)
            .is_some_and(|roles| roles.contains(role))
    }

    /// True when `name` is the role side of at least one edge.
    pub fn is_role(&self, name: &str) -> bool {
        self.members_by_role.contains_key(name)
    }

    pub fn direct_roles(&self, member: &str) -> Vec<String> {
        self.roles_by_member
            .get(member)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every role reachable from `member`, breadth-first. `member` itself is
    /// only included if it is reachable from itself.
    pub fn all_roles(&self, member: &str) -> Vec<String> {
        bfs(&self.roles_by_member, member)
    }

    /// Every principal that transitively holds `role`. Intermediate roles
    /// are traversed but not returned.
    pub fn users_in_role(&self, role: &str) -> Vec<String> {
        let mut users: Vec<String> = bfs(&self.members_by_role, role)
            .into_iter()
            .filter(|name| !self.is_role(name))
            .collect();
        users.sort();
        users
    }

    /// Drops every edge naming `name` on either side and returns them.
    pub fn remove_node(&mut self, name: &str) -> Vec<GroupingEdge> {
        let mut removed = Vec::new();

        if let Some(roles) = self.roles_by_member.remove(name) {
            for role in roles {
                remove_from(&mut self.members_by_role, &role, name);
                removed.push(GroupingEdge {
                    member: name.to_string(),
                    role,
                });
            }
        }
        if let Some(members) = self.members_by_role.remove(name) {
            for member in members {
                remove_from(&mut self.roles_by_member, &member, name);
                removed.push(GroupingEdge {
                    member,
                    role: name.to_string(),
                });
            }
        }

        removed
    }

    /// All edges ordered by member, then role.
    pub fn edges(&self) -> Vec<GroupingEdge> {
        let mut edges: Vec<GroupingEdge> = self
            .roles_by_member
            .iter()
            .flat_map(|(member, roles)| {
                roles.iter().map(move |role| GroupingEdge {
                    member: member.clone(),
                    role: role.clone(),
                })
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.roles_by_member.values().map(BTreeSet::len).sum()
    }

    fn reaches(&self, from: &str, to: &str) -> bool {
        from == to || bfs(&self.roles_by_member, from).iter().any(|n| n == to)
    }
}

fn bfs(adjacency: &HashMap<String, BTreeSet<String>>, start: &str) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        let Some(next) = adjacency.get(current) else {
            continue;
        };
        for name in next {
            if visited.insert(name.as_str()) {
                order.push(name.clone());
                queue.push_back(name.as_str());
            }
        }
    }

    order
}

fn remove_from(index: &mut HashMap<String, BTreeSet<String>>, key: &str, value: &str) -> bool {
    let Some(set) = index.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        index.remove(key);
    }
    removed
}
