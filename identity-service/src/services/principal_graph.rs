//! Principal membership graph and transitive closure resolution.
//!
//! Edges run from a member (child) to the principal it belongs to (parent).
//! Cycles are tolerated: the visited set stops expansion, nothing more.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::error::ServiceError;
use super::store::{MembershipStore, PrincipalDirectory};
use crate::models::{AclKey, Principal, SecurablePrincipal};

pub struct PrincipalGraph {
    memberships: Arc<dyn MembershipStore>,
    principals: Arc<dyn PrincipalDirectory>,
}

impl PrincipalGraph {
    pub fn new(
        memberships: Arc<dyn MembershipStore>,
        principals: Arc<dyn PrincipalDirectory>,
    ) -> Self {
        Self {
            memberships,
            principals,
        }
    }

    pub async fn add_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, ServiceError> {
        Ok(self.memberships.add_edge(child, parent).await?)
    }

    pub async fn remove_edge(&self, child: &AclKey, parent: &AclKey) -> Result<bool, ServiceError> {
        Ok(self.memberships.remove_edge(child, parent).await?)
    }

    pub async fn remove_all_edges(&self, key: &AclKey) -> Result<u64, ServiceError> {
        Ok(self.memberships.remove_all_edges(key).await?)
    }

    /// One-hop expansion: every parent of any key in `keys`.
    pub async fn get_layer(&self, keys: &HashSet<AclKey>) -> Result<HashSet<AclKey>, ServiceError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let keys: Vec<AclKey> = keys.iter().cloned().collect();
        let parents = self.memberships.get_parents(&keys).await?;
        Ok(parents.into_values().flatten().collect())
    }

    /// Every principal reachable from `root`. The root itself is only
    /// included when a cycle leads back to it.
    pub async fn get_all_principals(
        &self,
        root: &SecurablePrincipal,
    ) -> Result<HashSet<SecurablePrincipal>, ServiceError> {
        let mut visited: HashSet<AclKey> = HashSet::new();
        let mut frontier: HashSet<AclKey> = HashSet::from([root.acl_key.clone()]);

        loop {
            let layer = self.get_layer(&frontier).await?;
            frontier = layer
                .into_iter()
                .filter(|key| visited.insert(key.clone()))
                .collect();
            if frontier.is_empty() {
                break;
            }
        }

        let keys: Vec<AclKey> = visited.into_iter().collect();
        let resolved = self.principals.lookup_by_acl_keys(&keys).await?;

        let mut principals = HashSet::with_capacity(resolved.len());
        for key in keys {
            match resolved.get(&key) {
                Some(principal) => {
                    principals.insert(principal.clone());
                }
                None => tracing::warn!(acl_key = %key, "Dropping unresolvable principal from closure"),
            }
        }
        Ok(principals)
    }

    /// Closures of many principals at once, each including its root.
    ///
    /// Adjacency is loaded in batched rounds across all roots, then each
    /// closure is walked in memory and resolved with a single lookup.
    pub async fn get_closures_bulk(
        &self,
        roots: &[SecurablePrincipal],
    ) -> Result<HashMap<Principal, BTreeSet<Principal>>, ServiceError> {
        let mut adjacency: HashMap<AclKey, HashSet<AclKey>> = HashMap::new();
        let mut loaded: HashSet<AclKey> = HashSet::new();
        let mut frontier: Vec<AclKey> = roots
            .iter()
            .map(|r| r.acl_key.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut rounds = 0u32;

        while !frontier.is_empty() {
            rounds += 1;
            let parents = self.memberships.get_parents(&frontier).await?;
            loaded.extend(frontier.drain(..));

            let mut next = HashSet::new();
            for (child, child_parents) in parents {
                next.extend(
                    child_parents
                        .iter()
                        .filter(|p| !loaded.contains(*p))
                        .cloned(),
                );
                adjacency.insert(child, child_parents);
            }
            frontier = next.into_iter().collect();
        }

        let walks: Vec<(&SecurablePrincipal, HashSet<AclKey>)> = roots
            .iter()
            .map(|root| (root, walk(&adjacency, &root.acl_key)))
            .collect();

        let root_keys: HashSet<&AclKey> = roots.iter().map(|r| &r.acl_key).collect();
        let to_resolve: Vec<AclKey> = walks
            .iter()
            .flat_map(|(_, keys)| keys.iter())
            .filter(|k| !root_keys.contains(k))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut resolved: HashMap<AclKey, Principal> = self
            .principals
            .lookup_by_acl_keys(&to_resolve)
            .await?
            .into_iter()
            .map(|(key, p)| (key, p.principal))
            .collect();
        for root in roots {
            resolved.insert(root.acl_key.clone(), root.principal.clone());
        }

        let mut closures: HashMap<Principal, BTreeSet<Principal>> = HashMap::new();
        for (root, keys) in walks {
            let closure = closures.entry(root.principal.clone()).or_default();
            closure.insert(root.principal.clone());
            for key in keys {
                match resolved.get(&key) {
                    Some(principal) => {
                        closure.insert(principal.clone());
                    }
                    None => tracing::warn!(
                        root = %root.principal,
                        acl_key = %key,
                        "Dropping unresolvable principal from closure"
                    ),
                }
            }
            metrics::histogram!("identity_closure_size").record(closure.len() as f64);
        }

        tracing::debug!(roots = roots.len(), rounds = rounds, "Resolved principal closures");
        Ok(closures)
    }
}

/// Keys reachable from `start` through `adjacency`, including `start`.
fn walk(adjacency: &HashMap<AclKey, HashSet<AclKey>>, start: &AclKey) -> HashSet<AclKey> {
    let mut seen = HashSet::from([start.clone()]);
    let mut stack = vec![start.clone()];
    while let Some(key) = stack.pop() {
        if let Some(parents) = adjacency.get(&key) {
            for parent in parents {
                if seen.insert(parent.clone()) {
                    stack.push(parent.clone());
                }
            }
        }
    }
    seen
}
