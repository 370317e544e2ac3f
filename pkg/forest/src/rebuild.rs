use pkg_state::client::StateStore;
use pkg_state::hierarchy::enforcement_root_depth;
use pkg_types::namespace::{Namespace, NamespaceRole};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::NamespaceForest;

/// Rebuild `forest` from the namespaces currently in the store.
///
/// Every Leaf of a hierarchy contributes its ancestor chain; each namespace
/// deeper than its root's enforcement depth is indexed under the topmost
/// cluster-wide-quota ancestor. All reads happen before the index is locked.
pub async fn rebuild(
    forest: &NamespaceForest,
    store: &StateStore,
    default_root_depth: u32,
) -> anyhow::Result<()> {
    let namespaces = store.list_namespaces().await?;
    let by_name: HashMap<&str, &Namespace> =
        namespaces.iter().map(|n| (n.name.as_str(), n)).collect();

    let mut root_depths: HashMap<String, u32> = HashMap::new();
    let mut entries: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for leaf in namespaces
        .iter()
        .filter(|n| n.is_in_hierarchy() && n.role() == Some(NamespaceRole::Leaf))
    {
        let Some(chain) = ancestor_chain(leaf, &by_name) else {
            warn!(
                "Namespace {} has a broken parent chain, leaving it out of the index",
                leaf.name
            );
            continue;
        };

        let root = chain[0].name.clone();
        let root_depth = match root_depths.get(&root) {
            Some(d) => *d,
            None => {
                let d = enforcement_root_depth(store, chain[0], default_root_depth).await?;
                root_depths.insert(root.clone(), d);
                d
            }
        };

        for (depth, ns) in chain.iter().enumerate() {
            let depth = depth as u32;
            if depth <= root_depth || !seen.insert(ns.name.clone()) {
                continue;
            }
            let parent = if depth == root_depth + 1 {
                String::new()
            } else {
                chain[depth as usize - 1].name.clone()
            };
            entries.push((ns.name.clone(), parent));
        }
    }

    forest.load(&entries);
    info!(
        "Namespace index rebuilt: {} enforcement roots, {} namespaces",
        forest.snapshot().len(),
        entries.len()
    );
    Ok(())
}

/// Root-first chain of namespaces ending at `leaf`, following parent labels.
fn ancestor_chain<'a>(
    leaf: &'a Namespace,
    by_name: &HashMap<&str, &'a Namespace>,
) -> Option<Vec<&'a Namespace>> {
    let mut chain = vec![leaf];
    let mut current = leaf;
    while current.role() != Some(NamespaceRole::Root) {
        let parent = by_name.get(current.parent()?)?;
        if chain.iter().any(|n| n.name == parent.name) {
            return None;
        }
        chain.push(parent);
        current = parent;
    }
    chain.reverse();
    Some(chain)
}
