use pkg_constants::hns::{
    ANNOTATION_CRQ_SELECTOR_PREFIX, ANNOTATION_DEPTH, ANNOTATION_DISPLAY_NAME, LABEL_HIERARCHY,
    LABEL_PARENT,
};
use pkg_types::namespace::{Namespace, NamespaceRole, selector_annotation};

/// Recompute the hierarchy labels and annotations of `child` as a direct
/// descendant of `parent`. Returns whether anything changed.
///
/// Depth, display-path and selector annotations are derived from the parent;
/// the upper-pool flag is set only where a pool starts below a non-pool.
pub fn apply_hierarchy(child: &mut Namespace, parent: &Namespace, pool: bool) -> bool {
    let before = (child.labels.clone(), child.annotations.clone());
    let depth = parent.depth() + 1;

    child
        .labels
        .insert(LABEL_HIERARCHY.to_string(), "true".to_string());
    child
        .labels
        .insert(LABEL_PARENT.to_string(), parent.name.clone());
    if child.role().is_none_or(|r| r == NamespaceRole::Root) {
        child.set_role(NamespaceRole::Leaf);
    }
    child.set_resource_pool(pool);
    child.set_upper_resource_pool(pool && !parent.is_resource_pool());

    child
        .annotations
        .insert(ANNOTATION_DEPTH.to_string(), depth.to_string());
    child.annotations.insert(
        ANNOTATION_DISPLAY_NAME.to_string(),
        format!("{}/{}", parent.display_name(), child.name),
    );
    child
        .annotations
        .retain(|k, _| !k.starts_with(ANNOTATION_CRQ_SELECTOR_PREFIX));
    child.annotations.extend(parent.selector_annotations());
    child
        .annotations
        .insert(selector_annotation(depth), child.name.clone());

    before != (child.labels.clone(), child.annotations.clone())
}

/// Leaf when `ns` has no children, NoRole otherwise. Cluster roots keep
/// their role. Returns whether it changed.
pub fn apply_role(ns: &mut Namespace, has_children: bool) -> bool {
    let want = match ns.role() {
        Some(NamespaceRole::Root) => return false,
        _ if has_children => NamespaceRole::NoRole,
        _ => NamespaceRole::Leaf,
    };
    if ns.role() == Some(want) {
        return false;
    }
    ns.set_role(want);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_path_and_selectors() {
        let root = Namespace::new_root("org");
        let mut a = Namespace::new("a");
        assert!(apply_hierarchy(&mut a, &root, false));
        assert_eq!(a.depth(), 1);
        assert_eq!(a.display_name(), "org/a");
        assert_eq!(a.parent(), Some("org"));
        assert_eq!(a.role(), Some(NamespaceRole::Leaf));
        assert_eq!(a.selector_annotations().len(), 2);
        assert!(!apply_hierarchy(&mut a, &root, false));

        let mut b = Namespace::new("b");
        apply_hierarchy(&mut b, &a, true);
        assert_eq!(b.display_path(), vec!["org", "a", "b"]);
        assert_eq!(b.annotations.get(&selector_annotation(1)), Some(&"a".to_string()));
        assert_eq!(b.annotations.get(&selector_annotation(2)), Some(&"b".to_string()));
        assert!(b.is_upper_resource_pool());
    }

    #[test]
    fn relabel_drops_stale_deeper_selectors() {
        let root = Namespace::new_root("org");
        let mut a = Namespace::new("a");
        apply_hierarchy(&mut a, &root, false);
        let mut b = Namespace::new("b");
        apply_hierarchy(&mut b, &a, false);
        let mut c = Namespace::new("c");
        apply_hierarchy(&mut c, &b, false);
        assert_eq!(c.depth(), 3);

        // c moves directly under the root
        assert!(apply_hierarchy(&mut c, &root, false));
        assert_eq!(c.depth(), 1);
        assert_eq!(c.display_name(), "org/c");
        assert!(c.annotations.get(&selector_annotation(3)).is_none());
        assert_eq!(c.annotations.get(&selector_annotation(1)), Some(&"c".to_string()));
    }

    #[test]
    fn pool_under_pool_is_not_upper() {
        let root = Namespace::new_root("org");
        let mut p = Namespace::new("p");
        apply_hierarchy(&mut p, &root, true);
        let mut q = Namespace::new("q");
        apply_hierarchy(&mut q, &p, true);
        assert!(p.is_upper_resource_pool());
        assert!(!q.is_upper_resource_pool());
    }

    #[test]
    fn role_follows_children() {
        let mut ns = Namespace::new("a");
        ns.set_role(NamespaceRole::Leaf);
        assert!(apply_role(&mut ns, true));
        assert_eq!(ns.role(), Some(NamespaceRole::NoRole));
        assert!(!apply_role(&mut ns, true));
        assert!(apply_role(&mut ns, false));

        let mut root = Namespace::new_root("org");
        assert!(!apply_role(&mut root, true));
    }
}
