//! Change propagation: from one content mutation to every cache slot it
//! touches.
//!
//! | action                      | to update                                   | to delete                          |
//! |-----------------------------|---------------------------------------------|------------------------------------|
//! | publish                     | self, aliases, parents and children per [`Inclusion`] | nothing                  |
//! | publish with a changed URL  | the above plus every descendant              | old self plus every old descendant |
//! | unpublish                   | parents per [`Inclusion`], redirectors       | self, virtual aliases, descendants |
//!
//! A URL that ends up on both sides is only regenerated.

mod affected;
mod alias;

pub use self::affected::{Affected, AffectedSet};
pub use self::alias::AliasIndex;
use crate::content::{ContentNode, ContentTree, NodeId, NodeKind};
use crate::error::Result;
pub use staticpub_config::Inclusion;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Action {
    #[display("publish")]
    Publish,
    #[display("unpublish")]
    Unpublish,
}

/// One content change, with the tree as it is after the change and,
/// optionally, the live tree as it was before it.
///
/// Without a previous tree a URL change cannot be detected, so old URLs are
/// not purged.
#[derive(Clone, Copy)]
pub struct Mutation<'a> {
    pub node: NodeId,
    pub action: Action,
    pub current: &'a dyn ContentTree,
    pub previous: Option<&'a dyn ContentTree>,
}
impl<'a> Mutation<'a> {
    pub fn publish(node: NodeId, current: &'a dyn ContentTree) -> Self {
        Self { node, action: Action::Publish, current, previous: None }
    }

    pub fn unpublish(node: NodeId, current: &'a dyn ContentTree) -> Self {
        Self { node, action: Action::Unpublish, current, previous: None }
    }

    pub fn with_previous(mut self, previous: &'a dyn ContentTree) -> Self {
        self.previous = Some(previous);
        self
    }

    /// The node's URLs moved: it existed with URLs before and has different
    /// ones now.
    fn url_changed(&self) -> bool {
        let Some(before) = self.previous.and_then(|tree| tree.node(self.node)) else {
            return false;
        };
        let after = self.current.node(self.node).map(|n| &n.urls);
        !before.urls.is_empty() && after != Some(&before.urls)
    }

    /// Where to look for what must disappear: the pre-change tree when known.
    fn departing_tree(&self) -> &'a dyn ContentTree {
        self.previous.unwrap_or(self.current)
    }
}

/// Extension point for content types that affect pages outside the tree
/// relationships, e.g. a listing page showing the mutated node.
pub trait AffectedSetHook: Send + Sync {
    fn extend(&self, mutation: &Mutation<'_>, affected: &mut AffectedSet) -> Result<()>;
}

pub struct Resolver {
    parents: Inclusion,
    children: Inclusion,
    hooks: Vec<Box<dyn AffectedSetHook>>,
}
impl Default for Resolver {
    fn default() -> Self {
        Self::new(Inclusion::Direct, Inclusion::None)
    }
}
impl Resolver {
    pub fn new(parents: Inclusion, children: Inclusion) -> Self {
        Self { parents, children, hooks: Vec::new() }
    }

    pub fn with_hook(mut self, hook: impl AffectedSetHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Everything that must be regenerated because of `mutation`.
    pub fn objects_to_update(&self, mutation: &Mutation<'_>) -> Result<Vec<Affected>> {
        let tree = mutation.current;
        let mut set = AffectedSet::new();
        match mutation.action {
            Action::Publish => {
                let Some(node) = tree.node(mutation.node) else {
                    debug!(node = mutation.node, "published node not found in content tree");
                    return Ok(Vec::new());
                };
                set.update(node);
                let aliases = AliasIndex::build(tree, node.id)?;
                for alias in aliases.closure(node.id).into_iter().filter_map(|id| tree.node(id)) {
                    set.update(alias);
                }
                self.relatives(tree, node.id, &mut set);
                if mutation.url_changed() {
                    for descendant in tree.descendants(node.id) {
                        set.update(descendant);
                    }
                }
            },
            Action::Unpublish => {
                self.parents(tree, mutation.node, &mut set);
                // Redirectors stay published and must now point somewhere else.
                let aliases = AliasIndex::build(mutation.departing_tree(), mutation.node)?;
                for id in aliases.closure(mutation.node) {
                    if let Some(alias) = tree.node(id).filter(|n| Self::is_redirector(n) && n.live) {
                        set.update(alias);
                    }
                }
            },
        }
        Ok(set.to_update().to_vec())
    }

    /// Everything whose cached copy must be purged because of `mutation`.
    pub fn objects_to_delete(&self, mutation: &Mutation<'_>) -> Result<Vec<Affected>> {
        let tree = mutation.departing_tree();
        let mut set = AffectedSet::new();
        match mutation.action {
            Action::Publish if mutation.url_changed() => {
                if let Some(node) = tree.node(mutation.node) {
                    set.delete(node);
                    for descendant in tree.descendants(node.id) {
                        set.delete(descendant);
                    }
                }
            },
            Action::Publish => {},
            Action::Unpublish => {
                let Some(node) = tree.node(mutation.node) else {
                    debug!(node = mutation.node, "unpublished node not found in content tree");
                    return Ok(Vec::new());
                };
                set.delete(node);
                let aliases = AliasIndex::build(tree, node.id)?;
                for alias in aliases.closure(node.id).into_iter().filter_map(|id| tree.node(id)) {
                    if !Self::is_redirector(alias) {
                        set.delete(alias);
                    }
                }
                for descendant in tree.descendants(node.id) {
                    set.delete(descendant);
                }
            },
        }
        Ok(set.to_delete().to_vec())
    }

    /// Both sides of the change, after extension hooks, with URLs being
    /// regenerated removed from the delete side.
    #[instrument(level = "debug", skip_all, fields(node = mutation.node, action = %mutation.action))]
    pub fn resolve(&self, mutation: &Mutation<'_>) -> Result<AffectedSet> {
        let mut set = AffectedSet::new();
        for affected in self.objects_to_update(mutation)? {
            set.update(&affected);
        }
        for affected in self.objects_to_delete(mutation)? {
            set.delete(&affected);
        }
        for hook in &self.hooks {
            hook.extend(mutation, &mut set)?;
        }
        set.reconcile();
        debug!(update = set.to_update().len(), delete = set.to_delete().len(), "resolved affected set");
        Ok(set)
    }

    fn relatives(&self, tree: &dyn ContentTree, id: NodeId, set: &mut AffectedSet) {
        self.parents(tree, id, set);
        let children = match self.children {
            Inclusion::None => Vec::new(),
            Inclusion::Direct => tree.children(id),
            Inclusion::Recursive => tree.descendants(id),
        };
        for child in children.into_iter().filter(|n| n.live) {
            set.update(child);
        }
    }

    fn parents(&self, tree: &dyn ContentTree, id: NodeId, set: &mut AffectedSet) {
        let parents = match self.parents {
            Inclusion::None => Vec::new(),
            Inclusion::Direct => tree.parent(id).into_iter().collect(),
            Inclusion::Recursive => tree.ancestors(id),
        };
        for parent in parents.into_iter().filter(|n| n.live) {
            set.update(parent);
        }
    }

    fn is_redirector(node: &ContentNode) -> bool {
        matches!(node.kind, NodeKind::Redirector { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{MemoryTree, Publishable, UrlMap};
    use crate::error::ErrorKind;
    use rstest::rstest;

    const BASE: &str = "https://example.com/";

    fn url(path: &str) -> String {
        format!("{BASE}{path}")
    }

    fn keys(urls: &UrlMap) -> Vec<&str> {
        urls.keys().map(String::as_str).collect()
    }

    /// ```text
    /// home
    /// about            <- redirector "old-about", virtual "about-mirror"
    /// ├── team
    /// │   └── alice
    /// └── history
    /// ```
    fn site() -> Vec<ContentNode> {
        vec![
            ContentNode::page(1, None, "home"),
            ContentNode::page(2, None, "about"),
            ContentNode::page(3, Some(2), "team"),
            ContentNode::page(4, Some(3), "alice"),
            ContentNode::page(5, Some(2), "history"),
            ContentNode::page(6, None, "old-about").with_kind(NodeKind::Redirector { target: 2 }),
            ContentNode::page(7, None, "about-mirror").with_kind(NodeKind::Virtual { source: 2 }),
        ]
    }

    fn tree(nodes: Vec<ContentNode>) -> MemoryTree {
        MemoryTree::new(BASE, nodes).unwrap()
    }

    #[test]
    fn test_publish_updates_self_aliases_and_parent() {
        let tree = tree(site());
        let set = Resolver::default().resolve(&Mutation::publish(3, &tree)).unwrap();
        assert_eq!(keys(&set.update_urls()), vec![url("about/"), url("about/team/")]);
        assert!(set.to_delete().is_empty());

        let set = Resolver::default().resolve(&Mutation::publish(2, &tree)).unwrap();
        assert_eq!(keys(&set.update_urls()), vec![url("about-mirror/"), url("about/"), url("old-about/")]);
    }

    #[rstest]
    #[case(Inclusion::None, Inclusion::None, &["about/team/"])]
    #[case(Inclusion::Direct, Inclusion::Direct, &["about/", "about/team/", "about/team/alice/"])]
    #[case(Inclusion::None, Inclusion::Recursive, &["about/team/", "about/team/alice/"])]
    fn test_inclusion_settings(
        #[case] parents: Inclusion,
        #[case] children: Inclusion,
        #[case] expected: &[&str],
    ) {
        let tree = tree(site());
        let set = Resolver::new(parents, children).resolve(&Mutation::publish(3, &tree)).unwrap();
        let expected: Vec<String> = expected.iter().map(|p| url(p)).collect();
        assert_eq!(keys(&set.update_urls()), expected);
    }

    #[test]
    fn test_recursive_parents() {
        let tree = tree(site());
        let set = Resolver::new(Inclusion::Recursive, Inclusion::None).resolve(&Mutation::publish(4, &tree)).unwrap();
        assert_eq!(keys(&set.update_urls()), vec![url("about/"), url("about/team/"), url("about/team/alice/")]);
    }

    #[test]
    fn test_renamed_node_moves_descendants() {
        let before = tree(site());
        let mut renamed = site();
        renamed[1].segment = "company".to_string();
        let after = tree(renamed);

        let mutation = Mutation::publish(2, &after).with_previous(&before);
        let set = Resolver::default().resolve(&mutation).unwrap();
        let update = set.update_urls();
        assert!(update.contains_key(&url("company/")));
        assert!(update.contains_key(&url("company/team/")));
        assert!(update.contains_key(&url("company/team/alice/")));
        assert!(update.contains_key(&url("company/history/")));
        assert_eq!(keys(&set.delete_urls()), vec![
            url("about/"),
            url("about/history/"),
            url("about/team/"),
            url("about/team/alice/"),
        ]);
    }

    #[test]
    fn test_unchanged_url_deletes_nothing() {
        let before = tree(site());
        let after = tree(site());
        let set = Resolver::default().resolve(&Mutation::publish(3, &after).with_previous(&before)).unwrap();
        assert!(set.to_delete().is_empty());
    }

    #[test]
    fn test_unpublish_cascades_to_every_descendant() {
        let before = tree(site());
        let mut nodes = site();
        for node in nodes.iter_mut().filter(|n| matches!(n.id, 2..=5 | 7)) {
            node.live = false;
        }
        let after = tree(nodes);

        let set = Resolver::default().resolve(&Mutation::unpublish(2, &after).with_previous(&before)).unwrap();
        assert_eq!(keys(&set.delete_urls()), vec![
            url("about-mirror/"),
            url("about/"),
            url("about/history/"),
            url("about/team/"),
            url("about/team/alice/"),
        ]);
        // The redirector survives and is regenerated.
        assert_eq!(keys(&set.update_urls()), vec![url("old-about/")]);
    }

    #[test]
    fn test_unpublish_updates_live_parent() {
        let tree = tree(site());
        let set = Resolver::default().resolve(&Mutation::unpublish(4, &tree)).unwrap();
        assert_eq!(keys(&set.update_urls()), vec![url("about/team/")]);
        assert_eq!(keys(&set.delete_urls()), vec![url("about/team/alice/")]);
    }

    #[test]
    fn test_node_without_urls_yields_nothing() {
        let tree = tree(vec![ContentNode::page(1, Some(42), "orphan")]);
        let set = Resolver::default().resolve(&Mutation::publish(1, &tree)).unwrap();
        assert!(set.is_empty());
        let set = Resolver::default().resolve(&Mutation::publish(404, &tree)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_alias_cycle_fails_resolution() {
        let tree = tree(vec![
            ContentNode::page(1, None, "a").with_kind(NodeKind::Virtual { source: 2 }),
            ContentNode::page(2, None, "b").with_kind(NodeKind::Virtual { source: 1 }),
        ]);
        let err = Resolver::default().resolve(&Mutation::publish(1, &tree)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::AliasCycle(_)));
    }

    struct Listing;
    impl AffectedSetHook for Listing {
        fn extend(&self, _mutation: &Mutation<'_>, affected: &mut AffectedSet) -> Result<()> {
            affected.update(&Affected {
                key: "listing".to_string(),
                urls: UrlMap::from([(url("news/"), 3)]),
            });
            affected.delete(&Affected {
                key: "listing-old".to_string(),
                urls: UrlMap::from([(url("news/"), 0)]),
            });
            Ok(())
        }
    }

    #[test]
    fn test_hooks_extend_and_are_reconciled() {
        let tree = tree(site());
        let resolver = Resolver::default().with_hook(Listing);
        let set = resolver.resolve(&Mutation::publish(1, &tree)).unwrap();
        assert_eq!(set.update_urls().get(&url("news/")), Some(&3));
        assert!(set.to_delete().is_empty());
        assert!(set.to_update().iter().any(|a| a.key() == "listing"));
    }
}
