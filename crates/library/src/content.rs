//! The content tree, as far as publishing is concerned.
//!
//! The CMS owns versioning, hierarchy and storage of its pages. All the
//! publisher needs from it is the shape of the tree (parents, children,
//! aliases), which nodes are live, and which URLs each node occupies. That is
//! the [`ContentTree`] trait; [`MemoryTree`] is the in-process implementation
//! loaded from a JSON manifest.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use staticpub_urls::PathMapper;
use std::collections::BTreeMap;

pub type NodeId = u64;
/// Absolute URL to priority.
pub type UrlMap = BTreeMap<String, i64>;

/// Anything that occupies cache slots.
pub trait Publishable {
    /// Identity used to deduplicate publishables within one change.
    fn key(&self) -> String;

    /// Every URL this object is cached under, with its priority.
    ///
    /// Empty for objects that cannot be resolved to a URL (unsaved, deleted,
    /// orphaned), which simply contribute nothing.
    fn urls_to_cache(&self) -> UrlMap;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Page,
    /// Mirrors the content of `source` at its own URL.
    Virtual { source: NodeId },
    /// Redirects visitors to `target`.
    Redirector { target: NodeId },
}
impl NodeKind {
    /// The node this one is an alias of, if any.
    pub fn alias_of(&self) -> Option<NodeId> {
        match self {
            Self::Page => None,
            Self::Virtual { source } => Some(*source),
            Self::Redirector { target } => Some(*target),
        }
    }
}

fn live_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    /// URL segment of this node below its parent.
    pub segment: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default = "live_by_default")]
    pub live: bool,
    #[serde(default)]
    pub priority: i64,
    /// Resolved by the owning tree.
    #[serde(skip)]
    pub urls: UrlMap,
}
impl ContentNode {
    pub fn page(id: NodeId, parent: Option<NodeId>, segment: impl Into<String>) -> Self {
        Self {
            id,
            parent,
            segment: segment.into(),
            kind: NodeKind::Page,
            live: true,
            priority: 0,
            urls: UrlMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn unpublished(mut self) -> Self {
        self.live = false;
        self
    }
}
impl Publishable for ContentNode {
    fn key(&self) -> String {
        format!("node:{}", self.id)
    }

    fn urls_to_cache(&self) -> UrlMap {
        self.urls.clone()
    }
}

/// Read access to the CMS content hierarchy.
pub trait ContentTree: Send + Sync {
    fn node(&self, id: NodeId) -> Option<&ContentNode>;

    /// Direct children, in a stable order.
    fn children(&self, id: NodeId) -> Vec<&ContentNode>;

    /// Virtual pages and redirectors pointing directly at `id`.
    fn aliases(&self, id: NodeId) -> Vec<&ContentNode>;

    /// Every node currently published.
    fn live_nodes(&self) -> Vec<&ContentNode>;

    fn parent(&self, id: NodeId) -> Option<&ContentNode> {
        self.node(id).and_then(|n| n.parent).and_then(|p| self.node(p))
    }

    /// Every descendant of `id`, parents before their children.
    fn descendants(&self, id: NodeId) -> Vec<&ContentNode> {
        let mut found = Vec::new();
        let mut pending = vec![id];
        // Guards against a malformed tree whose parent links loop.
        let mut seen = std::collections::BTreeSet::from([id]);
        while let Some(current) = pending.pop() {
            for child in self.children(current) {
                if seen.insert(child.id) {
                    found.push(child);
                    pending.push(child.id);
                }
            }
        }
        found
    }

    /// Every ancestor of `id`, nearest first.
    fn ancestors(&self, id: NodeId) -> Vec<&ContentNode> {
        let mut found: Vec<&ContentNode> = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            if node.id == id || found.iter().any(|n| n.id == node.id) {
                break;
            }
            found.push(node);
            current = self.parent(node.id);
        }
        found
    }
}

/// Root segments that map onto the site root rather than a sub-path.
const HOME_SEGMENTS: [&str; 2] = ["", "home"];

#[derive(Deserialize)]
struct Manifest {
    nodes: Vec<ContentNode>,
}

/// In-memory content tree.
///
/// Each node's URL is computed once, at construction, from the chain of URL
/// segments up to the root:
///
/// | node                                   | URL (base `https://example.com/`) |
/// |----------------------------------------|-----------------------------------|
/// | root `home`                            | `https://example.com/`            |
/// | root `about`                           | `https://example.com/about/`      |
/// | `team` below `about`                   | `https://example.com/about/team/` |
/// | node whose parent chain is broken      | no URL                            |
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    nodes: BTreeMap<NodeId, ContentNode>,
    children: BTreeMap<NodeId, Vec<NodeId>>,
    aliases: BTreeMap<NodeId, Vec<NodeId>>,
}
impl MemoryTree {
    pub fn new(base_url: &str, nodes: impl IntoIterator<Item = ContentNode>) -> Result<Self> {
        let mapper = PathMapper::new(base_url, false).or_raise(|| ErrorKind::Configuration)?;
        let base = mapper.base_url().to_string();

        let nodes: BTreeMap<NodeId, ContentNode> = nodes.into_iter().map(|n| (n.id, n)).collect();
        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        let mut aliases: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in nodes.values() {
            if let Some(parent) = node.parent {
                children.entry(parent).or_default().push(node.id);
            }
            if let Some(original) = node.kind.alias_of() {
                aliases.entry(original).or_default().push(node.id);
            }
        }

        let links: BTreeMap<NodeId, String> =
            nodes.keys().filter_map(|id| Self::link(&nodes, &base, *id).map(|link| (*id, link))).collect();
        let nodes = nodes
            .into_iter()
            .map(|(id, mut node)| {
                node.urls = links.get(&id).map(|link| UrlMap::from([(link.clone(), node.priority)])).unwrap_or_default();
                (id, node)
            })
            .collect();

        Ok(Self { nodes, children, aliases })
    }

    /// Load a tree from a JSON manifest: `{"nodes": [{"id": 1, "segment": "home"}, ...]}`.
    pub fn from_json(base_url: &str, json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json).or_raise(|| ErrorKind::Configuration)?;
        Self::new(base_url, manifest.nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn link(nodes: &BTreeMap<NodeId, ContentNode>, base: &str, id: NodeId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = nodes.get(&id)?;
        loop {
            segments.push(current.segment.trim_matches('/'));
            match current.parent {
                None => break,
                Some(parent) => current = nodes.get(&parent)?,
            }
            // A parent chain longer than the tree itself must loop.
            if segments.len() > nodes.len() {
                return None;
            }
        }
        segments.reverse();
        if segments.len() == 1 && HOME_SEGMENTS.contains(&segments[0]) {
            return Some(base.to_string());
        }
        let path = segments.into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
        Some(format!("{base}{path}/"))
    }

    fn lookup<'a>(&'a self, ids: Option<&Vec<NodeId>>) -> Vec<&'a ContentNode> {
        ids.into_iter().flatten().filter_map(|id| self.nodes.get(id)).collect()
    }
}
impl ContentTree for MemoryTree {
    fn node(&self, id: NodeId) -> Option<&ContentNode> {
        self.nodes.get(&id)
    }

    fn children(&self, id: NodeId) -> Vec<&ContentNode> {
        self.lookup(self.children.get(&id))
    }

    fn aliases(&self, id: NodeId) -> Vec<&ContentNode> {
        self.lookup(self.aliases.get(&id))
    }

    fn live_nodes(&self) -> Vec<&ContentNode> {
        self.nodes.values().filter(|n| n.live).collect()
    }
}
