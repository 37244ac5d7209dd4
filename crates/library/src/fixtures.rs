//! Shared test wiring: an in-memory queue, cache and renderer around a small
//! content tree.
//!
//! The default tree is `home` (1), `a` (2) and `a/b` (3); every live page
//! renders successfully unless a renderer is supplied.

use crate::content::{ContentNode, ContentTree, MemoryTree};
use crate::publish::FilesystemPublisher;
use crate::{Context, Settings};
use staticpub_config::OutputConfig;
use staticpub_queue::{Database, EntryRepository, JobRepository};
use staticpub_render::StaticRenderer;
use staticpub_storage::backend::MockBackend;
use staticpub_urls::{PathMapper, Sanitiser};
use std::sync::Arc;

pub(crate) const BASE: &str = "https://example.com/";

/// Absolute URL of a page below the base; `""` is the home page.
pub(crate) fn page(path: &str) -> String {
    match path {
        "" => BASE.to_string(),
        path => format!("{BASE}{path}/"),
    }
}

pub(crate) fn default_nodes() -> Vec<ContentNode> {
    vec![ContentNode::page(1, None, "home"), ContentNode::page(2, None, "a"), ContentNode::page(3, Some(2), "b")]
}

pub(crate) struct Fixture {
    pub ctx: Context,
    pub storage: Arc<MockBackend>,
    pub renderer: Arc<StaticRenderer>,
}
impl Fixture {
    pub(crate) fn builder() -> FixtureBuilder {
        FixtureBuilder::default()
    }

    /// Swap the content tree, as if the CMS committed a change.
    pub(crate) fn set_tree(&mut self, nodes: Vec<ContentNode>) {
        self.ctx.tree = Box::new(MemoryTree::new(BASE, nodes).unwrap());
    }
}

pub(crate) struct FixtureBuilder {
    nodes: Vec<ContentNode>,
    settings: Settings,
    output: OutputConfig,
    regeneration_window: time::Duration,
    files: Vec<(String, Vec<u8>)>,
    pages: Vec<(String, String)>,
}
impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            settings: Settings::default(),
            output: OutputConfig::default(),
            regeneration_window: time::Duration::ZERO,
            files: Vec::new(),
            pages: Vec::new(),
        }
    }
}
impl FixtureBuilder {
    pub(crate) fn nodes(mut self, nodes: Vec<ContentNode>) -> Self {
        self.nodes = nodes;
        self
    }

    pub(crate) fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.settings.chunk_size = chunk_size;
        self
    }

    pub(crate) fn max_url_attempts(mut self, attempts: u32) -> Self {
        self.settings.max_url_attempts = attempts;
        self
    }

    pub(crate) fn php(mut self, php: bool) -> Self {
        self.output.php = php;
        self
    }

    pub(crate) fn regeneration_window(mut self, window: time::Duration) -> Self {
        self.regeneration_window = window;
        self
    }

    /// Pre-existing cache file.
    pub(crate) fn file(mut self, path: &str, data: &str) -> Self {
        self.files.push((path.to_string(), data.as_bytes().to_vec()));
        self
    }

    /// Extra renderable page, beyond the live nodes of the tree.
    pub(crate) fn page(mut self, url: impl Into<String>, body: &str) -> Self {
        self.pages.push((url.into(), body.to_string()));
        self
    }

    pub(crate) async fn build(self) -> Fixture {
        let tree = MemoryTree::new(BASE, self.nodes).unwrap();
        let mut renderer = StaticRenderer::new();
        for node in tree.live_nodes() {
            for url in crate::content::Publishable::urls_to_cache(node).into_keys() {
                let body = format!("<h1>{}</h1>", node.segment);
                renderer = renderer.with_page(url, body);
            }
        }
        for (url, body) in self.pages {
            renderer = renderer.with_page(url, body);
        }
        let renderer = Arc::new(renderer);
        let storage = Arc::new(MockBackend::with_files(self.files));

        let db = Database::connect_in_memory().await.unwrap();
        let publisher = FilesystemPublisher::new(
            storage.clone(),
            renderer.clone(),
            PathMapper::new(BASE, false).unwrap(),
            self.output,
        )
        .unwrap();
        let ctx = Context {
            tree: Box::new(tree),
            publisher,
            entries: EntryRepository::from(&db).with_regeneration_window(self.regeneration_window),
            jobs: JobRepository::from(&db),
            sanitiser: Sanitiser::default(),
            settings: self.settings,
        };
        Fixture { ctx, storage, renderer }
    }
}
