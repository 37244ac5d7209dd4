//! Wiring configuration into queue, cache, renderer and content tree.

use crate::error::{ErrorKind, Result};
use crate::manifest;
use exn::{OptionExt, ResultExt};
use staticpub_config::Config;
use staticpub_library::content::MemoryTree;
use staticpub_library::publish::FilesystemPublisher;
use staticpub_library::resolve::Resolver;
use staticpub_library::{Context, Settings};
use staticpub_queue::{Database, EntryRepository, JobRepository};
use staticpub_render::{CommandRenderer, Renderer};
use staticpub_storage::StoreHandle;
use staticpub_storage::backend::LocalBackend;
use staticpub_urls::{PathMapper, Sanitiser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct App {
    pub config: Config,
    db: Database,
    manifest: Option<PathBuf>,
}
impl App {
    pub async fn open(config: Config, manifest: Option<PathBuf>) -> Result<Self> {
        let path = config.database_path().or_raise(|| ErrorKind::Config)?;
        let db = Database::connect(&path).await.or_raise(|| ErrorKind::Queue)?;
        info!(database = %path.display(), "opened publish queue");
        Ok(Self { config, db, manifest })
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    pub fn sanitiser(&self) -> Sanitiser {
        Sanitiser::new(self.config.force_ssl)
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.config.regenerate_parents, self.config.regenerate_children)
    }

    /// Claims older than `force_regeneration_secs` are treated as abandoned,
    /// for queue entries and jobs alike.
    pub fn entries(&self) -> Result<EntryRepository> {
        Ok(EntryRepository::from(&self.db).with_regeneration_window(self.abandon_after()?))
    }

    pub fn jobs(&self) -> Result<JobRepository> {
        Ok(JobRepository::from(&self.db).with_reclaim_window(self.abandon_after()?))
    }

    fn abandon_after(&self) -> Result<time::Duration> {
        time::Duration::try_from(self.config.force_regeneration()).or_raise(|| ErrorKind::Config)
    }

    pub async fn tree(&self) -> Result<MemoryTree> {
        let path = self.manifest.as_ref().or(self.config.content_manifest.as_ref()).ok_or_raise(|| ErrorKind::NoManifest)?;
        manifest::load(&self.config.base_url, path).await
    }

    pub fn renderer(&self) -> Result<Arc<dyn Renderer>> {
        let render = &self.config.render;
        let command = render.command.as_deref().ok_or_raise(|| ErrorKind::RenderNotConfigured)?;
        let mut renderer = CommandRenderer::discover(command)
            .or_raise(|| ErrorKind::Render)?
            .with_args(render.args.iter().cloned())
            .with_timeout(self.config.render_timeout());
        if let Some(dir) = &render.working_dir {
            renderer = renderer.with_working_dir(dir);
        }
        Ok(Arc::new(renderer))
    }

    /// Everything a worker needs. Without `render`, the publisher can only
    /// purge.
    pub async fn context(&self, render: bool) -> Result<Context> {
        let storage: StoreHandle = Arc::new(
            LocalBackend::new("local", &self.config.destination).or_raise(|| ErrorKind::Storage)?,
        );
        let mapper =
            PathMapper::new(&self.config.base_url, self.config.domain_based_caching).or_raise(|| ErrorKind::Config)?;
        let output = self.config.output.clone();
        let publisher = match render {
            true => FilesystemPublisher::new(storage, self.renderer()?, mapper, output),
            false => FilesystemPublisher::purge_only(storage, mapper, output),
        }
        .or_raise(|| ErrorKind::Publishing)?;
        Ok(Context {
            tree: Box::new(self.tree().await?),
            publisher,
            entries: self.entries()?,
            jobs: self.jobs()?,
            sanitiser: self.sanitiser(),
            settings: Settings::from(&self.config),
        })
    }
}
