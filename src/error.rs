//! Binary Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("could not install the log subscriber")]
    Logging,
    #[display("could not open the publish queue")]
    Queue,
    #[display("could not open the cache directory")]
    Storage,
    #[display("`render.command` is not configured")]
    RenderNotConfigured,
    #[display("render command is not usable")]
    Render,
    #[display("could not load content manifest {}", _0.display())]
    Manifest(#[error(not(source))] PathBuf),
    #[display("no content manifest; pass `--manifest` or set `content_manifest`")]
    NoManifest,
    #[display("node {_0} is in neither the current nor the previous manifest")]
    UnknownNode(#[error(not(source))] u64),
    #[display("publishing failed")]
    Publishing,
    #[display("could not write output")]
    Output,
}
