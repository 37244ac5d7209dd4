//! `staticpub`: keeps a directory of pre-rendered pages in step with a CMS.

mod app;
mod cli;
mod commands;
mod error;
mod logging;
mod manifest;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use staticpub_config::Config;
use staticpub_library::resolve::Action;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    run(cli).await.map_err(|err| miette::miette!("{err:?}"))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    logging::init(&config.log)?;
    let app = App::open(config, cli.manifest).await?;
    let code = match cli.command {
        Command::EnqueueAll => commands::enqueue::run(&app).await,
        Command::Publish(args) => commands::mutate::run(&app, Action::Publish, args).await,
        Command::Unpublish(args) => commands::mutate::run(&app, Action::Unpublish, args).await,
        Command::Process(args) => commands::run::process(&app, args).await,
        Command::Legacy(args) => commands::run::legacy(&app, args).await,
        Command::PurgeOrphans { verbose, dry_run } => commands::purge::run(&app, verbose, dry_run).await,
        Command::Status { json, limit } => commands::status::run(&app, json, limit).await,
    };
    app.close().await;
    code
}
