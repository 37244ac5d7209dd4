use crate::app::App;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::process::ExitCode;
use tracing::warn;

pub async fn run(app: &App, verbose: bool, dry_run: bool) -> Result<ExitCode> {
    let ctx = app.context(false).await?;
    let orphans = ctx.orphans().await.or_raise(|| ErrorKind::Publishing)?;
    if dry_run {
        for url in &orphans {
            println!("{url}");
        }
        println!("{} orphaned page(s)", orphans.len());
        return Ok(ExitCode::SUCCESS);
    }

    let (mut files, mut failed) = (0, 0);
    for url in &orphans {
        match ctx.publisher.purge_url(url).await {
            Ok(removed) => {
                files += removed.len();
                if verbose {
                    println!("purged {url} ({} file(s))", removed.len());
                }
            },
            Err(e) => {
                warn!(%url, error = ?e, "could not purge orphan");
                failed += 1;
            },
        }
    }
    println!("{} orphaned page(s), {files} file(s) removed, {failed} failed", orphans.len());
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
