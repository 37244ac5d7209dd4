use crate::app::App;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use staticpub_library::trigger::enqueue_full_rebuild;
use staticpub_queue::Enqueued;
use std::process::ExitCode;
use time::UtcDateTime;

pub async fn run(app: &App) -> Result<ExitCode> {
    let jobs = app.jobs()?;
    match enqueue_full_rebuild(&jobs, UtcDateTime::now()).await.or_raise(|| ErrorKind::Publishing)? {
        Enqueued::Created(id) => println!("queued full rebuild as job {id}"),
        Enqueued::Duplicate(id) => println!("a full rebuild is already queued as job {id}"),
    }
    Ok(ExitCode::SUCCESS)
}
