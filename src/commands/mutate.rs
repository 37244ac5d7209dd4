//! `publish` and `unpublish`: what a CMS hook would call once a change is
//! committed.

use crate::app::App;
use crate::cli::MutationArgs;
use crate::error::{ErrorKind, Result};
use crate::manifest;
use exn::ResultExt;
use staticpub_library::content::ContentTree;
use staticpub_library::resolve::{Action, Mutation};
use staticpub_library::trigger::{FlushReport, PublishQueue, StaticPublishingTrigger};
use std::process::ExitCode;

pub async fn run(app: &App, action: Action, args: MutationArgs) -> Result<ExitCode> {
    let current = app.tree().await?;
    let previous = match &args.previous {
        Some(path) => Some(manifest::load(&app.config.base_url, path).await?),
        None => None,
    };
    if current.node(args.node).is_none() && previous.as_ref().and_then(|tree| tree.node(args.node)).is_none() {
        exn::bail!(ErrorKind::UnknownNode(args.node));
    }

    let mut mutation = match action {
        Action::Publish => Mutation::publish(args.node, &current),
        Action::Unpublish => Mutation::unpublish(args.node, &current),
    };
    if let Some(previous) = &previous {
        mutation = mutation.with_previous(previous);
    }

    let mut queue = PublishQueue::new(app.sanitiser(), app.config.urls_per_job, app.config.chunk_size);
    let trigger = StaticPublishingTrigger::new(app.resolver());
    let report = trigger
        .trigger(mutation, &mut queue, &app.entries()?, &app.jobs()?)
        .await
        .or_raise(|| ErrorKind::Publishing)?;
    println!("{}", describe(action, args.node, &report));
    Ok(ExitCode::SUCCESS)
}

fn describe(action: Action, node: u64, report: &FlushReport) -> String {
    let mut line = format!(
        "{action} node {node}: {} to regenerate, {} to purge",
        report.urls_to_update, report.urls_to_delete
    );
    if !report.created.is_empty() {
        line.push_str(&format!("; queued job(s) {}", join(&report.created)));
    }
    if !report.duplicates.is_empty() {
        line.push_str(&format!("; already queued as {}", join(&report.duplicates)));
    }
    line
}

fn join(ids: &[i64]) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let report = FlushReport { created: vec![4, 5], duplicates: vec![2], urls_to_update: 3, urls_to_delete: 1 };
        assert_eq!(
            describe(Action::Publish, 7, &report),
            "publish node 7: 3 to regenerate, 1 to purge; queued job(s) 4, 5; already queued as 2"
        );
        assert_eq!(
            describe(Action::Unpublish, 7, &FlushReport::default()),
            "unpublish node 7: 0 to regenerate, 0 to purge"
        );
    }
}
