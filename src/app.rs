//! Query and worker entry points
//!
//! The query path only reads the local cache and may start a worker; it never
//! touches the network. The worker path downloads a dataset and, for links,
//! prefetches icons.

use anyhow::Context as _;
use tracing::info;

use crate::cli::{Command, QueryArgs};
use crate::context::Context;
use crate::download::download_and_persist;
use crate::feedback::{render_keys, render_links, Feedback};
use crate::icons::prefetch_icons;
use crate::jobs::JobLauncher;
use crate::refresh::Dataset;

/// What an invocation produced
#[derive(Debug)]
pub enum Outcome {
    /// Query mode: results to print
    Feedback(Feedback),
    /// Worker mode finished
    Refreshed,
}

/// Clears the job's PID file when the worker returns, whatever the outcome
struct JobRelease<'a> {
    launcher: &'a dyn JobLauncher,
    job: String,
}

impl Drop for JobRelease<'_> {
    fn drop(&mut self) {
        self.launcher.finished(&self.job);
    }
}

pub async fn run(ctx: &Context, command: &Command) -> anyhow::Result<Outcome> {
    match command {
        Command::Links(args) if args.download => {
            refresh_links(ctx).await?;
            Ok(Outcome::Refreshed)
        }
        Command::Keys(args) if args.download => {
            refresh_keys(ctx).await?;
            Ok(Outcome::Refreshed)
        }
        Command::Links(args) => query_links(ctx, args).map(Outcome::Feedback),
        Command::Keys(args) => query_keys(ctx, args).map(Outcome::Feedback),
    }
}

pub fn query_links(ctx: &Context, args: &QueryArgs) -> anyhow::Result<Feedback> {
    let links = ctx.links_client();
    let coordinator = ctx.coordinator();

    let lookup = coordinator
        .get_data(&links, args.refresh)
        .context("error getting links")?;

    let guard = ctx.icon_guard();
    let refreshing = coordinator.is_refreshing(&links);
    Ok(render_links(&lookup, &args.query, refreshing, |link| {
        guard
            .has_icon(&link.short)
            .then(|| guard.icon_path(&link.short))
    }))
}

pub fn query_keys(ctx: &Context, args: &QueryArgs) -> anyhow::Result<Feedback> {
    let keys = ctx.keys_client();
    let coordinator = ctx.coordinator();

    let lookup = coordinator
        .get_data(&keys, args.refresh)
        .context("error getting keys")?;

    Ok(render_keys(
        &lookup,
        &args.query,
        coordinator.is_refreshing(&keys),
    ))
}

/// Worker: download links, then fetch missing icons
pub async fn refresh_links(ctx: &Context) -> anyhow::Result<()> {
    let links = ctx.links_client();
    let _release = JobRelease {
        launcher: ctx.launcher.as_ref(),
        job: links.job_name(),
    };
    info!(dataset = links.name(), "Background job");

    let records = download_and_persist(&links, &ctx.data)
        .await
        .context("error downloading links")?;

    if !ctx.config.icons.enabled {
        return Ok(());
    }

    let guard = ctx.icon_guard();
    if guard.needs_icon_download(&records) {
        let report = prefetch_icons(&records, &guard, &ctx.favicon_client()).await;
        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            skipped = report.skipped,
            "Icon prefetch finished"
        );
    }

    Ok(())
}

/// Worker: download keys
pub async fn refresh_keys(ctx: &Context) -> anyhow::Result<()> {
    let keys = ctx.keys_client();
    let _release = JobRelease {
        launcher: ctx.launcher.as_ref(),
        job: keys.job_name(),
    };
    info!(dataset = keys.name(), "Background job");

    download_and_persist(&keys, &ctx.data)
        .await
        .context("error downloading keys")?;

    Ok(())
}
