use std::{collections::HashMap, path::PathBuf, sync::Arc};

use tokio::{
    sync::Semaphore,
    task::{self, JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    pages::{PageId, PageList},
    pipeline::{PageFailure, PageOutcome, Pipeline, RunError},
};

#[derive(Debug)]
pub struct FailedPage {
    pub id: PageId,
    pub title: String,
    pub failure: PageFailure,
}

/// What happened to every page of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub archived: Vec<(PageId, PathBuf)>,
    pub already_archived: Vec<PageId>,
    pub failed: Vec<FailedPage>,
    /// Images that fell back to their remote URL.
    pub asset_failures: usize,
    /// Archived pages lacking a table for some expected labels.
    pub missing_labels: Vec<(PageId, Vec<String>)>,
    /// Pages never started because the run was cancelled.
    pub not_started: usize,
}

impl RunReport {
    fn record(&mut self, id: PageId, title: String, outcome: Result<PageOutcome, PageFailure>) {
        match outcome {
            Ok(PageOutcome::Archived {
                path,
                asset_failures,
                missing_labels,
                ..
            }) => {
                self.asset_failures += asset_failures.len();
                if !missing_labels.is_empty() {
                    self.missing_labels.push((id, missing_labels));
                }
                self.archived.push((id, path));
            }
            Ok(PageOutcome::AlreadyArchived(_)) => self.already_archived.push(id),
            Err(failure) => {
                warn!("Page {} ({}) failed: {}", id, title, failure);
                self.failed.push(FailedPage { id, title, failure });
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.not_started == 0
    }
}

impl Pipeline {
    /// Processes `pages` with at most `concurrency` pages in flight.
    ///
    /// Cancelling `cancel` stops new pages from starting; pages already in
    /// progress run to completion.
    pub async fn run(
        self: Arc<Self>,
        pages: PageList,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        self.archive.prepare().await?;

        info!(
            "Processing {} pages (concurrency: {})",
            pages.len(),
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut running = HashMap::new();
        let mut report = RunReport::default();
        let total = pages.len();
        let mut started = 0;

        for (id, title) in pages {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!("Cancelled, not starting remaining pages");
                break;
            };

            started += 1;
            let pipeline = self.clone();
            let page = (id, title.clone());
            let handle = tasks.spawn(
                async move {
                    let _permit = permit; // Hold permit until the page completes
                    let outcome = pipeline.convert_page(id, &title).await;
                    (id, title, outcome)
                }
                .instrument(info_span!("page", id = %id)),
            );
            running.insert(handle.id(), page);

            while let Some(done) = tasks.try_join_next() {
                collect(&mut report, &running, done);
            }
        }

        while let Some(done) = tasks.join_next().await {
            collect(&mut report, &running, done);
        }

        report.not_started = total - started;
        report.archived.sort_by_key(|(id, _)| *id);
        report.already_archived.sort();
        report.failed.sort_by_key(|f| f.id);
        report.missing_labels.sort();
        Ok(report)
    }
}

type PageResult = (PageId, String, Result<PageOutcome, PageFailure>);

fn collect(
    report: &mut RunReport,
    running: &HashMap<task::Id, (PageId, String)>,
    done: Result<PageResult, JoinError>,
) {
    let e = match done {
        Ok((id, title, outcome)) => return report.record(id, title, outcome),
        Err(e) => e,
    };

    let page = running.get(&e.id()).cloned();
    match page {
        Some((id, title)) => {
            let failure = PageFailure::Panicked(panic_message(e));
            report.record(id, title, Err(failure));
        }
        None => error!("Page task failed: {}", e),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
