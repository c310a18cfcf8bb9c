//! The multi-transfer engine: a single control loop topping off a pool
//! of concurrent transfers, draining them in completion order, running
//! the content verification step and enforcing the consecutive-failure
//! breaker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::error::{HlsgetError, HlsgetResult};
use crate::fetch::{
    stream_to_file, verify_file, Downloader, FetchResults, PathUrl, ReceivePacer, TransferError,
    MAX_RECEIVE_RATE,
};
use crate::meter::{ProgressMeter, TransferProgress};

/// Upper bound of simultaneously open transfers.
pub const MAX_ACTIVE_TRANSFERS: usize = 5;

/// The engine gives up after this many failed transfers in a row.
pub const MAX_CONSECUTIVE_ERRORS: usize = 5;

struct TransferOutcome {
    id: usize,
    path: PathBuf,
    url: String,
    result: Result<(), String>,
}

impl Downloader {
    /// Download every `{path, url}` pair, keeping at most
    /// [`MAX_ACTIVE_TRANSFERS`] transfers open at any time.
    ///
    /// Individual failures land in [`FetchResults::errors`] without
    /// stopping the run; only [`MAX_CONSECUTIVE_ERRORS`] failures in a
    /// row or a task-level fault end it early. `succeeded` collects
    /// the finished paths in completion order.
    pub async fn fetch_many(&self, jobs: Vec<PathUrl>) -> FetchResults {
        let mut results = FetchResults::default();

        let meter = ProgressMeter::new();
        meter.set_number_of_downloads(jobs.len());

        let mut active: JoinSet<TransferOutcome> = JoinSet::new();
        let mut cursor = 0;
        let mut consecutive_errors = 0;

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !active.is_empty() || cursor < jobs.len() {
            while active.len() < MAX_ACTIVE_TRANSFERS && cursor < jobs.len() {
                let PathUrl { path, url } = jobs[cursor].clone();
                let id = cursor;
                cursor += 1;

                if self.verbose {
                    println!("Try to download: {url}");
                }

                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| url.clone());
                let record = meter.add(id, &name);

                let file = match File::create(&path).await {
                    Ok(file) => file,
                    Err(err) => {
                        results.errors.push(TransferError::new(
                            format!("Can't open file `{}' for writing: {err}", path.display()),
                            &url,
                            &path,
                        ));
                        meter.remove(id);
                        continue;
                    }
                };

                active.spawn(run_transfer(self.client.clone(), id, path, url, file, record));
            }

            tokio::select! {
                joined = active.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => {
                            meter.finish(outcome.id);

                            match outcome.result {
                                Ok(()) => match verify_file(&outcome.path, &outcome.url).await {
                                    Ok(()) => {
                                        consecutive_errors = 0;
                                        results.succeeded.push(outcome.path);
                                    }
                                    Err(error) => {
                                        consecutive_errors += 1;
                                        results.errors.push(error);
                                    }
                                },
                                Err(message) => {
                                    consecutive_errors += 1;
                                    results.errors.push(TransferError::new(
                                        message,
                                        &outcome.url,
                                        &outcome.path,
                                    ));
                                }
                            }

                            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                log::error!(
                                    "Giving up after {consecutive_errors} consecutive errors."
                                );
                                if self.progress {
                                    meter.render();
                                }
                                return results;
                            }
                        }
                        Some(Err(err)) => {
                            results.errors.push(TransferError::global(format!(
                                "download task failed: {err}"
                            )));
                            return results;
                        }
                        None => {}
                    }
                }
                _ = ticker.tick() => {}
            }

            if self.progress {
                meter.render();
            }
        }

        if self.progress {
            meter.render();
        }

        results
    }
}

async fn run_transfer(
    client: reqwest::Client,
    id: usize,
    path: PathBuf,
    url: String,
    mut file: File,
    record: Arc<TransferProgress>,
) -> TransferOutcome {
    let result = transfer(&client, &url, &mut file, &record).await;

    // the destination must be closed before verification; a failed
    // transfer leaves its truncated file behind
    drop(file);

    TransferOutcome {
        id,
        path,
        url,
        result: result.map_err(|err| err.to_string()),
    }
}

async fn transfer(
    client: &reqwest::Client,
    url: &str,
    file: &mut File,
    record: &TransferProgress,
) -> HlsgetResult<()> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(HlsgetError::HttpStatus(response.status()));
    }

    let mut pacer = ReceivePacer::new(MAX_RECEIVE_RATE);
    stream_to_file(response, file, Some(record), None, Some(&mut pacer)).await
}
