//! Page-walking controller for the remote listing.
//!
//! Walks pages strictly in order (the listing's state depends on the
//! previous page, and inter-page delays are part of the contract with the
//! target site), filters records already known, and stops on the configured
//! heuristics.

use crate::config::PaginationConfig;
use crate::observability::metrics;
use crate::pipeline::backoff::BackoffPolicy;
use crate::types::{PageExtractor, RawRecord, WalkMode};
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Walk states. `Retrying` covers the backoff loop for a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Walking,
    Retrying,
    Stopped,
}

/// Why the walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EmptyPages,
    NoNewRecords,
    NoMorePages,
    FailureStreak,
}

/// Outcome of one pagination run.
#[derive(Debug)]
pub struct WalkOutcome {
    /// Records not present in the known-id set, in walk order.
    pub new_records: Vec<RawRecord>,
    pub pages_visited: u32,
    pub pages_failed: Vec<u32>,
    pub records_seen: usize,
    pub stop_reason: StopReason,
}

pub struct PageWalker<'a> {
    extractor: &'a dyn PageExtractor,
    config: PaginationConfig,
    backoff: BackoffPolicy,
    /// Persisted identifiers plus everything seen earlier in this run.
    known_ids: HashSet<String>,
}

impl<'a> PageWalker<'a> {
    pub fn new(
        extractor: &'a dyn PageExtractor,
        config: PaginationConfig,
        known_ids: HashSet<String>,
    ) -> Self {
        let backoff = BackoffPolicy::new(
            config.max_retries,
            config.retry_base_delay_ms,
            config.retry_max_delay_ms,
        );
        Self { extractor, config, backoff, known_ids }
    }

    /// Walk the listing under `mode`, returning the accumulated new records.
    ///
    /// Transport failures are retried and then skipped per page; the walk
    /// itself only ends through one of its stop conditions.
    pub async fn run(&mut self, mode: WalkMode) -> WalkOutcome {
        let mut state = WalkState::Walking;
        let mut page: u32 = 1;
        let mut next_rank: u64 = 0;

        let mut consecutive_empty_pages: u32 = 0;
        let mut consecutive_pages_without_new: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        let mut new_records: Vec<RawRecord> = Vec::new();
        let mut pages_visited: u32 = 0;
        let mut pages_failed: Vec<u32> = Vec::new();
        let mut records_seen: usize = 0;
        let mut stop_reason = StopReason::NoMorePages;

        info!(source = self.extractor.source_name(), %mode, "Starting page walk");

        while state != WalkState::Stopped {
            let span = tracing::info_span!("page", page);
            let _enter = span.enter();

            let mut attempt: u32 = 0;
            let fetched = loop {
                match self.extractor.fetch_page(page).await {
                    Ok(batch) => break Some(batch),
                    Err(e) => {
                        attempt += 1;
                        match self.backoff.next_delay(attempt) {
                            Some(delay) => {
                                state = WalkState::Retrying;
                                warn!(page, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Page fetch failed, backing off");
                                tokio::time::sleep(delay).await;
                            }
                            None => {
                                warn!(page, error = %e, "Page failed after {} retries, skipping", self.config.max_retries);
                                break None;
                            }
                        }
                    }
                }
            };

            let batch = match fetched {
                Some(batch) => {
                    state = WalkState::Walking;
                    consecutive_failures = 0;
                    batch
                }
                None => {
                    metrics::pagination::page_failed();
                    pages_failed.push(page);
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        warn!(consecutive_failures, "Stopping walk, target looks dead");
                        stop_reason = StopReason::FailureStreak;
                        state = WalkState::Stopped;
                    } else {
                        page += 1;
                    }
                    continue;
                }
            };

            pages_visited += 1;
            records_seen += batch.records.len();
            metrics::pagination::page_fetched();

            // Walk order defines sort_rank, independent of any later sort.
            let mut page_records = batch.records;
            for record in &mut page_records {
                record.sort_rank = next_rank;
                next_rank += 1;
            }

            if page_records.is_empty() {
                consecutive_empty_pages += 1;
                debug!(consecutive_empty_pages, "Empty page");
                if consecutive_empty_pages >= self.config.max_empty_pages {
                    info!(pages_visited, "Stopping walk after consecutive empty pages");
                    stop_reason = StopReason::EmptyPages;
                    state = WalkState::Stopped;
                    continue;
                }
            } else {
                consecutive_empty_pages = 0;

                let fresh: Vec<RawRecord> = page_records
                    .into_iter()
                    .filter(|r| match &r.id {
                        Some(id) => !self.known_ids.contains(id),
                        // Records without a site id cannot collide here;
                        // dedup and validation deal with them downstream.
                        None => true,
                    })
                    .collect();

                if fresh.is_empty() {
                    consecutive_pages_without_new += 1;
                    debug!(consecutive_pages_without_new, "No new records on page");
                    if let Some(threshold) = mode.pages_without_new_threshold() {
                        if consecutive_pages_without_new >= threshold {
                            info!(pages_visited, "Incremental stop, caught up with known records");
                            stop_reason = StopReason::NoNewRecords;
                            state = WalkState::Stopped;
                            continue;
                        }
                    }
                } else {
                    consecutive_pages_without_new = 0;
                    for record in &fresh {
                        if let Some(id) = &record.id {
                            self.known_ids.insert(id.clone());
                        }
                    }
                    metrics::pagination::records_discovered(fresh.len() as u64);
                    debug!(new = fresh.len(), "Accumulated new records");
                    new_records.extend(fresh);
                }
            }

            if !batch.has_more {
                info!(pages_visited, "Listing reports no more pages");
                stop_reason = StopReason::NoMorePages;
                state = WalkState::Stopped;
                continue;
            }

            page += 1;
            self.pace().await;
        }

        info!(
            new = new_records.len(),
            pages_visited,
            failed = pages_failed.len(),
            ?stop_reason,
            "Page walk finished"
        );

        WalkOutcome {
            new_records,
            pages_visited,
            pages_failed,
            records_seen,
            stop_reason,
        }
    }

    /// Randomized delay between successfully processed pages. Bounds the
    /// request rate against the target; not a tunable optimization.
    async fn pace(&self) {
        let (min, max) = (self.config.page_delay_min_ms, self.config.page_delay_max_ms);
        if max == 0 {
            return;
        }
        let ms = if min >= max {
            max
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
