//! Paginated rule evaluation
//!
//! A library is read one page at a time and each page is handed to the
//! predicate engine. The cancellation token is checked once before every
//! page fetch, never in the middle of a page: a run cancelled during page N
//! finishes page N and stops before page N + 1.

use crate::clients::{
    ComparisonStatistic, LibraryItem, MediaServer, PageRequest, PredicateEngine,
};
use crate::core::error::{Result, SweepError};
use crate::core::progress::ProgressReporter;
use crate::db::models::{Collection, RuleGroup};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State owned by one rule group execution and dropped when it ends
pub struct RunContext {
    pub rule_group: RuleGroup,
    pub collection: Collection,
    pub token: CancellationToken,
    pub started: Instant,
}

impl RunContext {
    pub fn new(rule_group: RuleGroup, collection: Collection, token: CancellationToken) -> Self {
        Self {
            rule_group,
            collection,
            token,
            started: Instant::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn elapsed_ms(&self) -> i64 {
        i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Default)]
pub struct Evaluation {
    /// Items that satisfied the rule group, first occurrence of each id
    pub passing: Vec<LibraryItem>,
    pub stats: HashMap<String, ComparisonStatistic>,
    pub pages: usize,
    pub processed_items: usize,
    pub cancelled: bool,
}

impl Evaluation {
    fn absorb(&mut self, data: Vec<LibraryItem>, stats: Vec<ComparisonStatistic>, seen: &mut HashSet<String>) {
        for item in data {
            if seen.insert(item.id.clone()) {
                self.passing.push(item);
            }
        }
        for stat in stats {
            self.stats.insert(stat.item_id.clone(), stat);
        }
    }
}

pub struct RuleEvaluator {
    media_server: Arc<dyn MediaServer>,
    engine: Arc<dyn PredicateEngine>,
    progress: Arc<ProgressReporter>,
    page_size: usize,
}

impl RuleEvaluator {
    pub fn new(
        media_server: Arc<dyn MediaServer>,
        engine: Arc<dyn PredicateEngine>,
        progress: Arc<ProgressReporter>,
        page_size: usize,
    ) -> Self {
        Self {
            media_server,
            engine,
            progress,
            page_size: page_size.max(1),
        }
    }

    /// Page through the rule group's library
    ///
    /// A library that cannot be read at all evaluates to nothing. Losing it
    /// after the first page is an error.
    pub async fn evaluate(&self, ctx: &RunContext) -> Result<Evaluation> {
        let group = &ctx.rule_group;
        let rules = group.rules.len().max(1);
        let mut evaluation = Evaluation::default();
        let mut seen = HashSet::new();
        let mut offset = 0;

        loop {
            if ctx.is_cancelled() {
                info!(
                    rule_group_id = group.id,
                    pages = evaluation.pages,
                    "Evaluation cancelled"
                );
                evaluation.cancelled = true;
                break;
            }

            let request = PageRequest {
                offset,
                limit: self.page_size,
                media_type: group.data_type,
            };
            let Some(page) = self
                .media_server
                .get_library_contents(&group.library_id, request)
                .await
            else {
                if evaluation.pages > 0 {
                    // a partial read would make reconciliation drop every unread member
                    return Err(SweepError::MediaServerError(format!(
                        "library {} became unreachable at offset {}",
                        group.library_id, offset
                    )));
                }
                warn!(
                    rule_group_id = group.id,
                    library_id = %group.library_id,
                    "Library unreachable, treating contents as empty"
                );
                break;
            };

            if evaluation.pages == 0 {
                self.progress.set_total(page.total_size * rules);
            }
            if page.items.is_empty() {
                break;
            }

            let done = evaluation.processed_items;
            let progress = Arc::clone(&self.progress);
            let on_progress = move |n: usize| progress.set_processed((done + n) * rules);

            let result = match self
                .engine
                .evaluate(group, &page.items, &on_progress, &ctx.token)
                .await
            {
                Ok(result) => result,
                Err(e) if e.is_cancellation() => {
                    evaluation.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            evaluation.absorb(result.data, result.stats, &mut seen);
            evaluation.pages += 1;
            evaluation.processed_items += page.items.len();
            self.progress
                .set_processed(evaluation.processed_items * rules);

            debug!(
                rule_group_id = group.id,
                offset,
                page_items = page.items.len(),
                total_size = page.total_size,
                passing = evaluation.passing.len(),
                "Evaluated library page"
            );

            offset += self.page_size;
            if offset >= page.total_size {
                break;
            }
        }

        Ok(evaluation)
    }
}
