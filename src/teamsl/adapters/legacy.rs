//! Shared driver for the stateful `index.jsp` searches.
//!
//! One run walks `INIT -> SESSION_OPEN -> SEARCH_SUBMITTED -> PAGING -> DONE`:
//! warm-up GET, filter POST (which must carry the result summary), then page
//! GETs at `startrow = 0, 10, 20, ...` inside the same cookie jar until the
//! reported hit count is covered.

use crate::teamsl::PAGE_SIZE;
use crate::teamsl::adapters::AdapterKind;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::html::{self, TableSpec};
use crate::teamsl::models::Payload;
use crate::teamsl::raw::HtmlRow;
use crate::teamsl::session::{SearchSession, SessionManager, SessionState};
use crate::teamsl::transport::UpstreamRequest;
use http::header::{ORIGIN, REFERER};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Description of one legacy search: where it lives, what it submits and
/// which table it reads.
#[derive(Debug, Clone)]
pub struct LegacySearch {
    pub kind: AdapterKind,
    /// Path and query of the search page, e.g. `/index.jsp?Action=100&Verband=7`.
    pub page: String,
    /// Query appended to every page GET before `startrow`, e.g. `&sortierung=datum`.
    pub page_query: String,
    pub form: Vec<(String, String)>,
    pub table: TableSpec,
}

/// Unique rows assembled by one run, with the hit count upstream reported.
#[derive(Debug, Clone)]
pub struct PagedRows {
    pub rows: Vec<HtmlRow>,
    pub total_hits: u32,
    /// The page bound stopped the run before `total_hits` was covered.
    pub truncated: bool,
    /// A page repeated rows already assembled; paging stopped there.
    pub duplicates: bool,
}

impl PagedRows {
    /// Accept `payload` only if the run was complete, free of repeated rows
    /// and its row count matches the reported hits; otherwise hand it back as
    /// the partial result.
    pub fn finish(self, kind: AdapterKind, payload: Payload) -> Result<Payload, UpstreamError> {
        if self.truncated || self.duplicates || self.rows.len() != self.total_hits as usize {
            return Err(UpstreamError::PaginationInconsistency {
                adapter: kind,
                expected: self.total_hits,
                assembled: self.rows.len(),
                partial: Box::new(payload),
            });
        }
        Ok(payload)
    }
}

/// Lazily fetches result pages in strictly increasing `startrow` order.
///
/// Finite and not restartable: once `next_page` has returned `None` or an
/// error, every later call returns `None`.
pub struct PageCursor<'a> {
    session: &'a mut SearchSession,
    search: &'a LegacySearch,
    referer: &'a Url,
    total_hits: u32,
    max_pages: u32,
    pages_fetched: u32,
    exhausted: bool,
    truncated: bool,
}

impl<'a> PageCursor<'a> {
    fn new(
        session: &'a mut SearchSession,
        search: &'a LegacySearch,
        referer: &'a Url,
        total_hits: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            session,
            search,
            referer,
            total_hits,
            max_pages,
            pages_fetched: 0,
            exhausted: false,
            truncated: false,
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<HtmlRow>>, UpstreamError> {
        if self.exhausted {
            return Ok(None);
        }

        let startrow = self.session.startrow;
        if startrow >= self.total_hits {
            self.exhausted = true;
            return Ok(None);
        }
        if self.pages_fetched >= self.max_pages {
            warn!(
                adapter = %self.search.kind,
                startrow,
                total_hits = self.total_hits,
                max_pages = self.max_pages,
                "Page limit reached before all hits were fetched"
            );
            self.exhausted = true;
            self.truncated = true;
            return Ok(None);
        }

        // Any failure below ends the cursor.
        self.exhausted = true;

        let kind = self.search.kind;
        let path = format!("{}{}&startrow={startrow}", self.search.page, self.search.page_query);
        let url = self.session.upstream_url(&path)?;
        let request = UpstreamRequest::get(url).header(REFERER, self.referer.as_str());
        let response = self.session.send(request).await?;

        let rows = match html::parse_result_page(kind, &response.body, &self.search.table) {
            Ok(rows) => rows,
            Err(err) => {
                self.session.fail();
                return Err(err);
            }
        };

        self.pages_fetched += 1;
        self.session.startrow = startrow + PAGE_SIZE;
        self.session.transition(SessionState::Paging)?;
        debug!(
            session = %self.session.id,
            startrow,
            rows = rows.len(),
            "Fetched result page"
        );

        // An empty page before the hit count is reached means upstream ran dry.
        self.exhausted = rows.is_empty();
        Ok(Some(rows))
    }
}

/// Runs [`LegacySearch`]es, one fresh session per attempt.
#[derive(Clone)]
pub struct LegacyRunner {
    sessions: SessionManager,
    max_pages: u32,
}

impl LegacyRunner {
    pub fn new(sessions: SessionManager, max_pages: u32) -> Self {
        Self {
            sessions,
            max_pages,
        }
    }

    /// Run the search; a session rejected mid-run is retried once from scratch.
    pub async fn run(&self, search: &LegacySearch) -> Result<PagedRows, UpstreamError> {
        match self.run_once(search).await {
            Err(UpstreamError::SessionExpired { message, .. }) => {
                warn!(
                    adapter = %search.kind,
                    reason = %message,
                    "Search session expired, restarting with a fresh session"
                );
                self.run_once(search).await
            }
            other => other,
        }
    }

    async fn run_once(&self, search: &LegacySearch) -> Result<PagedRows, UpstreamError> {
        let start = Instant::now();
        let page_url = self.sessions.upstream().url(search.kind, &search.page)?;
        let mut session = self
            .sessions
            .open(search.kind, page_url.clone(), search.form.clone())
            .await?;

        let result = self.drive(&mut session, search, &page_url).await;
        if result.is_err() {
            session.fail();
        }
        self.sessions.close(session);

        if let Ok(paged) = &result {
            info!(
                adapter = %search.kind,
                rows = paged.rows.len(),
                total_hits = paged.total_hits,
                duration = crate::utils::fmt_duration(start.elapsed()),
                "Legacy search finished"
            );
        }
        result
    }

    async fn drive(
        &self,
        session: &mut SearchSession,
        search: &LegacySearch,
        page_url: &Url,
    ) -> Result<PagedRows, UpstreamError> {
        let origin = page_url.origin().ascii_serialization();
        let request = UpstreamRequest::post_form(page_url.clone(), search.form.clone())
            .header(REFERER, page_url.as_str())
            .header(ORIGIN, &origin);
        let response = session.send(request).await?;

        let summary = html::parse_search_summary(search.kind, &response.body)?;
        session.total_hits = Some(summary.total_hits);
        session.total_pages = Some(summary.total_pages);
        session.transition(SessionState::SearchSubmitted)?;
        debug!(
            session = %session.id,
            total_hits = summary.total_hits,
            total_pages = summary.total_pages,
            "Search submitted"
        );

        if summary.total_hits == 0 {
            session.transition(SessionState::Done)?;
            return Ok(PagedRows {
                rows: Vec::new(),
                total_hits: 0,
                truncated: false,
                duplicates: false,
            });
        }

        session.transition(SessionState::Paging)?;
        let mut cursor = PageCursor::new(
            session,
            search,
            page_url,
            summary.total_hits,
            self.max_pages,
        );
        let identity_key = search.table.identity_key;
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        let mut duplicates = false;
        while let Some(page) = cursor.next_page().await? {
            let page_rows = page.len();
            for row in page {
                match row.id(identity_key) {
                    Some(id) if !seen.insert(id) => duplicates = true,
                    _ => rows.push(row),
                }
            }
            if duplicates {
                warn!(
                    adapter = %search.kind,
                    page = cursor.pages_fetched(),
                    page_rows,
                    assembled = rows.len(),
                    identity_key,
                    "Result page repeats rows already seen, stopping"
                );
                break;
            }
        }
        let truncated = cursor.truncated();
        debug!(
            adapter = %search.kind,
            pages = cursor.pages_fetched(),
            rows = rows.len(),
            "Paging finished"
        );

        if truncated || duplicates {
            session.fail();
        } else {
            session.transition(SessionState::Done)?;
        }

        Ok(PagedRows {
            rows,
            total_hits: summary.total_hits,
            truncated,
            duplicates,
        })
    }
}
