//! Cookie-backed search sessions for the legacy `index.jsp` pages.
//!
//! Each pagination run opens its own [`SearchSession`] with a private cookie
//! jar. The jar is never shared with other runs and is dropped when the
//! session is closed.

use crate::teamsl::adapters::AdapterKind;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::transport::{Upstream, UpstreamRequest, UpstreamResponse};
use http::header::{COOKIE, SET_COOKIE};
use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use ulid::Ulid;
use url::Url;

/// Lifecycle of one legacy search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    SessionOpen,
    SearchSubmitted,
    Paging,
    Done,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Legal edges of the state machine. `Error` is reachable from any
    /// non-terminal state; nothing leaves a terminal state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Init, SessionOpen) => true,
            (SessionOpen, SearchSubmitted) => true,
            (SearchSubmitted, Paging | Done) => true,
            (Paging, Paging | Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::SessionOpen => "session-open",
            Self::SearchSubmitted => "search-submitted",
            Self::Paging => "paging",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Pages telling the user their session is gone come back as HTTP 200.
static EXPIRED_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sitzung\s+(?:ist\s+)?abgelaufen|session\s+(?:has\s+)?expired").unwrap()
});

pub fn is_expired_page(body: &str) -> bool {
    EXPIRED_MARKER.is_match(body)
}

/// Number of cookies with a non-empty value in a `Cookie` header value.
pub fn cookie_count(header: &str) -> usize {
    cookie::Cookie::split_parse(header)
        .filter_map(Result::ok)
        .filter(|c| !c.value().is_empty())
        .count()
}

pub struct SearchSession {
    pub id: Ulid,
    pub adapter: AdapterKind,
    /// Form fields of the originating search, kept for diagnostics.
    pub filters: Vec<(String, String)>,
    /// Offset of the next page to request.
    pub startrow: u32,
    pub total_hits: Option<u32>,
    pub total_pages: Option<u32>,
    state: SessionState,
    jar: Arc<Jar>,
    upstream: Upstream,
}

impl fmt::Debug for SearchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchSession")
            .field("id", &self.id)
            .field("adapter", &self.adapter)
            .field("state", &self.state)
            .field("startrow", &self.startrow)
            .field("total_hits", &self.total_hits)
            .field("total_pages", &self.total_pages)
            .finish_non_exhaustive()
    }
}

impl SearchSession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`, rejecting edges the state machine does not allow.
    pub fn transition(&mut self, next: SessionState) -> Result<(), UpstreamError> {
        if !self.state.can_transition_to(next) {
            return Err(UpstreamError::format(
                self.adapter,
                format!("illegal session transition {} -> {next}", self.state),
            ));
        }
        debug!(session = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Mark the session failed. A no-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Error;
        }
    }

    /// Send a request inside this session: attach the jar's cookies, store any
    /// `Set-Cookie` answers, and treat an expiry page as [`UpstreamError::SessionExpired`].
    pub async fn send(
        &mut self,
        mut request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = request.url.clone();
        if let Some(cookies) = self.jar.cookies(&url) {
            request.headers.insert(COOKIE, cookies);
        }

        let response = match self.upstream.execute(self.adapter, request).await {
            Ok(response) => response,
            Err(err) => {
                self.fail();
                return Err(err);
            }
        };

        let mut set_cookies = response.headers.get_all(SET_COOKIE).iter();
        self.jar.set_cookies(&mut set_cookies, &url);

        if is_expired_page(&response.body) {
            self.fail();
            return Err(UpstreamError::session_expired(
                self.adapter,
                "upstream reported the search session as expired",
            ));
        }

        Ok(response)
    }

    /// Resolve `path` against the upstream base URL.
    pub fn upstream_url(&self, path: &str) -> Result<Url, UpstreamError> {
        self.upstream.url(self.adapter, path)
    }

    /// Whether the jar holds any cookie for `url`.
    pub fn has_cookie_for(&self, url: &Url) -> bool {
        self.jar
            .cookies(url)
            .and_then(|v| v.to_str().ok().map(cookie_count))
            .is_some_and(|n| n > 0)
    }
}

/// Opens and closes [`SearchSession`]s against the legacy pages.
#[derive(Clone)]
pub struct SessionManager {
    upstream: Upstream,
}

impl SessionManager {
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Warm-up GET on `warmup`; the upstream must mint a session cookie.
    pub async fn open(
        &self,
        adapter: AdapterKind,
        warmup: Url,
        filters: Vec<(String, String)>,
    ) -> Result<SearchSession, UpstreamError> {
        let mut session = SearchSession {
            id: Ulid::new(),
            adapter,
            filters,
            startrow: 0,
            total_hits: None,
            total_pages: None,
            state: SessionState::Init,
            jar: Arc::new(Jar::default()),
            upstream: self.upstream.clone(),
        };

        session.send(UpstreamRequest::get(warmup.clone())).await?;

        if !session.has_cookie_for(&warmup) {
            session.fail();
            warn!(session = %session.id, %adapter, "Warm-up did not mint a session cookie");
            return Err(UpstreamError::session_expired(
                adapter,
                "warm-up request did not establish a session cookie",
            ));
        }

        session.transition(SessionState::SessionOpen)?;
        debug!(session = %session.id, %adapter, "Search session opened");
        Ok(session)
    }

    /// Drop the session and its cookie jar.
    pub fn close(&self, session: SearchSession) {
        if session.state == SessionState::Done {
            debug!(
                session = %session.id,
                adapter = %session.adapter,
                total_hits = session.total_hits,
                "Search session closed"
            );
        } else {
            info!(
                session = %session.id,
                adapter = %session.adapter,
                state = %session.state,
                startrow = session.startrow,
                filters = ?session.filters,
                "Search session closed before completion"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [Init, SessionOpen, SearchSubmitted, Paging, Paging, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(SearchSubmitted.can_transition_to(Done));
    }

    #[test]
    fn test_error_reachable_from_non_terminal_only() {
        for state in [Init, SessionOpen, SearchSubmitted, Paging] {
            assert!(state.can_transition_to(Error));
        }
        assert!(!Done.can_transition_to(Error));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        assert!(!Init.can_transition_to(Paging));
        assert!(!SessionOpen.can_transition_to(Paging));
        assert!(!Done.can_transition_to(Paging));
        assert!(!Error.can_transition_to(SessionOpen));
    }

    #[test]
    fn test_expired_page_marker() {
        assert!(is_expired_page("<p>Ihre Sitzung ist abgelaufen.</p>"));
        assert!(is_expired_page("Your session has expired"));
        assert!(!is_expired_page("<p>Seite 1 / 3 (23 Treffer)</p>"));
    }

    #[test]
    fn test_cookie_count() {
        assert_eq!(cookie_count("JSESSIONID=abc123; SERVERID=web2"), 2);
        assert_eq!(cookie_count("JSESSIONID="), 0);
        assert_eq!(cookie_count(""), 0);
    }
}
