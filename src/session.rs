//! The session façade.
//!
//! A [`Session`] is CLOSED until [`Session::open`] succeeds and CLOSED
//! again after [`Session::close`]. While open it owns the authenticated
//! backend and the session-wide [`LazyRetriever`], so every issue it hands
//! out shares user, project and version instances with every other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::auth::CredentialProvider;
use crate::backend::{registry, Backend};
use crate::batch::{Batch, ItemFailure};
use crate::config::Config;
use crate::criteria::SearchCriteria;
use crate::error::{Result, TrackerError};
use crate::model::{Issue, User};
use crate::resolver::{Assembler, LazyRetriever};
use crate::version::is_compatible_version;
use crate::wire::{RawAttachment, RawComment, RawIssue};

/// Builds an unauthenticated backend for a configuration.
pub type Connector = Arc<dyn Fn(&Config) -> Result<Backend> + Send + Sync>;

/// State held while the session is open.
struct OpenSession {
    backend: Backend,
    assembler: Assembler,
    current_user: Arc<User>,
    shutdown: Arc<AtomicBool>,
}

enum State {
    Closed,
    Open(OpenSession),
}

/// A connection to one tracker.
pub struct Session {
    config: Config,
    credentials: Arc<dyn CredentialProvider>,
    connector: Option<Connector>,
    state: State,
}

impl Session {
    /// Create a closed session. The backend is picked from the registry by
    /// the configured kind when the session opens.
    pub fn new(config: Config, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            credentials,
            connector: None,
            state: State::Closed,
        }
    }

    /// Create a closed session that builds its backend with `connector`
    /// instead of the registry.
    pub fn with_connector(
        config: Config,
        credentials: Arc<dyn CredentialProvider>,
        connector: Connector,
    ) -> Self {
        Self {
            connector: Some(connector),
            ..Self::new(config, credentials)
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    fn open_state(&self) -> Result<&OpenSession> {
        match &self.state {
            State::Open(open) => Ok(open),
            State::Closed => Err(TrackerError::IllegalState(
                "session is not open".to_string(),
            )),
        }
    }

    /// Connect and authenticate.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if the session is already open
    /// - `Configuration` for an invalid configuration, an unknown backend
    ///   kind or missing credentials
    /// - `Backend` if the tracker rejects the credentials
    /// - `Transport` if the tracker cannot be reached
    ///
    /// On error the session stays closed.
    #[instrument(skip(self), fields(backend = %self.config.backend.kind, url = %self.config.backend.url))]
    pub async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(TrackerError::IllegalState(
                "session is already open".to_string(),
            ));
        }

        self.config.validate()?;
        let connect: Connector = match &self.connector {
            Some(connector) => connector.clone(),
            None => {
                let kind = &self.config.backend.kind;
                let factory = registry::lookup(kind).ok_or_else(|| {
                    TrackerError::Configuration(format!(
                        "unknown backend kind '{}' (known: {})",
                        kind,
                        registry::kinds().join(", ")
                    ))
                })?;
                Arc::new(factory)
            }
        };

        let credentials = self.credentials.credentials(&self.config.backend)?;
        let backend = connect(&self.config)?;

        let raw_user = backend.users.login(&credentials).await?;
        check_server_version(&backend).await;

        let retriever = LazyRetriever::new(backend.clone());
        let current_user = retriever.seed_user(raw_user);
        let assembler = Assembler::new(retriever, self.config.connection.batch_policy);

        info!(user = %current_user.name, "Session opened");
        self.state = State::Open(OpenSession {
            backend,
            assembler,
            current_user,
            shutdown: Arc::new(AtomicBool::new(false)),
        });
        Ok(())
    }

    /// The authenticated user.
    pub fn current_user(&self) -> Result<Arc<User>> {
        Ok(self.open_state()?.current_user.clone())
    }

    /// The session's retriever, for resolving references directly.
    pub fn retriever(&self) -> Result<LazyRetriever> {
        Ok(self.open_state()?.assembler.retriever().clone())
    }

    /// Stream every issue matching `criteria`.
    ///
    /// Issues are fetched a page at a time as the stream is consumed. An
    /// issue that cannot be built is yielded as an error and the stream goes
    /// on. If the session is closed mid-iteration, the stream yields one
    /// `IllegalState` error and ends.
    pub fn search_bugs(&self, criteria: &SearchCriteria) -> BoxStream<'static, Result<Issue>> {
        let open = match self.open_state() {
            Ok(open) => open,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        let cursor = SearchCursor {
            backend: open.backend.clone(),
            assembler: open.assembler.clone(),
            criteria: criteria.clone(),
            page_size: self.config.connection.page_size,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            shutdown: open.shutdown.clone(),
        };

        stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(item) = cursor.buffer.pop_front() {
                    return Some((item, cursor));
                }
                if cursor.exhausted {
                    return None;
                }
                if cursor.shutdown.load(Ordering::Acquire) {
                    cursor.exhausted = true;
                    let closed = TrackerError::IllegalState("session closed during search".to_string());
                    return Some((Err(closed), cursor));
                }
                cursor.fetch_page().await;
            }
        })
        .boxed()
    }

    /// Fetch one issue by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the tracker has no such issue.
    #[instrument(skip(self))]
    pub async fn get_issue(&self, id: &str) -> Result<Issue> {
        let open = self.open_state()?;
        let Batch { items, failures } = open.backend.bugs.get_bugs(&[id.to_string()]).await?;

        let Some(raw) = items.into_iter().next() else {
            return Err(match failures.into_iter().next() {
                Some(failure) => failure.error,
                None => TrackerError::NotFound(format!("issue {}", id)),
            });
        };

        assemble_page(&open.backend, &open.assembler, vec![raw])
            .await
            .pop()
            .unwrap_or_else(|| Err(TrackerError::NotFound(format!("issue {}", id))))
    }

    /// Download an attachment's content by attachment id or URL.
    ///
    /// Content is not cached.
    #[instrument(skip(self))]
    pub async fn get_attachment_content(&self, id_or_url: &str) -> Result<Vec<u8>> {
        let open = self.open_state()?;
        let content = open.backend.bugs.get_attachment_content(id_or_url).await?;
        debug!(bytes = content.len(), "Downloaded attachment");
        Ok(content)
    }

    /// Log out and release the session.
    ///
    /// Searches still being consumed stop before their next request. A
    /// failed logout is logged and otherwise ignored. Closing a closed
    /// session does nothing.
    #[instrument(skip(self))]
    pub async fn close(&mut self) -> Result<()> {
        let open = match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => return Ok(()),
            State::Open(open) => open,
        };

        open.shutdown.store(true, Ordering::Release);
        if let Err(e) = open.backend.users.logout().await {
            warn!(error = %e, "Logout failed");
        }

        let retriever = open.assembler.retriever();
        debug!(stats = ?retriever.stats(), "Retriever statistics");
        retriever.clear();

        info!("Session closed");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.config.backend.kind)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Warn if the server's version is outside the range the backend supports.
async fn check_server_version(backend: &Backend) {
    let (min, max) = backend.kind.supported_versions();
    match backend.metadata.server_version().await {
        Ok(version) if is_compatible_version(min, max, &version) => {
            debug!(%version, "Server version supported");
        }
        Ok(version) => {
            warn!(%version, min, max, "Server version outside the supported range");
        }
        Err(e) => {
            warn!(error = %e, "Could not determine server version");
        }
    }
}

/// Paging state of one search.
struct SearchCursor {
    backend: Backend,
    assembler: Assembler,
    criteria: SearchCriteria,
    page_size: u32,
    offset: u64,
    buffer: VecDeque<Result<Issue>>,
    exhausted: bool,
    shutdown: Arc<AtomicBool>,
}

impl SearchCursor {
    /// Fetch the next page into the buffer.
    async fn fetch_page(&mut self) {
        debug!(offset = self.offset, page_size = self.page_size, "Fetching search page");
        let page = match self
            .backend
            .bugs
            .search(&self.criteria, self.offset, self.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.exhausted = true;
                self.buffer.push_back(Err(e));
                return;
            }
        };

        let seen = page.issues.len() as u64;
        self.offset += seen;
        // Backends may cap a page below the requested size; trust `total`
        // when they report one.
        self.exhausted = match page.total {
            Some(total) => seen == 0 || self.offset >= total,
            None => seen < u64::from(self.page_size),
        };

        let Batch { items, failures } = page.issues;
        for failure in failures {
            warn!(failure = %failure, "Search result could not be read");
            self.buffer.push_back(Err(failure.error));
        }
        self.buffer
            .extend(assemble_page(&self.backend, &self.assembler, items).await);
    }
}

/// Fetch the comments and attachments of a page of issues and build them.
///
/// Results are in the order of `raws`.
async fn assemble_page(
    backend: &Backend,
    assembler: &Assembler,
    raws: Vec<RawIssue>,
) -> Vec<Result<Issue>> {
    if raws.is_empty() {
        return Vec::new();
    }
    let ids: Vec<String> = raws.iter().map(|r| r.id.clone()).collect();
    let (comments, attachments) = futures::join!(
        backend.bugs.get_comments(&ids),
        backend.bugs.get_attachments(&ids)
    );

    let mut comments = group_by_issue(&ids, "comments", comments, |c: &RawComment| &c.issue_id);
    let mut attachments =
        group_by_issue(&ids, "attachments", attachments, |a: &RawAttachment| &a.issue_id);

    let built = raws.into_iter().map(|raw| {
        let comments = comments.remove(&raw.id).unwrap_or_default();
        let attachments = attachments.remove(&raw.id).unwrap_or_default();
        assembler.issue(raw, comments, attachments)
    });
    futures::future::join_all(built).await
}

/// Split a page-wide batch into one batch per issue.
///
/// A failed page-wide call becomes a failure of every issue on the page.
/// Failures that name no issue are logged and dropped.
fn group_by_issue<T, F>(
    ids: &[String],
    kind: &'static str,
    outcome: Result<Batch<T>>,
    issue_of: F,
) -> HashMap<String, Batch<T>>
where
    F: Fn(&T) -> &String,
{
    let mut grouped: HashMap<String, Batch<T>> = ids
        .iter()
        .map(|id| (id.clone(), Batch::new()))
        .collect();

    let batch = match outcome {
        Ok(batch) => batch,
        Err(error) => {
            warn!(error = %error, kind, "Request for the page failed");
            for (id, batch) in grouped.iter_mut() {
                batch
                    .failures
                    .push(ItemFailure::new(kind, None, error.clone()).in_issue(id.as_str()));
            }
            return grouped;
        }
    };

    for item in batch.items {
        if let Some(slot) = grouped.get_mut(issue_of(&item)) {
            slot.items.push(item);
        }
    }
    for failure in batch.failures {
        match failure.issue_id.as_ref().and_then(|id| grouped.get_mut(id)) {
            Some(slot) => slot.failures.push(failure),
            None => warn!(failure = %failure, "Dropping failure of unknown issue"),
        }
    }
    grouped
}
