//! Backend client family.
//!
//! A backend is a set of clients, one per entity family, that all speak to
//! the same tracker over one authenticated HTTP session. Every call returns
//! an [`AsyncResult`] immediately; the request runs in the background.
//!
//! Two implementations exist: [`bugzilla`] (JSON-RPC) and [`jira`] (REST).
//! They are selected by name through the [`registry`].

pub mod async_result;
pub mod bugzilla;
pub mod jira;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use reqwest::Client;
use tracing::warn;

use crate::auth::Credentials;
use crate::batch::Batch;
use crate::config::ConnectionSettings;
use crate::criteria::SearchCriteria;
use crate::error::{Result, TrackerError};
use crate::model::{BugzillaVocabulary, EntityRef, JiraVocabulary, Vocabulary};
use crate::wire::{RawAttachment, RawClassification, RawComment, RawIssue, RawProject, RawUser, SearchPage};

pub use async_result::AsyncResult;

/// Session handshake and user lookups.
pub trait UserClient: Send + Sync {
    /// Authenticate and return the logged-in user.
    fn login(&self, credentials: &Credentials) -> AsyncResult<RawUser>;

    /// End the server-side session.
    fn logout(&self) -> AsyncResult<()>;

    /// Look users up by id or login name.
    fn get_users(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawUser>>;
}

/// Classification (project category) lookups.
pub trait ClassificationClient: Send + Sync {
    fn get_classifications(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawClassification>>;
}

/// Product (project) lookups, including components and versions.
pub trait ProductClient: Send + Sync {
    fn get_products(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawProject>>;
}

/// Issue search and the data hanging off issues.
pub trait BugClient: Send + Sync {
    /// Fetch one page of issues matching `criteria`.
    fn search(&self, criteria: &SearchCriteria, offset: u64, limit: u32) -> AsyncResult<SearchPage>;

    /// Fetch issues by id.
    fn get_bugs(&self, ids: &[String]) -> AsyncResult<Batch<RawIssue>>;

    /// Fetch the comments of the given issues.
    fn get_comments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawComment>>;

    /// Fetch attachment metadata of the given issues.
    fn get_attachments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawAttachment>>;

    /// Download an attachment's content, by attachment id or URL.
    fn get_attachment_content(&self, id_or_url: &str) -> AsyncResult<Vec<u8>>;
}

/// Server metadata.
pub trait MetadataClient: Send + Sync {
    /// The server's version string.
    fn server_version(&self) -> AsyncResult<String>;
}

/// The supported tracker families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Bugzilla,
    Jira,
}

impl BackendKind {
    /// Registry name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bugzilla => "bugzilla",
            Self::Jira => "jira",
        }
    }

    /// Oldest and newest server versions known to work.
    pub fn supported_versions(&self) -> (&'static str, &'static str) {
        match self {
            Self::Bugzilla => ("3.6", "5.2"),
            Self::Jira => ("6.0", "9.17"),
        }
    }

    /// Vocabulary used to interpret this kind's status and priority names.
    pub fn vocabulary(&self) -> Arc<dyn Vocabulary> {
        match self {
            Self::Bugzilla => Arc::new(BugzillaVocabulary),
            Self::Jira => Arc::new(JiraVocabulary),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A connected client family.
///
/// Cloning is cheap; clones share the underlying clients and HTTP session.
#[derive(Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub users: Arc<dyn UserClient>,
    pub classifications: Arc<dyn ClassificationClient>,
    pub products: Arc<dyn ProductClient>,
    pub bugs: Arc<dyn BugClient>,
    pub metadata: Arc<dyn MetadataClient>,
    pub vocabulary: Arc<dyn Vocabulary>,
}

impl Backend {
    /// Build a backend whose clients are all served by `client`.
    pub fn from_client<C>(kind: BackendKind, client: C) -> Self
    where
        C: UserClient + ClassificationClient + ProductClient + BugClient + MetadataClient + 'static,
    {
        let client = Arc::new(client);
        Self {
            kind,
            users: client.clone(),
            classifications: client.clone(),
            products: client.clone(),
            bugs: client.clone(),
            metadata: client,
            vocabulary: kind.vocabulary(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind)
            .field("vocabulary", &self.vocabulary)
            .finish_non_exhaustive()
    }
}

/// Build the session-scoped HTTP client.
///
/// Timeouts and proxy come from `settings`. Requests are not retried.
pub(crate) fn build_http_client(settings: &ConnectionSettings) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(settings.connect_timeout())
        .timeout(settings.request_timeout())
        .user_agent(concat!("trackbridge/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy) = &settings.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| TrackerError::Configuration(format!("invalid proxy '{}': {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| TrackerError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Normalize the base URL by removing trailing slashes.
pub(crate) fn normalize_base_url(url: &str) -> String {
    let url = url.trim_end_matches('/');

    // Warn if not HTTPS (but don't enforce for localhost/testing)
    if !url.starts_with("https://") && !url.contains("localhost") {
        warn!("URL does not use HTTPS: {}. This is insecure for production use.", url);
    }

    url.to_string()
}

/// The field a criteria parameter applies to.
///
/// Parameters loaded from a configuration tree may be grouped under a field
/// (`status/open`, `status/closed`); the first path segment names the field.
pub(crate) fn criteria_field(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Criteria values grouped by field, in first-seen order.
pub(crate) fn criteria_fields(criteria: &SearchCriteria) -> Vec<(&str, Vec<&str>)> {
    let mut fields: Vec<(&str, Vec<&str>)> = Vec::new();
    for (name, values) in criteria.iter() {
        let field = criteria_field(name);
        let index = match fields.iter().position(|(f, _)| *f == field) {
            Some(index) => index,
            None => {
                fields.push((field, Vec::new()));
                fields.len() - 1
            }
        };
        fields[index].1.extend(values.iter().map(String::as_str));
    }
    fields
}

/// Split references into ids and names.
pub(crate) fn split_refs(refs: &[EntityRef]) -> (Vec<String>, Vec<String>) {
    let mut ids = Vec::new();
    let mut names = Vec::new();
    for r in refs {
        match r {
            EntityRef::Id(id) => ids.push(id.clone()),
            EntityRef::Name(name) => names.push(name.clone()),
        }
    }
    (ids, names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_removes_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://bugzilla.example.org/"),
            "https://bugzilla.example.org"
        );
    }

    #[test]
    fn test_normalize_base_url_preserves_path() {
        assert_eq!(
            normalize_base_url("https://example.org/jira///"),
            "https://example.org/jira"
        );
    }

    #[test]
    fn test_build_http_client_rejects_bad_proxy() {
        let settings = ConnectionSettings {
            proxy: Some("not a proxy url".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_http_client(&settings),
            Err(TrackerError::Configuration(_))
        ));
    }

    #[test]
    fn test_build_http_client_defaults() {
        assert!(build_http_client(&ConnectionSettings::default()).is_ok());
    }

    #[test]
    fn test_criteria_fields_merge_groups() {
        let mut criteria = SearchCriteria::new();
        criteria
            .add("status/open", "NEW")
            .add("product", "Widgets")
            .add("status/closed", "RESOLVED");

        let fields = criteria_fields(&criteria);
        assert_eq!(
            fields,
            vec![("status", vec!["NEW", "RESOLVED"]), ("product", vec!["Widgets"])]
        );
    }

    #[test]
    fn test_split_refs() {
        let (ids, names) = split_refs(&[EntityRef::id("1"), EntityRef::name("bob"), EntityRef::id("2")]);
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(names, vec!["bob"]);
    }

    #[test]
    fn test_supported_versions_are_ordered() {
        for kind in [BackendKind::Bugzilla, BackendKind::Jira] {
            let (min, max) = kind.supported_versions();
            assert!(crate::version::is_compatible_version(min, max, min));
            assert!(crate::version::is_compatible_version(min, max, max));
        }
    }
}
