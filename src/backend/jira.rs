//! Jira client over the REST API.
//!
//! Authentication is a cookie session: `POST /rest/auth/1/session` returns
//! a session cookie that is sent with every later request. Endpoints that
//! take a single entity are called once per requested id, concurrently.

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::{
    build_http_client, criteria_fields, normalize_base_url, AsyncResult, Backend, BackendKind,
    BugClient, ClassificationClient, MetadataClient, ProductClient, UserClient,
};
use crate::auth::Credentials;
use crate::batch::Batch;
use crate::config::Config;
use crate::criteria::{SearchCriteria, QUERY_PARAMETER};
use crate::error::{Result, TrackerError};
use crate::model::EntityRef;
use crate::wire::jira::SessionCookie;
use crate::wire::{self, RawAttachment, RawClassification, RawComment, RawIssue, RawProject, RawUser, SearchPage};

/// Session handshake endpoint.
const SESSION_PATH: &str = "/rest/auth/1/session";

/// Prefix of the issue and metadata endpoints.
const API_PATH: &str = "/rest/api/2";

/// Build an unauthenticated Jira backend.
pub fn connect(config: &Config) -> Result<Backend> {
    let client = JiraClient::new(build_http_client(&config.connection)?, &config.backend.url);
    info!(base_url = %client.rest.base_url, "Jira backend created");
    Ok(Backend::from_client(BackendKind::Jira, client))
}

/// The REST transport shared by every call.
#[derive(Debug)]
struct Rest {
    http: Client,
    base_url: String,
    session: RwLock<Option<SessionCookie>>,
}

impl Rest {
    fn set_session(&self, session: Option<SessionCookie>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PATH, path)
    }

    /// Add the session cookie and send.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let cookie = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(SessionCookie::header_value);
        let request = match cookie {
            Some(cookie) => request.header(header::COOKIE, cookie),
            None => request,
        };

        let response = request.header(header::ACCEPT, "application/json").send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let error_body = response.text().await.unwrap_or_default();
        debug!("Error response body: {}", error_body);
        Err(error_from_response(status, &url, &error_body))
    }

    /// GET an API path and return the JSON body.
    #[instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Value> {
        let response = self.send(self.http.get(self.api_url(path))).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn get_owned(&self, path: String) -> Result<Value> {
        self.get(&path).await
    }

    /// GET an absolute URL and return the raw body.
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(self.http.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Create an appropriate error from a failed HTTP response.
///
/// Jira error envelopes keep the HTTP status as their code; 404 maps to
/// [`TrackerError::NotFound`] regardless of the body.
fn error_from_response(status: reqwest::StatusCode, url: &str, body: &str) -> TrackerError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(wire::jira::error_message);

    match message {
        Some(message) if status == reqwest::StatusCode::NOT_FOUND => TrackerError::NotFound(message),
        Some(message) => TrackerError::backend(status.as_u16().to_string(), message),
        None => TrackerError::from_status(status, url),
    }
}

/// Jira client. One instance serves every client trait.
#[derive(Debug, Clone)]
pub struct JiraClient {
    rest: Arc<Rest>,
}

impl JiraClient {
    /// Create a client for the Jira instance at `base_url`.
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            rest: Arc::new(Rest {
                http,
                base_url: normalize_base_url(base_url),
                session: RwLock::new(None),
            }),
        }
    }

    /// GET `path` in the background and parse the response.
    fn spawn_get<T, F>(&self, path: String, parse: F) -> AsyncResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&Value) -> Result<T> + Send + 'static,
    {
        let rest = self.rest.clone();
        AsyncResult::spawn(async move { parse(&rest.get(&path).await?) })
    }

    /// GET one path per id concurrently and gather the outcomes.
    ///
    /// A failed request becomes a failure of kind `kind` for its id.
    fn spawn_per_id<T, F>(
        &self,
        ids: Vec<String>,
        kind: &'static str,
        path: fn(&str) -> String,
        parse: F,
    ) -> AsyncResult<Batch<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Value, &str) -> Result<Batch<T>> + Send + Sync + 'static,
    {
        let rest = self.rest.clone();
        AsyncResult::spawn(async move {
            let responses = join_all(ids.iter().map(|id| rest.get_owned(path(id)))).await;

            let mut batch = Batch::new();
            for (id, response) in ids.iter().zip(responses) {
                match response.and_then(|payload| parse(&payload, id)) {
                    Ok(items) => batch.extend(items),
                    Err(e) => batch.push_in(id, kind, Some(id.clone()), Err(e)),
                }
            }
            Ok(batch)
        })
    }
}

/// Quote a value for JQL.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Build a JQL query from criteria.
///
/// The `query` parameter is taken as JQL as-is. Every other field becomes
/// `field in ("v1", "v2")`. Clauses are joined with `AND`.
pub(crate) fn jql_from_criteria(criteria: &SearchCriteria) -> String {
    let mut clauses: Vec<String> = Vec::new();
    let mut raw_queries = 0;

    for (field, values) in criteria_fields(criteria) {
        if field == QUERY_PARAMETER {
            raw_queries += values.len();
            clauses.extend(values.iter().map(|q| q.to_string()));
        } else {
            let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
            clauses.push(format!("{} in ({})", field, quoted.join(", ")));
        }
    }

    if clauses.len() == 1 || raw_queries == 0 {
        return clauses.join(" AND ");
    }
    clauses
        .iter()
        .map(|c| format!("({})", c))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// User lookup path for a reference.
fn user_path(r: &EntityRef) -> String {
    match r {
        EntityRef::Id(id) => format!("/user?key={}", urlencoding::encode(id)),
        EntityRef::Name(name) => format!("/user?username={}", urlencoding::encode(name)),
    }
}

fn is_url(id_or_url: &str) -> bool {
    id_or_url.starts_with("http://") || id_or_url.starts_with("https://")
}

impl UserClient for JiraClient {
    #[instrument(skip(self, credentials), fields(user = %credentials.username()))]
    fn login(&self, credentials: &Credentials) -> AsyncResult<RawUser> {
        let rest = self.rest.clone();
        let body = json!({
            "username": credentials.username(),
            "password": credentials.secret(),
        });
        AsyncResult::spawn(async move {
            let url = format!("{}{}", rest.base_url, SESSION_PATH);
            let response = rest.send(rest.http.post(url).json(&body)).await?;
            let session = wire::jira::parse_session(&response.json::<Value>().await?)?;
            rest.set_session(Some(session));
            debug!("Session established");

            wire::jira::parse_user(&rest.get("/myself").await?)
        })
    }

    fn logout(&self) -> AsyncResult<()> {
        let rest = self.rest.clone();
        AsyncResult::spawn(async move {
            let url = format!("{}{}", rest.base_url, SESSION_PATH);
            let outcome = rest.send(rest.http.delete(url)).await.map(|_| ());
            rest.set_session(None);
            outcome
        })
    }

    fn get_users(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawUser>> {
        let rest = self.rest.clone();
        let refs = refs.to_vec();
        AsyncResult::spawn(async move {
            let responses = join_all(refs.iter().map(|r| rest.get_owned(user_path(r)))).await;

            let mut batch = Batch::new();
            for (r, response) in refs.iter().zip(responses) {
                match response.and_then(|payload| wire::jira::parse_users(&payload)) {
                    Ok(users) => batch.extend(users),
                    Err(e) => batch.push("user", Some(r.value().to_string()), Err(e)),
                }
            }
            Ok(batch)
        })
    }
}

impl ClassificationClient for JiraClient {
    fn get_classifications(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawClassification>> {
        let refs = refs.to_vec();
        self.spawn_get("/projectCategory".to_string(), move |payload| {
            let all = wire::jira::parse_classifications(payload)?;
            let mut batch = Batch::new();
            batch.failures = all.failures;
            for r in &refs {
                let found = all.items.iter().find(|c| match r {
                    EntityRef::Id(id) => &c.id == id,
                    EntityRef::Name(name) => &c.name == name,
                });
                match found {
                    Some(c) => batch.items.push(c.clone()),
                    None => batch.push(
                        "classification",
                        Some(r.value().to_string()),
                        Err(TrackerError::NotFound(format!("project category {}", r))),
                    ),
                }
            }
            Ok(batch)
        })
    }
}

impl ProductClient for JiraClient {
    fn get_products(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawProject>> {
        let keys = refs.iter().map(|r| r.value().to_string()).collect();
        self.spawn_per_id(
            keys,
            "project",
            |key| format!("/project/{}", urlencoding::encode(key)),
            |payload, _| {
                let mut batch = Batch::new();
                batch.push("project", None, wire::jira::parse_project(payload));
                Ok(batch)
            },
        )
    }
}

impl BugClient for JiraClient {
    #[instrument(skip(self, criteria))]
    fn search(&self, criteria: &SearchCriteria, offset: u64, limit: u32) -> AsyncResult<SearchPage> {
        let jql = jql_from_criteria(criteria);
        debug!(jql = %jql, "Searching issues");
        let path = format!(
            "/search?jql={}&startAt={}&maxResults={}",
            urlencoding::encode(&jql),
            offset,
            limit
        );
        self.spawn_get(path, wire::jira::parse_search)
    }

    fn get_bugs(&self, ids: &[String]) -> AsyncResult<Batch<RawIssue>> {
        self.spawn_per_id(
            ids.to_vec(),
            "bug",
            |id| format!("/issue/{}", urlencoding::encode(id)),
            |payload, _| {
                let mut batch = Batch::new();
                batch.push("bug", None, wire::jira::parse_issue(payload));
                Ok(batch)
            },
        )
    }

    fn get_comments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawComment>> {
        self.spawn_per_id(
            issue_ids.to_vec(),
            "comments",
            |id| format!("/issue/{}/comment", urlencoding::encode(id)),
            wire::jira::parse_comments,
        )
    }

    fn get_attachments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawAttachment>> {
        self.spawn_per_id(
            issue_ids.to_vec(),
            "attachments",
            |id| format!("/issue/{}?fields=attachment", urlencoding::encode(id)),
            |payload, _| wire::jira::parse_issue_attachments(payload),
        )
    }

    #[instrument(skip(self))]
    fn get_attachment_content(&self, id_or_url: &str) -> AsyncResult<Vec<u8>> {
        let rest = self.rest.clone();
        let target = id_or_url.to_string();
        AsyncResult::spawn(async move {
            let url = if is_url(&target) {
                target
            } else {
                let path = format!("/attachment/{}", urlencoding::encode(&target));
                wire::jira::parse_attachment_url(&rest.get(&path).await?)?
            };
            rest.download(&url).await
        })
    }
}

impl MetadataClient for JiraClient {
    fn server_version(&self) -> AsyncResult<String> {
        self.spawn_get("/serverInfo".to_string(), wire::jira::parse_server_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_api_url() {
        let client = JiraClient::new(Client::new(), "https://jira.example.org/");
        assert_eq!(
            client.rest.api_url("/serverInfo"),
            "https://jira.example.org/rest/api/2/serverInfo"
        );
    }

    #[test]
    fn test_jql_passes_query_through() {
        let criteria = SearchCriteria::query("project = TB ORDER BY key");
        assert_eq!(jql_from_criteria(&criteria), "project = TB ORDER BY key");
    }

    #[test]
    fn test_jql_from_fields() {
        let mut criteria = SearchCriteria::new();
        criteria
            .add("project", "TB")
            .add("status/open", "Open")
            .add("status/open", "In Progress");

        assert_eq!(
            jql_from_criteria(&criteria),
            r#"project in ("TB") AND status in ("Open", "In Progress")"#
        );
    }

    #[test]
    fn test_jql_mixes_query_and_fields() {
        let mut criteria = SearchCriteria::query("assignee = currentUser() OR reporter = currentUser()");
        criteria.add("project", "TB");

        assert_eq!(
            jql_from_criteria(&criteria),
            r#"(assignee = currentUser() OR reporter = currentUser()) AND (project in ("TB"))"#
        );
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
    }

    #[test]
    fn test_user_path_encodes() {
        assert_eq!(user_path(&EntityRef::name("a b")), "/user?username=a%20b");
        assert_eq!(user_path(&EntityRef::id("JIRAUSER1")), "/user?key=JIRAUSER1");
    }

    #[test]
    fn test_error_from_response_uses_envelope() {
        let body = r#"{"errorMessages": ["Issue does not exist"], "errors": {}}"#;
        assert_eq!(
            error_from_response(StatusCode::NOT_FOUND, "u", body),
            TrackerError::NotFound("Issue does not exist".to_string())
        );

        let body = r#"{"errorMessages": [], "errors": {"jql": "bad field"}}"#;
        assert_eq!(
            error_from_response(StatusCode::BAD_REQUEST, "u", body),
            TrackerError::backend("400", "jql: bad field")
        );
    }

    #[test]
    fn test_error_from_response_without_envelope() {
        assert!(matches!(
            error_from_response(StatusCode::BAD_GATEWAY, "u", "<html>"),
            TrackerError::Transport(_)
        ));
    }
}
