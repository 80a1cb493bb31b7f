//! Bugzilla client over JSON-RPC.
//!
//! Every call is a `POST` to `{base}/jsonrpc.cgi` carrying
//! `{"method", "params": [{...}], "id"}`. Once logged in, the session token
//! is sent as the `Bugzilla_token` parameter of every call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::{header, Client};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use super::{
    build_http_client, criteria_fields, normalize_base_url, split_refs, AsyncResult, Backend,
    BackendKind, BugClient, ClassificationClient, MetadataClient, ProductClient, UserClient,
};
use crate::auth::Credentials;
use crate::batch::Batch;
use crate::config::Config;
use crate::criteria::{SearchCriteria, QUERY_PARAMETER};
use crate::error::{Result, TrackerError};
use crate::model::EntityRef;
use crate::wire::{self, RawAttachment, RawClassification, RawComment, RawIssue, RawProject, RawUser, SearchPage};

/// Path of the JSON-RPC endpoint below the base URL.
const RPC_PATH: &str = "jsonrpc.cgi";

/// Fault code for unknown users in `User.get`.
const UNKNOWN_USER_CODE: &str = "51";

/// Search field that takes Bugzilla's quicksearch syntax.
const QUICKSEARCH_FIELD: &str = "quicksearch";

/// Build an unauthenticated Bugzilla backend.
pub fn connect(config: &Config) -> Result<Backend> {
    let client = BugzillaClient::new(build_http_client(&config.connection)?, &config.backend.url);
    info!(endpoint = %client.rpc.endpoint, "Bugzilla backend created");
    Ok(Backend::from_client(BackendKind::Bugzilla, client))
}

/// The JSON-RPC transport shared by every call.
#[derive(Debug)]
struct Rpc {
    http: Client,
    endpoint: String,
    token: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl Rpc {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Perform one call and return the raw response envelope.
    #[instrument(skip(self, params))]
    async fn call(&self, method: &str, mut params: Value) -> Result<Value> {
        if let (Some(token), Value::Object(obj)) = (self.token(), &mut params) {
            obj.insert("Bugzilla_token".to_string(), Value::String(token));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"method": method, "params": [params], "id": id});

        debug!("Calling {}", method);
        let response = self
            .http
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Value>().await?);
        }

        // Some installations report RPC faults with an HTTP error status.
        let error_body = response.text().await.unwrap_or_default();
        debug!("Error response body: {}", error_body);
        if let Ok(payload) = serde_json::from_str::<Value>(&error_body) {
            if let Err(e @ TrackerError::Backend { .. }) = wire::bugzilla::check_error(&payload) {
                return Err(e);
            }
        }
        Err(TrackerError::from_status(status, method))
    }

    /// Download bytes from a URL on the same server.
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut request = self.http.get(url);
        if let Some(token) = self.token() {
            request = request.query(&[("Bugzilla_token", token)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::from_status(status, url));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Bugzilla client. One instance serves every client trait.
#[derive(Debug, Clone)]
pub struct BugzillaClient {
    rpc: Arc<Rpc>,
}

impl BugzillaClient {
    /// Create a client for the Bugzilla instance at `base_url`.
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            rpc: Arc::new(Rpc {
                http,
                endpoint: format!("{}/{}", normalize_base_url(base_url), RPC_PATH),
                token: RwLock::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start `method` in the background and parse its response.
    fn spawn_call<T, F>(&self, method: &'static str, params: Value, parse: F) -> AsyncResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&Value) -> Result<T> + Send + 'static,
    {
        let rpc = self.rpc.clone();
        AsyncResult::spawn(async move {
            let payload = rpc.call(method, params).await?;
            parse(&payload)
        })
    }
}

/// `ids`/`names` parameters for a lookup by reference.
fn lookup_params(refs: &[EntityRef]) -> Value {
    let (ids, names) = split_refs(refs);
    let mut params = Map::new();
    if !ids.is_empty() {
        params.insert("ids".to_string(), json!(ids));
    }
    if !names.is_empty() {
        params.insert("names".to_string(), json!(names));
    }
    Value::Object(params)
}

/// `Bug.search` parameters for one page of `criteria`.
fn search_params(criteria: &SearchCriteria, offset: u64, limit: u32) -> Value {
    let mut params = Map::new();
    for (field, values) in criteria_fields(criteria) {
        let field = if field == QUERY_PARAMETER {
            QUICKSEARCH_FIELD
        } else {
            field
        };
        let value = match values.as_slice() {
            [single] => json!(single),
            many => json!(many),
        };
        params.insert(field.to_string(), value);
    }
    params.insert("offset".to_string(), json!(offset));
    params.insert("limit".to_string(), json!(limit));
    Value::Object(params)
}

fn is_url(id_or_url: &str) -> bool {
    id_or_url.starts_with("http://") || id_or_url.starts_with("https://")
}

impl UserClient for BugzillaClient {
    #[instrument(skip(self, credentials), fields(user = %credentials.username()))]
    fn login(&self, credentials: &Credentials) -> AsyncResult<RawUser> {
        let rpc = self.rpc.clone();
        let params = json!({
            "login": credentials.username(),
            "password": credentials.secret(),
        });
        AsyncResult::spawn(async move {
            let login = wire::bugzilla::parse_login(&rpc.call("User.login", params).await?)?;
            rpc.set_token(login.token);
            debug!(user_id = %login.user_id, "Logged in");

            let payload = rpc.call("User.get", json!({"ids": [login.user_id]})).await?;
            wire::bugzilla::parse_users(&payload)?
                .into_all_or_nothing()?
                .into_iter()
                .next()
                .ok_or_else(|| TrackerError::protocol("User.get returned no user for the login"))
        })
    }

    fn logout(&self) -> AsyncResult<()> {
        let rpc = self.rpc.clone();
        AsyncResult::spawn(async move {
            let outcome = rpc
                .call("User.logout", json!({}))
                .await
                .and_then(|payload| wire::bugzilla::check_error(&payload).map(|_| ()));
            rpc.set_token(None);
            outcome
        })
    }

    fn get_users(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawUser>> {
        if refs.is_empty() {
            return AsyncResult::fulfilled(Batch::new());
        }
        self.spawn_call("User.get", lookup_params(refs), |payload| {
            wire::bugzilla::parse_users(payload).map_err(|e| match e {
                TrackerError::Backend { code, message } if code == UNKNOWN_USER_CODE => {
                    TrackerError::NotFound(message)
                }
                other => other,
            })
        })
    }
}

impl ClassificationClient for BugzillaClient {
    fn get_classifications(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawClassification>> {
        if refs.is_empty() {
            return AsyncResult::fulfilled(Batch::new());
        }
        self.spawn_call(
            "Classification.get",
            lookup_params(refs),
            wire::bugzilla::parse_classifications,
        )
    }
}

impl ProductClient for BugzillaClient {
    fn get_products(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawProject>> {
        if refs.is_empty() {
            return AsyncResult::fulfilled(Batch::new());
        }
        self.spawn_call("Product.get", lookup_params(refs), wire::bugzilla::parse_products)
    }
}

impl BugClient for BugzillaClient {
    #[instrument(skip(self, criteria))]
    fn search(&self, criteria: &SearchCriteria, offset: u64, limit: u32) -> AsyncResult<SearchPage> {
        self.spawn_call(
            "Bug.search",
            search_params(criteria, offset, limit),
            wire::bugzilla::parse_bugs,
        )
    }

    fn get_bugs(&self, ids: &[String]) -> AsyncResult<Batch<RawIssue>> {
        if ids.is_empty() {
            return AsyncResult::fulfilled(Batch::new());
        }
        self.spawn_call(
            "Bug.get",
            json!({"ids": ids, "permissive": true}),
            |payload| wire::bugzilla::parse_bugs(payload).map(|page| page.issues),
        )
    }

    fn get_comments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawComment>> {
        if issue_ids.is_empty() {
            return AsyncResult::fulfilled(Batch::new());
        }
        self.spawn_call(
            "Bug.comments",
            json!({"ids": issue_ids}),
            wire::bugzilla::parse_comments,
        )
    }

    fn get_attachments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawAttachment>> {
        if issue_ids.is_empty() {
            return AsyncResult::fulfilled(Batch::new());
        }
        self.spawn_call(
            "Bug.attachments",
            json!({"ids": issue_ids, "exclude_fields": ["data"]}),
            wire::bugzilla::parse_attachments,
        )
    }

    #[instrument(skip(self))]
    fn get_attachment_content(&self, id_or_url: &str) -> AsyncResult<Vec<u8>> {
        let rpc = self.rpc.clone();
        let target = id_or_url.to_string();
        if is_url(&target) {
            return AsyncResult::spawn(async move { rpc.download(&target).await });
        }
        AsyncResult::spawn(async move {
            let params = json!({"attachment_ids": [target], "include_fields": ["id", "data"]});
            let payload = rpc.call("Bug.attachments", params).await?;
            wire::bugzilla::parse_attachment_data(&payload, &target)
        })
    }
}

impl MetadataClient for BugzillaClient {
    fn server_version(&self) -> AsyncResult<String> {
        self.spawn_call("Bugzilla.version", json!({}), wire::bugzilla::parse_version)
    }
}
