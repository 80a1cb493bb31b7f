//! In-memory tracker used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{
    AsyncResult, Backend, BackendKind, BugClient, ClassificationClient, MetadataClient,
    ProductClient, UserClient,
};
use crate::auth::Credentials;
use crate::batch::Batch;
use crate::criteria::SearchCriteria;
use crate::error::{Result, TrackerError};
use crate::model::EntityRef;
use crate::wire::{
    parse_rfc3339, RawAttachment, RawClassification, RawComment, RawComponent, RawIssue,
    RawProject, RawUser, SearchPage, UserRef,
};

/// Password accepted by [`FakeTracker::login`].
pub const PASSWORD: &str = "secret";

#[derive(Debug, Default)]
pub struct FakeData {
    pub users: Vec<RawUser>,
    pub classifications: Vec<RawClassification>,
    pub projects: Vec<RawProject>,
    pub bugs: Vec<RawIssue>,
    pub comments: Vec<RawComment>,
    /// `(issue id, comment id)` pairs reported as unparseable.
    pub broken_comments: Vec<(String, String)>,
    pub attachments: Vec<RawAttachment>,
    pub contents: HashMap<String, Vec<u8>>,
    pub server_version: String,
    /// Most issues returned per search page, whatever the requested limit.
    pub max_page_size: Option<u32>,
    /// Report no `total` with search pages.
    pub hide_total: bool,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    pub user_fetches: AtomicUsize,
    pub classification_fetches: AtomicUsize,
    pub product_fetches: AtomicUsize,
    pub searches: AtomicUsize,
    pub bug_fetches: AtomicUsize,
    pub comment_fetches: AtomicUsize,
}

#[derive(Debug, Default)]
struct FakeState {
    data: Mutex<FakeData>,
    calls: Calls,
    /// Number of upcoming user fetches that fail with a transport error.
    failing_user_fetches: AtomicUsize,
    /// Latency added to every lookup.
    delay: Mutex<Duration>,
}

/// A tracker backed by in-memory records. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeTracker {
    state: Arc<FakeState>,
}

impl FakeTracker {
    pub fn new() -> Self {
        let tracker = Self::default();
        tracker.data().server_version = "5.0.4".to_string();
        tracker
    }

    pub fn data(&self) -> std::sync::MutexGuard<'_, FakeData> {
        self.state.data.lock().unwrap()
    }

    pub fn calls(&self) -> &Calls {
        &self.state.calls
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn fail_next_user_fetches(&self, count: usize) {
        self.state.failing_user_fetches.store(count, Ordering::SeqCst);
    }

    /// A backend whose every client is this tracker.
    pub fn backend(&self) -> Backend {
        Backend::from_client(BackendKind::Bugzilla, self.clone())
    }

    fn delay(&self) -> Duration {
        *self.state.delay.lock().unwrap()
    }

    /// Run `lookup` against the data after the configured delay.
    fn deferred<T, F>(&self, lookup: F) -> AsyncResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&FakeTracker) -> Result<T> + Send + 'static,
    {
        let tracker = self.clone();
        let delay = self.delay();
        AsyncResult::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            lookup(&tracker)
        })
    }
}

fn matches_ref(r: &EntityRef, id: &str, name: &str) -> bool {
    match r {
        EntityRef::Id(v) => v == id,
        EntityRef::Name(v) => v == name,
    }
}

impl UserClient for FakeTracker {
    fn login(&self, credentials: &Credentials) -> AsyncResult<RawUser> {
        self.state.calls.logins.fetch_add(1, Ordering::SeqCst);
        if credentials.secret() != PASSWORD {
            return AsyncResult::rejected(TrackerError::backend(
                "300",
                "The username or password you entered is not valid.",
            ));
        }
        let user = self
            .data()
            .users
            .iter()
            .find(|u| u.name == credentials.username())
            .cloned();
        AsyncResult::ready(user.ok_or_else(|| TrackerError::backend("300", "unknown login")))
    }

    fn logout(&self) -> AsyncResult<()> {
        self.state.calls.logouts.fetch_add(1, Ordering::SeqCst);
        AsyncResult::fulfilled(())
    }

    fn get_users(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawUser>> {
        self.state.calls.user_fetches.fetch_add(1, Ordering::SeqCst);
        let refs = refs.to_vec();
        self.deferred(move |tracker| {
            let failing = &tracker.state.failing_user_fetches;
            if failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TrackerError::Transport("connection reset".to_string()));
            }

            let data = tracker.data();
            let mut batch = Batch::new();
            for r in &refs {
                let found = data.users.iter().find(|u| matches_ref(r, &u.id, &u.name));
                batch.push(
                    "user",
                    Some(r.value().to_string()),
                    found
                        .cloned()
                        .ok_or_else(|| TrackerError::NotFound(format!("user {}", r))),
                );
            }
            Ok(batch)
        })
    }
}

impl ClassificationClient for FakeTracker {
    fn get_classifications(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawClassification>> {
        self.state
            .calls
            .classification_fetches
            .fetch_add(1, Ordering::SeqCst);
        let refs = refs.to_vec();
        self.deferred(move |tracker| {
            let data = tracker.data();
            let mut batch = Batch::new();
            for r in &refs {
                let found = data
                    .classifications
                    .iter()
                    .find(|c| matches_ref(r, &c.id, &c.name));
                batch.push(
                    "classification",
                    Some(r.value().to_string()),
                    found
                        .cloned()
                        .ok_or_else(|| TrackerError::NotFound(format!("classification {}", r))),
                );
            }
            Ok(batch)
        })
    }
}

impl ProductClient for FakeTracker {
    fn get_products(&self, refs: &[EntityRef]) -> AsyncResult<Batch<RawProject>> {
        self.state.calls.product_fetches.fetch_add(1, Ordering::SeqCst);
        let refs = refs.to_vec();
        self.deferred(move |tracker| {
            let data = tracker.data();
            let mut batch = Batch::new();
            for r in &refs {
                let found = data.projects.iter().find(|p| matches_ref(r, &p.id, &p.name));
                batch.push(
                    "product",
                    Some(r.value().to_string()),
                    found
                        .cloned()
                        .ok_or_else(|| TrackerError::NotFound(format!("product {}", r))),
                );
            }
            Ok(batch)
        })
    }
}

impl BugClient for FakeTracker {
    fn search(&self, _criteria: &SearchCriteria, offset: u64, limit: u32) -> AsyncResult<SearchPage> {
        self.state.calls.searches.fetch_add(1, Ordering::SeqCst);
        self.deferred(move |tracker| {
            let data = tracker.data();
            let limit = data.max_page_size.map_or(limit, |max| limit.min(max));
            let mut issues = Batch::new();
            for bug in data.bugs.iter().skip(offset as usize).take(limit as usize) {
                issues.push("bug", Some(bug.id.clone()), Ok(bug.clone()));
            }
            Ok(SearchPage {
                issues,
                total: (!data.hide_total).then_some(data.bugs.len() as u64),
            })
        })
    }

    fn get_bugs(&self, ids: &[String]) -> AsyncResult<Batch<RawIssue>> {
        self.state.calls.bug_fetches.fetch_add(1, Ordering::SeqCst);
        let ids = ids.to_vec();
        self.deferred(move |tracker| {
            let data = tracker.data();
            let mut batch = Batch::new();
            for id in &ids {
                let found = data.bugs.iter().find(|b| &b.id == id);
                batch.push(
                    "bug",
                    Some(id.clone()),
                    found
                        .cloned()
                        .ok_or_else(|| TrackerError::NotFound(format!("bug {}", id))),
                );
            }
            Ok(batch)
        })
    }

    fn get_comments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawComment>> {
        self.state.calls.comment_fetches.fetch_add(1, Ordering::SeqCst);
        let ids = issue_ids.to_vec();
        self.deferred(move |tracker| {
            let data = tracker.data();
            let mut batch = Batch::new();
            for comment in data.comments.iter().filter(|c| ids.contains(&c.issue_id)) {
                batch.push_in(&comment.issue_id, "comment", Some(comment.id.clone()), Ok(comment.clone()));
            }
            for (issue_id, comment_id) in data.broken_comments.iter().filter(|(i, _)| ids.contains(i)) {
                batch.push_in(
                    issue_id,
                    "comment",
                    Some(comment_id.clone()),
                    Err(TrackerError::protocol("missing timestamp 'time'")),
                );
            }
            Ok(batch)
        })
    }

    fn get_attachments(&self, issue_ids: &[String]) -> AsyncResult<Batch<RawAttachment>> {
        let ids = issue_ids.to_vec();
        self.deferred(move |tracker| {
            let data = tracker.data();
            let mut batch = Batch::new();
            for attachment in data.attachments.iter().filter(|a| ids.contains(&a.issue_id)) {
                batch.push("attachment", Some(attachment.id.clone()), Ok(attachment.clone()));
            }
            Ok(batch)
        })
    }

    fn get_attachment_content(&self, id_or_url: &str) -> AsyncResult<Vec<u8>> {
        let id = id_or_url.to_string();
        self.deferred(move |tracker| {
            tracker
                .data()
                .contents
                .get(&id)
                .cloned()
                .ok_or_else(|| TrackerError::NotFound(format!("attachment {}", id)))
        })
    }
}

impl MetadataClient for FakeTracker {
    fn server_version(&self) -> AsyncResult<String> {
        AsyncResult::fulfilled(self.data().server_version.clone())
    }
}

pub fn timestamp() -> DateTime<Utc> {
    parse_rfc3339("2014-01-01T00:00:00Z").unwrap()
}

pub fn raw_user(id: &str, name: &str) -> RawUser {
    RawUser {
        id: id.to_string(),
        name: name.to_string(),
        real_name: format!("User {}", name),
        team: None,
    }
}

pub fn raw_classification(id: &str, name: &str) -> RawClassification {
    RawClassification {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
    }
}

pub fn raw_project(id: &str, name: &str, components: &[&str], versions: &[&str]) -> RawProject {
    RawProject {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        classification: None,
        components: components
            .iter()
            .map(|c| RawComponent {
                name: c.to_string(),
                description: String::new(),
            })
            .collect(),
        versions: versions.iter().map(|v| v.to_string()).collect(),
    }
}

pub fn raw_issue(id: &str, project: &str) -> RawIssue {
    RawIssue {
        id: id.to_string(),
        summary: format!("Issue {}", id),
        description: None,
        status: "NEW".to_string(),
        resolution: String::new(),
        priority: Some("P2".to_string()),
        severity: Some("normal".to_string()),
        issue_type: "normal".to_string(),
        reporter: Some(UserRef::by_name("u1")),
        assignee: None,
        created: timestamp(),
        updated: timestamp(),
        project: Some(EntityRef::name(project)),
        components: Vec::new(),
        affected_versions: Vec::new(),
        planned_versions: Vec::new(),
        fix_versions: Vec::new(),
        parent_id: None,
        children: Vec::new(),
        links: Vec::new(),
    }
}

pub fn raw_comment(id: &str, issue_id: &str, author: &str, ordinal: u32) -> RawComment {
    RawComment {
        id: id.to_string(),
        issue_id: issue_id.to_string(),
        text: format!("comment {}", id),
        author: UserRef::by_name(author),
        update_author: None,
        created: timestamp(),
        updated: timestamp(),
        attachment_id: None,
        ordinal: Some(ordinal),
    }
}

/// A tracker with users u1 and u2, product Widgets and classification Tools.
pub fn seeded() -> FakeTracker {
    let tracker = FakeTracker::new();
    {
        let mut data = tracker.data();
        data.users = vec![raw_user("1", "u1"), raw_user("2", "u2")];
        data.classifications = vec![raw_classification("7", "Tools")];
        data.projects = vec![raw_project("3", "Widgets", &["UI", "Core"], &["1.0", "2.0"])];
    }
    tracker
}
