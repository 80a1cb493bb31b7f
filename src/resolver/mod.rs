//! Lazy, cached resolution of entity references.
//!
//! Raw records refer to users, projects and classifications by key. The
//! [`LazyRetriever`] turns those keys into shared domain objects, fetching
//! each one from the backend the first time it is needed and handing out
//! the same `Arc` for every later reference within the session.

mod assemble;
mod cache;

pub use assemble::Assembler;
pub use cache::{CacheStats, FanInCache};

use std::sync::Arc;

use tracing::debug;

use crate::backend::{AsyncResult, Backend};
use crate::batch::Batch;
use crate::error::{Result, TrackerError};
use crate::model::{Classification, Component, EntityRef, Project, User, Version};
use crate::wire::{RawClassification, RawProject, RawUser, UserRef};

/// Lookup statistics per entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrieverStats {
    pub users: CacheStats,
    pub classifications: CacheStats,
    pub projects: CacheStats,
    pub components: CacheStats,
    pub versions: CacheStats,
}

struct Inner {
    backend: Backend,
    users: FanInCache<EntityRef, User>,
    classifications: FanInCache<EntityRef, Classification>,
    projects: FanInCache<EntityRef, Project>,
    /// Keyed by `(project id, component name)`.
    components: FanInCache<(String, String), Component>,
    /// Keyed by `(project id, version name)`.
    versions: FanInCache<(String, String), Version>,
}

/// Session-scoped resolver of entity references.
///
/// Cloning is cheap; clones share caches. Safe to use from many tasks at
/// once: at most one fetch per key is in flight, and a failed fetch is not
/// remembered.
#[derive(Clone)]
pub struct LazyRetriever {
    inner: Arc<Inner>,
}

fn user_keys(user: &User) -> Vec<EntityRef> {
    vec![EntityRef::id(&user.id), EntityRef::name(&user.name)]
}

fn project_keys(project: &Project) -> Vec<EntityRef> {
    vec![EntityRef::id(&project.id), EntityRef::name(&project.name)]
}

fn classification_keys(classification: &Classification) -> Vec<EntityRef> {
    vec![
        EntityRef::id(&classification.id),
        EntityRef::name(&classification.name),
    ]
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        User {
            id: raw.id,
            name: raw.name,
            real_name: raw.real_name,
            team: raw.team,
        }
    }
}

impl From<RawClassification> for Classification {
    fn from(raw: RawClassification) -> Self {
        Classification {
            id: raw.id,
            name: raw.name,
            description: raw.description,
        }
    }
}

impl From<RawProject> for Project {
    fn from(raw: RawProject) -> Self {
        let components = raw
            .components
            .into_iter()
            .map(|c| {
                Arc::new(Component {
                    project_id: raw.id.clone(),
                    name: c.name,
                    description: c.description,
                })
            })
            .collect();
        let versions = raw
            .versions
            .into_iter()
            .map(|name| {
                Arc::new(Version {
                    project_id: raw.id.clone(),
                    name,
                })
            })
            .collect();

        Project {
            id: raw.id,
            name: raw.name,
            description: raw.description,
            classification: raw.classification,
            components,
            versions,
        }
    }
}

/// The single entity a one-key lookup produced.
///
/// Falls back to the batch's first failure, then to `NotFound`.
fn single<T>(batch: Batch<T>, kind: &str, key: &EntityRef) -> Result<T> {
    let Batch { items, failures } = batch;
    if let Some(item) = items.into_iter().next() {
        return Ok(item);
    }
    match failures.into_iter().next() {
        Some(failure) => Err(failure.error),
        None => Err(TrackerError::NotFound(format!("{} {}", kind, key))),
    }
}

impl LazyRetriever {
    /// Create an empty retriever over `backend`.
    pub fn new(backend: Backend) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                users: FanInCache::with_aliases("user", user_keys),
                classifications: FanInCache::with_aliases("classification", classification_keys),
                projects: FanInCache::with_aliases("project", project_keys),
                components: FanInCache::new("component"),
                versions: FanInCache::new("version"),
            }),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    /// Record a user obtained outside the retriever, such as the logged-in
    /// user, and return the shared instance.
    pub fn seed_user(&self, raw: RawUser) -> Arc<User> {
        let user = Arc::new(User::from(raw));
        self.inner.users.insert(EntityRef::id(&user.id), user)
    }

    /// Resolve a user reference.
    ///
    /// When the reference carries the user's data, that data is used and no
    /// request is made.
    pub async fn resolve_user(&self, user: &UserRef) -> Result<Arc<User>> {
        let key = user.key.clone();
        match &user.known {
            Some(raw) => {
                let raw = raw.clone();
                self.inner
                    .users
                    .get_or_fetch(key, move || async move { Ok(Arc::new(User::from(raw))) })
                    .await
            }
            None => {
                let users = self.inner.backend.users.clone();
                let lookup = key.clone();
                self.inner
                    .users
                    .get_or_fetch(key, move || {
                        users
                            .get_users(std::slice::from_ref(&lookup))
                            .and_then(move |batch| {
                                single(batch, "user", &lookup).map(|raw| Arc::new(User::from(raw)))
                            })
                    })
                    .await
            }
        }
    }

    pub async fn resolve_user_by_id(&self, id: &str) -> Result<Arc<User>> {
        self.resolve_user(&UserRef::by_id(id)).await
    }

    pub async fn resolve_user_by_name(&self, name: &str) -> Result<Arc<User>> {
        self.resolve_user(&UserRef::by_name(name)).await
    }

    /// Resolve a classification by id or name.
    pub async fn resolve_classification(&self, key: &EntityRef) -> Result<Arc<Classification>> {
        let client = self.inner.backend.classifications.clone();
        let lookup = key.clone();
        self.inner
            .classifications
            .get_or_fetch(key.clone(), move || {
                client
                    .get_classifications(std::slice::from_ref(&lookup))
                    .and_then(move |batch| {
                        single(batch, "classification", &lookup)
                            .map(|raw| Arc::new(Classification::from(raw)))
                    })
            })
            .await
    }

    /// Resolve a project by id or name, with its components and versions.
    pub async fn resolve_project(&self, key: &EntityRef) -> Result<Arc<Project>> {
        let client = self.inner.backend.products.clone();
        let lookup = key.clone();
        self.inner
            .projects
            .get_or_fetch(key.clone(), move || {
                client
                    .get_products(std::slice::from_ref(&lookup))
                    .and_then(move |batch| {
                        single(batch, "project", &lookup).map(|raw| Arc::new(Project::from(raw)))
                    })
            })
            .await
    }

    /// Resolve the classification a project belongs to, if any.
    pub async fn resolve_project_classification(
        &self,
        project: &Project,
    ) -> Result<Option<Arc<Classification>>> {
        match &project.classification {
            None => Ok(None),
            Some(name) => self
                .resolve_classification(&EntityRef::name(name))
                .await
                .map(Some),
        }
    }

    /// Resolve a component of a project by name.
    pub async fn resolve_component(&self, project: &EntityRef, name: &str) -> Result<Arc<Component>> {
        let project = self.resolve_project(project).await?;
        let key = (project.id.clone(), name.to_string());
        let found = project.component(name).cloned().ok_or_else(|| {
            TrackerError::NotFound(format!("component '{}' in project {}", name, project.name))
        });
        self.inner
            .components
            .get_or_fetch(key, move || AsyncResult::ready(found))
            .await
    }

    /// Resolve a version (or milestone) of a project by name.
    pub async fn resolve_version(&self, project: &EntityRef, name: &str) -> Result<Arc<Version>> {
        let project = self.resolve_project(project).await?;
        let key = (project.id.clone(), name.to_string());
        let found = project.version(name).cloned().ok_or_else(|| {
            TrackerError::NotFound(format!("version '{}' in project {}", name, project.name))
        });
        self.inner
            .versions
            .get_or_fetch(key, move || AsyncResult::ready(found))
            .await
    }

    pub fn stats(&self) -> RetrieverStats {
        RetrieverStats {
            users: self.inner.users.stats(),
            classifications: self.inner.classifications.stats(),
            projects: self.inner.projects.stats(),
            components: self.inner.components.stats(),
            versions: self.inner.versions.stats(),
        }
    }

    /// Drop every cached entity.
    pub fn clear(&self) {
        debug!("Clearing retriever caches");
        self.inner.users.clear();
        self.inner.classifications.clear();
        self.inner.projects.clear();
        self.inner.components.clear();
        self.inner.versions.clear();
    }
}

impl std::fmt::Debug for LazyRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRetriever")
            .field("backend", &self.inner.backend)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::backend::testing::{raw_user, seeded};

    #[tokio::test]
    async fn test_sequential_lookups_fetch_once() {
        let tracker = seeded();
        let retriever = LazyRetriever::new(tracker.backend());

        let first = retriever.resolve_user_by_name("u1").await.unwrap();
        let second = retriever.resolve_user_by_name("u1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tracker.calls().user_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(retriever.stats().users.hits, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_fan_in() {
        let tracker = seeded();
        tracker.set_delay(Duration::from_millis(50));
        let retriever = LazyRetriever::new(tracker.backend());

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let retriever = retriever.clone();
            tasks.push(tokio::spawn(async move {
                retriever.resolve_user_by_name("u1").await
            }));
        }

        let mut users = Vec::new();
        for task in tasks {
            users.push(task.await.unwrap().unwrap());
        }

        assert_eq!(tracker.calls().user_fetches.load(Ordering::SeqCst), 1);
        assert!(users.iter().all(|u| Arc::ptr_eq(u, &users[0])));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried() {
        let tracker = seeded();
        tracker.fail_next_user_fetches(1);
        let retriever = LazyRetriever::new(tracker.backend());

        let err = retriever.resolve_user_by_name("u2").await.unwrap_err();
        assert!(matches!(err, TrackerError::Transport(_)));

        let user = retriever.resolve_user_by_name("u2").await.unwrap();
        assert_eq!(user.id, "2");
        assert_eq!(tracker.calls().user_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let retriever = LazyRetriever::new(seeded().backend());
        let err = retriever.resolve_user_by_name("nobody").await.unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_user_by_id_and_name_share_instance() {
        let tracker = seeded();
        let retriever = LazyRetriever::new(tracker.backend());

        let by_name = retriever.resolve_user_by_name("u1").await.unwrap();
        let by_id = retriever.resolve_user_by_id("1").await.unwrap();

        assert!(Arc::ptr_eq(&by_name, &by_id));
        assert_eq!(tracker.calls().user_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedded_user_needs_no_request() {
        let tracker = seeded();
        let retriever = LazyRetriever::new(tracker.backend());

        let user = retriever
            .resolve_user(&UserRef::embedded(raw_user("99", "embedded")))
            .await
            .unwrap();

        assert_eq!(user.name, "embedded");
        assert_eq!(tracker.calls().user_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_seeded_user_is_reused() {
        let tracker = seeded();
        let retriever = LazyRetriever::new(tracker.backend());

        let seeded_user = retriever.seed_user(raw_user("1", "u1"));
        let resolved = retriever.resolve_user_by_name("u1").await.unwrap();

        assert!(Arc::ptr_eq(&seeded_user, &resolved));
        assert_eq!(tracker.calls().user_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_components_and_versions_come_from_project() {
        let tracker = seeded();
        let retriever = LazyRetriever::new(tracker.backend());
        let widgets = EntityRef::name("Widgets");

        let ui = retriever.resolve_component(&widgets, "UI").await.unwrap();
        let again = retriever.resolve_component(&widgets, "UI").await.unwrap();
        let v2 = retriever.resolve_version(&EntityRef::id("3"), "2.0").await.unwrap();
        let project = retriever.resolve_project(&widgets).await.unwrap();

        assert!(Arc::ptr_eq(&ui, &again));
        assert!(Arc::ptr_eq(&ui, project.component("UI").unwrap()));
        assert!(Arc::ptr_eq(&v2, project.version("2.0").unwrap()));
        assert_eq!(ui.project_id, "3");
        assert_eq!(tracker.calls().product_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_component_is_not_found() {
        let retriever = LazyRetriever::new(seeded().backend());
        let err = retriever
            .resolve_component(&EntityRef::name("Widgets"), "Docs")
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(msg) if msg.contains("Docs")));
    }

    #[tokio::test]
    async fn test_project_classification() {
        let tracker = seeded();
        tracker.data().projects[0].classification = Some("Tools".to_string());
        let retriever = LazyRetriever::new(tracker.backend());

        let project = retriever.resolve_project(&EntityRef::name("Widgets")).await.unwrap();
        let classification = retriever
            .resolve_project_classification(&project)
            .await
            .unwrap()
            .unwrap();
        let by_id = retriever.resolve_classification(&EntityRef::id("7")).await.unwrap();

        assert!(Arc::ptr_eq(&classification, &by_id));
        assert_eq!(
            tracker.calls().classification_fetches.load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let tracker = seeded();
        let retriever = LazyRetriever::new(tracker.backend());

        retriever.resolve_user_by_name("u1").await.unwrap();
        retriever.clear();
        retriever.resolve_user_by_name("u1").await.unwrap();

        assert_eq!(tracker.calls().user_fetches.load(Ordering::SeqCst), 2);
    }
}
