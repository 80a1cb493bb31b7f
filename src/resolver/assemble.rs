//! Building domain objects from raw records.

use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use super::LazyRetriever;
use crate::batch::{Batch, ItemFailure};
use crate::config::BatchPolicy;
use crate::error::{Result, TrackerError};
use crate::model::{Attachment, Comment, Component, EntityRef, Issue, Project, User, Version};
use crate::wire::{RawAttachment, RawComment, RawIssue, UserRef};

/// Turns raw issues, comments and attachments into domain objects,
/// resolving every reference through a [`LazyRetriever`].
///
/// Failures of contained items (a comment whose author cannot be found, an
/// unknown version) are handled according to the [`BatchPolicy`]: recorded
/// on the issue under partial success, or failing the issue under
/// all-or-nothing.
#[derive(Debug, Clone)]
pub struct Assembler {
    retriever: LazyRetriever,
    policy: BatchPolicy,
}

impl Assembler {
    pub fn new(retriever: LazyRetriever, policy: BatchPolicy) -> Self {
        Self { retriever, policy }
    }

    pub fn retriever(&self) -> &LazyRetriever {
        &self.retriever
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    async fn optional_user(&self, user: Option<&UserRef>) -> Result<Option<Arc<User>>> {
        match user {
            Some(user) => self.retriever.resolve_user(user).await.map(Some),
            None => Ok(None),
        }
    }

    /// Build one comment. Fails if either of its users cannot be resolved.
    pub async fn comment(&self, raw: RawComment) -> Result<Comment> {
        let (author, update_author) = futures::try_join!(
            self.retriever.resolve_user(&raw.author),
            self.optional_user(raw.update_author.as_ref()),
        )?;

        Ok(Comment {
            id: raw.id,
            issue_id: raw.issue_id,
            text: raw.text,
            author,
            update_author,
            created: raw.created,
            updated: raw.updated,
            attachment_id: raw.attachment_id,
        })
    }

    /// Build one attachment's metadata.
    pub async fn attachment(&self, raw: RawAttachment) -> Result<Attachment> {
        let author = self.optional_user(raw.author.as_ref()).await?;

        Ok(Attachment {
            id: raw.id,
            issue_id: raw.issue_id,
            date: raw.date,
            description: raw.description,
            filename: raw.filename,
            content_type: raw.content_type,
            author,
            url: raw.url,
        })
    }

    async fn build_comments(&self, raws: Batch<RawComment>) -> Batch<Comment> {
        let Batch { items, failures } = raws;
        let built = join_all(items.into_iter().map(|raw| async move {
            let (id, issue_id) = (raw.id.clone(), raw.issue_id.clone());
            (id, issue_id, self.comment(raw).await)
        }))
        .await;

        let mut batch = Batch {
            items: Vec::with_capacity(built.len()),
            failures,
        };
        for (id, issue_id, outcome) in built {
            batch.push_in(&issue_id, "comment", Some(id), outcome);
        }
        batch
    }

    async fn build_attachments(&self, raws: Batch<RawAttachment>) -> Batch<Attachment> {
        let Batch { items, failures } = raws;
        let built = join_all(items.into_iter().map(|raw| async move {
            let (id, issue_id) = (raw.id.clone(), raw.issue_id.clone());
            (id, issue_id, self.attachment(raw).await)
        }))
        .await;

        let mut batch = Batch {
            items: Vec::with_capacity(built.len()),
            failures,
        };
        for (id, issue_id, outcome) in built {
            batch.push_in(&issue_id, "attachment", Some(id), outcome);
        }
        batch
    }

    /// Build an issue with its comments and attachments.
    ///
    /// Without an explicit description, the comment numbered 0 provides it.
    pub async fn issue(
        &self,
        raw: RawIssue,
        comments: Batch<RawComment>,
        attachments: Batch<RawAttachment>,
    ) -> Result<Issue> {
        let description = raw
            .description
            .clone()
            .or_else(|| {
                comments
                    .items
                    .iter()
                    .find(|c| c.issue_id == raw.id && c.ordinal == Some(0))
                    .map(|c| c.text.clone())
            })
            .unwrap_or_default();

        let (comments, attachments, reporter, assignee, project) = futures::join!(
            self.build_comments(comments),
            self.build_attachments(attachments),
            self.optional_user(raw.reporter.as_ref()),
            self.optional_user(raw.assignee.as_ref()),
            async {
                match &raw.project {
                    Some(key) => self.retriever.resolve_project(key).await.map(Some),
                    None => Ok(None),
                }
            },
        );

        let mut failures: Vec<ItemFailure> = Vec::new();
        failures.extend(comments.failures);
        failures.extend(attachments.failures);

        let reporter = record(
            &mut failures,
            "reporter",
            &raw.id,
            raw.reporter.as_ref().map(|u| u.key.value()),
            reporter,
        );
        let assignee = record(
            &mut failures,
            "assignee",
            &raw.id,
            raw.assignee.as_ref().map(|u| u.key.value()),
            assignee,
        );
        let project = record(
            &mut failures,
            "project",
            &raw.id,
            raw.project.as_ref().map(EntityRef::value),
            project,
        );

        let scoped = match &project {
            Some(project) => self.resolve_scoped(project, &raw, &mut failures).await,
            None => {
                if raw.project.is_none() && names_scoped_entities(&raw) {
                    failures.push(
                        ItemFailure::new(
                            "project",
                            None,
                            TrackerError::protocol("issue names components or versions but no project"),
                        )
                        .in_issue(&raw.id),
                    );
                }
                ProjectScoped::default()
            }
        };

        match self.policy {
            BatchPolicy::AllOrNothing => {
                if let Some(failure) = failures.first() {
                    return Err(failure.error.clone());
                }
            }
            BatchPolicy::PartialSuccess => {
                for failure in &failures {
                    warn!(issue = %raw.id, failure = %failure, "Skipping unresolvable item");
                }
            }
        }

        let vocabulary = &self.retriever.backend().vocabulary;
        Ok(Issue {
            status: vocabulary.status(&raw.status),
            priority: raw.priority.as_deref().map(|p| vocabulary.priority(p)),
            severity: raw.severity.as_deref().map(|s| vocabulary.severity(s)),
            issue_type: vocabulary.issue_type(&raw.issue_type),
            id: raw.id,
            summary: raw.summary,
            description,
            resolution: raw.resolution,
            reporter,
            assignee,
            created: raw.created,
            updated: raw.updated,
            project,
            components: scoped.components,
            affected_versions: scoped.affected_versions,
            planned_versions: scoped.planned_versions,
            fix_versions: scoped.fix_versions,
            comments: comments.items,
            attachments: attachments.items,
            parent_id: raw.parent_id,
            children: raw.children.into_iter().collect(),
            links: raw.links.into_iter().collect(),
            failures,
        })
    }

    /// Resolve the components and versions an issue names within its
    /// project.
    async fn resolve_scoped(
        &self,
        project: &Project,
        raw: &RawIssue,
        failures: &mut Vec<ItemFailure>,
    ) -> ProjectScoped {
        let key = EntityRef::id(&project.id);
        let r = &self.retriever;

        let (components, affected, planned, fix) = futures::join!(
            join_all(raw.components.iter().map(|name| r.resolve_component(&key, name))),
            join_all(raw.affected_versions.iter().map(|name| r.resolve_version(&key, name))),
            join_all(raw.planned_versions.iter().map(|name| r.resolve_version(&key, name))),
            join_all(raw.fix_versions.iter().map(|name| r.resolve_version(&key, name))),
        );

        let id = raw.id.as_str();
        ProjectScoped {
            components: collect_named("component", id, &raw.components, components, failures),
            affected_versions: collect_named("version", id, &raw.affected_versions, affected, failures),
            planned_versions: collect_named("version", id, &raw.planned_versions, planned, failures),
            fix_versions: collect_named("version", id, &raw.fix_versions, fix, failures),
        }
    }
}

#[derive(Default)]
struct ProjectScoped {
    components: Vec<Arc<Component>>,
    affected_versions: Vec<Arc<Version>>,
    planned_versions: Vec<Arc<Version>>,
    fix_versions: Vec<Arc<Version>>,
}

/// Unwrap an optional reference's outcome, recording a failure.
fn record<T>(
    failures: &mut Vec<ItemFailure>,
    kind: &'static str,
    issue_id: &str,
    id: Option<&str>,
    outcome: Result<Option<T>>,
) -> Option<T> {
    match outcome {
        Ok(value) => value,
        Err(error) => {
            failures.push(ItemFailure::new(kind, id.map(String::from), error).in_issue(issue_id));
            None
        }
    }
}

/// Keep the resolved entities, recording the names that failed.
fn collect_named<T>(
    kind: &'static str,
    issue_id: &str,
    names: &[String],
    outcomes: Vec<Result<T>>,
    failures: &mut Vec<ItemFailure>,
) -> Vec<T> {
    let mut kept = Vec::with_capacity(outcomes.len());
    for (name, outcome) in names.iter().zip(outcomes) {
        match outcome {
            Ok(value) => kept.push(value),
            Err(error) => {
                failures.push(ItemFailure::new(kind, Some(name.clone()), error).in_issue(issue_id))
            }
        }
    }
    kept
}

fn names_scoped_entities(raw: &RawIssue) -> bool {
    !(raw.components.is_empty()
        && raw.affected_versions.is_empty()
        && raw.planned_versions.is_empty()
        && raw.fix_versions.is_empty())
}
