//! Trackbridge - one session, query and object model over Bugzilla and Jira.
//!
//! Open a [`Session`] against either tracker, search with a
//! [`SearchCriteria`] and get back [`Issue`]s whose users, projects,
//! components and versions are resolved lazily and shared across the
//! whole session.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::TryStreamExt;
//! use trackbridge::{Config, EnvCredentials, Session};
//!
//! # async fn run() -> trackbridge::Result<()> {
//! let config = Config::load(None)?;
//! let criteria = config.search_criteria();
//! let mut session = Session::new(config, Arc::new(EnvCredentials::new()));
//! session.open().await?;
//!
//! let issues: Vec<_> = session.search_bugs(&criteria).try_collect().await?;
//! println!("{} issues", issues.len());
//!
//! session.close().await
//! # }
//! ```

pub mod auth;
pub mod backend;
pub mod batch;
pub mod config;
pub mod criteria;
pub mod error;
pub mod logging;
pub mod model;
pub mod resolver;
pub mod session;
pub mod version;
pub mod wire;

pub use auth::{CredentialProvider, Credentials, EnvCredentials, KeyringCredentials};
pub use backend::{AsyncResult, Backend, BackendKind};
pub use batch::{Batch, ItemFailure};
pub use config::{BackendProfile, BatchPolicy, Config, ConnectionSettings};
pub use criteria::SearchCriteria;
pub use error::{Result, TrackerError};
pub use model::{Attachment, Comment, Issue, Project, User};
pub use resolver::LazyRetriever;
pub use session::Session;
