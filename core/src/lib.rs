pub mod dsl;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod persist;
pub mod ranking;
pub mod repo;
pub mod store;

pub use dsl::{compile, DslPolicy};
pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, Repository, RepositoryOptions};
pub use model::{Article, ArticleId, Comment, CommentId, Entity, Namespace};
pub use ranking::{RankingConfig, RepoConfig};
pub use repo::{ListRequest, Page, RestoreStats, SearchRequest, SearchResult, SortSpec, DEFAULT_LIMIT};
pub use store::{SledStore, Store, StoreError};
