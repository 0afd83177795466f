use crate::error::Error;
use crate::store::NamespaceSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ArticleId = i64;
pub type CommentId = i64;

/// Name of the composite full-text field every namespace declares.
pub const SEARCH_FIELD: &str = "search";

/// Relation under which joined comments are attached to an article.
pub const COMMENTS_RELATION: &str = "comments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Posts,
    Comments,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Posts => "posts",
            Namespace::Comments => "comments",
        }
    }

    pub fn schema(&self) -> NamespaceSchema {
        match self {
            Namespace::Posts => Article::schema(),
            Namespace::Comments => Comment::schema(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts" => Ok(Namespace::Posts),
            "comments" => Ok(Namespace::Comments),
            other => Err(Error::InvalidNamespace(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    #[serde(rename = "post_id")]
    pub article_id: ArticleId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub likes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    /// Publish time, epoch seconds.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub hubs: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub likes: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub favorites: i64,
    #[serde(default)]
    pub views: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_image: bool,
    /// Filled only when comments were joined in; never stored with the article.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Id for a comment the source did not number: derived from its parent and position.
/// Saturates instead of overflowing on ids near the i64 range ends.
pub fn derive_comment_id(article_id: ArticleId, position: usize) -> CommentId {
    let position = i64::try_from(position).unwrap_or(i64::MAX);
    article_id.saturating_mul(1000).saturating_add(position)
}

/// A document type stored in its own namespace.
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    const NAMESPACE: Namespace;

    fn schema() -> NamespaceSchema;
}

impl Entity for Article {
    const NAMESPACE: Namespace = Namespace::Posts;

    fn schema() -> NamespaceSchema {
        NamespaceSchema::new(Self::NAMESPACE.as_str(), "id").composite(SEARCH_FIELD, &["title", "text", "user"])
    }
}

impl Entity for Comment {
    const NAMESPACE: Namespace = Namespace::Comments;

    fn schema() -> NamespaceSchema {
        NamespaceSchema::new(Self::NAMESPACE.as_str(), "id").composite(SEARCH_FIELD, &["text", "user"])
    }
}
