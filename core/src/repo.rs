//! Search and listing operations over the ready repository.

use crate::error::Result;
use crate::lifecycle::Repository;
use crate::model::{Article, ArticleId, Comment, Entity, Namespace, COMMENTS_RELATION, SEARCH_FIELD};
use crate::persist;
use crate::store::{Condition, Query, Snippet, Store, StoreError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_LIMIT: usize = 20;

/// Unset limit means [`DEFAULT_LIMIT`]; unset offset means no offset clause at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Page {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: Option<usize>, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    fn apply(&self, query: Query) -> Query {
        let query = query.limit(self.limit.unwrap_or(DEFAULT_LIMIT));
        match self.offset {
            Some(offset) => query.offset(offset),
            None => query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub page: Page,
    pub sort: Option<SortSpec>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    pub fn page(mut self, offset: Option<usize>, limit: Option<usize>) -> Self {
        self.page = Page::new(offset, limit);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort = Some(SortSpec { field: field.into(), descending });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub page: Page,
    pub author: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub include_comments: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<T> {
    pub items: Vec<T>,
    /// Matches regardless of page size.
    pub total: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub loaded: usize,
    pub failed: usize,
}

fn body_snippet() -> Snippet {
    Snippet::new("text")
}

fn collect<T: Entity, S: Store>(store: &S, query: &Query, started: Instant) -> Result<SearchResult<T>> {
    let (items, total) = store.execute(query)?.decode::<T>()?;
    Ok(SearchResult { items, total, elapsed: started.elapsed() })
}

impl<S: Store> Repository<S> {
    pub fn search_articles(&self, req: &SearchRequest) -> Result<SearchResult<Article>> {
        self.search::<Article>(req)
    }

    pub fn search_comments(&self, req: &SearchRequest) -> Result<SearchResult<Comment>> {
        self.search::<Comment>(req)
    }

    fn search<T: Entity>(&self, req: &SearchRequest) -> Result<SearchResult<T>> {
        let permit = self.read_permit()?;
        let started = Instant::now();
        let dsl = self.options.dsl.compile(&permit.config().get(T::NAMESPACE).fields, &req.query);
        debug!(namespace = %T::NAMESPACE, query = %req.query, dsl = %dsl, "compiled search");

        let mut query = Query::new(T::NAMESPACE.as_str()).matches(SEARCH_FIELD, dsl).req_total().snippet(body_snippet());
        if let Some(sort) = &req.sort {
            query = query.sort(&sort.field, sort.descending);
        }
        let query = req.page.apply(query);
        collect(permit.store(), &query, started)
    }

    /// Fetch one article by id, optionally with its comments joined in.
    pub fn get_article(&self, id: ArticleId, include_comments: bool) -> Result<Article> {
        let permit = self.read_permit()?;
        let mut query = Query::new(Namespace::Posts.as_str()).where_int("id", Condition::Eq, id).req_total();
        if include_comments {
            query = with_comments(query);
        }
        Ok(permit.store().execute(&query)?.fetch_one()?)
    }

    /// Articles ordered by publish time, filtered by author and time range.
    pub fn list_articles(&self, req: &ListRequest) -> Result<SearchResult<Article>> {
        let permit = self.read_permit()?;
        let started = Instant::now();
        let mut query = req.page.apply(Query::new(Namespace::Posts.as_str()).req_total());
        if let Some(start) = req.start_time {
            query = query.where_int("time", Condition::Ge, start);
        }
        if let Some(end) = req.end_time {
            query = query.where_int("time", Condition::Le, end);
        }
        if let Some(author) = req.author.as_deref().filter(|a| !a.is_empty()) {
            query = query.where_str("user", Condition::Eq, author);
        }
        if req.include_comments {
            query = with_comments(query);
        }
        let query = query.sort("time", false);
        collect(permit.store(), &query, started)
    }

    /// Store an article and its comments; comments are stored in their own namespace.
    pub fn upsert_article(&self, mut article: Article) -> Result<()> {
        let permit = self.read_permit()?;
        let store = permit.store();
        for mut comment in std::mem::take(&mut article.comments) {
            comment.article_id = article.id;
            upsert(store, &comment)?;
        }
        upsert(store, &article)
    }

    /// Load dump files one by one. Bad files are logged and counted, never fatal.
    pub fn restore(&self, files: impl IntoIterator<Item = PathBuf>) -> Result<RestoreStats> {
        let files: Vec<PathBuf> = files.into_iter().collect();
        let mut stats = RestoreStats::default();
        for (i, path) in files.iter().enumerate() {
            match persist::read_dump(path) {
                Ok(article) => {
                    self.upsert_article(article)?;
                    stats.loaded += 1;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping dump file");
                    stats.failed += 1;
                }
            }
            if (i != 0 && i % 1000 == 0) || i + 1 == files.len() {
                info!(processed = i + 1, of = files.len(), "restoring dump files");
            }
        }
        Ok(stats)
    }
}

fn with_comments(query: Query) -> Query {
    query.join(Namespace::Comments.as_str(), COMMENTS_RELATION, "id", "post_id")
}

fn upsert<T: Entity, S: Store>(store: &S, entity: &T) -> Result<()> {
    let doc = serde_json::to_value(entity).map_err(StoreError::from)?;
    store.upsert(T::NAMESPACE.as_str(), doc)?;
    Ok(())
}
