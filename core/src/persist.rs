//! Dump files: one JSON document per article with its comments embedded.

use crate::model::{derive_comment_id, Article, ArticleId, Comment, CommentId};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct DumpedComment {
    id: Option<CommentId>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    likes: i64,
}

#[derive(Debug, Deserialize)]
struct DumpedArticle {
    #[serde(flatten)]
    article: Article,
    #[serde(default)]
    comments: Vec<DumpedComment>,
}

impl DumpedArticle {
    fn into_article(self) -> Article {
        let id = self.article.id;
        let comments = self
            .comments
            .into_iter()
            .enumerate()
            .map(|(pos, c)| Comment {
                id: c.id.unwrap_or_else(|| derive_comment_id(id, pos)),
                article_id: id,
                text: c.text,
                user: c.user,
                time: c.time,
                likes: c.likes,
            })
            .collect();
        Article { comments, ..self.article }
    }
}

pub fn dump_file(dir: &Path, id: ArticleId) -> PathBuf {
    dir.join(format!("{id}.json"))
}

pub fn read_dump(path: &Path) -> Result<Article> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let dumped: DumpedArticle = serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(dumped.into_article())
}

pub fn write_dump(dir: &Path, article: &Article) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dump_file(dir, article.id);
    fs::write(&path, serde_json::to_vec(article)?)?;
    Ok(path)
}

/// Every `.json` file under `dir`, sorted by path.
pub fn dump_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("dump directory {} does not exist", dir.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Existing dump files for ids in `start..finish`.
pub fn dump_range(dir: &Path, start: ArticleId, finish: ArticleId) -> Vec<PathBuf> {
    (start..finish).map(|id| dump_file(dir, id)).filter(|p| p.is_file()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_comment_ids_are_derived() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("42.json");
        fs::write(
            &path,
            r#"{"id":42,"time":1,"title":"t","text":"b","user":"u","views":3,
                "comments":[{"text":"a","user":"x"},{"id":9001,"text":"b","user":"y","likes":2},{"text":"c","user":"z"}]}"#,
        )
        .unwrap();
        let article = read_dump(&path).unwrap();
        let ids: Vec<i64> = article.comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![42_000, 9001, 42_002]);
        assert!(article.comments.iter().all(|c| c.article_id == 42));
        assert_eq!(article.comments[1].likes, 2);
        assert_eq!(article.views, 3);
    }

    #[test]
    fn huge_article_id_does_not_overflow_comment_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.json");
        fs::write(&path, format!(r#"{{"id":{},"comments":[{{"text":"a"}}]}}"#, i64::MAX)).unwrap();
        let article = read_dump(&path).unwrap();
        assert_eq!(article.comments[0].id, i64::MAX);
        assert_eq!(article.comments[0].article_id, i64::MAX);
    }

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let article = Article {
            id: 7,
            title: "title".into(),
            comments: vec![Comment { id: 1, article_id: 7, text: "hi".into(), ..Default::default() }],
            ..Default::default()
        };
        let path = write_dump(dir.path(), &article).unwrap();
        assert_eq!(path, dump_file(dir.path(), 7));
        assert_eq!(read_dump(&path).unwrap(), article);
    }

    #[test]
    fn lists_files_and_ranges() {
        let dir = tempdir().unwrap();
        for id in [3, 1, 2] {
            write_dump(dir.path(), &Article { id, ..Default::default() }).unwrap();
        }
        fs::write(dir.path().join("1.jpeg"), b"img").unwrap();
        let files = dump_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("1.json"));
        assert_eq!(dump_range(dir.path(), 2, 10).len(), 2);
        assert!(dump_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn broken_dump_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.json");
        fs::write(&path, "[]").unwrap();
        assert!(read_dump(&path).is_err());
    }
}
