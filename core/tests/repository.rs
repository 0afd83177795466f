use habrsearch_core::persist::write_dump;
use habrsearch_core::{
    Article, Comment, Error, Lifecycle, ListRequest, Namespace, RankingConfig, RepoConfig, Repository, RepositoryOptions,
    SearchRequest,
};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::{tempdir, TempDir};

fn open_repo() -> (Repository, TempDir) {
    let dir = tempdir().unwrap();
    let repo = Repository::new(RepositoryOptions::new(dir.path().join("db"), dir.path().join("repo.cfg")));
    repo.init().unwrap();
    (repo, dir)
}

fn article(id: i64, time: i64, user: &str, title: &str, text: &str) -> Article {
    Article { id, time, user: user.into(), title: title.into(), text: text.into(), ..Default::default() }
}

fn seed(repo: &Repository, n: i64) {
    for i in 0..n {
        // insert out of time order so sorting is observable
        let time = 1_000 + (n - i) * 10;
        let user = if i % 2 == 0 { "alice" } else { "bob" };
        repo.upsert_article(article(i + 1, time, user, &format!("Post number {i}"), "generic body")).unwrap();
    }
}

#[test]
fn list_articles_pages_in_time_order_with_total() {
    let (repo, _dir) = open_repo();
    seed(&repo, 25);

    let res = repo.list_articles(&ListRequest::default()).unwrap();
    assert_eq!(res.items.len(), 20);
    assert_eq!(res.total, 25);
    assert!(res.items.windows(2).all(|w| w[0].time <= w[1].time));

    let next = repo
        .list_articles(&ListRequest { page: habrsearch_core::Page::new(Some(20), Some(20)), ..ListRequest::default() })
        .unwrap();
    assert_eq!(next.items.len(), 5);
    assert!(next.items[0].time >= res.items[19].time);
}

#[test]
fn list_articles_filters_author_and_range() {
    let (repo, _dir) = open_repo();
    seed(&repo, 10);
    let req = ListRequest { author: Some("alice".into()), start_time: Some(1_030), end_time: Some(1_080), ..ListRequest::default() };
    let res = repo.list_articles(&req).unwrap();
    assert!(!res.items.is_empty());
    assert!(res.items.iter().all(|a| a.user == "alice" && (1_030..=1_080).contains(&a.time)));
    assert_eq!(res.total, res.items.len());
}

#[test]
fn get_article_joins_comments() {
    let (repo, _dir) = open_repo();
    let mut a = article(7, 100, "alice", "Rust ownership", "borrow checker");
    a.comments = vec![
        Comment { id: 70, text: "great".into(), user: "bob".into(), ..Default::default() },
        Comment { id: 71, text: "thanks".into(), user: "carol".into(), ..Default::default() },
    ];
    repo.upsert_article(a).unwrap();

    let bare = repo.get_article(7, false).unwrap();
    assert!(bare.comments.is_empty());
    let full = repo.get_article(7, true).unwrap();
    assert_eq!(full.comments.len(), 2);
    assert!(full.comments.iter().all(|c| c.article_id == 7));

    assert!(repo.get_article(8, false).unwrap_err().is_not_found());
}

#[test]
fn search_finds_and_highlights() {
    let (repo, _dir) = open_repo();
    repo.upsert_article(article(1, 10, "alice", "Rust ownership", "borrowing rules in rust explained")).unwrap();
    repo.upsert_article(article(2, 20, "bob", "Golang channels", "goroutines and select")).unwrap();
    repo.upsert_article(article(3, 30, "carol", "Cooking", "pasta recipes")).unwrap();

    let res = repo.search_articles(&SearchRequest::new("rust")).unwrap();
    assert_eq!(res.total, 1);
    assert_eq!(res.items[0].id, 1);
    assert!(res.items[0].text.contains("<b>rust</b>"));

    let res = repo.search_articles(&SearchRequest::new("golang")).unwrap();
    assert_eq!(res.items.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2]);

    // a lone two-letter term is not searched at all
    let res = repo.search_articles(&SearchRequest::new("go")).unwrap();
    assert_eq!(res.total, 0);
}

#[test]
fn search_comments_uses_comment_namespace() {
    let (repo, _dir) = open_repo();
    let mut a = article(5, 10, "alice", "Anything", "body");
    a.comments = vec![Comment { id: 50, text: "tokio runtime is great".into(), user: "dave".into(), ..Default::default() }];
    repo.upsert_article(a).unwrap();

    let res = repo.search_comments(&SearchRequest::new("tokio").sort_by("time", true)).unwrap();
    assert_eq!(res.total, 1);
    assert_eq!(res.items[0].id, 50);
    assert_eq!(res.items[0].article_id, 5);
}

#[test]
fn reads_fail_fast_until_init_and_after_done() {
    let dir = tempdir().unwrap();
    let repo = Repository::new(RepositoryOptions::new(dir.path().join("db"), dir.path().join("repo.cfg")));
    assert_eq!(repo.state(), Lifecycle::Uninitialized);
    assert!(matches!(repo.list_articles(&ListRequest::default()), Err(Error::NotReady)));

    repo.init().unwrap();
    assert_eq!(repo.state(), Lifecycle::Ready);
    repo.done();
    assert_eq!(repo.state(), Lifecycle::Closed);
    assert!(matches!(repo.search_comments(&SearchRequest::new("rust")), Err(Error::NotReady)));
    assert!(matches!(repo.get_article(1, false), Err(Error::NotReady)));
}

#[test]
fn resync_reopens_namespaces_with_fresh_data() {
    let (repo, _dir) = open_repo();
    seed(&repo, 3);
    assert_eq!(repo.search_articles(&SearchRequest::new("kotlin")).unwrap().total, 0);

    repo.upsert_article(article(99, 5, "zed", "Kotlin coroutines", "")).unwrap();
    repo.done();
    repo.init().unwrap();
    assert_eq!(repo.list_articles(&ListRequest::default()).unwrap().total, 4);
    assert_eq!(repo.search_articles(&SearchRequest::new("kotlin")).unwrap().items[0].id, 99);

    repo.resync().unwrap();
    assert!(repo.is_ready());
    assert_eq!(repo.get_article(99, false).unwrap().title, "Kotlin coroutines");
}

#[test]
fn shutdown_releases_storage_and_init_reopens_it() {
    let (repo, _dir) = open_repo();
    seed(&repo, 2);
    repo.shutdown();
    assert!(!repo.is_ready());
    repo.init().unwrap();
    assert_eq!(repo.list_articles(&ListRequest::default()).unwrap().total, 2);
}

#[test]
fn set_config_rejects_unknown_namespace_without_touching_file() {
    let (repo, dir) = open_repo();
    let path = dir.path().join("repo.cfg");
    repo.set_config("posts", RankingConfig::posts()).unwrap();
    let before = fs::read(&path).unwrap();

    let err = repo.set_config("unknown", RankingConfig::posts()).unwrap_err();
    assert!(matches!(err, Error::InvalidNamespace(ns) if ns == "unknown"));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn set_config_engine_failure_persists_nothing() {
    let (repo, dir) = open_repo();
    let path = dir.path().join("repo.cfg");
    let bad = RankingConfig { bm25_weight: 3.0, ..RankingConfig::comments() };
    assert!(matches!(repo.set_config("comments", bad), Err(Error::Engine(_))));
    assert!(!path.exists());
    assert_eq!(repo.ranking_config().unwrap(), RepoConfig::default());
}

#[test]
fn set_config_persists_and_survives_resync() {
    let (repo, dir) = open_repo();
    let path = dir.path().join("repo.cfg");
    let cfg = RankingConfig { fields: "title^2".into(), min_relevancy: 0.4, ..RankingConfig::posts() };
    repo.set_config("posts", cfg.clone()).unwrap();

    let on_disk = RepoConfig::load(&path).unwrap();
    assert_eq!(on_disk.posts, cfg);
    assert_eq!(on_disk.comments, RankingConfig::comments());

    repo.resync().unwrap();
    assert_eq!(repo.ranking_config().unwrap().get(Namespace::Posts), &cfg);
}

#[test]
fn set_config_persistence_failure_keeps_previous_config() {
    let dir = tempdir().unwrap();
    let repo = Repository::new(RepositoryOptions::new(dir.path().join("db"), dir.path().join("missing").join("repo.cfg")));
    repo.init().unwrap();
    let cfg = RankingConfig { min_relevancy: 0.9, ..RankingConfig::posts() };
    assert!(matches!(repo.set_config("posts", cfg), Err(Error::Persistence { .. })));
    assert_eq!(repo.ranking_config().unwrap(), RepoConfig::default());
}

#[test]
fn set_config_requires_ready() {
    let dir = tempdir().unwrap();
    let repo = Repository::new(RepositoryOptions::new(dir.path().join("db"), dir.path().join("repo.cfg")));
    assert!(matches!(repo.set_config("posts", RankingConfig::posts()), Err(Error::NotReady)));
}

#[test]
fn init_loads_persisted_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo.cfg");
    let custom = RepoConfig::default().with(Namespace::Comments, RankingConfig { fields: "text^3".into(), ..RankingConfig::comments() });
    custom.save(&path).unwrap();

    let repo = Repository::new(RepositoryOptions::new(dir.path().join("db"), &path));
    repo.init().unwrap();
    assert_eq!(repo.ranking_config().unwrap(), custom);
}

#[test]
fn restore_loads_dumps_and_counts_failures() {
    let (repo, dir) = open_repo();
    let dumps = dir.path().join("dumps");
    for id in 1..=3 {
        let mut a = article(id, id * 10, "alice", "t", "b");
        a.comments = vec![Comment { id: 0, text: "c".into(), ..Default::default() }];
        a.comments[0].id = id * 1000;
        write_dump(&dumps, &a).unwrap();
    }
    fs::write(dumps.join("4.json"), "not json").unwrap();

    let stats = repo.restore(habrsearch_core::persist::dump_files(&dumps).unwrap()).unwrap();
    assert_eq!(stats.loaded, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(repo.list_articles(&ListRequest::default()).unwrap().total, 3);
    assert_eq!(repo.get_article(2, true).unwrap().comments[0].id, 2000);
}

#[test]
fn concurrent_reads_during_resync_never_see_half_open_store() {
    let (repo, _dir) = open_repo();
    seed(&repo, 5);
    let repo = Arc::new(repo);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let repo = repo.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    match repo.list_articles(&ListRequest::default()) {
                        Ok(res) => assert_eq!(res.total, 5),
                        Err(Error::NotReady) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();

    for _ in 0..10 {
        repo.resync().unwrap();
    }
    for r in readers {
        r.join().unwrap();
    }
    assert!(repo.is_ready());
}
