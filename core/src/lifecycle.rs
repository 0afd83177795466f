//! Readiness lifecycle: `Uninitialized -> Initializing -> Ready -> Closed`, and
//! `Closed -> Initializing` again on resync.
//!
//! The lifecycle state, the store handle and the ranking config sit behind one
//! read/write lock. Reads hold a shared permit for their whole run; every
//! transition and every config update holds the exclusive permit.

use crate::dsl::DslPolicy;
use crate::error::{Error, Result};
use crate::model::{Namespace, SEARCH_FIELD};
use crate::ranking::{RankingConfig, RepoConfig};
use crate::store::{Query, SledStore, Store, StoreError};
use parking_lot::{RwLock, RwLockReadGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Directory holding the store's data.
    pub storage_path: PathBuf,
    /// Ranking config file, read at init and rewritten on every config update.
    pub config_path: PathBuf,
    pub dsl: DslPolicy,
}

impl RepositoryOptions {
    pub fn new(storage_path: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self { storage_path: storage_path.into(), config_path: config_path.into(), dsl: DslPolicy::default() }
    }
}

pub type StoreOpener<S> = Box<dyn Fn(&Path) -> Result<S, StoreError> + Send + Sync>;

struct Inner<S> {
    state: Lifecycle,
    store: Option<Arc<S>>,
    config: RepoConfig,
}

/// Search repository over articles and comments.
pub struct Repository<S: Store = SledStore> {
    pub(crate) options: RepositoryOptions,
    opener: StoreOpener<S>,
    inner: RwLock<Inner<S>>,
    /// Mirrors `state == Ready` so readers can tell a lifecycle transition from a config update.
    ready: AtomicBool,
}

/// Shared permit held by a read for its whole run.
pub(crate) struct ReadPermit<'a, S> {
    guard: RwLockReadGuard<'a, Inner<S>>,
    store: Arc<S>,
}

impl<S> ReadPermit<'_, S> {
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn config(&self) -> &RepoConfig {
        &self.guard.config
    }
}

impl Repository<SledStore> {
    pub fn new(options: RepositoryOptions) -> Self {
        Self::with_opener(options, SledStore::open)
    }
}

impl<S: Store> Repository<S> {
    pub fn with_opener(options: RepositoryOptions, opener: impl Fn(&Path) -> Result<S, StoreError> + Send + Sync + 'static) -> Self {
        Self {
            options,
            opener: Box::new(opener),
            inner: RwLock::new(Inner { state: Lifecycle::Uninitialized, store: None, config: RepoConfig::default() }),
            ready: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn state(&self) -> Lifecycle {
        self.inner.read().state
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Open storage (once), load ranking config, open both namespaces and warm them up.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.init_locked(&mut inner)
    }

    /// Force the engine to build its full-text structures, then mark the repository ready.
    pub fn warm_up(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.warm_up_locked(&mut inner)
    }

    /// Stop serving reads and close both namespaces. The store handle is kept.
    pub fn done(&self) {
        self.stop_admitting_reads();
        let mut inner = self.inner.write();
        self.done_locked(&mut inner);
    }

    /// `done` followed by `init` under a single exclusive permit.
    pub fn resync(&self) -> Result<()> {
        self.stop_admitting_reads();
        let mut inner = self.inner.write();
        info!("resyncing repository");
        self.done_locked(&mut inner);
        self.init_locked(&mut inner)
    }

    /// `done` and release the store handle; the next `init` reopens storage.
    pub fn shutdown(&self) {
        self.stop_admitting_reads();
        let mut inner = self.inner.write();
        self.done_locked(&mut inner);
        inner.store = None;
    }

    /// Current ranking configuration of both namespaces.
    pub fn ranking_config(&self) -> Result<RepoConfig> {
        Ok(self.read_permit()?.config().clone())
    }

    /// Apply new ranking knobs to `namespace` and persist the whole config.
    ///
    /// If the config file cannot be written the engine is rolled back and the
    /// previous config stays in effect.
    pub fn set_config(&self, namespace: &str, cfg: RankingConfig) -> Result<()> {
        let ns: Namespace = namespace.parse()?;
        let mut inner = self.inner.write();
        let store = match (inner.state, inner.store.clone()) {
            (Lifecycle::Ready, Some(store)) => store,
            _ => return Err(Error::NotReady),
        };

        apply_ranking(&*store, ns, &cfg)?;
        let updated = inner.config.clone().with(ns, cfg);
        if let Err(err) = updated.save(&self.options.config_path) {
            if let Err(rollback) = apply_ranking(&*store, ns, inner.config.get(ns)) {
                warn!(namespace = %ns, error = %rollback, "failed to roll back ranking config");
            }
            return Err(err);
        }
        inner.config = updated;
        info!(namespace = %ns, "ranking config updated");
        Ok(())
    }

    pub(crate) fn read_permit(&self) -> Result<ReadPermit<'_, S>> {
        let guard = match self.inner.try_read() {
            Some(guard) => guard,
            // exclusive holder is a config update, not a lifecycle transition
            None if self.is_ready() => self.inner.read(),
            None => return Err(Error::NotReady),
        };
        match (guard.state, guard.store.clone()) {
            // a cleared mirror means a transition is queued behind in-flight reads
            (Lifecycle::Ready, Some(store)) if self.is_ready() => Ok(ReadPermit { guard, store }),
            _ => Err(Error::NotReady),
        }
    }

    /// Clear the ready mirror ahead of a transition, so new reads fail fast
    /// while the transition waits for in-flight reads to drain.
    fn stop_admitting_reads(&self) {
        self.ready.store(false, Ordering::Release);
    }

    fn set_state(&self, inner: &mut Inner<S>, state: Lifecycle) {
        inner.state = state;
        self.ready.store(state == Lifecycle::Ready, Ordering::Release);
    }

    fn init_locked(&self, inner: &mut Inner<S>) -> Result<()> {
        if inner.state == Lifecycle::Ready {
            return Ok(());
        }
        self.set_state(inner, Lifecycle::Initializing);

        if inner.store.is_none() {
            inner.store = Some(Arc::new((self.opener)(&self.options.storage_path)?));
        }
        let store = inner.store.clone().ok_or(Error::NotReady)?;

        let config = RepoConfig::load_or_default(&self.options.config_path);
        for ns in [Namespace::Comments, Namespace::Posts] {
            store.open_namespace(&ns.schema())?;
            apply_ranking(&*store, ns, config.get(ns))?;
        }
        inner.config = config;

        self.warm_up_locked(inner)
    }

    fn warm_up_locked(&self, inner: &mut Inner<S>) -> Result<()> {
        let store = inner.store.clone().ok_or(Error::NotReady)?;
        for ns in [Namespace::Comments, Namespace::Posts] {
            store.execute(&Query::new(ns.as_str()).matches(SEARCH_FIELD, ""))?;
        }
        self.set_state(inner, Lifecycle::Ready);
        info!("repository ready");
        Ok(())
    }

    fn done_locked(&self, inner: &mut Inner<S>) {
        // flag first: nothing may sample "ready" while namespaces are closing
        self.set_state(inner, Lifecycle::Closed);
        if let Some(store) = &inner.store {
            for ns in [Namespace::Posts, Namespace::Comments] {
                if let Err(err) = store.close_namespace(ns.as_str()) {
                    warn!(namespace = %ns, error = %err, "failed to close namespace");
                }
            }
        }
        info!("repository closed");
    }
}

fn apply_ranking<S: Store>(store: &S, ns: Namespace, cfg: &RankingConfig) -> Result<(), StoreError> {
    store.configure_index(ns.as_str(), SEARCH_FIELD, &cfg.index_config(ns))
}
