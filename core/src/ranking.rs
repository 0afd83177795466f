//! Per-namespace ranking configuration and its config file.

use crate::error::{Error, Result};
use crate::model::Namespace;
use crate::store::FtIndexConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Ranking knobs for one namespace. Every field is required on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub bm25_boost: f64,
    pub bm25_weight: f64,
    pub distance_boost: f64,
    pub distance_weight: f64,
    pub term_len_boost: f64,
    pub term_len_weight: f64,
    pub min_relevancy: f64,
    /// Field boosts handed to the compiler, e.g. `user^1.0,title^1.6`.
    pub fields: String,
}

impl RankingConfig {
    pub fn posts() -> Self {
        Self { fields: "*^0.4,user^1.0,title^1.6".to_string(), ..Self::comments() }
    }

    pub fn comments() -> Self {
        Self {
            bm25_boost: 0.1,
            bm25_weight: 0.3,
            distance_boost: 2.0,
            distance_weight: 0.5,
            term_len_boost: 1.0,
            term_len_weight: 0.3,
            min_relevancy: 0.2,
            fields: String::new(),
        }
    }

    pub fn defaults_for(ns: Namespace) -> Self {
        match ns {
            Namespace::Posts => Self::posts(),
            Namespace::Comments => Self::comments(),
        }
    }

    /// Overlay these knobs on the engine defaults. Term-length tuning applies to posts only.
    pub fn index_config(&self, ns: Namespace) -> FtIndexConfig {
        let mut cfg = FtIndexConfig {
            max_typos_in_word: 1,
            bm25_boost: self.bm25_boost,
            bm25_weight: self.bm25_weight,
            distance_boost: self.distance_boost,
            distance_weight: self.distance_weight,
            min_relevancy: self.min_relevancy,
            ..FtIndexConfig::default()
        };
        if ns == Namespace::Posts {
            cfg.term_len_boost = self.term_len_boost;
            cfg.term_len_weight = self.term_len_weight;
        }
        cfg
    }
}

/// Ranking configuration of both namespaces, as stored in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub posts: RankingConfig,
    pub comments: RankingConfig,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self { posts: RankingConfig::posts(), comments: RankingConfig::comments() }
    }
}

impl RepoConfig {
    pub fn get(&self, ns: Namespace) -> &RankingConfig {
        match ns {
            Namespace::Posts => &self.posts,
            Namespace::Comments => &self.comments,
        }
    }

    pub fn with(mut self, ns: Namespace, cfg: RankingConfig) -> Self {
        match ns {
            Namespace::Posts => self.posts = cfg,
            Namespace::Comments => self.comments = cfg,
        }
        self
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Load the config file, falling back to defaults when it is missing or unparsable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "using default ranking config");
                Self::default()
            }
        }
    }

    /// Write via a temp file and rename, so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let persist_err = |source: io::Error| Error::Persistence { path: path.to_path_buf(), source };
        let data = serde_json::to_vec_pretty(self).map_err(|e| persist_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let tmp = tmp_path(path);
        fs::write(&tmp, &data).map_err(persist_err)?;
        fs::rename(&tmp, path).map_err(persist_err)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
