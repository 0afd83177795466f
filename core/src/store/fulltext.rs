//! Full-text matching and ranking for compiled query markup.
//!
//! Markup shape: an optional `@field^boost,...` list followed by terms.
//! `+term` is required, `*term` matches inside words, `term*` matches word
//! prefixes and `term~` tolerates typos.

use super::{FtIndexConfig, Snippet};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"[\p{Alphabetic}0-9][\p{Alphabetic}0-9\-+/]*").expect("valid regex");
}

const BM25_K1: f64 = 2.0;
const BM25_B: f64 = 0.75;
const TYPO_PENALTY: f64 = 0.2;

/// A word located in source text, with its folded form.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub start: usize,
    pub end: usize,
    pub folded: String,
}

pub fn fold(word: &str) -> String {
    word.nfkc().collect::<String>().to_lowercase()
}

pub fn words(text: &str) -> impl Iterator<Item = Word> + '_ {
    WORD_RE.find_iter(text).map(|m| Word { start: m.start(), end: m.end(), folded: fold(m.as_str()) })
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldBoosts {
    default: Option<f64>,
    fields: Vec<(String, f64)>,
}

impl FieldBoosts {
    fn all() -> Self {
        Self { default: Some(1.0), fields: Vec::new() }
    }

    /// Parse `*^0.4,user^1.0,title`. Fields not listed (and not covered by `*`) are not searched.
    pub fn parse(list: &str) -> Self {
        let mut boosts = Self { default: None, fields: Vec::new() };
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, boost) = match part.split_once('^') {
                Some((name, b)) => (name, b.parse().unwrap_or(1.0)),
                None => (part, 1.0),
            };
            if name == "*" {
                boosts.default = Some(boost);
            } else {
                boosts.fields.push((name.to_string(), boost));
            }
        }
        boosts
    }

    pub fn boost(&self, field: &str) -> Option<f64> {
        self.fields.iter().find(|(name, _)| name == field).map(|(_, b)| *b).or(self.default)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FtTerm {
    pub text: String,
    pub required: bool,
    pub substring: bool,
    pub prefix: bool,
    pub typos: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FtQuery {
    pub boosts: FieldBoosts,
    pub terms: Vec<FtTerm>,
}

impl FtQuery {
    pub fn parse(dsl: &str) -> Self {
        let mut boosts = FieldBoosts::all();
        let mut terms = Vec::new();
        for raw in dsl.split_whitespace() {
            if let Some(list) = raw.strip_prefix('@') {
                boosts = FieldBoosts::parse(list);
                continue;
            }
            let (required, t) = strip(raw.strip_prefix('+'), raw);
            let (substring, t) = strip(t.strip_prefix('*'), t);
            let (prefix, t) = strip(t.strip_suffix('*'), t);
            let (typos, t) = strip(t.strip_suffix('~'), t);
            if t.is_empty() {
                continue;
            }
            terms.push(FtTerm { text: fold(t), required, substring, prefix, typos });
        }
        Self { boosts, terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Best quality with which `word` satisfies `term`, if at all.
    pub fn match_quality(term: &FtTerm, word: &str, config: &FtIndexConfig) -> Option<f64> {
        if word == term.text {
            return Some(1.0);
        }
        let partial = 1.0 - config.partial_match_decrease;
        if term.prefix && word.starts_with(&term.text) {
            return Some(partial);
        }
        if term.substring && word.contains(&term.text) {
            return Some(partial * partial);
        }
        if term.typos && config.max_typos_in_word > 0 {
            if let Some(d) = levenshtein_within(&term.text, word, config.max_typos_in_word as usize) {
                return Some(partial * (1.0 - TYPO_PENALTY * d as f64));
            }
        }
        None
    }

    fn matches_any(&self, word: &str, config: &FtIndexConfig) -> bool {
        self.terms.iter().any(|t| Self::match_quality(t, word, config).is_some())
    }
}

fn strip<'a>(stripped: Option<&'a str>, orig: &'a str) -> (bool, &'a str) {
    match stripped {
        Some(rest) => (true, rest),
        None => (false, orig),
    }
}

/// Edit distance between `a` and `b` when it is at most `max`.
pub fn levenshtein_within(a: &str, b: &str, max: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max {
        return None;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        let mut row_min = cur[0];
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
            row_min = row_min.min(cur[j]);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    Some(prev[b.len()]).filter(|d| *d <= max)
}

/// Folded words of the fields making up one composite index, per document.
#[derive(Debug, Clone, Default)]
pub struct DocText {
    pub fields: Vec<(String, Vec<String>)>,
    pub len: usize,
}

impl DocText {
    pub fn from_doc(doc: &Value, fields: &[String]) -> Self {
        let mut out = DocText::default();
        for field in fields {
            let folded: Vec<String> = match doc.get(field) {
                Some(Value::String(s)) => words(s).map(|w| w.folded).collect(),
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).flat_map(|s| words(s).map(|w| w.folded)).collect(),
                _ => Vec::new(),
            };
            out.len += folded.len();
            out.fields.push((field.clone(), folded));
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct TermHit {
    weight: f64,
    tf: usize,
    field: usize,
    pos: usize,
}

/// Rank `candidates` (indexes into `docs`) against `query`.
///
/// Returns matching documents with their relevancy relative to the best hit,
/// dropping those under `min_relevancy`. Order follows `candidates`.
pub fn search(query: &FtQuery, config: &FtIndexConfig, docs: &[DocText], candidates: &[usize]) -> Vec<(usize, f64)> {
    if query.is_empty() {
        return Vec::new();
    }

    let mut matched: Vec<(usize, Vec<Option<TermHit>>)> = Vec::new();
    for &idx in candidates {
        let doc = &docs[idx];
        let hits: Vec<Option<TermHit>> = query.terms.iter().map(|t| term_hit(query, t, doc, config)).collect();
        let required_ok = query.terms.iter().zip(&hits).all(|(t, h)| !t.required || h.is_some());
        if required_ok && hits.iter().any(Option::is_some) {
            matched.push((idx, hits));
        }
    }
    if matched.is_empty() {
        return Vec::new();
    }

    let n = matched.len() as f64;
    let mut df = vec![0usize; query.terms.len()];
    for (_, hits) in &matched {
        for (i, h) in hits.iter().enumerate() {
            if h.is_some() {
                df[i] += 1;
            }
        }
    }
    let avg_len = (matched.iter().map(|(idx, _)| docs[*idx].len).sum::<usize>() as f64 / n).max(1.0);

    let mut ranked: Vec<(usize, f64)> = matched
        .iter()
        .map(|(idx, hits)| {
            let doc_len = docs[*idx].len as f64;
            let mut rank = 0.0;
            for (i, hit) in hits.iter().enumerate() {
                let Some(hit) = hit else { continue };
                let df_t = df[i] as f64;
                let idf = (1.0 + (n - df_t + 0.5) / (df_t + 0.5)).ln();
                let tf = hit.tf as f64;
                let bm25 = idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len));
                let bm25_factor = (1.0 - config.bm25_weight) + config.bm25_weight * config.bm25_boost * bm25 / (1.0 + bm25);
                let term_len = query.terms[i].text.chars().count().min(10) as f64 / 10.0;
                let len_factor = (1.0 - config.term_len_weight) + config.term_len_weight * config.term_len_boost * term_len;
                rank += hit.weight * bm25_factor * len_factor;
            }
            (*idx, rank * distance_factor(hits, config))
        })
        .collect();

    let best = ranked.iter().map(|(_, r)| *r).fold(0.0, f64::max);
    if best <= 0.0 {
        return Vec::new();
    }
    for (_, r) in ranked.iter_mut() {
        *r /= best;
    }
    ranked.retain(|(_, r)| *r >= config.min_relevancy);
    ranked
}

fn term_hit(query: &FtQuery, term: &FtTerm, doc: &DocText, config: &FtIndexConfig) -> Option<TermHit> {
    let mut best: Option<TermHit> = None;
    let mut tf = 0;
    for (field_idx, (field, words)) in doc.fields.iter().enumerate() {
        let Some(boost) = query.boosts.boost(field).filter(|b| *b > 0.0) else { continue };
        for (pos, word) in words.iter().enumerate() {
            let Some(q) = FtQuery::match_quality(term, word, config) else { continue };
            tf += 1;
            let weight = q * boost;
            if best.map_or(true, |b| weight > b.weight) {
                best = Some(TermHit { weight, tf: 0, field: field_idx, pos });
            }
        }
    }
    best.map(|b| TermHit { tf, ..b })
}

/// Bonus for consecutive query terms found close together in the same field.
fn distance_factor(hits: &[Option<TermHit>], config: &FtIndexConfig) -> f64 {
    let found: Vec<&TermHit> = hits.iter().flatten().collect();
    if found.len() < 2 {
        return 1.0;
    }
    let proximity: f64 = found
        .windows(2)
        .map(|w| if w[0].field == w[1].field { 1.0 / w[0].pos.abs_diff(w[1].pos).max(1) as f64 } else { 0.0 })
        .sum::<f64>()
        / (found.len() - 1) as f64;
    (1.0 - config.distance_weight) + config.distance_weight * config.distance_boost * proximity
}

/// Replace `text` by highlighted excerpts around words matching `query`.
pub fn snippet(text: &str, query: &FtQuery, config: &FtIndexConfig, opts: &Snippet) -> String {
    let spans: Vec<(usize, usize)> =
        words(text).filter(|w| query.matches_any(&w.folded, config)).map(|w| (w.start, w.end)).collect();

    if spans.is_empty() {
        let end = forward_chars(text, 0, opts.before + opts.after);
        return if end < text.len() { format!("{}{}", &text[..end], opts.right_bound) } else { text.to_string() };
    }

    let mut areas: Vec<(usize, usize, Vec<(usize, usize)>)> = Vec::new();
    for (s, e) in spans {
        let ws = back_chars(text, s, opts.before);
        let we = forward_chars(text, e, opts.after);
        if let Some(last) = areas.last_mut() {
            if ws <= last.1 {
                last.1 = last.1.max(we);
                last.2.push((s, e));
                continue;
            }
        }
        areas.push((ws, we, vec![(s, e)]));
    }

    let mut out = String::new();
    for (ws, we, marks) in areas {
        out.push_str(&opts.left_bound);
        let mut cursor = ws;
        for (s, e) in marks {
            out.push_str(&text[cursor..s]);
            out.push_str(&opts.pre);
            out.push_str(&text[s..e]);
            out.push_str(&opts.post);
            cursor = e;
        }
        out.push_str(&text[cursor..we]);
        out.push_str(&opts.right_bound);
    }
    out
}

fn back_chars(text: &str, from: usize, n: usize) -> usize {
    text[..from].char_indices().rev().take(n).last().map_or(from, |(i, _)| i)
}

fn forward_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..].char_indices().nth(n).map_or(text.len(), |(i, _)| from + i)
}
