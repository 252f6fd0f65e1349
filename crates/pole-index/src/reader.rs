use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use pole_types::IDENTIFIER_FIELD;

use crate::directory::Directory;
use crate::document::{Field, FieldFlags, FieldKind};
use crate::error::Result;
use crate::query::{glob_match, Query};
use crate::search::{Hit, SearchRequest, SearchResults};
use crate::segment::{Segment, SEGMENT_KIND};

/// A point-in-time view over one index.
///
/// Opening a reader folds every segment in epoch order (later segments
/// overshadow earlier ones) and builds the in-memory term and numeric
/// indexes queries run against. A reader never observes writes that happen
/// after it was opened; the registry swaps in a fresh one after every
/// mutating batch.
#[derive(Clone, Debug)]
pub struct Reader {
    inner: Arc<ReaderInner>,
}

#[derive(Debug)]
struct ReaderInner {
    index: String,
    /// live documents: id → fields
    docs: BTreeMap<String, Vec<Field>>,
    /// field → term → ids, one entry per occurrence
    terms: HashMap<String, HashMap<String, Vec<String>>>,
    /// field → (value, id)
    numerics: HashMap<String, Vec<(f64, String)>>,
}

impl Reader {
    pub fn open(dir: &Arc<dyn Directory>, index: &str) -> Result<Reader> {
        dir.setup(true)?;

        let mut docs: BTreeMap<String, Vec<Field>> = BTreeMap::new();
        for epoch in dir.list(SEGMENT_KIND)? {
            let segment = Segment::decode(&dir.load(SEGMENT_KIND, epoch)?)?;
            for doc in segment.updates {
                docs.insert(doc.id, doc.fields);
            }
            for id in segment.deletes {
                docs.remove(&id);
            }
        }

        let mut terms: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        let mut numerics: HashMap<String, Vec<(f64, String)>> = HashMap::new();
        for (id, fields) in &docs {
            for field in fields {
                if !field.flags.contains(FieldFlags::INDEX) {
                    continue;
                }
                match field.kind {
                    FieldKind::Text => {
                        if let Some(text) = field.as_text() {
                            let postings = terms.entry(field.name.clone()).or_default();
                            for token in tokenize(text) {
                                postings.entry(token).or_default().push(id.clone());
                            }
                        }
                    }
                    FieldKind::Numeric => {
                        if let Some(value) = field.as_numeric() {
                            numerics
                                .entry(field.name.clone())
                                .or_default()
                                .push((value, id.clone()));
                        }
                    }
                }
            }
        }

        tracing::debug!(index, docs = docs.len(), "opened reader");
        Ok(Reader { inner: Arc::new(ReaderInner { index: index.to_string(), docs, terms, numerics }) })
    }

    pub fn index(&self) -> &str {
        &self.inner.index
    }

    pub fn doc_count(&self) -> u64 {
        self.inner.docs.len() as u64
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let start = Instant::now();
        let matched = self.eval(&request.query);

        let total = matched.len() as u64;
        let max_score = matched.values().fold(0.0f64, |acc, &score| acc.max(score));

        let mut ordered: Vec<(String, f64)> = matched.into_iter().collect();
        if request.order_by.is_empty() {
            ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        } else {
            ordered.sort_by(|a, b| self.compare(&request.order_by, &a.0, &b.0));
        }

        let hits = ordered
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .map(|(id, score)| {
                let fields = self
                    .inner
                    .docs
                    .get(&id)
                    .map(|fields| {
                        fields
                            .iter()
                            .filter(|field| field.flags.contains(FieldFlags::STORE))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                Hit { id, score, fields }
            })
            .collect();

        Ok(SearchResults { total, max_score, took: start.elapsed(), hits })
    }

    fn eval(&self, query: &Query) -> BTreeMap<String, f64> {
        let inner = &self.inner;
        let mut scores = BTreeMap::new();
        match query {
            Query::MatchAll => {
                for id in inner.docs.keys() {
                    scores.insert(id.clone(), 1.0);
                }
            }
            Query::Term { field, term } => {
                if field == IDENTIFIER_FIELD {
                    if inner.docs.contains_key(term) {
                        scores.insert(term.clone(), 1.0);
                    }
                } else if let Some(ids) = inner.terms.get(field).and_then(|p| p.get(term)) {
                    for id in ids {
                        *scores.entry(id.clone()).or_insert(0.0) += 1.0;
                    }
                }
            }
            Query::Match { field, text } => {
                if field == IDENTIFIER_FIELD {
                    if inner.docs.contains_key(text) {
                        scores.insert(text.clone(), 1.0);
                    }
                } else if let Some(postings) = inner.terms.get(field) {
                    for token in tokenize(text) {
                        if let Some(ids) = postings.get(&token) {
                            for id in ids {
                                *scores.entry(id.clone()).or_insert(0.0) += 1.0;
                            }
                        }
                    }
                }
            }
            Query::Wildcard { field, pattern } => {
                if field == IDENTIFIER_FIELD {
                    for id in inner.docs.keys() {
                        if glob_match(pattern, id) {
                            scores.insert(id.clone(), 1.0);
                        }
                    }
                } else if let Some(postings) = inner.terms.get(field) {
                    let pattern = pattern.to_lowercase();
                    for (term, ids) in postings {
                        if glob_match(&pattern, term) {
                            for id in ids {
                                *scores.entry(id.clone()).or_insert(0.0) += 1.0;
                            }
                        }
                    }
                }
            }
            Query::Range { field, min, max } => {
                if let Some(values) = inner.numerics.get(field) {
                    for (value, id) in values {
                        if *value >= *min && *value <= *max {
                            scores.insert(id.clone(), 1.0);
                        }
                    }
                }
            }
            Query::Boolean { must, should, must_not } => {
                let mut acc: Option<BTreeMap<String, f64>> = None;
                for query in must {
                    let matches = self.eval(query);
                    acc = Some(match acc {
                        None => matches,
                        Some(prev) => prev
                            .into_iter()
                            .filter_map(|(id, score)| {
                                matches.get(&id).map(|extra| (id, score + extra))
                            })
                            .collect(),
                    });
                }
                if !should.is_empty() {
                    let mut union = BTreeMap::new();
                    for query in should {
                        for (id, score) in self.eval(query) {
                            *union.entry(id).or_insert(0.0) += score;
                        }
                    }
                    acc = Some(match acc {
                        // pure disjunction
                        None => union,
                        // optional clauses only sweeten scores of must-matches
                        Some(mut required) => {
                            for (id, score) in union {
                                if let Some(existing) = required.get_mut(&id) {
                                    *existing += score;
                                }
                            }
                            required
                        }
                    });
                }
                let mut result = acc.unwrap_or_else(|| {
                    if must_not.is_empty() {
                        BTreeMap::new()
                    } else {
                        // pure negation ranges over every live document
                        inner.docs.keys().map(|id| (id.clone(), 1.0)).collect()
                    }
                });
                for query in must_not {
                    for id in self.eval(query).keys() {
                        result.remove(id);
                    }
                }
                scores = result;
            }
        }
        scores
    }

    fn compare(&self, order_by: &[String], left: &str, right: &str) -> Ordering {
        for key in order_by {
            let (field, descending) = match key.strip_prefix('-') {
                Some(field) => (field, true),
                None => (key.as_str(), false),
            };
            let ord = cmp_keys(&self.sort_key(left, field), &self.sort_key(right, field));
            let ord = if descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        left.cmp(right)
    }

    fn sort_key(&self, id: &str, field: &str) -> SortKey {
        if field == IDENTIFIER_FIELD {
            return SortKey::Str(id.to_string());
        }
        let Some(fields) = self.inner.docs.get(id) else { return SortKey::Missing };
        match fields.iter().find(|f| f.name == field) {
            Some(field) => match field.kind {
                FieldKind::Numeric => {
                    field.as_numeric().map(SortKey::Num).unwrap_or(SortKey::Missing)
                }
                FieldKind::Text => field
                    .as_text()
                    .map(|text| SortKey::Str(text.to_string()))
                    .unwrap_or(SortKey::Missing),
            },
            None => SortKey::Missing,
        }
    }
}

enum SortKey {
    Num(f64),
    Str(String),
    Missing,
}

fn cmp_keys(left: &SortKey, right: &SortKey) -> Ordering {
    match (left, right) {
        (SortKey::Num(a), SortKey::Num(b)) => a.total_cmp(b),
        (SortKey::Str(a), SortKey::Str(b)) => a.cmp(b),
        (SortKey::Num(_), SortKey::Str(_)) => Ordering::Less,
        (SortKey::Str(_), SortKey::Num(_)) => Ordering::Greater,
        (SortKey::Missing, SortKey::Missing) => Ordering::Equal,
        (SortKey::Missing, _) => Ordering::Greater,
        (_, SortKey::Missing) => Ordering::Less,
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
