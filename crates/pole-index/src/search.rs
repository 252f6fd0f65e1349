use std::time::Duration;

use crate::document::Field;
use crate::query::Query;

/// A fully-specified search over one index.
///
/// Built with the chained constructor the engine exposes:
/// `SearchRequest::top_n(limit, query).with_standard_aggregations()
/// .include_locations().set_from(offset).sort_by(order).explain_scores()`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    pub offset: usize,
    pub limit: usize,
    /// Field names; a leading `-` sorts descending. Empty sorts by score.
    pub order_by: Vec<String>,
    pub aggregations: bool,
    pub include_locations: bool,
    pub explain_scores: bool,
}

impl SearchRequest {
    pub fn top_n(limit: usize, query: Query) -> SearchRequest {
        SearchRequest {
            query,
            offset: 0,
            limit,
            order_by: Vec::new(),
            aggregations: false,
            include_locations: false,
            explain_scores: false,
        }
    }

    pub fn with_standard_aggregations(mut self) -> SearchRequest {
        self.aggregations = true;
        self
    }

    pub fn include_locations(mut self) -> SearchRequest {
        self.include_locations = true;
        self
    }

    pub fn set_from(mut self, offset: usize) -> SearchRequest {
        self.offset = offset;
        self
    }

    pub fn sort_by(mut self, order_by: Vec<String>) -> SearchRequest {
        self.order_by = order_by;
        self
    }

    pub fn explain_scores(mut self) -> SearchRequest {
        self.explain_scores = true;
        self
    }
}

/// One matching document with its stored fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub score: f64,
    pub fields: Vec<Field>,
}

/// The outcome of a search: the page of hits plus the aggregates over the
/// whole match set.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    /// Number of matching documents before pagination.
    pub total: u64,
    pub max_score: f64,
    pub took: Duration,
    pub hits: Vec<Hit>,
}

impl SearchResults {
    pub fn iter(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter()
    }
}
