pub mod dialect;
pub mod row;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use sqlite::SqliteCatalog;

/// Read-only projection of one catalog row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    pub book_id: i64,
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub publish_date: Option<NaiveDate>,
    pub isbn: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
    pub description: Option<String>,
}

impl BookRecord {
    /// One-line rendering used in summaries fed back to the model.
    pub fn summary_line(&self) -> String {
        format!(
            "- [{}] \"{}\" by {}, price {:.2}, stock {}",
            self.book_id, self.title, self.author, self.price, self.stock
        )
    }

    pub fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// One loan of a book, joined with the book's title.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRecord {
    pub record_id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub user_id: i64,
    pub borrow_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub status: String,
}

impl BorrowRecord {
    pub fn summary_line(&self) -> String {
        let day = |d: Option<NaiveDate>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".into())
        };
        format!(
            "- record {}: \"{}\" (book {}) borrowed by user {} on {}, returned {}, status {}",
            self.record_id,
            self.book_title,
            self.book_id,
            self.user_id,
            day(self.borrow_date),
            day(self.return_date),
            if self.status.is_empty() { "unknown" } else { &self.status },
        )
    }
}

/// Strategy for the recommendation query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecommendFilter {
    /// Random books whose category matches.
    Category(String),
    /// Books by a matching author, newest first.
    Author(String),
    /// Random books that are in stock.
    InStock,
}

impl RecommendFilter {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Category(_) => "category",
            Self::Author(_) => "author",
            Self::InStock => "random",
        }
    }
}

/// The data store the capabilities read from.
///
/// Implementations must never mutate the catalog.  `execute_select` receives
/// text that has already passed the query gate and must still enforce the
/// timeout itself.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Case-insensitive substring match over title, author and category.
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<BookRecord>>;

    async fn get_by_id(&self, book_id: i64) -> Result<Option<BookRecord>>;

    async fn recommend(&self, filter: &RecommendFilter, limit: usize) -> Result<Vec<BookRecord>>;

    /// Loans filtered by book and/or user, most recent first.
    async fn borrow_records(
        &self,
        book_id: Option<i64>,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<BorrowRecord>>;

    /// Run a single read-only statement.  Timeouts and store errors surface
    /// as `BookAgentError::ExecutionFailure`.
    async fn execute_select(&self, sql: &str, timeout: Duration) -> Result<Vec<BookRecord>>;

    /// Cheap liveness check for health checks.
    async fn ping(&self) -> bool;
}
