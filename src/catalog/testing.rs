//! Test doubles for `CatalogStore`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{BookRecord, BorrowRecord, CatalogStore, RecommendFilter, SqliteCatalog};
use crate::db;
use crate::error::Result;

/// Seeded SQLite catalog that counts every call reaching it.
pub struct CountingStore {
    inner: SqliteCatalog,
    calls: AtomicUsize,
    executed: AtomicUsize,
}

impl CountingStore {
    pub fn seeded() -> Self {
        Self {
            inner: SqliteCatalog::new(db::seeded_test_db(), 200),
            calls: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
        }
    }

    /// Calls of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `execute_select` calls only.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for CountingStore {
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<BookRecord>> {
        self.hit();
        self.inner.search(keyword, limit).await
    }

    async fn get_by_id(&self, book_id: i64) -> Result<Option<BookRecord>> {
        self.hit();
        self.inner.get_by_id(book_id).await
    }

    async fn recommend(&self, filter: &RecommendFilter, limit: usize) -> Result<Vec<BookRecord>> {
        self.hit();
        self.inner.recommend(filter, limit).await
    }

    async fn borrow_records(
        &self,
        book_id: Option<i64>,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<BorrowRecord>> {
        self.hit();
        self.inner.borrow_records(book_id, user_id, limit).await
    }

    async fn execute_select(&self, sql: &str, timeout: Duration) -> Result<Vec<BookRecord>> {
        self.hit();
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.inner.execute_select(sql, timeout).await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }
}
