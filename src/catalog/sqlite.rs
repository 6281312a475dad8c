use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, InterruptHandle, Params, params, params_from_iter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::dialect::rewrite_top_clause;
use super::row::{ColumnMap, map_borrow_row};
use super::{BookRecord, BorrowRecord, CatalogStore, RecommendFilter};
use crate::error::{BookAgentError, Result};

const BOOK_COLUMNS: &str =
    "BookID, Title, Author, Publisher, PublishDate, ISBN, Category, Price, Stock, Description";

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    db: Arc<Mutex<Connection>>,
    max_rows: usize,
}

impl SqliteCatalog {
    pub fn new(db: Arc<Mutex<Connection>>, max_rows: usize) -> Self {
        Self {
            db,
            max_rows: max_rows.max(1),
        }
    }
}

/// Run a parameterized catalog query on an already locked connection.
fn query_books<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<BookRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = ColumnMap::for_statement(&stmt);
    let books = stmt
        .query_map(params, |row| Ok(columns.map_row(row)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(books)
}

/// Escape LIKE wildcards so the keyword matches literally.
fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Prepare exactly one statement, refuse anything SQLite does not consider
/// read-only, and materialize at most `max_rows` rows.
fn run_readonly(conn: &Connection, sql: &str, max_rows: usize) -> Result<Vec<BookRecord>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| BookAgentError::ExecutionFailure(e.to_string()))?;

    if !stmt.readonly() {
        return Err(BookAgentError::ExecutionFailure(
            "statement is not read-only".into(),
        ));
    }

    let columns = ColumnMap::for_statement(&stmt);
    let mut rows = stmt
        .query([])
        .map_err(|e| BookAgentError::ExecutionFailure(e.to_string()))?;

    let mut books = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| BookAgentError::ExecutionFailure(e.to_string()))?
    {
        books.push(columns.map_row(row));
        if books.len() >= max_rows {
            debug!(max_rows, "result truncated");
            break;
        }
    }
    Ok(books)
}

fn timed_out(timeout: Duration) -> BookAgentError {
    BookAgentError::ExecutionFailure(format!("query timed out after {}s", timeout.as_secs()))
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<BookRecord>> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM Books
             WHERE Title LIKE ?1 ESCAPE '\\'
                OR Author LIKE ?1 ESCAPE '\\'
                OR Category LIKE ?1 ESCAPE '\\'
             ORDER BY BookID
             LIMIT ?2"
        );
        let pattern = like_pattern(keyword.trim());
        let db = self.db.lock().await;
        let books = query_books(&db, &sql, params![pattern, limit as i64])?;
        debug!(keyword, count = books.len(), "keyword search");
        Ok(books)
    }

    async fn get_by_id(&self, book_id: i64) -> Result<Option<BookRecord>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM Books WHERE BookID = ?1");
        let db = self.db.lock().await;
        let mut books = query_books(&db, &sql, params![book_id])?;
        Ok(books.pop())
    }

    async fn recommend(&self, filter: &RecommendFilter, limit: usize) -> Result<Vec<BookRecord>> {
        let limit = limit as i64;
        let db = self.db.lock().await;
        match filter {
            RecommendFilter::Category(category) => {
                let sql = format!(
                    "SELECT {BOOK_COLUMNS} FROM Books
                     WHERE Category LIKE ?1 ESCAPE '\\'
                     ORDER BY RANDOM() LIMIT ?2"
                );
                query_books(&db, &sql, params![like_pattern(category), limit])
            }
            RecommendFilter::Author(author) => {
                let sql = format!(
                    "SELECT {BOOK_COLUMNS} FROM Books
                     WHERE Author LIKE ?1 ESCAPE '\\'
                     ORDER BY PublishDate DESC LIMIT ?2"
                );
                query_books(&db, &sql, params![like_pattern(author), limit])
            }
            RecommendFilter::InStock => {
                let sql = format!(
                    "SELECT {BOOK_COLUMNS} FROM Books
                     WHERE Stock > 0
                     ORDER BY RANDOM() LIMIT ?1"
                );
                query_books(&db, &sql, params![limit])
            }
        }
    }

    async fn borrow_records(
        &self,
        book_id: Option<i64>,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<BorrowRecord>> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = book_id {
            conditions.push("br.BookID = ?");
            values.push(id);
        }
        if let Some(id) = user_id {
            conditions.push("br.UserID = ?");
            values.push(id);
        }
        values.push(limit as i64);

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT br.RecordID, br.BookID, b.Title, br.UserID,
                    br.BorrowDate, br.ReturnDate, br.Status
             FROM BorrowRecords br
             INNER JOIN Books b ON br.BookID = b.BookID
             {where_clause}
             ORDER BY br.BorrowDate DESC, br.RecordID DESC
             LIMIT ?"
        );

        let db = self.db.lock().await;
        let mut stmt = db.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), |row| Ok(map_borrow_row(row)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(?book_id, ?user_id, count = records.len(), "borrow records");
        Ok(records)
    }

    /// The timeout covers the wait for the shared connection as well as the
    /// statement itself.  A caller that gives up while queued never runs.
    async fn execute_select(&self, sql: &str, timeout: Duration) -> Result<Vec<BookRecord>> {
        let sql = rewrite_top_clause(sql).into_owned();
        let max_rows = self.max_rows;
        let interrupt: OnceLock<InterruptHandle> = OnceLock::new();
        let cancelled = Arc::new(AtomicBool::new(false));

        info!(sql = %sql, timeout_secs = timeout.as_secs(), "executing model-generated query");

        let run = async {
            let conn = self.db.clone().lock_owned().await;
            let _ = interrupt.set(conn.get_interrupt_handle());
            let cancelled = cancelled.clone();
            tokio::task::spawn_blocking(move || {
                if cancelled.load(Ordering::SeqCst) {
                    return Err(timed_out(timeout));
                }
                run_readonly(&conn, &sql, max_rows)
            })
            .await
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => {
                if let Ok(ref books) = result {
                    info!(rows = books.len(), "query returned");
                }
                result
            }
            Ok(Err(e)) => Err(BookAgentError::ExecutionFailure(format!(
                "query task failed: {e}"
            ))),
            Err(_) => {
                cancelled.store(true, Ordering::SeqCst);
                match interrupt.get() {
                    Some(handle) => {
                        handle.interrupt();
                        warn!(timeout_secs = timeout.as_secs(), "query timed out, interrupted");
                    }
                    None => warn!(
                        timeout_secs = timeout.as_secs(),
                        "query timed out waiting for the connection"
                    ),
                }
                Err(timed_out(timeout))
            }
        }
    }

    async fn ping(&self) -> bool {
        let db = self.db.lock().await;
        db.execute_batch("SELECT 1").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn catalog() -> SqliteCatalog {
        SqliteCatalog::new(db::seeded_test_db(), 200)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn search_matches_title_author_and_category_case_insensitively() {
        let c = catalog();
        let by_category = c.search("python", 10).await.unwrap();
        assert_eq!(by_category.len(), 2);
        let by_author = c.search("BLOCH", 10).await.unwrap();
        assert_eq!(by_author.len(), 1);
        assert_eq!(by_author[0].title, "Effective Java");
    }

    #[tokio::test]
    async fn search_respects_limit_and_order() {
        let c = catalog();
        let books = c.search("o", 2).await.unwrap();
        assert_eq!(books.len(), 2);
        assert!(books[0].book_id < books[1].book_id);
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let c = catalog();
        assert!(c.search("%", 10).await.unwrap().is_empty());
        assert!(c.search("_", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_by_id_found_and_missing() {
        let c = catalog();
        let book = c.get_by_id(5).await.unwrap().unwrap();
        assert_eq!(book.title, "Database Internals");
        assert!(c.get_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recommend_in_stock_excludes_sold_out() {
        let c = catalog();
        let books = c.recommend(&RecommendFilter::InStock, 20).await.unwrap();
        assert_eq!(books.len(), 5);
        assert!(books.iter().all(BookRecord::in_stock));
    }

    #[tokio::test]
    async fn recommend_by_author_newest_first() {
        let c = catalog();
        let books = c
            .recommend(&RecommendFilter::Author("e".into()), 20)
            .await
            .unwrap();
        let dates: Vec<_> = books.iter().filter_map(|b| b.publish_date).collect();
        let mut sorted = dates.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(dates, sorted);
    }

    #[tokio::test]
    async fn execute_select_with_top_shim_orders_by_price() {
        let c = catalog();
        let books = c
            .execute_select("SELECT TOP 3 * FROM Books ORDER BY Price ASC", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(books.len(), 3);
        assert_eq!(books[0].title, "Python Crash Course");
        assert!(books.windows(2).all(|w| w[0].price <= w[1].price));
    }

    #[tokio::test]
    async fn execute_select_is_idempotent() {
        let c = catalog();
        let sql = "SELECT * FROM Books WHERE Price > 50 ORDER BY BookID";
        let first = c.execute_select(sql, TIMEOUT).await.unwrap();
        let second = c.execute_select(sql, TIMEOUT).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn execute_select_refuses_writes() {
        let c = catalog();
        let err = c
            .execute_select("DELETE FROM Books", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, BookAgentError::ExecutionFailure(_)));
        assert_eq!(c.search("", 100).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn execute_select_never_runs_chained_statements() {
        let c = catalog();
        // Only the first statement is ever prepared; the tail is dropped or
        // rejected, but never executed.
        let _ = c
            .execute_select("SELECT * FROM Books; DELETE FROM Books", TIMEOUT)
            .await;
        assert_eq!(c.search("", 100).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn execute_select_reports_syntax_errors() {
        let c = catalog();
        let err = c
            .execute_select("SELECT * FROM NoSuchTable", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, BookAgentError::ExecutionFailure(_)));
    }

    #[tokio::test]
    async fn execute_select_caps_rows() {
        let c = SqliteCatalog::new(db::seeded_test_db(), 2);
        let books = c.execute_select("SELECT * FROM Books", TIMEOUT).await.unwrap();
        assert_eq!(books.len(), 2);
    }

    const ENDLESS: &str = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                           SELECT x AS BookID FROM n WHERE x < 0";

    #[tokio::test]
    async fn execute_select_times_out() {
        let c = catalog();
        let err = c
            .execute_select(ENDLESS, Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            BookAgentError::ExecutionFailure(msg) => assert!(msg.contains("timed out")),
            other => panic!("expected ExecutionFailure, got {other:?}"),
        }
        // The interrupted statement released the connection.
        assert!(c.ping().await);
    }

    #[tokio::test]
    async fn execute_select_timeout_covers_waiting_for_the_connection() {
        let c = Arc::new(catalog());
        let slow = {
            let c = c.clone();
            tokio::spawn(async move { c.execute_select(ENDLESS, Duration::from_secs(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let err = c
            .execute_select("SELECT * FROM Books", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            BookAgentError::ExecutionFailure(msg) => assert!(msg.contains("timed out")),
            other => panic!("expected ExecutionFailure, got {other:?}"),
        }

        assert!(slow.await.unwrap().is_err());
        let books = c.execute_select("SELECT * FROM Books", TIMEOUT).await.unwrap();
        assert_eq!(books.len(), 6);
    }

    #[tokio::test]
    async fn comment_split_keyword_after_semicolon_never_mutates() {
        let c = catalog();
        let _ = c
            .execute_select("SELECT 1; DR/**/OP TABLE Books", TIMEOUT)
            .await;
        let _ = c
            .execute_select("SELECT 1; DEL/**/ETE FROM Books", TIMEOUT)
            .await;
        assert_eq!(c.search("", 100).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn borrow_records_filter_by_book_and_user() {
        let c = catalog();
        let all = c.borrow_records(None, None, 100).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].borrow_date >= w[1].borrow_date));

        let by_book = c.borrow_records(Some(2), None, 100).await.unwrap();
        assert_eq!(by_book.len(), 2);
        assert!(by_book.iter().all(|r| r.book_title == "Effective Java"));

        let by_both = c.borrow_records(Some(2), Some(101), 100).await.unwrap();
        assert_eq!(by_both.len(), 1);
        assert!(by_both[0].return_date.is_none());
        assert_eq!(by_both[0].status, "Borrowed");

        assert!(c.borrow_records(Some(999), None, 100).await.unwrap().is_empty());
        assert_eq!(c.borrow_records(None, None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ping_reports_healthy() {
        assert!(catalog().ping().await);
    }
}
