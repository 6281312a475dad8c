use tracing::{info, warn};

use super::{CapabilityInvocationResult, DispatchLimits, ReadonlyQueryArgs};
use crate::catalog::CatalogStore;
use crate::error::BookAgentError;
use crate::security::query_gate::QueryGate;

const SCHEMA_TEXT: &str = "\
Table Books (SQLite):
- BookID       INTEGER  primary key
- Title        TEXT     book title
- Author       TEXT     author name
- Publisher    TEXT     publisher name
- PublishDate  TEXT     publication date, YYYY-MM-DD
- ISBN         TEXT     ISBN
- Category     TEXT     category, e.g. Python, Java, Database
- Price        REAL     price
- Stock        INTEGER  copies in stock
- Description  TEXT     short description

Table BorrowRecords (SQLite):
- RecordID     INTEGER  primary key
- BookID       INTEGER  references Books(BookID)
- UserID       INTEGER  borrowing user
- BorrowDate   TEXT     borrow date, YYYY-MM-DD
- ReturnDate   TEXT     return date, NULL while on loan
- Status       TEXT     e.g. Borrowed, Returned

Example queries:
- Cheapest books:     SELECT * FROM Books WHERE Price IS NOT NULL ORDER BY Price ASC LIMIT 10
- Price range:        SELECT * FROM Books WHERE Price BETWEEN 50 AND 100
- Most stock:         SELECT * FROM Books ORDER BY Stock DESC LIMIT 10
- Newest in category: SELECT * FROM Books WHERE Category = 'Python' ORDER BY PublishDate DESC
- Most borrowed:      SELECT b.* FROM Books b JOIN BorrowRecords br ON br.BookID = b.BookID GROUP BY b.BookID ORDER BY COUNT(*) DESC LIMIT 5

Only single SELECT statements are allowed. Select whole rows (SELECT *) so every column is returned.";

/// Static description of the catalog table.  No structured result.
pub fn schema_description() -> CapabilityInvocationResult {
    CapabilityInvocationResult::text(SCHEMA_TEXT)
}

/// Gate, then execute.  Never fails: rejections and store errors become a
/// summary the model can react to, with an empty book list.
pub async fn execute_readonly_query(
    store: &dyn CatalogStore,
    gate: &QueryGate,
    args: &ReadonlyQueryArgs,
    limits: &DispatchLimits,
) -> CapabilityInvocationResult {
    let decision = gate.evaluate(&args.sql);
    if !decision.accepted {
        let reason = decision.reason.unwrap_or_else(|| "not allowed".into());
        let err = BookAgentError::PolicyRejected(reason);
        return CapabilityInvocationResult::with_books(
            format!("{err}. Only a single read-only SELECT statement may be run."),
            vec![],
        );
    }

    let books = match store.execute_select(&args.sql, limits.query_timeout).await {
        Ok(books) => books,
        Err(e) => {
            warn!(error = %e, "accepted query failed");
            return CapabilityInvocationResult::with_books(
                format!("{e}. Check the SQL against the schema and try again."),
                vec![],
            );
        }
    };
    info!(rows = books.len(), "execute_readonly_query");

    if books.is_empty() {
        return CapabilityInvocationResult::with_books("The query returned no rows.", books);
    }

    let mut summary = format!("The query returned {} rows:", books.len());
    for book in books.iter().take(limits.digest_rows) {
        summary.push('\n');
        summary.push_str(&book.summary_line());
    }
    if books.len() > limits.digest_rows {
        summary.push_str(&format!("\n... and {} more", books.len() - limits.digest_rows));
    }
    CapabilityInvocationResult::with_books(summary, books)
}
