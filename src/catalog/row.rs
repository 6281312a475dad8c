//! Column-by-column mapping from arbitrary result sets to `BookRecord`.
//!
//! Model-written queries return whatever projection the model chose, so a
//! missing column, a NULL, or an unexpected storage class falls back to the
//! field's default instead of failing the whole call.

use chrono::NaiveDate;
use rusqlite::types::ValueRef;
use rusqlite::{Row, Statement};

use super::{BookRecord, BorrowRecord};

/// Resolved column positions for one prepared statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColumnMap {
    book_id: Option<usize>,
    title: Option<usize>,
    author: Option<usize>,
    publisher: Option<usize>,
    publish_date: Option<usize>,
    isbn: Option<usize>,
    category: Option<usize>,
    price: Option<usize>,
    stock: Option<usize>,
    description: Option<usize>,
}

impl ColumnMap {
    /// Column lookup is case-insensitive, so `bookid`, `BookID` and `BOOKID`
    /// all resolve.
    pub fn for_statement(stmt: &Statement<'_>) -> Self {
        let idx = |name: &str| stmt.column_index(name).ok();
        Self {
            book_id: idx("BookID"),
            title: idx("Title"),
            author: idx("Author"),
            publisher: idx("Publisher"),
            publish_date: idx("PublishDate"),
            isbn: idx("ISBN"),
            category: idx("Category"),
            price: idx("Price"),
            stock: idx("Stock"),
            description: idx("Description"),
        }
    }

    pub fn map_row(&self, row: &Row<'_>) -> BookRecord {
        BookRecord {
            book_id: self.book_id.and_then(|i| as_i64(row, i)).unwrap_or(0),
            title: self.title.and_then(|i| as_string(row, i)).unwrap_or_default(),
            author: self.author.and_then(|i| as_string(row, i)).unwrap_or_default(),
            publisher: self.publisher.and_then(|i| as_string(row, i)).unwrap_or_default(),
            publish_date: self.publish_date.and_then(|i| as_date(row, i)),
            isbn: self.isbn.and_then(|i| as_string(row, i)).unwrap_or_default(),
            category: self.category.and_then(|i| as_string(row, i)).unwrap_or_default(),
            price: self.price.and_then(|i| as_f64(row, i)).unwrap_or(0.0),
            stock: self.stock.and_then(|i| as_i64(row, i)).unwrap_or(0),
            description: self.description.and_then(|i| as_string(row, i)),
        }
    }
}

/// Maps the fixed projection `RecordID, BookID, BookTitle, UserID,
/// BorrowDate, ReturnDate, Status`.
pub fn map_borrow_row(row: &Row<'_>) -> BorrowRecord {
    BorrowRecord {
        record_id: as_i64(row, 0).unwrap_or(0),
        book_id: as_i64(row, 1).unwrap_or(0),
        book_title: as_string(row, 2).unwrap_or_default(),
        user_id: as_i64(row, 3).unwrap_or(0),
        borrow_date: as_date(row, 4),
        return_date: as_date(row, 5),
        status: as_string(row, 6).unwrap_or_default(),
    }
}

fn as_i64(row: &Row<'_>, idx: usize) -> Option<i64> {
    match row.get_ref(idx).ok()? {
        ValueRef::Integer(v) => Some(v),
        ValueRef::Real(v) => Some(v as i64),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(row: &Row<'_>, idx: usize) -> Option<f64> {
    match row.get_ref(idx).ok()? {
        ValueRef::Real(v) => Some(v),
        ValueRef::Integer(v) => Some(v as f64),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(row: &Row<'_>, idx: usize) -> Option<String> {
    match row.get_ref(idx).ok()? {
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` with an optional time suffix.
fn as_date(row: &Row<'_>, idx: usize) -> Option<NaiveDate> {
    let text = as_string(row, idx)?;
    let day = text.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
