//! Parameterized catalog lookups.  None of these ever run model-written SQL.

use tracing::debug;

use super::{
    BookIdArgs, BorrowRecordsArgs, CapabilityInvocationResult, DispatchLimits, KeywordSearchArgs,
    RecommendArgs,
};
use crate::catalog::{BookRecord, CatalogStore, RecommendFilter};
use crate::error::Result;

fn listing(header: String, books: &[BookRecord], rows: usize) -> String {
    let mut out = header;
    for book in books.iter().take(rows) {
        out.push('\n');
        out.push_str(&book.summary_line());
    }
    if books.len() > rows {
        out.push_str(&format!("\n... and {} more", books.len() - rows));
    }
    out
}

pub async fn keyword_search(
    store: &dyn CatalogStore,
    args: &KeywordSearchArgs,
    limits: &DispatchLimits,
) -> Result<CapabilityInvocationResult> {
    let books = store.search(&args.keyword, limits.search_limit).await?;
    debug!(keyword = %args.keyword, count = books.len(), "keyword_search");

    if books.is_empty() {
        return Ok(CapabilityInvocationResult::with_books(
            format!("No books found matching \"{}\".", args.keyword),
            books,
        ));
    }

    let summary = listing(
        format!("Found {} matching books:", books.len()),
        &books,
        limits.summary_rows,
    );
    Ok(CapabilityInvocationResult::with_books(summary, books))
}

fn not_found(book_id: i64) -> CapabilityInvocationResult {
    CapabilityInvocationResult::with_books(format!("No book with id {book_id} was found."), vec![])
}

pub async fn get_book_details(
    store: &dyn CatalogStore,
    args: BookIdArgs,
) -> Result<CapabilityInvocationResult> {
    let Some(book) = store.get_by_id(args.book_id).await? else {
        return Ok(not_found(args.book_id));
    };

    let published = book
        .publish_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".into());
    let summary = format!(
        "Title: {}\nAuthor: {}\nPublisher: {}\nPublished: {}\nISBN: {}\nCategory: {}\n\
         Price: {:.2}\nStock: {}\nDescription: {}",
        book.title,
        book.author,
        book.publisher,
        published,
        book.isbn,
        book.category,
        book.price,
        book.stock,
        book.description.as_deref().unwrap_or("none"),
    );
    Ok(CapabilityInvocationResult::with_books(summary, vec![book]))
}

pub async fn check_stock(
    store: &dyn CatalogStore,
    args: BookIdArgs,
) -> Result<CapabilityInvocationResult> {
    let Some(book) = store.get_by_id(args.book_id).await? else {
        return Ok(not_found(args.book_id));
    };

    let summary = if book.in_stock() {
        format!("\"{}\" is in stock: {} copies available.", book.title, book.stock)
    } else {
        format!("\"{}\" is out of stock.", book.title)
    };
    Ok(CapabilityInvocationResult::with_books(summary, vec![book]))
}

pub async fn recommend_books(
    store: &dyn CatalogStore,
    args: &RecommendArgs,
) -> Result<CapabilityInvocationResult> {
    let filter = match (&args.category, &args.author) {
        (Some(category), _) => RecommendFilter::Category(category.clone()),
        (None, Some(author)) => RecommendFilter::Author(author.clone()),
        (None, None) => RecommendFilter::InStock,
    };

    let books = store.recommend(&filter, args.max_results).await?;
    debug!(kind = filter.kind(), count = books.len(), "recommend_books");

    if books.is_empty() {
        return Ok(CapabilityInvocationResult::with_books(
            "No books to recommend for that request.",
            books,
        ));
    }

    let header = match &filter {
        RecommendFilter::Category(c) => format!("Recommended books in category \"{c}\":"),
        RecommendFilter::Author(a) => format!("Recommended books by \"{a}\", newest first:"),
        RecommendFilter::InStock => "Recommended books currently in stock:".to_string(),
    };
    let summary = listing(header, &books, books.len());
    Ok(CapabilityInvocationResult::with_books(summary, books))
}

/// Cap on loans listed in one answer.
const MAX_BORROW_RECORDS: usize = 50;

/// Loans are not books, so the structured result is left alone.
pub async fn get_borrow_records(
    store: &dyn CatalogStore,
    args: BorrowRecordsArgs,
) -> Result<CapabilityInvocationResult> {
    let records = store
        .borrow_records(args.book_id, args.user_id, MAX_BORROW_RECORDS)
        .await?;
    debug!(book_id = ?args.book_id, user_id = ?args.user_id, count = records.len(), "get_borrow_records");

    if records.is_empty() {
        return Ok(CapabilityInvocationResult::text("No borrow records found."));
    }

    let mut summary = format!("Found {} borrow records:", records.len());
    for record in &records {
        summary.push('\n');
        summary.push_str(&record.summary_line());
    }
    Ok(CapabilityInvocationResult::text(summary))
}
