use crate::catalog::BookRecord;

/// Most recent structured result of one `ChatAgent::process` call.
///
/// Owned by that call and dropped with it.  Each `set` replaces the held
/// list; a capability that produces no list leaves the slot untouched.
#[derive(Debug, Default)]
pub struct ResultCapture {
    books: Option<Vec<BookRecord>>,
}

impl ResultCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, books: Vec<BookRecord>) {
        self.books = Some(books);
    }

    pub fn get(&self) -> Option<&[BookRecord]> {
        self.books.as_deref()
    }

    pub fn into_inner(self) -> Option<Vec<BookRecord>> {
        self.books
    }
}
