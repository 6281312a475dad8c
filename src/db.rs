use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn open(path: &Path) -> Result<Connection> {
    info!("opening database at {}", path.display());
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;

    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    migrate(&conn)?;
    Ok(conn)
}

/// Run database migrations. Exposed for tests that use in-memory DBs.
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS Books (
            BookID      INTEGER PRIMARY KEY AUTOINCREMENT,
            Title       TEXT NOT NULL,
            Author      TEXT NOT NULL,
            Publisher   TEXT,
            PublishDate TEXT,
            ISBN        TEXT,
            Category    TEXT,
            Price       REAL,
            Stock       INTEGER NOT NULL DEFAULT 0,
            Description TEXT,
            CreatedAt   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_books_category ON Books(Category);
        CREATE INDEX IF NOT EXISTS idx_books_author ON Books(Author);

        CREATE TABLE IF NOT EXISTS BorrowRecords (
            RecordID    INTEGER PRIMARY KEY AUTOINCREMENT,
            BookID      INTEGER NOT NULL REFERENCES Books(BookID),
            UserID      INTEGER NOT NULL,
            BorrowDate  TEXT NOT NULL,
            ReturnDate  TEXT,
            Status      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_borrow_book ON BorrowRecords(BookID);
        CREATE INDEX IF NOT EXISTS idx_borrow_user ON BorrowRecords(UserID);
        ",
    )?;
    Ok(())
}

/// Creates an in-memory database with migrations applied. Use in tests.
#[cfg(test)]
pub(crate) fn test_db() -> std::sync::Arc<tokio::sync::Mutex<Connection>> {
    use std::sync::Arc;

    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();
    Arc::new(tokio::sync::Mutex::new(conn))
}

/// In-memory database pre-loaded with a small catalog. Use in tests.
#[cfg(test)]
pub(crate) fn seeded_test_db() -> std::sync::Arc<tokio::sync::Mutex<Connection>> {
    use std::sync::Arc;

    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();
    conn.execute_batch(
        "
        INSERT INTO Books (BookID, Title, Author, Publisher, PublishDate, ISBN, Category, Price, Stock, Description) VALUES
          (1, 'Fluent Python', 'Luciano Ramalho', 'O''Reilly', '2022-04-01', '9781492056355', 'Python', 79.5, 12, 'Clear, concise, effective Python.'),
          (2, 'Effective Java', 'Joshua Bloch', 'Addison-Wesley', '2018-01-06', '9780134685991', 'Java', 65.0, 3, 'Best practices for the Java platform.'),
          (3, 'Hands-On Machine Learning', 'Aurelien Geron', 'O''Reilly', '2019-10-15', '9781492032649', 'Machine Learning', 99.0, 0, 'Scikit-Learn, Keras and TensorFlow.'),
          (4, 'Python Crash Course', 'Eric Matthes', 'No Starch Press', '2019-05-03', '9781593279288', 'Python', 39.9, 25, 'A hands-on introduction to programming.'),
          (5, 'Database Internals', 'Alex Petrov', 'O''Reilly', '2019-09-01', '9781492040347', 'Database', 55.0, 7, 'How distributed data systems work.'),
          (6, 'The Rust Programming Language', 'Steve Klabnik', 'No Starch Press', '2023-02-28', '9781718503106', 'Rust', 45.0, 9, NULL);

        INSERT INTO BorrowRecords (RecordID, BookID, UserID, BorrowDate, ReturnDate, Status) VALUES
          (1, 2, 102, '2024-01-10', '2024-02-01', 'Returned'),
          (2, 1, 101, '2024-02-15', '2024-03-01', 'Returned'),
          (3, 5, 103, '2024-03-20', NULL, 'Borrowed'),
          (4, 2, 101, '2024-04-05', NULL, 'Borrowed');
        ",
    )
    .unwrap();
    Arc::new(tokio::sync::Mutex::new(conn))
}
