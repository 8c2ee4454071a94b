use sqlx::any::AnyPoolOptions;

use crate::common::constraints::IndexSpec;
use crate::common::schema::{ColumnSpec, PrimaryKeyType, SemanticType};
use crate::definition::builder::{Reference, TableBuilder};
use crate::definition::migration::{Migration, MigrationId};
use crate::definition::operation::Operation;
use crate::mappings::Mappings;
use crate::store::sql_store::{SqlStore, StoreOptions};

pub fn id(value: u64) -> MigrationId {
    MigrationId::new(value).unwrap()
}

/// Single connection so every query sees the same in-memory database.
pub async fn memory_store() -> SqlStore {
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let store = SqlStore::new(pool, Mappings::defaults(), StoreOptions::default()).unwrap();
    store.ensure_ledger().await.unwrap();
    store
}

pub fn create_authors() -> Migration {
    let authors = TableBuilder::new("authors")
        .primary_key(PrimaryKeyType::Uuid)
        .column(ColumnSpec::new("name", SemanticType::String).not_null())
        .timestamps()
        .build()
        .unwrap();

    Migration::new(id(20220803175500), "create_authors", vec![Operation::CreateTable(authors)])
        .unwrap()
}

pub fn create_books() -> Migration {
    let books = TableBuilder::new("books")
        .primary_key(PrimaryKeyType::Uuid)
        .column(ColumnSpec::new("title", SemanticType::String))
        .references(
            Reference::new("author")
                .data_type(SemanticType::Uuid)
                .nullable(false)
                .foreign_key(true),
        )
        .timestamps()
        .build()
        .unwrap();

    Migration::new(id(20220803175512), "create_books", vec![Operation::CreateTable(books)])
        .unwrap()
}

pub fn add_isbn() -> Migration {
    Migration::new(
        id(20220810093000),
        "add_isbn_to_books",
        vec![
            Operation::AddColumn {
                table: "books".to_string(),
                column: ColumnSpec::new("isbn", SemanticType::String),
            },
            Operation::AddIndex {
                table: "books".to_string(),
                index: IndexSpec::new("books", &["isbn"], true),
            },
        ],
    )
    .unwrap()
}
