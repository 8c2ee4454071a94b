use crate::common::constraints::{ColumnReference, IndexSpec};
use crate::common::errors::MigrationError;
use crate::common::helpers::format_snake_case;
use crate::common::schema::{ColumnSpec, PrimaryKeyType, SemanticType, TableDefinition};

/// Assembles a [`TableDefinition`] column by column.
pub struct TableBuilder {
    name: String,
    primary_key: PrimaryKeyType,
    columns: Vec<ColumnSpec>,
    indexes: Vec<IndexSpec>,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        TableBuilder {
            name: name.into(),
            primary_key: PrimaryKeyType::BigInt,
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn primary_key(mut self, primary_key: PrimaryKeyType) -> Self {
        self.primary_key = primary_key;
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn references(mut self, reference: Reference) -> Self {
        if reference.index {
            let column = reference.column_name();
            self = self.index(&[column.as_str()], false);
        }
        self.columns.push(reference.into_column());
        self
    }

    /// Adds non-null `created_at` and `updated_at` columns.
    pub fn timestamps(mut self) -> Self {
        self.columns
            .push(ColumnSpec::new("created_at", SemanticType::DateTime).not_null());
        self.columns
            .push(ColumnSpec::new("updated_at", SemanticType::DateTime).not_null());
        self
    }

    pub fn index(mut self, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexSpec::new(&self.name, columns, unique));
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self) -> Result<TableDefinition, MigrationError> {
        let definition = TableDefinition {
            name: self.name,
            primary_key: self.primary_key,
            columns: self.columns,
            indexes: self.indexes,
        };

        definition.validate()?;

        Ok(definition)
    }
}

/// A `<name>_id` column pointing at another table.
#[derive(Debug, Clone)]
pub struct Reference {
    name: String,
    data_type: SemanticType,
    nullable: bool,
    foreign_key: bool,
    to_table: Option<String>,
    index: bool,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Reference {
            name: name.into(),
            data_type: SemanticType::BigInt,
            nullable: true,
            foreign_key: false,
            to_table: None,
            index: true,
        }
    }

    pub fn data_type(mut self, data_type: SemanticType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn foreign_key(mut self, foreign_key: bool) -> Self {
        self.foreign_key = foreign_key;
        self
    }

    pub fn to_table(mut self, to_table: impl Into<String>) -> Self {
        self.to_table = Some(to_table.into());
        self
    }

    pub fn index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn column_name(&self) -> String {
        format!("{}_id", format_snake_case(&self.name))
    }

    pub fn target_table(&self) -> String {
        self.to_table
            .clone()
            .unwrap_or_else(|| format!("{}s", format_snake_case(&self.name)))
    }

    pub fn has_index(&self) -> bool {
        self.index
    }

    pub fn into_column(self) -> ColumnSpec {
        let column = ColumnSpec::new(self.column_name(), self.data_type).nullable(self.nullable);

        if self.foreign_key {
            column.references(ColumnReference::new(self.target_table()))
        } else {
            column
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_books_table() {
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

        assert_eq!(
            books.column_names(),
            vec!["id", "title", "author_id", "created_at", "updated_at"]
        );

        let author_id = books.column("author_id").unwrap();
        assert_eq!(author_id.data_type, SemanticType::Uuid);
        assert!(!author_id.is_nullable);
        assert_eq!(
            author_id.references,
            Some(ColumnReference::new("authors"))
        );

        assert_eq!(books.indexes.len(), 1);
        assert_eq!(books.indexes[0].name, "index_books_on_author_id");
    }

    #[test]
    fn reference_without_foreign_key_has_no_constraint() {
        let column = Reference::new("Publisher").into_column();
        assert_eq!(column.name, "publisher_id");
        assert_eq!(column.data_type, SemanticType::BigInt);
        assert!(column.references.is_none());
    }

    #[test]
    fn explicit_target_table() {
        let reference = Reference::new("person").to_table("people").foreign_key(true);
        assert_eq!(reference.target_table(), "people");
    }

    #[test]
    fn build_rejects_duplicate_timestamps() {
        let err = TableBuilder::new("books")
            .timestamps()
            .timestamps()
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("duplicate column created_at"));
    }
}
