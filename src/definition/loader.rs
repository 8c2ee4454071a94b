use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use crate::common::constraints::{ForeignKeySpec, IndexSpec};
use crate::common::errors::MigrationError;
use crate::common::schema::{ColumnSpec, PrimaryKeyType, SemanticType, TableDefinition};
use crate::definition::builder::{Reference, TableBuilder};
use crate::definition::migration::{Migration, MigrationId};
use crate::definition::operation::Operation;

/// Reads every `<id>_<name>.toml` file in `dir`.
pub fn load_migrations(dir: &Path) -> Result<Vec<Migration>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("Failed to read migrations directory {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;

    paths.retain(|path| path.extension().map_or(false, |ext| ext == "toml"));
    paths.sort();

    let mut migrations = Vec::with_capacity(paths.len());

    for path in paths {
        let file_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();

        let (id, name) = split_file_name(&file_name)?;

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read migration file {}", path.display()))?;

        let value = content
            .parse::<Value>()
            .map_err(|err| MigrationError::invalid(format!("malformed TOML: {}", err)).with_id(id))?;

        let migration = parse_migration(id, name, &value)
            .with_context(|| format!("Failed to load migration file {}", path.display()))?;

        debug!("Loaded migration {} {}", migration.id(), migration.name());
        migrations.push(migration);
    }

    Ok(migrations)
}

fn split_file_name(file_name: &str) -> Result<(MigrationId, &str), MigrationError> {
    let (id, name) = file_name.split_once('_').ok_or_else(|| {
        MigrationError::invalid(format!(
            "migration file {} is not named <id>_<name>.toml",
            file_name
        ))
    })?;

    Ok((id.parse()?, name))
}

pub fn parse_migration(
    id: MigrationId,
    name: &str,
    value: &Value,
) -> Result<Migration, MigrationError> {
    let operations = parse_operation_list(value, "operations")
        .map_err(|err| err.with_id(id))?
        .ok_or_else(|| MigrationError::invalid("missing [[operations]]").with_id(id))?;

    match parse_operation_list(value, "down").map_err(|err| err.with_id(id))? {
        Some(down) => Migration::with_down(id, name, operations, down),
        None => Migration::new(id, name, operations),
    }
}

fn parse_operation_list(value: &Value, key: &str) -> Result<Option<Vec<Operation>>, MigrationError> {
    let tables = match value.get(key) {
        Some(tables) => tables
            .as_array()
            .ok_or_else(|| MigrationError::invalid(format!("'{}' must be an array of tables", key)))?,
        None => return Ok(None),
    };

    let mut operations = Vec::new();

    for table in tables {
        operations.extend(parse_operation(table)?);
    }

    Ok(Some(operations))
}

/// One TOML entry may expand into several operations (`add_reference`).
fn parse_operation(value: &Value) -> Result<Vec<Operation>, MigrationError> {
    let kind = required_str(value, "op")?;

    let operations = match kind {
        "create_table" => vec![Operation::CreateTable(parse_table(value)?)],
        "drop_table" => {
            let name = required_str(value, "table")?.to_string();
            let definition = if has_table_body(value) {
                Some(parse_table(value)?)
            } else {
                None
            };
            vec![Operation::DropTable { name, definition }]
        }
        "add_column" => vec![Operation::AddColumn {
            table: required_str(value, "table")?.to_string(),
            column: parse_column(value)?,
        }],
        "remove_column" => {
            let definition = if value.get("type").is_some() {
                Some(parse_column(value)?)
            } else {
                None
            };
            vec![Operation::RemoveColumn {
                table: required_str(value, "table")?.to_string(),
                name: required_str(value, "name")?.to_string(),
                definition,
            }]
        }
        "add_index" => vec![Operation::AddIndex {
            table: required_str(value, "table")?.to_string(),
            index: parse_index(value, required_str(value, "table")?)?,
        }],
        "remove_index" => vec![Operation::RemoveIndex {
            table: required_str(value, "table")?.to_string(),
            index: parse_index(value, required_str(value, "table")?)?,
        }],
        "add_foreign_key" => vec![Operation::AddForeignKey(parse_foreign_key(value)?)],
        "remove_foreign_key" => vec![Operation::RemoveForeignKey(parse_foreign_key(value)?)],
        "add_reference" => {
            let table = required_str(value, "table")?;
            let reference = parse_reference(value)?;
            let index = IndexSpec::new(table, &[reference.column_name().as_str()], false);
            let has_index = reference.has_index();

            let mut operations = vec![Operation::AddColumn {
                table: table.to_string(),
                column: reference.into_column(),
            }];

            if has_index {
                operations.push(Operation::AddIndex {
                    table: table.to_string(),
                    index,
                });
            }
            operations
        }
        "sql" => vec![Operation::Sql {
            up: required_str(value, "up")?.to_string(),
            down: optional_str(value, "down")?.map(str::to_string),
        }],
        other => {
            return Err(MigrationError::invalid(format!(
                "unknown operation '{}'",
                other
            )))
        }
    };

    Ok(operations)
}

fn has_table_body(value: &Value) -> bool {
    ["primary_key", "columns", "references", "timestamps"]
        .iter()
        .any(|key| value.get(key).is_some())
}

fn parse_table(value: &Value) -> Result<TableDefinition, MigrationError> {
    let mut builder = TableBuilder::new(required_str(value, "table")?);

    if let Some(primary_key) = optional_str(value, "primary_key")? {
        builder = builder.primary_key(primary_key.parse::<PrimaryKeyType>()?);
    }

    for column in optional_array(value, "columns")? {
        builder = builder.column(parse_column(column)?);
    }

    for reference in optional_array(value, "references")? {
        builder = builder.references(parse_reference(reference)?);
    }

    if optional_bool(value, "timestamps")?.unwrap_or(false) {
        builder = builder.timestamps();
    }

    let table = required_str(value, "table")?;
    for index in optional_array(value, "indexes")? {
        builder = builder.with_index(parse_index(index, table)?);
    }

    builder.build()
}

fn parse_column(value: &Value) -> Result<ColumnSpec, MigrationError> {
    let name = required_str(value, "name")?;
    let data_type = required_str(value, "type")?.parse::<SemanticType>()?;
    let nullable = optional_bool(value, "null")?.unwrap_or(true);

    let mut column = ColumnSpec::new(name, data_type).nullable(nullable);

    if let Some(default) = value.get("default") {
        column = column.default_value(default_literal(default)?);
    }

    Ok(column)
}

fn parse_reference(value: &Value) -> Result<Reference, MigrationError> {
    let mut reference = Reference::new(required_str(value, "name")?);

    if let Some(data_type) = optional_str(value, "type")? {
        reference = reference.data_type(data_type.parse::<SemanticType>()?);
    }
    if let Some(nullable) = optional_bool(value, "null")? {
        reference = reference.nullable(nullable);
    }
    if let Some(foreign_key) = optional_bool(value, "foreign_key")? {
        reference = reference.foreign_key(foreign_key);
    }
    if let Some(to_table) = optional_str(value, "to_table")? {
        reference = reference.to_table(to_table);
    }
    if let Some(index) = optional_bool(value, "index")? {
        reference = reference.index(index);
    }

    Ok(reference)
}

fn parse_index(value: &Value, table: &str) -> Result<IndexSpec, MigrationError> {
    let columns = optional_array(value, "columns")?
        .iter()
        .map(|column| {
            column
                .as_str()
                .ok_or_else(|| MigrationError::invalid("index columns must be strings"))
        })
        .collect::<Result<Vec<&str>, _>>()?;

    let unique = optional_bool(value, "unique")?.unwrap_or(false);
    let index = IndexSpec::new(table, &columns, unique);

    Ok(match optional_str(value, "index_name")? {
        Some(name) => index.named(name),
        None => index,
    })
}

fn parse_foreign_key(value: &Value) -> Result<ForeignKeySpec, MigrationError> {
    let mut spec = ForeignKeySpec::new(
        required_str(value, "table")?,
        required_str(value, "column")?,
        required_str(value, "to_table")?,
    )
    .nullable(optional_bool(value, "null")?.unwrap_or(true));

    if let Some(to_column) = optional_str(value, "to_column")? {
        spec.to_column = to_column.to_string();
    }

    Ok(spec)
}

/// Strings become quoted SQL literals; numbers and booleans are used as-is.
fn default_literal(value: &Value) -> Result<String, MigrationError> {
    match value {
        Value::String(text) => Ok(format!("'{}'", text.replace('\'', "''"))),
        Value::Integer(number) => Ok(number.to_string()),
        Value::Float(number) => Ok(number.to_string()),
        Value::Boolean(flag) => Ok(if *flag { "1" } else { "0" }.to_string()),
        other => Err(MigrationError::invalid(format!(
            "unsupported default value {}",
            other
        ))),
    }
}

fn required_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, MigrationError> {
    optional_str(value, key)?
        .ok_or_else(|| MigrationError::invalid(format!("missing or invalid '{}'", key)))
}

fn optional_str<'a>(value: &'a Value, key: &str) -> Result<Option<&'a str>, MigrationError> {
    match value.get(key) {
        Some(field) => field
            .as_str()
            .map(Some)
            .ok_or_else(|| MigrationError::invalid(format!("'{}' must be a string", key))),
        None => Ok(None),
    }
}

fn optional_bool(value: &Value, key: &str) -> Result<Option<bool>, MigrationError> {
    match value.get(key) {
        Some(field) => field
            .as_bool()
            .map(Some)
            .ok_or_else(|| MigrationError::invalid(format!("'{}' must be a boolean", key))),
        None => Ok(None),
    }
}

fn optional_array<'a>(value: &'a Value, key: &str) -> Result<&'a [Value], MigrationError> {
    match value.get(key) {
        Some(field) => field
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| MigrationError::invalid(format!("'{}' must be an array", key))),
        None => Ok(&[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE_BOOKS: &str = r#"
        [[operations]]
        op = "create_table"
        table = "books"
        primary_key = "uuid"
        timestamps = true
        columns = [{ name = "title", type = "string" }]
        references = [{ name = "author", type = "uuid", null = false, foreign_key = true }]
    "#;

    fn id(value: u64) -> MigrationId {
        MigrationId::new(value).unwrap()
    }

    #[test]
    fn parses_create_books() {
        let value = CREATE_BOOKS.parse::<Value>().unwrap();
        let migration = parse_migration(id(20220803175512), "create_books", &value).unwrap();

        match &migration.operations()[0] {
            Operation::CreateTable(books) => {
                assert_eq!(books.primary_key, PrimaryKeyType::Uuid);
                assert_eq!(
                    books.column_names(),
                    vec!["id", "title", "author_id", "created_at", "updated_at"]
                );
                assert!(!books.column("author_id").unwrap().is_nullable);
            }
            other => panic!("unexpected operation {}", other),
        }

        assert_eq!(migration.inverse()[0].kind(), "drop_table");
    }

    #[test]
    fn unknown_type_fails_with_migration_id() {
        let value = r#"
            [[operations]]
            op = "add_column"
            table = "books"
            name = "price"
            type = "money"
        "#
        .parse::<Value>()
        .unwrap();

        let err = parse_migration(id(5), "add_price", &value).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition { id: Some(_), .. }));
    }

    #[test]
    fn explicit_down_replaces_derived_inverse() {
        let value = r#"
            [[operations]]
            op = "sql"
            up = "UPDATE books SET title = 'untitled' WHERE title IS NULL"

            [[down]]
            op = "sql"
            up = "SELECT 1"
        "#
        .parse::<Value>()
        .unwrap();

        let migration = parse_migration(id(6), "backfill_titles", &value).unwrap();
        assert_eq!(migration.inverse().len(), 1);
    }

    #[test]
    fn add_reference_expands_to_column_and_index() {
        let value = r#"
            [[operations]]
            op = "add_reference"
            table = "books"
            name = "publisher"
        "#
        .parse::<Value>()
        .unwrap();

        let migration = parse_migration(id(8), "add_publisher", &value).unwrap();
        let kinds: Vec<&str> = migration.operations().iter().map(Operation::kind).collect();
        assert_eq!(kinds, vec!["add_column", "add_index"]);
    }

    #[test]
    fn empty_down_is_rejected_for_schema_changes() {
        let value = r#"
            down = []

            [[operations]]
            op = "drop_table"
            table = "books"
        "#
        .parse::<Value>()
        .unwrap();

        let err = parse_migration(id(9), "drop_books", &value).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition { id: Some(_), .. }));
    }

    #[test]
    fn string_defaults_are_quoted() {
        let value = r#"
            [[operations]]
            op = "add_column"
            table = "books"
            name = "status"
            type = "string"
            default = "it's new"
        "#
        .parse::<Value>()
        .unwrap();

        let migration = parse_migration(id(9), "add_status", &value).unwrap();
        match &migration.operations()[0] {
            Operation::AddColumn { column, .. } => {
                assert_eq!(column.default.as_deref(), Some("'it''s new'"))
            }
            other => panic!("unexpected operation {}", other),
        }
    }

    #[test]
    fn loads_directory_in_identifier_order() {
        let dir = tempfile::tempdir().unwrap();

        fs::write(
            dir.path().join("20220803175000_create_authors.toml"),
            r#"
                [[operations]]
                op = "create_table"
                table = "authors"
                primary_key = "uuid"
                columns = [{ name = "name", type = "string" }]
            "#,
        )
        .unwrap();
        fs::write(dir.path().join("20220803175512_create_books.toml"), CREATE_BOOKS).unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let migrations = load_migrations(dir.path()).unwrap();
        let names: Vec<&str> = migrations.iter().map(Migration::name).collect();
        assert_eq!(names, vec!["create_authors", "create_books"]);
    }

    #[test]
    fn badly_named_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("create_books.toml"), CREATE_BOOKS).unwrap();

        let err = load_migrations(dir.path()).unwrap_err();
        assert!(err
            .chain()
            .any(|cause| cause.downcast_ref::<MigrationError>().is_some()));
    }

    #[test]
    fn demo_migrations_match_builder_definitions() {
        use crate::definition::catalog::MigrationSet;
        use crate::test_support::{add_isbn, create_authors, create_books};

        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/db/migrate");
        let set = MigrationSet::new(load_migrations(&dir).unwrap(), &[]).unwrap();

        for expected in [create_authors(), create_books(), add_isbn()] {
            let loaded = set.get(expected.id()).unwrap();
            assert_eq!(loaded.name(), expected.name());
            assert_eq!(loaded.checksum(), expected.checksum());
        }
    }
}
