use anyhow::Error;

use crate::common::errors::MigrationError;

pub fn print_error_chain(err: &Error) {
    // Concatenate the main context message along with its chain of errors
    let error_message = err
        .chain()
        .enumerate()
        .map(|(index, cause)| {
            if index == 0 {
                cause.to_string()
            } else {
                format!("       └> {}", cause)
            }
        })
        .collect::<Vec<String>>()
        .join("\n");

    error!("{}", error_message);
}

pub fn format_snake_case(name: &str) -> String {
    let mut formatted_name = String::new();
    let mut prev_char: Option<char> = None;

    for c in name.chars() {
        if c.is_uppercase() {
            if let Some(prev) = prev_char {
                if !(prev == '_' || prev.is_uppercase()) {
                    formatted_name.push('_');
                }
            }
            formatted_name.push(c.to_ascii_lowercase());
        } else {
            formatted_name.push(c);
        }

        prev_char = Some(c);
    }

    formatted_name
}

/// Table, column, index and migration names are restricted to plain SQL
/// identifiers so they can be quoted without escaping.
pub fn validate_identifier(kind: &str, name: &str) -> Result<(), MigrationError> {
    let mut chars = name.chars();

    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || name.len() > 64 {
        return Err(MigrationError::invalid(format!(
            "invalid {} name '{}'",
            kind, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_splits_on_uppercase() {
        assert_eq!(format_snake_case("AuthorProfile"), "author_profile");
        assert_eq!(format_snake_case("author"), "author");
        assert_eq!(format_snake_case("ISBN"), "isbn");
    }

    #[test]
    fn identifiers_accept_sql_names() {
        assert!(validate_identifier("table", "books").is_ok());
        assert!(validate_identifier("column", "_author_id2").is_ok());
    }

    #[test]
    fn identifiers_reject_quotes_and_blanks() {
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", "1books").is_err());
        assert!(validate_identifier("table", "books\"; DROP").is_err());
        assert!(validate_identifier("column", "author id").is_err());
    }
}
