//! SQL identifier quoting and validation.
//!
//! Table and column names come from record declarations and JSON overrides,
//! never from row data, but they still end up spliced into SQL text. Names
//! are validated once when a descriptor is built and quoted every time they
//! are rendered.

use regex::Regex;
use std::sync::OnceLock;

/// Letters, digits and underscores, not starting with a digit, with at most
/// one `schema.` qualifier.
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$";

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // The pattern is a compile-time constant; failure here is a programming error.
        Regex::new(IDENTIFIER_PATTERN).unwrap_or_else(|e| panic!("identifier pattern: {e}"))
    })
}

/// Check whether `name` is a plain (optionally schema-qualified) identifier.
///
/// ```
/// use rowbind_core::is_valid_identifier;
///
/// assert!(is_valid_identifier("partNumber"));
/// assert!(is_valid_identifier("inventory.Part"));
/// assert!(!is_valid_identifier("part number"));
/// assert!(!is_valid_identifier("1part"));
/// ```
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use rowbind_core::quote_ident;
///
/// assert_eq!(quote_ident("Part"), "\"Part\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote each dot-separated segment of a qualified name.
///
/// ```
/// use rowbind_core::quote_qualified;
///
/// assert_eq!(quote_qualified("inventory.Part", false), "\"inventory\".\"Part\"");
/// assert_eq!(quote_qualified("Part", true), "`Part`");
/// ```
pub fn quote_qualified(name: &str, mysql: bool) -> String {
    name.split('.')
        .map(|segment| {
            if mysql {
                quote_ident_mysql(segment)
            } else {
                quote_ident(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_sql_keyword() {
        assert_eq!(quote_ident("select"), "\"select\"");
        assert_eq!(quote_ident("order"), "\"order\"");
    }

    #[test]
    fn test_quote_ident_mysql_backtick() {
        assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
    }

    #[test]
    fn test_valid_identifiers() {
        for name in ["Part", "_hidden", "part_number2", "main.Part"] {
            assert!(is_valid_identifier(name), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for name in ["", "2fast", "a.b.c", "drop;table", "semi colon", "a-b", "\"quoted\""] {
            assert!(!is_valid_identifier(name), "{name} should be invalid");
        }
    }
}
