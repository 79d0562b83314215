use serde::Serialize;

/// Physical location of a retained collection.
///
/// Every field is a bare SQL identifier. Identifiers are validated when the
/// owning policy is loaded (see [`is_valid_identifier`]), so repository
/// implementations may interpolate them into statements directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionTarget {
    /// Table holding the records.
    pub table: String,
    /// Unique record key, used as the ranking tie-break.
    pub id_column: String,
    /// Creation timestamp column.
    pub created_at_column: String,
    /// Owner partition column. Required by the cap rule.
    pub partition_column: Option<String>,
    /// Boolean terminal-state column. Required when the age rule is gated on it.
    pub terminal_column: Option<String>,
}

/// Returns true if `name` is safe to splice into SQL as an identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    static IDENT: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    IDENT
        .get_or_init(|| {
            regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$")
                .unwrap_or_else(|e| panic!("identifier pattern is invalid: {e}"))
        })
        .is_match(name)
}
