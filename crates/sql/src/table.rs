//! Validated, optionally schema-qualified table names.

use historiandb_core::{StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::fmt;

/// PostgreSQL truncates identifiers longer than this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Table name safe to splice into SQL.
///
/// Identifiers are restricted to `[A-Za-z_][A-Za-z0-9_]*` and always emitted
/// double-quoted, so operator-supplied names cannot inject SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    /// Parse `table` or `schema.table`.
    pub fn parse(input: &str) -> StoreResult<Self> {
        let mut parts = input.split('.');
        let (schema, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => (None, name),
            (Some(schema), Some(name), None) => (Some(schema), name),
            _ => {
                return Err(StoreError::InvalidConfig(format!(
                    "table name '{input}' must be 'table' or 'schema.table'"
                )))
            }
        };
        if let Some(schema) = schema {
            check_identifier(schema)?;
        }
        check_identifier(name)?;
        Ok(TableName {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Unqualified table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quoted, schema-qualified name for use in statements.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", self.name),
            None => format!("\"{}\"", self.name),
        }
    }

    /// Quoted unqualified name, as `ALTER TABLE .. RENAME TO` expects.
    pub fn quoted_name(&self) -> String {
        format!("\"{}\"", self.name)
    }

    /// Sibling table in the same schema with `suffix` appended to the name.
    pub fn with_suffix(&self, suffix: &str) -> StoreResult<Self> {
        let name = format!("{}{suffix}", self.name);
        check_identifier(&name)?;
        Ok(TableName {
            schema: self.schema.clone(),
            name,
        })
    }

    /// Like [`TableName::with_suffix`], but leaves room for `reserve` more
    /// bytes of suffix later. A name too long for that is cut short and
    /// tagged with a hash of the full name, so distinct tables still get
    /// distinct siblings.
    pub fn with_bounded_suffix(&self, suffix: &str, reserve: usize) -> StoreResult<Self> {
        let budget = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len() + reserve);
        if self.name.len() <= budget {
            return self.with_suffix(suffix);
        }
        let tag = hex::encode(&Sha256::digest(self.name.as_bytes())[..4]);
        // identifiers are ASCII, so any byte offset is a char boundary
        let keep = budget.saturating_sub(tag.len() + 1).min(self.name.len());
        let name = format!("{}_{tag}{suffix}", &self.name[..keep]);
        check_identifier(&name)?;
        Ok(TableName {
            schema: self.schema.clone(),
            name,
        })
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn check_identifier(ident: &str) -> StoreResult<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(StoreError::InvalidConfig(format!(
            "'{ident}' is not a valid SQL identifier"
        )));
    }
    if ident.len() > MAX_IDENTIFIER_LEN {
        return Err(StoreError::InvalidConfig(format!(
            "identifier '{ident}' is longer than 63 characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_qualified() {
        let plain = TableName::parse("sqlth_1_data").unwrap();
        assert_eq!(plain.quoted(), "\"sqlth_1_data\"");
        assert_eq!(plain.to_string(), "sqlth_1_data");

        let qualified = TableName::parse("ts.sqlth_1_data").unwrap();
        assert_eq!(qualified.quoted(), "\"ts\".\"sqlth_1_data\"");
        assert_eq!(qualified.quoted_name(), "\"sqlth_1_data\"");
        assert_eq!(qualified.name(), "sqlth_1_data");
    }

    #[test]
    fn test_rejects_injection() {
        assert!(TableName::parse("data; DROP TABLE x").is_err());
        assert!(TableName::parse("a.b.c").is_err());
        assert!(TableName::parse("").is_err());
        assert!(TableName::parse("1data").is_err());
        assert!(TableName::parse("data\"").is_err());
    }

    #[test]
    fn test_suffix_keeps_schema() {
        let table = TableName::parse("ts.data").unwrap();
        let backup = table.with_suffix("_backup_20240101_000000").unwrap();
        assert_eq!(backup.to_string(), "ts.data_backup_20240101_000000");
        assert!(table.with_suffix(&"x".repeat(80)).is_err());
    }

    #[test]
    fn test_bounded_suffix_shortens_long_names() {
        let short = TableName::parse("ts.data").unwrap();
        assert_eq!(
            short.with_bounded_suffix("_backup_20240101_000000", 8).unwrap(),
            short.with_suffix("_backup_20240101_000000").unwrap()
        );

        let long = TableName::parse(&format!("ts.{}", "history_".repeat(6))).unwrap();
        assert!(long.with_suffix("_backup_20240101_000000").is_err());
        let backup = long.with_bounded_suffix("_backup_20240101_000000", 8).unwrap();
        assert_eq!(backup.name().len(), 63 - 8);
        assert!(backup.name().starts_with("history_history_"));
        assert!(backup.name().ends_with("_backup_20240101_000000"));
        assert_eq!(backup.to_string().split('.').next(), Some("ts"));
        backup.with_suffix("_partial").unwrap();

        let other = TableName::parse(&format!("ts.{}x", "history_".repeat(6))).unwrap();
        assert_ne!(
            other.with_bounded_suffix("_backup_20240101_000000", 8).unwrap(),
            backup
        );
    }
}
