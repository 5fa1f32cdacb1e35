use std::fmt;

/// Quotes an identifier so it is used verbatim by Postgres.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quotes a value as a SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds the filter selecting rows newer than the `bound` already present in the warehouse.
///
/// An extra user supplied filter is AND-ed to the bound.
pub fn incremental_filter(column: &str, bound: &str, extra: Option<&str>) -> String {
    let bound_filter = format!("{} > {}", quote_identifier(column), quote_literal(bound));

    match extra.map(str::trim).filter(|extra| !extra.is_empty()) {
        Some(extra) => format!("{bound_filter} AND ({extra})"),
        None => bound_filter,
    }
}

/// A read query against one source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionQuery {
    pub schema: String,
    pub table: String,
    /// Columns to select in order, empty selects every column.
    pub fields: Vec<String>,
    pub filter: Option<String>,
}

impl ExtractionQuery {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            fields: vec![],
            filter: None,
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Sets the `WHERE` clause, blank filters are ignored.
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|filter| !filter.trim().is_empty());
        self
    }

    /// `SELECT <fields-or-*> FROM <schema>.<table> [WHERE <filter>]`
    pub fn to_sql(&self) -> String {
        let projection = if self.fields.is_empty() {
            "*".to_string()
        } else {
            self.fields
                .iter()
                .map(|field| quote_identifier(field))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "SELECT {projection} FROM {}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        );
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }

        sql
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM ({}) AS extraction", self.to_sql())
    }

    /// The query wrapped in a text format `COPY` so rows are streamed instead of buffered.
    pub fn copy_sql(&self) -> String {
        format!("COPY ({}) TO STDOUT", self.to_sql())
    }
}

impl fmt::Display for ExtractionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_every_column_by_default() {
        let query = ExtractionQuery::new("public", "orders");
        assert_eq!(query.to_sql(), r#"SELECT * FROM "public"."orders""#);
    }

    #[test]
    fn selects_fields_with_filter() {
        let query = ExtractionQuery::new("public", "orders")
            .with_fields(vec!["id".to_string(), "amount".to_string()])
            .with_filter(Some("amount > 10".to_string()));

        assert_eq!(
            query.to_sql(),
            r#"SELECT "id", "amount" FROM "public"."orders" WHERE amount > 10"#
        );
        assert_eq!(
            query.count_sql(),
            r#"SELECT COUNT(*) FROM (SELECT "id", "amount" FROM "public"."orders" WHERE amount > 10) AS extraction"#
        );
        assert_eq!(
            query.copy_sql(),
            r#"COPY (SELECT "id", "amount" FROM "public"."orders" WHERE amount > 10) TO STDOUT"#
        );
    }

    #[test]
    fn blank_filter_is_ignored() {
        let query = ExtractionQuery::new("public", "orders").with_filter(Some("  ".to_string()));
        assert_eq!(query.filter, None);
    }

    #[test]
    fn builds_incremental_filters() {
        assert_eq!(
            incremental_filter("created_at", "2024-01-01 00:00:00", None),
            r#""created_at" > '2024-01-01 00:00:00'"#
        );
        assert_eq!(
            incremental_filter("id", "O'Brien", Some("kind <> 'noise'")),
            r#""id" > 'O''Brien' AND (kind <> 'noise')"#
        );
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier(r#"we"ird"#), r#""we""ird""#);
    }
}
