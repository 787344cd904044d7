//! Statement builder for SELECT, INSERT, UPDATE, DELETE and aggregates.

use crate::clause::{self, Limit, Offset, ParamList};
use crate::statement::Statement;
use rowbind_core::{
    Dialect, Error, MappingError, MappingErrorKind, PRIMARY_KEY_CONDITION, RecordType, Result,
    WhereCondition,
};

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }

    /// MIN and MAX return a value of the aggregated field's own type.
    pub const fn preserves_type(self) -> bool {
        matches!(self, Aggregate::Min | Aggregate::Max)
    }
}

/// Builds statements for one record type and dialect.
///
/// Named conditions and orders are looked up when the statement is built,
/// so a typo is a `MappingError` before anything reaches the database.
///
/// ```
/// use rowbind_core::{field, Dialect, FieldType, Record, RecordConfig, RecordType};
/// use rowbind_query::StatementBuilder;
///
/// #[derive(Debug, Default, Clone)]
/// struct Part {
///     part_number: i32,
///     qty: i32,
/// }
///
/// impl Record for Part {
///     fn mapping() -> RecordConfig<Self> {
///         RecordConfig::new()
///             .field(field!(Part, part_number, "partNumber", FieldType::Int32))
///             .field(field!(Part, qty, FieldType::Int32))
///     }
/// }
///
/// let part = RecordType::<Part>::get().unwrap();
/// let update = StatementBuilder::new(&part, Dialect::Sqlite).update().unwrap();
/// assert_eq!(
///     update.sql,
///     r#"UPDATE "Part" SET "qty" = ?1 WHERE "partNumber" = ?2"#
/// );
/// ```
#[derive(Debug)]
pub struct StatementBuilder<'d, R> {
    descriptor: &'d RecordType<R>,
    dialect: Dialect,
}

impl<'d, R> StatementBuilder<'d, R> {
    pub fn new(descriptor: &'d RecordType<R>, dialect: Dialect) -> Self {
        Self {
            descriptor,
            dialect,
        }
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn table(&self) -> String {
        self.quote(self.descriptor.table())
    }

    fn mapping_error(&self, kind: MappingErrorKind, message: String) -> Error {
        Error::Mapping(MappingError::new(kind, self.descriptor.type_name(), message))
    }

    /// Bindings selected by SELECT: everything except write-only columns.
    fn selected(&self) -> Vec<usize> {
        self.descriptor
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_write_only())
            .map(|(i, _)| i)
            .collect()
    }

    fn select_with(
        &self,
        condition: Option<&WhereCondition>,
        order: Option<&str>,
        page: Option<(Limit, Offset)>,
    ) -> Result<Statement> {
        let columns = self.selected();
        let list: Vec<String> = columns
            .iter()
            .map(|&i| self.quote(self.descriptor.columns()[i].column()))
            .collect();
        let mut sql = format!("SELECT {} FROM {}", list.join(", "), self.table());

        let mut params = ParamList::default();
        if let Some(condition) = condition {
            if let Some(body) =
                clause::where_clause(self.descriptor, self.dialect, condition, &mut params)?
            {
                sql.push_str(" WHERE ");
                sql.push_str(&body);
            }
        }
        if let Some(name) = order.filter(|n| !n.is_empty()) {
            let spec = self.descriptor.order(name)?;
            if let Some(body) = clause::order_clause(self.descriptor, self.dialect, spec)? {
                sql.push_str(" ORDER BY ");
                sql.push_str(&body);
            }
        }
        if let Some((limit, offset)) = page {
            sql.push_str(&clause::page_clause(limit, offset));
        }

        tracing::debug!(record = self.descriptor.type_name(), sql = %sql, "Built SELECT");
        Ok(Statement {
            sql,
            params: params.params,
            columns,
            arguments: params.arguments,
        })
    }

    fn named_condition(&self, condition: Option<&str>) -> Result<Option<&'d WhereCondition>> {
        match condition.filter(|n| !n.is_empty()) {
            Some(name) => self.descriptor.condition(name).map(Some),
            None => Ok(None),
        }
    }

    /// `SELECT ... [WHERE <condition>] [ORDER BY <order>]`
    ///
    /// `None` or an empty name means no condition (or no order).
    pub fn select(&self, condition: Option<&str>, order: Option<&str>) -> Result<Statement> {
        let condition = self.named_condition(condition)?;
        self.select_with(condition, order, None)
    }

    /// Select by primary key; arguments are the key values in key order.
    pub fn select_by_key(&self) -> Result<Statement> {
        self.select(Some(PRIMARY_KEY_CONDITION), None)
    }

    /// One page of a select: `... LIMIT <limit> OFFSET <offset>`.
    pub fn select_page(
        &self,
        condition: Option<&str>,
        order: Option<&str>,
        limit: Limit,
        offset: Offset,
    ) -> Result<Statement> {
        let condition = self.named_condition(condition)?;
        self.select_with(condition, order, Some((limit, offset)))
    }

    /// Select with a condition that is not declared on the record type.
    ///
    /// Its fields are validated the same way as declared conditions.
    pub fn select_matching(
        &self,
        condition: &WhereCondition,
        order: Option<&str>,
    ) -> Result<Statement> {
        self.select_with(Some(condition), order, None)
    }

    /// `INSERT INTO t (...) VALUES (...)` over every non-identity column.
    pub fn insert(&self) -> Result<Statement> {
        let mut params = ParamList::default();
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        for (index, binding) in self.descriptor.columns().iter().enumerate() {
            if binding.is_identity() {
                continue;
            }
            columns.push(self.quote(binding.column()));
            placeholders.push(params.field(self.dialect, index));
        }
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.table())
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(),
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        tracing::debug!(record = self.descriptor.type_name(), sql = %sql, "Built INSERT");
        Ok(Statement {
            sql,
            params: params.params,
            columns: Vec::new(),
            arguments: 0,
        })
    }

    fn key_clause(&self, params: &mut ParamList) -> String {
        let terms: Vec<String> = self
            .descriptor
            .primary_key()
            .iter()
            .map(|&i| {
                format!(
                    "{} = {}",
                    self.quote(self.descriptor.columns()[i].column()),
                    params.field(self.dialect, i)
                )
            })
            .collect();
        terms.join(" AND ")
    }

    /// `UPDATE t SET ... WHERE <key>`
    ///
    /// Sets every column except key, read-only and identity columns.
    pub fn update(&self) -> Result<Statement> {
        let mut params = ParamList::default();
        let assignments: Vec<String> = self
            .descriptor
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_updatable())
            .map(|(i, c)| format!("{} = {}", self.quote(c.column()), params.field(self.dialect, i)))
            .collect();
        if assignments.is_empty() {
            return Err(self.mapping_error(
                MappingErrorKind::InvalidField,
                format!("{} has no updatable columns", self.descriptor.type_name()),
            ));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table(),
            assignments.join(", "),
            self.key_clause(&mut params)
        );
        tracing::debug!(record = self.descriptor.type_name(), sql = %sql, "Built UPDATE");
        Ok(Statement {
            sql,
            params: params.params,
            columns: Vec::new(),
            arguments: 0,
        })
    }

    /// `DELETE FROM t WHERE <key>`
    pub fn delete(&self) -> Result<Statement> {
        let mut params = ParamList::default();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.table(),
            self.key_clause(&mut params)
        );
        tracing::debug!(record = self.descriptor.type_name(), sql = %sql, "Built DELETE");
        Ok(Statement {
            sql,
            params: params.params,
            columns: Vec::new(),
            arguments: 0,
        })
    }

    /// `SELECT <FN>(<target>) FROM t [WHERE <condition>]`
    ///
    /// `target` is `*` (COUNT only), a field name or a named expression.
    /// When the target is a field and the function preserves its type, the
    /// statement's `columns` names that field so the result can be decoded.
    pub fn aggregate(
        &self,
        function: Aggregate,
        target: &str,
        condition: Option<&str>,
    ) -> Result<Statement> {
        let mut columns = Vec::new();
        let expr = if target == "*" {
            if function != Aggregate::Count {
                return Err(self.mapping_error(
                    MappingErrorKind::UnknownExpression,
                    format!("{}(*) is not supported", function.as_sql()),
                ));
            }
            "*".to_string()
        } else if let Some(index) = self.descriptor.field_index(target) {
            if function.preserves_type() {
                columns.push(index);
            }
            self.quote(self.descriptor.columns()[index].column())
        } else {
            let expression = self.descriptor.expression(target)?;
            clause::expression(self.descriptor, self.dialect, expression)
        };

        let mut sql = format!("SELECT {}({}) FROM {}", function.as_sql(), expr, self.table());
        let mut params = ParamList::default();
        if let Some(condition) = self.named_condition(condition)? {
            if let Some(body) =
                clause::where_clause(self.descriptor, self.dialect, condition, &mut params)?
            {
                sql.push_str(" WHERE ");
                sql.push_str(&body);
            }
        }
        tracing::debug!(record = self.descriptor.type_name(), sql = %sql, "Built aggregate");
        Ok(Statement {
            sql,
            params: params.params,
            columns,
            arguments: params.arguments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::ParamSource;
    use rowbind_core::{
        Comparison, FieldType, OrderSpec, Record, RecordConfig, Value, field,
    };

    #[derive(Debug, Default, Clone)]
    struct Item {
        id: i64,
        kind: String,
        qty: i32,
        note: Option<String>,
        secret: Option<String>,
    }

    impl Record for Item {
        fn mapping() -> RecordConfig<Self> {
            RecordConfig::new()
                .table("items")
                .field(field!(Item, id, FieldType::Int64))
                .field(field!(Item, kind, "type", FieldType::Text))
                .field(field!(Item, qty, FieldType::Int32))
                .field(field!(Item, note, FieldType::Text).read_only().nullable(true))
                .field(field!(Item, secret, FieldType::Text).write_only().nullable(true))
                .primary_key(&["id", "type"])
                .condition(
                    WhereCondition::new("lowStock")
                        .compare("qty", Comparison::Lt)
                        .literal("type", Comparison::Eq, "bolt"),
                )
                .order(OrderSpec::new("byQty").desc("qty").asc("id"))
                .expression("doubled", "{qty} * 2")
        }
    }

    #[derive(Debug, Default, Clone)]
    struct Ticket {
        id: i64,
        title: String,
    }

    impl Record for Ticket {
        fn mapping() -> RecordConfig<Self> {
            RecordConfig::new()
                .field(field!(Ticket, id, FieldType::Int64).identity())
                .field(field!(Ticket, title, FieldType::Text))
        }
    }

    fn items(dialect: Dialect) -> (std::sync::Arc<RecordType<Item>>, Dialect) {
        (RecordType::<Item>::get().unwrap(), dialect)
    }

    #[test]
    fn select_skips_write_only() {
        let (item, d) = items(Dialect::Sqlite);
        let stmt = StatementBuilder::new(&item, d).select(None, None).unwrap();
        assert_eq!(
            stmt.sql,
            r#"SELECT "id", "type", "qty", "note" FROM "items""#
        );
        assert_eq!(stmt.columns, vec![0, 1, 2, 3]);
        assert_eq!(stmt.arguments, 0);
    }

    #[test]
    fn select_by_composite_key() {
        let (item, d) = items(Dialect::Postgres);
        let stmt = StatementBuilder::new(&item, d).select_by_key().unwrap();
        assert_eq!(
            stmt.sql,
            r#"SELECT "id", "type", "qty", "note" FROM "items" WHERE "id" = $1 AND "type" = $2"#
        );
        assert_eq!(stmt.arguments, 2);
        assert_eq!(stmt.params[1].source, ParamSource::Argument(1));
    }

    #[test]
    fn named_condition_and_order() {
        let (item, d) = items(Dialect::Sqlite);
        let stmt = StatementBuilder::new(&item, d)
            .select(Some("lowStock"), Some("byQty"))
            .unwrap();
        assert_eq!(
            stmt.sql,
            r#"SELECT "id", "type", "qty", "note" FROM "items" WHERE "qty" < ?1 AND "type" = ?2 ORDER BY "qty" DESC, "id" ASC"#
        );
        assert_eq!(stmt.arguments, 1);
        assert_eq!(
            stmt.params[1].source,
            ParamSource::Literal(Value::Text("bolt".into()))
        );
    }

    #[test]
    fn unknown_names_fail_at_build() {
        let (item, d) = items(Dialect::Sqlite);
        let b = StatementBuilder::new(&item, d);
        assert!(matches!(
            b.select(Some("nope"), None),
            Err(Error::Mapping(MappingError {
                kind: MappingErrorKind::UnknownCondition,
                ..
            }))
        ));
        assert!(matches!(
            b.select(None, Some("nope")),
            Err(Error::Mapping(MappingError {
                kind: MappingErrorKind::UnknownOrder,
                ..
            }))
        ));
        let adhoc = WhereCondition::fields("adhoc", &["missing"]);
        assert!(matches!(
            b.select_matching(&adhoc, None),
            Err(Error::Mapping(MappingError {
                kind: MappingErrorKind::UnknownField,
                ..
            }))
        ));
    }

    #[test]
    fn empty_condition_name_is_unconditioned() {
        let (item, d) = items(Dialect::Sqlite);
        let stmt = StatementBuilder::new(&item, d).select(Some(""), Some("")).unwrap();
        assert!(!stmt.sql.contains("WHERE"));
        assert!(!stmt.sql.contains("ORDER BY"));
    }

    #[test]
    fn insert_update_delete() {
        let (item, d) = items(Dialect::Sqlite);
        let b = StatementBuilder::new(&item, d);
        assert_eq!(
            b.insert().unwrap().sql,
            r#"INSERT INTO "items" ("id", "type", "qty", "note", "secret") VALUES (?1, ?2, ?3, ?4, ?5)"#
        );
        let update = b.update().unwrap();
        assert_eq!(
            update.sql,
            r#"UPDATE "items" SET "qty" = ?1, "secret" = ?2 WHERE "id" = ?3 AND "type" = ?4"#
        );
        assert!(update.params.iter().all(|p| p.source == ParamSource::Field));
        assert_eq!(
            b.delete().unwrap().sql,
            r#"DELETE FROM "items" WHERE "id" = ?1 AND "type" = ?2"#
        );
    }

    #[test]
    fn insert_omits_identity() {
        let ticket = RecordType::<Ticket>::get().unwrap();
        let b = StatementBuilder::new(&ticket, Dialect::Mysql);
        assert_eq!(
            b.insert().unwrap().sql,
            "INSERT INTO `Ticket` (`title`) VALUES (?)"
        );
        assert_eq!(
            b.update().unwrap().sql,
            "UPDATE `Ticket` SET `title` = ? WHERE `id` = ?"
        );
    }

    #[test]
    fn paging() {
        let (item, d) = items(Dialect::Sqlite);
        let stmt = StatementBuilder::new(&item, d)
            .select_page(None, Some("byQty"), Limit(10), Offset(20))
            .unwrap();
        assert!(stmt.sql.ends_with(r#"ORDER BY "qty" DESC, "id" ASC LIMIT 10 OFFSET 20"#));
    }

    #[test]
    fn aggregates() {
        let (item, d) = items(Dialect::Sqlite);
        let b = StatementBuilder::new(&item, d);
        assert_eq!(
            b.aggregate(Aggregate::Count, "*", None).unwrap().sql,
            r#"SELECT COUNT(*) FROM "items""#
        );
        let sum = b.aggregate(Aggregate::Sum, "doubled", Some("lowStock")).unwrap();
        assert_eq!(
            sum.sql,
            r#"SELECT SUM("qty" * 2) FROM "items" WHERE "qty" < ?1 AND "type" = ?2"#
        );
        assert_eq!(sum.arguments, 1);
        let max = b.aggregate(Aggregate::Max, "qty", None).unwrap();
        assert_eq!(max.columns, vec![2]);
        assert!(matches!(
            b.aggregate(Aggregate::Avg, "weight", None),
            Err(Error::Mapping(MappingError {
                kind: MappingErrorKind::UnknownExpression,
                ..
            }))
        ));
        assert!(b.aggregate(Aggregate::Sum, "*", None).is_err());
    }

    #[test]
    fn bind_encodes_through_translators() {
        let (item, d) = items(Dialect::Sqlite);
        let b = StatementBuilder::new(&item, d);
        let record = Item {
            id: 7,
            kind: "bolt".into(),
            qty: 3,
            note: None,
            secret: Some("s".into()),
        };
        let values = b.insert().unwrap().bind(&item, Some(&record), &[]).unwrap();
        assert_eq!(
            values,
            vec![
                Value::BigInt(7),
                Value::Text("bolt".into()),
                Value::Int(3),
                Value::Null,
                Value::Text("s".into())
            ]
        );

        let by_key = b.select_by_key().unwrap();
        let values = by_key
            .bind(&item, None, &[Value::Int(7), Value::Text("bolt".into())])
            .unwrap();
        assert_eq!(values, vec![Value::BigInt(7), Value::Text("bolt".into())]);
        assert!(by_key.bind(&item, None, &[Value::Int(7)]).is_err());
    }
}
