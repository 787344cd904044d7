//! SQL clause rendering (WHERE, ORDER BY, LIMIT/OFFSET, expressions).

use crate::statement::{ParamSource, StatementParam};
use rowbind_core::{
    Dialect, Error, Expression, ExpressionPart, MappingError, MappingErrorKind, OrderSpec,
    RecordType, Result, WhereCondition,
};

/// Accumulates positional parameters while clauses render.
#[derive(Debug, Default)]
pub(crate) struct ParamList {
    pub(crate) params: Vec<StatementParam>,
    pub(crate) arguments: usize,
}

impl ParamList {
    /// Placeholder for a parameter bound from the record's own field.
    pub(crate) fn field(&mut self, dialect: Dialect, binding: usize) -> String {
        self.push(dialect, binding, ParamSource::Field)
    }

    /// Placeholder for the next caller-supplied argument.
    pub(crate) fn argument(&mut self, dialect: Dialect, binding: usize) -> String {
        let n = self.arguments;
        self.arguments += 1;
        self.push(dialect, binding, ParamSource::Argument(n))
    }

    fn push(&mut self, dialect: Dialect, binding: usize, source: ParamSource) -> String {
        self.params.push(StatementParam { binding, source });
        dialect.placeholder(self.params.len())
    }
}

fn unknown_field<R>(descriptor: &RecordType<R>, field: &str) -> Error {
    Error::Mapping(MappingError::new(
        MappingErrorKind::UnknownField,
        descriptor.type_name(),
        format!("{} has no field '{}'", descriptor.type_name(), field),
    ))
}

/// WHERE clause body (without the keyword); `None` for an empty condition.
pub(crate) fn where_clause<R>(
    descriptor: &RecordType<R>,
    dialect: Dialect,
    condition: &WhereCondition,
    params: &mut ParamList,
) -> Result<Option<String>> {
    let mut terms = Vec::with_capacity(condition.predicates.len());
    for predicate in &condition.predicates {
        let index = descriptor
            .field_index(&predicate.field)
            .ok_or_else(|| unknown_field(descriptor, &predicate.field))?;
        let column = dialect.quote_identifier(descriptor.columns()[index].column());
        let op = predicate.op;
        if !op.takes_operand() {
            terms.push(format!("{} {}", column, op.as_sql()));
            continue;
        }
        let placeholder = match &predicate.value {
            Some(literal) => params.push(dialect, index, ParamSource::Literal(literal.clone())),
            None => params.argument(dialect, index),
        };
        terms.push(format!("{} {} {}", column, op.as_sql(), placeholder));
    }
    if terms.is_empty() {
        Ok(None)
    } else {
        Ok(Some(terms.join(" AND ")))
    }
}

/// ORDER BY clause body (without the keyword); `None` for an empty order.
pub(crate) fn order_clause<R>(
    descriptor: &RecordType<R>,
    dialect: Dialect,
    order: &OrderSpec,
) -> Result<Option<String>> {
    let mut keys = Vec::with_capacity(order.keys.len());
    for key in &order.keys {
        let binding = descriptor
            .field(&key.field)
            .map_err(|_| unknown_field(descriptor, &key.field))?;
        keys.push(format!(
            "{} {}",
            dialect.quote_identifier(binding.column()),
            if key.descending { "DESC" } else { "ASC" }
        ));
    }
    if keys.is_empty() {
        Ok(None)
    } else {
        Ok(Some(keys.join(", ")))
    }
}

/// A named expression with its field references replaced by quoted columns.
pub(crate) fn expression<R>(
    descriptor: &RecordType<R>,
    dialect: Dialect,
    expression: &Expression,
) -> String {
    expression
        .parts
        .iter()
        .map(|part| match part {
            ExpressionPart::Text(text) => text.clone(),
            ExpressionPart::Column(i) => dialect.quote_identifier(descriptor.columns()[*i].column()),
        })
        .collect()
}

/// LIMIT clause.
#[derive(Debug, Clone, Copy)]
pub struct Limit(pub u64);

/// OFFSET clause.
#[derive(Debug, Clone, Copy)]
pub struct Offset(pub u64);

/// ` LIMIT n OFFSET m`
pub(crate) fn page_clause(limit: Limit, offset: Offset) -> String {
    format!(" LIMIT {} OFFSET {}", limit.0, offset.0)
}
