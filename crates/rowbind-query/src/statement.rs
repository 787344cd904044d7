//! Built statements and parameter binding.

use rowbind_core::{Error, ParamBuffer, RecordType, Result, TranslationError, Value};

/// Where a parameter's value comes from at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    /// The bound record's own field value.
    Field,
    /// The n-th (0-based) positional argument supplied by the caller.
    Argument(usize),
    /// A literal declared in the condition.
    Literal(Value),
}

/// One positional parameter of a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementParam {
    /// Binding whose translator encodes the value
    pub binding: usize,
    pub source: ParamSource,
}

/// Parameterized SQL text plus everything needed to bind and read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    /// Parameters in placeholder order
    pub params: Vec<StatementParam>,
    /// Bindings of the selected columns, in result column order
    pub columns: Vec<usize>,
    /// Number of caller-supplied arguments expected
    pub arguments: usize,
}

impl Statement {
    /// Encode every parameter through its binding's translator.
    ///
    /// `record` supplies `Field` parameters and `args` supplies `Argument`
    /// ones; both are field-form values.
    pub fn bind<R>(
        &self,
        descriptor: &RecordType<R>,
        record: Option<&R>,
        args: &[Value],
    ) -> Result<Vec<Value>> {
        let mut buffer = ParamBuffer::new(self.params.len());
        for (index, param) in self.params.iter().enumerate() {
            let binding = descriptor.column(param.binding).ok_or_else(|| {
                Error::Translation(TranslationError::new(
                    "column binding",
                    format!("binding {} of {}", param.binding, descriptor.type_name()),
                ))
            })?;
            let value = match &param.source {
                ParamSource::Field => match record {
                    Some(r) => binding.value(r),
                    None => {
                        return Err(Error::Translation(
                            TranslationError::new("record to bind", "no record")
                                .with_column(binding.column()),
                        ));
                    }
                },
                ParamSource::Argument(n) => args.get(*n).cloned().ok_or_else(|| {
                    Error::Translation(TranslationError::new(
                        "positional argument",
                        format!("argument {} of {}", n + 1, args.len()),
                    ))
                })?,
                ParamSource::Literal(v) => v.clone(),
            };
            binding
                .translator()
                .encode(&mut buffer, index, &value)
                .map_err(|e| match e {
                    Error::Translation(t) if t.column.is_none() => {
                        Error::Translation(t.with_column(binding.column()))
                    }
                    other => other,
                })?;
            tracing::trace!(index = index + 1, column = binding.column(), "Bound parameter");
        }
        buffer.into_values()
    }
}
