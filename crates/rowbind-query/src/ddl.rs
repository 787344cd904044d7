//! CREATE TABLE / DROP TABLE statements generated from a descriptor.

use rowbind_core::{ColumnBinding, Dialect, RecordType};

/// Builder for CREATE TABLE statements.
#[derive(Debug)]
pub struct CreateTable<'d, R> {
    descriptor: &'d RecordType<R>,
    if_not_exists: bool,
}

impl<'d, R> CreateTable<'d, R> {
    pub fn new(descriptor: &'d RecordType<R>) -> Self {
        Self {
            descriptor,
            if_not_exists: false,
        }
    }

    /// Add IF NOT EXISTS clause.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// A lone integer identity key becomes the table's rowid alias.
    fn inline_identity_key(&self) -> Option<usize> {
        match self.descriptor.primary_key() {
            [only] if self.descriptor.identity() == Some(*only) => {
                let binding = &self.descriptor.columns()[*only];
                binding.field_type().is_integer().then_some(*only)
            }
            _ => None,
        }
    }

    fn column_definition(&self, dialect: Dialect, binding: &ColumnBinding<R>, inline_key: bool) -> String {
        let name = dialect.quote_identifier(binding.column());
        if inline_key {
            return match dialect {
                Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name),
                Dialect::Postgres => format!("{} BIGSERIAL PRIMARY KEY", name),
                Dialect::Mysql => format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", name),
            };
        }
        let mut def = format!("{} {}", name, binding.field_type().sql_type(dialect));
        if !binding.is_nullable() || binding.is_primary_key() {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// Build the CREATE TABLE SQL.
    pub fn build(&self, dialect: Dialect) -> String {
        let mut sql = String::from("CREATE TABLE ");
        if self.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&dialect.quote_identifier(self.descriptor.table()));
        sql.push_str(" (\n  ");

        let inline = self.inline_identity_key();
        let mut parts: Vec<String> = self
            .descriptor
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| self.column_definition(dialect, c, inline == Some(i)))
            .collect();
        if inline.is_none() {
            let keys: Vec<String> = self
                .descriptor
                .primary_key()
                .iter()
                .map(|&i| dialect.quote_identifier(self.descriptor.columns()[i].column()))
                .collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        sql.push_str(&parts.join(",\n  "));
        sql.push_str("\n)");
        sql
    }
}

/// `DROP TABLE [IF EXISTS] t`
pub fn drop_table<R>(descriptor: &RecordType<R>, dialect: Dialect, if_exists: bool) -> String {
    format!(
        "DROP TABLE {}{}",
        if if_exists { "IF EXISTS " } else { "" },
        dialect.quote_identifier(descriptor.table())
    )
}
