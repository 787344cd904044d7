//! Declarative mapping overrides.
//!
//! Overrides are plain data, so they can live in a configuration file and be
//! loaded with serde instead of being compiled into `Record::mapping`:
//!
//! ```json
//! {
//!   "table": "parts",
//!   "columns": { "qty": "quantity" },
//!   "conditions": [
//!     { "name": "lowStock", "predicates": [ { "field": "qty", "op": "lt" } ] }
//!   ],
//!   "orders": [ { "name": "byQty", "keys": [ { "field": "qty", "descending": true } ] } ]
//! }
//! ```

use crate::descriptor::{OrderSpec, WhereCondition};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-type overrides applied on top of a `RecordConfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingOverrides {
    pub table: Option<String>,
    /// Field name to column name
    pub columns: BTreeMap<String, String>,
    /// Primary key field names, in key order
    pub primary_key: Option<Vec<String>>,
    /// Fields never written by updates
    pub read_only: Vec<String>,
    pub conditions: Vec<WhereCondition>,
    pub orders: Vec<OrderSpec>,
    /// Expression name to expression text
    pub expressions: BTreeMap<String, String>,
}

impl MappingOverrides {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
