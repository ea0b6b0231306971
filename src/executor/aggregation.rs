//! Grouping for aggregate queries.
//!
//! Group identity is the serialized tuple of group-key values, so `null`
//! and `""` land in different groups. Groups keep first-seen order and each
//! keeps its member rows for aggregate folds and representative values.

use std::collections::HashMap;

use serde_json::Value;

use crate::ast::{Expression, FieldPath};
use crate::error::Result;
use crate::executor::filter::aggregate_column;
use crate::executor::helpers::pluck;
use crate::functions::FunctionRegistry;

pub(crate) struct Group {
    /// Group-key values in `group by` order; empty for the implicit
    /// whole-set group.
    pub key: Vec<Value>,
    pub members: Vec<Value>,
}

impl Group {
    /// First member's composed row; plain select fields in an aggregate
    /// query read from it.
    pub fn representative(&self) -> Option<&Value> {
        self.members.first()
    }
}

/// Partition rows by group-key tuple. An empty key list yields exactly one
/// group holding every row, even when there are none.
pub(crate) fn group_rows(rows: Vec<Value>, group_by: &[FieldPath]) -> Vec<Group> {
    if group_by.is_empty() {
        return vec![Group {
            key: Vec::new(),
            members: rows,
        }];
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();
    for row in rows {
        let key: Vec<Value> = group_by
            .iter()
            .map(|path| pluck(&row, path).cloned().unwrap_or(Value::Null))
            .collect();
        // Raw-value identity: serialization keeps null distinct from "".
        let id = serde_json::to_string(&key).unwrap_or_default();
        match groups.get_mut(&id) {
            Some(group) => group.members.push(row),
            None => {
                order.push(id.clone());
                groups.insert(
                    id,
                    Group {
                        key,
                        members: vec![row],
                    },
                );
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .collect()
}

/// Fold one aggregate call over a group's members.
pub(crate) fn aggregate_value(
    name: &str,
    args: &[Expression],
    members: &[Value],
    functions: &FunctionRegistry,
) -> Result<Value> {
    let column = aggregate_column(name, args, members, functions)?;
    functions.call(name, &column)
}
