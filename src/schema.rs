//! Relationship schema: which resolvers are wired together, under what
//! names, and through which foreign-key fields.
//!
//! A relationship is master/detail: the detail record carries a foreign key
//! pointing at its master's id. The master side is reachable from a detail
//! query through `master_name` (dotted paths, `account.name`), the detail
//! side from a master query through `detail_name` (nested subqueries,
//! `(select ... from contacts)`).

use serde::{Deserialize, Serialize};

/// Field-naming conventions applied when a relationship does not override
/// them explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingRules {
    /// Primary key field present on every record.
    pub id_field: String,
    /// Suffix appended to a master name to form the default foreign key.
    pub fk_suffix: String,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            fk_suffix: "Id".to_string(),
        }
    }
}

impl NamingRules {
    /// Default foreign-key field for a master reachable as `master_name`,
    /// e.g. `account` -> `accountId`.
    pub fn foreign_key(&self, master_name: &str) -> String {
        format!("{}{}", master_name, self.fk_suffix)
    }
}

/// One master/detail edge of the relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Resolver name of the master side.
    pub master: String,
    /// Resolver name of the detail side.
    pub detail: String,
    /// Path segment on detail records that reaches the master record.
    pub master_name: String,
    /// Subquery `from` name on master queries that reaches the details.
    pub detail_name: String,
    /// Foreign-key field on detail records holding the master id.
    pub foreign_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    naming: NamingRules,
    relationships: Vec<Relationship>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::with_naming(NamingRules::default())
    }

    pub fn with_naming(naming: NamingRules) -> Self {
        Self {
            naming,
            relationships: Vec::new(),
        }
    }

    pub fn naming(&self) -> &NamingRules {
        &self.naming
    }

    pub fn id_field(&self) -> &str {
        &self.naming.id_field
    }

    /// Register a master/detail edge. When `foreign_key` is `None` the
    /// naming rules derive it from `master_name`.
    pub fn add_relationship(
        &mut self,
        master: impl Into<String>,
        detail: impl Into<String>,
        master_name: impl Into<String>,
        detail_name: impl Into<String>,
        foreign_key: Option<String>,
    ) -> &mut Self {
        let master_name = master_name.into();
        let foreign_key = foreign_key.unwrap_or_else(|| self.naming.foreign_key(&master_name));
        self.relationships.push(Relationship {
            master: master.into(),
            detail: detail.into(),
            master_name,
            detail_name: detail_name.into(),
            foreign_key,
        });
        self
    }

    /// Relationship reached by following `master_name` from a record of
    /// `detail_resolver`. Exact name match first, then case-insensitive.
    pub fn master_of(&self, detail_resolver: &str, master_name: &str) -> Option<&Relationship> {
        self.find(|r| r.detail == detail_resolver, |r| &r.master_name, master_name)
    }

    /// Relationship reached by a nested subquery `from detail_name` inside a
    /// query over `master_resolver`.
    pub fn details_of(&self, master_resolver: &str, detail_name: &str) -> Option<&Relationship> {
        self.find(|r| r.master == master_resolver, |r| &r.detail_name, detail_name)
    }

    fn find(
        &self,
        side: impl Fn(&Relationship) -> bool,
        key: impl Fn(&Relationship) -> &str,
        name: &str,
    ) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|r| side(r) && key(r) == name)
            .or_else(|| {
                self.relationships
                    .iter()
                    .find(|r| side(r) && key(r).eq_ignore_ascii_case(name))
            })
    }
}

/// Everything the compiler needs to resolve a query: the relationship
/// graph, the declared resolver names and the function registry. Borrowed
/// from the engine per compilation; never mutated.
pub struct Schema<'a> {
    pub graph: &'a RelationshipGraph,
    pub resolvers: &'a [String],
    pub functions: &'a crate::functions::FunctionRegistry,
}

impl<'a> Schema<'a> {
    /// Canonical resolver name for a query-text name. Exact match first,
    /// then case-insensitive.
    pub fn canonical_resolver(&self, name: &str) -> Option<&'a str> {
        self.resolvers
            .iter()
            .find(|r| r.as_str() == name)
            .or_else(|| self.resolvers.iter().find(|r| r.eq_ignore_ascii_case(name)))
            .map(|s| s.as_str())
    }
}
