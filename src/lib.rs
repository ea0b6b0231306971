//! # resoql
//!
//! A SOQL-style query language that executes against pluggable data
//! sources instead of a native storage engine. Callers supply per-entity
//! [`Resolver`] implementations and a declarative [`RelationshipGraph`];
//! the engine parses query text, compiles it against the declared schema
//! and executes it by orchestrating resolver calls, then performs the
//! relational composition (master/detail joins), filtering, grouping and
//! aggregation, sorting and pagination the resolver itself may or may not
//! support.
//!
//! ```no_run
//! use resoql::{Engine, StaticResolver};
//! use serde_json::json;
//!
//! # async fn demo() -> resoql::Result<()> {
//! let engine = Engine::builder()
//!     .resolver(
//!         "Account",
//!         StaticResolver::new(vec![json!({"id": "A1", "name": "Acme"})]),
//!     )
//!     .resolver(
//!         "Contact",
//!         StaticResolver::new(vec![
//!             json!({"id": "C1", "name": "Ann", "accountId": "A1"}),
//!         ]),
//!     )
//!     .relationship("Account", "Contact", "account", "contacts", None)
//!     .build();
//!
//! let rows = engine
//!     .execute("select name, account.name from contact where name like 'A%'")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod compiler;
pub mod error;
pub mod events;
pub mod executor;
pub mod fixtures;
pub mod functions;
mod lexer;
pub mod parser;
pub mod pubsub;
pub mod schema;

pub use ast::{
    ComparisonOp, ConditionNode, Direction, Expression, FieldPath, FieldSpec, Literal, NullsOrder,
    Operand, OrderSpec, Query, SelectItem,
};
pub use compiler::{compile, JoinKind, QueryPlan};
pub use error::{Error, Result};
pub use events::{EventInfo, EventObserver};
pub use executor::{
    Engine, EngineBuilder, Resolver, ResolverCapabilities, ResolverContext, ResolverData,
    Transaction,
};
pub use fixtures::{StaticResolver, StaticResolverConfig};
pub use functions::{FunctionKind, FunctionRegistry};
pub use parser::{parse, parse_with_params, Params};
pub use pubsub::{ChangeCallback, ChangeEvent, ChangeKind, SubscriptionId};
pub use schema::{NamingRules, RelationshipGraph, Schema};
