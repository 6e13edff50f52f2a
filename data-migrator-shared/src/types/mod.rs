mod constraint;
mod definition;
mod query;
mod records;
mod relation;
mod schema;
mod value;

pub use constraint::{GlobalConstraint, LocalConstraint, ResolvedConstraint};
pub use definition::{ColumnMap, IdentityKind, MapEntry, MigrationDefinition, RelationSpec};
pub use query::{unqualified, Filter, Join, SelectColumn, SelectQuery};
pub use records::{FailedRecord, ReviewEntry};
pub use relation::ResolvedForeign;
pub use schema::{ColumnDefinition, ColumnKind, TableDefinition};
pub use value::{Row, Value};
