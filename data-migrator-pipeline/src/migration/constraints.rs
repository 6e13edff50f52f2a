//! Read query construction and constraint scoping.
use data_migrator_repository::{Database, QueryExecutor, SchemaCatalog};
use data_migrator_shared::{
    Filter, GlobalConstraint, MigrationDefinition, ResolvedConstraint, SelectQuery,
};
use tracing::debug;

use crate::errors::MigrationError;

/// Qualifies a bare column with `table`.
pub(crate) fn qualify(table: &str, column: &str) -> String {
    if column.contains('.') {
        column.to_string()
    } else {
        format!("{table}.{column}")
    }
}

/// Base read query: the old table with its static filters and ordering.
pub(crate) fn base_query(definition: &MigrationDefinition) -> SelectQuery {
    let table = &definition.old_table;
    let mut query = SelectQuery::table(table);
    for (column, value) in &definition.filters {
        query
            .filters
            .push(Filter::eq(qualify(table, column), value.clone()));
    }
    let order = definition.order_by.as_deref().unwrap_or(&definition.old_id);
    query.order_by.push(qualify(table, order));
    query
}

/// Narrows `query` by every global constraint that reaches this migration.
///
/// A constraint on the migration's own old table becomes a filter. A
/// constraint on another table is joined through `old_relations` and, when
/// the constrained rows were migrated already, yields a constraint on the new
/// schema for the clean-up step.
pub(crate) async fn apply_constraints(
    definition: &MigrationDefinition,
    constraints: &[GlobalConstraint],
    target: &dyn Database,
    query: &mut SelectQuery,
) -> Result<Vec<ResolvedConstraint>, MigrationError> {
    let mut resolved = Vec::new();
    for constraint in constraints {
        if constraint.table == definition.old_table {
            query
                .filters
                .push(Filter::eq(constraint.alias(), constraint.value.clone()));
            continue;
        }

        let Some(join_column) = definition.old_relations.get(&constraint.table) else {
            debug!(
                migration = %definition.name,
                constraint = %constraint.alias(),
                "Constraint does not reach this migration"
            );
            continue;
        };

        query.add_join(
            &constraint.table,
            constraint.alias(),
            qualify(&definition.old_table, join_column),
        );
        query
            .filters
            .push(Filter::eq(constraint.alias(), constraint.value.clone()));

        let Some(local) = &constraint.local else {
            continue;
        };
        if !target.has_table(&local.table).await? {
            continue;
        }
        let found = target
            .first_value(
                &local.table,
                &[Filter::eq(&local.field, local.value.clone())],
                &local.primary_key,
                1,
            )
            .await?;
        if let Some(id) = found.into_iter().find(|id| !id.is_null()) {
            resolved.push(ResolvedConstraint {
                table: local.table.clone(),
                field: local.primary_key.clone(),
                value: id,
            });
        }
    }
    Ok(resolved)
}

/// Filter selecting the new rows a constrained run replaces, if any.
///
/// `map` translates an old column of this migration into its new column.
pub(crate) fn truncate_scope(
    definition: &MigrationDefinition,
    constraints: &[GlobalConstraint],
    resolved: &[ResolvedConstraint],
    map: impl Fn(&str) -> Option<String>,
) -> Option<Filter> {
    if let Some(constraint) = constraints
        .iter()
        .find(|constraint| constraint.table == definition.old_table)
    {
        return map(&constraint.field).map(|field| Filter::eq(field, constraint.value.clone()));
    }

    resolved.iter().find_map(|constraint| {
        definition
            .relations
            .get(&constraint.table)?
            .iter()
            .find(|relation| relation.key == constraint.field)
            .map(|relation| Filter::eq(&relation.foreign, constraint.value.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_migrator_shared::{LocalConstraint, RelationSpec, Value};

    fn orders() -> MigrationDefinition {
        let mut definition = MigrationDefinition::new("orders", "orders", "shop_orders", "id_orders")
            .relation(
                "shop_customers",
                RelationSpec {
                    foreign: "customer_id".to_string(),
                    old_foreign: "old_id".to_string(),
                    old_key: "customer".to_string(),
                    key: "id".to_string(),
                },
            );
        definition
            .old_relations
            .insert("customers".to_string(), "customer".to_string());
        definition
    }

    fn customer_constraint() -> GlobalConstraint {
        GlobalConstraint {
            table: "customers".to_string(),
            field: "id_customers".to_string(),
            value: Value::Int(5),
            local: Some(LocalConstraint {
                field: "old_id".to_string(),
                value: Value::Int(5),
                table: "shop_customers".to_string(),
                primary_key: "id".to_string(),
            }),
        }
    }

    #[test]
    fn test_base_query_orders_and_filters() {
        let mut definition = orders();
        definition
            .filters
            .insert("status".to_string(), Value::from("paid"));
        let query = base_query(&definition);
        assert_eq!(query.order_by, vec!["orders.id_orders".to_string()]);
        assert_eq!(query.filters, vec![Filter::eq("orders.status", "paid")]);
    }

    #[test]
    fn test_truncate_scope_prefers_own_table() {
        let definition = orders();
        let own = GlobalConstraint {
            table: "orders".to_string(),
            field: "id_orders".to_string(),
            value: Value::Int(3),
            local: None,
        };
        let scope = truncate_scope(&definition, &[own], &[], |_| Some("old_id".to_string()));
        assert_eq!(scope, Some(Filter::eq("old_id", 3)));
    }

    #[test]
    fn test_truncate_scope_through_relation() {
        let definition = orders();
        let resolved = [ResolvedConstraint {
            table: "shop_customers".to_string(),
            field: "id".to_string(),
            value: Value::UInt(40),
        }];
        let scope = truncate_scope(&definition, &[customer_constraint()], &resolved, |_| None);
        assert_eq!(scope, Some(Filter::eq("customer_id", Value::UInt(40))));

        assert_eq!(
            truncate_scope(&definition, &[customer_constraint()], &[], |_| None),
            None
        );
    }
}
