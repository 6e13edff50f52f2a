//! Evaluation of select queries over in-memory tables.
use std::cmp::Ordering;
use std::collections::BTreeMap;

use data_migrator_shared::{unqualified, Filter, Row, SelectQuery, Value};

use crate::errors::RepositoryError;
use crate::memory::MemoryTable;

/// A joined row keyed by `table.column`.
pub(crate) type Scope = BTreeMap<String, Value>;

pub(crate) fn scope_of(table: &str, row: &Row) -> Scope {
    row.iter()
        .map(|(column, value)| (format!("{table}.{column}"), value.clone()))
        .collect()
}

/// Resolves a bare or qualified column reference. Bare names prefer the base
/// table, then the first joined table that has the column.
pub(crate) fn lookup<'s>(scope: &'s Scope, base: &str, column: &str) -> Option<&'s Value> {
    if column.contains('.') {
        return scope.get(column);
    }
    scope.get(&format!("{base}.{column}")).or_else(|| {
        scope
            .iter()
            .find(|(key, _)| unqualified(key) == column)
            .map(|(_, value)| value)
    })
}

fn resolve<'s>(scope: &'s Scope, base: &str, column: &str) -> Result<&'s Value, RepositoryError> {
    lookup(scope, base, column).ok_or_else(|| RepositoryError::unknown_column(base, column))
}

pub(crate) fn matches(scope: &Scope, base: &str, filter: &Filter) -> Result<bool, RepositoryError> {
    let value = resolve(scope, base, filter.column())?;
    Ok(match filter {
        Filter::Eq { value: expected, .. } => value.loosely_equals(expected),
        Filter::In { values, .. } => values.iter().any(|candidate| value.loosely_equals(candidate)),
        Filter::Lte { value: bound, .. } => matches!(
            value.compare(bound),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Filter::NotNull { .. } => !value.is_null(),
    })
}

pub(crate) fn matches_all(
    scope: &Scope,
    base: &str,
    filters: &[Filter],
) -> Result<bool, RepositoryError> {
    for filter in filters {
        if !matches(scope, base, filter)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Joined, filtered and ordered scopes of `query`.
pub(crate) fn evaluate(
    tables: &BTreeMap<String, MemoryTable>,
    query: &SelectQuery,
) -> Result<Vec<Scope>, RepositoryError> {
    let base = tables
        .get(&query.table)
        .ok_or_else(|| RepositoryError::unknown_table(&query.table))?;
    let mut scopes: Vec<Scope> = base
        .rows
        .iter()
        .map(|row| scope_of(&query.table, row))
        .collect();

    for join in &query.joins {
        let joined = tables
            .get(&join.table)
            .ok_or_else(|| RepositoryError::unknown_table(&join.table))?;
        let mut next = Vec::new();
        for scope in &scopes {
            for row in &joined.rows {
                let mut candidate = scope.clone();
                candidate.extend(scope_of(&join.table, row));
                let left = resolve(&candidate, &query.table, &join.left)?;
                let right = resolve(&candidate, &query.table, &join.right)?;
                if left.loosely_equals(right) {
                    next.push(candidate);
                }
            }
        }
        scopes = next;
    }

    let mut filtered = Vec::with_capacity(scopes.len());
    for scope in scopes {
        if matches_all(&scope, &query.table, &query.filters)? {
            filtered.push(scope);
        }
    }

    for column in &query.order_by {
        for scope in &filtered {
            resolve(scope, &query.table, column)?;
        }
    }
    filtered.sort_by(|a, b| {
        for column in &query.order_by {
            let left = lookup(a, &query.table, column).unwrap_or(&Value::Null);
            let right = lookup(b, &query.table, column).unwrap_or(&Value::Null);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    Ok(filtered)
}

/// Projects a scope onto the query's select list. An empty select list
/// yields every column of the base table.
pub(crate) fn project(scope: &Scope, query: &SelectQuery) -> Result<Row, RepositoryError> {
    if query.columns.is_empty() {
        let prefix = format!("{}.", query.table);
        return Ok(scope
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|column| (column.to_string(), value.clone()))
            })
            .collect());
    }

    let mut row = Row::new();
    for column in &query.columns {
        let value = resolve(scope, &query.table, &column.expr)?;
        row.insert(column.output_name().to_string(), value.clone());
    }
    Ok(row)
}
