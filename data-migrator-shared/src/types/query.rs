//! Backend-neutral description of the select queries the engine issues.
//!
//! Column references are either bare (`name`) or qualified (`table.name`).
//! Backends render these into SQL; the in-memory backend evaluates them
//! directly.
use crate::types::value::Value;

/// One output column of a select.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub expr: String,
    pub alias: Option<String>,
}

impl SelectColumn {
    /// Key the column gets in result rows.
    pub fn output_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias.as_str(),
            None => unqualified(&self.expr),
        }
    }
}

/// `INNER JOIN table ON left = right`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    Lte { column: String, value: Value },
    NotNull { column: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            column: column.into(),
            values,
        }
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Filter::NotNull {
            column: column.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. }
            | Filter::In { column, .. }
            | Filter::Lte { column, .. }
            | Filter::NotNull { column } => column.as_str(),
        }
    }
}

/// A filtered, joined select against one base table.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub columns: Vec<SelectColumn>,
    pub joins: Vec<Join>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<String>,
}

impl SelectQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn select(mut self, expr: impl Into<String>) -> Self {
        self.add_select(expr, None);
        self
    }

    pub fn select_as(mut self, expr: impl Into<String>, alias: impl Into<String>) -> Self {
        self.add_select(expr, Some(alias.into()));
        self
    }

    pub fn join(
        mut self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.add_join(table, left, right);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    /// Adds a select column unless an identical one is already present.
    pub fn add_select(&mut self, expr: impl Into<String>, alias: Option<String>) {
        let column = SelectColumn {
            expr: expr.into(),
            alias,
        };
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
    }

    /// Adds an inner join unless the table is already joined.
    pub fn add_join(
        &mut self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) {
        let table = table.into();
        if table != self.table && !self.joins.iter().any(|j| j.table == table) {
            self.joins.push(Join {
                table,
                left: left.into(),
                right: right.into(),
            });
        }
    }

    pub fn is_joined(&self, table: &str) -> bool {
        self.joins.iter().any(|j| j.table == table)
    }
}

/// Strips a `table.` qualifier from a column reference.
pub fn unqualified(expr: &str) -> &str {
    expr.rsplit_once('.').map(|(_, column)| column).unwrap_or(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_names() {
        let query = SelectQuery::table("orders")
            .select("orders.id")
            .select_as("orders.customer", "customer_id")
            .select("orders.id");
        assert_eq!(query.columns.len(), 2);
        assert_eq!(query.columns[0].output_name(), "id");
        assert_eq!(query.columns[1].output_name(), "customer_id");
    }

    #[test]
    fn test_join_is_added_once() {
        let query = SelectQuery::table("orders")
            .join("customers", "customers.id", "orders.customer")
            .join("customers", "customers.id", "orders.customer")
            .join("orders", "orders.id", "orders.id");
        assert_eq!(query.joins.len(), 1);
        assert!(query.is_joined("customers"));
    }
}
