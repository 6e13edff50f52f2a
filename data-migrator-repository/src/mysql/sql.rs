//! SQL text rendering for MySQL.
//!
//! Every value travels as a bound parameter; only identifiers are inlined,
//! quoted with backticks.
use data_migrator_shared::{ColumnDefinition, ColumnKind, Filter, Row, SelectQuery, TableDefinition, Value};

use crate::interfaces::InsertMode;

/// A statement together with the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Quotes a bare or `table.column` identifier.
pub fn quote(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| format!("`{}`", part.replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}

fn render_from(query: &SelectQuery, sql: &mut String, params: &mut Vec<Value>) {
    sql.push_str(" FROM ");
    sql.push_str(&quote(&query.table));
    for join in &query.joins {
        sql.push_str(&format!(
            " INNER JOIN {} ON {} = {}",
            quote(&join.table),
            quote(&join.left),
            quote(&join.right)
        ));
    }
    render_where(&query.filters, sql, params);
}

fn render_where(filters: &[Filter], sql: &mut String, params: &mut Vec<Value>) {
    if filters.is_empty() {
        return;
    }
    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| render_filter(filter, params))
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
}

fn render_filter(filter: &Filter, params: &mut Vec<Value>) -> String {
    match filter {
        Filter::Eq { column, value } => {
            params.push(value.clone());
            format!("{} = ?", quote(column))
        }
        Filter::In { values, .. } if values.is_empty() => "1 = 0".to_string(),
        Filter::In { column, values } => {
            params.extend(values.iter().cloned());
            let placeholders = vec!["?"; values.len()].join(", ");
            format!("{} IN ({placeholders})", quote(column))
        }
        Filter::Lte { column, value } => {
            params.push(value.clone());
            format!("{} <= ?", quote(column))
        }
        Filter::NotNull { column } => format!("{} IS NOT NULL", quote(column)),
    }
}

/// `SELECT ... LIMIT ? OFFSET ?`
pub fn select(query: &SelectQuery, offset: u64, limit: u64) -> Statement {
    let mut params = Vec::new();
    let mut sql = String::from("SELECT ");
    if query.columns.is_empty() {
        sql.push_str(&format!("{}.*", quote(&query.table)));
    } else {
        let columns: Vec<String> = query
            .columns
            .iter()
            .map(|column| format!("{} AS {}", quote(&column.expr), quote(column.output_name())))
            .collect();
        sql.push_str(&columns.join(", "));
    }
    render_from(query, &mut sql, &mut params);
    if !query.order_by.is_empty() {
        let order: Vec<String> = query.order_by.iter().map(|c| quote(c)).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    sql.push_str(" LIMIT ? OFFSET ?");
    params.push(Value::UInt(limit));
    params.push(Value::UInt(offset));
    Statement { sql, params }
}

pub fn count(query: &SelectQuery) -> Statement {
    let mut params = Vec::new();
    let mut sql = String::from("SELECT COUNT(*)");
    render_from(query, &mut sql, &mut params);
    Statement { sql, params }
}

pub fn max(table: &str, column: &str) -> Statement {
    Statement {
        sql: format!("SELECT MAX({}) FROM {}", quote(column), quote(table)),
        params: Vec::new(),
    }
}

pub fn first_value(table: &str, filters: &[Filter], column: &str, limit: u64) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!("SELECT {} FROM {}", quote(column), quote(table));
    render_where(filters, &mut sql, &mut params);
    sql.push_str(" LIMIT ?");
    params.push(Value::UInt(limit));
    Statement { sql, params }
}

pub fn delete(table: &str, filters: &[Filter]) -> Statement {
    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM {}", quote(table));
    render_where(filters, &mut sql, &mut params);
    Statement { sql, params }
}

pub fn update(table: &str, filters: &[Filter], values: &Row) -> Statement {
    let mut params: Vec<Value> = values.values().cloned().collect();
    let assignments: Vec<String> = values
        .keys()
        .map(|column| format!("{} = ?", quote(column)))
        .collect();
    let mut sql = format!("UPDATE {} SET {}", quote(table), assignments.join(", "));
    render_where(filters, &mut sql, &mut params);
    Statement { sql, params }
}

/// One multi-row insert per distinct column set, in order of first
/// appearance.
pub fn insert(table: &str, rows: &[Row], mode: InsertMode) -> Vec<Statement> {
    let mut groups: Vec<(Vec<&String>, Vec<&Row>)> = Vec::new();
    for row in rows {
        let columns: Vec<&String> = row.keys().collect();
        match groups.iter_mut().find(|(existing, _)| *existing == columns) {
            Some((_, members)) => members.push(row),
            None => groups.push((columns, vec![row])),
        }
    }

    let verb = match mode {
        InsertMode::Plain => "INSERT INTO",
        InsertMode::IgnoreDuplicates => "INSERT IGNORE INTO",
    };

    groups
        .into_iter()
        .map(|(columns, members)| {
            let column_list: Vec<String> = columns.iter().map(|c| quote(c)).collect();
            let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
            let tuples = vec![tuple; members.len()].join(", ");
            let params = members
                .iter()
                .flat_map(|row| row.values().cloned())
                .collect();
            Statement {
                sql: format!(
                    "{verb} {} ({}) VALUES {tuples}",
                    quote(table),
                    column_list.join(", ")
                ),
                params,
            }
        })
        .collect()
}

fn column_type(kind: &ColumnKind) -> String {
    match kind {
        ColumnKind::UnsignedInteger => "INT UNSIGNED".to_string(),
        ColumnKind::Integer => "INT".to_string(),
        ColumnKind::FixedString(length) => format!("CHAR({length})"),
        ColumnKind::String(length) => format!("VARCHAR({length})"),
        ColumnKind::Text => "TEXT".to_string(),
        ColumnKind::Timestamp => "TIMESTAMP NULL".to_string(),
        ColumnKind::Other(raw) => raw.clone(),
    }
}

fn column(definition: &ColumnDefinition) -> String {
    let mut sql = format!("{} {}", quote(&definition.name), column_type(&definition.kind));
    if definition.kind != ColumnKind::Timestamp {
        sql.push_str(if definition.nullable { " NULL" } else { " NOT NULL" });
    }
    if definition.auto_increment {
        sql.push_str(" AUTO_INCREMENT");
    }
    sql
}

fn index_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_index")
}

/// `ALTER TABLE ... ADD COLUMN`, followed by an index when requested.
pub fn add_column(table: &str, definition: &ColumnDefinition) -> Vec<String> {
    let mut sql = format!("ALTER TABLE {} ADD COLUMN {}", quote(table), column(definition));
    if let Some(after) = &definition.after {
        sql.push_str(&format!(" AFTER {}", quote(after)));
    }
    let mut statements = vec![sql];
    if definition.indexed {
        statements.push(format!(
            "ALTER TABLE {} ADD INDEX {} ({})",
            quote(table),
            quote(&index_name(table, &definition.name)),
            quote(&definition.name)
        ));
    }
    statements
}

pub fn change_column(table: &str, definition: &ColumnDefinition) -> String {
    format!("ALTER TABLE {} MODIFY COLUMN {}", quote(table), column(definition))
}

pub fn create_table(definition: &TableDefinition) -> String {
    let mut parts: Vec<String> = definition.columns.iter().map(column).collect();
    if let Some(primary_key) = &definition.primary_key {
        parts.push(format!("PRIMARY KEY ({})", quote(primary_key)));
    }
    for indexed in definition.columns.iter().filter(|c| c.indexed) {
        parts.push(format!(
            "INDEX {} ({})",
            quote(&index_name(&definition.name, &indexed.name)),
            quote(&indexed.name)
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&definition.name),
        parts.join(", ")
    )
}

/// Reads `INFORMATION_SCHEMA.COLUMNS.COLUMN_TYPE` into a [`ColumnKind`].
pub fn parse_column_type(column_type: &str) -> ColumnKind {
    let lowered = column_type.trim().to_ascii_lowercase();
    let base = lowered.split(['(', ' ']).next().unwrap_or_default();
    let length = lowered
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .and_then(|(inner, _)| inner.trim().parse::<u32>().ok());

    match base {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
            if lowered.contains("unsigned") {
                ColumnKind::UnsignedInteger
            } else {
                ColumnKind::Integer
            }
        }
        "char" => ColumnKind::FixedString(length.unwrap_or(1)),
        "varchar" => ColumnKind::String(length.unwrap_or(255)),
        "tinytext" | "text" | "mediumtext" | "longtext" => ColumnKind::Text,
        "timestamp" | "datetime" => ColumnKind::Timestamp,
        _ => ColumnKind::Other(column_type.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[(&str, Value)]) -> Row {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_select_with_join_filters_and_paging() {
        let query = SelectQuery::table("orders")
            .select("orders.id")
            .select_as("customers.name", "customer_name")
            .join("customers", "customers.id", "orders.customer")
            .filter(Filter::eq("customers.country", "NL"))
            .filter(Filter::is_in("orders.id", vec![Value::Int(1), Value::Int(2)]))
            .order_by("orders.id");

        let statement = select(&query, 20, 10);
        assert_eq!(
            statement.sql,
            "SELECT `orders`.`id` AS `id`, `customers`.`name` AS `customer_name` \
             FROM `orders` INNER JOIN `customers` ON `customers`.`id` = `orders`.`customer` \
             WHERE `customers`.`country` = ? AND `orders`.`id` IN (?, ?) \
             ORDER BY `orders`.`id` LIMIT ? OFFSET ?"
        );
        assert_eq!(
            statement.params,
            vec![
                Value::from("NL"),
                Value::Int(1),
                Value::Int(2),
                Value::UInt(10),
                Value::UInt(20)
            ]
        );
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let statement = delete("orders", &[Filter::is_in("old_id", Vec::new())]);
        assert_eq!(statement.sql, "DELETE FROM `orders` WHERE 1 = 0");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_insert_splits_rows_by_column_set() {
        let rows = vec![
            row(&[("id", Value::Int(5)), ("name", "Ada".into())]),
            row(&[("name", "Grace".into())]),
            row(&[("id", Value::Int(6)), ("name", "Linus".into())]),
        ];
        let statements = insert("people", &rows, InsertMode::IgnoreDuplicates);

        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].sql,
            "INSERT IGNORE INTO `people` (`id`, `name`) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(statements[0].params.len(), 4);
        assert_eq!(
            statements[1].sql,
            "INSERT IGNORE INTO `people` (`name`) VALUES (?)"
        );
    }

    #[test]
    fn test_add_indexed_column_after() {
        let statements = add_column(
            "orders",
            &ColumnDefinition::new("old_id", ColumnKind::UnsignedInteger)
                .nullable()
                .indexed()
                .after("id"),
        );
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE `orders` ADD COLUMN `old_id` INT UNSIGNED NULL AFTER `id`".to_string(),
                "ALTER TABLE `orders` ADD INDEX `orders_old_id_index` (`old_id`)".to_string(),
            ]
        );
    }

    #[test]
    fn test_create_reviews_table() {
        let definition = TableDefinition::new("orders_reviews")
            .increments("id")
            .column(ColumnDefinition::new("review_id", ColumnKind::UnsignedInteger));
        assert_eq!(
            create_table(&definition),
            "CREATE TABLE IF NOT EXISTS `orders_reviews` (`id` INT UNSIGNED NOT NULL AUTO_INCREMENT, \
             `review_id` INT UNSIGNED NOT NULL, PRIMARY KEY (`id`))"
        );
    }

    #[test]
    fn test_parse_column_type() {
        assert_eq!(parse_column_type("int(10) unsigned"), ColumnKind::UnsignedInteger);
        assert_eq!(parse_column_type("bigint"), ColumnKind::Integer);
        assert_eq!(parse_column_type("char(40)"), ColumnKind::FixedString(40));
        assert_eq!(parse_column_type("varchar(191)"), ColumnKind::String(191));
        assert_eq!(parse_column_type("longtext"), ColumnKind::Text);
        assert_eq!(
            parse_column_type("decimal(10,2)"),
            ColumnKind::Other("decimal(10,2)".to_string())
        );
    }

    #[test]
    fn test_quote_escapes_backticks() {
        assert_eq!(quote("weird`name"), "`weird``name`");
        assert_eq!(quote("a.b"), "`a`.`b`");
    }
}
