//! Environment settings and the TOML migrations file.
mod dependencies;

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use data_migrator_pipeline::MigrationManager;
use data_migrator_shared::{MigrationDefinition, Value};
use serde::Deserialize;
use tracing::info;

use crate::errors::AppError;
pub use dependencies::Dependencies;

/// Default migrations file.
const DEFAULT_MIGRATIONS_CONFIG: &str = "migrations.toml";

/// Default size of each connection pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection and file settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub source_url: String,
    pub target_url: String,
    pub migrations_config: PathBuf,
    pub max_connections: u32,
}

impl Settings {
    /// Reads settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TARGET_DATABASE_URL`: new schema (falls back to `DATABASE_URL`)
    /// - `SOURCE_DATABASE_URL`: legacy schema (default: the target database)
    /// - `MIGRATIONS_CONFIG`: migrations file (default: migrations.toml)
    /// - `DB_MAX_CONNECTIONS`: pool size per database (default: 5)
    pub fn from_env(config: Option<PathBuf>) -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok(), config)
    }

    /// Same as [`Settings::from_env`] with an explicit variable lookup.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        config: Option<PathBuf>,
    ) -> Result<Self, AppError> {
        let target_url = lookup("TARGET_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or_else(|| AppError::config("TARGET_DATABASE_URL or DATABASE_URL must be set"))?;
        let source_url = lookup("SOURCE_DATABASE_URL").unwrap_or_else(|| target_url.clone());
        let migrations_config = config
            .or_else(|| lookup("MIGRATIONS_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_CONFIG));
        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(value) => value.parse::<u32>().map_err(|_| {
                AppError::config(format!("DB_MAX_CONNECTIONS must be a number, got {value:?}"))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            source_url,
            target_url,
            migrations_config,
            max_connections,
        })
    }

    pub fn same_database(&self) -> bool {
        self.source_url == self.target_url
    }
}

/// A `[[constraint]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConstraintConfig {
    pub table: String,
    pub field: String,
    pub value: Value,
}

/// Contents of the migrations file.
#[derive(Debug, Default, Deserialize)]
pub struct MigrationsFile {
    #[serde(default, rename = "migration")]
    pub migrations: Vec<MigrationDefinition>,
    #[serde(default, rename = "constraint")]
    pub constraints: Vec<ConstraintConfig>,
    /// Global values set before any run parameter.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl MigrationsFile {
    pub fn parse(content: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read migrations file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Registers everything on a new manager. Migrations are registered
    /// first so constraints can resolve their new-schema counterpart.
    pub fn into_manager(self) -> Result<MigrationManager, AppError> {
        let mut manager = MigrationManager::new();
        for definition in self.migrations {
            manager.add_migration(definition.into())?;
        }
        for constraint in self.constraints {
            manager.add_global_constraint(constraint.table, constraint.field, constraint.value);
        }
        for (key, value) in self.values {
            manager.add_global_value(key, value);
        }
        info!(
            migrations = manager.get_migrations().len(),
            constraints = manager.get_global_constraints().len(),
            "Loaded migrations"
        );
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_migrator_shared::{IdentityKind, MapEntry};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_settings_defaults_and_fallbacks() {
        let settings =
            Settings::from_lookup(lookup(&[("DATABASE_URL", "mysql://db/shop")]), None).unwrap();
        assert_eq!(settings.target_url, "mysql://db/shop");
        assert!(settings.same_database());
        assert_eq!(settings.migrations_config, PathBuf::from("migrations.toml"));
        assert_eq!(settings.max_connections, 5);

        let settings = Settings::from_lookup(
            lookup(&[
                ("TARGET_DATABASE_URL", "mysql://db/new"),
                ("DATABASE_URL", "mysql://db/ignored"),
                ("SOURCE_DATABASE_URL", "mysql://db/legacy"),
                ("MIGRATIONS_CONFIG", "env.toml"),
                ("DB_MAX_CONNECTIONS", "12"),
            ]),
            Some(PathBuf::from("cli.toml")),
        )
        .unwrap();
        assert_eq!(settings.target_url, "mysql://db/new");
        assert_eq!(settings.source_url, "mysql://db/legacy");
        assert_eq!(settings.migrations_config, PathBuf::from("cli.toml"));
        assert_eq!(settings.max_connections, 12);
    }

    #[test]
    fn test_settings_errors() {
        assert!(matches!(
            Settings::from_lookup(lookup(&[]), None),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Settings::from_lookup(
                lookup(&[("DATABASE_URL", "mysql://db"), ("DB_MAX_CONNECTIONS", "many")]),
                None
            ),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_sample_migrations_file() {
        let file = MigrationsFile::parse(include_str!("../../migrations.toml")).unwrap();
        assert_eq!(file.migrations.len(), 3);

        let customers = &file.migrations[0];
        assert_eq!(customers.column_map.get("customers_fax"), Some(&MapEntry::Ignored));
        assert_eq!(customers.identity, IdentityKind::OldId);

        let orders = &file.migrations[1];
        assert_eq!(orders.group.as_deref(), Some("sales"));
        assert_eq!(orders.relations["clients"][0].foreign, "customer_id");
        assert_eq!(orders.old_relations["customers"], "customer");
        assert_eq!(orders.chunk_size, Some(500));

        let manager = file.into_manager().unwrap();
        let names: Vec<&str> = manager
            .get_migrations()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["customers", "orders", "invoices"]);
        assert_eq!(manager.get_raw_migrations().len(), 2);

        let constraint = &manager.get_global_constraints()[0];
        assert_eq!(constraint.alias(), "customers.id_customers");
        assert_eq!(
            constraint.local.as_ref().map(|local| local.table.as_str()),
            Some("clients")
        );
        assert_eq!(
            manager.get_global_value("tenant", Value::Null),
            Value::from("acme")
        );
    }

    #[test]
    fn test_invalid_files_are_rejected() {
        assert!(matches!(
            MigrationsFile::parse("[[migration]]\nname = \"x\""),
            Err(AppError::Toml(_))
        ));

        let file = MigrationsFile::parse(
            r#"
            [[migration]]
            name = "a"
            old_table = "a"
            new_table = "a"
            old_id = "id"

            [[migration]]
            name = "a"
            old_table = "b"
            new_table = "b"
            old_id = "id"
            "#,
        )
        .unwrap();
        assert!(matches!(file.into_manager(), Err(AppError::Config(_))));
        assert!(MigrationsFile::load(Path::new("does/not/exist.toml")).is_err());
    }
}
