//! Registry of migrations, global constraints and global values.
use std::collections::HashSet;
use std::sync::Arc;

use data_migrator_shared::{GlobalConstraint, IdentityKind, LocalConstraint, MigrationDefinition, Value};
use tracing::{debug, warn};

use crate::errors::MigrationError;
use crate::hooks::{DefaultHooks, GlobalValues, MigrationHooks};
use crate::identity::ContentHashing;
use crate::mapping::static_map;

/// A registered migration: its definition plus the code plugged into it.
#[derive(Clone)]
pub struct MigrationEntry {
    pub definition: MigrationDefinition,
    pub hooks: Arc<dyn MigrationHooks>,
    pub hashing: Option<Arc<dyn ContentHashing>>,
}

impl MigrationEntry {
    pub fn new(definition: MigrationDefinition, hooks: Arc<dyn MigrationHooks>) -> Self {
        Self {
            definition,
            hooks,
            hashing: None,
        }
    }

    pub fn with_hashing(mut self, hashing: Arc<dyn ContentHashing>) -> Self {
        self.hashing = Some(hashing);
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Checks that the definition can be run at all.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let definition = &self.definition;
        let required = [
            ("name", &definition.name),
            ("old_table", &definition.old_table),
            ("new_table", &definition.new_table),
            ("old_id", &definition.old_id),
            ("new_id", &definition.new_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MigrationError::configuration(format!(
                    "migration {:?} has no {field}",
                    definition.name
                )));
            }
        }
        if definition.max_placeholders == 0 {
            return Err(MigrationError::configuration(format!(
                "migration {} allows no placeholders",
                definition.name
            )));
        }
        if let IdentityKind::Hash { fields } = &definition.identity {
            if fields.is_empty() && self.hashing.is_none() {
                return Err(MigrationError::configuration(format!(
                    "migration {} uses hash identity without hash fields",
                    definition.name
                )));
            }
        }
        Ok(())
    }
}

impl From<MigrationDefinition> for MigrationEntry {
    fn from(definition: MigrationDefinition) -> Self {
        Self::new(definition, Arc::new(DefaultHooks))
    }
}

/// A registered name: one migration, or a group run in order.
#[derive(Clone)]
pub enum MigrationNode {
    Single(MigrationEntry),
    Group(Vec<(String, MigrationNode)>),
}

impl MigrationNode {
    fn flatten<'a>(&'a self, name: &'a str, out: &mut Vec<(&'a str, &'a MigrationEntry)>) {
        match self {
            MigrationNode::Single(entry) => out.push((name, entry)),
            MigrationNode::Group(members) => {
                for (member, node) in members {
                    node.flatten(member, out);
                }
            }
        }
    }

    /// The node registered as `wanted`, with the registered name.
    fn find<'a>(&'a self, name: &'a str, wanted: &str) -> Option<(&'a str, &'a MigrationNode)> {
        if name == wanted {
            return Some((name, self));
        }
        match self {
            MigrationNode::Single(_) => None,
            MigrationNode::Group(members) => members
                .iter()
                .find_map(|(member, node)| node.find(member, wanted)),
        }
    }
}

/// Registry built once per run. Registration order is run order.
#[derive(Default)]
pub struct MigrationManager {
    migrations: Vec<(String, MigrationNode)>,
    global_constraints: Vec<GlobalConstraint>,
    values: GlobalValues,
}

impl MigrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_registered(&self, name: &str) -> bool {
        self.migrations
            .iter()
            .any(|(top, node)| node.find(top, name).is_some())
    }

    /// Registers a migration, inside its definition's group when it names
    /// one.
    pub fn add_migration(&mut self, entry: MigrationEntry) -> Result<&mut Self, MigrationError> {
        entry.validate()?;
        let name = entry.name().to_string();
        if self.is_registered(&name) {
            return Err(MigrationError::configuration(format!(
                "migration {name} is registered twice"
            )));
        }

        match entry.definition.group.clone() {
            Some(group) => {
                let members = self.migrations.iter_mut().find_map(|(top, node)| match node {
                    MigrationNode::Group(members) if *top == group => Some(members),
                    _ => None,
                });
                match members {
                    Some(members) => members.push((name, MigrationNode::Single(entry))),
                    None => {
                        if self.is_registered(&group) {
                            return Err(MigrationError::configuration(format!(
                                "group {group} clashes with a migration name"
                            )));
                        }
                        self.migrations.push((
                            group,
                            MigrationNode::Group(vec![(name, MigrationNode::Single(entry))]),
                        ));
                    }
                }
            }
            None => self.migrations.push((name, MigrationNode::Single(entry))),
        }
        Ok(self)
    }

    /// Registers several migrations under one group name.
    pub fn add_group(
        &mut self,
        group: impl Into<String>,
        entries: Vec<MigrationEntry>,
    ) -> Result<&mut Self, MigrationError> {
        let group = group.into();
        for mut entry in entries {
            entry.definition.group = Some(group.clone());
            self.add_migration(entry)?;
        }
        Ok(self)
    }

    /// Top-level node registered under `name`.
    pub fn get_migration(&self, name: &str) -> Option<&MigrationNode> {
        self.migrations
            .iter()
            .find(|(top, _)| top == name)
            .map(|(_, node)| node)
    }

    pub fn get_raw_migrations(&self) -> &[(String, MigrationNode)] {
        &self.migrations
    }

    /// Every migration with groups flattened, in run order.
    pub fn get_migrations(&self) -> Vec<(&str, &MigrationEntry)> {
        let mut flat = Vec::new();
        for (name, node) in &self.migrations {
            node.flatten(name, &mut flat);
        }
        flat
    }

    /// First registered migration reading `old_table`.
    pub fn find_migration_by_table(&self, old_table: &str) -> Option<&MigrationEntry> {
        self.get_migrations()
            .into_iter()
            .find(|(_, entry)| entry.definition.old_table == old_table)
            .map(|(_, entry)| entry)
    }

    /// Resolves names to migrations. Names are searched through groups; a
    /// group name yields all of its members. Duplicates are dropped and
    /// unknown names skipped.
    pub fn find_migration_by_name<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Vec<(&str, &MigrationEntry)> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for name in names {
            let name = name.as_ref();
            let found_node = self
                .migrations
                .iter()
                .find_map(|(top, node)| node.find(top, name));
            let Some((registered, node)) = found_node else {
                warn!(migration = %name, "Unknown migration");
                continue;
            };
            let mut members = Vec::new();
            node.flatten(registered, &mut members);
            for (member, entry) in members {
                if seen.insert(member.to_string()) {
                    found.push((member, entry));
                }
            }
        }
        found
    }

    /// Registers a constraint on an old table. When a migration reads that
    /// table the constraint is also expressed in the new schema. A
    /// constraint on the same `table.field` is registered once.
    pub fn add_global_constraint(
        &mut self,
        table: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> &GlobalConstraint {
        let mut constraint = GlobalConstraint {
            table: table.into(),
            field: field.into(),
            value: value.into(),
            local: None,
        };
        let alias = constraint.alias();
        if let Some(index) = self
            .global_constraints
            .iter()
            .position(|existing| existing.alias() == alias)
        {
            return &self.global_constraints[index];
        }

        constraint.local = self
            .find_migration_by_table(&constraint.table)
            .and_then(|entry| {
                let definition = &entry.definition;
                static_map(definition, &constraint.field).map(|field| LocalConstraint {
                    field,
                    value: constraint.value.clone(),
                    table: definition.new_table.clone(),
                    primary_key: definition.new_id.clone(),
                })
            });
        debug!(
            constraint = %alias,
            local = constraint.local.is_some(),
            "Registered global constraint"
        );
        let index = self.global_constraints.len();
        self.global_constraints.push(constraint);
        &self.global_constraints[index]
    }

    pub fn get_global_constraints(&self) -> &[GlobalConstraint] {
        &self.global_constraints
    }

    pub fn add_global_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Value stored under `key`, or `default`.
    pub fn get_global_value(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    pub fn get_global_values(&self) -> &GlobalValues {
        &self.values
    }
}
