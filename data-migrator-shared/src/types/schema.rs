//! Schema descriptors handed to the catalog for DDL.

/// Coarse column type, enough to create and compare identity columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    UnsignedInteger,
    Integer,
    /// `CHAR(n)`
    FixedString(u32),
    /// `VARCHAR(n)`
    String(u32),
    Text,
    Timestamp,
    Other(String),
}

impl ColumnKind {
    pub fn is_string(&self) -> bool {
        matches!(
            self,
            ColumnKind::FixedString(_) | ColumnKind::String(_) | ColumnKind::Text
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Position hint: place the column after this one.
    pub after: Option<String>,
    pub indexed: bool,
    pub auto_increment: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            after: None,
            indexed: false,
            auto_increment: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn after(mut self, column: impl Into<String>) -> Self {
        self.after = Some(column.into());
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn increments(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Option<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
        }
    }

    /// Adds an auto-incrementing unsigned primary key.
    pub fn increments(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.primary_key = Some(name.clone());
        self.columns
            .push(ColumnDefinition::new(name, ColumnKind::UnsignedInteger).increments());
        self
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }
}
