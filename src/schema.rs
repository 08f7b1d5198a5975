//! Versioned table definitions.
//!
//! A [`SchemaRegistry`] holds, per schema version, the full set of tables that
//! version declares. Migrations are derived by diffing consecutive versions.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    types::{Record, Value},
};

/// Table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Primary-key field name
    pub primary_key: String,
    /// Whether missing primary keys are generated from a per-table sequence
    pub auto_increment: bool,
    /// Secondary-index field names, in declaration order
    pub indexes: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }

    /// Parses a compact declaration such as `"++id,name,account"`
    ///
    /// The first entry is the primary key (`++` marks auto-increment), the
    /// remaining entries are secondary indexes.
    pub fn parse(name: &str, spec: &str) -> Result<Self> {
        let mut fields = spec.split(',').map(str::trim);
        let pk = fields.next().unwrap_or_default();
        let (primary_key, auto_increment) = match pk.strip_prefix("++") {
            Some(pk) => (pk, true),
            None => (pk, false),
        };

        let table = Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            auto_increment,
            indexes: fields.map(str::to_string).collect(),
        };
        table.validate()?;
        Ok(table)
    }

    /// Validates the table definition
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidSchema(format!("table {}: {}", self.name, msg)));

        if self.name.is_empty() {
            return Err(Error::InvalidSchema("table name is empty".into()));
        }
        if self.primary_key.is_empty() {
            return invalid("no primary key".into());
        }
        for (i, field) in self.indexes.iter().enumerate() {
            if field.is_empty() {
                return invalid("empty index name".into());
            }
            if field.starts_with(['&', '*', '[', '+']) {
                return invalid(format!("unsupported index modifier in {}", field));
            }
            if *field == self.primary_key {
                return invalid(format!("index {} duplicates the primary key", field));
            }
            if self.indexes[..i].contains(field) {
                return invalid(format!("index {} declared twice", field));
            }
        }
        Ok(())
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.iter().any(|f| f == field)
    }

    /// Returns the record's primary key, if present and not null
    pub fn key_of<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        record.get(&self.primary_key).filter(|v| !v.is_null())
    }
}

/// All tables of one schema version, by name
pub type Schema = BTreeMap<String, TableDef>;

/// Data access offered to upgrade hooks, scoped to the migrating transaction
pub trait UpgradeTransaction {
    /// Returns every record of a table in primary-key order
    fn records(&mut self, table: &str) -> Result<Vec<Record>>;
    /// Upserts a record, returning its primary key
    fn put(&mut self, table: &str, record: Record) -> Result<Value>;
    /// Deletes a record by primary key
    fn delete(&mut self, table: &str, key: &Value) -> Result<bool>;
}

/// Data transformation run after a version's structural changes
pub type UpgradeFn = Arc<dyn Fn(&mut dyn UpgradeTransaction) -> Result<()> + Send + Sync>;

/// One registered schema version
#[derive(Clone)]
pub struct SchemaVersion {
    pub version: u32,
    pub tables: Schema,
    pub upgrade: Option<UpgradeFn>,
}

impl fmt::Debug for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaVersion")
            .field("version", &self.version)
            .field("tables", &self.tables)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// Ordered collection of schema versions
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    versions: BTreeMap<u32, SchemaVersion>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the tables of a version
    pub fn register(&mut self, version: u32, tables: impl IntoIterator<Item = TableDef>) -> Result<()> {
        self.insert(version, tables, None)
    }

    /// Registers the tables of a version together with a data upgrade hook
    pub fn register_with_upgrade<F>(
        &mut self,
        version: u32,
        tables: impl IntoIterator<Item = TableDef>,
        upgrade: F,
    ) -> Result<()>
    where
        F: Fn(&mut dyn UpgradeTransaction) -> Result<()> + Send + Sync + 'static,
    {
        self.insert(version, tables, Some(Arc::new(upgrade)))
    }

    /// Registers a version from compact declarations: `[("users", "++id,name")]`
    pub fn stores(&mut self, version: u32, specs: &[(&str, &str)]) -> Result<()> {
        let tables = specs
            .iter()
            .map(|(name, spec)| TableDef::parse(name, spec))
            .collect::<Result<Vec<_>>>()?;
        self.register(version, tables)
    }

    fn insert(
        &mut self,
        version: u32,
        tables: impl IntoIterator<Item = TableDef>,
        upgrade: Option<UpgradeFn>,
    ) -> Result<()> {
        if version == 0 {
            return Err(Error::InvalidSchema("schema version 0 is reserved".into()));
        }
        if self.versions.contains_key(&version) {
            return Err(Error::DuplicateVersion(version));
        }

        let mut schema = Schema::new();
        for table in tables {
            table.validate()?;
            if schema.contains_key(&table.name) {
                return Err(Error::InvalidSchema(format!(
                    "table {} declared twice in version {}",
                    table.name, version
                )));
            }
            schema.insert(table.name.clone(), table);
        }

        self.versions.insert(version, SchemaVersion { version, tables: schema, upgrade });
        Ok(())
    }

    /// Registered versions in ascending order
    pub fn versions(&self) -> Vec<u32> {
        self.versions.keys().copied().collect()
    }

    pub fn get(&self, version: u32) -> Option<&SchemaVersion> {
        self.versions.get(&version)
    }

    pub fn schema(&self, version: u32) -> Option<&Schema> {
        self.get(version).map(|v| &v.tables)
    }

    /// Highest registered version
    pub fn latest(&self) -> Option<u32> {
        self.versions.keys().next_back().copied()
    }

    /// Versions in `(from, to]`, ascending
    pub fn range(&self, from: u32, to: u32) -> impl Iterator<Item = &SchemaVersion> {
        self.versions
            .iter()
            .filter(move |(v, _)| **v > from && **v <= to)
            .map(|(_, v)| v)
    }

    /// Builds a registry from a configuration value
    pub fn from_config(config: SchemaConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (version, tables) in config.0 {
            let tables = tables
                .into_iter()
                .map(|(name, table)| table.into_table_def(&name))
                .collect::<Result<Vec<_>>>()?;
            registry.register(version, tables)?;
        }
        Ok(registry)
    }

    /// Builds a registry from JSON configuration text
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_config(serde_json::from_str(json)?)
    }
}

/// Static schema configuration: version -> table name -> table declaration
///
/// ```json
/// {
///   "1": { "users": "++id,name,account,password" },
///   "2": {
///     "users": { "primaryKey": "id", "autoIncrement": true, "indexes": ["groupId", "name"] },
///     "group": "++id,name"
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig(pub BTreeMap<u32, BTreeMap<String, TableConfig>>);

/// A table declaration in configuration, compact or structured
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TableConfig {
    Compact(String),
    Full(TableSpec),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TableSpec {
    pub primary_key: String,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl TableConfig {
    fn into_table_def(self, name: &str) -> Result<TableDef> {
        match self {
            TableConfig::Compact(spec) => TableDef::parse(name, &spec),
            TableConfig::Full(spec) => Ok(TableDef {
                name: name.to_string(),
                primary_key: spec.primary_key,
                auto_increment: spec.auto_increment,
                indexes: spec.indexes,
            }),
        }
    }
}
