use std::fmt::Display;

use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    schema::{Schema, SchemaRegistry, TableDef, UpgradeTransaction},
    storage::engine::Engine as StorageEngine,
    types::{Record, Value},
};

use super::{
    engine::{
        Transaction,
        kv::{KVEngine, KVTransaction},
    },
    lock::TableLocks,
};

/// Lifecycle of an opened store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Migrating,
    Open,
    Failed,
}

/// One structural change between two schema versions
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    CreateTable(TableDef),
    DropTable(String),
    /// Index changes of an existing table; the full new definition is kept
    AlterTable {
        table: TableDef,
        added: Vec<String>,
        removed: Vec<String>,
    },
}

impl Display for SchemaChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaChange::CreateTable(table) => write!(f, "create table {}", table.name),
            SchemaChange::DropTable(name) => write!(f, "drop table {}", name),
            SchemaChange::AlterTable { table, added, removed } => write!(
                f,
                "alter table {} add [{}] remove [{}]",
                table.name,
                added.join(", "),
                removed.join(", ")
            ),
        }
    }
}

/// Structural changes turning schema `from` into schema `to`
pub fn diff(from: &Schema, to: &Schema) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    for name in from.keys().filter(|name| !to.contains_key(*name)) {
        changes.push(SchemaChange::DropTable(name.clone()));
    }
    for (name, table) in to.iter() {
        match from.get(name) {
            None => changes.push(SchemaChange::CreateTable(table.clone())),
            Some(current) if current != table => changes.push(SchemaChange::AlterTable {
                table: table.clone(),
                added: table
                    .indexes
                    .iter()
                    .filter(|f| !current.has_index(f))
                    .cloned()
                    .collect(),
                removed: current
                    .indexes
                    .iter()
                    .filter(|f| !table.has_index(f))
                    .cloned()
                    .collect(),
            }),
            Some(_) => {}
        }
    }
    changes
}

/// Brings a store to a requested schema version, one registered version at a time
#[derive(Debug)]
pub struct MigrationRunner {
    state: State,
    version: u32,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self { state: State::Closed, version: 0 }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Schema version the store was last brought to
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Opens the store at `target`, migrating forward if needed
    ///
    /// Each step holds the locks of every table in the schemas it moves
    /// between.
    pub fn open<E: StorageEngine>(
        &mut self,
        engine: &KVEngine<E>,
        locks: &TableLocks,
        registry: &SchemaRegistry,
        target: u32,
    ) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::Internal(format!("cannot open a store in state {:?}", self.state)));
        }

        let stored = {
            let txn = engine.begin()?;
            let stored = txn.schema_version();
            txn.rollback()?;
            stored?
        };
        self.version = stored;

        let unsupported = Error::UnsupportedVersion { stored, target };
        if stored > target || registry.get(target).is_none() {
            return Err(unsupported);
        }
        if stored != 0 && registry.get(stored).is_none() {
            return Err(unsupported);
        }
        if stored == target {
            info!(version = stored, "store opened");
            self.state = State::Open;
            return Ok(());
        }

        self.state = State::Migrating;
        info!(from = stored, to = target, "migrating store");
        let empty = Schema::new();
        let mut previous = registry.schema(stored).unwrap_or(&empty);
        for step in registry.range(stored, target) {
            let changes = diff(previous, &step.tables);
            let tables = previous.keys().chain(step.tables.keys()).cloned().collect::<Vec<_>>();
            let _guard = locks.acquire(&tables);
            let result = engine
                .begin()
                .and_then(|txn| Self::apply(txn, step.version, &changes, step.upgrade.as_deref()));
            match result {
                Ok(()) => {
                    info!(version = step.version, changes = changes.len(), "migration step committed");
                    self.version = step.version;
                    previous = &step.tables;
                }
                Err(err) => {
                    warn!(version = step.version, error = %err, "migration step failed");
                    self.state = State::Failed;
                    return Err(Error::MigrationFailed {
                        version: step.version,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(version = self.version, "store opened");
        self.state = State::Open;
        Ok(())
    }

    /// Applies one version inside its own transaction, rolling it back on error
    fn apply<E: StorageEngine>(
        mut txn: KVTransaction<E>,
        version: u32,
        changes: &[SchemaChange],
        upgrade: Option<&(dyn Fn(&mut dyn UpgradeTransaction) -> Result<()> + Send + Sync)>,
    ) -> Result<()> {
        let result = (|| -> Result<()> {
            for change in changes {
                info!(version, change = %change, "apply schema change");
                match change {
                    SchemaChange::CreateTable(table) => txn.create_table(table.clone())?,
                    SchemaChange::DropTable(name) => txn.drop_table(name)?,
                    SchemaChange::AlterTable { table, .. } => txn.alter_table(table.clone())?,
                }
            }
            if let Some(upgrade) = upgrade {
                upgrade(&mut Upgrade { txn: &mut txn })?;
            }
            txn.set_schema_version(version)
        })();

        match result {
            Ok(()) => txn.commit(),
            Err(err) => {
                txn.rollback()?;
                Err(err)
            }
        }
    }

    pub fn close(&mut self) {
        if self.state != State::Closed {
            info!(version = self.version, "store closed");
        }
        self.state = State::Closed;
    }
}

/// Record access handed to upgrade hooks
struct Upgrade<'a, T: Transaction> {
    txn: &'a mut T,
}

impl<'a, T: Transaction> UpgradeTransaction for Upgrade<'a, T> {
    fn records(&mut self, table: &str) -> Result<Vec<Record>> {
        let table = self.txn.must_get_table(table)?;
        Ok(self
            .txn
            .scan(&table, (std::ops::Bound::Unbounded, std::ops::Bound::Unbounded))?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    fn put(&mut self, table: &str, record: Record) -> Result<Value> {
        let table = self.txn.must_get_table(table)?;
        self.txn.put(&table, record)
    }

    fn delete(&mut self, table: &str, key: &Value) -> Result<bool> {
        let table = self.txn.must_get_table(table)?;
        self.txn.delete(&table, key)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use crate::{
        db::{
            engine::{Transaction, kv::KVEngine},
            lock::TableLocks,
        },
        error::{Error, Result},
        record,
        schema::{SchemaRegistry, TableDef},
        storage::memory::MemoryEngine,
        types::Value,
    };

    use super::{MigrationRunner, SchemaChange, State, diff};

    fn registry() -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry.stores(1, &[("users", "++id,name,account,password")])?;
        registry.stores(
            2,
            &[("users", "++id,groupId,name,account,password"), ("group", "++id,name")],
        )?;
        Ok(registry)
    }

    fn stored_version(kv: &KVEngine<MemoryEngine>) -> Result<u32> {
        let txn = kv.begin()?;
        let version = txn.schema_version()?;
        txn.rollback()?;
        Ok(version)
    }

    #[test]
    fn test_diff() -> Result<()> {
        let registry = registry()?;
        let (v1, v2) = (registry.schema(1).expect("v1"), registry.schema(2).expect("v2"));
        assert_eq!(
            diff(v1, v2),
            vec![
                SchemaChange::CreateTable(TableDef::parse("group", "++id,name")?),
                SchemaChange::AlterTable {
                    table: TableDef::parse("users", "++id,groupId,name,account,password")?,
                    added: vec!["groupId".into()],
                    removed: vec![],
                },
            ]
        );
        assert_eq!(diff(v2, v1)[0], SchemaChange::DropTable("group".into()));
        assert!(diff(v2, v2).is_empty());
        Ok(())
    }

    #[test]
    fn test_open_fresh() -> Result<()> {
        let kv = KVEngine::new(MemoryEngine::new())?;
        let locks = TableLocks::new();
        let mut runner = MigrationRunner::new();
        runner.open(&kv, &locks, &registry()?, 2)?;
        assert_eq!(runner.state(), State::Open);
        assert_eq!(runner.version(), 2);
        assert_eq!(stored_version(&kv)?, 2);

        let txn = kv.begin()?;
        let tables = txn.list_tables()?.into_iter().map(|t| t.name).collect::<Vec<_>>();
        assert_eq!(tables, vec!["group", "users"]);
        assert!(txn.must_get_table("users")?.has_index("groupId"));
        Ok(())
    }

    #[test]
    fn test_upgrade_preserves_records() -> Result<()> {
        let kv = KVEngine::new(MemoryEngine::new())?;
        let locks = TableLocks::new();
        let registry = registry()?;
        let mut runner = MigrationRunner::new();
        runner.open(&kv, &locks, &registry, 1)?;

        let mut txn = kv.begin()?;
        let users = txn.must_get_table("users")?;
        txn.put(&users, record! { "name" => "Peter Cheng", "account" => "T00052" })?;
        txn.put(&users, record! { "name" => "Tom Cheng", "account" => "T00053" })?;
        txn.commit()?;

        runner.close();
        assert_eq!(runner.state(), State::Closed);
        runner.open(&kv, &locks, &registry, 2)?;
        assert_eq!(runner.state(), State::Open);

        let txn = kv.begin()?;
        let users = txn.must_get_table("users")?;
        let records = txn.scan(&users, (Bound::Unbounded, Bound::Unbounded))?;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|(_, r)| !r.contains_key("groupId")));
        assert!(txn.scan_index(&users, "groupId", (Bound::Unbounded, Bound::Unbounded))?.is_empty());
        assert_eq!(txn.lookup_index(&users, "name", &"Tom Cheng".into())?, vec![Value::Integer(2)]);
        Ok(())
    }

    #[test]
    fn test_unsupported_versions() -> Result<()> {
        let kv = KVEngine::new(MemoryEngine::new())?;
        let locks = TableLocks::new();
        let registry = registry()?;
        let mut runner = MigrationRunner::new();
        runner.open(&kv, &locks, &registry, 2)?;
        runner.close();

        assert_eq!(
            runner.open(&kv, &locks, &registry, 1),
            Err(Error::UnsupportedVersion { stored: 2, target: 1 })
        );
        assert_eq!(
            runner.open(&kv, &locks, &registry, 3),
            Err(Error::UnsupportedVersion { stored: 2, target: 3 })
        );
        assert_eq!(runner.state(), State::Closed);
        assert_eq!(stored_version(&kv)?, 2);
        Ok(())
    }

    #[test]
    fn test_failed_step_keeps_version() -> Result<()> {
        let kv = KVEngine::new(MemoryEngine::new())?;
        let locks = TableLocks::new();
        let mut registry = registry()?;
        registry.stores(3, &[("users", "uid,name"), ("group", "++id,name")])?;

        let mut runner = MigrationRunner::new();
        let err = runner.open(&kv, &locks, &registry, 3);
        assert!(matches!(err, Err(Error::MigrationFailed { version: 3, .. })));
        assert_eq!(runner.state(), State::Failed);
        assert_eq!(runner.version(), 2);
        assert_eq!(stored_version(&kv)?, 2);

        // the failed step left the users table untouched
        let txn = kv.begin()?;
        assert_eq!(txn.must_get_table("users")?.primary_key, "id");
        Ok(())
    }

    #[test]
    fn test_upgrade_hook() -> Result<()> {
        let kv = KVEngine::new(MemoryEngine::new())?;
        let locks = TableLocks::new();
        let mut registry = registry()?;
        let mut runner = MigrationRunner::new();
        runner.open(&kv, &locks, &registry, 2)?;
        let mut txn = kv.begin()?;
        let users = txn.must_get_table("users")?;
        txn.put(&users, record! { "name" => "Peter Cheng" })?;
        txn.put(&users, record! { "name" => "Tom Cheng" })?;
        txn.commit()?;
        runner.close();

        let v2 = registry.schema(2).expect("v2").values().cloned().collect::<Vec<_>>();
        registry.register_with_upgrade(3, v2.clone(), |tx| {
            let id = tx.put("group", record! { "name" => "staff" })?;
            for mut user in tx.records("users")? {
                user.insert("groupId".into(), id.clone());
                tx.put("users", user)?;
            }
            Ok(())
        })?;
        registry.register_with_upgrade(4, v2, |tx| {
            tx.delete("users", &Value::Integer(1))?;
            Err(Error::ConstraintViolation("abort".into()))
        })?;

        assert!(matches!(
            runner.open(&kv, &locks, &registry, 4),
            Err(Error::MigrationFailed { version: 4, .. })
        ));
        assert_eq!(runner.version(), 3);
        assert_eq!(stored_version(&kv)?, 3);

        let txn = kv.begin()?;
        let users = txn.must_get_table("users")?;
        assert_eq!(
            txn.lookup_index(&users, "groupId", &Value::Integer(1))?,
            vec![Value::Integer(1), Value::Integer(2)]
        );
        Ok(())
    }
}
