use std::ops::Bound;

use docdb::{
    Database, Error, Predicate, Record, Result, SchemaRegistry, State, Value, record,
    storage::{disk::DiskEngine, memory::MemoryEngine},
};

const USERS: [(&str, &str); 5] = [
    ("Peter Cheng", "T00052"),
    ("Tom Cheng", "T00053"),
    ("John Cheng", "T00054"),
    ("Joe Cheng", "T00055"),
    ("Ryan Cheng", "T00056"),
];

fn registry() -> Result<SchemaRegistry> {
    SchemaRegistry::from_json(
        r#"{
            "1": { "users": "++id,name,account,password" },
            "2": {
                "users": "++id,groupId,name,account,password",
                "group": "++id,name"
            }
        }"#,
    )
}

fn seeded(version: u32) -> Result<Database<MemoryEngine>> {
    let db = Database::new(MemoryEngine::new(), registry()?)?;
    db.open(version)?;
    db.transaction(&["users"], |tx| {
        let mut users = tx.table("users")?;
        users.bulk_add(USERS.iter().map(|(name, account)| {
            record! { "name" => *name, "account" => *account, "password" => "1qazse4rfvgy7" }
        }))
    })?;
    Ok(db)
}

fn names(records: &[Record]) -> Vec<&str> {
    records.iter().filter_map(|r| r.get("name").and_then(Value::as_str)).collect()
}

fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| match r.get("id") {
            Some(Value::Integer(id)) => Some(*id),
            _ => None,
        })
        .collect()
}

#[test]
fn put_then_get() -> Result<()> {
    let db = seeded(1)?;
    let users = db.table("users");
    let id = users.put(record! { "name" => "Bob Cheng", "account" => "T00058" })?;
    assert_eq!(id, Value::Integer(6));
    assert_eq!(
        users.get(6)?,
        record! { "id" => 6, "name" => "Bob Cheng", "account" => "T00058" }
    );
    Ok(())
}

#[test]
fn delete_removes_record_and_index_entries() -> Result<()> {
    let db = seeded(1)?;
    let users = db.table("users");
    assert!(users.delete(2)?);
    assert!(matches!(users.get(2), Err(Error::NotFound { .. })));
    assert_eq!(users.count_where(&Predicate::equals("name", "Tom Cheng"))?, 0);
    assert_eq!(users.count_where(&Predicate::equals("account", "T00053"))?, 0);

    let by_name = users.scan(Some("name"), (Bound::Unbounded, Bound::Unbounded))?;
    assert!(!by_name.keys().contains(&Value::Integer(2)));
    Ok(())
}

#[test]
fn scan_after_puts_and_deletes() -> Result<()> {
    let db = seeded(1)?;
    let users = db.table("users");
    users.bulk_put((0..10).map(|i| record! { "name" => format!("User {}", i) }))?;
    for id in [1, 4, 9, 15] {
        assert!(users.delete(id)?);
    }

    let scan = users.scan(None, (Bound::Unbounded, Bound::Unbounded))?;
    let keys = scan
        .keys()
        .iter()
        .map(|k| match k {
            Value::Integer(id) => *id,
            _ => -1,
        })
        .collect::<Vec<_>>();
    assert_eq!(keys.len(), 15 - 4);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(scan.iter().collect::<Result<Vec<_>>>()?.len(), 11);
    assert_eq!(users.count()?, 11);
    Ok(())
}

#[test]
fn tutorial_queries() -> Result<()> {
    let db = seeded(1)?;
    let users = db.table("users");

    let peter = users.to_vec(&Predicate::equals("name", "Peter Cheng"))?;
    assert_eq!(peter.len(), 1);
    assert_eq!(peter[0]["account"], Value::from("T00052"));

    let found = users.to_vec(&Predicate::any_of("name", ["Peter Cheng", "Tom Cheng", "Joe Cheng"]))?;
    assert_eq!(names(&found), vec!["Peter Cheng", "Tom Cheng", "Joe Cheng"]);

    let found = users.to_vec(&Predicate::starts_with_ignore_case("name", "jo"))?;
    assert_eq!(names(&found), vec!["John Cheng", "Joe Cheng"]);

    // name or account
    let found = users.to_vec(
        &Predicate::starts_with_ignore_case("name", "Jo").or(Predicate::equals("account", "T00052")),
    )?;
    assert_eq!(ids(&found), vec![1, 3, 4]);

    // account and name
    let found = users.first(
        &Predicate::equals("account", "T00052").and(Predicate::equals("name", "Peter Cheng")),
    )?;
    assert_eq!(found.map(|r| r["id"].clone()), Some(Value::Integer(1)));

    assert_eq!(ids(&users.to_vec(&Predicate::above("id", 3))?), vec![4, 5]);
    assert_eq!(ids(&users.to_vec(&Predicate::below("id", 3))?), vec![1, 2]);

    let mut accounts = Vec::new();
    users.each(&Predicate::above_or_equal("id", 4), |r| accounts.push(r["account"].to_string()))?;
    assert_eq!(accounts, vec![r#""T00055""#, r#""T00056""#]);
    Ok(())
}

#[test]
fn modify_then_delete() -> Result<()> {
    let db = seeded(1)?;
    let users = db.table("users");

    let modified = users.modify(
        &Predicate::equals("name", "Peter Cheng"),
        &record! { "name" => "Bill Cheng", "account" => "T00057" },
    )?;
    assert_eq!(modified, 1);
    assert_eq!(users.count_where(&Predicate::equals("name", "Peter Cheng"))?, 0);
    let bill = users.get(1)?;
    assert_eq!(bill["name"], Value::from("Bill Cheng"));
    assert_eq!(bill["account"], Value::from("T00057"));
    assert_eq!(users.get(2)?["name"], Value::from("Tom Cheng"));
    assert_eq!(users.count_where(&Predicate::equals("account", "T00057"))?, 1);

    assert_eq!(users.delete_where(&Predicate::equals("name", "Bill Cheng"))?, 1);
    let remaining = users.scan(None, (Bound::Unbounded, Bound::Unbounded))?;
    assert_eq!(remaining.keys(), &[Value::Integer(2), 3.into(), 4.into(), 5.into()]);
    Ok(())
}

#[test]
fn type_mismatch_and_unknown_fields() -> Result<()> {
    let db = seeded(1)?;
    let users = db.table("users");
    assert!(matches!(
        users.to_vec(&Predicate::above("name", 3)),
        Err(Error::ConstraintViolation(_))
    ));
    assert_eq!(users.count_where(&Predicate::equals("nickname", "pete"))?, 0);
    assert!(matches!(
        users.add(record! { "id" => 1, "name" => "Peter Cheng" }),
        Err(Error::ConstraintViolation(_))
    ));
    Ok(())
}

#[test]
fn migrate_v1_to_v2() -> Result<()> {
    let db = seeded(1)?;
    assert_eq!(db.version()?, 1);
    db.close()?;
    db.open(2)?;
    assert_eq!(db.state()?, State::Open);
    assert_eq!(db.version()?, 2);

    let users = db.table("users");
    let all = users.to_vec(&Predicate::above("id", 0))?;
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(|r| !r.contains_key("groupId")));
    assert_eq!(users.count_where(&Predicate::equals("groupId", 1))?, 0);

    db.transaction(&["users", "group"], |tx| {
        let staff = tx.table("group")?.put(record! { "name" => "staff" })?;
        tx.table("users")?.modify(&Predicate::starts_with_ignore_case("name", "jo"), &record! { "groupId" => staff })
    })?;
    assert_eq!(names(&users.to_vec(&Predicate::equals("groupId", 1))?), vec!["John Cheng", "Joe Cheng"]);

    db.close()?;
    assert_eq!(db.open(1), Err(Error::UnsupportedVersion { stored: 2, target: 1 }));
    Ok(())
}

#[test]
fn failed_migration_keeps_stored_version() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("users.db");

    // a store whose version 1 already had a group table
    let mut earlier = SchemaRegistry::new();
    earlier.stores(1, &[("users", "++id,name,account,password"), ("group", "++id,name")])?;
    let db = Database::new(DiskEngine::new(path.clone())?, earlier)?;
    db.open(1)?;
    db.table("users").put(record! { "name" => "Peter Cheng", "account" => "T00052" })?;
    db.close()?;
    drop(db);

    let db = Database::new(DiskEngine::new(path.clone())?, registry()?)?;
    assert!(matches!(db.open(2), Err(Error::MigrationFailed { version: 2, .. })));
    assert_eq!(db.state()?, State::Failed);
    assert_eq!(db.version()?, 1);
    assert_eq!(db.table("users").count(), Err(Error::NotOpen));

    db.close()?;
    db.open(1)?;
    assert_eq!(db.table("users").get(1)?["account"], Value::from("T00052"));
    Ok(())
}

#[test]
fn reopen_from_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("users.db");
    {
        let db = Database::new(DiskEngine::new(path.clone())?, registry()?)?;
        db.open_latest()?;
        db.table("users").bulk_put(USERS.iter().map(|(name, account)| record! { "name" => *name, "account" => *account }))?;
        db.close()?;
    }

    let db = Database::new(DiskEngine::new(path)?, registry()?)?;
    db.open(2)?;
    let users = db.table("users");
    assert_eq!(users.count()?, 5);
    assert_eq!(
        names(&users.to_vec(&Predicate::equals("account", "T00056"))?),
        vec!["Ryan Cheng"]
    );
    // sequence survives the restart
    assert_eq!(users.put(record! { "name" => "Bob Cheng" })?, Value::Integer(6));
    Ok(())
}
