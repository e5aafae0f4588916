//! Behavior of the table engine as seen through a database on disk.
use camino::Utf8PathBuf;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

use tablestore_datastore::*;

fn row(v: Value) -> Row {
    match v {
        Value::Object(m) => m,
        _ => panic!("Not an object"),
    }
}

fn keys(k: &[&str]) -> Vec<String> {
    k.iter().map(|x| x.to_string()).collect()
}

struct Store {
    _tdir: tempfile::TempDir,
    factory: DatabaseHandlerFactory,
}

fn store() -> Store {
    tablestore_logging::log_to_stderr();
    let tdir = tempfile::TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(tdir.path().to_path_buf()).unwrap();
    Store {
        _tdir: tdir,
        factory: DatabaseHandlerFactory::new(FactoryConfig::with_root(root)),
    }
}

fn upsert(db: &mut Database, table: &str, unique: &[&str], rows: Vec<Value>) -> Result<u64> {
    let mut t = db.table(table)?;
    let n = t.upsert(&keys(unique), rows.into_iter().map(|r| Ok::<_, Error>(row(r))))?;
    t.commit()?;
    Ok(n)
}

fn all_rows(db: &mut Database, table: &str) -> Vec<Value> {
    db.existing_table(table)
        .unwrap()
        .select(&SelectQuery::default())
        .unwrap()
        .iter_rows()
        .map(Value::Object)
        .collect()
}

#[test]
fn disjoint_keys_union() {
    let s = store();
    let mut db = s.factory.create("bob", "test").unwrap();
    upsert(&mut db, "t", &[], vec![json!({"a": 1}), json!({"b": "two"})]).unwrap();

    let t = db.existing_table("t").unwrap();
    let columns: Vec<&str> = t.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec![ID_COLUMN, "a", "b"]);
    drop(t);

    assert_eq!(
        all_rows(&mut db, "t"),
        vec![
            json!({"__id__": 1, "a": 1, "b": null}),
            json!({"__id__": 2, "a": null, "b": "two"}),
        ]
    );
}

#[test]
fn upsert_updates_in_place() {
    let s = store();
    let mut db = s.factory.create("bob", "test").unwrap();
    upsert(&mut db, "t", &[], vec![json!({"id": 1, "name": "a"})]).unwrap();
    upsert(&mut db, "t", &["id"], vec![json!({"id": 1, "name": "b"})]).unwrap();
    assert_eq!(all_rows(&mut db, "t"), vec![json!({"__id__": 1, "id": 1, "name": "b"})]);

    upsert(&mut db, "t", &["id"], vec![json!({"id": 2, "name": "c"})]).unwrap();
    assert_eq!(db.existing_table("t").unwrap().count(&[]).unwrap(), 2);
}

#[test]
fn index_widening_keeps_rows() {
    let s = store();
    let mut db = s.factory.create("bob", "test").unwrap();
    upsert(
        &mut db,
        "t",
        &["a"],
        vec![json!({"a": 1, "b": 1}), json!({"a": 2, "b": 1}), json!({"a": 3, "b": 2})],
    )
    .unwrap();
    upsert(&mut db, "t", &["a", "b"], vec![json!({"a": 1, "b": 1, "c": "x"})]).unwrap();

    let res = db
        .execute_raw(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 't' ORDER BY name",
            &Value::Null,
        )
        .unwrap();
    assert_eq!(res.rows, vec![vec![json!("t_index2")]]);
    assert_eq!(db.existing_table("t").unwrap().count(&[]).unwrap(), 3);
}

#[test]
fn column_types_are_fixed() {
    let s = store();
    let mut db = s.factory.create("bob", "test").unwrap();
    upsert(&mut db, "t", &[], vec![json!({"x": 5})]).unwrap();
    assert!(matches!(
        upsert(&mut db, "t", &[], vec![json!({"x": "hello"})]),
        Err(Error::SchemaConflict(_))
    ));

    let t = db.existing_table("t").unwrap();
    assert_eq!(t.columns()[1], Column::new("x", ColumnType::Integer));
    assert_eq!(t.count(&[]).unwrap(), 1);
}

#[test]
fn failed_batches_leave_nothing_behind() {
    let s = store();
    let mut db = s.factory.create("bob", "test").unwrap();
    upsert(&mut db, "t", &[], vec![json!({"x": 5})]).unwrap();
    assert!(upsert(
        &mut db,
        "t",
        &[],
        vec![json!({"x": 6, "y": "new"}), json!({"x": "bad"})]
    )
    .is_err());

    let t = db.existing_table("t").unwrap();
    assert_eq!(t.columns().len(), 2);
    assert_eq!(t.count(&[]).unwrap(), 1);
    drop(t);

    // A failed batch creating a table doesn't leave the table behind either.
    assert!(upsert(&mut db, "u", &[], vec![json!({"bad name": 1})]).is_err());
    assert!(!db.has_table("u").unwrap());
}

#[test]
fn reopening_sees_committed_data() {
    let s = store();
    {
        let mut db = s.factory.create("bob", "test").unwrap();
        upsert(&mut db, "t", &["k"], vec![json!({"k": "a", "v_blob": 3})]).unwrap();
    }

    let mut db = s.factory.create("bob", "test").unwrap();
    let t = db.existing_table("t").unwrap();
    assert_eq!(t.columns()[2], Column::new("v_blob", ColumnType::Any));
    drop(t);
    assert_eq!(s.factory.databases_by_user("bob").unwrap(), vec!["test".to_string()]);
}

#[test]
fn ids_stay_synthetic() {
    let s = store();
    let mut db = s.factory.create("bob", "test").unwrap();
    upsert(&mut db, "t", &["a"], vec![json!({"a": 1})]).unwrap();

    let err = upsert(&mut db, "t", &["a"], vec![json!({"a": 1, "__id__": 7})]).unwrap_err();
    assert!(matches!(err, Error::Naming { .. }), "{:?}", err);
    let err = upsert(&mut db, "t", &[], vec![json!({"__id__": 500, "a": 2})]).unwrap_err();
    assert!(matches!(err, Error::Naming { .. }), "{:?}", err);

    assert_eq!(all_rows(&mut db, "t"), vec![json!({"__id__": 1, "a": 1})]);
}

#[test]
fn keys_differing_in_case_share_a_column() {
    let s = store();
    let mut db = s.factory.create("bob", "test").unwrap();
    upsert(&mut db, "t", &[], vec![json!({"a": 1}), json!({"A": 2})]).unwrap();
    upsert(&mut db, "t", &["A"], vec![json!({"A": 2, "B": "x"})]).unwrap();

    assert_eq!(
        all_rows(&mut db, "t"),
        vec![
            json!({"__id__": 1, "a": 1, "B": null}),
            json!({"__id__": 2, "a": 2, "B": "x"}),
        ]
    );
    assert!(matches!(
        upsert(&mut db, "t", &[], vec![json!({"b": "y", "B": "z"})]),
        Err(Error::SchemaConflict(_))
    ));
}

#[test]
fn readonly_databases_read_tables() {
    let s = store();
    {
        let mut db = s.factory.create("bob", "test").unwrap();
        upsert(&mut db, "t", &[], vec![json!({"a": 1}), json!({"a": 2})]).unwrap();
    }

    let mut db = s.factory.create_readonly("bob", "test").unwrap();
    assert_eq!(db.policy(), Policy::ReadOnly);
    let mut t = db.existing_table("t").unwrap();
    assert_eq!(t.count(&[]).unwrap(), 2);
    assert_eq!(t.distinct("a", &SelectQuery::default()).unwrap().len(), 2);
    assert_eq!(t.row(2).unwrap().rows, vec![vec![json!(2), json!(2)]]);

    let err = t.add_row(&row(json!({"a": 3}))).unwrap_err();
    assert!(matches!(err, Error::AuthorizationDenied(_)), "{:?}", err);
    let err = t.add_row(&row(json!({"b": 3}))).unwrap_err();
    assert!(matches!(err, Error::AuthorizationDenied(_)), "{:?}", err);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn columns_are_the_union_of_keys(
        first in proptest::collection::btree_map("[a-m][a-z0-9_]{0,6}", any::<i32>(), 1..5),
        second in proptest::collection::btree_map("[n-z][a-z0-9_]{0,6}", "[a-z ]{0,8}", 1..5),
    ) {
        let mut db = Database::open_in_memory().unwrap();
        let rows = vec![
            Value::Object(first.iter().map(|(k, v)| (k.clone(), json!(v))).collect()),
            Value::Object(second.iter().map(|(k, v)| (k.clone(), json!(v))).collect()),
        ];
        upsert(&mut db, "t", &[], rows).unwrap();

        let t = db.existing_table("t").unwrap();
        let mut expected = vec![ID_COLUMN.to_string()];
        expected.extend(first.keys().cloned());
        expected.extend(second.keys().cloned());
        let columns: Vec<String> = t.columns().iter().map(|c| c.name.clone()).collect();
        prop_assert_eq!(columns, expected);

        let res = t.select(&SelectQuery::default()).unwrap();
        let stored: Vec<Row> = res.iter_rows().collect();
        for (k, v) in first.iter() {
            prop_assert_eq!(&stored[0][k.as_str()], &json!(v));
            prop_assert_eq!(&stored[1][k.as_str()], &Value::Null);
        }
        for (k, v) in second.iter() {
            prop_assert_eq!(&stored[1][k.as_str()], &json!(v));
            prop_assert_eq!(&stored[0][k.as_str()], &Value::Null);
        }
    }
}
