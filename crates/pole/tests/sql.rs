mod common;

use common::{hit_ids, select, start_node, TestNode};
use pole::engine::ExecOutcome;
use pole::Error;
use pole_sql::SqlError;
use pole_types::CatalogError;

fn single_node(scratch: &tempfile::TempDir) -> TestNode {
    let index_uri = format!("file://{}/segments", scratch.path().display());
    let node = start_node("n1", &index_uri, &scratch.path().join("raft"), true, None);
    node.wait_for_leadership();
    node
}

#[test]
fn round_trip_create_insert_select_delete_drop() {
    let scratch = tempfile::tempdir().unwrap();
    let node = single_node(&scratch);
    let engine = &node.engine;

    assert_eq!(
        engine
            .exec("CREATE TABLE t (id int NOT NULL, name varchar(255) NOT NULL)")
            .unwrap(),
        ExecOutcome::Ok
    );
    engine.exec("INSERT INTO t (id,name) VALUES (1,'hello'),(2,'world')").unwrap();

    let response = select(engine, "SELECT * FROM t WHERE name='hello'");
    assert_eq!(response.hits.total, 1);
    assert!(!response.timed_out);
    assert_eq!(response.hits.hits[0].id, "1");
    assert_eq!(response.hits.hits[0].source.get("name").unwrap(), "hello");

    engine.exec("DELETE FROM t WHERE id=1").unwrap();
    let response = select(engine, "SELECT * FROM t");
    assert_eq!(response.hits.total, 1);
    assert_eq!(hit_ids(&response), vec!["2"]);

    engine.exec("DROP TABLE t").unwrap();
    assert_eq!(engine.exec("SELECT * FROM t").unwrap_err(), Error::IndexNotFound);

    node.shutdown();
}

#[test]
fn like_matches_by_prefix() {
    let scratch = tempfile::tempdir().unwrap();
    let node = single_node(&scratch);
    let engine = &node.engine;

    engine.exec("create table t (id int not null, name varchar(255))").unwrap();
    engine.exec("insert into t (id,name) values (1,'hello'),(2,'world')").unwrap();
    engine.exec("INSERT INTO t SET id=3,name='help'").unwrap();

    let response = select(engine, "SELECT * FROM t WHERE name LIKE 'h%'");
    assert!(response.hits.total >= 2);
    let ids = hit_ids(&response);
    assert!(ids.contains(&"1".to_string()));
    assert!(ids.contains(&"3".to_string()));
    assert!(!ids.contains(&"2".to_string()));

    node.shutdown();
}

#[test]
fn in_lists_and_numeric_equality() {
    let scratch = tempfile::tempdir().unwrap();
    let node = single_node(&scratch);
    let engine = &node.engine;

    engine.exec("create table people (id int, name varchar(64), age int)").unwrap();
    engine
        .exec("insert into people (id,name,age) values (1,'ann',42),(2,'bob',30),(3,'cyn',42)")
        .unwrap();

    let response = select(engine, "SELECT * FROM people WHERE id IN (1,2,3)");
    assert_eq!(response.hits.total, 3);
    for id in hit_ids(&response) {
        assert!(["1", "2", "3"].contains(&id.as_str()));
    }

    let response = select(engine, "SELECT * FROM people WHERE age = 42");
    assert_eq!(response.hits.total, 2);
    for hit in &response.hits.hits {
        assert_eq!(hit.source.get("age").unwrap().as_f64().unwrap(), 42.0);
    }

    let response = select(engine, "SELECT name FROM people WHERE id NOT IN (1,3)");
    assert_eq!(hit_ids(&response), vec!["2"]);
    // projection honors the requested column set
    assert!(response.hits.hits[0].source.get("age").is_none());
    assert_eq!(response.hits.hits[0].source.get("name").unwrap(), "bob");

    node.shutdown();
}

#[test]
fn order_by_and_pagination() {
    let scratch = tempfile::tempdir().unwrap();
    let node = single_node(&scratch);
    let engine = &node.engine;

    engine.exec("create table t (id int, age int)").unwrap();
    engine.exec("insert into t (id,age) values (1,30),(2,50),(3,40)").unwrap();

    let response = select(engine, "select * from t order by age desc");
    assert_eq!(hit_ids(&response), vec!["2", "3", "1"]);

    let response = select(engine, "select * from t order by age desc limit 1, 2");
    assert_eq!(hit_ids(&response), vec!["3", "1"]);
    assert_eq!(response.hits.total, 3);

    node.shutdown();
}

#[test]
fn update_is_a_full_row_overwrite() {
    let scratch = tempfile::tempdir().unwrap();
    let node = single_node(&scratch);
    let engine = &node.engine;

    engine.exec("create table t (id int, name varchar(64))").unwrap();
    engine.exec("insert into t (id,name) values (7,'before')").unwrap();
    engine.exec("update t set name='after' where id=7").unwrap();

    let response = select(engine, "select * from t where name='after'");
    assert_eq!(hit_ids(&response), vec!["7"]);
    assert_eq!(select(engine, "select * from t where name='before'").hits.total, 0);

    node.shutdown();
}

#[test]
fn statement_error_paths() {
    let scratch = tempfile::tempdir().unwrap();
    let node = single_node(&scratch);
    let engine = &node.engine;

    engine.exec("create table t (id int, name varchar(64))").unwrap();
    assert_eq!(
        engine.exec("create table t (id int)").unwrap_err(),
        Error::IndexExists
    );
    assert_eq!(
        engine.exec("insert into missing (id) values (1)").unwrap_err(),
        Error::IndexNotFound
    );
    assert_eq!(
        engine.exec("insert into t (name) values ('orphan')").unwrap_err(),
        Error::Sql(SqlError::MissingIdentifier)
    );
    assert_eq!(
        engine.exec("update t set name='x' where name='y'").unwrap_err(),
        Error::Sql(SqlError::InvalidUpdateCondition)
    );
    assert_eq!(
        engine.exec("delete from t").unwrap_err(),
        Error::Sql(SqlError::InvalidUpdateCondition)
    );
    assert!(matches!(
        engine.exec("select * from t where age > 30").unwrap_err(),
        Error::Sql(SqlError::SyntaxNotSupported(_))
    ));
    assert!(matches!(
        engine.exec("not sql at all").unwrap_err(),
        Error::Sql(SqlError::InvalidSyntax(_))
    ));

    node.shutdown();
}

#[test]
fn lock_tokens_are_exclusive_until_released() {
    let scratch = tempfile::tempdir().unwrap();
    let node = single_node(&scratch);
    let engine = &node.engine;

    engine.lock("A").unwrap();
    assert_eq!(
        engine.lock("A").unwrap_err(),
        Error::Catalog(CatalogError::AlreadyLocked("A".into()))
    );
    engine.unlock("A").unwrap();
    assert_eq!(
        engine.unlock("A").unwrap_err(),
        Error::Catalog(CatalogError::AlreadyUnlocked("A".into()))
    );

    node.shutdown();
}
