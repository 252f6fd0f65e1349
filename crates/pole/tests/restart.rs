mod common;

use std::time::Duration;

use common::{hit_ids, select, start_node, wait_until};

/// After a stop and restart of a bootstrapped node, the replayed log
/// rebuilds the same catalog and the same index contents.
#[test]
fn catalog_and_data_survive_a_restart() {
    let scratch = tempfile::tempdir().unwrap();
    let index_uri = format!("file://{}/segments", scratch.path().display());
    let raft_dir = scratch.path().join("raft");

    let node = start_node("n1", &index_uri, &raft_dir, true, None);
    node.wait_for_leadership();
    node.engine.exec("create table t (id int, name varchar(64))").unwrap();
    node.engine.exec("insert into t (id,name) values (1,'hello'),(2,'world')").unwrap();

    let mappings_before = node.engine.mapping().mappings;
    let hits_before = select(&node.engine, "select * from t");
    assert_eq!(hits_before.hits.total, 2);
    node.shutdown();

    let node = start_node("n1", &index_uri, &raft_dir, true, None);
    node.wait_for_leadership();
    // replay also re-applies the lock/unlock pair of the old writer, so
    // the lock set must come out empty again
    wait_until("catalog replay", Duration::from_secs(10), || {
        let catalog = node.engine.mapping();
        catalog.mappings == mappings_before && catalog.locks.is_empty()
    });

    let hits_after = select(&node.engine, "select * from t");
    assert_eq!(hits_after.hits.total, hits_before.hits.total);
    assert_eq!(hit_ids(&hits_after), hit_ids(&hits_before));
    assert_eq!(
        hits_after.hits.hits[0].source,
        hits_before.hits.hits[0].source
    );

    // the index keeps accepting writes after recovery
    node.engine.exec("insert into t (id,name) values (3,'again')").unwrap();
    assert_eq!(select(&node.engine, "select * from t").hits.total, 3);

    node.shutdown();
}
