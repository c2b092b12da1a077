//! Closure table: exact move statements and the closure invariant
//!
//! The junction must hold (a, d) exactly when a is d or an ancestor of d
//! according to the parent column.

mod common;

use std::collections::BTreeSet;

use arborist::domain::query::Statement;
use arborist::domain::value::Value;
use arborist::infrastructure::traits::Executor;

use common::{get, ids, node, parent_links, seeded, ancestors_by_parent, RecordingDatabase};

async fn junction(db: &RecordingDatabase) -> BTreeSet<(i64, i64)> {
    let rows = db
        .query(&Statement::new(
            "SELECT \"id_ancestor\", \"id_descendant\" FROM \"category_closure\"",
            Vec::new(),
        ))
        .await
        .unwrap();
    rows.iter()
        .map(|row| {
            (
                row["id_ancestor"].as_i64().unwrap(),
                row["id_descendant"].as_i64().unwrap(),
            )
        })
        .collect()
}

async fn expected_junction(db: &RecordingDatabase) -> BTreeSet<(i64, i64)> {
    let links = parent_links(db).await;
    links
        .iter()
        .flat_map(|(id, _)| {
            let mut pairs: Vec<(i64, i64)> = ancestors_by_parent(&links, *id)
                .into_iter()
                .map(|ancestor| (ancestor, *id))
                .collect();
            pairs.push((*id, *id));
            pairs
        })
        .collect()
}

#[tokio::test]
async fn given_seeded_tree_when_reading_junction_then_holds_closure() {
    // Arrange
    let (_repository, db) = seeded("closure-table").await;

    // Act
    let actual = junction(&db).await;

    // Assert
    let expected: BTreeSet<(i64, i64)> = [
        (1, 1),
        (2, 2),
        (1, 2),
        (3, 3),
        (1, 3),
        (4, 4),
        (3, 4),
        (1, 4),
    ]
    .into_iter()
    .collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn given_leaf_when_moved_under_sibling_then_issues_delete_insert_update() {
    // Arrange: A(1) -> B(2), C(3); C -> D(4)
    let (repository, db) = seeded("closure-table").await;
    let b = get(&repository, 2).await;
    let c = get(&repository, 3).await;

    // Act
    repository.move_to(&b, Some(&c)).await.unwrap();

    // Assert
    let writes = db.writes();
    assert_eq!(writes.len(), 3, "{:#?}", writes);
    assert_eq!(
        writes[0].sql,
        "DELETE FROM \"category_closure\" WHERE \"id_descendant\" IN (?)"
    );
    assert_eq!(writes[0].params, vec![Value::Integer(2)]);
    assert_eq!(
        writes[1].sql,
        "INSERT INTO \"category_closure\" (\"id_ancestor\", \"id_descendant\") VALUES (?, ?), (?, ?), (?, ?)"
    );
    assert_eq!(
        writes[1].params,
        [1, 2, 3, 2, 2, 2].map(Value::Integer).to_vec()
    );
    assert_eq!(
        writes[2].sql,
        "UPDATE \"category\" SET \"parent_id\" = ? WHERE \"id\" = ?"
    );
    assert_eq!(writes[2].params, vec![Value::Integer(3), Value::Integer(2)]);

    assert_eq!(junction(&db).await, expected_junction(&db).await);
    assert_eq!(ids(&repository.find_ancestors(&b).await.unwrap()), vec![1, 3]);
}

#[tokio::test]
async fn given_subtree_when_moved_to_root_then_inner_rows_survive() {
    // Arrange
    let (repository, db) = seeded("closure-table").await;
    let c = get(&repository, 3).await;

    // Act
    repository.move_to(&c, None).await.unwrap();

    // Assert
    let actual = junction(&db).await;
    assert!(actual.contains(&(3, 4)), "inner row (C, D) must survive");
    assert!(!actual.contains(&(1, 3)));
    assert!(!actual.contains(&(1, 4)));
    assert_eq!(actual, expected_junction(&db).await);
    assert_eq!(ids(&repository.find_roots().await.unwrap()), vec![1, 3]);
}

#[tokio::test]
async fn given_sequence_of_moves_when_done_then_closure_invariant_holds() {
    // Arrange
    let (repository, db) = seeded("closure-table").await;
    repository.insert(&node(5, Some(4), "E")).await.unwrap();

    // Act: C under B, then D to root, then B under D
    let c = get(&repository, 3).await;
    let b = get(&repository, 2).await;
    repository.move_to(&c, Some(&b)).await.unwrap();
    let d = get(&repository, 4).await;
    repository.move_to(&d, None).await.unwrap();
    let b = get(&repository, 2).await;
    let d = get(&repository, 4).await;
    repository.move_to(&b, Some(&d)).await.unwrap();

    // Assert
    assert_eq!(junction(&db).await, expected_junction(&db).await);
    let d = get(&repository, 4).await;
    assert_eq!(ids(&repository.find_descendants(&d).await.unwrap()), vec![2, 3, 5]);
}

#[tokio::test]
async fn given_child_insert_when_done_then_inherits_parent_chain() {
    // Arrange
    let (repository, db) = seeded("closure-table").await;

    // Act
    repository.insert(&node(5, Some(4), "E")).await.unwrap();

    // Assert
    let actual = junction(&db).await;
    for pair in [(5, 5), (4, 5), (3, 5), (1, 5)] {
        assert!(actual.contains(&pair), "missing {:?}", pair);
    }
    assert_eq!(actual, expected_junction(&db).await);
}

#[tokio::test]
async fn given_wide_subtree_below_deep_chain_when_moved_then_succeeds() {
    // Arrange: a 12-deep chain below A, separate root 10 with 2000 leaves
    let (repository, db) = seeded("closure-table").await;
    let mut parent = 4;
    for id in 20..29 {
        repository.insert(&node(id, Some(parent), "chain")).await.unwrap();
        parent = id;
    }
    repository.insert(&node(10, None, "wide")).await.unwrap();
    for id in 100..2100 {
        repository.insert(&node(id, Some(10), "leaf")).await.unwrap();
    }
    db.clear();
    let wide = get(&repository, 10).await;
    let tail = get(&repository, 28).await;

    // Act
    repository.move_to(&wide, Some(&tail)).await.unwrap();

    // Assert
    let writes = db.writes();
    assert!(writes
        .iter()
        .filter(|w| w.sql.starts_with("INSERT INTO"))
        .count()
        > 1);
    let leaf = get(&repository, 2099).await;
    assert_eq!(
        ids(&repository.find_ancestors(&leaf).await.unwrap()),
        vec![1, 3, 4, 10, 20, 21, 22, 23, 24, 25, 26, 27, 28]
    );
    assert_eq!(junction(&db).await, expected_junction(&db).await);
}
