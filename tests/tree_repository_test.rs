//! Repository operations that must behave identically for every encoding

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rstest::rstest;

use arborist::application::{ApplicationError, TreeRepository};
use arborist::domain::error::DomainError;
use arborist::domain::entities::RawRow;
use arborist::domain::query::Statement;
use arborist::domain::value::{EntityKey, Value};
use arborist::infrastructure::traits::{Database, DriverResult, Executor, Transaction};
use arborist::util::testing::category_with;

use common::{dialect, get, id_set, ids, node, parent_links, seeded};

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_seeded_tree_when_finding_roots_then_returns_parentless_rows(#[case] encoding: &str) {
    // Arrange
    let (repository, _db) = seeded(encoding).await;
    repository.insert(&node(9, None, "Z")).await.unwrap();

    // Act
    let roots = repository.find_roots().await.unwrap();

    // Assert
    assert_eq!(ids(&roots), vec![1, 9]);
    assert!(roots.iter().all(|r| r.value("parent_id").is_null()));
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_seeded_tree_when_finding_relatives_then_excludes_entity_itself(
    #[case] encoding: &str,
) {
    // Arrange
    let (repository, _db) = seeded(encoding).await;
    let a = get(&repository, 1).await;
    let c = get(&repository, 3).await;
    let d = get(&repository, 4).await;

    // Act + Assert
    assert_eq!(ids(&repository.find_descendants(&a).await.unwrap()), vec![2, 3, 4]);
    assert_eq!(ids(&repository.find_descendants(&c).await.unwrap()), vec![4]);
    assert!(repository.find_descendants(&d).await.unwrap().is_empty());
    assert_eq!(ids(&repository.find_ancestors(&d).await.unwrap()), vec![1, 3]);
    assert!(repository.find_ancestors(&a).await.unwrap().is_empty());
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_entity_when_counting_then_matches_list_length(#[case] encoding: &str) {
    // Arrange
    let (repository, _db) = seeded(encoding).await;

    for id in 1..=4 {
        let entity = get(&repository, id).await;

        // Act
        let descendants = repository.find_descendants(&entity).await.unwrap();
        let ancestors = repository.find_ancestors(&entity).await.unwrap();

        // Assert
        assert_eq!(
            repository.count_descendants(&entity).await.unwrap(),
            descendants.len() as u64
        );
        assert_eq!(
            repository.count_ancestors(&entity).await.unwrap(),
            ancestors.len() as u64
        );
    }
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_entity_when_building_descendants_tree_then_flattens_to_descendant_list(
    #[case] encoding: &str,
) {
    // Arrange
    let (repository, _db) = seeded(encoding).await;
    let a = get(&repository, 1).await;

    // Act
    let tree = repository.find_descendants_tree(&a).await.unwrap();

    // Assert
    let listed = repository.find_descendants(&a).await.unwrap();
    assert_eq!(id_set(tree.descendants()), id_set(&listed));
    assert_eq!(tree.root_node().unwrap().key, EntityKey::from(1));
    assert_eq!(tree.depth(), 3);
    let c = tree.get_node(tree.find(&EntityKey::from(3)).unwrap()).unwrap();
    assert_eq!(c.children.len(), 1);
    assert_eq!(id_set(tree.leaf_nodes()), BTreeSet::from([2, 4]));
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_entity_when_building_ancestors_tree_then_chain_ends_at_entity(
    #[case] encoding: &str,
) {
    // Arrange
    let (repository, _db) = seeded(encoding).await;
    let d = get(&repository, 4).await;

    // Act
    let chain = repository.find_ancestors_tree(&d).await.unwrap();

    // Assert
    let keys: Vec<EntityKey> = chain.iter().map(|(_, n)| n.key.clone()).collect();
    assert_eq!(keys, vec![EntityKey::from(1), EntityKey::from(3), EntityKey::from(4)]);
    assert_eq!(chain.focus_node().unwrap().key, EntityKey::from(4));
    assert_eq!(chain.focus_node().unwrap().data, d);
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_seeded_tree_when_finding_trees_then_one_tree_per_root(#[case] encoding: &str) {
    // Arrange
    let (repository, _db) = seeded(encoding).await;
    repository.insert(&node(5, None, "E")).await.unwrap();
    repository.insert(&node(6, Some(5), "F")).await.unwrap();

    // Act
    let trees = repository.find_trees().await.unwrap();

    // Assert
    assert_eq!(trees.len(), 2);
    assert_eq!(trees[0].len(), 4);
    assert_eq!(trees[1].len(), 2);
    assert_eq!(trees[1].root_node().unwrap().key, EntityKey::from(5));
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_no_writes_when_reading_twice_then_results_are_identical(#[case] encoding: &str) {
    // Arrange
    let (repository, db) = seeded(encoding).await;
    let c = get(&repository, 3).await;

    // Act
    let first = repository.find_descendants(&c).await.unwrap();
    let second = repository.find_descendants(&c).await.unwrap();
    let first_tree = repository.find_ancestors_tree(&c).await.unwrap();
    let second_tree = repository.find_ancestors_tree(&c).await.unwrap();

    // Assert
    assert_eq!(first, second);
    assert_eq!(first_tree.len(), second_tree.len());
    assert!(db.writes().is_empty(), "reads must not write");
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_subtree_when_moved_then_relatives_follow_new_parent(#[case] encoding: &str) {
    // Arrange
    let (repository, db) = seeded(encoding).await;
    let c = get(&repository, 3).await;
    let b = get(&repository, 2).await;

    // Act
    repository.move_to(&c, Some(&b)).await.unwrap();

    // Assert
    let b = get(&repository, 2).await;
    let d = get(&repository, 4).await;
    assert_eq!(ids(&repository.find_descendants(&b).await.unwrap()), vec![3, 4]);
    assert_eq!(ids(&repository.find_ancestors(&d).await.unwrap()), vec![1, 2, 3]);
    assert_eq!(
        parent_links(&db).await,
        vec![(1, None), (2, Some(1)), (3, Some(2)), (4, Some(3))]
    );
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_entity_when_moved_beneath_own_descendant_then_fails_and_store_unchanged(
    #[case] encoding: &str,
) {
    // Arrange
    let (repository, db) = seeded(encoding).await;
    let a = get(&repository, 1).await;
    let c = get(&repository, 3).await;
    let d = get(&repository, 4).await;
    let before = parent_links(&db).await;

    // Act
    let under_descendant = repository.move_to(&c, Some(&d)).await;
    let under_itself = repository.move_to(&a, Some(&a)).await;

    // Assert
    for result in [under_descendant, under_itself] {
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::CyclicMove { .. }))
        ));
    }
    assert!(db.writes().is_empty());
    assert_eq!(parent_links(&db).await, before);
    assert_eq!(ids(&repository.find_descendants(&a).await.unwrap()), vec![2, 3, 4]);
}

#[rstest]
#[case::closure_table("closure-table", "INSERT INTO")]
#[case::nested_set("nested-set", "\"nsleft\" = ? -")]
#[case::materialized_path("materialized-path", "\"parent_id\"")]
#[tokio::test]
async fn given_failing_statement_when_moving_then_rolls_back_everything(
    #[case] encoding: &str,
    #[case] failing_fragment: &str,
) {
    // Arrange
    let (repository, db) = seeded(encoding).await;
    let c = get(&repository, 3).await;
    let b = get(&repository, 2).await;
    db.fail_when(failing_fragment);

    // Act
    let result = repository.move_to(&c, Some(&b)).await;

    // Assert
    assert!(matches!(result, Err(ApplicationError::OperationFailed { .. })));
    let a = get(&repository, 1).await;
    let b = get(&repository, 2).await;
    assert_eq!(ids(&repository.find_descendants(&b).await.unwrap()), Vec::<i64>::new());
    assert_eq!(ids(&repository.find_descendants(&a).await.unwrap()), vec![2, 3, 4]);
    assert_eq!(get(&repository, 3).await, c);
}

#[rstest]
#[case::closure_table("closure-table")]
#[case::nested_set("nested-set")]
#[case::materialized_path("materialized-path")]
#[tokio::test]
async fn given_missing_parent_when_inserting_then_not_found(#[case] encoding: &str) {
    // Arrange
    let (repository, _db) = seeded(encoding).await;

    // Act
    let result = repository.insert(&node(7, Some(42), "orphan")).await;

    // Assert
    assert!(matches!(result, Err(ApplicationError::NotFound { .. })));
    assert!(repository
        .find_by_key(&EntityKey::from(7))
        .await
        .unwrap()
        .is_none());
}

/// Store answering every query with the same rows.
struct CannedRows(Vec<RawRow>);

#[async_trait]
impl Executor for CannedRows {
    async fn query(&self, _statement: &Statement) -> DriverResult<Vec<RawRow>> {
        Ok(self.0.clone())
    }

    async fn execute(&self, _statement: &Statement) -> DriverResult<u64> {
        Ok(0)
    }
}

#[async_trait]
impl Database for CannedRows {
    async fn begin(&self) -> DriverResult<Box<dyn Transaction>> {
        Err("read-only store".into())
    }
}

#[rstest]
#[case::no_row(vec![])]
#[case::no_count_column(vec![RawRow::from([("total".to_string(), Value::Integer(3))])])]
#[case::negative_count(vec![RawRow::from([("count".to_string(), Value::Integer(-1))])])]
#[tokio::test]
async fn given_malformed_count_result_when_counting_then_fails(#[case] rows: Vec<RawRow>) {
    // Arrange
    let repository =
        TreeRepository::new(category_with("nested-set"), dialect(), Arc::new(CannedRows(rows)))
            .unwrap();
    let entity = node(1, None, "A");

    // Act
    let descendants = repository.count_descendants(&entity).await;
    let ancestors = repository.count_ancestors(&entity).await;

    // Assert
    for result in [descendants, ancestors] {
        assert!(
            matches!(
                result,
                Err(ApplicationError::Domain(DomainError::MissingColumn { .. }))
                    | Err(ApplicationError::OperationFailed { .. })
            ),
            "{:?}",
            result
        );
    }
}
