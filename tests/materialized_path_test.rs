//! Materialized path: stored paths, prefix rewrite on move, composable queries

mod common;

use std::collections::{BTreeMap, HashSet};

use arborist::application::TreeRepository;
use arborist::domain::encoding::FragmentAliases;
use arborist::domain::entities::Record;
use arborist::domain::query::Statement;
use arborist::domain::value::Value;
use arborist::infrastructure::traits::Executor;

use arborist::util::testing::tag_with;

use common::{get, ids, key_set, node, repository_for, seeded, tag, text_key, RecordingDatabase};

async fn paths(db: &RecordingDatabase) -> BTreeMap<i64, String> {
    let rows = db
        .query(&Statement::new(
            "SELECT \"id\", \"mpath\" FROM \"category\"",
            Vec::new(),
        ))
        .await
        .unwrap();
    rows.iter()
        .map(|row| {
            (
                row["id"].as_i64().unwrap(),
                row["mpath"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn given_seeded_tree_when_reading_paths_then_each_extends_its_parent() {
    // Arrange
    let (_repository, db) = seeded("materialized-path").await;

    // Act
    let paths = paths(&db).await;

    // Assert
    assert_eq!(paths[&1], "1.");
    assert_eq!(paths[&2], "1.2.");
    assert_eq!(paths[&3], "1.3.");
    assert_eq!(paths[&4], "1.3.4.");
}

#[tokio::test]
async fn given_subtree_when_moved_then_rewrites_prefix_in_one_statement() {
    // Arrange
    let (repository, db) = seeded("materialized-path").await;
    let c = get(&repository, 3).await;
    let b = get(&repository, 2).await;

    // Act
    repository.move_to(&c, Some(&b)).await.unwrap();

    // Assert
    let writes = db.writes();
    assert_eq!(writes.len(), 2, "{:#?}", writes);
    assert_eq!(
        writes[0].sql,
        "UPDATE \"category\" SET \"mpath\" = ? || SUBSTR(\"mpath\", ?) WHERE SUBSTR(\"mpath\", 1, ?) = ?"
    );
    assert_eq!(
        writes[0].params,
        vec![
            Value::from("1.2.3."),
            Value::Integer(5),
            Value::Integer(4),
            Value::from("1.3.")
        ]
    );
    let paths = paths(&db).await;
    assert_eq!(paths[&3], "1.2.3.");
    assert_eq!(paths[&4], "1.2.3.4.");
    assert_eq!(paths[&2], "1.2.");
}

#[tokio::test]
async fn given_subtree_when_moved_to_root_then_path_starts_with_own_segment() {
    // Arrange
    let (repository, db) = seeded("materialized-path").await;
    let c = get(&repository, 3).await;

    // Act
    repository.move_to(&c, None).await.unwrap();

    // Assert
    let paths = paths(&db).await;
    assert_eq!(paths[&3], "3.");
    assert_eq!(paths[&4], "3.4.");
    assert_eq!(ids(&repository.find_ancestors(&get(&repository, 4).await).await.unwrap()), vec![3]);
}

#[tokio::test]
async fn given_sibling_prefix_when_querying_descendants_then_segments_do_not_bleed() {
    // Arrange: 1 and 11 share a textual prefix, the separator keeps them apart
    let (repository, _db) = seeded("materialized-path").await;
    repository.insert(&node(11, None, "K")).await.unwrap();
    repository.insert(&node(12, Some(11), "L")).await.unwrap();

    // Act
    let a = get(&repository, 1).await;
    let descendants = repository.find_descendants(&a).await.unwrap();

    // Assert
    assert_eq!(ids(&descendants), vec![2, 3, 4]);
}

#[tokio::test]
async fn given_caller_aliases_when_building_descendants_query_then_composes_and_runs() {
    // Arrange
    let (repository, db) = seeded("materialized-path").await;
    let c = get(&repository, 3).await;
    let aliases = FragmentAliases {
        target: "node",
        auxiliary: "anchor",
    };

    // Act
    let mut query = repository.descendants_query(&c, aliases).unwrap();
    let name = query.column("node", "name");
    let bound = query.bind("name", Value::from("D"));
    query.and_where(format!("{} = {}", name, bound));
    let rows = db.query(&query.to_statement()).await.unwrap();

    // Assert
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["node_id"], Value::Integer(4));
    assert_eq!(rows[0]["node_name"], Value::from("D"));
}

async fn load(repository: &TreeRepository, code: &str) -> Record {
    repository
        .find_by_key(&text_key(code))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no tag {}", code))
}

#[tokio::test]
async fn given_text_keys_with_pattern_characters_when_querying_then_match_exact_prefixes() {
    // Arrange: keys differing only by LIKE wildcards, case, or an embedded separator
    let metadata = tag_with("materialized-path");
    let (repository, _db) = repository_for(metadata.clone()).await;
    for record in [
        tag("a_b", None, "wildcard"),
        tag("axb", None, "plain"),
        tag("kid", Some("axb"), "child"),
        tag("a", None, "lower"),
        tag("A", None, "upper"),
        tag("a.b", None, "dotted"),
        tag("50%", None, "percent"),
        tag("50x", Some("50%"), "under percent"),
    ] {
        repository.insert(&record).await.unwrap();
    }

    // Act
    let under_wildcard = repository.find_descendants(&load(&repository, "a_b").await).await.unwrap();
    let under_lower = repository.find_descendants(&load(&repository, "a").await).await.unwrap();
    let under_percent = repository.find_descendants(&load(&repository, "50%").await).await.unwrap();
    let above_dotted = repository.find_ancestors(&load(&repository, "a.b").await).await.unwrap();

    // Assert
    assert!(under_wildcard.is_empty(), "{:?}", under_wildcard);
    assert_eq!(repository.count_descendants(&load(&repository, "a_b").await).await.unwrap(), 0);
    assert!(under_lower.is_empty(), "{:?}", under_lower);
    assert!(above_dotted.is_empty(), "{:?}", above_dotted);
    assert_eq!(key_set(&metadata, &under_percent), HashSet::from([text_key("50x")]));
    assert_eq!(
        key_set(&metadata, &repository.find_descendants(&load(&repository, "axb").await).await.unwrap()),
        HashSet::from([text_key("kid")])
    );
}
