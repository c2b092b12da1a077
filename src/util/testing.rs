//! Test setup and shared fixtures

use std::env;
use std::sync::Once;

use tracing::{debug, info};
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::domain::metadata::TreeMetadata;
use crate::domain::value::ColumnType;

static TEST_SETUP: Once = Once::new();

pub fn init_test_setup() {
    TEST_SETUP.call_once(|| {
        if env::var("RUST_LOG").is_err() {
            env::set_var("RUST_LOG", "debug");
        }
        // global logging subscriber, used by all tracing log macros
        setup_test_logging();
        info!("Test Setup complete");
    });
}

fn setup_test_logging() {
    debug!("INIT: Attempting logger init from testing.rs");

    // per-row tracing of the executor drowns everything else
    let noisy_modules = ["arborist::infrastructure::sqlite"];
    let module_filter = filter_fn(move |metadata| {
        !noisy_modules
            .iter()
            .any(|name| metadata.target().starts_with(name))
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(module_filter)
            .with_filter(env_filter),
    );

    // Only set if we haven't already set a global subscriber
    if tracing::dispatcher::has_been_set() {
        debug!("Tracing subscriber already set");
    } else {
        subscriber.try_init().unwrap_or_else(|e| {
            eprintln!("Error: Failed to set up logging: {}", e);
        });
    }
}

/// `Category(id, parent_id, name)` without a tree encoding.
pub fn category() -> TreeMetadata {
    TreeMetadata::new("Category", "category")
        .primary("id", ColumnType::Integer)
        .parent(None, "id")
        .column("name", ColumnType::Text)
}

/// `Category` declared with the named encoding: `closure-table`, `nested-set`
/// or `materialized-path`.
pub fn category_with(encoding: &str) -> TreeMetadata {
    with_encoding(category(), encoding)
}

/// `Tag(code, parent_code, label)` keyed by free text.
pub fn tag_with(encoding: &str) -> TreeMetadata {
    let metadata = TreeMetadata::new("Tag", "tag")
        .primary("code", ColumnType::Text)
        .parent(None, "code")
        .column("label", ColumnType::Text);
    with_encoding(metadata, encoding)
}

/// `Region(a, b, parent_a, parent_b, name)` with a composite key.
pub fn region_with(encoding: &str) -> TreeMetadata {
    let metadata = TreeMetadata::new("Region", "region")
        .primary("a", ColumnType::Integer)
        .primary("b", ColumnType::Text)
        .parent(None, "a")
        .parent(None, "b")
        .column("name", ColumnType::Text);
    with_encoding(metadata, encoding)
}

fn with_encoding(metadata: TreeMetadata, encoding: &str) -> TreeMetadata {
    match encoding {
        "closure-table" => metadata.closure_table(),
        "nested-set" => metadata.nested_set(),
        "materialized-path" => metadata.materialized_path(),
        other => panic!("unknown encoding in test fixture: {}", other),
    }
}
