//! End-to-end reconciliation passes against the in-memory backend.

use autoschema::model::{FieldConstraints, LiveColumn, TableSnapshot};
use autoschema::{
    ColumnType, EntityDef, ManagedTableRegistry, MemoryBackend, Reconciler, SchemaBackend,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn article_def() -> EntityDef {
    let mut def = EntityDef::new("article");
    def.field("title", ColumnType::String)
        .field("body", ColumnType::Text)
        .belongs_to("author")
        .timestamps();
    def
}

/// A live snapshot for a table with only a bigserial `id` column.
fn bare_table() -> TableSnapshot {
    let mut snap = TableSnapshot::default();
    snap.columns.insert(
        "id".to_string(),
        LiveColumn {
            sql_type: Some("bigint".to_string()),
            ty: Some(ColumnType::BigInt),
            limit: None,
            precision: None,
            scale: None,
            null: false,
            default: None,
        },
    );
    snap
}

#[tokio::test]
async fn first_pass_creates_table_with_relationship_columns() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    rec.define(article_def());

    let report = rec.reconcile_all().await.unwrap();
    assert!(report.skipped.is_empty());
    assert!(report.dropped.is_empty());

    let backend = rec.backend();
    assert!(backend.has_table("articles"));
    let snapshot = backend.table_snapshot("articles").await.unwrap().unwrap();
    let columns: Vec<&str> = snapshot.columns.keys().map(String::as_str).collect();
    assert_eq!(
        columns,
        vec!["id", "title", "body", "created_at", "updated_at", "author_id"]
    );
    assert!(snapshot.indexes.contains_key("idx_articles_author_id"));

    assert!(rec.registry().contains("articles"));
}

#[tokio::test]
async fn second_pass_is_noop() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    rec.define(article_def());

    let first = rec.reconcile_all().await.unwrap();
    assert!(!first.is_noop());
    let log_after_first = rec.backend().ddl_log().len();

    let second = rec.reconcile_all().await.unwrap();
    assert!(second.is_noop(), "second pass: {:?}", second.tables);
    assert_eq!(rec.backend().ddl_log().len(), log_after_first);
}

#[tokio::test]
async fn redeclared_type_converges_with_one_change() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    rec.define(article_def());
    rec.reconcile_all().await.unwrap();

    // body: text -> string(500)
    let mut redefined = EntityDef::new("article");
    redefined
        .field("title", ColumnType::String)
        .field_with(
            "body",
            ColumnType::String,
            FieldConstraints::default().limit(500),
        )
        .belongs_to("author")
        .timestamps();
    rec.define(redefined);

    let report = rec.reconcile_all().await.unwrap();
    assert_eq!(report.operations_applied(), 1);
    let changes: Vec<String> = rec
        .backend()
        .ddl_log()
        .into_iter()
        .filter(|e| e.starts_with("change_column"))
        .collect();
    assert_eq!(changes, vec!["change_column articles.body"]);

    let snapshot = rec
        .backend()
        .table_snapshot("articles")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        snapshot.columns["body"].sql_type.as_deref(),
        Some("character varying(500)")
    );

    assert!(rec.reconcile_all().await.unwrap().is_noop());
}

#[tokio::test]
async fn removed_association_drops_column_and_index() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    rec.define(article_def());
    rec.reconcile_all().await.unwrap();

    let mut def = EntityDef::new("article");
    def.field("title", ColumnType::String)
        .field("body", ColumnType::Text)
        .timestamps();
    rec.define(def);

    rec.reconcile_all().await.unwrap();
    let snapshot = rec
        .backend()
        .table_snapshot("articles")
        .await
        .unwrap()
        .unwrap();
    assert!(!snapshot.columns.contains_key("author_id"));
    assert!(!snapshot.indexes.contains_key("idx_articles_author_id"));
}

#[tokio::test]
async fn many_to_many_creates_join_table_once() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    let mut article = EntityDef::new("article");
    article
        .field("title", ColumnType::String)
        .many_to_many("tags");
    rec.define(article);
    let mut tag = EntityDef::new("tag");
    tag.field("name", ColumnType::String);
    rec.define(tag);

    rec.reconcile_all().await.unwrap();
    let backend = rec.backend();
    assert!(backend.has_table("articles_tags"));
    let join = backend
        .table_snapshot("articles_tags")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        join.columns.keys().collect::<Vec<_>>(),
        vec!["article_id", "tag_id"]
    );
    let index = join.indexes.values().next().unwrap();
    assert!(index.unique);
    assert!(rec.registry().contains("articles_tags"));

    // Join tables are never re-created or alter-diffed once present.
    let creates_before = join_creates(&rec);
    rec.reconcile_all().await.unwrap();
    assert_eq!(join_creates(&rec), creates_before);
}

#[tokio::test]
async fn join_table_shared_by_two_entities_created_once() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    // Both sides declare the relationship; they synthesize the same join
    // table, which must be created exactly once per pass.
    let mut article = EntityDef::new("article");
    article
        .field("title", ColumnType::String)
        .many_to_many("tags");
    rec.define(article);
    let mut tag = EntityDef::new("tag");
    tag.field("name", ColumnType::String).many_to_many("articles");
    rec.define(tag);

    let report = rec.reconcile_all().await.unwrap();
    assert!(report.tables.iter().all(|t| t.failures.is_empty()));
    assert_eq!(join_creates(&rec), 1);

    // The unique composite index survives the second entity's expansion.
    let join = rec
        .backend()
        .table_snapshot("articles_tags")
        .await
        .unwrap()
        .unwrap();
    assert!(join.indexes.values().next().unwrap().unique);

    assert!(rec.reconcile_all().await.unwrap().is_noop());
}

fn join_creates(rec: &Reconciler<MemoryBackend>) -> usize {
    rec.backend()
        .ddl_log()
        .iter()
        .filter(|e| *e == "create_table articles_tags")
        .count()
}

#[tokio::test]
async fn polymorphic_relationship_gets_composite_index() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    let mut comment = EntityDef::new("comment");
    comment
        .field("text", ColumnType::Text)
        .belongs_to_polymorphic("owner");
    rec.define(comment);

    rec.reconcile_all().await.unwrap();
    let snapshot = rec
        .backend()
        .table_snapshot("comments")
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.columns.contains_key("owner_id"));
    assert!(snapshot.columns.contains_key("owner_type"));
    assert_eq!(snapshot.indexes.len(), 1);
    let index = &snapshot.indexes["idx_comments_owner_id_owner_type"];
    assert_eq!(index.columns, vec!["owner_id", "owner_type"]);
}

#[tokio::test]
async fn specializations_share_root_table() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    let mut message = EntityDef::new("message");
    message.field("subject", ColumnType::String);
    rec.define(message);
    let mut reply = EntityDef::new("reply");
    reply.field("in_reply_to", ColumnType::Integer);
    rec.define_specialization("message", reply);

    rec.reconcile_all().await.unwrap();
    let backend = rec.backend();
    assert!(backend.has_table("messages"));
    assert!(!backend.has_table("replies"));

    let snapshot = backend.table_snapshot("messages").await.unwrap().unwrap();
    assert!(snapshot.columns.contains_key("type"));
    assert!(snapshot.columns.contains_key("in_reply_to"));
    assert!(snapshot.indexes.contains_key("idx_messages_type"));
}

#[tokio::test]
async fn orphaned_managed_table_is_dropped() {
    init_tracing();
    let mut rec = Reconciler::new(MemoryBackend::new());
    rec.define(article_def());
    let mut widget = EntityDef::new("widget");
    widget.field("name", ColumnType::String);
    rec.define(widget);

    // A pre-existing table this system never created.
    rec.backend().seed_table("legacy", bare_table());

    rec.reconcile_all().await.unwrap();
    assert!(rec.registry().contains("widgets"));

    rec.undefine("widget");
    let report = rec.reconcile_all().await.unwrap();
    assert_eq!(report.dropped, vec!["widgets"]);
    assert!(!rec.backend().has_table("widgets"));
    assert!(!rec.registry().contains("widgets"));
    // Never-managed tables are untouched, no matter how many passes run.
    assert!(rec.backend().has_table("legacy"));
}

#[tokio::test]
async fn restored_registry_enables_sweep_across_processes() {
    init_tracing();
    let mut first = Reconciler::new(MemoryBackend::new());
    let mut widget = EntityDef::new("widget");
    widget.field("name", ColumnType::String);
    first.define(widget);
    first.reconcile_all().await.unwrap();
    let saved = first.registry().names();

    // A later process: same database state, restored registry, no widget
    // definition.
    let backend = MemoryBackend::new();
    backend.seed_table("widgets", bare_table());
    let mut second = Reconciler::with_registry(backend, ManagedTableRegistry::restore(saved));
    let report = second.reconcile_all().await.unwrap();
    assert_eq!(report.dropped, vec!["widgets"]);
}

#[tokio::test]
async fn failed_operation_does_not_stop_the_plan() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.seed_table("articles", bare_table());
    backend.fail_when("add_index", "articles");

    let mut rec = Reconciler::new(backend);
    let mut def = EntityDef::new("article");
    def.field("title", ColumnType::String).belongs_to("author");
    rec.define(def);

    let report = rec.reconcile_all().await.unwrap();
    let table = report
        .tables
        .iter()
        .find(|t| t.table == "articles")
        .unwrap();
    assert_eq!(table.failures.len(), 1);
    assert!(table.failures[0].to_string().contains("add_index"));

    // The column additions before the failing index still landed.
    let snapshot = rec
        .backend()
        .table_snapshot("articles")
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.columns.contains_key("title"));
    assert!(snapshot.columns.contains_key("author_id"));
}

#[tokio::test]
async fn failed_creation_is_not_registered_as_managed() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.fail_when("create_table", "articles");

    let mut rec = Reconciler::new(backend);
    rec.define(article_def());

    let report = rec.reconcile_all().await.unwrap();
    let table = report
        .tables
        .iter()
        .find(|t| t.table == "articles")
        .unwrap();
    assert!(!table.failures.is_empty());
    assert!(!rec.registry().contains("articles"));
}

#[tokio::test]
async fn probe_failure_skips_only_that_entity() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.fail_when("table_snapshot", "articles");

    let mut rec = Reconciler::new(backend);
    rec.define(article_def());
    let mut tag = EntityDef::new("tag");
    tag.field("name", ColumnType::String);
    rec.define(tag);

    let report = rec.reconcile_all().await.unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].entity, "article");
    assert!(rec.backend().has_table("tags"));
    assert!(!rec.backend().has_table("articles"));
}

#[tokio::test]
async fn offline_database_fails_the_pass() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.set_offline(true);

    let mut rec = Reconciler::new(backend);
    rec.define(article_def());

    let err = rec.reconcile_all().await.unwrap_err();
    assert!(matches!(err, autoschema::Error::ConnectionUnavailable(_)));
}
