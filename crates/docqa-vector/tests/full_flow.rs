use std::collections::HashSet;
use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use docqa_core::config::{AppConfig, EmbeddingProviderKind};
use docqa_core::traits::Embedder;
use docqa_core::Error;
use docqa_embed::HashEmbedder;
use docqa_vector::format::{CHUNKS_FILE, MANIFEST_FILE, VECTORS_FILE};
use docqa_vector::{ingest_from, IndexStore, IngestStats, SnapshotStore};

fn write_corpus(dir: &Path) {
    fs::write(
        dir.join("water.txt"),
        "To purify water, bring it to a rolling boil for one minute.\n\nStore boiled water in clean containers.",
    )
    .expect("write");
    fs::write(
        dir.join("fire.txt"),
        "A fire needs tinder, kindling and fuel wood.\x0cAlways clear a ring of bare soil around the fire pit.",
    )
    .expect("write");
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.embedding.provider = EmbeddingProviderKind::Hash;
    cfg.embedding.dim = 128;
    cfg.embedding.batch_size = 2;
    cfg.chunking.chunk_size_chars = 60;
    cfg.chunking.overlap_chars = 10;
    cfg
}

async fn ingest(docs: &Path, store: &IndexStore, cfg: &AppConfig) -> IngestStats {
    let embedder = HashEmbedder::new(cfg.embedding.dim);
    ingest_from(docs, store, cfg, &embedder, &CancellationToken::new(), false).await.expect("ingest")
}

#[tokio::test]
async fn ingest_load_and_search() {
    let docs = TempDir::new().expect("docs");
    let root = TempDir::new().expect("index");
    write_corpus(docs.path());
    let store = IndexStore::new(root.path());
    let cfg = config();

    let stats = ingest(docs.path(), &store, &cfg).await;
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.dim, 128);
    assert!(stats.chunks >= 4, "small windows split both documents");
    assert!(stats.embed_batches >= 2);
    assert!(store.stats_path().is_file());

    let snap = store.load_current().expect("load");
    assert_eq!(snap.version, stats.version);
    assert_eq!(snap.index.len(), stats.chunks);
    assert_eq!(snap.manifest.embedder_id, "hash:xxh64:d128");

    let q = HashEmbedder::new(128).embed_text("boil water one minute");
    let hits = snap.index.search(&q, 3).expect("search");
    assert_eq!(hits[0].doc_id, "water");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let fire_pages: HashSet<u32> = snap.index.chunks().iter().filter(|c| c.doc_id == "fire").map(|c| c.page).collect();
    assert_eq!(fire_pages, HashSet::from([1, 2]));
}

#[tokio::test]
async fn reingesting_identical_input_is_byte_identical() {
    let docs = TempDir::new().expect("docs");
    write_corpus(docs.path());
    let cfg = config();

    let a_root = TempDir::new().expect("a");
    let b_root = TempDir::new().expect("b");
    let (a, b) = (IndexStore::new(a_root.path()), IndexStore::new(b_root.path()));
    let sa = ingest(docs.path(), &a, &cfg).await;
    let sb = ingest(docs.path(), &b, &cfg).await;
    assert_eq!(sa.version, sb.version);
    assert_eq!(sa.chunks, sb.chunks);

    for name in [VECTORS_FILE, CHUNKS_FILE, MANIFEST_FILE] {
        let x = fs::read(a.version_dir(&sa.version).join(name)).expect("read a");
        let y = fs::read(b.version_dir(&sb.version).join(name)).expect("read b");
        assert!(x == y, "{name} differs between identical builds");
    }

    let again = ingest(docs.path(), &a, &cfg).await;
    assert_eq!(again.version, sa.version, "same store reuses the version");
    let ka: HashSet<String> = a.load_current().expect("a").index.chunks().iter().map(|c| c.key()).collect();
    let kb: HashSet<String> = b.load_current().expect("b").index.chunks().iter().map(|c| c.key()).collect();
    assert_eq!(ka, kb);
}

#[tokio::test]
async fn corrupted_versions_fail_fast() {
    let docs = TempDir::new().expect("docs");
    write_corpus(docs.path());
    let cfg = config();

    let cases: Vec<(&str, Box<dyn Fn(&Path)>)> = vec![
        ("truncated vectors", Box::new(|dir: &Path| {
            let p = dir.join(VECTORS_FILE);
            let bytes = fs::read(&p).expect("read");
            fs::write(&p, &bytes[..bytes.len() - 4]).expect("write");
        })),
        ("missing sidecar", Box::new(|dir: &Path| fs::remove_file(dir.join(CHUNKS_FILE)).expect("rm"))),
        ("edited sidecar", Box::new(|dir: &Path| {
            let p = dir.join(CHUNKS_FILE);
            let text = fs::read_to_string(&p).expect("read");
            let first_line_end = text.find('\n').expect("newline");
            fs::write(&p, &text[first_line_end + 1..]).expect("write");
        })),
        ("manifest count", Box::new(|dir: &Path| {
            let p = dir.join(MANIFEST_FILE);
            let mut m: serde_json::Value = serde_json::from_slice(&fs::read(&p).expect("read")).expect("json");
            m["count"] = serde_json::json!(1);
            fs::write(&p, serde_json::to_vec(&m).expect("ser")).expect("write");
        })),
        ("manifest dim", Box::new(|dir: &Path| {
            let p = dir.join(MANIFEST_FILE);
            let mut m: serde_json::Value = serde_json::from_slice(&fs::read(&p).expect("read")).expect("json");
            m["dim"] = serde_json::json!(64);
            fs::write(&p, serde_json::to_vec(&m).expect("ser")).expect("write");
        })),
    ];

    for (name, corrupt) in cases {
        let root = TempDir::new().expect("index");
        let store = IndexStore::new(root.path());
        let stats = ingest(docs.path(), &store, &cfg).await;
        corrupt(&store.version_dir(&stats.version));
        let err = store.load_current().expect_err(name);
        assert!(matches!(err, Error::IndexCorruption(_)), "{name}: got {err:?}");
    }
}

#[test]
fn missing_index_is_reported() {
    let root = TempDir::new().expect("index");
    let store = IndexStore::new(root.path());
    assert_eq!(store.current_version().expect("read"), None);
    assert!(matches!(store.load_current(), Err(Error::IndexCorruption(_))));
}

#[tokio::test]
async fn snapshot_swap_keeps_in_flight_readers_consistent() {
    let docs = TempDir::new().expect("docs");
    let root = TempDir::new().expect("index");
    write_corpus(docs.path());
    let store = IndexStore::new(root.path());
    let cfg = config();

    let first = ingest(docs.path(), &store, &cfg).await;
    let snapshots = SnapshotStore::new(store.load_current().expect("load"));
    let held = snapshots.snapshot();
    assert!(!snapshots.reload_if_changed(&store, |_| Ok(())).expect("unchanged"));

    fs::write(docs.path().join("shelter.txt"), "A lean-to shelter should face away from the wind.").expect("write");
    let second = ingest(docs.path(), &store, &cfg).await;
    assert_ne!(first.version, second.version);

    assert!(snapshots.reload_if_changed(&store, |_| Ok(())).expect("reload"));
    assert_eq!(snapshots.snapshot().version, second.version);
    assert_eq!(held.version, first.version, "reader keeps the snapshot it started with");
    assert_eq!(held.index.len(), first.chunks);
    assert!(!snapshots.reload_if_changed(&store, |_| Ok(())).expect("stable"));
}

#[tokio::test]
async fn corrupt_new_version_does_not_replace_served_snapshot() {
    let docs = TempDir::new().expect("docs");
    let root = TempDir::new().expect("index");
    write_corpus(docs.path());
    let store = IndexStore::new(root.path());
    let cfg = config();

    let first = ingest(docs.path(), &store, &cfg).await;
    let snapshots = SnapshotStore::new(store.load_current().expect("load"));

    fs::write(docs.path().join("extra.txt"), "Extra notes about knots and rope.").expect("write");
    let second = ingest(docs.path(), &store, &cfg).await;
    fs::remove_file(store.version_dir(&second.version).join(VECTORS_FILE)).expect("rm");

    assert!(snapshots.reload_if_changed(&store, |_| Ok(())).is_err());
    assert_eq!(snapshots.snapshot().version, first.version);
}

#[tokio::test]
async fn refused_version_is_not_published() {
    let docs = TempDir::new().expect("docs");
    let root = TempDir::new().expect("index");
    write_corpus(docs.path());
    let store = IndexStore::new(root.path());
    let cfg = config();

    let first = ingest(docs.path(), &store, &cfg).await;
    let snapshots = SnapshotStore::new(store.load_current().expect("load"));
    fs::write(docs.path().join("rope.txt"), "A bowline makes a fixed loop.").expect("write");
    ingest(docs.path(), &store, &cfg).await;

    let err = snapshots
        .reload_if_changed(&store, |_| Err(Error::InvalidConfig("wrong embedder".into())))
        .expect_err("refused");
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(snapshots.snapshot().version, first.version);
}

#[tokio::test]
async fn empty_corpus_is_rejected() {
    let docs = TempDir::new().expect("docs");
    let root = TempDir::new().expect("index");
    let cfg = config();
    let embedder = HashEmbedder::new(cfg.embedding.dim);
    assert_eq!(embedder.dim(), 128);
    let err = ingest_from(docs.path(), &IndexStore::new(root.path()), &cfg, &embedder, &CancellationToken::new(), false)
        .await
        .expect_err("empty");
    assert!(err.is_client_error());
}
