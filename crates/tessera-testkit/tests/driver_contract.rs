//! The storage driver contract, run against every driver.
//!
//! Each test builds a fresh Memory, SQLite and Log store and checks the same
//! behavior on all three.

use proptest::prelude::*;
use tempfile::TempDir;

use tessera_core::{
    Document, HistoryMode, OrderBy, Query, StartAfter, NO_LOCAL_INDEX,
};
use tessera_store::{
    LogStore, MemoryStore, OpenMode, SqliteStore, StorageDriver, StoreError,
    CONFIG_SCHEMA_VERSION, CONFIG_WORKSPACE,
};
use tessera_testkit::generators::{self, doc_from_params, DocParams};
use tessera_testkit::{multi_party_fixtures, test_workspace, TestFixture, T0};

struct Harness {
    name: &'static str,
    store: Box<dyn StorageDriver>,
    _dir: Option<TempDir>,
}

fn drivers() -> Vec<Harness> {
    let sqlite_dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteStore::open(
        sqlite_dir.path().join("replica.db"),
        test_workspace(),
        OpenMode::Create,
    )
    .unwrap();

    let log_dir = tempfile::tempdir().unwrap();
    let log = LogStore::open(
        log_dir.path().join("replica.log"),
        test_workspace(),
        OpenMode::Create,
    )
    .unwrap();

    vec![
        Harness {
            name: "memory",
            store: Box::new(MemoryStore::new(test_workspace())),
            _dir: None,
        },
        Harness {
            name: "sqlite",
            store: Box::new(sqlite),
            _dir: Some(sqlite_dir),
        },
        Harness {
            name: "log",
            store: Box::new(log),
            _dir: Some(log_dir),
        },
    ]
}

fn paths(docs: &[Document]) -> Vec<&str> {
    docs.iter().map(|d| d.path.as_str()).collect()
}

#[tokio::test]
async fn test_fresh_driver_state() {
    for h in drivers() {
        assert_eq!(h.store.workspace(), &test_workspace(), "{}", h.name);
        assert_eq!(h.store.max_local_index().unwrap(), NO_LOCAL_INDEX, "{}", h.name);
        assert!(h.store.query_docs(&Query::all()).await.unwrap().is_empty());

        let keys = h.store.list_config_keys().await.unwrap();
        assert!(keys.contains(&CONFIG_SCHEMA_VERSION.to_string()), "{}", h.name);
        assert!(keys.contains(&CONFIG_WORKSPACE.to_string()), "{}", h.name);
    }
}

#[tokio::test]
async fn test_upsert_replaces_same_author_and_keeps_others() {
    let parties = multi_party_fixtures(2);
    for h in drivers() {
        let s = &h.store;
        s.upsert(parties[0].make_doc("/a", "one", T0 - 30)).await.unwrap();
        s.upsert(parties[1].make_doc("/a", "two", T0 - 20)).await.unwrap();
        let replaced = s
            .upsert(parties[0].make_doc("/a", "three", T0 - 10))
            .await
            .unwrap();

        let all = s.query_docs(&Query::all().path("/a")).await.unwrap();
        assert_eq!(all.len(), 2, "{}", h.name);
        assert_eq!(all[0], replaced, "{}", h.name);
        assert_eq!(all[1].content, "two", "{}", h.name);

        let latest = s.query_docs(&Query::latest()).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].content, "three", "{}", h.name);
    }
}

#[tokio::test]
async fn test_every_write_gets_a_fresh_index() {
    let author = TestFixture::with_seed([7; 32]);
    for h in drivers() {
        let s = &h.store;
        let mut last = s.max_local_index().unwrap();
        for (i, path) in ["/a", "/b", "/a", "/a"].iter().enumerate() {
            let doc = s
                .upsert(author.make_doc(path, "x", T0 - 100 + i as i64))
                .await
                .unwrap();
            let index = doc.local_index.unwrap();
            assert!(index > last, "{}", h.name);
            assert_eq!(s.max_local_index().unwrap(), index, "{}", h.name);
            last = index;
        }

        let after = s
            .query_docs(
                &Query::all()
                    .order_by(OrderBy::LocalIndexAsc)
                    .start_after(StartAfter::LocalIndex(1)),
            )
            .await
            .unwrap();
        assert_eq!(paths(&after), vec!["/a"], "{}", h.name);
        assert_eq!(after[0].local_index, Some(3), "{}", h.name);
    }
}

#[tokio::test]
async fn test_latest_picks_lowest_signature_on_tie() {
    let parties = multi_party_fixtures(3);
    for h in drivers() {
        let s = &h.store;
        let mut docs = Vec::new();
        for p in &parties {
            docs.push(s.upsert(p.make_doc("/tie", "x", T0)).await.unwrap());
        }
        let expected = docs.iter().min_by_key(|d| d.signature).unwrap();

        let latest = s.query_docs(&Query::latest().path("/tie")).await.unwrap();
        assert_eq!(latest, vec![expected.clone()], "{}", h.name);
    }
}

#[tokio::test]
async fn test_latest_reduces_before_filtering() {
    let parties = multi_party_fixtures(2);
    for h in drivers() {
        let s = &h.store;
        s.upsert(parties[0].make_doc("/a", "old", T0 - 20)).await.unwrap();
        s.upsert(parties[1].make_doc("/a", "new", T0 - 10)).await.unwrap();
        s.upsert(parties[0].make_doc("/b", "only", T0 - 10)).await.unwrap();

        let won = s
            .query_docs(&Query::latest().author(parties[0].public_key()))
            .await
            .unwrap();
        assert_eq!(paths(&won), vec!["/b"], "{}", h.name);
    }
}

#[tokio::test]
async fn test_filters_ordering_and_paging() {
    let author = TestFixture::with_seed([9; 32]);
    for h in drivers() {
        let s = &h.store;
        for (path, content) in [
            ("/notes/a.txt", "a"),
            ("/notes/b.md", "bb"),
            ("/notes/c.txt", "ccc"),
            ("/photos/d.txt", "dddd"),
        ] {
            s.upsert(author.make_doc(path, content, T0 - 50)).await.unwrap();
        }

        let mut notes_txt = Query::all().path_starts_with("/notes/");
        notes_txt.filter.path_ends_with = Some(".txt".into());
        let txt = s.query_docs(&notes_txt).await.unwrap();
        assert_eq!(paths(&txt), vec!["/notes/a.txt", "/notes/c.txt"], "{}", h.name);

        let mut longish = Query::all().order_by(OrderBy::PathDesc);
        longish.filter.content_length_gt = Some(1);
        longish.filter.content_length_lt = Some(4);
        let docs = s.query_docs(&longish).await.unwrap();
        assert_eq!(paths(&docs), vec!["/notes/c.txt", "/notes/b.md"], "{}", h.name);

        let page = s
            .query_docs(
                &Query::all()
                    .start_after(StartAfter::Path("/notes/a.txt".into()))
                    .limit(2),
            )
            .await
            .unwrap();
        assert_eq!(paths(&page), vec!["/notes/b.md", "/notes/c.txt"], "{}", h.name);

        assert!(s.query_docs(&Query::all().limit(0)).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_cursor_must_match_ordering() {
    for h in drivers() {
        let bad = Query::all()
            .order_by(OrderBy::PathAsc)
            .start_after(StartAfter::LocalIndex(3));
        assert!(
            matches!(
                h.store.query_docs(&bad).await,
                Err(StoreError::InvalidQuery(_))
            ),
            "{}",
            h.name
        );
    }
}

#[tokio::test]
async fn test_expiry_sweep() {
    let author = TestFixture::with_seed([3; 32]);
    let other = TestFixture::with_seed([4; 32]);
    for h in drivers() {
        let s = &h.store;
        s.upsert(author.make_ephemeral("/tmp/!a", "x", T0 - 10, T0)).await.unwrap();
        s.upsert(other.make_ephemeral("/tmp/!a", "y", T0 - 20, T0 + 5)).await.unwrap();
        s.upsert(author.make_ephemeral("/tmp/!b", "x", T0 - 10, T0 + 1)).await.unwrap();
        s.upsert(author.make_doc("/keep", "x", T0 - 10)).await.unwrap();
        let max = s.max_local_index().unwrap();

        assert_eq!(s.remove_expired_documents(T0).await.unwrap(), 1, "{}", h.name);
        assert_eq!(s.remove_expired_documents(T0).await.unwrap(), 0, "{}", h.name);
        let left = s.query_docs(&Query::all()).await.unwrap();
        assert_eq!(paths(&left), vec!["/keep", "/tmp/!a", "/tmp/!b"], "{}", h.name);
        assert!(left.iter().all(|d| d.content != "x" || d.path != "/tmp/!a"));

        let latest = s.query_docs(&Query::latest()).await.unwrap();
        assert_eq!(paths(&latest), vec!["/keep", "/tmp/!a", "/tmp/!b"], "{}", h.name);
        let at_a = s.query_docs(&Query::latest().path("/tmp/!a")).await.unwrap();
        assert_eq!(at_a.len(), 1, "{}", h.name);
        assert_eq!(at_a[0].author, other.public_key(), "{}", h.name);

        assert_eq!(s.remove_expired_documents(T0 + 5).await.unwrap(), 2, "{}", h.name);
        assert!(
            s.query_docs(&Query::latest().path("/tmp/!a")).await.unwrap().is_empty(),
            "{}",
            h.name
        );
        let latest = s.query_docs(&Query::latest()).await.unwrap();
        assert_eq!(paths(&latest), vec!["/keep"], "{}", h.name);

        // Sweeping never rewinds the index.
        assert_eq!(s.max_local_index().unwrap(), max, "{}", h.name);
    }
}

#[tokio::test]
async fn test_config_round_trip() {
    for h in drivers() {
        let s = &h.store;
        assert_eq!(s.get_config("peer").await.unwrap(), None);
        s.set_config("peer", "alpha").await.unwrap();
        s.set_config("peer", "beta").await.unwrap();
        assert_eq!(s.get_config("peer").await.unwrap().as_deref(), Some("beta"));

        assert!(s.delete_config("peer").await.unwrap(), "{}", h.name);
        assert!(!s.delete_config("peer").await.unwrap(), "{}", h.name);
        assert_eq!(s.get_config("peer").await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_close_then_everything_fails() {
    let author = TestFixture::with_seed([1; 32]);
    for h in drivers() {
        let s = &h.store;
        s.close(false).await.unwrap();
        assert!(s.is_closed(), "{}", h.name);

        assert!(matches!(s.max_local_index(), Err(StoreError::Closed)));
        assert!(matches!(
            s.upsert(author.make_doc("/a", "x", T0)).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            s.query_docs(&Query::all()).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(s.get_config("k").await, Err(StoreError::Closed)));
        assert!(matches!(
            s.remove_expired_documents(T0).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(s.close(false).await, Err(StoreError::Closed)), "{}", h.name);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_drivers_agree_on_every_query(
        batch in prop::collection::vec(any::<DocParams>(), 0..24),
        queries in prop::collection::vec(generators::query(), 1..6),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harnesses = drivers();
            for params in &batch {
                let doc = doc_from_params(params);
                for h in &harnesses {
                    h.store.upsert(doc.clone()).await.unwrap();
                }
            }

            for query in &queries {
                let reference = harnesses[0].store.query_docs(query).await.unwrap();
                for h in &harnesses[1..] {
                    let got = h.store.query_docs(query).await.unwrap();
                    prop_assert_eq!(&got, &reference, "{} disagrees on {:?}", h.name, query);
                }
                if query.history_mode == HistoryMode::Latest {
                    let mut seen = std::collections::BTreeSet::new();
                    prop_assert!(reference.iter().all(|d| seen.insert(d.path.clone())));
                }
            }
            Ok(())
        })?;
    }
}
