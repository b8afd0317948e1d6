//! Integration tests for transaction execution and change publication.

mod common;

use common::{
    chapter, library_schema, project, seed_projects, Project, TestFixture, CHAPTERS, PROJECTS,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tarn::{Changes, Config, Database, Error, Key, KeyRange, NoopTransport, TransactorResult};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;

const NO_EVENT: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_commit_publishes_one_event_after_commit() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();

    let key = db
        .mutate([PROJECTS])
        .handled_by(|tx| {
            let key = tx.store(PROJECTS)?.put(&project(42, "Dune", false))?;
            Ok(TransactorResult::new(key.clone()).with_changes(PROJECTS, key))
        })
        .execute()
        .await
        .expect("mutation failed");
    assert_eq!(key, Key::Int(42));

    let event = feed.recv().await.expect("no change event");
    assert_eq!(event.keys(PROJECTS), Some(&[Key::Int(42)][..]));
    assert!(matches!(feed.try_recv(), Err(TryRecvError::Empty)));

    // The event is only visible once the write is readable.
    let stored = db
        .query([PROJECTS])
        .handled_by(|tx| tx.store(PROJECTS)?.get::<Project>(42))
        .execute()
        .await
        .unwrap();
    assert_eq!(stored, Some(project(42, "Dune", false)));
}

#[tokio::test]
async fn test_event_observer_reads_committed_state() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();

    let reader = {
        let db = db.clone();
        tokio::spawn(async move {
            feed.recv().await.expect("no change event");
            db.query([PROJECTS])
                .handled_by(|tx| tx.store(PROJECTS)?.get::<Project>(7))
                .execute()
                .await
        })
    };

    seed_projects(&db, vec![project(7, "Solaris", true)]).await;

    let seen = reader.await.unwrap().unwrap();
    assert_eq!(seen, Some(project(7, "Solaris", true)));
}

#[tokio::test]
async fn test_failed_transactor_rolls_back_and_publishes_nothing() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();

    let result = db
        .mutate([PROJECTS])
        .handled_by(|tx| -> Result<TransactorResult<()>, Error> {
            tx.store(PROJECTS)?.put(&project(1, "Half written", false))?;
            Err(Error::aborted("business rule failed"))
        })
        .execute()
        .await;
    assert!(matches!(result, Err(Error::Aborted(ref msg)) if msg == "business rule failed"));

    assert!(timeout(NO_EVENT, feed.recv()).await.is_err());

    let count = db
        .query([PROJECTS])
        .handled_by(|tx| tx.store(PROJECTS)?.count(&KeyRange::all()))
        .execute()
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_update_of_missing_record_is_not_found() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;

    let rename = db.mutate([PROJECTS]).handled_by(|tx| {
        let store = tx.store(PROJECTS)?;
        let mut existing: Project = store.get(99)?.ok_or_else(|| Error::not_found(PROJECTS, 99))?;
        existing.title = "Renamed".into();
        let key = store.put(&existing)?;
        Ok(TransactorResult::new(()).with_changes(PROJECTS, key))
    });

    match rename.execute().await {
        Err(Error::NotFound { store, key }) => {
            assert_eq!(store, PROJECTS);
            assert_eq!(key, Key::Int(99));
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_read_only_transaction_rejects_writes() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();

    let err = db
        .query([PROJECTS])
        .handled_by(|tx| tx.store(PROJECTS)?.put(&project(5, "Sneaky", false)))
        .execute()
        .await
        .expect_err("write in a read-only transaction must fail");

    assert!(matches!(err, Error::TransactionAborted(_)));
    assert!(err.is_read_only_violation(), "unexpected error: {}", err);
    assert!(timeout(NO_EVENT, feed.recv()).await.is_err());
}

#[tokio::test]
async fn test_store_outside_scope_is_rejected() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;

    let err = db
        .query([PROJECTS])
        .handled_by(|tx| tx.store(CHAPTERS)?.count(&KeyRange::all()))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreNotInScope(ref store) if store == CHAPTERS));

    let err = db
        .query(["missing"])
        .handled_by(|_tx| Ok(()))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownStore(ref store) if store == "missing"));
}

#[tokio::test]
async fn test_unchanged_result_publishes_nothing() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();

    db.mutate([PROJECTS])
        .handled_by(|tx| {
            tx.store(PROJECTS)?.put(&project(3, "Imported quietly", false))?;
            Ok(TransactorResult::unchanged(()))
        })
        .execute()
        .await
        .unwrap();

    assert!(timeout(NO_EVENT, feed.recv()).await.is_err());
}

#[tokio::test]
async fn test_notifications_follow_commit_order() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();
    let committed = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for id in 0..10 {
        let db = db.clone();
        let committed = Arc::clone(&committed);
        handles.push(tokio::spawn(async move {
            db.mutate([PROJECTS])
                .handled_by(move |tx| {
                    let key = tx.store(PROJECTS)?.put(&project(id, "Concurrent", false))?;
                    // Writers are serialized, so this is commit order.
                    committed.lock().unwrap().push(key.clone());
                    Ok(TransactorResult::changes_only().with_changes(PROJECTS, key))
                })
                .execute()
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut notified = Vec::new();
    for _ in 0..10 {
        let event = feed.recv().await.unwrap();
        notified.extend_from_slice(event.keys(PROJECTS).unwrap());
    }
    assert_eq!(notified, *committed.lock().unwrap());
}

#[tokio::test]
async fn test_multi_store_changes_arrive_as_one_event() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();

    db.mutate([PROJECTS, CHAPTERS])
        .handled_by(|tx| {
            let pid = tx.store(PROJECTS)?.put(&project(1, "Book", false))?;
            let chapters = tx.store(CHAPTERS)?;
            let first = chapters.put(&chapter(10, 1, "One"))?;
            let second = chapters.put(&chapter(11, 1, "Two"))?;
            Ok(TransactorResult::changes_only()
                .with_changes(PROJECTS, pid)
                .with_changes(CHAPTERS, vec![first, second]))
        })
        .execute()
        .await
        .unwrap();

    let event = feed.recv().await.unwrap();
    assert_eq!(event.len(), 2);
    assert_eq!(event.keys(CHAPTERS), Some(&[Key::Int(10), Key::Int(11)][..]));
    assert!(matches!(feed.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_index_lookup_through_database() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    seed_projects(
        &db,
        vec![
            project(1, "Liked", true),
            project(2, "Ignored", false),
            project(3, "Also liked", true),
        ],
    )
    .await;

    let favorites = db
        .query([PROJECTS])
        .handled_by(|tx| {
            tx.store(PROJECTS)?
                .index("by-favorite")?
                .get_all::<Project>(&KeyRange::only(1))
        })
        .execute()
        .await
        .unwrap();

    let ids: Vec<i64> = favorites.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn test_notify_changes_reaches_feed() {
    let fixture = TestFixture::new();
    let db = fixture.open().await;
    let mut feed = db.changes();

    db.notify_changes(Changes::new());
    let mut builder = Changes::builder();
    builder.add(CHAPTERS, "external");
    db.notify_changes(builder.build());

    let event = feed.recv().await.unwrap();
    assert_eq!(event.keys(CHAPTERS), Some(&[Key::Text("external".into())][..]));
    assert!(matches!(feed.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let fixture = TestFixture::new();
    let registered = {
        let db = fixture.open().await;
        seed_projects(&db, vec![project(8, "Kept", false)]).await;
        let stores = db.list_stores().await.unwrap();
        db.close();
        stores
    };

    let db = fixture.open().await;
    let stores = db.list_stores().await.unwrap();
    let counts: Vec<_> = stores.iter().map(|s| (s.name.as_str(), s.records)).collect();
    assert_eq!(counts, vec![(CHAPTERS, 0), (PROJECTS, 1)]);

    // Reopening keeps the original registration time.
    let created: Vec<_> = stores.iter().map(|s| s.created_at).collect();
    let first: Vec<_> = registered.iter().map(|s| s.created_at).collect();
    assert_eq!(created, first);
}

#[tokio::test]
async fn test_zero_sized_feed_is_refused_at_open() {
    let fixture = TestFixture::new();
    let config = Config {
        notify_channel_size: 0,
        ..fixture.config.clone()
    };

    let result = Database::open(&config, library_schema(), Arc::new(NoopTransport)).await;
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
