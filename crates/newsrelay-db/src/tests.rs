use std::time::Duration;

use tempfile::{TempDir, tempdir};

use crate::{ArticleRecord, Database, DbError, Timestamp};

const NOW: u64 = 1_700_000_000;
const DAY: u64 = 24 * 60 * 60;

async fn temp_db() -> (TempDir, Database) {
    let dir = tempdir().expect("tempdir");
    let db = Database::open(dir.path().join("articles.redb"))
        .await
        .expect("open db");
    (dir, db)
}

fn record(link: &str, title: &str, processed_at: u64) -> ArticleRecord {
    ArticleRecord {
        link: link.to_owned(),
        title: title.to_owned(),
        keywords: vec![],
        published_reference: format!("https://t.me/ch/{processed_at}"),
        processed_at: Timestamp::from(processed_at),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn insert_then_exists() {
    let (_dir, db) = temp_db().await;

    assert!(!db.exists("https://x/1").await.unwrap());
    db.insert(&record("https://x/1", "Foo launches v2", NOW))
        .await
        .unwrap();

    assert!(db.exists("https://x/1").await.unwrap());
    // Canonical form ignores scheme, `www.` and tracking params
    assert!(db.exists("http://www.x/1?utm_source=rss").await.unwrap());
    assert!(!db.exists("https://x/2").await.unwrap());
    assert_eq!(db.count().await.unwrap(), 1);

    let stored = db.get("https://x/1").await.unwrap().expect("stored");
    assert_eq!(stored, record("https://x/1", "Foo launches v2", NOW));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn duplicate_insert_is_constraint_violation() {
    let (_dir, db) = temp_db().await;

    db.insert(&record("https://x/1", "First", NOW)).await.unwrap();
    let err = db
        .insert(&record("https://www.x/1/", "Second", NOW + 10))
        .await
        .expect_err("same canonical link");
    assert!(err.is_constraint_violation());
    assert!(matches!(err, DbError::ConstraintViolation { .. }));

    // The failed insert left nothing behind
    assert_eq!(db.count().await.unwrap(), 1);
    assert_eq!(db.recent_titles(30).await.unwrap().len(), 1);
    assert_eq!(db.get("https://x/1").await.unwrap().unwrap().title, "First");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn recent_titles_newest_first_and_bounded() {
    let (_dir, db) = temp_db().await;

    for i in 0..5u64 {
        db.insert(&record(&format!("https://x/{i}"), &format!("Title {i}"), NOW + i))
            .await
            .unwrap();
    }

    let titles: Vec<_> = db
        .recent_titles(3)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, ["Title 4", "Title 3", "Title 2"]);

    assert_eq!(db.recent_titles(30).await.unwrap().len(), 5);
    assert!(db.recent_titles(0).await.unwrap().is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn recent_titles_keep_insertion_order_within_same_second() {
    let (_dir, db) = temp_db().await;

    // Links sort opposite to insertion order
    db.insert(&record("https://x/b", "inserted first", NOW))
        .await
        .unwrap();
    db.insert(&record("https://x/a", "inserted second", NOW))
        .await
        .unwrap();

    let titles: Vec<_> = db
        .recent_titles(2)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, ["inserted second", "inserted first"]);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn purge_removes_exactly_expired_records() {
    let (_dir, db) = temp_db().await;
    let retention = Duration::from_secs(7 * DAY);
    let cutoff = NOW - 7 * DAY;

    db.insert(&record("https://x/old", "Old", cutoff - 1))
        .await
        .unwrap();
    db.insert(&record("https://x/edge", "Edge", cutoff))
        .await
        .unwrap();
    db.insert(&record("https://x/new", "New", NOW)).await.unwrap();

    let purged = db
        .purge_older_than_at(Timestamp::from(NOW), retention)
        .await
        .unwrap();
    assert_eq!(purged, 1);

    assert!(!db.exists("https://x/old").await.unwrap());
    assert!(db.exists("https://x/edge").await.unwrap());
    assert!(db.exists("https://x/new").await.unwrap());

    // Idempotent
    let purged = db
        .purge_older_than_at(Timestamp::from(NOW), retention)
        .await
        .unwrap();
    assert_eq!(purged, 0);
    assert_eq!(db.count().await.unwrap(), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn purged_link_can_be_recorded_again() {
    let (_dir, db) = temp_db().await;

    db.insert(&record("https://x/1", "Foo", NOW - 30 * DAY))
        .await
        .unwrap();
    db.purge_older_than_at(Timestamp::from(NOW), Duration::from_secs(7 * DAY))
        .await
        .unwrap();

    assert!(!db.exists("https://x/1").await.unwrap());
    assert!(db.recent_titles(30).await.unwrap().is_empty());
    db.insert(&record("https://x/1", "Foo again", NOW)).await.unwrap();
    assert!(db.exists("https://x/1").await.unwrap());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn retain_most_recent_keeps_newest() {
    let (_dir, db) = temp_db().await;

    for i in 0..6u64 {
        db.insert(&record(&format!("https://x/{i}"), &format!("Title {i}"), NOW + i))
            .await
            .unwrap();
    }

    assert_eq!(db.retain_most_recent(4).await.unwrap(), 2);
    assert_eq!(db.count().await.unwrap(), 4);
    assert!(!db.exists("https://x/0").await.unwrap());
    assert!(!db.exists("https://x/1").await.unwrap());
    assert!(db.exists("https://x/2").await.unwrap());
    assert!(db.exists("https://x/5").await.unwrap());

    assert_eq!(db.retain_most_recent(4).await.unwrap(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn reopen_preserves_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("articles.redb");

    {
        let db = Database::open(&path).await.unwrap();
        db.insert(&record("https://x/1", "Persisted", NOW)).await.unwrap();
    }

    let db = Database::open(&path).await.unwrap();
    assert!(db.exists("https://x/1").await.unwrap());
    assert_eq!(db.recent_titles(1).await.unwrap()[0].title, "Persisted");

    // Sequence numbers continue after reopening
    db.insert(&record("https://x/2", "After reopen", NOW)).await.unwrap();
    assert_eq!(db.recent_titles(1).await.unwrap()[0].title, "After reopen");
}
