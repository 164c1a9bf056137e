// src/ingest/freshrss.rs
//! Reads new entries straight from a FreshRSS SQLite database
//! (`entry` joined with `feed`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::normalize_text;
use super::types::{Item, ItemSource};

const RECENT_ENTRIES_SQL: &str = "
    SELECT e.id, e.title, e.link, e.content, f.name
    FROM entry e
    JOIN feed f ON f.id = e.id_feed
    WHERE e.date >= ?1
    ORDER BY e.date DESC, e.id DESC";

pub struct FreshRssSource {
    db_path: PathBuf,
}

impl FreshRssSource {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn query(db_path: &Path, cutoff_ts: i64, exclude: &BTreeSet<i64>) -> Result<Vec<Item>> {
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("opening FreshRSS db {}", db_path.display()))?;
        let mut stmt = conn
            .prepare(RECENT_ENTRIES_SQL)
            .context("preparing recent entries query")?;

        let rows = stmt
            .query_map(params![cutoff_ts], |row| {
                Ok(Item {
                    id: row.get(0)?,
                    title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    link: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    body: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    source_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })
            .context("querying recent entries")?;

        let mut out = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let mut item = row.context("reading entry row")?;
            if exclude.contains(&item.id) {
                skipped += 1;
                continue;
            }
            item.body = normalize_text(&item.body);
            item.title = normalize_text(&item.title);
            out.push(item);
        }
        tracing::debug!(
            target: "ingest",
            kept = out.len(),
            skipped,
            "freshrss entries loaded"
        );
        Ok(out)
    }
}

#[async_trait]
impl ItemSource for FreshRssSource {
    async fn fetch_recent(&self, since: Duration, exclude: &BTreeSet<i64>) -> Result<Vec<Item>> {
        let secs = i64::try_from(since.as_secs()).unwrap_or(i64::MAX);
        let cutoff_ts = chrono::Utc::now().timestamp().saturating_sub(secs);
        let db_path = self.db_path.clone();
        let exclude = exclude.clone();
        tokio::task::spawn_blocking(move || Self::query(&db_path, cutoff_ts, &exclude))
            .await
            .context("freshrss query task panicked")?
    }

    fn name(&self) -> &'static str {
        "freshrss"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(path: &Path, rows: &[(i64, i64, &str)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE feed (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE entry (id BIGINT PRIMARY KEY, title TEXT, link TEXT,
                                 content TEXT, date INT, id_feed INT);
             INSERT INTO feed (id, name) VALUES (1, 'Example Wire');",
        )
        .unwrap();
        for (id, date, title) in rows {
            conn.execute(
                "INSERT INTO entry (id, title, link, content, date, id_feed)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)",
                params![id, title, format!("https://example.com/{id}"), "<p>Body &amp; more</p>", date],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn returns_recent_entries_minus_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.sqlite");
        let now = chrono::Utc::now().timestamp();
        seed(
            &db,
            &[
                (now * 1_000_000 + 1, now - 60, "fresh"),
                (now * 1_000_000 + 2, now - 120, "already sent"),
                ((now - 90_000) * 1_000_000, now - 90_000, "too old"),
            ],
        );

        let src = FreshRssSource::new(&db);
        let exclude: BTreeSet<i64> = [now * 1_000_000 + 2].into_iter().collect();
        let items = src
            .fetch_recent(Duration::from_secs(24 * 3600), &exclude)
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "fresh");
        assert_eq!(items[0].source_name, "Example Wire");
        assert_eq!(items[0].body, "Body & more");
    }

    #[tokio::test]
    async fn missing_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = FreshRssSource::new(dir.path().join("absent.sqlite"));
        let res = src.fetch_recent(Duration::from_secs(60), &BTreeSet::new()).await;
        assert!(res.is_err());
    }
}
