//! Record store of processed articles
//!
//! A single redb file holding one row per published article, keyed by the
//! canonical form of its link, plus a time index used both for the bounded
//! similarity window and for retention purges.

mod link;
mod tables;
#[cfg(test)]
mod tests;
mod timestamp;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use redb_bincode::{ReadTransaction, ReadableTable as _, WriteTransaction};
use snafu::{Location, ResultExt as _, Snafu};
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

pub use self::link::canonical_link;
pub use self::tables::*;
pub use self::timestamp::Timestamp;

const LOG_TARGET: &str = "newsrelay::db";

/// Default size of the window returned by [`Database::recent_titles`]
pub const DEFAULT_RECENT_WINDOW: usize = 30;

/// Default age after which records are purged
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Snafu)]
pub enum DbError {
    #[snafu(display("Failed to open database: {source}"))]
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        source: redb::TransactionError,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Database version {db_ver} is newer than supported {code_ver}"))]
    DbVersionTooHigh {
        db_ver: u64,
        code_ver: u64,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Can't create data dir {}: {source}", path.display()))]
    DataDir { source: io::Error, path: PathBuf },
    #[snafu(display("Article already recorded: {link}"))]
    ConstraintViolation {
        link: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl DbError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DbError::ConstraintViolation { .. })
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the store at `path`
    #[instrument(skip_all)]
    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context(DataDirSnafu { path: parent })?;
        }

        let inner = tokio::task::spawn_blocking({
            let path = path.clone();
            move || redb_bincode::Database::create(path)
        })
        .await
        .context(JoinSnafu)?
        .context(DatabaseSnafu)?;

        Self::write_with_inner(&inner, |tx| {
            Self::init_tables_tx(tx)?;
            Self::handle_db_ver_migrations(tx)?;
            Ok(())
        })
        .await?;

        Ok(Self { inner, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_tables_tx(tx: &WriteTransaction) -> DbResult<()> {
        tx.open_table(&db_version::TABLE)?;
        tx.open_table(&db_seq::TABLE)?;
        tx.open_table(&articles::TABLE)?;
        tx.open_table(&articles_by_time::TABLE)?;
        Ok(())
    }

    fn handle_db_ver_migrations(tx: &WriteTransaction) -> DbResult<()> {
        const DB_VER: u64 = 1;

        let mut table_db_ver = tx.open_table(&db_version::TABLE)?;

        let Some(cur_db_ver) = table_db_ver.first()?.map(|g| g.1.value()) else {
            info!(target: LOG_TARGET, "Initializing new database");
            table_db_ver.insert(&(), &DB_VER)?;
            return Ok(());
        };

        if DB_VER < cur_db_ver {
            return DbVersionTooHighSnafu {
                db_ver: cur_db_ver,
                code_ver: DB_VER,
            }
            .fail();
        }

        debug!(target: LOG_TARGET, db_ver = cur_db_ver, "Db version");
        Ok(())
    }

    async fn write_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = inner.begin_write().context(TransactionSnafu)?;
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::write_with_inner(&self.inner, f).await
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;

            f(&dbtx)
        })
    }

    /// Whether an article with the same canonical link was already recorded
    pub async fn exists(&self, link: &str) -> DbResult<bool> {
        let key = canonical_link(link);
        self.read_with(|tx| {
            let articles_tbl = tx.open_table(&articles::TABLE)?;
            Ok(articles_tbl.get(&key)?.is_some())
        })
        .await
    }

    pub async fn get(&self, link: &str) -> DbResult<Option<ArticleRecord>> {
        let key = canonical_link(link);
        self.read_with(|tx| {
            let articles_tbl = tx.open_table(&articles::TABLE)?;
            Ok(articles_tbl.get(&key)?.map(|g| g.value()))
        })
        .await
    }

    pub async fn count(&self) -> DbResult<usize> {
        self.read_with(|tx| {
            let articles_tbl = tx.open_table(&articles::TABLE)?;
            let mut count = 0;
            for entry in articles_tbl.range::<String>(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    /// Titles of the `limit` most recently recorded articles, newest first
    pub async fn recent_titles(&self, limit: usize) -> DbResult<Vec<RecentTitle>> {
        self.read_with(|tx| {
            let articles_tbl = tx.open_table(&articles::TABLE)?;
            let by_time_tbl = tx.open_table(&articles_by_time::TABLE)?;

            let mut ret = vec![];
            for entry in by_time_tbl.range::<(Timestamp, u64)>(..)?.rev() {
                if limit <= ret.len() {
                    break;
                }
                let (_, link) = entry?;
                let link = link.value();

                let Some(record) = articles_tbl.get(&link)? else {
                    warn!(target: LOG_TARGET, %link, "Time index points at a missing record");
                    continue;
                };
                let record = record.value();
                ret.push(RecentTitle {
                    title: record.title,
                    processed_at: record.processed_at,
                });
            }
            Ok(ret)
        })
        .await
    }

    /// Insert a new record
    ///
    /// Fails with [`DbError::ConstraintViolation`] if a record with the same
    /// canonical link exists.
    pub async fn insert(&self, record: &ArticleRecord) -> DbResult<()> {
        let key = canonical_link(&record.link);
        self.write_with(|tx| {
            let mut articles_tbl = tx.open_table(&articles::TABLE)?;
            let mut by_time_tbl = tx.open_table(&articles_by_time::TABLE)?;
            let mut seq_tbl = tx.open_table(&db_seq::TABLE)?;

            if articles_tbl.get(&key)?.is_some() {
                return ConstraintViolationSnafu { link: key.clone() }.fail();
            }

            let seq = seq_tbl.get(&())?.map(|g| g.value()).unwrap_or_default();
            seq_tbl.insert(&(), &(seq + 1))?;

            articles_tbl.insert(&key, record)?;
            by_time_tbl.insert(&(record.processed_at, seq), &key)?;

            info!(
                target: LOG_TARGET,
                link = %record.link,
                processed_at = %record.processed_at,
                "Recorded article"
            );
            Ok(())
        })
        .await
    }

    /// Delete records older than `retention`, returning how many were deleted
    pub async fn purge_older_than(&self, retention: Duration) -> DbResult<usize> {
        self.purge_older_than_at(Timestamp::now(), retention).await
    }

    /// Like [`Self::purge_older_than`], relative to an explicit `now`
    ///
    /// Deletes exactly the records with `processed_at < now - retention`.
    pub async fn purge_older_than_at(
        &self,
        now: Timestamp,
        retention: Duration,
    ) -> DbResult<usize> {
        let cutoff = now.saturating_sub(retention);
        let upper_bound = (cutoff, 0u64);
        self.write_with(|tx| {
            let mut articles_tbl = tx.open_table(&articles::TABLE)?;
            let mut by_time_tbl = tx.open_table(&articles_by_time::TABLE)?;

            let mut expired = vec![];
            for entry in by_time_tbl.range(..&upper_bound)? {
                let (k, v) = entry?;
                expired.push((k.value(), v.value()));
            }

            for (time_key, link) in &expired {
                by_time_tbl.remove(time_key)?;
                articles_tbl.remove(link)?;
            }

            if !expired.is_empty() {
                info!(target: LOG_TARGET, count = expired.len(), %cutoff, "Purged old articles");
            }
            Ok(expired.len())
        })
        .await
    }

    /// Keep only the `max_records` most recent records, returning how many
    /// were deleted
    pub async fn retain_most_recent(&self, max_records: usize) -> DbResult<usize> {
        self.write_with(|tx| {
            let mut articles_tbl = tx.open_table(&articles::TABLE)?;
            let mut by_time_tbl = tx.open_table(&articles_by_time::TABLE)?;

            let mut excess = vec![];
            for entry in by_time_tbl
                .range::<(Timestamp, u64)>(..)?
                .rev()
                .skip(max_records)
            {
                let (k, v) = entry?;
                excess.push((k.value(), v.value()));
            }

            for (time_key, link) in &excess {
                by_time_tbl.remove(time_key)?;
                articles_tbl.remove(link)?;
            }

            if !excess.is_empty() {
                info!(target: LOG_TARGET, count = excess.len(), max_records, "Trimmed articles beyond cap");
            }
            Ok(excess.len())
        })
        .await
    }
}
