//! Podcast and episode repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Episode, PlayCount, Podcast};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait PodcastRepository: Send + Sync {
    async fn create(&self, podcast: &Podcast) -> Result<Podcast>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Podcast>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Podcast>>;

    async fn list(&self) -> Result<Vec<Podcast>>;

    async fn update(&self, podcast: &Podcast) -> Result<()>;

    /// Delete a podcast and its episodes
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    async fn create_episode(&self, episode: &Episode) -> Result<Episode>;

    async fn get_episode(&self, id: i64) -> Result<Option<Episode>>;

    /// Episodes of a podcast, newest first
    async fn list_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>>;

    async fn next_episode_number(&self, podcast_id: i64) -> Result<i32>;

    async fn update_episode(&self, episode: &Episode) -> Result<()>;

    /// Delete an episode and take its plays off the podcast total
    async fn delete_episode(&self, id: i64) -> Result<bool>;

    /// Count one play of an episode on both counters atomically
    async fn record_play(&self, episode_id: i64) -> Result<Option<PlayCount>>;

    async fn total_plays(&self) -> Result<i64>;
}

pub struct SqlxPodcastRepository {
    pool: DynDatabasePool,
}

impl SqlxPodcastRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PodcastRepository> {
        Arc::new(Self::new(pool))
    }
}

const PODCAST_COLUMNS: &str =
    "id, slug, title, description, cover_image, total_plays, created_at, updated_at";

const EPISODE_COLUMNS: &str = "id, podcast_id, title, description, audio_path, duration_seconds, \
    episode_number, published_at, play_count, created_at, updated_at";

const INSERT_PODCAST_SQL: &str = r#"
    INSERT INTO podcasts (slug, title, description, cover_image, total_plays, created_at, updated_at)
    VALUES (?, ?, ?, ?, 0, ?, ?)
"#;

const INSERT_EPISODE_SQL: &str = r#"
    INSERT INTO episodes
        (podcast_id, title, description, audio_path, duration_seconds, episode_number,
         published_at, play_count, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
"#;

const UPDATE_EPISODE_SQL: &str = r#"
    UPDATE episodes
    SET title = ?, description = ?, audio_path = ?, duration_seconds = ?, episode_number = ?,
        published_at = ?, updated_at = ?
    WHERE id = ?
"#;

const EPISODE_ORDER: &str = "ORDER BY COALESCE(published_at, created_at) DESC, episode_number DESC";

#[async_trait]
impl PodcastRepository for SqlxPodcastRepository {
    async fn create(&self, podcast: &Podcast) -> Result<Podcast> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_PODCAST_SQL)
                .bind(&podcast.slug)
                .bind(&podcast.title)
                .bind(&podcast.description)
                .bind(&podcast.cover_image)
                .bind(podcast.created_at)
                .bind(podcast.updated_at)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.last_insert_rowid()),
            DatabaseDriver::Mysql => sqlx::query(INSERT_PODCAST_SQL)
                .bind(&podcast.slug)
                .bind(&podcast.title)
                .bind(&podcast.description)
                .bind(&podcast.cover_image)
                .bind(podcast.created_at)
                .bind(podcast.updated_at)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .context("Failed to create podcast")?;
        Ok(Podcast {
            id,
            total_plays: 0,
            ..podcast.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Podcast>> {
        let sql = format!("SELECT {} FROM podcasts WHERE id = ?", PODCAST_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get podcast by ID")?
                .as_ref()
                .map(row_to_podcast_sqlite)),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get podcast by ID")?
                .as_ref()
                .map(row_to_podcast_mysql)),
        }
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Podcast>> {
        let sql = format!("SELECT {} FROM podcasts WHERE slug = ?", PODCAST_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get podcast by slug")?
                .as_ref()
                .map(row_to_podcast_sqlite)),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get podcast by slug")?
                .as_ref()
                .map(row_to_podcast_mysql)),
        }
    }

    async fn list(&self) -> Result<Vec<Podcast>> {
        let sql = format!("SELECT {} FROM podcasts ORDER BY title", PODCAST_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list podcasts")?
                .iter()
                .map(row_to_podcast_sqlite)
                .collect()),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list podcasts")?
                .iter()
                .map(row_to_podcast_mysql)
                .collect()),
        }
    }

    async fn update(&self, podcast: &Podcast) -> Result<()> {
        let sql = r#"
            UPDATE podcasts SET slug = ?, title = ?, description = ?, cover_image = ?, updated_at = ?
            WHERE id = ?
        "#;
        let now = chrono::Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&podcast.slug)
                .bind(&podcast.title)
                .bind(&podcast.description)
                .bind(&podcast.cover_image)
                .bind(now)
                .bind(podcast.id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&podcast.slug)
                .bind(&podcast.title)
                .bind(&podcast.description)
                .bind(&podcast.cover_image)
                .bind(now)
                .bind(podcast.id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update podcast")?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM podcasts WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete podcast")?;
        Ok(affected > 0)
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM podcasts WHERE slug = ? AND id <> ?";
        let exclude = exclude_id.unwrap_or(0);
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(slug)
                .bind(exclude)
                .fetch_one(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(slug)
                .bind(exclude)
                .fetch_one(self.pool.mysql()?)
                .await,
        }
        .context("Failed to check podcast slug")?;
        Ok(count > 0)
    }

    async fn create_episode(&self, episode: &Episode) -> Result<Episode> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(INSERT_EPISODE_SQL)
                .bind(episode.podcast_id)
                .bind(&episode.title)
                .bind(&episode.description)
                .bind(&episode.audio_path)
                .bind(episode.duration_seconds)
                .bind(episode.episode_number)
                .bind(episode.published_at)
                .bind(episode.created_at)
                .bind(episode.updated_at)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.last_insert_rowid()),
            DatabaseDriver::Mysql => sqlx::query(INSERT_EPISODE_SQL)
                .bind(episode.podcast_id)
                .bind(&episode.title)
                .bind(&episode.description)
                .bind(&episode.audio_path)
                .bind(episode.duration_seconds)
                .bind(episode.episode_number)
                .bind(episode.published_at)
                .bind(episode.created_at)
                .bind(episode.updated_at)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .context("Failed to create episode")?;
        Ok(Episode {
            id,
            play_count: 0,
            ..episode.clone()
        })
    }

    async fn get_episode(&self, id: i64) -> Result<Option<Episode>> {
        let sql = format!("SELECT {} FROM episodes WHERE id = ?", EPISODE_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get episode")?
                .as_ref()
                .map(row_to_episode_sqlite)),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get episode")?
                .as_ref()
                .map(row_to_episode_mysql)),
        }
    }

    async fn list_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let sql = format!(
            "SELECT {} FROM episodes WHERE podcast_id = ? {}",
            EPISODE_COLUMNS, EPISODE_ORDER
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(podcast_id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list episodes")?
                .iter()
                .map(row_to_episode_sqlite)
                .collect()),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(podcast_id)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list episodes")?
                .iter()
                .map(row_to_episode_mysql)
                .collect()),
        }
    }

    async fn next_episode_number(&self, podcast_id: i64) -> Result<i32> {
        let sql = "SELECT episode_number FROM episodes WHERE podcast_id = ? \
                   ORDER BY episode_number DESC LIMIT 1";
        let last: Option<i32> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(podcast_id)
                .fetch_optional(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(podcast_id)
                .fetch_optional(self.pool.mysql()?)
                .await,
        }
        .context("Failed to read last episode number")?;
        Ok(last.unwrap_or(0) + 1)
    }

    async fn update_episode(&self, episode: &Episode) -> Result<()> {
        let now = chrono::Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(UPDATE_EPISODE_SQL)
                .bind(&episode.title)
                .bind(&episode.description)
                .bind(&episode.audio_path)
                .bind(episode.duration_seconds)
                .bind(episode.episode_number)
                .bind(episode.published_at)
                .bind(now)
                .bind(episode.id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(UPDATE_EPISODE_SQL)
                .bind(&episode.title)
                .bind(&episode.description)
                .bind(&episode.audio_path)
                .bind(episode.duration_seconds)
                .bind(episode.episode_number)
                .bind(episode.published_at)
                .bind(now)
                .bind(episode.id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update episode")?;
        Ok(())
    }

    async fn delete_episode(&self, id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_episode_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_episode_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn record_play(&self, episode_id: i64) -> Result<Option<PlayCount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => record_play_sqlite(self.pool.sqlite()?, episode_id).await,
            DatabaseDriver::Mysql => record_play_mysql(self.pool.mysql()?, episode_id).await,
        }
    }

    async fn total_plays(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query_scalar::<_, i64>("SELECT COALESCE(SUM(total_plays), 0) FROM podcasts")
                    .fetch_one(self.pool.sqlite()?)
                    .await
            }
            DatabaseDriver::Mysql => sqlx::query_scalar::<_, i64>(
                "SELECT CAST(COALESCE(SUM(total_plays), 0) AS SIGNED) FROM podcasts",
            )
            .fetch_one(self.pool.mysql()?)
            .await,
        }
        .context("Failed to sum podcast plays")
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn delete_episode_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let row = sqlx::query("SELECT podcast_id, play_count FROM episodes WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load episode")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let podcast_id: i64 = row.get("podcast_id");
    let play_count: i64 = row.get("play_count");

    sqlx::query("DELETE FROM episodes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete episode")?;
    sqlx::query(
        "UPDATE podcasts SET total_plays = MAX(total_plays - ?, 0) WHERE id = ?",
    )
    .bind(play_count)
    .bind(podcast_id)
    .execute(&mut *tx)
    .await
    .context("Failed to update podcast plays")?;

    tx.commit().await.context("Failed to commit episode deletion")?;
    Ok(true)
}

async fn record_play_sqlite(pool: &SqlitePool, episode_id: i64) -> Result<Option<PlayCount>> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let podcast_id: Option<i64> =
        sqlx::query_scalar("SELECT podcast_id FROM episodes WHERE id = ?")
            .bind(episode_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to load episode")?;
    let Some(podcast_id) = podcast_id else {
        return Ok(None);
    };

    sqlx::query("UPDATE episodes SET play_count = play_count + 1 WHERE id = ?")
        .bind(episode_id)
        .execute(&mut *tx)
        .await
        .context("Failed to count episode play")?;
    sqlx::query("UPDATE podcasts SET total_plays = total_plays + 1 WHERE id = ?")
        .bind(podcast_id)
        .execute(&mut *tx)
        .await
        .context("Failed to count podcast play")?;

    let play_count: i64 = sqlx::query_scalar("SELECT play_count FROM episodes WHERE id = ?")
        .bind(episode_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read episode plays")?;
    let total_plays: i64 = sqlx::query_scalar("SELECT total_plays FROM podcasts WHERE id = ?")
        .bind(podcast_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read podcast plays")?;

    tx.commit().await.context("Failed to commit play")?;
    Ok(Some(PlayCount {
        episode_id,
        play_count,
        total_plays,
    }))
}

fn row_to_podcast_sqlite(row: &sqlx::sqlite::SqliteRow) -> Podcast {
    Podcast {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        description: row.get("description"),
        cover_image: row.get("cover_image"),
        total_plays: row.get("total_plays"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_episode_sqlite(row: &sqlx::sqlite::SqliteRow) -> Episode {
    Episode {
        id: row.get("id"),
        podcast_id: row.get("podcast_id"),
        title: row.get("title"),
        description: row.get("description"),
        audio_path: row.get("audio_path"),
        duration_seconds: row.get("duration_seconds"),
        episode_number: row.get("episode_number"),
        published_at: row.get("published_at"),
        play_count: row.get("play_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn delete_episode_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let row = sqlx::query("SELECT podcast_id, play_count FROM episodes WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load episode")?;
    let Some(row) = row else {
        return Ok(false);
    };
    let podcast_id: i64 = row.get("podcast_id");
    let play_count: i64 = row.get("play_count");

    sqlx::query("DELETE FROM episodes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete episode")?;
    sqlx::query(
        "UPDATE podcasts SET total_plays = GREATEST(total_plays - ?, 0) WHERE id = ?",
    )
    .bind(play_count)
    .bind(podcast_id)
    .execute(&mut *tx)
    .await
    .context("Failed to update podcast plays")?;

    tx.commit().await.context("Failed to commit episode deletion")?;
    Ok(true)
}

async fn record_play_mysql(pool: &MySqlPool, episode_id: i64) -> Result<Option<PlayCount>> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let podcast_id: Option<i64> =
        sqlx::query_scalar("SELECT podcast_id FROM episodes WHERE id = ? FOR UPDATE")
            .bind(episode_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to load episode")?;
    let Some(podcast_id) = podcast_id else {
        return Ok(None);
    };

    sqlx::query("UPDATE episodes SET play_count = play_count + 1 WHERE id = ?")
        .bind(episode_id)
        .execute(&mut *tx)
        .await
        .context("Failed to count episode play")?;
    sqlx::query("UPDATE podcasts SET total_plays = total_plays + 1 WHERE id = ?")
        .bind(podcast_id)
        .execute(&mut *tx)
        .await
        .context("Failed to count podcast play")?;

    let play_count: i64 = sqlx::query_scalar("SELECT play_count FROM episodes WHERE id = ?")
        .bind(episode_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read episode plays")?;
    let total_plays: i64 = sqlx::query_scalar("SELECT total_plays FROM podcasts WHERE id = ?")
        .bind(podcast_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read podcast plays")?;

    tx.commit().await.context("Failed to commit play")?;
    Ok(Some(PlayCount {
        episode_id,
        play_count,
        total_plays,
    }))
}

fn row_to_podcast_mysql(row: &sqlx::mysql::MySqlRow) -> Podcast {
    Podcast {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        description: row.get("description"),
        cover_image: row.get("cover_image"),
        total_plays: row.get("total_plays"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_episode_mysql(row: &sqlx::mysql::MySqlRow) -> Episode {
    Episode {
        id: row.get("id"),
        podcast_id: row.get("podcast_id"),
        title: row.get("title"),
        description: row.get("description"),
        audio_path: row.get("audio_path"),
        duration_seconds: row.get("duration_seconds"),
        episode_number: row.get("episode_number"),
        published_at: row.get("published_at"),
        play_count: row.get("play_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
