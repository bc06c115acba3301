//! Podcast service
//!
//! Podcasts, episodes and play counting. Episode audio lives in the remote
//! store and is served to clients through the file proxy.

use crate::cache::{keys, CacheLayer, SharedCache};
use crate::db::repositories::PodcastRepository;
use crate::media::{is_safe_path, proxy_url};
use crate::models::{
    CreateEpisodeInput, CreatePodcastInput, Episode, EpisodeView, PlayCount, Podcast,
    PodcastDetail, UpdateEpisodeInput, UpdatePodcastInput,
};
use crate::services::slug::{generate_slug, is_valid_slug};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PodcastServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct PodcastService {
    repo: Arc<dyn PodcastRepository>,
    cache: SharedCache,
}

impl PodcastService {
    pub fn new(repo: Arc<dyn PodcastRepository>, cache: SharedCache) -> Self {
        Self { repo, cache }
    }

    pub async fn list(&self) -> Result<Vec<Podcast>, PodcastServiceError> {
        let key = keys::podcasts();
        if let Ok(Some(hit)) = self.cache.get::<Vec<Podcast>>(&key).await {
            return Ok(hit);
        }

        let podcasts = self.repo.list().await.context("Failed to list podcasts")?;
        if let Err(e) = self.cache.set(&key, &podcasts).await {
            tracing::warn!(key, "Cache write failed: {}", e);
        }
        Ok(podcasts)
    }

    /// Podcast with its released episodes, newest first. Episodes scheduled
    /// in the future stay hidden.
    pub async fn get_by_slug(&self, slug: &str) -> Result<PodcastDetail, PodcastServiceError> {
        let key = keys::podcast(slug);
        if let Ok(Some(hit)) = self.cache.get::<PodcastDetail>(&key).await {
            return Ok(hit);
        }

        let podcast = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get podcast by slug")?
            .ok_or_else(|| PodcastServiceError::NotFound(format!("Podcast '{}'", slug)))?;
        let now = Utc::now();
        let episodes = self
            .repo
            .list_episodes(podcast.id)
            .await
            .context("Failed to list episodes")?
            .into_iter()
            .filter(|e| e.published_at.map_or(true, |p| p <= now))
            .map(episode_view)
            .collect();

        let detail = PodcastDetail { podcast, episodes };
        if let Err(e) = self.cache.set(&key, &detail).await {
            tracing::warn!(key, "Cache write failed: {}", e);
        }
        Ok(detail)
    }

    /// Podcast with every episode, for the admin
    pub async fn get(&self, id: i64) -> Result<PodcastDetail, PodcastServiceError> {
        let podcast = self.get_podcast(id).await?;
        let episodes = self.list_episodes(id).await?;
        Ok(PodcastDetail { podcast, episodes })
    }

    pub async fn create(&self, input: CreatePodcastInput) -> Result<Podcast, PodcastServiceError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(PodcastServiceError::Validation("Title cannot be empty".to_string()));
        }
        let slug = self.resolve_slug(input.slug.as_deref(), &title, None).await?;

        let now = Utc::now();
        let podcast = self
            .repo
            .create(&Podcast {
                id: 0,
                slug,
                title,
                description: input.description,
                cover_image: input.cover_image.filter(|c| !c.is_empty()),
                total_plays: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create podcast")?;

        tracing::info!(podcast_id = podcast.id, slug = %podcast.slug, "Podcast created");
        self.invalidate().await;
        Ok(podcast)
    }

    pub async fn update(
        &self,
        id: i64,
        input: UpdatePodcastInput,
    ) -> Result<Podcast, PodcastServiceError> {
        let mut podcast = self.get_podcast(id).await?;
        if let Some(title) = input.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(PodcastServiceError::Validation("Title cannot be empty".to_string()));
            }
            podcast.title = title;
        }
        if let Some(slug) = input.slug {
            podcast.slug = self.resolve_slug(Some(&slug), &podcast.title, Some(id)).await?;
        }
        if let Some(description) = input.description {
            podcast.description = description;
        }
        if let Some(cover_image) = input.cover_image {
            podcast.cover_image = Some(cover_image).filter(|c| !c.is_empty());
        }

        self.repo
            .update(&podcast)
            .await
            .context("Failed to update podcast")?;
        self.invalidate().await;
        self.get_podcast(id).await
    }

    /// Deletes the podcast and its episodes
    pub async fn delete(&self, id: i64) -> Result<(), PodcastServiceError> {
        if !self.repo.delete(id).await.context("Failed to delete podcast")? {
            return Err(podcast_not_found(id));
        }
        tracing::info!(podcast_id = id, "Podcast deleted");
        self.invalidate().await;
        Ok(())
    }

    // ========================================================================
    // Episodes
    // ========================================================================

    pub async fn list_episodes(
        &self,
        podcast_id: i64,
    ) -> Result<Vec<EpisodeView>, PodcastServiceError> {
        self.get_podcast(podcast_id).await?;
        Ok(self
            .repo
            .list_episodes(podcast_id)
            .await
            .context("Failed to list episodes")?
            .into_iter()
            .map(episode_view)
            .collect())
    }

    pub async fn create_episode(
        &self,
        podcast_id: i64,
        input: CreateEpisodeInput,
    ) -> Result<EpisodeView, PodcastServiceError> {
        self.get_podcast(podcast_id).await?;

        let episode_number = match input.episode_number {
            Some(number) => number,
            None => self
                .repo
                .next_episode_number(podcast_id)
                .await
                .context("Failed to compute episode number")?,
        };
        let now = Utc::now();
        let episode = Episode {
            id: 0,
            podcast_id,
            title: input.title.trim().to_string(),
            description: input.description,
            audio_path: input.audio_path.trim().to_string(),
            duration_seconds: input.duration_seconds,
            episode_number,
            published_at: input.published_at,
            play_count: 0,
            created_at: now,
            updated_at: now,
        };
        validate_episode(&episode)?;

        let created = self
            .repo
            .create_episode(&episode)
            .await
            .context("Failed to create episode")?;
        tracing::info!(
            episode_id = created.id,
            podcast_id,
            number = created.episode_number,
            "Episode created"
        );
        self.invalidate().await;
        Ok(episode_view(created))
    }

    pub async fn update_episode(
        &self,
        id: i64,
        input: UpdateEpisodeInput,
    ) -> Result<EpisodeView, PodcastServiceError> {
        let mut episode = self.get_episode(id).await?;
        input.apply(&mut episode);
        episode.title = episode.title.trim().to_string();
        episode.audio_path = episode.audio_path.trim().to_string();
        validate_episode(&episode)?;

        self.repo
            .update_episode(&episode)
            .await
            .context("Failed to update episode")?;
        self.invalidate().await;
        Ok(episode_view(self.get_episode(id).await?))
    }

    pub async fn delete_episode(&self, id: i64) -> Result<(), PodcastServiceError> {
        if !self
            .repo
            .delete_episode(id)
            .await
            .context("Failed to delete episode")?
        {
            return Err(episode_not_found(id));
        }
        tracing::info!(episode_id = id, "Episode deleted");
        self.invalidate().await;
        Ok(())
    }

    /// Count a play. Cached listings keep their counters until they expire.
    pub async fn record_play(&self, episode_id: i64) -> Result<PlayCount, PodcastServiceError> {
        self.repo
            .record_play(episode_id)
            .await
            .context("Failed to record play")?
            .ok_or_else(|| episode_not_found(episode_id))
    }

    pub async fn total_plays(&self) -> Result<i64, PodcastServiceError> {
        Ok(self
            .repo
            .total_plays()
            .await
            .context("Failed to count plays")?)
    }

    async fn get_podcast(&self, id: i64) -> Result<Podcast, PodcastServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get podcast")?
            .ok_or_else(|| podcast_not_found(id))
    }

    async fn get_episode(&self, id: i64) -> Result<Episode, PodcastServiceError> {
        self.repo
            .get_episode(id)
            .await
            .context("Failed to get episode")?
            .ok_or_else(|| episode_not_found(id))
    }

    async fn resolve_slug(
        &self,
        requested: Option<&str>,
        title: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, PodcastServiceError> {
        let slug = match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => slug.to_string(),
            None => generate_slug(title),
        };
        if !is_valid_slug(&slug) {
            return Err(PodcastServiceError::Validation(format!("Invalid slug '{}'", slug)));
        }
        if self
            .repo
            .slug_exists(&slug, exclude_id)
            .await
            .context("Failed to check slug uniqueness")?
        {
            return Err(PodcastServiceError::Conflict(format!(
                "Slug '{}' is already used",
                slug
            )));
        }
        Ok(slug)
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_pattern(keys::PODCASTS_ALL).await {
            tracing::warn!("Failed to invalidate podcast cache: {}", e);
        }
    }
}

fn episode_view(episode: Episode) -> EpisodeView {
    EpisodeView {
        audio_url: proxy_url(&episode.audio_path),
        episode,
    }
}

fn validate_episode(episode: &Episode) -> Result<(), PodcastServiceError> {
    if episode.title.is_empty() {
        return Err(PodcastServiceError::Validation("Title cannot be empty".to_string()));
    }
    if episode.audio_path.is_empty() || !is_safe_path(&episode.audio_path) {
        return Err(PodcastServiceError::Validation(format!(
            "Invalid audio path '{}'",
            episode.audio_path
        )));
    }
    if episode.duration_seconds < 0 {
        return Err(PodcastServiceError::Validation(
            "duration_seconds cannot be negative".to_string(),
        ));
    }
    if episode.episode_number < 1 {
        return Err(PodcastServiceError::Validation(
            "episode_number must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn podcast_not_found(id: i64) -> PodcastServiceError {
    PodcastServiceError::NotFound(format!("Podcast {}", id))
}

fn episode_not_found(id: i64) -> PodcastServiceError {
    PodcastServiceError::NotFound(format!("Episode {}", id))
}
