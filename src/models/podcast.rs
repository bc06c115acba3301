//! Podcasts and their episodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Podcast {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub cover_image: Option<String>,
    /// Sum of the play counts of all episodes
    pub total_plays: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub title: String,
    pub description: String,
    /// Path of the audio file in the remote store
    pub audio_path: String,
    pub duration_seconds: i32,
    pub episode_number: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub play_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Podcast with its episodes, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastDetail {
    #[serde(flatten)]
    pub podcast: Podcast,
    pub episodes: Vec<EpisodeView>,
}

/// Episode as served to clients, with the proxy URL of its audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeView {
    #[serde(flatten)]
    pub episode: Episode,
    pub audio_url: String,
}

/// Counters after a play was recorded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayCount {
    pub episode_id: i64,
    pub play_count: i64,
    pub total_plays: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePodcastInput {
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePodcastInput {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEpisodeInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub audio_path: String,
    #[serde(default)]
    pub duration_seconds: i32,
    /// Next number in the podcast when omitted
    #[serde(default)]
    pub episode_number: Option<i32>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEpisodeInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub audio_path: Option<String>,
    pub duration_seconds: Option<i32>,
    pub episode_number: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
}

impl UpdateEpisodeInput {
    pub fn apply(self, episode: &mut Episode) {
        if let Some(title) = self.title {
            episode.title = title;
        }
        if let Some(description) = self.description {
            episode.description = description;
        }
        if let Some(audio_path) = self.audio_path {
            episode.audio_path = audio_path;
        }
        if let Some(duration_seconds) = self.duration_seconds {
            episode.duration_seconds = duration_seconds;
        }
        if let Some(episode_number) = self.episode_number {
            episode.episode_number = episode_number;
        }
        if self.published_at.is_some() {
            episode.published_at = self.published_at;
        }
    }
}
