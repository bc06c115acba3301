//! Blog posts made of ordered sections of typed content blocks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blog {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub cover_image: Option<String>,
    pub author: String,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogSection {
    pub id: i64,
    pub blog_id: i64,
    pub position: i32,
    pub title: Option<String>,
    pub contents: Vec<BlogContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogContent {
    pub id: i64,
    pub section_id: i64,
    pub position: i32,
    pub kind: ContentKind,
    pub data: serde_json::Value,
    /// Rendered markdown, text blocks only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    List,
    Table,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Text => write!(f, "text"),
            ContentKind::List => write!(f, "list"),
            ContentKind::Table => write!(f, "table"),
        }
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ContentKind::Text),
            "list" => Ok(ContentKind::List),
            "table" => Ok(ContentKind::Table),
            _ => Err(anyhow::anyhow!("Invalid content kind: {}", s)),
        }
    }
}

/// Blog with its full section/content tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogDetail {
    #[serde(flatten)]
    pub blog: Blog,
    pub sections: Vec<BlogSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub contents: Vec<ContentInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentInput {
    pub kind: ContentKind,
    pub data: serde_json::Value,
}

/// Validated content block ready for storage
#[derive(Debug, Clone)]
pub struct NewContent {
    pub kind: ContentKind,
    pub data: serde_json::Value,
    pub html: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSection {
    pub title: Option<String>,
    pub contents: Vec<NewContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBlogInput {
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub sections: Vec<SectionInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBlogInput {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub cover_image: Option<String>,
    pub author: Option<String>,
    pub is_published: Option<bool>,
    /// When present, replaces the whole tree
    pub sections: Option<Vec<SectionInput>>,
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_result_total_pages() {
        let page: PagedResult<i32> = PagedResult::new(vec![], 21, 1, 10);
        assert_eq!(page.total_pages, 3);
        let empty: PagedResult<i32> = PagedResult::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_content_input_deserialize() {
        let input: ContentInput =
            serde_json::from_str(r#"{"kind": "list", "data": {"ordered": true, "items": ["a"]}}"#)
                .unwrap();
        assert_eq!(input.kind, ContentKind::List);
        assert_eq!(input.data["items"][0], "a");
    }
}
