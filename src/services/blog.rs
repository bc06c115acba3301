//! Blog service
//!
//! Blogs own an ordered tree of sections and content blocks. Writing a blog
//! with `sections` validates every block, renders text blocks to HTML and
//! replaces the stored tree in one transaction.

use crate::cache::{keys, CacheLayer, SharedCache};
use crate::db::repositories::BlogRepository;
use crate::models::{
    Blog, BlogDetail, ContentInput, ContentKind, CreateBlogInput, NewContent, NewSection,
    PagedResult, SectionInput, UpdateBlogInput,
};
use crate::services::markdown::MarkdownRenderer;
use crate::services::slug::{generate_slug, is_valid_slug};
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum BlogServiceError {
    #[error("Blog not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListData {
    #[serde(default)]
    ordered: bool,
    items: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableData {
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextData {
    markdown: String,
}

pub struct BlogService {
    repo: Arc<dyn BlogRepository>,
    cache: SharedCache,
    renderer: MarkdownRenderer,
}

impl BlogService {
    pub fn new(repo: Arc<dyn BlogRepository>, cache: SharedCache) -> Self {
        Self {
            repo,
            cache,
            renderer: MarkdownRenderer::new(),
        }
    }

    /// Published blogs, newest first
    pub async fn list_published(
        &self,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> Result<PagedResult<Blog>, BlogServiceError> {
        let (page, per_page) = page_bounds(page, per_page);
        let key = keys::blog_page(page, per_page);
        if let Ok(Some(hit)) = self.cache.get::<PagedResult<Blog>>(&key).await {
            return Ok(hit);
        }

        let (items, total) = self
            .repo
            .list(true, page, per_page)
            .await
            .context("Failed to list blogs")?;
        let result = PagedResult::new(items, total, page, per_page);
        if let Err(e) = self.cache.set(&key, &result).await {
            tracing::warn!(key, "Cache write failed: {}", e);
        }
        Ok(result)
    }

    /// All blogs, drafts included, newest first
    pub async fn list_all(
        &self,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> Result<PagedResult<Blog>, BlogServiceError> {
        let (page, per_page) = page_bounds(page, per_page);
        let (items, total) = self
            .repo
            .list(false, page, per_page)
            .await
            .context("Failed to list blogs")?;
        Ok(PagedResult::new(items, total, page, per_page))
    }

    /// A published blog with its full tree
    pub async fn get_published(&self, slug: &str) -> Result<BlogDetail, BlogServiceError> {
        let key = keys::blog(slug);
        if let Ok(Some(hit)) = self.cache.get::<BlogDetail>(&key).await {
            return Ok(hit);
        }

        let blog = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get blog by slug")?
            .filter(|b| b.is_published)
            .ok_or_else(|| BlogServiceError::NotFound(slug.to_string()))?;
        let detail = self.with_tree(blog).await?;

        if let Err(e) = self.cache.set(&key, &detail).await {
            tracing::warn!(key, "Cache write failed: {}", e);
        }
        Ok(detail)
    }

    pub async fn get(&self, id: i64) -> Result<BlogDetail, BlogServiceError> {
        let blog = self.get_blog(id).await?;
        self.with_tree(blog).await
    }

    pub async fn create(&self, input: CreateBlogInput) -> Result<BlogDetail, BlogServiceError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(BlogServiceError::Validation("Title cannot be empty".to_string()));
        }
        let slug = self.resolve_slug(input.slug.as_deref(), &title, None).await?;
        let sections = self.prepare_sections(input.sections)?;

        let now = Utc::now();
        let blog = self
            .repo
            .create(
                &Blog {
                    id: 0,
                    slug,
                    title,
                    excerpt: input.excerpt,
                    cover_image: input.cover_image,
                    author: input.author,
                    is_published: input.is_published,
                    published_at: input.is_published.then_some(now),
                    created_at: now,
                    updated_at: now,
                },
                &sections,
            )
            .await
            .context("Failed to create blog")?;

        tracing::info!(blog_id = blog.id, slug = %blog.slug, "Blog created");
        self.invalidate().await;
        self.get(blog.id).await
    }

    /// Partial update. `published_at` is set on the first publication and
    /// kept afterwards.
    pub async fn update(
        &self,
        id: i64,
        input: UpdateBlogInput,
    ) -> Result<BlogDetail, BlogServiceError> {
        let mut blog = self.get_blog(id).await?;

        if let Some(title) = input.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(BlogServiceError::Validation("Title cannot be empty".to_string()));
            }
            blog.title = title;
        }
        if let Some(slug) = input.slug {
            blog.slug = self.resolve_slug(Some(&slug), &blog.title, Some(id)).await?;
        }
        if let Some(excerpt) = input.excerpt {
            blog.excerpt = excerpt;
        }
        if let Some(cover_image) = input.cover_image {
            blog.cover_image = Some(cover_image).filter(|c| !c.is_empty());
        }
        if let Some(author) = input.author {
            blog.author = author;
        }
        if let Some(is_published) = input.is_published {
            blog.is_published = is_published;
            if is_published && blog.published_at.is_none() {
                blog.published_at = Some(Utc::now());
            }
        }
        blog.updated_at = Utc::now();

        let sections = input
            .sections
            .map(|s| self.prepare_sections(s))
            .transpose()?;
        self.repo
            .update(&blog, sections.as_deref())
            .await
            .context("Failed to update blog")?;

        self.invalidate().await;
        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), BlogServiceError> {
        if !self.repo.delete(id).await.context("Failed to delete blog")? {
            return Err(BlogServiceError::NotFound(id.to_string()));
        }
        tracing::info!(blog_id = id, "Blog deleted");
        self.invalidate().await;
        Ok(())
    }

    pub async fn count_published(&self) -> Result<i64, BlogServiceError> {
        Ok(self
            .repo
            .count_published()
            .await
            .context("Failed to count blogs")?)
    }

    async fn get_blog(&self, id: i64) -> Result<Blog, BlogServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get blog")?
            .ok_or_else(|| BlogServiceError::NotFound(id.to_string()))
    }

    async fn with_tree(&self, blog: Blog) -> Result<BlogDetail, BlogServiceError> {
        let sections = self
            .repo
            .get_tree(blog.id)
            .await
            .context("Failed to load blog sections")?;
        Ok(BlogDetail { blog, sections })
    }

    async fn resolve_slug(
        &self,
        requested: Option<&str>,
        title: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, BlogServiceError> {
        let slug = match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => slug.to_string(),
            None => generate_slug(title),
        };
        if !is_valid_slug(&slug) {
            return Err(BlogServiceError::Validation(format!("Invalid slug '{}'", slug)));
        }
        if self
            .repo
            .slug_exists(&slug, exclude_id)
            .await
            .context("Failed to check slug uniqueness")?
        {
            return Err(BlogServiceError::Conflict(format!("Slug '{}' is already used", slug)));
        }
        Ok(slug)
    }

    fn prepare_sections(
        &self,
        sections: Vec<SectionInput>,
    ) -> Result<Vec<NewSection>, BlogServiceError> {
        sections
            .into_iter()
            .enumerate()
            .map(|(s, section)| {
                let contents = section
                    .contents
                    .into_iter()
                    .enumerate()
                    .map(|(c, content)| {
                        self.prepare_content(content).map_err(|e| {
                            BlogServiceError::Validation(format!(
                                "sections[{}].contents[{}]: {}",
                                s, c, e
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(NewSection {
                    title: section.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
                    contents,
                })
            })
            .collect()
    }

    /// Check a block against its kind and normalise its data
    fn prepare_content(&self, content: ContentInput) -> Result<NewContent, String> {
        match content.kind {
            ContentKind::List => {
                let list: ListData =
                    serde_json::from_value(content.data).map_err(|e| e.to_string())?;
                Ok(NewContent {
                    kind: ContentKind::List,
                    data: serde_json::to_value(list).map_err(|e| e.to_string())?,
                    html: None,
                })
            }
            ContentKind::Table => {
                let table: TableData =
                    serde_json::from_value(content.data).map_err(|e| e.to_string())?;
                if table.headers.is_empty() {
                    return Err("table needs at least one header".to_string());
                }
                if let Some(row) = table.rows.iter().position(|r| r.len() != table.headers.len()) {
                    return Err(format!(
                        "row {} has {} cells, expected {}",
                        row,
                        table.rows[row].len(),
                        table.headers.len()
                    ));
                }
                Ok(NewContent {
                    kind: ContentKind::Table,
                    data: serde_json::to_value(table).map_err(|e| e.to_string())?,
                    html: None,
                })
            }
            ContentKind::Text => {
                let text: TextData =
                    serde_json::from_value(content.data).map_err(|e| e.to_string())?;
                let html = self.renderer.render(&text.markdown);
                Ok(NewContent {
                    kind: ContentKind::Text,
                    data: serde_json::to_value(text).map_err(|e| e.to_string())?,
                    html: Some(html),
                })
            }
        }
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_pattern(keys::BLOGS_ALL).await {
            tracing::warn!("Failed to invalidate blog cache: {}", e);
        }
    }
}

fn page_bounds(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::CacheConfig;
    use crate::db::repositories::SqlxBlogRepository;
    use crate::db::{create_test_pool, migrations};
    use serde_json::json;

    async fn setup() -> BlogService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        BlogService::new(
            SqlxBlogRepository::boxed(pool),
            create_cache(&CacheConfig::default()),
        )
    }

    fn blog_input(title: &str, published: bool, sections: Vec<SectionInput>) -> CreateBlogInput {
        CreateBlogInput {
            slug: None,
            title: title.to_string(),
            excerpt: "Résumé".to_string(),
            cover_image: None,
            author: "Équipe".to_string(),
            is_published: published,
            sections,
        }
    }

    fn section(contents: Vec<(ContentKind, serde_json::Value)>) -> SectionInput {
        SectionInput {
            title: Some("Intro".to_string()),
            contents: contents
                .into_iter()
                .map(|(kind, data)| ContentInput { kind, data })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_renders_text_and_keeps_order() {
        let service = setup().await;
        let detail = service
            .create(blog_input(
                "Pourquoi Rust ?",
                true,
                vec![
                    section(vec![
                        (ContentKind::Text, json!({ "markdown": "**Sûr** et rapide" })),
                        (ContentKind::List, json!({ "items": ["a", "b"] })),
                    ]),
                    section(vec![(
                        ContentKind::Table,
                        json!({ "headers": ["Langage", "GC"], "rows": [["Rust", "non"]] }),
                    )]),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(detail.blog.slug, "pourquoi-rust");
        assert!(detail.blog.published_at.is_some());
        assert_eq!(detail.sections.len(), 2);

        let first = &detail.sections[0].contents;
        assert_eq!(first[0].kind, ContentKind::Text);
        assert!(first[0].html.as_deref().unwrap().contains("<strong>Sûr</strong>"));
        assert_eq!(first[1].data, json!({ "ordered": false, "items": ["a", "b"] }));
        assert_eq!(detail.sections[1].contents[0].kind, ContentKind::Table);
    }

    #[tokio::test]
    async fn test_invalid_content_is_rejected() {
        let service = setup().await;
        let cases = vec![
            (ContentKind::List, json!({ "items": "not a list" })),
            (ContentKind::List, json!({ "ordered": "yes", "items": [] })),
            (ContentKind::Table, json!({ "headers": ["a", "b"], "rows": [["1"]] })),
            (ContentKind::Table, json!({ "headers": [], "rows": [] })),
            (ContentKind::Text, json!({ "html": "<p>raw</p>" })),
        ];

        for (kind, data) in cases {
            let result = service
                .create(blog_input("Test", false, vec![section(vec![(kind, data)])]))
                .await;
            assert!(
                matches!(result, Err(BlogServiceError::Validation(_))),
                "expected validation error for {:?}",
                kind
            );
        }
    }

    #[tokio::test]
    async fn test_public_reads_hide_drafts() {
        let service = setup().await;
        service.create(blog_input("Brouillon", false, vec![])).await.unwrap();
        service.create(blog_input("Publié", true, vec![])).await.unwrap();

        let page = service.list_published(None, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].slug, "publie");
        assert!(matches!(
            service.get_published("brouillon").await,
            Err(BlogServiceError::NotFound(_))
        ));
        assert_eq!(service.list_all(None, None).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_publish_sets_published_at_once() {
        let service = setup().await;
        let draft = service.create(blog_input("Bientôt", false, vec![])).await.unwrap();
        assert!(draft.blog.published_at.is_none());

        let published = service
            .update(
                draft.blog.id,
                UpdateBlogInput {
                    is_published: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let first_publication = published.blog.published_at.unwrap();

        service
            .update(draft.blog.id, UpdateBlogInput { is_published: Some(false), ..Default::default() })
            .await
            .unwrap();
        let republished = service
            .update(draft.blog.id, UpdateBlogInput { is_published: Some(true), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(republished.blog.published_at, Some(first_publication));
    }

    #[tokio::test]
    async fn test_update_replaces_tree_and_invalidates_cache() {
        let service = setup().await;
        let created = service
            .create(blog_input(
                "Arbre",
                true,
                vec![section(vec![(ContentKind::Text, json!({ "markdown": "v1" }))])],
            ))
            .await
            .unwrap();
        assert_eq!(service.get_published("arbre").await.unwrap().sections.len(), 1);

        service
            .update(
                created.blog.id,
                UpdateBlogInput {
                    sections: Some(vec![
                        section(vec![]),
                        section(vec![(ContentKind::Text, json!({ "markdown": "v2" }))]),
                    ]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let detail = service.get_published("arbre").await.unwrap();
        assert_eq!(detail.sections.len(), 2);
        assert!(detail.sections[0].contents.is_empty());
        assert!(detail.sections[1].contents[0].html.as_deref().unwrap().contains("v2"));
    }

    #[tokio::test]
    async fn test_slug_conflict_and_delete() {
        let service = setup().await;
        let first = service.create(blog_input("Même titre", true, vec![])).await.unwrap();
        assert!(matches!(
            service.create(blog_input("Même titre", true, vec![])).await,
            Err(BlogServiceError::Conflict(_))
        ));

        service.delete(first.blog.id).await.unwrap();
        assert!(matches!(
            service.delete(first.blog.id).await,
            Err(BlogServiceError::NotFound(_))
        ));
        assert_eq!(service.count_published().await.unwrap(), 0);
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(None, None), (1, DEFAULT_PER_PAGE));
        assert_eq!(page_bounds(Some(0), Some(500)), (1, MAX_PER_PAGE));
        assert_eq!(page_bounds(Some(3), Some(0)), (3, 1));
    }
}
