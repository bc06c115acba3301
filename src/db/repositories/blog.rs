//! Blog repository
//!
//! A blog owns an ordered tree of sections and content blocks. The tree is
//! always written as a whole: existing sections are dropped (contents cascade)
//! and the new ones inserted in array order inside the blog's transaction.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Blog, BlogContent, BlogSection, ContentKind, NewSection};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlConnection, MySqlPool, Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait BlogRepository: Send + Sync {
    /// Insert a blog together with its tree
    async fn create(&self, blog: &Blog, sections: &[NewSection]) -> Result<Blog>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Blog>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Blog>>;

    /// Sections of a blog with their contents, both by position
    async fn get_tree(&self, blog_id: i64) -> Result<Vec<BlogSection>>;

    /// One page of blogs and the total count. Published blogs are ordered by
    /// publication date, the admin listing by creation date.
    async fn list(&self, published_only: bool, page: i64, per_page: i64)
        -> Result<(Vec<Blog>, i64)>;

    /// Update the blog row and, when `sections` is given, replace its tree
    async fn update(&self, blog: &Blog, sections: Option<&[NewSection]>) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    async fn count_published(&self) -> Result<i64>;
}

pub struct SqlxBlogRepository {
    pool: DynDatabasePool,
}

impl SqlxBlogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BlogRepository> {
        Arc::new(Self::new(pool))
    }
}

const BLOG_COLUMNS: &str = "id, slug, title, excerpt, cover_image, author, is_published, \
    published_at, created_at, updated_at";

const INSERT_BLOG_SQL: &str = r#"
    INSERT INTO blogs
        (slug, title, excerpt, cover_image, author, is_published, published_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_BLOG_SQL: &str = r#"
    UPDATE blogs
    SET slug = ?, title = ?, excerpt = ?, cover_image = ?, author = ?, is_published = ?,
        published_at = ?, updated_at = ?
    WHERE id = ?
"#;

const SECTIONS_SQL: &str =
    "SELECT id, blog_id, position, title FROM blog_sections WHERE blog_id = ? ORDER BY position";

const CONTENTS_SQL: &str = r#"
    SELECT c.id, c.section_id, c.position, c.kind, c.data, c.html
    FROM blog_contents c
    JOIN blog_sections s ON s.id = c.section_id
    WHERE s.blog_id = ?
    ORDER BY s.position, c.position
"#;

#[async_trait]
impl BlogRepository for SqlxBlogRepository {
    async fn create(&self, blog: &Blog, sections: &[NewSection]) -> Result<Blog> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_blog_sqlite(self.pool.sqlite()?, blog, sections).await?,
            DatabaseDriver::Mysql => create_blog_mysql(self.pool.mysql()?, blog, sections).await?,
        };
        Ok(Blog { id, ..blog.clone() })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Blog>> {
        let sql = format!("SELECT {} FROM blogs WHERE id = ?", BLOG_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get blog by ID")?
                .as_ref()
                .map(row_to_blog_sqlite)),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get blog by ID")?
                .as_ref()
                .map(row_to_blog_mysql)),
        }
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Blog>> {
        let sql = format!("SELECT {} FROM blogs WHERE slug = ?", BLOG_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get blog by slug")?
                .as_ref()
                .map(row_to_blog_sqlite)),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(slug)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get blog by slug")?
                .as_ref()
                .map(row_to_blog_mysql)),
        }
    }

    async fn get_tree(&self, blog_id: i64) -> Result<Vec<BlogSection>> {
        let (sections, contents) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let sections = sqlx::query(SECTIONS_SQL)
                    .bind(blog_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to load blog sections")?
                    .iter()
                    .map(|row| BlogSection {
                        id: row.get("id"),
                        blog_id: row.get("blog_id"),
                        position: row.get("position"),
                        title: row.get("title"),
                        contents: Vec::new(),
                    })
                    .collect::<Vec<_>>();
                let contents = sqlx::query(CONTENTS_SQL)
                    .bind(blog_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to load blog contents")?
                    .iter()
                    .map(|row| {
                        content_from_parts(
                            row.get("id"),
                            row.get("section_id"),
                            row.get("position"),
                            row.get("kind"),
                            row.get("data"),
                            row.get("html"),
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                (sections, contents)
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let sections = sqlx::query(SECTIONS_SQL)
                    .bind(blog_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to load blog sections")?
                    .iter()
                    .map(|row| BlogSection {
                        id: row.get("id"),
                        blog_id: row.get("blog_id"),
                        position: row.get("position"),
                        title: row.get("title"),
                        contents: Vec::new(),
                    })
                    .collect::<Vec<_>>();
                let contents = sqlx::query(CONTENTS_SQL)
                    .bind(blog_id)
                    .fetch_all(pool)
                    .await
                    .context("Failed to load blog contents")?
                    .iter()
                    .map(|row| {
                        content_from_parts(
                            row.get("id"),
                            row.get("section_id"),
                            row.get("position"),
                            row.get("kind"),
                            row.get("data"),
                            row.get("html"),
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                (sections, contents)
            }
        };
        Ok(assemble_tree(sections, contents))
    }

    async fn list(
        &self,
        published_only: bool,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Blog>, i64)> {
        let offset = (page.max(1) - 1) * per_page;
        let (filter, order) = if published_only {
            ("WHERE is_published = 1", "published_at DESC, id DESC")
        } else {
            ("", "created_at DESC, id DESC")
        };
        let sql = format!(
            "SELECT {} FROM blogs {} ORDER BY {} LIMIT ? OFFSET ?",
            BLOG_COLUMNS, filter, order
        );
        let count_sql = format!("SELECT COUNT(*) FROM blogs {}", filter);

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let blogs = sqlx::query(&sql)
                    .bind(per_page)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list blogs")?
                    .iter()
                    .map(row_to_blog_sqlite)
                    .collect();
                let total: i64 = sqlx::query_scalar(&count_sql)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count blogs")?;
                Ok((blogs, total))
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let blogs = sqlx::query(&sql)
                    .bind(per_page)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list blogs")?
                    .iter()
                    .map(row_to_blog_mysql)
                    .collect();
                let total: i64 = sqlx::query_scalar(&count_sql)
                    .fetch_one(pool)
                    .await
                    .context("Failed to count blogs")?;
                Ok((blogs, total))
            }
        }
    }

    async fn update(&self, blog: &Blog, sections: Option<&[NewSection]>) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_blog_sqlite(self.pool.sqlite()?, blog, sections).await,
            DatabaseDriver::Mysql => update_blog_mysql(self.pool.mysql()?, blog, sections).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM blogs WHERE id = ?";
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
        .context("Failed to delete blog")?;
        Ok(affected > 0)
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM blogs WHERE slug = ? AND id <> ?";
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
        .context("Failed to check blog slug")?;
        Ok(count > 0)
    }

    async fn count_published(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM blogs WHERE is_published = 1";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql).fetch_one(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql).fetch_one(self.pool.mysql()?).await,
        }
        .context("Failed to count published blogs")?;
        Ok(count)
    }
}

fn content_from_parts(
    id: i64,
    section_id: i64,
    position: i32,
    kind: String,
    data: String,
    html: Option<String>,
) -> Result<BlogContent> {
    let kind = ContentKind::from_str(&kind)
        .with_context(|| format!("Invalid content kind in database: {}", kind))?;
    let data = serde_json::from_str(&data)
        .with_context(|| format!("Invalid content data for block {}", id))?;
    Ok(BlogContent {
        id,
        section_id,
        position,
        kind,
        data,
        html,
    })
}

/// Attach contents to their sections. Both inputs arrive in position order.
fn assemble_tree(mut sections: Vec<BlogSection>, contents: Vec<BlogContent>) -> Vec<BlogSection> {
    let index: HashMap<i64, usize> = sections
        .iter()
        .enumerate()
        .map(|(i, section)| (section.id, i))
        .collect();
    for content in contents {
        if let Some(&i) = index.get(&content.section_id) {
            sections[i].contents.push(content);
        }
    }
    sections
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_blog_sqlite(pool: &SqlitePool, blog: &Blog, sections: &[NewSection]) -> Result<i64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(INSERT_BLOG_SQL)
        .bind(&blog.slug)
        .bind(&blog.title)
        .bind(&blog.excerpt)
        .bind(&blog.cover_image)
        .bind(&blog.author)
        .bind(blog.is_published)
        .bind(blog.published_at)
        .bind(blog.created_at)
        .bind(blog.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create blog")?
        .last_insert_rowid();

    write_tree_sqlite(&mut tx, id, sections).await?;
    tx.commit().await.context("Failed to commit blog")?;
    Ok(id)
}

async fn update_blog_sqlite(
    pool: &SqlitePool,
    blog: &Blog,
    sections: Option<&[NewSection]>,
) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(UPDATE_BLOG_SQL)
        .bind(&blog.slug)
        .bind(&blog.title)
        .bind(&blog.excerpt)
        .bind(&blog.cover_image)
        .bind(&blog.author)
        .bind(blog.is_published)
        .bind(blog.published_at)
        .bind(chrono::Utc::now())
        .bind(blog.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update blog")?;

    if let Some(sections) = sections {
        sqlx::query("DELETE FROM blog_sections WHERE blog_id = ?")
            .bind(blog.id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear blog sections")?;
        write_tree_sqlite(&mut tx, blog.id, sections).await?;
    }

    tx.commit().await.context("Failed to commit blog")?;
    Ok(())
}

async fn write_tree_sqlite(
    conn: &mut SqliteConnection,
    blog_id: i64,
    sections: &[NewSection],
) -> Result<()> {
    for (position, section) in sections.iter().enumerate() {
        let section_id = sqlx::query(
            "INSERT INTO blog_sections (blog_id, position, title) VALUES (?, ?, ?)",
        )
        .bind(blog_id)
        .bind(position as i32)
        .bind(&section.title)
        .execute(&mut *conn)
        .await
        .context("Failed to insert blog section")?
        .last_insert_rowid();

        for (content_position, content) in section.contents.iter().enumerate() {
            sqlx::query(
                "INSERT INTO blog_contents (section_id, position, kind, data, html) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(section_id)
            .bind(content_position as i32)
            .bind(content.kind.to_string())
            .bind(content.data.to_string())
            .bind(&content.html)
            .execute(&mut *conn)
            .await
            .context("Failed to insert blog content")?;
        }
    }
    Ok(())
}

fn row_to_blog_sqlite(row: &sqlx::sqlite::SqliteRow) -> Blog {
    Blog {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        excerpt: row.get("excerpt"),
        cover_image: row.get("cover_image"),
        author: row.get("author"),
        is_published: row.get("is_published"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_blog_mysql(pool: &MySqlPool, blog: &Blog, sections: &[NewSection]) -> Result<i64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let id = sqlx::query(INSERT_BLOG_SQL)
        .bind(&blog.slug)
        .bind(&blog.title)
        .bind(&blog.excerpt)
        .bind(&blog.cover_image)
        .bind(&blog.author)
        .bind(blog.is_published)
        .bind(blog.published_at)
        .bind(blog.created_at)
        .bind(blog.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create blog")?
        .last_insert_id() as i64;

    write_tree_mysql(&mut tx, id, sections).await?;
    tx.commit().await.context("Failed to commit blog")?;
    Ok(id)
}

async fn update_blog_mysql(
    pool: &MySqlPool,
    blog: &Blog,
    sections: Option<&[NewSection]>,
) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(UPDATE_BLOG_SQL)
        .bind(&blog.slug)
        .bind(&blog.title)
        .bind(&blog.excerpt)
        .bind(&blog.cover_image)
        .bind(&blog.author)
        .bind(blog.is_published)
        .bind(blog.published_at)
        .bind(chrono::Utc::now())
        .bind(blog.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update blog")?;

    if let Some(sections) = sections {
        sqlx::query("DELETE FROM blog_sections WHERE blog_id = ?")
            .bind(blog.id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear blog sections")?;
        write_tree_mysql(&mut tx, blog.id, sections).await?;
    }

    tx.commit().await.context("Failed to commit blog")?;
    Ok(())
}

async fn write_tree_mysql(
    conn: &mut MySqlConnection,
    blog_id: i64,
    sections: &[NewSection],
) -> Result<()> {
    for (position, section) in sections.iter().enumerate() {
        let section_id = sqlx::query(
            "INSERT INTO blog_sections (blog_id, position, title) VALUES (?, ?, ?)",
        )
        .bind(blog_id)
        .bind(position as i32)
        .bind(&section.title)
        .execute(&mut *conn)
        .await
        .context("Failed to insert blog section")?
        .last_insert_id() as i64;

        for (content_position, content) in section.contents.iter().enumerate() {
            sqlx::query(
                "INSERT INTO blog_contents (section_id, position, kind, data, html) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(section_id)
            .bind(content_position as i32)
            .bind(content.kind.to_string())
            .bind(content.data.to_string())
            .bind(&content.html)
            .execute(&mut *conn)
            .await
            .context("Failed to insert blog content")?;
        }
    }
    Ok(())
}

fn row_to_blog_mysql(row: &sqlx::mysql::MySqlRow) -> Blog {
    Blog {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        excerpt: row.get("excerpt"),
        cover_image: row.get("cover_image"),
        author: row.get("author"),
        is_published: row.get("is_published"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::models::NewContent;
    use chrono::Utc;
    use serde_json::json;

    async fn setup() -> SqlxBlogRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool).await.expect("Failed to run migrations");
        SqlxBlogRepository::new(pool)
    }

    fn blog(slug: &str, published: bool) -> Blog {
        let now = Utc::now();
        Blog {
            id: 0,
            slug: slug.to_string(),
            title: slug.to_uppercase(),
            excerpt: String::new(),
            cover_image: None,
            author: "Equipe".to_string(),
            is_published: published,
            published_at: published.then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn tree() -> Vec<NewSection> {
        vec![
            NewSection {
                title: Some("Intro".to_string()),
                contents: vec![
                    NewContent {
                        kind: ContentKind::Text,
                        data: json!({"markdown": "Hello"}),
                        html: Some("<p>Hello</p>\n".to_string()),
                    },
                    NewContent {
                        kind: ContentKind::List,
                        data: json!({"ordered": false, "items": ["a", "b"]}),
                        html: None,
                    },
                ],
            },
            NewSection {
                title: None,
                contents: vec![NewContent {
                    kind: ContentKind::Table,
                    data: json!({"headers": ["k"], "rows": [["v"]]}),
                    html: None,
                }],
            },
        ]
    }

    #[tokio::test]
    async fn test_create_with_tree_keeps_order() {
        let repo = setup().await;
        let created = repo.create(&blog("hello", true), &tree()).await.unwrap();

        let sections = repo.get_tree(created.id).await.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title.as_deref(), Some("Intro"));
        assert_eq!(sections[0].contents.len(), 2);
        assert_eq!(sections[0].contents[0].kind, ContentKind::Text);
        assert_eq!(sections[0].contents[1].data["items"][1], "b");
        assert_eq!(sections[1].position, 1);
        assert_eq!(sections[1].contents[0].kind, ContentKind::Table);
    }

    #[tokio::test]
    async fn test_update_replaces_tree_only_when_given() {
        let repo = setup().await;
        let mut created = repo.create(&blog("hello", false), &tree()).await.unwrap();

        created.title = "Renamed".to_string();
        repo.update(&created, None).await.unwrap();
        assert_eq!(repo.get_tree(created.id).await.unwrap().len(), 2);

        let replacement = vec![NewSection {
            title: Some("Only".to_string()),
            contents: vec![],
        }];
        repo.update(&created, Some(&replacement)).await.unwrap();
        let sections = repo.get_tree(created.id).await.unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title.as_deref(), Some("Only"));
        assert_eq!(repo.get_by_id(created.id).await.unwrap().unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn test_list_published_paginates() {
        let repo = setup().await;
        for i in 0..3 {
            repo.create(&blog(&format!("post-{}", i), true), &[]).await.unwrap();
        }
        repo.create(&blog("draft", false), &[]).await.unwrap();

        let (page, total) = repo.list(true, 1, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        let (rest, _) = repo.list(true, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);

        let (all, all_total) = repo.list(false, 1, 10).await.unwrap();
        assert_eq!((all.len(), all_total), (4, 4));
        assert_eq!(repo.count_published().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_and_slug_lookup() {
        let repo = setup().await;
        let created = repo.create(&blog("hello", true), &tree()).await.unwrap();

        assert!(repo.slug_exists("hello", None).await.unwrap());
        assert!(!repo.slug_exists("hello", Some(created.id)).await.unwrap());
        assert!(repo.get_by_slug("hello").await.unwrap().is_some());

        assert!(repo.delete(created.id).await.unwrap());
        assert!(repo.get_tree(created.id).await.unwrap().is_empty());
    }
}
