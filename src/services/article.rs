//! Article Service
//!
//! Every authenticated user can read every article. The author is the
//! caller at creation time; only the author or staff may change or delete.

use std::sync::Arc;
use validator::Validate;

use super::{ServiceError, ServiceResult};
use crate::auth::middleware::AuthUser;
use crate::db::Store;
use crate::models::{
    Article, ArticleChanges, ArticlePatchRequest, ArticleRequest, NewArticle, Page, Scope,
};

pub struct ArticleService {
    store: Arc<dyn Store>,
}

impl ArticleService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Rows visible when listing. Articles are public to any signed-in user.
    fn list_scope(_caller: &AuthUser) -> Scope {
        Scope::All
    }

    pub async fn list(&self, caller: &AuthUser, page: Page) -> ServiceResult<(Vec<Article>, i64)> {
        Ok(self.store.list_articles(Self::list_scope(caller), page).await?)
    }

    pub async fn get(&self, id: i64) -> ServiceResult<Article> {
        self.store
            .find_article(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Article not found.".to_string()))
    }

    pub async fn create(&self, caller: &AuthUser, req: ArticleRequest) -> ServiceResult<Article> {
        req.validate()?;
        let article = self
            .store
            .create_article(NewArticle {
                title: req.title.unwrap_or_default(),
                content: req.content.unwrap_or_default(),
                author_id: caller.id,
            })
            .await?;

        tracing::info!("Article {} created by user {}", article.id, caller.id);
        Ok(article)
    }

    /// Full replacement of title and content.
    pub async fn update(
        &self,
        caller: &AuthUser,
        id: i64,
        req: ArticleRequest,
    ) -> ServiceResult<Article> {
        req.validate()?;
        let changes = ArticleChanges {
            title: req.title,
            content: req.content,
        };
        self.apply_changes(caller, id, changes).await
    }

    pub async fn patch(
        &self,
        caller: &AuthUser,
        id: i64,
        req: ArticlePatchRequest,
    ) -> ServiceResult<Article> {
        req.validate()?;
        self.apply_changes(caller, id, ArticleChanges::from(req)).await
    }

    async fn apply_changes(
        &self,
        caller: &AuthUser,
        id: i64,
        changes: ArticleChanges,
    ) -> ServiceResult<Article> {
        let article = self.get_modifiable(caller, id).await?;
        if changes.is_empty() {
            return Ok(article);
        }

        let article = self
            .store
            .update_article(id, &changes)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Article not found.".to_string()))?;

        tracing::info!("Article {} updated by user {}", article.id, caller.id);
        Ok(article)
    }

    pub async fn delete(&self, caller: &AuthUser, id: i64) -> ServiceResult<()> {
        self.get_modifiable(caller, id).await?;
        if !self.store.delete_article(id).await? {
            return Err(ServiceError::NotFound("Article not found.".to_string()));
        }

        tracing::info!("Article {} deleted by user {}", id, caller.id);
        Ok(())
    }

    async fn get_modifiable(&self, caller: &AuthUser, id: i64) -> ServiceResult<Article> {
        let article = self.get(id).await?;
        if !caller.can_modify(article.author_id) {
            tracing::warn!(
                "User {} denied write access to article {} (author {:?})",
                caller.id,
                article.id,
                article.author_id
            );
            return Err(ServiceError::PermissionDenied(
                "You do not have permission to modify this article.".to_string(),
            ));
        }
        Ok(article)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::NewUser;

    async fn setup() -> (ArticleService, AuthUser, AuthUser) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut callers = Vec::new();
        for name in ["author", "reader"] {
            let user = store
                .create_user(NewUser {
                    username: name.to_string(),
                    email: Some(format!("{}@example.com", name)),
                    password_hash: "hash".to_string(),
                })
                .await
                .unwrap();
            callers.push(AuthUser::from(user));
        }
        let reader = callers.pop().unwrap();
        let author = callers.pop().unwrap();
        (ArticleService::new(store), author, reader)
    }

    fn article_request(title: &str, content: &str) -> ArticleRequest {
        ArticleRequest {
            title: Some(title.to_string()),
            content: Some(content.to_string()),
        }
    }

    #[tokio::test]
    async fn test_author_assigned_from_caller() {
        let (service, author, _) = setup().await;
        let article = service
            .create(&author, article_request("Article 1", "Content 1"))
            .await
            .unwrap();
        assert_eq!(article.author_id, Some(author.id));
    }

    #[tokio::test]
    async fn test_non_author_cannot_modify() {
        let (service, author, reader) = setup().await;
        let article = service
            .create(&author, article_request("Article 1", "Content 1"))
            .await
            .unwrap();

        let err = service
            .update(&reader, article.id, article_request("Hijacked", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        let err = service.delete(&reader, article.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
        assert_eq!(service.get(article.id).await.unwrap().title, "Article 1");
    }

    #[tokio::test]
    async fn test_staff_can_modify_any_article() {
        let (service, author, mut reader) = setup().await;
        reader.is_staff = true;
        let article = service
            .create(&author, article_request("Article 1", "Content 1"))
            .await
            .unwrap();

        let patched = service
            .patch(
                &reader,
                article.id,
                ArticlePatchRequest {
                    title: Some("Moderated".to_string()),
                    content: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.title, "Moderated");
        assert_eq!(patched.content, "Content 1");

        service.delete(&reader, article.id).await.unwrap();
        assert!(matches!(
            service.get(article.id).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_is_paginated_in_id_order() {
        let (service, author, reader) = setup().await;
        for i in 1..=3 {
            service
                .create(&author, article_request(&format!("Article {}", i), "body"))
                .await
                .unwrap();
        }

        let (articles, total) = service
            .list(&reader, Page { limit: 2, offset: 1 })
            .await
            .unwrap();
        assert_eq!(total, 3);
        let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Article 2", "Article 3"]);
    }
}
