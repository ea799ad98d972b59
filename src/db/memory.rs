//! In-process store
//!
//! Mirrors the PostgreSQL constraints under a single lock so uniqueness
//! checks and inserts are atomic with respect to each other.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{Store, StoreError, StoreResult, UniqueField};
use crate::models::{
    Article, ArticleChanges, NewArticle, NewReferralCode, NewUser, Page, Referral, ReferralCode,
    Scope, User,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    articles: BTreeMap<i64, Article>,
    referral_codes: BTreeMap<i64, ReferralCode>,
    referrals: BTreeMap<i64, Referral>,
    next_user_id: i64,
    next_article_id: i64,
    next_code_id: i64,
    next_referral_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl Tables {
    fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        if self.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::UniqueViolation(UniqueField::Username));
        }
        if let Some(email) = &user.email {
            if self.users.values().any(|u| u.email.as_ref() == Some(email)) {
                return Err(StoreError::UniqueViolation(UniqueField::Email));
            }
        }

        let user = User {
            id: next_id(&mut self.next_user_id),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: true,
            is_staff: false,
            created_at: Utc::now(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn insert_referral(&mut self, referrer_id: i64, referee_id: i64) -> StoreResult<Referral> {
        if referrer_id == referee_id {
            return Err(StoreError::SelfReferral);
        }
        if !self.users.contains_key(&referrer_id) || !self.users.contains_key(&referee_id) {
            return Err(StoreError::MissingReference);
        }
        if self.referrals.values().any(|r| r.referee_id == referee_id) {
            return Err(StoreError::UniqueViolation(UniqueField::Referee));
        }

        let referral = Referral {
            id: next_id(&mut self.next_referral_id),
            referrer_id,
            referee_id,
            created_at: Utc::now(),
        };
        self.referrals.insert(referral.id, referral.clone());
        Ok(referral)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(rows: Vec<&T>, page: Page) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let rows = rows
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .cloned()
        .collect();
    (rows, total)
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.tables.write().insert_user(user)
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read();
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read();
        Ok(tables
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn list_users(&self, page: Page) -> StoreResult<(Vec<User>, i64)> {
        let tables = self.tables.read();
        Ok(paginate(tables.users.values().collect(), page))
    }

    async fn update_user_flags(
        &self,
        id: i64,
        is_active: Option<bool>,
        is_staff: Option<bool>,
    ) -> StoreResult<Option<User>> {
        let mut tables = self.tables.write();
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(is_active) = is_active {
            user.is_active = is_active;
        }
        if let Some(is_staff) = is_staff {
            user.is_staff = is_staff;
        }
        Ok(Some(user.clone()))
    }

    async fn create_article(&self, article: NewArticle) -> StoreResult<Article> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(&article.author_id) {
            return Err(StoreError::MissingReference);
        }
        let now = Utc::now();
        let article = Article {
            id: next_id(&mut tables.next_article_id),
            title: article.title,
            content: article.content,
            author_id: Some(article.author_id),
            created_at: now,
            updated_at: now,
        };
        tables.articles.insert(article.id, article.clone());
        Ok(article)
    }

    async fn find_article(&self, id: i64) -> StoreResult<Option<Article>> {
        Ok(self.tables.read().articles.get(&id).cloned())
    }

    async fn list_articles(&self, scope: Scope, page: Page) -> StoreResult<(Vec<Article>, i64)> {
        let tables = self.tables.read();
        let rows = tables
            .articles
            .values()
            .filter(|a| scope.permits(a.author_id))
            .collect();
        Ok(paginate(rows, page))
    }

    async fn update_article(
        &self,
        id: i64,
        changes: &ArticleChanges,
    ) -> StoreResult<Option<Article>> {
        let mut tables = self.tables.write();
        let Some(article) = tables.articles.get_mut(&id) else {
            return Ok(None);
        };
        changes.apply(article, Utc::now());
        Ok(Some(article.clone()))
    }

    async fn delete_article(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.write().articles.remove(&id).is_some())
    }

    async fn create_referral_code(&self, code: NewReferralCode) -> StoreResult<ReferralCode> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(&code.user_id) {
            return Err(StoreError::MissingReference);
        }
        if tables.referral_codes.values().any(|c| c.user_id == code.user_id) {
            return Err(StoreError::UniqueViolation(UniqueField::CodeOwner));
        }
        if tables.referral_codes.values().any(|c| c.code == code.code) {
            return Err(StoreError::UniqueViolation(UniqueField::Code));
        }

        let code = ReferralCode {
            id: next_id(&mut tables.next_code_id),
            user_id: code.user_id,
            code: code.code,
            expiration_date: code.expiration_date,
            created_at: Utc::now(),
        };
        tables.referral_codes.insert(code.id, code.clone());
        Ok(code)
    }

    async fn referral_code_exists(&self, code: &str) -> StoreResult<bool> {
        let tables = self.tables.read();
        Ok(tables.referral_codes.values().any(|c| c.code == code))
    }

    async fn find_referral_code(&self, id: i64) -> StoreResult<Option<ReferralCode>> {
        Ok(self.tables.read().referral_codes.get(&id).cloned())
    }

    async fn find_referral_code_by_value(&self, code: &str) -> StoreResult<Option<ReferralCode>> {
        let tables = self.tables.read();
        Ok(tables.referral_codes.values().find(|c| c.code == code).cloned())
    }

    async fn find_referral_code_for_user(
        &self,
        user_id: i64,
    ) -> StoreResult<Option<ReferralCode>> {
        let tables = self.tables.read();
        Ok(tables
            .referral_codes
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn list_referral_codes(&self, scope: Scope) -> StoreResult<Vec<ReferralCode>> {
        let tables = self.tables.read();
        Ok(tables
            .referral_codes
            .values()
            .filter(|c| scope.permits(Some(c.user_id)))
            .cloned()
            .collect())
    }

    async fn delete_referral_code(
        &self,
        id: i64,
        scope: Scope,
    ) -> StoreResult<Option<ReferralCode>> {
        let mut tables = self.tables.write();
        let visible = tables
            .referral_codes
            .get(&id)
            .map_or(false, |c| scope.permits(Some(c.user_id)));
        if !visible {
            return Ok(None);
        }
        Ok(tables.referral_codes.remove(&id))
    }

    async fn create_user_with_referral(
        &self,
        user: NewUser,
        referrer_id: i64,
    ) -> StoreResult<(User, Referral)> {
        let mut tables = self.tables.write();
        let user = tables.insert_user(user)?;
        match tables.insert_referral(referrer_id, user.id) {
            Ok(referral) => Ok((user, referral)),
            Err(err) => {
                // Undo the user insert so a failed referral leaves no account behind.
                tables.users.remove(&user.id);
                Err(err)
            }
        }
    }

    async fn list_referrals(&self, referrer_id: i64) -> StoreResult<Vec<Referral>> {
        let tables = self.tables.read();
        let mut referrals: Vec<Referral> = tables
            .referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id)
            .cloned()
            .collect();
        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(referrals)
    }
}
