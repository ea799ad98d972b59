//! PostgreSQL store

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{Store, StoreResult};
use crate::models::{
    Article, ArticleChanges, NewArticle, NewReferralCode, NewUser, Page, Referral, ReferralCode,
    Scope, User,
};

#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

/// `None` selects every row, `Some(id)` only rows owned by `id`.
fn owner_filter(scope: Scope) -> Option<i64> {
    match scope {
        Scope::All => None,
        Scope::OwnedBy(id) => Some(id),
    }
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, is_active, is_staff, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, is_active, is_staff, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, is_active, is_staff, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, is_active, is_staff, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self, page: Page) -> StoreResult<(Vec<User>, i64)> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, is_active, is_staff, created_at
            FROM users
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok((users, total))
    }

    async fn update_user_flags(
        &self,
        id: i64,
        is_active: Option<bool>,
        is_staff: Option<bool>,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_active = COALESCE($2, is_active),
                is_staff = COALESCE($3, is_staff)
            WHERE id = $1
            RETURNING id, username, email, password_hash, is_active, is_staff, created_at
            "#,
        )
        .bind(id)
        .bind(is_active)
        .bind(is_staff)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_article(&self, article: NewArticle) -> StoreResult<Article> {
        let article = sqlx::query_as::<_, Article>(
            r#"
            INSERT INTO articles (title, content, author_id)
            VALUES ($1, $2, $3)
            RETURNING id, title, content, author_id, created_at, updated_at
            "#,
        )
        .bind(&article.title)
        .bind(&article.content)
        .bind(article.author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(article)
    }

    async fn find_article(&self, id: i64) -> StoreResult<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(
            "SELECT id, title, content, author_id, created_at, updated_at FROM articles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    async fn list_articles(&self, scope: Scope, page: Page) -> StoreResult<(Vec<Article>, i64)> {
        let owner = owner_filter(scope);

        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, title, content, author_id, created_at, updated_at
            FROM articles
            WHERE ($1::BIGINT IS NULL OR author_id = $1)
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM articles WHERE ($1::BIGINT IS NULL OR author_id = $1)",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        Ok((articles, total))
    }

    async fn update_article(
        &self,
        id: i64,
        changes: &ArticleChanges,
    ) -> StoreResult<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(
            r#"
            UPDATE articles
            SET title = COALESCE($2, title),
                content = COALESCE($3, content),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, title, content, author_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.content)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    async fn delete_article(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_referral_code(&self, code: NewReferralCode) -> StoreResult<ReferralCode> {
        let code = sqlx::query_as::<_, ReferralCode>(
            r#"
            INSERT INTO referral_codes (user_id, code, expiration_date)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, code, expiration_date, created_at
            "#,
        )
        .bind(code.user_id)
        .bind(&code.code)
        .bind(code.expiration_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(code)
    }

    async fn referral_code_exists(&self, code: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM referral_codes WHERE code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn find_referral_code(&self, id: i64) -> StoreResult<Option<ReferralCode>> {
        let code = sqlx::query_as::<_, ReferralCode>(
            "SELECT id, user_id, code, expiration_date, created_at FROM referral_codes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn find_referral_code_by_value(&self, code: &str) -> StoreResult<Option<ReferralCode>> {
        let code = sqlx::query_as::<_, ReferralCode>(
            "SELECT id, user_id, code, expiration_date, created_at FROM referral_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn find_referral_code_for_user(
        &self,
        user_id: i64,
    ) -> StoreResult<Option<ReferralCode>> {
        let code = sqlx::query_as::<_, ReferralCode>(
            "SELECT id, user_id, code, expiration_date, created_at FROM referral_codes WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn list_referral_codes(&self, scope: Scope) -> StoreResult<Vec<ReferralCode>> {
        let codes = sqlx::query_as::<_, ReferralCode>(
            r#"
            SELECT id, user_id, code, expiration_date, created_at
            FROM referral_codes
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
            ORDER BY id
            "#,
        )
        .bind(owner_filter(scope))
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn delete_referral_code(
        &self,
        id: i64,
        scope: Scope,
    ) -> StoreResult<Option<ReferralCode>> {
        let code = sqlx::query_as::<_, ReferralCode>(
            r#"
            DELETE FROM referral_codes
            WHERE id = $1 AND ($2::BIGINT IS NULL OR user_id = $2)
            RETURNING id, user_id, code, expiration_date, created_at
            "#,
        )
        .bind(id)
        .bind(owner_filter(scope))
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    async fn create_user_with_referral(
        &self,
        user: NewUser,
        referrer_id: i64,
    ) -> StoreResult<(User, Referral)> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, is_active, is_staff, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&mut *tx)
        .await?;

        let referral = sqlx::query_as::<_, Referral>(
            r#"
            INSERT INTO referrals (referrer_id, referee_id)
            VALUES ($1, $2)
            RETURNING id, referrer_id, referee_id, created_at
            "#,
        )
        .bind(referrer_id)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;

        // Dropping `tx` on any early return above rolls back the user row.
        tx.commit().await?;

        Ok((user, referral))
    }

    async fn list_referrals(&self, referrer_id: i64) -> StoreResult<Vec<Referral>> {
        let referrals = sqlx::query_as::<_, Referral>(
            r#"
            SELECT id, referrer_id, referee_id, created_at
            FROM referrals
            WHERE referrer_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(referrals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoreError, UniqueField};
    use chrono::{Duration, Utc};

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: Some(format!("{}@example.com", username)),
            password_hash: "hash".to_string(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_user_with_referral_is_linked(pool: PgPool) {
        let store = PgStore { pool };
        let alice = store.create_user(new_user("alice")).await.unwrap();

        let (carol, referral) = store
            .create_user_with_referral(new_user("carol"), alice.id)
            .await
            .unwrap();
        assert_eq!(referral.referrer_id, alice.id);
        assert_eq!(referral.referee_id, carol.id);
        assert!(carol.is_active);
        assert!(!carol.is_staff);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_missing_referrer_rolls_back_user(pool: PgPool) {
        let store = PgStore { pool };

        let err = store
            .create_user_with_referral(new_user("carol"), 4242)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference));
        assert!(store.find_user_by_username("carol").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_unique_constraints_are_decoded(pool: PgPool) {
        let store = PgStore { pool };
        let alice = store.create_user(new_user("alice")).await.unwrap();

        let mut dup = new_user("alice");
        dup.email = Some("other@example.com".to_string());
        let err = store.create_user(dup).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(UniqueField::Username)));

        let mut dup = new_user("bob");
        dup.email = Some("alice@example.com".to_string());
        let err = store.create_user(dup).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(UniqueField::Email)));

        let code = |value: &str| NewReferralCode {
            user_id: alice.id,
            code: value.to_string(),
            expiration_date: Utc::now() + Duration::days(30),
        };
        store.create_referral_code(code("FIRSTCODE")).await.unwrap();
        let err = store.create_referral_code(code("SECONDCODE")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(UniqueField::CodeOwner)));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_referrals_listed_newest_first(pool: PgPool) {
        let store = PgStore { pool };
        let alice = store.create_user(new_user("alice")).await.unwrap();

        let (bob, _) = store
            .create_user_with_referral(new_user("bob"), alice.id)
            .await
            .unwrap();
        let (carol, _) = store
            .create_user_with_referral(new_user("carol"), alice.id)
            .await
            .unwrap();

        let referees: Vec<i64> = store
            .list_referrals(alice.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.referee_id)
            .collect();
        assert_eq!(referees, vec![carol.id, bob.id]);
    }
}
