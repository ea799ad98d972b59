use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,       // User id
    pub exp: i64,          // Expiration time
    pub iat: i64,          // Issued at
    pub jti: String,       // Token id
    pub token_type: TokenType,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
    pub access_expires_at: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
}

impl JwtManager {
    pub fn new(secret: &str, access_ttl_seconds: u64, refresh_ttl_seconds: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    fn generate_token(
        &self,
        user_id: i64,
        token_type: TokenType,
    ) -> jsonwebtoken::errors::Result<(String, i64)> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl_seconds,
            TokenType::Refresh => self.refresh_ttl_seconds,
        };
        let now = Utc::now();
        let exp = (now + Duration::seconds(ttl as i64)).timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            exp,
            iat: now.timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
            token_type,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, exp))
    }

    pub fn generate_access_token(&self, user_id: i64) -> jsonwebtoken::errors::Result<(String, i64)> {
        self.generate_token(user_id, TokenType::Access)
    }

    pub fn generate_pair(&self, user_id: i64) -> jsonwebtoken::errors::Result<TokenPair> {
        let (refresh, _) = self.generate_token(user_id, TokenType::Refresh)?;
        let (access, access_expires_at) = self.generate_token(user_id, TokenType::Access)?;
        Ok(TokenPair {
            refresh,
            access,
            access_expires_at,
        })
    }

    /// Verify signature and expiry, whatever the token type.
    pub fn verify_token(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        let token_data: TokenData<Claims> =
            decode(token, &self.decoding_key, &Validation::default())?;
        Ok(token_data.claims)
    }

    /// Verify a token and require it to be of `expected` type.
    pub fn verify_token_of_type(&self, token: &str, expected: TokenType) -> Option<Claims> {
        self.verify_token(token)
            .ok()
            .filter(|claims| claims.token_type == expected)
    }
}
