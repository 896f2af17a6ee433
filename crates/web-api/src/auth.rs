//! JWT 认证模块
//!
//! 令牌由账户服务签发，这里只负责验证并取出用户 ID。

use axum::http::HeaderMap;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: user_id.as_i64(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    /// 从 headers 中提取和验证 token
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        self.extract_user_from_token(token)
    }

    pub fn extract_user_from_token(&self, token: &str) -> Result<UserId, ApiError> {
        let claims = self.verify_token(token)?;
        Ok(UserId::new(claims.user_id))
    }

    /// 浏览器的 EventSource 无法设置请求头，允许用查询参数代替
    pub fn extract_user(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<UserId, ApiError> {
        match query_token {
            Some(token) if !headers.contains_key(axum::http::header::AUTHORIZATION) => {
                self.extract_user_from_token(token)
            }
            _ => self.extract_user_from_headers(headers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "test-secret-key-with-at-least-32-characters".into(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn token_round_trips_user_id() {
        let jwt = service();
        let token = jwt.generate_token(UserId::new(42)).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(jwt.extract_user_from_headers(&headers).unwrap(), UserId::new(42));
        assert_eq!(jwt.extract_user(&HeaderMap::new(), Some(&token)).unwrap(), UserId::new(42));
    }

    #[test]
    fn rejects_foreign_and_malformed_tokens() {
        let other = JwtService::new(JwtConfig {
            secret: "another-secret-key-with-at-least-32-characters".into(),
            expiration_hours: 1,
        });
        let token = other.generate_token(UserId::new(1)).unwrap();
        assert!(service().extract_user_from_token(&token).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Token abc"),
        );
        assert!(service().extract_user_from_headers(&headers).is_err());
        assert!(service().extract_user(&HeaderMap::new(), None).is_err());
    }
}
