use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signs and validates bearer tokens handed to third-party applications.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    bearer_ttl: Duration,
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerClaims {
    /// Subject (profile ID)
    pub sub: String,
    /// Audience (client ID)
    pub aud: String,
    /// Bound context ID
    pub ctx: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Token ID, also the key of the server-side record
    pub jti: String,
}

/// A freshly signed bearer token.
#[derive(Debug, Clone)]
pub struct SignedBearer {
    pub token: String,
    pub token_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JwtService {
    pub fn new(secret: &str, issuer: &str, bearer_ttl: Duration) -> Result<Self, anyhow::Error> {
        if secret.len() < 32 {
            anyhow::bail!("Token signing secret must be at least 32 bytes");
        }

        tracing::info!("JWT service initialized with HS256 key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            bearer_ttl,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a bearer token bound to (profile, client, context).
    pub fn issue_bearer(
        &self,
        profile_id: Uuid,
        client_id: &str,
        context_id: Uuid,
    ) -> Result<SignedBearer, anyhow::Error> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.bearer_ttl;
        let token_id = Uuid::new_v4();

        let claims = BearerClaims {
            sub: profile_id.to_string(),
            aud: client_id.to_string(),
            ctx: context_id.to_string(),
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: token_id.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode bearer token: {}", e))?;

        Ok(SignedBearer {
            token,
            token_id,
            issued_at,
            expires_at,
        })
    }

    /// Check signature, issuer and expiry.
    pub fn validate_bearer(&self, token: &str) -> Result<BearerClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        // The audience is whichever client the token was issued to.
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);

        decode::<BearerClaims>(token, &self.decoding_key, &validation).map(|data| data.claims)
    }
}
