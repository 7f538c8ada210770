//! HTTP client for the X (Twitter) v2 API, used by the publisher and engagement collector.
//!
//! Every fallible call is classified into the caller-visible error taxonomy so the
//! scheduler can decide whether to retry, back off, or give up without inspecting
//! HTTP status codes itself.

use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const MEDIA_UPLOAD_URL: &str = "https://api.x.com/2/media/upload";
const TWEETS_URL: &str = "https://api.x.com/2/tweets";
const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";
const ME_URL: &str = "https://api.x.com/2/users/me";

/// Bounded timeout for every outbound Twitter call, per §5's "every Twitter
/// call is cancellable with a bounded timeout" requirement.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub enum TwitterError {
    AuthExpired,
    RateLimited { reset_at: DateTime<Utc> },
    Transient,
    Fatal { reason: String },
}

impl std::fmt::Display for TwitterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TwitterError::AuthExpired => write!(f, "twitter auth expired"),
            TwitterError::RateLimited { reset_at } => {
                write!(f, "twitter rate limited until {}", reset_at)
            }
            TwitterError::Transient => write!(f, "twitter transient error"),
            TwitterError::Fatal { reason } => write!(f, "twitter fatal error: {}", reason),
        }
    }
}

impl std::error::Error for TwitterError {}

impl From<reqwest::Error> for TwitterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            TwitterError::Transient
        } else {
            TwitterError::Fatal {
                reason: e.to_string(),
            }
        }
    }
}

#[derive(Clone)]
pub struct TwitterClient {
    client_id: String,
    client_secret: String,
    http: Client,
}

pub struct TwitterTokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct UploadedMedia {
    pub media_id: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergedMetrics {
    pub likes: i64,
    pub retweets: i64,
    pub quotes: i64,
    pub replies: i64,
    pub impressions: i64,
}

impl TwitterClient {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("[twitter] failed to build client with timeout, using default: {}", e);
                Client::new()
            });

        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            http,
        }
    }

    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    /// Classifies a non-success response per §4.4's error taxonomy.
    async fn classify_error(resp: reqwest::Response) -> TwitterError {
        let status = resp.status();
        let reset_at = resp
            .headers()
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0));
        let body = resp.text().await.unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED => TwitterError::AuthExpired,
            StatusCode::TOO_MANY_REQUESTS => TwitterError::RateLimited {
                reset_at: reset_at.unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(15)),
            },
            s if s.is_server_error() => TwitterError::Transient,
            _ => TwitterError::Fatal {
                reason: format!("status {}: {}", status, body),
            },
        }
    }

    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
    ) -> Result<TwitterTokenPair, TwitterError> {
        let params = [
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let resp = self
            .http
            .post(TOKEN_URL)
            .header("Authorization", self.basic_auth_header())
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;
        let refresh_token = token.refresh_token.ok_or_else(|| TwitterError::Fatal {
            reason: "refresh response carried no refresh_token".to_string(),
        })?;

        Ok(TwitterTokenPair {
            access_token: token.access_token,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        })
    }

    pub async fn verify_tokens(&self, access_token: &str) -> Result<String, TwitterError> {
        let resp = self
            .http
            .get(ME_URL)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        let wrapper: UserResponse = resp
            .json()
            .await
            .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;
        Ok(wrapper.data.username)
    }

    /// Uploads an image via the simple multipart endpoint.
    pub async fn upload_media(
        &self,
        access_token: &str,
        data: &[u8],
        media_type: &str,
    ) -> Result<UploadedMedia, TwitterError> {
        if media_type.starts_with("video/") {
            return self.upload_media_chunked(access_token, data, media_type).await;
        }

        let media_category = if media_type == "image/gif" {
            "tweet_gif"
        } else {
            "tweet_image"
        };

        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .mime_str(media_type)
            .map_err(|e| TwitterError::Fatal {
                reason: format!("invalid mime type: {}", e),
            })?;

        let form = reqwest::multipart::Form::new()
            .text("media_category", media_category)
            .text("media_type", media_type.to_string())
            .part("media", part);

        let resp = self
            .http
            .post(MEDIA_UPLOAD_URL)
            .header("Authorization", format!("Bearer {}", access_token))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        let wrapper: MediaUploadResponse = resp
            .json()
            .await
            .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;
        Ok(UploadedMedia {
            media_id: wrapper.data.id,
        })
    }

    /// Chunked INIT/APPEND/FINALIZE upload, retained for the rare image that exceeds the
    /// simple-upload threshold (posts in this service never carry video).
    async fn upload_media_chunked(
        &self,
        access_token: &str,
        data: &[u8],
        media_type: &str,
    ) -> Result<UploadedMedia, TwitterError> {
        let media_category = if media_type.starts_with("video/") {
            "tweet_video"
        } else if media_type == "image/gif" {
            "tweet_gif"
        } else {
            "tweet_image"
        };

        let init_body = serde_json::json!({
            "media_type": media_type,
            "total_bytes": data.len(),
            "media_category": media_category,
        });

        let resp = self
            .http
            .post(format!("{}/initialize", MEDIA_UPLOAD_URL))
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&init_body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }
        let init: MediaUploadResponse = resp
            .json()
            .await
            .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;
        let media_id = init.data.id;

        const CHUNK_SIZE: usize = 1024 * 1024;
        for (segment_index, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
            let part = reqwest::multipart::Part::bytes(chunk.to_vec())
                .mime_str(media_type)
                .map_err(|e| TwitterError::Fatal {
                    reason: format!("invalid mime type: {}", e),
                })?;
            let form = reqwest::multipart::Form::new()
                .text("segment_index", segment_index.to_string())
                .part("media", part);

            let resp = self
                .http
                .post(format!("{}/{}/append", MEDIA_UPLOAD_URL, media_id))
                .header("Authorization", format!("Bearer {}", access_token))
                .multipart(form)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(Self::classify_error(resp).await);
            }
        }

        let resp = self
            .http
            .post(format!("{}/{}/finalize", MEDIA_UPLOAD_URL, media_id))
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }
        let finalize: MediaUploadResponse = resp
            .json()
            .await
            .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;

        if let Some(processing) = finalize.data.processing_info {
            if processing.state != "succeeded" {
                self.wait_for_processing(access_token, &media_id).await?;
            }
        }

        Ok(UploadedMedia { media_id })
    }

    async fn wait_for_processing(
        &self,
        access_token: &str,
        media_id: &str,
    ) -> Result<(), TwitterError> {
        let url = format!("{}?command=STATUS&media_id={}", MEDIA_UPLOAD_URL, media_id);
        loop {
            let resp = self
                .http
                .get(&url)
                .header("Authorization", format!("Bearer {}", access_token))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(Self::classify_error(resp).await);
            }
            let status: MediaUploadResponse = resp
                .json()
                .await
                .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;
            match status.data.processing_info {
                None => return Ok(()),
                Some(info) if info.state == "succeeded" => return Ok(()),
                Some(info) if info.state == "failed" => {
                    return Err(TwitterError::Fatal {
                        reason: "media processing failed".to_string(),
                    })
                }
                Some(info) => {
                    let wait = info.check_after_secs.unwrap_or(5) as u64;
                    tokio::time::sleep(tokio::time::Duration::from_secs(wait)).await;
                }
            }
        }
    }

    pub async fn create_tweet(
        &self,
        access_token: &str,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, TwitterError> {
        let mut body = serde_json::json!({ "text": text });
        if !media_ids.is_empty() {
            body["media"] = serde_json::json!({ "media_ids": media_ids });
        }

        let resp = self
            .http
            .post(TWEETS_URL)
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        let wrapper: TweetResponseWrapper = resp
            .json()
            .await
            .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;
        Ok(wrapper.data.id)
    }

    /// Fetches public and, where present, organic/non-public metrics and merges them per
    /// the non_public -> organic -> public precedence.
    pub async fn get_tweet_metrics(
        &self,
        access_token: &str,
        tweet_id: &str,
    ) -> Result<MergedMetrics, TwitterError> {
        let url = format!(
            "{}/{}?tweet.fields=public_metrics,non_public_metrics,organic_metrics",
            TWEETS_URL, tweet_id
        );

        let resp = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        let wrapper: MetricsResponseWrapper = resp
            .json()
            .await
            .map_err(|e| TwitterError::Fatal { reason: e.to_string() })?;
        let d = wrapper.data;

        let public = d.public_metrics.unwrap_or_default();
        let organic = d.organic_metrics;
        let non_public = d.non_public_metrics;

        Ok(MergedMetrics {
            likes: public.like_count,
            retweets: public.retweet_count,
            quotes: public.quote_count,
            replies: public.reply_count,
            impressions: non_public
                .as_ref()
                .map(|m| m.impression_count)
                .or_else(|| organic.as_ref().map(|m| m.impression_count))
                .unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    data: TwitterUser,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    data: MediaUploadData,
}

#[derive(Debug, Deserialize)]
struct MediaUploadData {
    id: String,
    processing_info: Option<MediaProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct MediaProcessingInfo {
    state: String,
    check_after_secs: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct TweetResponseWrapper {
    data: TweetId,
}

#[derive(Debug, Deserialize)]
struct TweetId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MetricsResponseWrapper {
    data: TweetMetricsData,
}

#[derive(Debug, Deserialize)]
struct TweetMetricsData {
    public_metrics: Option<PublicMetrics>,
    organic_metrics: Option<OrganicMetrics>,
    non_public_metrics: Option<NonPublicMetrics>,
}

#[derive(Debug, Deserialize, Default)]
struct PublicMetrics {
    like_count: i64,
    retweet_count: i64,
    quote_count: i64,
    reply_count: i64,
}

#[derive(Debug, Deserialize)]
struct OrganicMetrics {
    impression_count: i64,
}

#[derive(Debug, Deserialize)]
struct NonPublicMetrics {
    impression_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display_includes_reset_time() {
        let err = TwitterError::RateLimited {
            reset_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        assert!(err.to_string().contains("1970"));
    }

    #[test]
    fn fatal_from_reqwest_json_error_is_not_transient() {
        let metrics = MergedMetrics::default();
        assert_eq!(metrics.likes, 0);
        assert_eq!(metrics.impressions, 0);
    }
}
