//! Discord REST client shared by every identity. One reqwest client, with a
//! per-route bucket map honoring Discord's rate-limit headers; a 429 gets a
//! single waited retry before surfacing `RateLimited`.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use muster_core::{AttachmentInfo, ChannelMessage, MusterError, Result};

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord's classic per-message upload ceiling.
pub const MAX_UPLOAD_BYTES: u64 = 8 * 1024 * 1024;

pub struct DiscordRest {
    client: reqwest::Client,
    base_url: String,
    /// Route key → earliest instant the next request may go out.
    buckets: Mutex<HashMap<String, Instant>>,
}

impl DiscordRest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: API_BASE.to_string(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Point the client at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Wait out the bucket for a route, if it is throttled.
    async fn wait_for_bucket(&self, route: &str) {
        let wait = {
            let buckets = self.buckets.lock();
            buckets
                .get(route)
                .and_then(|next| next.checked_duration_since(Instant::now()))
        };
        if let Some(wait) = wait {
            debug!(route, wait_ms = wait.as_millis() as u64, "rate-limit bucket wait");
            tokio::time::sleep(wait).await;
        }
    }

    /// Record the bucket state from response headers.
    fn record_bucket(&self, route: &str, resp: &reqwest::Response) {
        let remaining = header_f64(resp, "x-ratelimit-remaining");
        let reset_after = header_f64(resp, "x-ratelimit-reset-after");
        if let (Some(remaining), Some(reset_after)) = (remaining, reset_after) {
            if remaining < 1.0 {
                self.buckets.lock().insert(
                    route.to_string(),
                    Instant::now() + Duration::from_secs_f64(reset_after.max(0.0)),
                );
            }
        }
    }

    /// Execute a request against a route bucket. On 429, waits the server's
    /// `retry_after` once and retries; a second 429 is surfaced to the
    /// caller as `RateLimited`.
    async fn execute(
        &self,
        route: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        self.wait_for_bucket(route).await;

        let retry = request
            .try_clone()
            .ok_or_else(|| MusterError::Transport("unclonable request".into()))?;

        let resp = request
            .send()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        self.record_bucket(route, &resp);

        if resp.status().as_u16() != 429 {
            return map_status(route, resp).await;
        }

        let retry_after = retry_after_secs(&resp).unwrap_or(1.0);
        warn!(route, retry_after, "rate limited by Discord, retrying once");
        tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;

        let resp = retry
            .send()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        self.record_bucket(route, &resp);
        if resp.status().as_u16() == 429 {
            let secs = retry_after_secs(&resp).unwrap_or(1.0).ceil() as u64;
            return Err(MusterError::RateLimited {
                retry_after_secs: secs.max(1),
            });
        }
        map_status(route, resp).await
    }

    pub async fn create_message(
        &self,
        token: &str,
        bot: &str,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let mut body = json!({ "content": content });
        if let Some(message_id) = reply_to {
            body["message_reference"] = json!({ "message_id": message_id });
        }
        let route = format!("{bot}:POST:/channels/{channel_id}/messages");
        let req = self
            .client
            .post(format!("{}/channels/{}/messages", self.base_url, channel_id))
            .header("Authorization", format!("Bot {token}"))
            .header("Content-Type", "application/json")
            .json(&body);
        let resp = self.execute(&route, req).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MusterError::Transport("no message id in response".into()))
    }

    pub async fn upload_file(
        &self,
        token: &str,
        bot: &str,
        channel_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content: Option<&str>,
    ) -> Result<String> {
        let size = bytes.len() as u64;
        if size > MAX_UPLOAD_BYTES {
            return Err(MusterError::FileTooLarge {
                size,
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let payload = json!({ "content": content.unwrap_or("") });
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", part);

        // Multipart bodies are not retryable, so this bypasses the 429
        // single-retry and surfaces the limit directly.
        let route = format!("{bot}:POST:/channels/{channel_id}/messages");
        self.wait_for_bucket(&route).await;
        let resp = self
            .client
            .post(format!("{}/channels/{}/messages", self.base_url, channel_id))
            .header("Authorization", format!("Bot {token}"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        self.record_bucket(&route, &resp);
        let resp = map_status(&route, resp).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MusterError::Transport("no message id in response".into()))
    }

    /// Channel history. Discord returns newest-first; this reverses to
    /// oldest → newest for prompt assembly.
    pub async fn get_messages(
        &self,
        token: &str,
        bot: &str,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<ChannelMessage>> {
        let route = format!("{bot}:GET:/channels/{channel_id}/messages");
        let mut req = self
            .client
            .get(format!("{}/channels/{}/messages", self.base_url, channel_id))
            .header("Authorization", format!("Bot {token}"))
            .query(&[("limit", limit.clamp(1, 100).to_string())]);
        if let Some(before) = before {
            req = req.query(&[("before", before)]);
        }
        let resp = self.execute(&route, req).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;

        let mut messages: Vec<ChannelMessage> = data
            .as_array()
            .map(|items| items.iter().filter_map(parse_channel_message).collect())
            .unwrap_or_default();
        messages.reverse();
        Ok(messages)
    }

    pub async fn get_guild_channels(
        &self,
        token: &str,
        bot: &str,
        guild_id: &str,
    ) -> Result<Value> {
        let route = format!("{bot}:GET:/guilds/{guild_id}/channels");
        let req = self
            .client
            .get(format!("{}/guilds/{}/channels", self.base_url, guild_id))
            .header("Authorization", format!("Bot {token}"));
        let resp = self.execute(&route, req).await?;
        resp.json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))
    }

    pub async fn get_user_guilds(&self, token: &str, bot: &str) -> Result<Value> {
        let route = format!("{bot}:GET:/users/@me/guilds");
        let req = self
            .client
            .get(format!("{}/users/@me/guilds", self.base_url))
            .header("Authorization", format!("Bot {token}"));
        let resp = self.execute(&route, req).await?;
        resp.json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))
    }

    pub async fn get_guild(&self, token: &str, bot: &str, guild_id: &str) -> Result<Value> {
        let route = format!("{bot}:GET:/guilds/{guild_id}");
        let req = self
            .client
            .get(format!("{}/guilds/{}", self.base_url, guild_id))
            .header("Authorization", format!("Bot {token}"));
        let resp = self.execute(&route, req).await?;
        resp.json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))
    }

    pub async fn get_message_attachments(
        &self,
        token: &str,
        bot: &str,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Vec<AttachmentInfo>> {
        let route = format!("{bot}:GET:/channels/{channel_id}/messages/id");
        let req = self
            .client
            .get(format!(
                "{}/channels/{}/messages/{}",
                self.base_url, channel_id, message_id
            ))
            .header("Authorization", format!("Bot {token}"));
        let resp = self.execute(&route, req).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        Ok(crate::connection::parse_attachments(&data))
    }

    /// Fetch attachment bytes from Discord's CDN.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MusterError::Transport(format!(
                "attachment download failed: HTTP {}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| MusterError::Transport(e.to_string()))
    }

    pub async fn start_thread(
        &self,
        token: &str,
        bot: &str,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String> {
        let route = format!("{bot}:POST:/channels/{channel_id}/threads");
        let req = self
            .client
            .post(format!(
                "{}/channels/{}/messages/{}/threads",
                self.base_url, channel_id, message_id
            ))
            .header("Authorization", format!("Bot {token}"))
            .json(&json!({ "name": name }));
        let resp = self.execute(&route, req).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| MusterError::Transport(e.to_string()))?;
        data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MusterError::Transport("no thread id in response".into()))
    }
}

/// Map non-success statuses into the error taxonomy.
async fn map_status(route: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        401 | 403 => MusterError::Forbidden(format!("{route}: {body}")),
        404 => MusterError::UnknownChannel(format!("{route}: not found")),
        413 => MusterError::FileTooLarge {
            size: 0,
            limit: MAX_UPLOAD_BYTES,
        },
        s if s >= 500 => MusterError::Transport(format!("HTTP {s}: {body}")),
        s => MusterError::Transport(format!("HTTP {s}: {body}")),
    })
}

fn header_f64(resp: &reqwest::Response, name: &str) -> Option<f64> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
}

/// `retry_after` from the JSON body header, in seconds.
fn retry_after_secs(resp: &reqwest::Response) -> Option<f64> {
    header_f64(resp, "retry-after").or_else(|| header_f64(resp, "x-ratelimit-reset-after"))
}

fn parse_channel_message(data: &Value) -> Option<ChannelMessage> {
    Some(ChannelMessage {
        id: data["id"].as_str()?.to_string(),
        channel_id: data["channel_id"].as_str().unwrap_or("").to_string(),
        author_id: data["author"]["id"].as_str().unwrap_or("").to_string(),
        author_name: data["author"]["username"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
        is_bot: data["author"]["bot"].as_bool().unwrap_or(false),
        content: data["content"].as_str().unwrap_or("").to_string(),
        timestamp: data["timestamp"]
            .as_str()
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now),
    })
}
