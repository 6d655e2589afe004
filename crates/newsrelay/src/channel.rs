use reqwest::Client;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::{debug, info, warn};

use crate::USER_AGENT;
use crate::config::TelegramConfig;

const LOG_TARGET: &str = "newsrelay::channel";

/// Telegram's limit on photo captions, in characters
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Snafu)]
pub enum PublishError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Bot API request failed: {source}"))]
    Request { source: reqwest::Error },
    #[snafu(display("Bot API error {code:?}: {description}"))]
    Api {
        code: Option<i64>,
        description: String,
    },
    #[snafu(display("Bot API response without a message id"))]
    MissingMessageId,
}

pub type PublishResult<T> = std::result::Result<T, PublishError>;

/// A post ready for the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPost {
    /// HTML formatted text
    pub text: String,
    pub image_url: Option<String>,
}

#[async_trait::async_trait]
pub trait PublishChannel: Send + Sync {
    /// Publish a post, returning the permalink of the published message
    async fn publish(&self, post: &OutboundPost) -> PublishResult<String>;
}

/// Public link of message `message_id` in `channel_id`
///
/// `@name` channels get `https://t.me/name/id`, numeric ids (with or without
/// the `-100` supergroup prefix) the private `https://t.me/c/internal/id`
/// form.
pub fn permalink(channel_id: &str, message_id: i64) -> String {
    let channel_id = channel_id.trim();
    if let Some(name) = channel_id.strip_prefix('@') {
        return format!("https://t.me/{name}/{message_id}");
    }

    let digits = channel_id.trim_start_matches('-');
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        let internal = channel_id
            .strip_prefix("-100")
            .filter(|rest| !rest.is_empty())
            .unwrap_or(digits);
        return format!("https://t.me/c/{internal}/{message_id}");
    }

    format!("https://t.me/{channel_id}/{message_id}")
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl BotApiResponse {
    fn into_message_id(self) -> PublishResult<i64> {
        if !self.ok {
            return ApiSnafu {
                code: self.error_code,
                description: self.description.unwrap_or_default(),
            }
            .fail();
        }
        self.result
            .map(|m| m.message_id)
            .context(MissingMessageIdSnafu)
    }
}

/// Telegram Bot API channel
pub struct TelegramChannel {
    client: Client,
    config: TelegramConfig,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> PublishResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context(ClientSnafu)?;
        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_url.as_str().trim_end_matches('/'),
            self.config.bot_token.expose()
        )
    }

    /// Errors never carry the request URL, as it embeds the bot token
    async fn call(&self, method: &str, body: &impl Serialize) -> PublishResult<i64> {
        let response: BotApiResponse = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context(RequestSnafu)?
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context(RequestSnafu)?;
        response.into_message_id()
    }

    async fn send_once(&self, post: &OutboundPost) -> PublishResult<i64> {
        let chat_id = self.config.channel_id.as_str();

        match post.image_url.as_deref() {
            Some(photo) if post.text.chars().count() <= MAX_CAPTION_CHARS => {
                self.call(
                    "sendPhoto",
                    &SendPhoto {
                        chat_id,
                        photo,
                        caption: &post.text,
                        parse_mode: "HTML",
                    },
                )
                .await
            }
            image => {
                if image.is_some() {
                    debug!(target: LOG_TARGET, "Text too long for a caption, sending without image");
                }
                self.call(
                    "sendMessage",
                    &SendMessage {
                        chat_id,
                        text: &post.text,
                        parse_mode: "HTML",
                    },
                )
                .await
            }
        }
    }
}

#[async_trait::async_trait]
impl PublishChannel for TelegramChannel {
    async fn publish(&self, post: &OutboundPost) -> PublishResult<String> {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_once(post).await {
                Ok(message_id) => {
                    let link = permalink(&self.config.channel_id, message_id);
                    info!(target: LOG_TARGET, %link, attempt, "Published post");
                    return Ok(link);
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        target: LOG_TARGET,
                        err = %err,
                        attempt,
                        attempts,
                        "Publishing failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
