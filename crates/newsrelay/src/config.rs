// Prompt templates use `{placeholder}` syntax
#![allow(clippy::literal_string_with_formatting_args)]

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use newsrelay_db::DEFAULT_RECENT_WINDOW;
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use url::Url;

/// Placeholder replaced with the cleaned article text
pub const ARTICLE_TEXT_PLACEHOLDER: &str = "{article_text}";
/// Placeholder replaced with the article link
pub const ARTICLE_LINK_PLACEHOLDER: &str = "{article_link}";

pub const DEFAULT_FILTER_PROMPT: &str = "\
You are screening articles for a technology news channel. Decide whether the \
article below is a genuine news story about technology, science or software, \
rather than an advertisement, sponsored content, a deal or discount post, or a \
promotional announcement.

Article:
{article_text}

Answer with exactly one word: \"Yes\" if it is relevant news, otherwise \"No\".";

pub const DEFAULT_SUMMARY_PROMPT: &str = "\
Write a short Telegram post (at most 700 characters) summarizing the article \
below for a technology news channel. Start with a bold headline wrapped in \
<b></b> tags, followed by two or three plain sentences with the key facts and \
one fitting emoji. Finish with 2 to 4 relevant hashtags and then the source \
link: {article_link}
Only use the <b>, <i> and <a> HTML tags. Do not invent facts.

Article:
{article_text}";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Missing required setting {key}"))]
    Missing { key: &'static str },
    #[snafu(display("No feeds configured in RSS_FEEDS"))]
    NoFeeds,
    #[snafu(display("Invalid URL in {key}: {value}: {source}"))]
    InvalidUrl {
        key: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[snafu(display("{key} must contain the {placeholder} placeholder"))]
    MissingPlaceholder {
        key: &'static str,
        placeholder: &'static str,
    },
    #[snafu(display("{key} must be greater than zero"))]
    Zero { key: &'static str },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A credential that never shows up in logs or `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Relay settings, read from command line flags or the environment
///
/// Credentials are optional here so that `dev` commands work without them;
/// [`Config::from_opts`] enforces them for the relay itself.
#[derive(Debug, Clone, clap::Args)]
pub struct RelayOpts {
    /// Comma separated list of feed URLs
    #[arg(long, env = "RSS_FEEDS", value_delimiter = ',')]
    pub rss_feeds: Vec<String>,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_API_KEY", hide_env_values = true)]
    pub telegram_bot_api_key: Option<String>,

    /// Target channel: `@name` or a numeric chat id
    #[arg(long, env = "TELEGRAM_CHANNEL_ID")]
    pub telegram_channel_id: Option<String>,

    #[arg(long, env = "TELEGRAM_API_URL", default_value = DEFAULT_TELEGRAM_API_URL)]
    pub telegram_api_url: String,

    /// OpenAI-compatible API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// Relevance prompt, must contain `{article_text}`
    #[arg(long, env = "OPENAI_FILTER_PROMPT")]
    pub openai_filter_prompt: Option<String>,

    /// Summary prompt, must contain `{article_text}`; `{article_link}` is
    /// optional
    #[arg(long, env = "OPENAI_SUMMARY_PROMPT")]
    pub openai_summary_prompt: Option<String>,

    /// Path of the record store
    #[arg(long, env = "DB_FILE")]
    pub db_file: Option<PathBuf>,

    /// Default log level, `RUST_LOG` takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "CYCLE_INTERVAL_MINUTES", default_value_t = 60)]
    pub cycle_interval_minutes: u64,

    /// Start cycles on interval boundaries (e.g. top of the hour)
    #[arg(
        long,
        env = "ALIGN_TO_INTERVAL",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub align_to_interval: bool,

    #[arg(long, env = "RETENTION_DAYS", default_value_t = 7)]
    pub retention_days: u64,

    /// Optional cap on the number of stored records
    #[arg(long, env = "MAX_RECORDS")]
    pub max_records: Option<usize>,

    /// Number of recent titles compared against each candidate
    #[arg(long, env = "SIMILARITY_WINDOW", default_value_t = DEFAULT_RECENT_WINDOW)]
    pub similarity_window: usize,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub http_timeout_secs: u64,

    #[arg(long, env = "AI_TIMEOUT_SECS", default_value_t = 30)]
    pub ai_timeout_secs: u64,

    #[arg(long, env = "PUBLISH_ATTEMPTS", default_value_t = 3)]
    pub publish_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct Prompts {
    pub filter: String,
    pub summary: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER_PROMPT.to_owned(),
            summary: DEFAULT_SUMMARY_PROMPT.to_owned(),
        }
    }
}

/// Fill a prompt template with the article text and link
pub fn render_prompt(template: &str, article_text: &str, article_link: &str) -> String {
    template
        .replace(ARTICLE_LINK_PLACEHOLDER, article_link)
        .replace(ARTICLE_TEXT_PLACEHOLDER, article_text)
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: Url,
    pub api_key: Secret,
    pub model: String,
    pub timeout: Duration,
    pub prompts: Prompts,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: Url,
    pub bot_token: Secret,
    pub channel_id: String,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_records: Option<usize>,
}

/// Validated, immutable configuration of the relay
#[derive(Debug, Clone)]
pub struct Config {
    pub feeds: Vec<String>,
    pub telegram: TelegramConfig,
    pub openai: OpenAiConfig,
    pub db_file: PathBuf,
    pub cycle_interval: Duration,
    pub align_to_interval: bool,
    pub retention: RetentionPolicy,
    pub similarity_window: usize,
    pub http_timeout: Duration,
}

impl Config {
    pub const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(5);

    pub fn from_opts(opts: &RelayOpts) -> ConfigResult<Self> {
        let feeds = parse_feed_list(&opts.rss_feeds)?;

        let bot_token = non_empty(&opts.telegram_bot_api_key).context(MissingSnafu {
            key: "TELEGRAM_BOT_API_KEY",
        })?;
        let channel_id = non_empty(&opts.telegram_channel_id).context(MissingSnafu {
            key: "TELEGRAM_CHANNEL_ID",
        })?;
        let api_key = non_empty(&opts.openai_api_key).context(MissingSnafu {
            key: "OPENAI_API_KEY",
        })?;
        let db_file = opts.db_file()?;

        let prompts = Prompts {
            filter: prompt_or_default(
                &opts.openai_filter_prompt,
                "OPENAI_FILTER_PROMPT",
                DEFAULT_FILTER_PROMPT,
            )?,
            summary: prompt_or_default(
                &opts.openai_summary_prompt,
                "OPENAI_SUMMARY_PROMPT",
                DEFAULT_SUMMARY_PROMPT,
            )?,
        };

        ensure!(
            0 < opts.cycle_interval_minutes,
            ZeroSnafu {
                key: "CYCLE_INTERVAL_MINUTES"
            }
        );
        ensure!(
            0 < opts.publish_attempts,
            ZeroSnafu {
                key: "PUBLISH_ATTEMPTS"
            }
        );
        ensure!(
            0 < opts.retention_days,
            ZeroSnafu {
                key: "RETENTION_DAYS"
            }
        );
        ensure!(
            opts.max_records != Some(0),
            ZeroSnafu { key: "MAX_RECORDS" }
        );
        ensure!(
            0 < opts.http_timeout_secs,
            ZeroSnafu {
                key: "HTTP_TIMEOUT_SECS"
            }
        );
        ensure!(
            0 < opts.ai_timeout_secs,
            ZeroSnafu {
                key: "AI_TIMEOUT_SECS"
            }
        );

        let http_timeout = Duration::from_secs(opts.http_timeout_secs);

        Ok(Self {
            feeds,
            telegram: TelegramConfig {
                api_url: parse_url("TELEGRAM_API_URL", &opts.telegram_api_url)?,
                bot_token: Secret::new(bot_token),
                channel_id: channel_id.to_owned(),
                attempts: opts.publish_attempts,
                retry_delay: Self::PUBLISH_RETRY_DELAY,
                timeout: http_timeout,
            },
            openai: OpenAiConfig {
                base_url: parse_url("OPENAI_BASE_URL", &opts.openai_base_url)?,
                api_key: Secret::new(api_key),
                model: opts.openai_model.clone(),
                timeout: Duration::from_secs(opts.ai_timeout_secs),
                prompts,
            },
            db_file,
            cycle_interval: Duration::from_secs(opts.cycle_interval_minutes * 60),
            align_to_interval: opts.align_to_interval,
            retention: RetentionPolicy {
                max_age: Duration::from_secs(opts.retention_days * 24 * 60 * 60),
                max_records: opts.max_records,
            },
            similarity_window: opts.similarity_window,
            http_timeout,
        })
    }
}

impl RelayOpts {
    pub fn db_file(&self) -> ConfigResult<PathBuf> {
        self.db_file
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
            .context(MissingSnafu { key: "DB_FILE" })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Trim, drop empty entries and check every entry is an absolute URL
pub fn parse_feed_list(raw: &[String]) -> ConfigResult<Vec<String>> {
    let mut feeds = vec![];
    for entry in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let url = parse_url("RSS_FEEDS", entry)?;
        feeds.push(url.to_string());
    }
    ensure!(!feeds.is_empty(), NoFeedsSnafu);
    Ok(feeds)
}

fn parse_url(key: &'static str, value: &str) -> ConfigResult<Url> {
    Url::parse(value.trim()).context(InvalidUrlSnafu { key, value })
}

fn prompt_or_default(
    value: &Option<String>,
    key: &'static str,
    default: &str,
) -> ConfigResult<String> {
    let Some(prompt) = non_empty(value) else {
        return Ok(default.to_owned());
    };
    ensure!(
        prompt.contains(ARTICLE_TEXT_PLACEHOLDER),
        MissingPlaceholderSnafu {
            key,
            placeholder: ARTICLE_TEXT_PLACEHOLDER,
        }
    );
    Ok(prompt.to_owned())
}
