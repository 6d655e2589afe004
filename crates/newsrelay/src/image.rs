use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info, warn};

use crate::USER_AGENT;

const LOG_TARGET: &str = "newsrelay::image";

/// Smallest width and height of an image worth attaching
pub const MIN_IMAGE_SIDE: usize = 300;

#[derive(Debug, Snafu)]
pub enum ImageError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
}

#[async_trait::async_trait]
pub trait ImageProbe: Send + Sync {
    /// Whether the image at `url` can be attached to a post
    ///
    /// Failures count as "not usable", they are never errors.
    async fn is_usable(&self, url: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVerdict {
    Usable,
    NotAnImage,
    TooSmall { width: usize, height: usize },
}

/// Decide on a downloaded image from its content type and bytes
///
/// Dimensions that can't be read are not held against the image.
pub fn judge_image(content_type: Option<&str>, bytes: &[u8]) -> ImageVerdict {
    if !content_type.is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/")) {
        return ImageVerdict::NotAnImage;
    }

    match imagesize::blob_size(bytes) {
        Ok(size) if size.width < MIN_IMAGE_SIDE || size.height < MIN_IMAGE_SIDE => {
            ImageVerdict::TooSmall {
                width: size.width,
                height: size.height,
            }
        }
        Ok(_) => ImageVerdict::Usable,
        Err(err) => {
            debug!(target: LOG_TARGET, err = %err, "Unable to read image dimensions");
            ImageVerdict::Usable
        }
    }
}

pub struct HttpImageProbe {
    client: Client,
}

impl HttpImageProbe {
    pub fn new(timeout: Duration) -> Result<Self, ImageError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context(ClientSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ImageProbe for HttpImageProbe {
    async fn is_usable(&self, url: &str) -> bool {
        let response = match self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response,
            Err(err) => {
                warn!(target: LOG_TARGET, %url, err = %err, "Failed to load image");
                return false;
            }
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: LOG_TARGET, %url, err = %err, "Failed to load image");
                return false;
            }
        };

        match judge_image(content_type.as_deref(), &bytes) {
            ImageVerdict::Usable => true,
            ImageVerdict::NotAnImage => {
                info!(target: LOG_TARGET, %url, content_type = ?content_type, "Not an image");
                false
            }
            ImageVerdict::TooSmall { width, height } => {
                info!(target: LOG_TARGET, %url, width, height, "Image is too small");
                false
            }
        }
    }
}
