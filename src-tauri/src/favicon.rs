use image::imageops::FilterType;
use reqwest::Client;
use url::Url;

/// Edge length of tray icons, in pixels.
pub const ICON_SIZE: u32 = 32;

/// Square RGBA icon ready for the tray.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl IconImage {
    pub fn to_tauri(&self) -> tauri::image::Image<'static> {
        tauri::image::Image::new_owned(self.rgba.clone(), self.width, self.height)
    }
}

/// Favicon URLs to try for `target`, most specific first.
pub fn candidate_urls(target: &str, proxy_template: &str) -> Vec<String> {
    let Some(host) = Url::parse(target)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
    else {
        return Vec::new();
    };
    vec![
        format!("https://{host}/favicon.ico"),
        format!("https://{host}/favicon.png"),
        proxy_template.replace("{host}", &urlencoding::encode(&host)),
    ]
}

/// Decodes any supported image format and scales it to `ICON_SIZE` square.
pub fn decode_icon(bytes: &[u8]) -> Option<IconImage> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let scaled = decoded.resize_exact(ICON_SIZE, ICON_SIZE, FilterType::Lanczos3);
    let rgba = scaled.to_rgba8();
    Some(IconImage {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

pub fn load_icon_file(path: &str) -> Option<IconImage> {
    match std::fs::read(path) {
        Ok(bytes) => decode_icon(&bytes),
        Err(err) => {
            log::warn!("Failed to read custom icon {path}: {err}");
            None
        }
    }
}

pub struct FaviconFetcher {
    http: Client,
    proxy_template: String,
}

impl FaviconFetcher {
    pub fn new(http: Client, proxy_template: impl Into<String>) -> Self {
        Self {
            http,
            proxy_template: proxy_template.into(),
        }
    }

    /// Tries each candidate in turn; the first one that decodes wins.
    pub async fn fetch(&self, target: &str) -> Option<IconImage> {
        let icon = self
            .first_decodable(&candidate_urls(target, &self.proxy_template))
            .await;
        if icon.is_none() {
            log::debug!("No favicon found for {target}");
        }
        icon
    }

    async fn first_decodable(&self, candidates: &[String]) -> Option<IconImage> {
        for candidate in candidates {
            match self.try_candidate(candidate).await {
                Ok(icon) => {
                    log::debug!("Favicon loaded from {candidate}");
                    return Some(icon);
                }
                Err(err) => log::debug!("Favicon candidate {candidate} failed: {err:#}"),
            }
        }
        None
    }

    /// The status code is not checked: error pages that carry an image,
    /// such as the proxy's default globe, still count.
    async fn try_candidate(&self, candidate: &str) -> anyhow::Result<IconImage> {
        let response = self.http.get(candidate).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        decode_icon(&bytes).ok_or_else(|| {
            anyhow::anyhow!("undecodable image ({status}, {} bytes)", bytes.len())
        })
    }
}
