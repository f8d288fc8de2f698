use crate::config::AppConfig;

pub const DEFAULT_INSTANCE_ID: &str = "default";

/// One pinned web site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub id: String,
    pub target_url: String,
    pub open_links_externally: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Session-only: not part of the persisted record shape.
    pub use_favicon: bool,
    /// Session-only: not part of the persisted record shape.
    pub custom_icon_path: Option<String>,
}

/// Creation arguments; unset fields take the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct NewInstance {
    pub id: String,
    pub url: Option<String>,
    pub external_links: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl NewInstance {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn fresh() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }
}

impl InstanceRecord {
    pub fn build(spec: NewInstance, config: &AppConfig) -> Self {
        Self {
            id: spec.id,
            target_url: spec.url.unwrap_or_else(|| config.default_url.clone()),
            open_links_externally: spec.external_links.unwrap_or(false),
            window_width: spec
                .width
                .filter(|w| *w > 0)
                .unwrap_or(config.default_width),
            window_height: spec
                .height
                .filter(|h| *h > 0)
                .unwrap_or(config.default_height),
            use_favicon: true,
            custom_icon_path: None,
        }
    }

    pub fn tooltip(&self) -> String {
        format!("Website Viewer - {}", self.target_url)
    }

    /// The custom icon path, if one is set and non-blank.
    pub fn custom_icon(&self) -> Option<&str> {
        self.custom_icon_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
    }
}
