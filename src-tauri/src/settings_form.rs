use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Manager, WebviewUrl, WebviewWindowBuilder, WindowEvent};

#[cfg(target_os = "macos")]
use tauri::ActivationPolicy;

use crate::instance::InstanceRecord;
use crate::{manager, settings_label, AppRuntime, AppState, SETTINGS_LABEL_PREFIX};

const SETTINGS_PAGE: &str = "settings.html";
const ICON_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "bmp", "gif", "ico"];

/// Field values as typed into the settings window. Sizes stay text until
/// save so that bad input can be ignored instead of rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsForm {
    pub url: String,
    pub external_links: bool,
    pub width: String,
    pub height: String,
    pub use_favicon: bool,
    #[serde(default)]
    pub custom_icon_path: String,
}

impl SettingsForm {
    pub fn from_record(record: &InstanceRecord) -> Self {
        Self {
            url: record.target_url.clone(),
            external_links: record.open_links_externally,
            width: record.window_width.to_string(),
            height: record.window_height.to_string(),
            use_favicon: record.use_favicon,
            custom_icon_path: record.custom_icon_path.clone().unwrap_or_default(),
        }
    }

    /// Writes the form into `record`. Sizes that are not positive integers
    /// leave the current value in place.
    pub fn apply_to(&self, record: &mut InstanceRecord) {
        record.target_url = self.url.trim().to_string();
        record.open_links_externally = self.external_links;
        record.use_favicon = self.use_favicon;
        record.custom_icon_path = Some(self.custom_icon_path.trim())
            .filter(|path| !path.is_empty())
            .map(str::to_string);

        if let Some(width) = parse_dimension(&self.width) {
            record.window_width = width;
        }
        if let Some(height) = parse_dimension(&self.height) {
            record.window_height = height;
        }
    }
}

fn parse_dimension(raw: &str) -> Option<u32> {
    raw.trim().parse::<i64>().ok().filter(|n| *n > 0)?.try_into().ok()
}

#[tauri::command]
pub fn get_instance_settings(id: String, state: tauri::State<AppState>) -> Result<SettingsForm, String> {
    state
        .record(&id)
        .map(|record| SettingsForm::from_record(&record))
        .ok_or_else(|| format!("Unknown instance {id}"))
}

/// Applies the form, then closes the settings window whatever the outcome.
#[tauri::command]
pub fn save_instance_settings(
    id: String,
    form: SettingsForm,
    app: AppHandle<AppRuntime>,
) -> Result<(), String> {
    let result = manager::apply_settings(&app, &id, &form).map(|_| ());
    close(&app, &id);
    result.map_err(|err| err.to_string())
}

#[tauri::command]
pub async fn pick_custom_icon() -> Option<String> {
    rfd::AsyncFileDialog::new()
        .set_title("Choose Menu Bar Icon")
        .add_filter("Images", ICON_EXTENSIONS)
        .pick_file()
        .await
        .map(|file| file.path().display().to_string())
}

/// Shows the settings window of `id`, creating it on first use.
pub fn open(app: &AppHandle<AppRuntime>, id: &str) -> Result<()> {
    let label = settings_label(id);
    if let Some(existing) = app.get_webview_window(&label) {
        existing.show()?;
        existing.set_focus()?;
        return Ok(());
    }

    let init_script = format!(
        "window.__MENU_SITE_INSTANCE_ID__ = {};",
        serde_json::to_string(id)?
    );
    let window = WebviewWindowBuilder::new(app, &label, WebviewUrl::App(SETTINGS_PAGE.into()))
        .title("Website Viewer Settings")
        .inner_size(450.0, 450.0)
        .resizable(false)
        .minimizable(false)
        .center()
        .initialization_script(&init_script)
        .build()
        .with_context(|| format!("Failed to open settings for {id}"))?;

    #[cfg(target_os = "macos")]
    let _ = app.set_activation_policy(ActivationPolicy::Regular);

    let app_handle = app.clone();
    window.on_window_event(move |event| {
        if let WindowEvent::Destroyed = event {
            restore_accessory_policy(&app_handle, &label);
        }
    });

    window.show()?;
    window.set_focus()?;
    Ok(())
}

pub fn close(app: &AppHandle<AppRuntime>, id: &str) {
    if let Some(window) = app.get_webview_window(&settings_label(id)) {
        if let Err(err) = window.close() {
            log::warn!("Failed to close settings for {id}: {err}");
        }
    }
}

/// Back to a menu-bar-only app once no settings window is left.
fn restore_accessory_policy(app: &AppHandle<AppRuntime>, closing_label: &str) {
    let open_forms = app
        .webview_windows()
        .keys()
        .filter(|label| label.starts_with(SETTINGS_LABEL_PREFIX) && label.as_str() != closing_label)
        .count();
    if open_forms > 0 {
        return;
    }
    #[cfg(target_os = "macos")]
    let _ = app.set_activation_policy(ActivationPolicy::Accessory);
}
