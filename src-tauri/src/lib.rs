mod config;
mod favicon;
mod instance;
mod manager;
mod navigation;
mod popover;
mod registry;
mod settings_form;
mod store;
mod tray;
mod webview;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use config::AppConfig;
use favicon::FaviconFetcher;
use instance::InstanceRecord;
use manager::InstanceHandles;
use registry::InstanceRegistry;
use reqwest::Client;
use store::PreferencesStore;
use tauri::{AppHandle, Manager, Wry};

#[cfg(target_os = "macos")]
use tauri::ActivationPolicy;

type AppRuntime = Wry;

/// Window label prefixes; the instance id is appended.
const POPOVER_LABEL_PREFIX: &str = "popover-";
const SETTINGS_LABEL_PREFIX: &str = "settings-";

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            #[cfg(target_os = "macos")]
            app.set_activation_policy(ActivationPolicy::Accessory);

            let handle = app.handle().clone();
            let state = AppState::new(&handle)?;
            log::info!(
                "Using preferences at {}",
                state.store.path().display()
            );
            app.manage(state);

            handle.on_menu_event(|app, event| tray::handle_menu_event(app, event.id().as_ref()));

            manager::load_saved_instances(&handle);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            settings_form::get_instance_settings,
            settings_form::save_instance_settings,
            settings_form::pick_custom_icon,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

struct AppState {
    config: AppConfig,
    http: Client,
    favicons: FaviconFetcher,
    store: PreferencesStore,
    registry: parking_lot::Mutex<InstanceRegistry>,
    handles: parking_lot::Mutex<HashMap<String, InstanceHandles>>,
}

impl AppState {
    fn new(app: &AppHandle<AppRuntime>) -> Result<Self> {
        let config = AppConfig::load_or_default(app);
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        let store = PreferencesStore::in_dir(&config::config_dir(app)?);
        let favicons = FaviconFetcher::new(http.clone(), config.favicon_proxy.clone());

        Ok(Self {
            config,
            http,
            favicons,
            store,
            registry: parking_lot::Mutex::new(InstanceRegistry::new()),
            handles: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    fn config(&self) -> &AppConfig {
        &self.config
    }

    fn http(&self) -> Client {
        self.http.clone()
    }

    fn record(&self, id: &str) -> Option<InstanceRecord> {
        self.registry.lock().get(id).cloned()
    }

    fn has_instance(&self, id: &str) -> bool {
        self.registry.lock().contains(id)
    }
}

/// Window labels only allow alphanumerics and `-/:_`.
fn label_for(prefix: &str, id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}{sanitized}")
}

fn popover_label(id: &str) -> String {
    label_for(POPOVER_LABEL_PREFIX, id)
}

fn settings_label(id: &str) -> String {
    label_for(SETTINGS_LABEL_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(popover_label("default"), "popover-default");
        assert_eq!(
            settings_label("6F9619FF-8B86-D011-B42D-00C04FC964FF"),
            "settings-6F9619FF-8B86-D011-B42D-00C04FC964FF"
        );
        assert_eq!(popover_label("a b/c.d"), "popover-a_b_c_d");
    }
}
