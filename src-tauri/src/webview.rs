use std::sync::Arc;

use anyhow::{Context, Result};
use tauri::webview::PageLoadEvent;
use tauri::{AppHandle, Manager, WebviewWindowBuilder};
use tauri_plugin_opener::OpenerExt;
use url::Url;

use crate::config::AppConfig;
use crate::instance::InstanceRecord;
use crate::navigation::{
    react, NavigationDecision, NavigationKind, NavigationTracker, SurfaceAction, SurfaceEvent,
    LINK_CAPTURE_SCRIPT, TOOLBAR_SCRIPT,
};
use crate::{manager, popover_label, AppRuntime, AppState};

type PopoverBuilder<'a> = WebviewWindowBuilder<'a, AppRuntime, AppHandle<AppRuntime>>;

/// The URL the surface opens with: the record's target, or the fallback page
/// when the target does not parse.
pub fn start_url(record: &InstanceRecord, config: &AppConfig) -> Result<Url> {
    Url::parse(&record.target_url).or_else(|err| {
        log::warn!("Invalid URL {:?} for {}: {err}", record.target_url, record.id);
        Url::parse(&config.fallback_url)
            .with_context(|| format!("Fallback URL {:?} is invalid", config.fallback_url))
    })
}

/// Installs user agent, link capture, refresh toolbar, navigation policy and
/// load hooks.
pub fn configure<'a>(
    builder: PopoverBuilder<'a>,
    app: &AppHandle<AppRuntime>,
    record: &InstanceRecord,
    navigation: Arc<parking_lot::Mutex<NavigationTracker>>,
    config: &AppConfig,
) -> PopoverBuilder<'a> {
    let nav_app = app.clone();
    let nav_id = record.id.clone();
    let nav_tracker = Arc::clone(&navigation);

    let load_app = app.clone();
    let load_id = record.id.clone();
    let load_tracker = navigation;

    builder
        .user_agent(&config.user_agent)
        .initialization_script(LINK_CAPTURE_SCRIPT)
        .initialization_script(TOOLBAR_SCRIPT)
        .on_navigation(move |url| {
            let open_externally = nav_app
                .state::<AppState>()
                .record(&nav_id)
                .is_some_and(|record| record.open_links_externally);
            let decision = nav_tracker.lock().decide(url, open_externally);
            log::debug!("Navigation in {nav_id} to {url}: {decision:?}");
            match decision {
                NavigationDecision::Allow => true,
                NavigationDecision::Cancel => false,
                NavigationDecision::OpenExternally(target) => {
                    if let Err(err) = nav_app.opener().open_url(target.as_str(), None::<&str>) {
                        log::error!("Failed to open {target} externally: {err}");
                    }
                    false
                }
                NavigationDecision::LoadInSurface(target) => {
                    navigate_later(&nav_app, &nav_id, target);
                    false
                }
                NavigationDecision::Reload => {
                    reload_later(&nav_app, &nav_id);
                    false
                }
            }
        })
        .on_page_load(move |_window, payload| match payload.event() {
            PageLoadEvent::Started => load_tracker.lock().mark_committed(),
            PageLoadEvent::Finished => {
                perform(&load_app, &load_id, react(SurfaceEvent::LoadFinished));
            }
        })
}

/// Navigation requested from inside the navigation handler has to wait for
/// the handler to return.
fn navigate_later(app: &AppHandle<AppRuntime>, id: &str, target: Url) {
    let app = app.clone();
    let id = id.to_string();
    tauri::async_runtime::spawn(async move {
        if let Err(err) = navigate(&app, &id, target, NavigationKind::Other) {
            log::warn!("Failed to follow link in {id}: {err:#}");
        }
    });
}

fn reload_later(app: &AppHandle<AppRuntime>, id: &str) {
    let app = app.clone();
    let id = id.to_string();
    tauri::async_runtime::spawn(async move {
        if let Err(err) = reload(&app, &id) {
            log::warn!("Failed to refresh {id}: {err:#}");
        }
    });
}

fn navigate(app: &AppHandle<AppRuntime>, id: &str, target: Url, kind: NavigationKind) -> Result<()> {
    let window = app
        .get_webview_window(&popover_label(id))
        .with_context(|| format!("No web view for {id}"))?;
    if let Some(tracker) = manager::navigation_tracker(app, id) {
        tracker.lock().expect(kind);
    }
    window.navigate(target)?;
    Ok(())
}

fn perform(app: &AppHandle<AppRuntime>, id: &str, action: SurfaceAction) {
    let state = app.state::<AppState>();
    match action {
        SurfaceAction::ScheduleIconRefresh => {
            manager::schedule_icon_refresh(app, id, state.config().load_icon_delay());
        }
        SurfaceAction::LoadFallback => match Url::parse(&state.config().fallback_url) {
            Ok(fallback) => {
                if let Err(err) = navigate(app, id, fallback, NavigationKind::Other) {
                    log::warn!("Failed to load fallback page in {id}: {err:#}");
                }
            }
            Err(err) => log::error!("Fallback URL is invalid: {err}"),
        },
    }
}

/// Loads the record's current target into its surface.
pub fn load_target(app: &AppHandle<AppRuntime>, id: &str) -> Result<()> {
    let state = app.state::<AppState>();
    let record = state
        .record(id)
        .with_context(|| format!("Unknown instance {id}"))?;
    let target = start_url(&record, state.config())?;
    navigate(app, id, target.clone(), NavigationKind::Other)?;
    probe_target(app, id, target);
    Ok(())
}

pub fn reload(app: &AppHandle<AppRuntime>, id: &str) -> Result<()> {
    let window = app
        .get_webview_window(&popover_label(id))
        .with_context(|| format!("No web view for {id}"))?;
    if let Some(tracker) = manager::navigation_tracker(app, id) {
        tracker.lock().expect(NavigationKind::Reload);
    }
    window.reload()?;
    Ok(())
}

/// Checks reachability of `target` alongside the surface's own load. A
/// connect or timeout failure counts as a failed provisional load.
pub fn probe_target(app: &AppHandle<AppRuntime>, id: &str, target: Url) {
    if !matches!(target.scheme(), "http" | "https") {
        return;
    }
    let state = app.state::<AppState>();
    if target.as_str().trim_end_matches('/') == state.config().fallback_url.trim_end_matches('/') {
        return;
    }
    let http = state.http();
    let timeout = state.config().probe_timeout();
    let app = app.clone();
    let id = id.to_string();

    tauri::async_runtime::spawn(async move {
        let failed = match http.get(target.clone()).timeout(timeout).send().await {
            Ok(_) => false,
            Err(err) => {
                log::warn!("Could not reach {target} for {id}: {err}");
                err.is_connect() || err.is_timeout()
            }
        };
        if failed && app.state::<AppState>().has_instance(&id) {
            perform(&app, &id, react(SurfaceEvent::ProvisionalLoadFailed));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::NewInstance;

    #[test]
    fn start_url_falls_back_on_garbage() {
        let config = AppConfig::default();
        let mut record = InstanceRecord::build(NewInstance::with_id("a"), &config);
        assert_eq!(
            start_url(&record, &config).unwrap().as_str(),
            "https://home.i.smith.bz/"
        );

        record.target_url = "not a url".into();
        assert_eq!(start_url(&record, &config).unwrap().as_str(), "https://example.com/");

        let broken = AppConfig {
            fallback_url: "also not a url".into(),
            ..AppConfig::default()
        };
        assert!(start_url(&record, &broken).is_err());
    }
}
