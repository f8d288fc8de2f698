//! Instance lifecycle: creation, persistence, teardown, and the commands the
//! tray, popover and settings form send back in.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tauri::menu::CheckMenuItem;
use tauri::tray::TrayIcon;
use tauri::{AppHandle, Manager, Rect};
use tokio_util::sync::CancellationToken;

use crate::instance::{InstanceRecord, NewInstance};
use crate::navigation::NavigationTracker;
use crate::popover::PopoverState;
use crate::registry::{startup_instances, CloseOutcome};
use crate::settings_form::SettingsForm;
use crate::{favicon, popover, settings_form, tray, webview, AppRuntime, AppState};

/// UI resources owned by one live instance.
pub struct InstanceHandles {
    pub tray: TrayIcon<AppRuntime>,
    pub external_links_item: CheckMenuItem<AppRuntime>,
    pub navigation: Arc<parking_lot::Mutex<NavigationTracker>>,
    pub popover: Arc<PopoverState>,
    /// Parent of every delayed task started for this instance.
    timers: CancellationToken,
}

/// Everything the UI can ask of an instance.
#[derive(Debug, Clone)]
pub enum InstanceCommand {
    TogglePopover(Option<Rect>),
    ToggleExternalLinks,
    ShowSettings,
    Refresh,
    NewInstance,
    Close,
    Quit,
}

pub fn dispatch(app: &AppHandle<AppRuntime>, id: &str, command: InstanceCommand) {
    log::debug!("Instance {id}: {command:?}");
    let result = match command {
        InstanceCommand::TogglePopover(anchor) => popover::toggle(app, id, anchor),
        InstanceCommand::ToggleExternalLinks => toggle_external_links(app, id),
        InstanceCommand::ShowSettings => settings_form::open(app, id),
        InstanceCommand::Refresh => webview::reload(app, id),
        InstanceCommand::NewInstance => create_instance(app, NewInstance::fresh()).map(|_| ()),
        InstanceCommand::Close => {
            close_instance(app, id);
            Ok(())
        }
        InstanceCommand::Quit => {
            app.exit(0);
            Ok(())
        }
    };
    if let Err(err) = result {
        log::error!("Instance {id}: command failed: {err:#}");
    }
}

/// Creates, wires and persists a new instance.
pub fn create_instance(app: &AppHandle<AppRuntime>, spec: NewInstance) -> Result<InstanceRecord> {
    let record = InstanceRecord::build(spec, app.state::<AppState>().config());
    register(app, record.clone())?;
    save_instances(app);
    Ok(record)
}

/// Recreates saved instances, or the default one when nothing was saved.
pub fn load_saved_instances(app: &AppHandle<AppRuntime>) {
    let records = {
        let state = app.state::<AppState>();
        startup_instances(state.store.load(state.config()), state.config())
    };
    for record in records {
        let id = record.id.clone();
        if let Err(err) = register(app, record) {
            log::error!("Failed to restore instance {id}: {err:#}");
        }
    }

    let state = app.state::<AppState>();
    if state.registry.lock().is_empty() {
        log::error!("No instance could be created, exiting");
        app.exit(1);
        return;
    }
    log::info!("Started with {} instance(s)", state.registry.lock().len());
}

fn register(app: &AppHandle<AppRuntime>, record: InstanceRecord) -> Result<()> {
    let state = app.state::<AppState>();
    state.registry.lock().insert(record.clone())?;

    let handles = match build_handles(app, &record) {
        Ok(handles) => handles,
        Err(err) => {
            state.registry.lock().close(&record.id);
            teardown_ui(app, &record.id);
            return Err(err);
        }
    };
    state.handles.lock().insert(record.id.clone(), handles);

    schedule_icon_refresh(app, &record.id, state.config().initial_icon_delay());
    log::info!("Created instance {} for {}", record.id, record.target_url);
    Ok(())
}

fn build_handles(app: &AppHandle<AppRuntime>, record: &InstanceRecord) -> Result<InstanceHandles> {
    let (tray, external_links_item) =
        tray::build_instance_tray(app, record).context("Failed to create status bar item")?;
    let navigation = Arc::new(parking_lot::Mutex::new(NavigationTracker::new()));
    let popover = popover::create(app, record, Arc::clone(&navigation))
        .context("Failed to create popover")?;
    tray::sync(&tray, &external_links_item, record);

    Ok(InstanceHandles {
        tray,
        external_links_item,
        navigation,
        popover,
        timers: CancellationToken::new(),
    })
}

/// Writes the current record set. Failures are logged only.
pub fn save_instances(app: &AppHandle<AppRuntime>) {
    let state = app.state::<AppState>();
    let snapshot = state.registry.lock().snapshot();
    if let Err(err) = state.store.save(&snapshot) {
        log::error!("Failed to save instances: {err:#}");
    }
}

/// Tears the instance down and exits once none remain.
pub fn close_instance(app: &AppHandle<AppRuntime>, id: &str) {
    let state = app.state::<AppState>();
    let outcome = state.registry.lock().close(id);
    if outcome == CloseOutcome::NotFound {
        log::warn!("Close requested for unknown instance {id}");
        return;
    }

    teardown_ui(app, id);
    save_instances(app);
    log::info!("Closed instance {id}");

    if outcome == CloseOutcome::Terminate {
        log::info!("Last instance closed, exiting");
        app.exit(0);
    }
}

fn teardown_ui(app: &AppHandle<AppRuntime>, id: &str) {
    let state = app.state::<AppState>();
    let handles = state.handles.lock().remove(id);
    if let Some(handles) = handles {
        handles.timers.cancel();
        if let Err(err) = handles.tray.set_visible(false) {
            log::warn!("Failed to hide status bar item for {id}: {err}");
        }
    }
    let _ = app.remove_tray_by_id(tray::tray_id(id).as_str());
    popover::destroy(app, id);
    settings_form::close(app, id);
}

fn toggle_external_links(app: &AppHandle<AppRuntime>, id: &str) -> Result<()> {
    let state = app.state::<AppState>();
    let record = state
        .registry
        .lock()
        .update(id, |record| record.open_links_externally = !record.open_links_externally)
        .with_context(|| format!("Unknown instance {id}"))?;
    sync_tray(app, &record);
    save_instances(app);
    Ok(())
}

/// Applies a saved settings form and propagates it to every surface.
pub fn apply_settings(app: &AppHandle<AppRuntime>, id: &str, form: &SettingsForm) -> Result<InstanceRecord> {
    let state = app.state::<AppState>();
    let record = state
        .registry
        .lock()
        .update(id, |record| form.apply_to(record))
        .with_context(|| format!("Unknown instance {id}"))?;

    if let Err(err) = webview::load_target(app, id) {
        log::warn!("Failed to reload {id}: {err:#}");
    }
    popover::sync(app, &record);
    sync_tray(app, &record);
    schedule_icon_refresh(app, id, state.config().settings_icon_delay());
    save_instances(app);
    Ok(record)
}

fn sync_tray(app: &AppHandle<AppRuntime>, record: &InstanceRecord) {
    let state = app.state::<AppState>();
    let ui = state
        .handles
        .lock()
        .get(&record.id)
        .map(|handles| (handles.tray.clone(), handles.external_links_item.clone()));
    if let Some((tray, external_links_item)) = ui {
        tray::sync(&tray, &external_links_item, record);
    }
}

pub fn navigation_tracker(
    app: &AppHandle<AppRuntime>,
    id: &str,
) -> Option<Arc<parking_lot::Mutex<NavigationTracker>>> {
    let state = app.state::<AppState>();
    let handles = state.handles.lock();
    handles.get(id).map(|handles| Arc::clone(&handles.navigation))
}

pub fn popover_state(app: &AppHandle<AppRuntime>, id: &str) -> Option<Arc<PopoverState>> {
    let state = app.state::<AppState>();
    let handles = state.handles.lock();
    handles.get(id).map(|handles| Arc::clone(&handles.popover))
}

/// Runs an icon refresh after `delay` unless the instance is closed first.
pub fn schedule_icon_refresh(app: &AppHandle<AppRuntime>, id: &str, delay: Duration) {
    let token = {
        let state = app.state::<AppState>();
        let handles = state.handles.lock();
        match handles.get(id) {
            Some(handles) => handles.timers.child_token(),
            None => return,
        }
    };
    let app = app.clone();
    let id = id.to_string();
    tauri::async_runtime::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => refresh_icon(&app, &id).await,
        }
    });
}

/// Picks the label for the status bar item: custom image, favicon, or glyph.
async fn refresh_icon(app: &AppHandle<AppRuntime>, id: &str) {
    let Some(record) = app.state::<AppState>().record(id) else {
        return;
    };

    let icon = if let Some(path) = record.custom_icon() {
        favicon::load_icon_file(path)
    } else {
        None
    };
    let icon = match icon {
        Some(icon) => Some(icon),
        None if record.use_favicon => {
            let state = app.state::<AppState>();
            state.favicons.fetch(&record.target_url).await
        }
        None => None,
    };

    let state = app.state::<AppState>();
    let tray = state
        .handles
        .lock()
        .get(id)
        .map(|handles| handles.tray.clone());
    // Instance closed while the fetch was in flight.
    let Some(tray) = tray else {
        return;
    };
    if let Err(err) = tray::set_label(&tray, icon.as_ref()) {
        log::warn!("Failed to update icon for {id}: {err}");
    }
}
