use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tauri::{
    AppHandle, LogicalSize, Manager, PhysicalPosition, Rect, WebviewUrl, WebviewWindowBuilder,
    WindowEvent,
};

use crate::instance::InstanceRecord;
use crate::navigation::NavigationTracker;
use crate::{manager, popover_label, webview, AppRuntime, AppState};

/// A click on the tray icon blurs the popover before the click arrives;
/// within this window the click is treated as the closing click.
const REOPEN_GRACE: Duration = Duration::from_millis(300);

#[derive(Debug, Default)]
pub struct PopoverState {
    last_auto_hide: Mutex<Option<Instant>>,
}

impl PopoverState {
    fn mark_auto_hidden(&self, at: Instant) {
        *self.last_auto_hide.lock() = Some(at);
    }

    fn suppresses_reopen(&self, now: Instant) -> bool {
        within_grace(*self.last_auto_hide.lock(), now)
    }
}

fn within_grace(last_auto_hide: Option<Instant>, now: Instant) -> bool {
    last_auto_hide.is_some_and(|at| now.saturating_duration_since(at) < REOPEN_GRACE)
}

/// Top-left corner that centers a popover of `popover_width` under the
/// anchor rectangle, kept on screen horizontally.
pub fn anchor_below(
    anchor_x: f64,
    anchor_y: f64,
    anchor_width: f64,
    anchor_height: f64,
    popover_width: f64,
) -> PhysicalPosition<i32> {
    let x = anchor_x + anchor_width / 2.0 - popover_width / 2.0;
    let y = anchor_y + anchor_height;
    PhysicalPosition::new(x.max(0.0).round() as i32, y.round() as i32)
}

/// Builds the hidden popover window hosting the instance's web content.
pub fn create(
    app: &AppHandle<AppRuntime>,
    record: &InstanceRecord,
    navigation: Arc<parking_lot::Mutex<NavigationTracker>>,
) -> Result<Arc<PopoverState>> {
    let config = app.state::<AppState>().config().clone();
    let start_url = webview::start_url(record, &config)?;
    let builder = WebviewWindowBuilder::new(
        app,
        popover_label(&record.id),
        WebviewUrl::External(start_url.clone()),
    );
    let window = webview::configure(builder, app, record, navigation, &config)
        .title(window_title(record))
        .inner_size(record.window_width as f64, record.window_height as f64)
        .resizable(false)
        .visible(false)
        .decorations(false)
        .always_on_top(true)
        .skip_taskbar(true)
        .build()
        .with_context(|| format!("Failed to build popover for {}", record.id))?;

    let state = Arc::new(PopoverState::default());
    let blur_state = Arc::clone(&state);
    let window_clone = window.clone();
    window.on_window_event(move |event| {
        if let WindowEvent::Focused(false) = event {
            if window_clone.is_visible().unwrap_or(false) {
                blur_state.mark_auto_hidden(Instant::now());
                let _ = window_clone.hide();
            }
        }
    });

    webview::probe_target(app, &record.id, start_url);
    Ok(state)
}

pub fn toggle(app: &AppHandle<AppRuntime>, id: &str, anchor: Option<Rect>) -> Result<()> {
    let window = app
        .get_webview_window(&popover_label(id))
        .with_context(|| format!("No popover for {id}"))?;

    if window.is_visible().unwrap_or(false) {
        window.hide()?;
        return Ok(());
    }
    if manager::popover_state(app, id).is_some_and(|state| state.suppresses_reopen(Instant::now())) {
        return Ok(());
    }

    if let Some(rect) = anchor {
        let scale = window.scale_factor()?;
        let position = rect.position.to_physical::<f64>(scale);
        let size = rect.size.to_physical::<f64>(scale);
        let popover_width = window.outer_size()?.width as f64;
        window.set_position(anchor_below(
            position.x,
            position.y,
            size.width,
            size.height,
            popover_width,
        ))?;
    }
    window.show()?;
    window.set_focus()?;
    Ok(())
}

fn window_title(record: &InstanceRecord) -> &str {
    record.target_url.as_str()
}

/// Brings size and title of the popover in line with the record.
pub fn sync(app: &AppHandle<AppRuntime>, record: &InstanceRecord) {
    let Some(window) = app.get_webview_window(&popover_label(&record.id)) else {
        return;
    };
    let size = LogicalSize::new(record.window_width as f64, record.window_height as f64);
    if let Err(err) = window.set_size(size) {
        log::warn!("Failed to resize popover for {}: {err}", record.id);
    }
    if let Err(err) = window.set_title(window_title(record)) {
        log::warn!("Failed to retitle popover for {}: {err}", record.id);
    }
}

pub fn destroy(app: &AppHandle<AppRuntime>, id: &str) {
    if let Some(window) = app.get_webview_window(&popover_label(id)) {
        if let Err(err) = window.destroy() {
            log::warn!("Failed to close popover for {id}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::instance::NewInstance;
    use crate::settings_form::SettingsForm;

    #[test]
    fn centers_under_anchor() {
        let position = anchor_below(1000.0, 0.0, 48.0, 48.0, 750.0);
        assert_eq!(position, PhysicalPosition::new(649, 48));
    }

    #[test]
    fn clamps_to_left_edge() {
        let position = anchor_below(10.0, 0.0, 40.0, 24.0, 375.0);
        assert_eq!(position, PhysicalPosition::new(0, 24));
    }

    #[test]
    fn title_follows_saved_url() {
        let mut record = InstanceRecord::build(NewInstance::with_id("a"), &AppConfig::default());
        assert_eq!(window_title(&record), "https://home.i.smith.bz/");

        let mut form = SettingsForm::from_record(&record);
        form.url = "https://lobste.rs/".into();
        form.apply_to(&mut record);
        assert_eq!(window_title(&record), "https://lobste.rs/");
    }

    #[test]
    fn reopen_suppressed_only_right_after_blur() {
        let now = Instant::now();
        assert!(!within_grace(None, now));
        assert!(within_grace(Some(now), now + Duration::from_millis(100)));
        assert!(!within_grace(Some(now), now + Duration::from_secs(1)));

        let state = PopoverState::default();
        assert!(!state.suppresses_reopen(now));
        state.mark_auto_hidden(now);
        assert!(state.suppresses_reopen(now));
    }
}
