use tauri::menu::{CheckMenuItem, CheckMenuItemBuilder, Menu, MenuBuilder, MenuItem};
use tauri::tray::{MouseButton, MouseButtonState, TrayIcon, TrayIconBuilder, TrayIconEvent};
use tauri::AppHandle;

use crate::favicon::IconImage;
use crate::instance::InstanceRecord;
use crate::manager::{self, InstanceCommand};
use crate::AppRuntime;

/// Shown when no favicon or custom image is available.
pub const DEFAULT_GLYPH: &str = "🌐";

const TRAY_ID_PREFIX: &str = "instance:";
const MENU_ID_SEPARATOR: &str = "::";

const ACTION_EXTERNAL_LINKS: &str = "external_links";
const ACTION_SETTINGS: &str = "settings";
const ACTION_REFRESH: &str = "refresh";
const ACTION_NEW: &str = "new_viewer";
const ACTION_CLOSE: &str = "close_viewer";
const ACTION_QUIT: &str = "quit";

pub fn tray_id(instance_id: &str) -> String {
    format!("{TRAY_ID_PREFIX}{instance_id}")
}

fn menu_id(instance_id: &str, action: &str) -> String {
    format!("{instance_id}{MENU_ID_SEPARATOR}{action}")
}

/// Splits a menu item id into instance id and command.
fn parse_menu_id(raw: &str) -> Option<(&str, InstanceCommand)> {
    let (instance_id, action) = raw.rsplit_once(MENU_ID_SEPARATOR)?;
    let command = match action {
        ACTION_EXTERNAL_LINKS => InstanceCommand::ToggleExternalLinks,
        ACTION_SETTINGS => InstanceCommand::ShowSettings,
        ACTION_REFRESH => InstanceCommand::Refresh,
        ACTION_NEW => InstanceCommand::NewInstance,
        ACTION_CLOSE => InstanceCommand::Close,
        ACTION_QUIT => InstanceCommand::Quit,
        _ => return None,
    };
    Some((instance_id, command))
}

fn build_instance_menu(
    app: &AppHandle<AppRuntime>,
    record: &InstanceRecord,
) -> tauri::Result<(Menu<AppRuntime>, CheckMenuItem<AppRuntime>)> {
    let id = record.id.as_str();
    let external_links = CheckMenuItemBuilder::with_id(
        menu_id(id, ACTION_EXTERNAL_LINKS),
        "Open Links Externally",
    )
    .checked(record.open_links_externally)
    .build(app)?;
    let settings = MenuItem::with_id(app, menu_id(id, ACTION_SETTINGS), "Settings", true, None::<&str>)?;
    let refresh = MenuItem::with_id(app, menu_id(id, ACTION_REFRESH), "Refresh", true, None::<&str>)?;
    let new_viewer = MenuItem::with_id(
        app,
        menu_id(id, ACTION_NEW),
        "New Website Viewer",
        true,
        None::<&str>,
    )?;
    let close = MenuItem::with_id(
        app,
        menu_id(id, ACTION_CLOSE),
        "Close This Viewer",
        true,
        None::<&str>,
    )?;
    let quit = MenuItem::with_id(app, menu_id(id, ACTION_QUIT), "Quit Menu Site", true, None::<&str>)?;

    let menu = MenuBuilder::new(app)
        .item(&external_links)
        .separator()
        .item(&settings)
        .item(&refresh)
        .separator()
        .item(&new_viewer)
        .separator()
        .item(&close)
        .item(&quit)
        .build()?;
    Ok((menu, external_links))
}

/// Creates the status bar item of one instance. Left click toggles the
/// popover, right click opens the context menu.
pub fn build_instance_tray(
    app: &AppHandle<AppRuntime>,
    record: &InstanceRecord,
) -> tauri::Result<(TrayIcon<AppRuntime>, CheckMenuItem<AppRuntime>)> {
    let (menu, external_links) = build_instance_menu(app, record)?;
    let instance_id = record.id.clone();

    let tray = TrayIconBuilder::with_id(tray_id(&record.id))
        .title(DEFAULT_GLYPH)
        .tooltip(record.tooltip())
        .menu(&menu)
        .show_menu_on_left_click(false)
        .on_tray_icon_event(move |tray, event| {
            if let TrayIconEvent::Click {
                rect,
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                manager::dispatch(
                    tray.app_handle(),
                    &instance_id,
                    InstanceCommand::TogglePopover(Some(rect)),
                );
            }
        })
        .build(app)?;

    Ok((tray, external_links))
}

pub fn handle_menu_event(app: &AppHandle<AppRuntime>, raw_id: &str) {
    match parse_menu_id(raw_id) {
        Some((instance_id, command)) => manager::dispatch(app, instance_id, command),
        None => log::debug!("Ignoring menu event {raw_id}"),
    }
}

/// Brings tooltip and check state in line with the record.
pub fn sync(tray: &TrayIcon<AppRuntime>, external_links: &CheckMenuItem<AppRuntime>, record: &InstanceRecord) {
    if let Err(err) = tray.set_tooltip(Some(record.tooltip())) {
        log::warn!("Failed to update tooltip for {}: {err}", record.id);
    }
    if let Err(err) = external_links.set_checked(record.open_links_externally) {
        log::warn!("Failed to update menu state for {}: {err}", record.id);
    }
}

/// Shows `icon`, or the default glyph when there is none.
pub fn set_label(tray: &TrayIcon<AppRuntime>, icon: Option<&IconImage>) -> tauri::Result<()> {
    match icon {
        Some(icon) => {
            tray.set_icon(Some(icon.to_tauri()))?;
            tray.set_title(None::<&str>)
        }
        None => {
            tray.set_icon(None)?;
            tray.set_title(Some(DEFAULT_GLYPH))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_ids_round_trip_to_commands() {
        let raw = menu_id("6F9619FF-8B86", ACTION_SETTINGS);
        let (id, command) = parse_menu_id(&raw).unwrap();
        assert_eq!(id, "6F9619FF-8B86");
        assert!(matches!(command, InstanceCommand::ShowSettings));

        let raw = menu_id("default", ACTION_CLOSE);
        let (id, command) = parse_menu_id(&raw).unwrap();
        assert_eq!(id, "default");
        assert!(matches!(command, InstanceCommand::Close));
    }

    #[test]
    fn unknown_menu_ids_are_ignored() {
        assert!(parse_menu_id("default::bogus").is_none());
        assert!(parse_menu_id("no-separator").is_none());
    }

    #[test]
    fn tray_ids_are_namespaced() {
        assert_eq!(tray_id("default"), "instance:default");
    }
}
