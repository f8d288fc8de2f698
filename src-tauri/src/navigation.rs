//! Navigation policy for the embedded browser surface.
//!
//! The host webview only reports the URL of a pending navigation, so user
//! link activations are tagged by [`LINK_CAPTURE_SCRIPT`]: trusted anchor
//! clicks are rerouted through a `menusite-link:` URL carrying the real
//! target, which [`NavigationTracker::classify`] turns back into a
//! [`NavigationKind::LinkActivated`]. The refresh button of
//! [`TOOLBAR_SCRIPT`] uses the same scheme to ask for a reload.

use url::Url;

pub const LINK_SCHEME: &str = "menusite-link";
const REFRESH_HOST: &str = "refresh";

/// Injected into every page of the surface.
pub const LINK_CAPTURE_SCRIPT: &str = r#"
(function () {
  if (window.__menusiteLinkCapture) { return; }
  window.__menusiteLinkCapture = true;
  document.addEventListener('click', function (event) {
    if (!event.isTrusted || event.defaultPrevented || event.button !== 0) { return; }
    if (event.metaKey || event.ctrlKey || event.shiftKey || event.altKey) { return; }
    var node = event.target;
    var anchor = node && node.closest ? node.closest('a[href]') : null;
    if (!anchor || anchor.hasAttribute('download')) { return; }
    var href = anchor.href;
    if (!/^https?:/i.test(href)) { return; }
    if (href.split('#')[0] === window.location.href.split('#')[0] && href.indexOf('#') !== -1) { return; }
    event.preventDefault();
    window.location.href = 'menusite-link://activate?target=' + encodeURIComponent(href);
  }, false);
})();
"#;

/// Thin bar pinned above the page with a centered refresh button.
pub const TOOLBAR_SCRIPT: &str = r#"
(function () {
  if (window.top !== window || window.__menusiteToolbar) { return; }
  window.__menusiteToolbar = true;
  function install() {
    if (!document.body || document.getElementById('__menusite-toolbar')) { return; }
    var bar = document.createElement('div');
    bar.id = '__menusite-toolbar';
    bar.style.cssText = 'position:fixed;top:0;left:0;right:0;height:30px;z-index:2147483647;' +
      'display:flex;align-items:center;justify-content:center;background:Canvas;' +
      'border-bottom:1px solid rgba(128,128,128,0.3);';
    var button = document.createElement('button');
    button.type = 'button';
    button.title = 'Refresh';
    button.textContent = '🔄';
    button.style.cssText = 'border:none;background:transparent;font-size:14px;cursor:pointer;padding:2px 8px;';
    button.addEventListener('click', function (event) {
      event.preventDefault();
      event.stopPropagation();
      window.location.href = 'menusite-link://refresh';
    });
    bar.appendChild(button);
    document.body.appendChild(bar);
    document.documentElement.style.setProperty('margin-top', '30px', 'important');
  }
  if (document.readyState === 'loading') {
    document.addEventListener('DOMContentLoaded', install);
  } else {
    install();
  }
})();
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// First load into a surface with no history.
    Initial,
    LinkActivated,
    Reload,
    FormSubmitted,
    FormResubmitted,
    BackForward,
    /// Redirects, script-driven and app-driven navigations.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    /// Let the surface load the URL it was asked to load.
    Allow,
    /// A link was captured; load its target in the surface.
    LoadInSurface(Url),
    /// Cancel and hand the URL to the system's default handler.
    OpenExternally(Url),
    /// The toolbar's refresh button; cancel and reload the current page.
    Reload,
    Cancel,
}

/// Core rule: only user link activations are affected by the flag.
pub fn should_open_externally(kind: NavigationKind, open_links_externally: bool) -> bool {
    match kind {
        NavigationKind::Initial
        | NavigationKind::Reload
        | NavigationKind::FormSubmitted
        | NavigationKind::FormResubmitted => false,
        NavigationKind::LinkActivated => open_links_externally,
        NavigationKind::BackForward | NavigationKind::Other => false,
    }
}

/// Per-surface navigation bookkeeping.
#[derive(Debug, Default)]
pub struct NavigationTracker {
    committed: bool,
    pending: Option<NavigationKind>,
}

impl NavigationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks that the surface has content, so later navigations are no
    /// longer the initial load.
    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    /// Announces the kind of the next navigation the app itself triggers.
    pub fn expect(&mut self, kind: NavigationKind) {
        self.pending = Some(kind);
    }

    /// Resolves a navigation request into its kind and effective target.
    pub fn classify(&mut self, url: &Url) -> (NavigationKind, Option<Url>) {
        if url.scheme() == LINK_SCHEME {
            return (NavigationKind::LinkActivated, decode_link_target(url));
        }
        if !self.committed {
            self.pending = None;
            return (NavigationKind::Initial, Some(url.clone()));
        }
        let kind = self.pending.take().unwrap_or(NavigationKind::Other);
        (kind, Some(url.clone()))
    }

    pub fn decide(&mut self, url: &Url, open_links_externally: bool) -> NavigationDecision {
        if is_refresh_request(url) {
            return NavigationDecision::Reload;
        }
        let (kind, target) = self.classify(url);
        let Some(target) = target else {
            return NavigationDecision::Cancel;
        };
        if should_open_externally(kind, open_links_externally) {
            return NavigationDecision::OpenExternally(target);
        }
        if kind == NavigationKind::LinkActivated {
            self.expect(NavigationKind::Other);
            NavigationDecision::LoadInSurface(target)
        } else {
            NavigationDecision::Allow
        }
    }
}

fn is_refresh_request(url: &Url) -> bool {
    url.scheme() == LINK_SCHEME && url.host_str() == Some(REFRESH_HOST)
}

fn decode_link_target(url: &Url) -> Option<Url> {
    let raw = url
        .query_pairs()
        .find(|(key, _)| key == "target")
        .map(|(_, value)| value.into_owned())?;
    let target = Url::parse(&raw).ok()?;
    matches!(target.scheme(), "http" | "https").then_some(target)
}

/// Lifecycle events of the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    LoadFinished,
    ProvisionalLoadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceAction {
    ScheduleIconRefresh,
    LoadFallback,
}

pub fn react(event: SurfaceEvent) -> SurfaceAction {
    match event {
        SurfaceEvent::LoadFinished => SurfaceAction::ScheduleIconRefresh,
        SurfaceEvent::ProvisionalLoadFailed => SurfaceAction::LoadFallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Same URL the capture script builds for a clicked link.
    fn encode_link(target: &str) -> String {
        format!(
            "{LINK_SCHEME}://activate?target={}",
            urlencoding::encode(target)
        )
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn loaded_tracker() -> NavigationTracker {
        let mut tracker = NavigationTracker::new();
        tracker.mark_committed();
        tracker
    }

    #[test]
    fn link_activation_goes_external_when_enabled() {
        let mut tracker = loaded_tracker();
        let sentinel = url(&encode_link("https://other.example/"));
        assert_eq!(
            tracker.decide(&sentinel, true),
            NavigationDecision::OpenExternally(url("https://other.example/"))
        );
    }

    #[test]
    fn link_activation_stays_in_surface_when_disabled() {
        let mut tracker = loaded_tracker();
        let sentinel = url(&encode_link("https://other.example/a?b=c&d=e#f"));
        assert_eq!(
            tracker.decide(&sentinel, false),
            NavigationDecision::LoadInSurface(url("https://other.example/a?b=c&d=e#f"))
        );
        // The follow-up load of the target is ours and must pass.
        assert_eq!(
            tracker.decide(&url("https://other.example/a?b=c&d=e#f"), true),
            NavigationDecision::Allow
        );
    }

    #[test]
    fn reload_and_forms_are_always_allowed() {
        for kind in [
            NavigationKind::Reload,
            NavigationKind::FormSubmitted,
            NavigationKind::FormResubmitted,
            NavigationKind::Initial,
        ] {
            assert!(!should_open_externally(kind, true), "{kind:?}");
            assert!(!should_open_externally(kind, false), "{kind:?}");
        }

        let mut tracker = loaded_tracker();
        tracker.expect(NavigationKind::Reload);
        assert_eq!(
            tracker.decide(&url("https://other.example/"), true),
            NavigationDecision::Allow
        );
    }

    #[test]
    fn other_navigation_ignores_flag() {
        let mut tracker = loaded_tracker();
        assert_eq!(
            tracker.classify(&url("https://other.example/redirected")).0,
            NavigationKind::Other
        );
        assert_eq!(
            tracker.decide(&url("https://other.example/"), true),
            NavigationDecision::Allow
        );
        assert!(!should_open_externally(NavigationKind::BackForward, true));
    }

    #[test]
    fn navigations_before_first_load_are_initial() {
        let mut tracker = NavigationTracker::new();
        assert_eq!(
            tracker.classify(&url("https://home.example/")).0,
            NavigationKind::Initial
        );
        assert_eq!(
            tracker.decide(&url("https://home.example/"), true),
            NavigationDecision::Allow
        );
    }

    #[test]
    fn malformed_sentinel_is_cancelled() {
        let mut tracker = loaded_tracker();
        assert_eq!(
            tracker.decide(&url("menusite-link://activate?target=javascript%3Aalert(1)"), true),
            NavigationDecision::Cancel
        );
        assert_eq!(
            tracker.decide(&url("menusite-link://activate"), false),
            NavigationDecision::Cancel
        );
    }

    #[test]
    fn toolbar_refresh_requests_a_reload() {
        let refresh = format!("{LINK_SCHEME}://{REFRESH_HOST}");
        assert!(TOOLBAR_SCRIPT.contains(&refresh));

        let mut tracker = loaded_tracker();
        tracker.expect(NavigationKind::Reload);
        assert_eq!(tracker.decide(&url(&refresh), true), NavigationDecision::Reload);
        // The reload itself is still pending and passes.
        assert_eq!(
            tracker.classify(&url("https://home.example/")).0,
            NavigationKind::Reload
        );

        let mut fresh = NavigationTracker::new();
        assert_eq!(fresh.decide(&url(&refresh), false), NavigationDecision::Reload);
    }

    #[test]
    fn surface_events_map_to_actions() {
        assert_eq!(react(SurfaceEvent::LoadFinished), SurfaceAction::ScheduleIconRefresh);
        assert_eq!(react(SurfaceEvent::ProvisionalLoadFailed), SurfaceAction::LoadFallback);
    }
}
