//! Scroll detection: when to append, and which page is on screen.

use crate::dom::NodeId;
use crate::instance::SCROLLBAR_APPENDS_MAX;
use crate::layout::{Layout, ROW_HEIGHT, Rect};
use crate::session::Session;
use crate::types::Caller;
use crate::utils::log_msg;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Bottom root margin of the observer, as a share of the viewport height.
const OBSERVER_MARGIN: f64 = 0.01;

/// The terminal window onto the document, in px.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: u16,
    pub height: f64,
    pub scroll_y: f64,
}

impl Viewport {
    pub fn new(width: u16, rows: u16) -> Self {
        Self {
            width,
            height: f64::from(rows) * ROW_HEIGHT,
            scroll_y: 0.0,
        }
    }

    pub fn first_row(&self) -> usize {
        (self.scroll_y / ROW_HEIGHT).floor() as usize
    }
}

/// Runs at most once per `wait`. A call inside the window is queued to fire once the
/// window ends; a newer call replaces the queued one.
#[derive(Clone, Debug)]
pub struct Throttle {
    wait: Duration,
    last: Option<Instant>,
    queued: Option<Instant>,
}

impl Throttle {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            last: None,
            queued: None,
        }
    }

    /// True when the caller should run now.
    pub fn call(&mut self, now: Instant) -> bool {
        self.queued = None;
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.wait => {
                self.queued = Some(last + self.wait);
                false
            }
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// True when a queued call is due; it then counts as run.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.queued {
            Some(due) if now >= due => {
                self.queued = None;
                self.last = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn is_queued(&self) -> bool {
        self.queued.is_some()
    }
}

/// A change in whether an observed node intersects the viewport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entry {
    pub target: NodeId,
    pub is_intersecting: bool,
}

/// Watches page points the way an intersection observer with a zero threshold does:
/// every newly observed node reports once, after that only changes are reported.
#[derive(Clone, Debug, Default)]
pub struct Observer {
    observed: Vec<NodeId>,
    states: HashMap<NodeId, bool>,
}

impl Observer {
    pub fn observe(&mut self, target: NodeId) {
        if !self.observed.contains(&target) {
            self.observed.push(target);
        }
    }

    pub fn disconnect(&mut self) {
        self.observed.clear();
        self.states.clear();
    }

    pub fn observed(&self) -> &[NodeId] {
        &self.observed
    }

    /// Entries for every observed node whose state changed, in observation order.
    pub fn take_entries(&mut self, layout: &Layout, viewport: &Viewport) -> Vec<Entry> {
        let top = viewport.scroll_y;
        let bottom = viewport.scroll_y + viewport.height * (1.0 + OBSERVER_MARGIN);
        let mut entries = Vec::new();
        for &target in &self.observed {
            let is_intersecting = layout
                .rect(target)
                .is_some_and(|r| r.top <= bottom && r.bottom >= top);
            if self.states.insert(target, is_intersecting) != Some(is_intersecting) {
                entries.push(Entry {
                    target,
                    is_intersecting,
                });
            }
        }
        entries
    }
}

/// The active detection strategy. Dropping it is the teardown.
#[derive(Clone, Debug)]
pub enum Subscription {
    Listener(Throttle),
    Observer(Observer),
}

/// Whether an element is on screen: partly, for elements at least as tall as the
/// viewport, else wholly, with a pixel of slack either way. Empty elements never are.
pub fn is_scrolled_into_view(rect: Rect, viewport: &Viewport) -> bool {
    if rect.height() <= 0.0 {
        return false;
    }
    let top = rect.top - viewport.scroll_y;
    let bottom = rect.bottom - viewport.scroll_y;
    if rect.height().round() >= viewport.height {
        top <= 1.0 && bottom >= 0.0
    } else {
        top >= -1.0 && bottom <= viewport.height
    }
}

impl Session {
    pub fn add_scroll_detection(&mut self) {
        self.remove_scroll_detection();
        let subscription = if self.instance.observes() {
            let mut observer = Observer::default();
            for page in &self.pages {
                observer.observe(page.point);
            }
            Subscription::Observer(observer)
        } else {
            Subscription::Listener(Throttle::new(Duration::from_millis(
                self.settings.throttle_ms,
            )))
        };
        log_msg(
            "info",
            &format!("Adding scroll detection: {:?}", self.instance.detection),
        );
        self.detection = Some(subscription);
    }

    pub fn remove_scroll_detection(&mut self) {
        if let Some(subscription) = self.detection.take() {
            log_msg("info", "Removing scroll detection");
            match subscription {
                Subscription::Observer(mut observer) => {
                    log_msg(
                        "debug",
                        &format!("Disconnecting from {} points", observer.observed().len()),
                    );
                    observer.disconnect();
                }
                Subscription::Listener(throttle) if throttle.is_queued() => {
                    log_msg("debug", "Dropping the queued listener call");
                }
                Subscription::Listener(_) => {}
            }
        }
    }

    pub(crate) fn observe(&mut self, point: NodeId) {
        if let Some(Subscription::Observer(observer)) = &mut self.detection {
            observer.observe(point);
        }
    }

    fn observing(&self) -> bool {
        matches!(self.detection, Some(Subscription::Observer(_)))
    }

    /// Called whenever the scroll position changes.
    pub fn on_scroll(&mut self, now: Instant) {
        let run = match &mut self.detection {
            Some(Subscription::Listener(throttle)) => throttle.call(now),
            _ => false,
        };
        if run {
            self.scroll_detection(None, now);
        }
    }

    /// Fires the queued listener call and pending observer entries.
    pub(crate) fn poll_detection(&mut self, now: Instant) {
        let trailing = match &mut self.detection {
            Some(Subscription::Listener(throttle)) => throttle.poll(now),
            _ => false,
        };
        if trailing {
            self.scroll_detection(None, now);
            return;
        }
        if !self.observing() {
            return;
        }
        self.refresh_layout();
        let entries = match &mut self.detection {
            Some(Subscription::Observer(observer)) => {
                observer.take_entries(&self.layout, &self.viewport)
            }
            _ => Vec::new(),
        };
        if let Some(entry) = entries.into_iter().rev().find(|e| e.is_intersecting) {
            log_msg("debug", &format!("Entry intersecting: {:?}", entry.target));
            self.scroll_detection(Some(entry.target), now);
        }
    }

    pub(crate) fn scroll_detection(&mut self, target: Option<NodeId>, now: Instant) {
        self.detect_current_page(target);
        if self.should_append() {
            self.trigger(self.instance.action, Caller::ScrollDetection, now);
        }
    }

    /// The page a node marks, falling back to the page element when the divider was
    /// removed by the site. `None` when neither is attached.
    pub(crate) fn page_point(&self, index: usize) -> Option<NodeId> {
        let page = self.pages.get(index)?;
        [page.point, page.element]
            .into_iter()
            .find(|id| self.document.contains(*id))
    }

    pub fn detect_current_page(&mut self, target: Option<NodeId>) {
        self.refresh_layout();
        let found = (0..self.pages.len()).find(|&index| {
            let Some(point) = self.page_point(index) else {
                return false;
            };
            match target {
                Some(target) => target == point,
                None => self
                    .layout
                    .rect(point)
                    .is_some_and(|rect| is_scrolled_into_view(rect, &self.viewport)),
            }
        });
        let Some(index) = found else {
            return;
        };
        let page = self.pages[index].clone();
        self.instance.current_page = page.number;
        log_msg(
            "debug",
            &format!("Current page {} at {}", page.number, page.url),
        );
        if !self.instance.is_local {
            if self.instance.update_address && !page.url.is_empty() && self.location != page.url {
                self.location = page.url.clone();
            }
            if self.instance.update_title && !page.title.is_empty() && self.title != page.title {
                self.title = page.title.clone();
            }
        }
        self.update_overlay();
    }

    /// Enabled, idle, not driven by auto, and near the bottom by the detection's measure.
    pub fn should_append(&mut self) -> bool {
        if !self.instance.enabled || self.instance.is_loading || self.instance.auto_enabled {
            return false;
        }
        if self.observing() {
            !self.scrollbar_exists() || self.scrolled_near_bottom_pages()
        } else {
            self.scrolled_near_bottom_pixels()
        }
    }

    /// Whether the document outgrows the viewport. Each miss counts toward a ceiling,
    /// past which the page is treated as scrollable; a hit is remembered for good.
    pub fn scrollbar_exists(&mut self) -> bool {
        if self.instance.scrollbar_exists || self.instance.scrollbar_appends >= SCROLLBAR_APPENDS_MAX
        {
            return true;
        }
        self.refresh_layout();
        let exists = self.layout.height > self.viewport.height;
        if exists {
            self.instance.scrollbar_exists = true;
        } else {
            self.instance.scrollbar_appends += 1;
        }
        log_msg(
            "info",
            &format!(
                "Scrollbar exists={exists}, appends={}, document height={}",
                self.instance.scrollbar_appends, self.layout.height
            ),
        );
        exists
    }

    pub fn scrolled_near_bottom_pages(&self) -> bool {
        let left = self.instance.total_pages.saturating_sub(self.instance.current_page);
        left <= self.instance.threshold_pages as usize
    }

    pub fn scrolled_near_bottom_pixels(&mut self) -> bool {
        let bottom = self.document_bottom();
        let content_bottom = bottom - self.offset;
        let position = self.viewport.scroll_y + self.viewport.height;
        let left = (content_bottom - position).floor();
        let scrolled = left <= self.instance.threshold_pixels;
        log_msg(
            "debug",
            &format!(
                "bottom={bottom} offset={} position={position} left={left} scrolled={scrolled}",
                self.offset
            ),
        );
        scrolled
    }

    /// The bottom of the document, at least one viewport tall.
    pub(crate) fn document_bottom(&mut self) -> f64 {
        self.refresh_layout();
        self.layout.height.max(self.viewport.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MemoryTransport;
    use crate::session::Page;
    use crate::session::testing::{PAGE_1, session_over};
    use crate::settings::Settings;
    use crate::types::ScrollBehavior;

    fn viewport(scroll_y: f64) -> Viewport {
        Viewport {
            width: 80,
            height: 160.0,
            scroll_y,
        }
    }

    #[test]
    fn throttle_runs_leading_and_one_trailing_call() {
        let start = Instant::now();
        let ms = Duration::from_millis;
        let mut throttle = Throttle::new(ms(200));
        assert!(throttle.call(start));
        assert!(!throttle.call(start + ms(50)));
        assert!(!throttle.call(start + ms(120)));
        assert!(throttle.is_queued());
        assert!(!throttle.poll(start + ms(199)));
        assert!(throttle.poll(start + ms(200)));
        assert!(!throttle.poll(start + ms(500)));
        assert!(!throttle.call(start + ms(300)));
        assert!(throttle.call(start + ms(400)));
        assert!(!throttle.is_queued());
    }

    #[test]
    fn short_elements_must_be_wholly_visible() {
        let rect = Rect {
            top: 200.0,
            bottom: 264.0,
        };
        assert!(is_scrolled_into_view(rect, &viewport(110.0)));
        assert!(!is_scrolled_into_view(rect, &viewport(100.0)));
        assert!(is_scrolled_into_view(rect, &viewport(201.0)));
        assert!(!is_scrolled_into_view(rect, &viewport(202.0)));
    }

    #[test]
    fn tall_elements_need_to_cover_the_top() {
        let rect = Rect {
            top: 200.0,
            bottom: 600.0,
        };
        assert!(!is_scrolled_into_view(rect, &viewport(100.0)));
        assert!(is_scrolled_into_view(rect, &viewport(199.0)));
        assert!(is_scrolled_into_view(rect, &viewport(600.0)));
        assert!(!is_scrolled_into_view(rect, &viewport(601.0)));
        let empty = Rect {
            top: 200.0,
            bottom: 200.0,
        };
        assert!(!is_scrolled_into_view(empty, &viewport(150.0)));
    }

    #[test]
    fn observer_reports_changes_only() {
        let doc = crate::dom::Document::parse("<p id=a>a</p><div style=\"height: 1px\"></div>", None);
        let a = doc.select_first("#a").unwrap().unwrap();
        let mut layout = Layout::default();
        layout.rects.insert(a, Rect { top: 400.0, bottom: 416.0 });
        let mut observer = Observer::default();
        observer.observe(a);
        observer.observe(a);
        assert_eq!(observer.observed().len(), 1);
        assert_eq!(
            observer.take_entries(&layout, &viewport(0.0)),
            vec![Entry { target: a, is_intersecting: false }]
        );
        assert!(observer.take_entries(&layout, &viewport(10.0)).is_empty());
        // Inside the 1% bottom margin: 250 + 160 * 1.01 = 411.6.
        assert_eq!(
            observer.take_entries(&layout, &viewport(250.0)),
            vec![Entry { target: a, is_intersecting: true }]
        );
        observer.disconnect();
        assert!(observer.take_entries(&layout, &viewport(250.0)).is_empty());
    }

    fn session(url: &str, html: &str, settings: Settings) -> Session {
        let pages = [(url, html)];
        session_over(settings, MemoryTransport::with_pages(&pages), &pages)
    }

    fn grow(session: &mut Session, rows: usize) -> Vec<NodeId> {
        let body = session.document.body().unwrap();
        (0..rows)
            .map(|i| {
                let row = session
                    .document
                    .create_element_with_text("div", &[], &format!("row {i}"));
                session.document.append_child(body, row);
                row
            })
            .collect()
    }

    #[test]
    fn scrollbar_misses_stop_counting_at_the_ceiling() {
        let mut session = session(PAGE_1, "<p>short</p>", Settings::default());
        for miss in 1..=SCROLLBAR_APPENDS_MAX {
            assert!(!session.scrollbar_exists());
            assert_eq!(session.instance.scrollbar_appends, miss);
        }
        // Past the ceiling the answer is forced; the grown document is never laid out.
        grow(&mut session, 30);
        assert!(session.scrollbar_exists());
        assert!(session.layout.height <= session.viewport.height);
        assert!(!session.instance.scrollbar_exists);
        assert_eq!(session.instance.scrollbar_appends, SCROLLBAR_APPENDS_MAX);
    }

    #[test]
    fn a_scrollbar_once_seen_is_kept() {
        let mut session = session(PAGE_1, "<p>short</p>", Settings::default());
        assert!(!session.scrollbar_exists());
        let rows = grow(&mut session, 30);
        assert!(session.scrollbar_exists());
        assert!(session.instance.scrollbar_exists);

        for row in rows {
            session.document.remove(row);
        }
        session.refresh_layout();
        assert!(session.layout.height <= session.viewport.height);
        assert!(session.scrollbar_exists());
        assert_eq!(session.instance.scrollbar_appends, 1);
    }

    fn two_pages(url: &str, settings: Settings) -> (Session, NodeId, NodeId) {
        let rows = |n: usize| "<div>row</div>".repeat(n);
        let html = format!(
            "<title>One</title><div id=p1>first</div>{}<div id=d2>Page 2</div><div id=p2>second</div>{}",
            rows(4),
            rows(20)
        );
        let mut session = session(url, &html, settings);
        let id = |s: &Session, css: &str| s.document.select_first(css).unwrap().unwrap();
        let (p1, d2, p2) = (id(&session, "#p1"), id(&session, "#d2"), id(&session, "#p2"));
        session.pages = vec![
            Page {
                number: 1,
                element: p1,
                divider: None,
                url: url.to_string(),
                title: "One".to_string(),
                point: p1,
            },
            Page {
                number: 2,
                element: p2,
                divider: Some(d2),
                url: "https://example.com/p/2".to_string(),
                title: "Two".to_string(),
                point: d2,
            },
        ];
        session.instance.total_pages = 2;
        (session, d2, p2)
    }

    fn scroll_to_node(session: &mut Session, id: NodeId) {
        session.refresh_layout();
        let top = session.layout.rect(id).unwrap().top;
        session.scroll_to(top, ScrollBehavior::Auto, Instant::now());
        assert_eq!(session.viewport.scroll_y, top);
    }

    #[test]
    fn the_first_page_in_view_is_current() {
        let (mut session, d2, _) = two_pages(PAGE_1, Settings::default());
        // Both points fit in the viewport at the top; the earlier page wins.
        session.detect_current_page(None);
        assert_eq!(session.instance.current_page, 1);
        assert_eq!(session.location(), PAGE_1);

        scroll_to_node(&mut session, d2);
        session.detect_current_page(None);
        assert_eq!(session.instance.current_page, 2);
        assert_eq!(session.location(), "https://example.com/p/2");
        assert_eq!(session.title(), "Two");

        session.scroll_to(0.0, ScrollBehavior::Auto, Instant::now());
        session.detect_current_page(None);
        assert_eq!(session.instance.current_page, 1);
        assert_eq!(session.location(), PAGE_1);
        assert_eq!(session.title(), "One");
    }

    #[test]
    fn a_removed_divider_falls_back_to_the_page_element() {
        let (mut session, d2, p2) = two_pages(PAGE_1, Settings::default());
        session.document.remove(d2);
        assert_eq!(session.page_point(1), Some(p2));

        scroll_to_node(&mut session, p2);
        session.detect_current_page(None);
        assert_eq!(session.instance.current_page, 2);

        session.instance.current_page = 1;
        session.detect_current_page(Some(p2));
        assert_eq!(session.instance.current_page, 2);
    }

    #[test]
    fn address_and_title_follow_their_settings() {
        let settings = Settings {
            update_address: false,
            update_title: false,
            ..Settings::default()
        };
        let (mut session, d2, _) = two_pages(PAGE_1, settings);
        session.detect_current_page(Some(d2));
        assert_eq!(session.instance.current_page, 2);
        assert_eq!(session.location(), PAGE_1);
        assert_eq!(session.title(), "One");

        let settings = Settings {
            update_title: false,
            ..Settings::default()
        };
        let (mut session, d2, _) = two_pages(PAGE_1, settings);
        session.detect_current_page(Some(d2));
        assert_eq!(session.location(), "https://example.com/p/2");
        assert_eq!(session.title(), "One");

        let local = "file:///tmp/one.html";
        let (mut session, d2, _) = two_pages(local, Settings::default());
        assert!(session.instance.is_local);
        session.detect_current_page(Some(d2));
        assert_eq!(session.instance.current_page, 2);
        assert_eq!(session.location(), local);
        assert_eq!(session.title(), "One");
    }

    #[test]
    fn no_matching_page_leaves_state_alone() {
        let (mut session, d2, p2) = two_pages(PAGE_1, Settings::default());
        session.detect_current_page(None);
        assert_eq!(session.instance.current_page, 1);

        // Past the divider neither point is in view.
        session.refresh_layout();
        let below = session.layout.rect(d2).unwrap().top + 2.0 * ROW_HEIGHT;
        session.scroll_to(below, ScrollBehavior::Auto, Instant::now());
        session.detect_current_page(None);
        assert_eq!(session.instance.current_page, 1);
        assert_eq!(session.location(), PAGE_1);
        assert_eq!(session.title(), "One");

        // The page element is not a point while its divider is attached.
        session.detect_current_page(Some(p2));
        assert_eq!(session.instance.current_page, 1);
        assert_eq!(session.location(), PAGE_1);
    }
}
