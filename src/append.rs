//! Appending the next page: the five append modes and the shared finalize step.

use crate::dom::{Document, NodeId};
use crate::elements::{
    calculate_col_span, calculate_offset, divider_tags, insertion_point, locate_elements,
    page_element,
};
use crate::fetch::{FetchRequest, prepare_document};
use crate::layout::DIVIDER_MARK;
use crate::session::{Page, Pending, Session, Settle};
use crate::types::{AppendMode, Caller, DividerAlign, FetchOutcome, MediaType};
use crate::utils::log_msg;
use std::time::{Duration, Instant};

pub const LOADING_ID: &str = "bad-scroll-loading";
const DIVIDER_ID: &str = "bad-scroll-divider-";
const MEDIA_STYLE: &str = "text-align: center";
/// Settle delay after an auto step, in place of the configured append delay.
const AUTO_SETTLE: Duration = Duration::from_millis(100);

/// Fits images (and in media mode, videos) to the viewport.
fn resize_media(doc: &mut Document, mode: AppendMode, container: NodeId, enabled: bool) {
    let media: Vec<NodeId> = doc
        .descendant_elements(container)
        .into_iter()
        .filter(|id| match doc.tag(*id) {
            Some("img") => true,
            Some("video") => mode == AppendMode::Media,
            _ => false,
        })
        .collect();
    match mode {
        AppendMode::Page | AppendMode::Iframe if enabled => {
            for id in media {
                let mut style = doc.attr(id, "style").unwrap_or_default().trim().to_string();
                if !style.is_empty() && !style.ends_with(';') {
                    style.push(';');
                }
                style.push_str(" object-fit: scale-down;");
                // An existing max-width is kept; it may be narrower.
                if doc
                    .style_value(id, "max-width")
                    .is_none_or(|v| v.eq_ignore_ascii_case("none"))
                {
                    style.push_str(" max-width: 100%;");
                }
                doc.set_attr(id, "style", style.trim());
            }
        }
        AppendMode::Media => {
            let style = if enabled {
                "object-fit: scale-down; max-width: 100%; max-height: 100vh; position: initial;"
            } else {
                "position: initial;"
            };
            for id in media {
                doc.set_attr(id, "style", style);
            }
        }
        _ => {}
    }
}

impl Session {
    /// Appends the page at `instance.url` in the configured mode. `is_loading` is already
    /// set by the trigger and stays set until the append settles or fails.
    pub(crate) fn append(&mut self, caller: Caller, now: Instant) {
        let mode = self.instance.append_mode;
        log_msg(
            "info",
            &format!(
                "Appending page {} in {mode:?} mode for {caller:?}: {}",
                self.pages.len() + 1,
                self.instance.url
            ),
        );
        if mode == AppendMode::None {
            self.append_none(caller, now);
            return;
        }
        self.append_divider();
        match mode {
            AppendMode::Page => self.append_page(caller),
            AppendMode::Iframe => self.append_iframe(caller),
            AppendMode::Element => self.request_next_document(caller, None, true),
            AppendMode::Media => self.append_media(caller, now),
            AppendMode::None => {}
        }
        if self.pending.is_some() {
            self.append_loading();
        }
    }

    fn append_page(&mut self, caller: Caller) {
        let Some(body) = self.document.body() else {
            return self.request_next_document(caller, None, true);
        };
        let page = self.document.create_element("div", &[]);
        self.document.append_child(body, page);
        self.request_next_document(caller, Some(page), true);
    }

    fn append_iframe(&mut self, caller: Caller) {
        let Some(body) = self.document.body() else {
            return self.request_next_document(caller, None, false);
        };
        let url = self.instance.url.clone();
        let iframe = self
            .document
            .create_element("iframe", &[("src", url.as_str()), ("scrolling", "no"), ("frameborder", "0")]);
        self.document.append_child(body, iframe);
        // The frame loads whatever the server answers, error pages included.
        self.request_next_document(caller, Some(iframe), false);
    }

    fn append_media(&mut self, caller: Caller, now: Instant) {
        let Some(body) = self.document.body() else {
            return self.append_finally(None, caller, now);
        };
        let url = self.instance.url.clone();
        let media = self.document.create_element("div", &[("style", MEDIA_STYLE)]);
        let node = match self.instance.media_type {
            MediaType::Image => self.document.create_element("img", &[("src", url.as_str())]),
            MediaType::Video => {
                let video = self
                    .document
                    .create_element("video", &[("name", "media"), ("controls", "controls")]);
                let source = self.document.create_element("source", &[("src", url.as_str())]);
                self.document.append_child(video, source);
                video
            }
        };
        self.document.append_child(media, node);
        self.document.append_child(body, media);
        resize_media(
            &mut self.document,
            AppendMode::Media,
            media,
            self.settings.resize_media,
        );
        self.append_finally(Some(media), caller, now);
    }

    /// Nothing is added here; the site is expected to add content itself, so only the
    /// page count moves once the delay passes.
    fn append_none(&mut self, caller: Caller, now: Instant) {
        self.schedule_settle(caller, caller != Caller::FirstPage, now);
    }

    fn request_next_document(&mut self, caller: Caller, container: Option<NodeId>, link_action: bool) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending = Some(Pending {
            ticket,
            caller,
            container,
        });
        self.fetcher.fetch(FetchRequest {
            ticket,
            url: self.instance.url.clone(),
            charset: self.instance.document_character_set.clone(),
            link_action: link_action && self.instance.action.follows_links(),
        });
    }

    /// Continues an append once its fetch is back.
    pub(crate) fn complete_fetch(
        &mut self,
        pending: Pending,
        url: &str,
        outcome: FetchOutcome,
        now: Instant,
    ) {
        let text = match outcome {
            FetchOutcome::Text { text, fallback } => {
                if fallback {
                    log_msg("info", &format!("Loaded {url} with the fallback transport"));
                }
                text
            }
            FetchOutcome::Rejected(status) => {
                self.notice = Some(format!("HTTP {status} for {url}"));
                return self.roll_back(&pending, now);
            }
            FetchOutcome::Failed(e) => {
                self.notice = Some(format!("Could not load {url}: {e}"));
                return self.roll_back(&pending, now);
            }
        };
        let mode = self.instance.append_mode;
        let next = prepare_document(
            &text,
            url,
            &self.instance.document_content_type,
            mode,
            self.instance.script,
            &self.scripts,
        );
        let element = match mode {
            AppendMode::Page => self.fill_page(pending.container, &next.document),
            AppendMode::Iframe => self.fill_frame(pending.container, next.original.clone()),
            AppendMode::Element => self.fill_elements(&next.document),
            AppendMode::Media | AppendMode::None => None,
        };
        self.latest = next.original;
        if element.is_none() {
            self.notice = Some(format!("Nothing to append from {url}"));
            return self.roll_back(&pending, now);
        }
        self.append_finally(element, pending.caller, now);
    }

    fn roll_back(&mut self, pending: &Pending, now: Instant) {
        if let Some(container) = pending.container {
            self.document.remove(container);
            if self.frames.remove(&container).is_some() {
                self.frame_layouts.remove(&container);
                self.frames_revision += 1;
            }
        }
        self.append_finally(None, pending.caller, now);
    }

    fn fill_page(&mut self, container: Option<NodeId>, next: &Document) -> Option<NodeId> {
        let page = container.filter(|id| self.document.contains(*id))?;
        let body = next.body()?;
        for child in next.children(body) {
            if let Some(copy) = self.document.import(next, child) {
                self.document.append_child(page, copy);
            }
        }
        resize_media(
            &mut self.document,
            AppendMode::Page,
            page,
            self.settings.resize_media,
        );
        Some(page)
    }

    fn fill_frame(&mut self, container: Option<NodeId>, mut frame: Document) -> Option<NodeId> {
        let iframe = container.filter(|id| self.document.contains(*id))?;
        if let Some(body) = frame.body() {
            resize_media(&mut frame, AppendMode::Iframe, body, self.settings.resize_media);
        }
        self.frames.insert(iframe, frame);
        self.layout_frame(iframe);
        Some(iframe)
    }

    fn fill_elements(&mut self, next: &Document) -> Option<NodeId> {
        let rule_type = self.instance.element_type;
        let rule = self.instance.element_rule.clone();
        let insert_rule = self.instance.insert_rule.clone();
        let located = locate_elements(next, rule_type, &rule);
        if located.elements.is_empty() {
            log_msg("warn", &format!("No elements for `{rule}` on the next page"));
            return None;
        }
        let attached = self
            .insert
            .is_some_and(|id| self.document.contains(id) && self.document.parent(id).is_some());
        if !attached {
            log_msg("info", "The insertion point was moved, recalculating it");
            let current = locate_elements(&self.document, rule_type, &rule).elements;
            self.insert = insertion_point(&mut self.document, &current, false, rule_type, &insert_rule);
        }
        let insert = self.insert?;
        let mut imported = Vec::new();
        for id in located.elements {
            if let Some(copy) = self.document.import(next, id)
                && self.document.insert_before(insert, copy)
            {
                imported.push(copy);
            }
        }
        self.refresh_layout();
        let element = match page_element(&self.document, &self.layout, &imported) {
            Some(element) => element,
            None => {
                log_msg("info", "No page element found, creating a span");
                let span = self.document.create_element("span", &[]);
                self.document.insert_before(insert, span);
                imported.insert(0, span);
                span
            }
        };
        self.insert = insertion_point(&mut self.document, &imported, false, rule_type, &insert_rule);
        Some(element)
    }

    /// The shared tail of every mode but none: registers the page or, with no element,
    /// undoes the divider.
    pub(crate) fn append_finally(&mut self, element: Option<NodeId>, caller: Caller, now: Instant) {
        self.hide_loading();
        let Some(element) = element else {
            log_msg("info", "Nothing appended, removing the divider");
            if let Some(divider) = self.divider.take() {
                self.document.remove(divider);
            }
            self.instance.is_loading = false;
            return;
        };
        let mode = self.instance.append_mode;
        if matches!(mode, AppendMode::Page | AppendMode::Element) && caller != Caller::FirstPage {
            self.reinject_assets();
        }
        let point = match self.divider {
            Some(divider) if self.document.contains(divider) => divider,
            _ => element,
        };
        let page = Page {
            number: self.pages.len() + 1,
            element,
            divider: self.divider,
            url: self.instance.url.clone(),
            title: self.latest.title(),
            point,
        };
        log_msg(
            "info",
            &format!("Appended page {} ({}) for {caller:?}", page.number, page.url),
        );
        self.pages.push(page);
        self.instance.total_pages = self.pages.len();
        self.observe(point);
        let reveal = matches!(caller, Caller::Shortcut | Caller::Popup)
            || (caller == Caller::Auto && self.instance.auto_slideshow);
        if reveal {
            self.scroll_into_view(point, self.instance.scroll_behavior, now);
        }
        if caller == Caller::Popup {
            self.instance.current_page = self.pages.len();
        }
        self.update_overlay();
        self.schedule_settle(caller, false, now);
    }

    fn schedule_settle(&mut self, caller: Caller, counts_page: bool, now: Instant) {
        let delay = if caller == Caller::Auto {
            AUTO_SETTLE
        } else {
            Duration::from_millis(self.settings.append_delay_ms)
        };
        self.settle = Some(Settle {
            due: now + delay,
            caller,
            counts_page,
        });
    }

    /// Clears loading once the append delay has passed, then hands over to auto or
    /// checks whether another page is wanted right away.
    pub(crate) fn settled(&mut self, settle: Settle, now: Instant) {
        self.instance.is_loading = false;
        if settle.counts_page {
            self.instance.total_pages += 1;
            self.update_overlay();
        }
        if self.instance.auto_enabled && settle.caller != Caller::FirstPage {
            self.auto_listener(now);
        } else if self.should_append() {
            self.trigger(self.instance.action, Caller::Append, now);
        }
    }

    /// Copies the fetched page's scripts and styles into the host head.
    fn reinject_assets(&mut self) {
        let Some(head) = self.document.head() else {
            return;
        };
        let wanted = [
            ("script", self.instance.append_scripts),
            ("style", self.instance.append_styles),
        ];
        for (tag, enabled) in wanted {
            if !enabled {
                continue;
            }
            let nodes = match self.latest.select_all(tag) {
                Ok(nodes) => nodes,
                Err(e) => {
                    log_msg("warn", &format!("Could not collect {tag} elements: {e}"));
                    continue;
                }
            };
            for node in &nodes {
                let text = self.latest.raw_text(*node);
                let copy = self.document.create_element_with_text(tag, &[], &text);
                self.document.append_child(head, copy);
            }
            log_msg("info", &format!("Re-injected {} {tag} elements", nodes.len()));
        }
    }

    /// Registers what is already on the page as page 1.
    pub(crate) fn prepare_first_page(&mut self, now: Instant) {
        let mode = self.instance.append_mode;
        log_msg("info", &format!("Preparing the first page in {mode:?} mode"));
        let Some(body) = self.document.body() else {
            return self.append_finally(None, Caller::FirstPage, now);
        };
        match mode {
            AppendMode::Page | AppendMode::Iframe => {
                self.refresh_layout();
                let children = self.document.element_children(body);
                let element = page_element(&self.document, &self.layout, &children).or_else(|| {
                    let all = self.document.descendant_elements(body);
                    page_element(&self.document, &self.layout, &all)
                });
                let element = element.unwrap_or_else(|| {
                    let span = self.document.create_element("span", &[]);
                    self.document.prepend_child(body, span);
                    span
                });
                resize_media(
                    &mut self.document,
                    AppendMode::Page,
                    body,
                    self.settings.resize_media,
                );
                self.append_finally(Some(element), Caller::FirstPage, now);
            }
            AppendMode::Element => {
                let rule_type = self.instance.element_type;
                let located = locate_elements(&self.document, rule_type, &self.instance.element_rule);
                let insert_rule = self.instance.insert_rule.clone();
                self.insert =
                    insertion_point(&mut self.document, &located.elements, true, rule_type, &insert_rule);
                self.refresh_layout();
                let mut element = page_element(&self.document, &self.layout, &located.elements);
                let parented = self.insert.is_some_and(|id| self.document.parent(id).is_some());
                if element.is_none()
                    && parented
                    && let Some(&first) = located.elements.first()
                {
                    let span = self.document.create_element("span", &[]);
                    self.document.insert_before(first, span);
                    element = Some(span);
                }
                let bottom = self.document_bottom();
                self.offset = calculate_offset(
                    &self.document,
                    &self.layout,
                    bottom,
                    self.insert,
                    &located.elements,
                );
                self.append_finally(element, Caller::FirstPage, now);
            }
            AppendMode::Media => {
                let media = self.document.create_element("div", &[("style", MEDIA_STYLE)]);
                self.document.move_children(body, media);
                self.document.append_child(body, media);
                resize_media(
                    &mut self.document,
                    AppendMode::Media,
                    media,
                    self.settings.resize_media,
                );
                self.append_finally(Some(media), Caller::FirstPage, now);
            }
            AppendMode::None => self.append_none(Caller::FirstPage, now),
        }
    }

    pub(crate) fn create_loading(&mut self) {
        if self.settings.loading {
            let loading = self.document.create_element_with_text(
                "div",
                &[("id", LOADING_ID), ("hidden", "")],
                "Loading…",
            );
            self.loading = Some(loading);
        }
    }

    /// Shows the loading node at the bottom of the body. There is only ever one.
    fn append_loading(&mut self) {
        if let (Some(loading), Some(body)) = (self.loading, self.document.body()) {
            self.document.remove_attr(loading, "hidden");
            self.document.append_child(body, loading);
        }
    }

    pub(crate) fn hide_loading(&mut self) {
        if let Some(loading) = self.loading
            && self.document.attr(loading, "hidden").is_none()
        {
            self.document.set_attr(loading, "hidden", "");
        }
    }

    /// Adds the "Page N" divider ahead of the next page, or forgets the last one when
    /// dividers are off.
    fn append_divider(&mut self) {
        if !self.instance.wants_divider() {
            self.divider = None;
            return;
        }
        let element_mode = self.instance.append_mode == AppendMode::Element;
        let insert = self.insert.filter(|_| element_mode);
        let parent_tag = insert
            .and_then(|id| self.document.parent(id))
            .and_then(|parent| self.document.tag(parent))
            .map(str::to_string);
        let (tag, inner) = divider_tags(parent_tag.as_deref());
        let col_span = match insert {
            Some(insert) if tag == "tr" => {
                Some(calculate_col_span(&self.document, self.divider, insert))
            }
            _ => None,
        };
        let align = match self.settings.divider_align {
            DividerAlign::Left => "left",
            DividerAlign::Center => "center",
            DividerAlign::Right => "right",
        };
        let style = format!("clear: both; margin: 0 auto; text-align: {align}");
        let number = self.pages.len() + 1;
        let id = format!("{DIVIDER_ID}{number}");
        let divider = self
            .document
            .create_element(tag, &[("id", id.as_str()), (DIVIDER_MARK, ""), ("style", style.as_str())]);
        let span = col_span.map(|span| span.to_string());
        let mut container_attrs = vec![("style", style.as_str())];
        if let Some(span) = &span {
            container_attrs.push(("colspan", span.as_str()));
        }
        let container = self.document.create_element(inner, &container_attrs);
        let url = self.instance.url.clone();
        let anchor = self.document.create_element("a", &[("href", url.as_str())]);
        if self.settings.icon {
            let icon = self.document.create_element_with_text("span", &[], "∞ ");
            self.document.append_child(anchor, icon);
        }
        let label = self
            .document
            .create_element_with_text("span", &[], &format!("Page {number}"));
        self.document.append_child(anchor, label);
        self.document.append_child(container, anchor);
        self.document.append_child(divider, container);
        let placed = match (insert, self.document.body()) {
            (Some(insert), _) => self.document.insert_before(insert, divider),
            (None, Some(body)) => self.document.append_child(body, divider),
            (None, None) => false,
        };
        if !placed {
            log_msg("warn", &format!("Could not place divider {id}"));
        }
        self.divider = Some(divider);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MemoryTransport;
    use crate::session::testing::{PAGE_1, session_over, session_with};
    use crate::settings::Settings;
    use crate::types::{Action, Detection, DividerMode};

    const PAGE_2: &str = "https://example.com/p/2";
    const HOST: &str = "<title>One</title><p>first</p><a rel=next href=/p/2>next</a>";

    fn settings(append: AppendMode) -> Settings {
        Settings {
            append,
            divider: DividerMode::Yes,
            append_delay_ms: 0,
            ..Settings::default()
        }
    }

    fn count(session: &Session, css: &str) -> usize {
        session.document().select_all(css).unwrap().len()
    }

    #[test]
    fn page_mode_appends_the_next_body() {
        let pages = [
            (PAGE_1, HOST),
            (
                PAGE_2,
                "<title>Two</title><style>p { color: red }</style><script>two()</script><p>second</p>",
            ),
        ];
        let mut session = session_with(
            Settings {
                append_scripts: true,
                append_styles: true,
                ..settings(AppendMode::Page)
            },
            &pages,
        );
        let now = Instant::now();
        session.start(now);
        assert_eq!(session.pages().len(), 1);

        assert!(session.trigger(Action::Next, Caller::Shortcut, now));
        assert!(session.instance().is_loading);
        assert_eq!(count(&session, "#bad-scroll-divider-2"), 1);
        assert_eq!(count(&session, "#bad-scroll-loading:not([hidden])"), 1);
        // A second trigger while loading changes nothing.
        assert!(!session.trigger(Action::Next, Caller::Shortcut, now));
        assert_eq!(session.pages().len(), 1);

        session.wait_for_fetch(now);
        assert_eq!(session.pages().len(), 2);
        assert_eq!(session.instance().total_pages, 2);
        let page = &session.pages()[1];
        assert_eq!(page.url, PAGE_2);
        assert_eq!(page.title, "Two");
        assert_eq!(Some(page.point), page.divider);
        assert_eq!(count(&session, "body p"), 2);
        assert_eq!(count(&session, "body script"), 0);
        assert_eq!(count(&session, "head script"), 1);
        assert_eq!(count(&session, "head style"), 1);
        assert_eq!(count(&session, "#bad-scroll-loading[hidden]"), 1);
        assert!(session.instance().is_loading);

        session.tick(now);
        assert!(!session.instance().is_loading);
    }

    #[test]
    fn rejected_fetch_rolls_back() {
        let mut session = session_with(settings(AppendMode::Page), &[(PAGE_1, HOST)]);
        let now = Instant::now();
        session.start(now);
        let containers = count(&session, "body > div:not(#bad-scroll-loading)");

        assert!(session.trigger(Action::Next, Caller::Shortcut, now));
        session.wait_for_fetch(now);
        assert_eq!(session.pages().len(), 1);
        assert_eq!(session.instance().total_pages, 1);
        assert_eq!(count(&session, "#bad-scroll-divider-2"), 0);
        assert_eq!(count(&session, "body > div:not(#bad-scroll-loading)"), containers);
        assert!(!session.instance().is_loading);
        assert_eq!(
            session.notice(),
            Some("HTTP 404 for https://example.com/p/2")
        );
    }

    #[test]
    fn fallback_transport_still_appends() {
        let pages = [(PAGE_1, HOST), (PAGE_2, "<title>Two</title><p>second</p>")];
        let mut transport = MemoryTransport::with_pages(&pages);
        transport.primary_down = true;
        let mut session = session_over(settings(AppendMode::Page), transport, &pages);
        let now = Instant::now();
        session.start(now);
        assert!(session.trigger(Action::Next, Caller::Shortcut, now));
        session.wait_for_fetch(now);
        assert_eq!(session.pages().len(), 2);
    }

    #[test]
    fn table_dividers_span_the_first_row() {
        let host = "<table><tbody id=rows><tr><td colspan=2>a</td><td colspan=3>b</td></tr>\
                    <tr><td>c</td></tr></tbody></table><a rel=next href=/p/2>next</a>";
        let next = "<table><tbody id=rows><tr><td>d</td></tr></tbody></table>";
        let mut session = session_with(
            Settings {
                element_rule: "#rows > tr".to_string(),
                ..settings(AppendMode::Element)
            },
            &[(PAGE_1, host), (PAGE_2, next)],
        );
        let now = Instant::now();
        session.start(now);
        assert!(session.trigger(Action::Next, Caller::Shortcut, now));
        let divider = session
            .document()
            .select_first("tr#bad-scroll-divider-2")
            .unwrap()
            .unwrap();
        let cell = session.document().element_children(divider)[0];
        assert_eq!(session.document().tag(cell), Some("td"));
        assert_eq!(session.document().attr(cell, "colspan"), Some("5"));

        session.wait_for_fetch(now);
        assert_eq!(count(&session, "#rows > tr"), 4);
        assert_eq!(session.pages()[1].point, divider);
    }

    #[test]
    fn element_mode_inserts_before_the_insertion_point() {
        let host = "<div id=list><p>a</p><p>b</p></div><footer>f</footer><a rel=next href=/p/2>next</a>";
        let next = "<title>Two</title><div id=list><p>c</p></div><footer>g</footer>";
        let mut session = session_with(
            Settings {
                element_rule: "#list > p".to_string(),
                divider: DividerMode::Element,
                ..settings(AppendMode::Element)
            },
            &[(PAGE_1, host), (PAGE_2, next)],
        );
        let now = Instant::now();
        session.start(now);
        assert!(session.offset > 0.0);
        assert!(session.trigger(Action::Next, Caller::Shortcut, now));
        session.wait_for_fetch(now);

        let texts: Vec<String> = session
            .document()
            .select_all("#list > p")
            .unwrap()
            .into_iter()
            .map(|id| session.document().text(id))
            .collect();
        assert_eq!(texts, ["a", "b", "c"]);
        assert_eq!(count(&session, "footer"), 1);
        let page = &session.pages()[1];
        assert_eq!(session.document().text(page.element), "c");
        let insert = session.insert.unwrap();
        assert_eq!(
            session.document().parent(insert),
            session.document().select_first("#list").unwrap()
        );
    }

    #[test]
    fn element_mode_with_nothing_located_rolls_back() {
        let host = "<div id=list><p>a</p></div><a rel=next href=/p/2>next</a>";
        let mut session = session_with(
            Settings {
                element_rule: "#list > p".to_string(),
                ..settings(AppendMode::Element)
            },
            &[(PAGE_1, host), (PAGE_2, "<p>elsewhere</p>")],
        );
        let now = Instant::now();
        session.start(now);
        assert!(session.trigger(Action::Next, Caller::Shortcut, now));
        session.wait_for_fetch(now);
        assert_eq!(session.pages().len(), 1);
        assert_eq!(count(&session, "[data-bad-scroll-divider]"), 0);
        assert!(!session.instance().is_loading);
    }

    #[test]
    fn iframes_take_the_height_of_their_content() {
        let pages = [(PAGE_1, HOST), (PAGE_2, "<p>a</p><p>b</p>")];
        let mut session = session_with(settings(AppendMode::Iframe), &pages);
        let now = Instant::now();
        session.start(now);
        assert!(session.trigger(Action::Next, Caller::Shortcut, now));
        session.wait_for_fetch(now);
        let iframe = session.document().select_first("iframe").unwrap().unwrap();
        assert_eq!(session.pages()[1].element, iframe);
        assert_eq!(session.document().attr(iframe, "height"), Some("64"));
        assert!(session.frames.contains_key(&iframe));
    }

    #[test]
    fn media_first_page_wraps_the_body() {
        let mut session = session_with(
            Settings {
                action: Action::Increment,
                ..settings(AppendMode::Media)
            },
            &[("https://example.com/img/001.jpg", "<img src=001.jpg>")],
        );
        let now = Instant::now();
        session.start(now);
        let media = session.pages()[0].element;
        let img = session.document().select_first("img").unwrap().unwrap();
        assert_eq!(session.document().parent(img), Some(media));
        assert_eq!(
            session.document().style_value(img, "max-height").as_deref(),
            Some("100vh")
        );

        assert!(session.trigger(Action::Increment, Caller::Shortcut, now));
        assert_eq!(session.pages().len(), 2);
        assert_eq!(count(&session, "img[src='https://example.com/img/002.jpg']"), 1);
        assert_eq!(count(&session, "#bad-scroll-loading:not([hidden])"), 0);
    }

    #[test]
    fn none_mode_counts_pages_when_settled() {
        let mut session = session_with(
            Settings {
                action: Action::Button,
                button_rule: "#more".to_string(),
                ..settings(AppendMode::None)
            },
            &[(PAGE_1, "<p>feed</p><button id=more>More</button>")],
        );
        let now = Instant::now();
        session.start(now);
        assert_eq!(session.instance().total_pages, 0);
        assert!(session.trigger(Action::Button, Caller::Shortcut, now));
        assert_eq!(session.instance().total_pages, 0);
        session.tick(now);
        assert_eq!(session.instance().total_pages, 1);
        assert!(session.pages().is_empty());
    }

    #[test]
    fn observer_appends_at_the_last_page() {
        let body: String = (0..60).map(|i| format!("<div>row {i}</div>")).collect();
        let host = format!("{body}<a rel=next href=/p/2>next</a>");
        let mut session = session_with(
            Settings {
                detection: Detection::Observer,
                threshold_pages: 0,
                ..settings(AppendMode::Page)
            },
            &[(PAGE_1, &host), (PAGE_2, "<p>two</p>")],
        );
        let now = Instant::now();
        session.start(now);
        session.tick(now);
        assert_eq!(session.instance().current_page, 1);
        assert_eq!(session.instance().total_pages, 1);
        assert!(session.instance().is_loading);
        assert!(session.pending.is_some());
    }

    #[test]
    fn resize_keeps_narrower_max_widths() {
        let mut doc = Document::parse(
            "<div id=c><img id=a><img id=b style=\"max-width: 50px\"></div>",
            None,
        );
        let container = doc.select_first("#c").unwrap().unwrap();
        resize_media(&mut doc, AppendMode::Page, container, true);
        let a = doc.select_first("#a").unwrap().unwrap();
        let b = doc.select_first("#b").unwrap().unwrap();
        assert_eq!(doc.style_value(a, "max-width").as_deref(), Some("100%"));
        assert_eq!(doc.style_value(b, "max-width").as_deref(), Some("50px"));
        assert_eq!(doc.style_value(b, "object-fit").as_deref(), Some("scale-down"));

        let untouched = doc.attrs(a);
        resize_media(&mut doc, AppendMode::Page, container, false);
        assert_eq!(doc.attrs(a), untouched);
    }
}
