use crate::action::{ButtonClicker, SyntheticClick, inspect_button};
use crate::auto::AutoTimer;
use crate::dom::{Document, NodeId};
use crate::elements::{locate_elements, preview_insertion_point};
use crate::fetch::{DocumentFetcher, FallbackTransport, LoadedPage, PrimaryTransport};
use crate::instance::Instance;
use crate::layout::{Layout, ROW_HEIGHT, RenderedLine, layout_document};
use crate::message::{ElementReport, Request, Response};
use crate::next_prev::{Resolution, resolve_link};
use crate::scripts::SiteScripts;
use crate::scroll::{Subscription, Viewport};
use crate::settings::Settings;
use crate::types::{BgEvent, Caller, ScrollBehavior};
use crate::utils::log_msg;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;
use url::Url;

/// One appended unit of content.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// 1-based.
    pub number: usize,
    pub element: NodeId,
    pub divider: Option<NodeId>,
    pub url: String,
    pub title: String,
    /// The node watched for this page: the divider while attached, else the element.
    pub point: NodeId,
}

/// The "Page x / y" box, drawn over the top right of the page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub visible: bool,
    pub page: String,
    pub debug: Option<String>,
}

/// A fetch the session is waiting on.
#[derive(Clone, Debug)]
pub(crate) struct Pending {
    pub ticket: u64,
    pub caller: Caller,
    /// The page container or iframe already in the document.
    pub container: Option<NodeId>,
}

/// The settle delay after an append, before loading clears and detection re-checks.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Settle {
    pub due: Instant,
    pub caller: Caller,
    /// Set for appends that add nothing themselves; the page count grows when they settle.
    pub counts_page: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct LayoutKey {
    revision: u64,
    frames: u64,
    width: u16,
    height: u64,
}

/// Owns one page's engine state. Every mutation goes through its methods; the shell
/// drives it with requests, scroll events and ticks.
pub struct Session {
    pub(crate) instance: Instance,
    pub(crate) settings: Settings,
    pub(crate) document: Document,
    /// The last fetched document, unstripped. Links are resolved on it.
    pub(crate) latest: Document,
    pub(crate) location: String,
    pub(crate) title: String,
    pub(crate) pages: Vec<Page>,
    pub(crate) insert: Option<NodeId>,
    pub(crate) offset: f64,
    pub(crate) divider: Option<NodeId>,
    pub(crate) loading: Option<NodeId>,
    pub(crate) overlay: Option<Overlay>,
    pub(crate) frames: HashMap<NodeId, Document>,
    pub(crate) frame_layouts: HashMap<NodeId, Layout>,
    pub(crate) frames_revision: u64,
    pub(crate) viewport: Viewport,
    pub(crate) layout: Layout,
    layout_key: Option<LayoutKey>,
    pub(crate) detection: Option<Subscription>,
    pub(crate) settle: Option<Settle>,
    pub(crate) auto: Option<AutoTimer>,
    pub(crate) scroll_target: Option<f64>,
    pub(crate) fetcher: DocumentFetcher,
    rx: Receiver<BgEvent>,
    pub(crate) pending: Option<Pending>,
    pub(crate) next_ticket: u64,
    pub(crate) scripts: SiteScripts,
    pub(crate) clicker: Box<dyn ButtonClicker>,
    pub(crate) notice: Option<String>,
}

impl Session {
    pub fn new(
        settings: Settings,
        page: LoadedPage,
        primary: Arc<dyn PrimaryTransport>,
        fallback: Arc<dyn FallbackTransport>,
        scripts: SiteScripts,
        viewport: Viewport,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let document = Document::parse_as(&page.text, Some(page.url.clone()), &page.content_type);
        let instance = Instance::build(
            &settings,
            &page.url,
            &page.charset,
            &page.content_type,
            &scripts,
        );
        log_msg(
            "info",
            &format!(
                "Session for {} ({}, {}), action {:?}, append {:?}",
                page.url, page.charset, page.content_type, instance.action, instance.append_mode
            ),
        );
        if let Some(name) = instance.script.and_then(|i| scripts.name(i)) {
            log_msg("info", &format!("Site script {name} applies"));
        }
        Self {
            instance,
            settings,
            title: document.title(),
            latest: document.clone(),
            document,
            location: page.url.to_string(),
            pages: Vec::new(),
            insert: None,
            offset: 0.0,
            divider: None,
            loading: None,
            overlay: None,
            frames: HashMap::new(),
            frame_layouts: HashMap::new(),
            frames_revision: 0,
            viewport,
            layout: Layout::default(),
            layout_key: None,
            detection: None,
            settle: None,
            auto: None,
            scroll_target: None,
            fetcher: DocumentFetcher::new(primary, fallback, tx),
            rx,
            pending: None,
            next_ticket: 0,
            scripts,
            clicker: Box::new(SyntheticClick),
            notice: None,
        }
    }

    pub fn with_clicker(mut self, clicker: Box<dyn ButtonClicker>) -> Self {
        self.clicker = clicker;
        self
    }

    // --- accessors for the shell ---

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref().filter(|o| o.visible)
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn lines(&mut self) -> &[RenderedLine] {
        self.refresh_layout();
        &self.layout.lines
    }

    // --- messages ---

    pub fn handle(&mut self, request: Request, now: Instant) -> Response {
        match request {
            Request::GetInstance => Response::Instance(Box::new(self.instance.clone())),
            Request::Start { instance } => {
                let current_page = self.instance.current_page;
                self.instance = *instance;
                self.start(now);
                self.instance.is_loading = false;
                self.instance.current_page = current_page;
                self.instance.total_pages = self.pages.len();
                Response::Started
            }
            Request::Stop => {
                self.stop();
                Response::Stopped
            }
            Request::PerformAction { action, caller } => Response::Performed {
                triggered: self.trigger(action, caller, now),
            },
            Request::CheckNextPrev { rule } => {
                let resolution = match Url::parse(&self.location) {
                    Ok(current) => {
                        resolve_link(&rule, self.instance.decode_uri, &self.latest, &current)
                    }
                    Err(e) => Resolution::NotFound {
                        error: Some(e.to_string()),
                    },
                };
                Response::NextPrev(resolution)
            }
            Request::CheckScrollElement {
                rule_type,
                rule,
                insert_rule,
            } => {
                let located = locate_elements(&self.latest, rule_type, &rule);
                let (insert, insert_details) = preview_insertion_point(
                    &self.latest,
                    &located.elements,
                    true,
                    rule_type,
                    &insert_rule,
                );
                let parent = insert.and_then(|id| self.latest.parent(id));
                Response::ScrollElement(ElementReport {
                    found: !located.elements.is_empty() && parent.is_some(),
                    elements_length: located.elements.len(),
                    insert_details,
                    parent_node: parent
                        .and_then(|id| self.latest.tag(id))
                        .unwrap_or_default()
                        .to_string(),
                    error: located.error,
                })
            }
            Request::CheckButton {
                rule_type,
                rule,
                method,
            } => Response::Button(inspect_button(&self.document, rule_type, &rule, method)),
            Request::AddAutoListener { caller } => {
                self.instance.auto_enabled = true;
                self.start_auto_timer(caller, now);
                Response::AutoListenerAdded
            }
            Request::PauseOrResumeAuto => {
                self.pause_or_resume_auto_timer(now);
                Response::AutoToggled {
                    paused: self.instance.auto_paused,
                }
            }
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.instance.enabled = true;
        if !self.instance.started {
            self.instance.started = true;
            self.create_overlay();
            self.create_loading();
            self.prepare_first_page(now);
        }
        self.add_scroll_detection();
        if let Some(overlay) = &mut self.overlay {
            overlay.visible = true;
        }
        if self.settings.auto_start && !self.instance.auto_enabled {
            self.instance.auto_enabled = true;
            self.start_auto_timer(Caller::FirstPage, now);
        }
    }

    pub fn stop(&mut self) {
        self.remove_scroll_detection();
        if let Some(overlay) = &mut self.overlay {
            overlay.visible = false;
        }
        self.hide_loading();
        if self.instance.auto_enabled {
            self.stop_auto_timer(None);
        }
        let instance = &mut self.instance;
        instance.enabled = false;
        instance.auto_enabled = false;
        instance.auto_paused = false;
        instance.auto_repeat = false;
        instance.auto_times = instance.auto_times_original;
        instance.auto_repeat_count = 0;
        log_msg("info", "Stopped");
    }

    // --- event loop ---

    /// Applies finished fetches.
    pub fn handle_events(&mut self, now: Instant) {
        while let Ok(event) = self.rx.try_recv() {
            self.on_event(event, now);
        }
    }

    fn on_event(&mut self, event: BgEvent, now: Instant) {
        match event {
            BgEvent::Fetched {
                ticket,
                url,
                outcome,
            } => {
                let Some(pending) = self.pending.take_if(|p| p.ticket == ticket) else {
                    log_msg("warn", &format!("Ignoring stale fetch of {url}"));
                    return;
                };
                self.complete_fetch(pending, &url, outcome, now);
            }
        }
    }

    /// Runs everything that is due: fetch results, smooth scrolling, the queued
    /// listener call, observer entries, the append settle and the auto timer.
    pub fn tick(&mut self, now: Instant) {
        self.handle_events(now);
        self.step_scroll(now);
        self.poll_detection(now);
        if let Some(settle) = self.settle.take_if(|s| now >= s.due) {
            self.settled(settle, now);
        }
        if self.auto.as_mut().is_some_and(|timer| timer.fire(now)) {
            self.auto_step(now);
        }
    }

    // --- scrolling ---

    pub fn set_viewport(&mut self, width: u16, rows: u16) {
        let scroll_y = self.viewport.scroll_y;
        self.viewport = Viewport {
            scroll_y,
            ..Viewport::new(width, rows)
        };
    }

    fn max_scroll(&mut self) -> f64 {
        self.refresh_layout();
        (self.layout.height - self.viewport.height).max(0.0)
    }

    pub fn scroll_by(&mut self, delta: f64, now: Instant) {
        self.scroll_target = None;
        let y = self.viewport.scroll_y + delta;
        self.set_scroll(y, now);
    }

    pub fn scroll_to(&mut self, y: f64, behavior: ScrollBehavior, now: Instant) {
        match behavior {
            ScrollBehavior::Auto => {
                self.scroll_target = None;
                self.set_scroll(y, now);
            }
            ScrollBehavior::Smooth => self.scroll_target = Some(y.max(0.0)),
        }
    }

    /// Brings a node to the top of the viewport.
    pub(crate) fn scroll_into_view(&mut self, id: NodeId, behavior: ScrollBehavior, now: Instant) {
        self.refresh_layout();
        if let Some(rect) = self.layout.rect(id) {
            self.scroll_to(rect.top, behavior, now);
        }
    }

    fn set_scroll(&mut self, y: f64, now: Instant) {
        let max = self.max_scroll();
        let y = (y / ROW_HEIGHT).round() * ROW_HEIGHT;
        let y = y.clamp(0.0, max);
        if y != self.viewport.scroll_y {
            self.viewport.scroll_y = y;
            self.on_scroll(now);
        }
    }

    /// Moves a quarter of the way to the smooth scroll target, at least one row.
    fn step_scroll(&mut self, now: Instant) {
        let Some(target) = self.scroll_target else {
            return;
        };
        let target = target.min(self.max_scroll());
        let distance = target - self.viewport.scroll_y;
        if distance.abs() <= ROW_HEIGHT {
            self.scroll_target = None;
            self.set_scroll(target, now);
            return;
        }
        let step = (distance / 4.0).abs().max(ROW_HEIGHT).copysign(distance);
        self.set_scroll(self.viewport.scroll_y + step, now);
    }

    // --- layout ---

    pub(crate) fn refresh_layout(&mut self) {
        let key = LayoutKey {
            revision: self.document.revision(),
            frames: self.frames_revision,
            width: self.viewport.width,
            height: self.viewport.height.to_bits(),
        };
        if self.layout_key == Some(key) {
            return;
        }
        if self.layout_key.is_some_and(|old| old.width != key.width) && !self.frames.is_empty() {
            self.relayout_frames();
            return self.refresh_layout();
        }
        self.layout = layout_document(
            &self.document,
            self.viewport.width,
            self.viewport.height,
            &self.frame_layouts,
        );
        self.layout_key = Some(key);
    }

    /// Lays out every frame document again and fixes its iframe's height to match.
    pub(crate) fn relayout_frames(&mut self) {
        let ids: Vec<NodeId> = self.frames.keys().copied().collect();
        for id in ids {
            self.layout_frame(id);
        }
        self.layout_key = None;
    }

    pub(crate) fn layout_frame(&mut self, iframe: NodeId) {
        let Some(frame) = self.frames.get(&iframe) else {
            return;
        };
        let layout = layout_document(
            frame,
            self.viewport.width,
            self.viewport.height,
            &HashMap::new(),
        );
        let height = layout.height;
        self.frame_layouts.insert(iframe, layout);
        self.frames_revision += 1;
        if height > 0.0 {
            self.document
                .set_attr(iframe, "height", &format!("{height}"));
        } else {
            self.document.remove_attr(iframe, "height");
        }
    }

    pub(crate) fn update_overlay(&mut self) {
        let text = format!(
            "Page {} / {}",
            self.instance.current_page, self.instance.total_pages
        );
        let debug = self.settings.debug.then(|| {
            let bottom = self.layout.height.max(self.viewport.height);
            format!(
                "Debug Mode - bottom={bottom}, 0.75 bottom offset={}, offset={}",
                bottom - bottom * 0.75,
                self.offset
            )
        });
        if let Some(overlay) = &mut self.overlay {
            overlay.page = text;
            overlay.debug = debug;
        }
    }

    fn create_overlay(&mut self) {
        if self.instance.overlay {
            self.overlay = Some(Overlay {
                visible: true,
                page: String::new(),
                debug: self.settings.debug.then(|| "Debug Mode - Initialized".to_string()),
            });
            self.update_overlay();
        }
    }

    #[cfg(test)]
    pub(crate) fn wait_for_fetch(&mut self, now: Instant) {
        let event = self
            .rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("fetch finished");
        self.on_event(event, now);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::fetch::testing::MemoryTransport;

    pub const PAGE_1: &str = "https://example.com/p/1";

    /// A session over in-memory pages. The first entry is the host page.
    pub fn session_with(settings: Settings, pages: &[(&str, &str)]) -> Session {
        session_over(settings, MemoryTransport::with_pages(pages), pages)
    }

    pub fn session_over(
        settings: Settings,
        transport: MemoryTransport,
        pages: &[(&str, &str)],
    ) -> Session {
        let (url, text) = pages[0];
        let transport = Arc::new(transport);
        Session::new(
            settings,
            LoadedPage {
                url: Url::parse(url).unwrap(),
                text: text.to_string(),
                charset: "UTF-8".to_string(),
                content_type: "text/html".to_string(),
            },
            transport.clone(),
            transport,
            SiteScripts::default(),
            Viewport::new(80, 10),
        )
    }
}
