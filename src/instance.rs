use crate::next_prev::LinkRule;
use crate::scripts::SiteScripts;
use crate::settings::Settings;
use crate::types::{
    Action, AppendMode, ButtonMethod, Detection, DividerMode, MediaType, RuleType, ScrollBehavior,
};
use url::Url;

/// Most appends forced on a page that never grows a scrollbar.
pub const SCROLLBAR_APPENDS_MAX: u32 = 10;

/// Per-page engine state plus a snapshot of the configuration it was built from.
///
/// Copies handed out of the session are plain clones; the session's own value is the
/// only one ever mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub enabled: bool,
    pub started: bool,
    /// True from an append trigger until that append settles. At most one is in flight.
    pub is_loading: bool,
    /// The next URL to fetch, or the last one appended.
    pub url: String,
    pub action: Action,
    pub append_mode: AppendMode,
    pub current_page: usize,
    pub total_pages: usize,
    pub scrollbar_exists: bool,
    pub scrollbar_appends: u32,

    pub auto_enabled: bool,
    pub auto_paused: bool,
    pub auto_repeating: bool,
    pub auto_repeat: bool,
    pub auto_slideshow: bool,
    pub auto_times: u32,
    pub auto_times_original: u32,
    pub auto_seconds: u64,
    pub auto_repeat_count: u32,
    pub auto_behavior: ScrollBehavior,

    pub document_character_set: String,
    pub document_content_type: String,

    pub next: LinkRule,
    pub prev: LinkRule,
    pub element_type: RuleType,
    pub element_rule: String,
    pub insert_rule: String,
    pub media_type: MediaType,
    pub button_type: RuleType,
    pub button_rule: String,
    pub button_method: ButtonMethod,
    pub urls: Vec<String>,
    /// Index of the next URL the list action hands out.
    pub list_index: usize,
    pub interval: i64,
    pub selection: Option<String>,
    pub detection: Detection,
    pub divider: DividerMode,
    pub threshold_pages: u32,
    pub threshold_pixels: f64,
    pub update_address: bool,
    pub update_title: bool,
    pub overlay: bool,
    pub append_scripts: bool,
    pub append_styles: bool,
    pub scroll_behavior: ScrollBehavior,
    pub decode_uri: bool,
    /// Index into the session's site scripts.
    pub script: Option<usize>,
    pub is_local: bool,
}

impl Instance {
    pub fn build(
        settings: &Settings,
        url: &Url,
        charset: &str,
        content_type: &str,
        scripts: &SiteScripts,
    ) -> Self {
        let script = if settings.custom_scripts {
            scripts.find(url)
        } else {
            None
        };
        Self {
            enabled: true,
            started: false,
            is_loading: false,
            url: url.to_string(),
            action: settings.action,
            append_mode: settings.append,
            current_page: 0,
            total_pages: 0,
            scrollbar_exists: false,
            scrollbar_appends: 0,
            auto_enabled: false,
            auto_paused: false,
            auto_repeating: false,
            auto_repeat: settings.auto_repeat,
            auto_slideshow: settings.auto_slideshow,
            auto_times: settings.auto_times,
            auto_times_original: settings.auto_times,
            auto_seconds: settings.auto_seconds,
            auto_repeat_count: 0,
            auto_behavior: settings.auto_behavior,
            document_character_set: charset.to_string(),
            document_content_type: content_type.to_string(),
            next: settings.next.clone(),
            prev: settings.prev.clone(),
            element_type: settings.element_type,
            element_rule: settings.element_rule.clone(),
            insert_rule: settings.insert_rule.clone(),
            media_type: settings.media_type,
            button_type: settings.button_type,
            button_rule: settings.button_rule.clone(),
            button_method: settings.button_method,
            urls: settings.urls.clone(),
            list_index: 0,
            interval: settings.interval,
            selection: settings.selection.clone(),
            detection: settings.detection,
            divider: settings.divider,
            threshold_pages: settings.threshold_pages,
            threshold_pixels: settings.threshold_pixels,
            update_address: settings.update_address,
            update_title: settings.update_title,
            overlay: settings.overlay,
            append_scripts: settings.append_scripts,
            append_styles: settings.append_styles,
            scroll_behavior: settings.scroll_behavior,
            decode_uri: settings.decode_uri,
            script,
            is_local: url.scheme() == "file",
        }
    }

    /// The instance a new auto repeat cycle starts from. Only the repeat fields change.
    pub fn clone_for_repeat(&self) -> Self {
        Self {
            auto_times: self.auto_times_original,
            auto_repeating: true,
            auto_repeat_count: self.auto_repeat_count + 1,
            ..self.clone()
        }
    }

    /// Whether detection should watch page points rather than scroll position. Button
    /// appends add nothing to watch.
    pub fn observes(&self) -> bool {
        self.detection == Detection::Observer && self.action != Action::Button
    }

    /// Dividers are drawn everywhere with `yes`, and only between elements with `element`.
    pub fn wants_divider(&self) -> bool {
        match self.divider {
            DividerMode::Yes => true,
            DividerMode::Element => self.append_mode == AppendMode::Element,
            DividerMode::No => false,
        }
    }
}
