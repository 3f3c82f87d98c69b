use crate::next_prev::LinkRule;
use crate::types::{
    Action, AppendMode, ButtonMethod, Detection, DividerAlign, DividerMode, MediaType, RuleType,
    ScrollBehavior,
};
use clap::Parser;

pub const DEFAULT_URL: &str = "https://news.ycombinator.com/";

/// Lower bound on the scroll listener throttle, in ms.
pub const MIN_THROTTLE_MS: u64 = 100;

const NEXT_SELECTOR: &str = "[rel=\"next\"]";
const NEXT_XPATH: &str = "//*[@rel=\"next\"]";
const PREV_SELECTOR: &str = "[rel=\"prev\"],[rel=\"previous\"]";
const PREV_XPATH: &str = "//*[@rel=\"prev\"]|//*[@rel=\"previous\"]";

const NEXT_KEYWORDS: [&str; 21] = [
    "pnnext", "nextpage", "next-page", "next_page", "next>", "next»", "next→", "next",
    "moreresults", "olderposts", "olderpost", "older", "forward", "下一页", "次のページ", "次",
    "&gt;", ">", "›", "→", "»",
];

const PREV_KEYWORDS: [&str; 21] = [
    "pnprev", "previouspage", "prevpage", "prev-page", "prev_page", "<prev", "«prev", "←prev",
    "prev", "previous", "newerposts", "newerpost", "newer", "上一页", "前のページ", "前", "&lt;",
    "<", "‹", "←", "«",
];

/// Everything a new instance is built from. Read-only to the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub action: Action,
    pub append: AppendMode,
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
    pub interval: i64,
    /// The part of the URL to increment; the last number in it when unset.
    pub selection: Option<String>,
    pub detection: Detection,
    pub throttle_ms: u64,
    pub threshold_pages: u32,
    pub threshold_pixels: f64,
    pub append_delay_ms: u64,
    pub divider: DividerMode,
    pub divider_align: DividerAlign,
    pub overlay: bool,
    pub loading: bool,
    pub icon: bool,
    pub append_scripts: bool,
    pub append_styles: bool,
    pub update_address: bool,
    pub update_title: bool,
    pub scroll_behavior: ScrollBehavior,
    pub decode_uri: bool,
    pub resize_media: bool,
    pub custom_scripts: bool,
    pub auto_times: u32,
    pub auto_seconds: u64,
    pub auto_slideshow: bool,
    pub auto_repeat: bool,
    pub auto_start: bool,
    pub auto_behavior: ScrollBehavior,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            action: Action::Next,
            append: AppendMode::Page,
            next: LinkRule {
                rule_type: RuleType::Selector,
                selector: NEXT_SELECTOR.to_string(),
                xpath: NEXT_XPATH.to_string(),
                attribute: vec!["href".to_string()],
                keywords_enabled: true,
                keywords: NEXT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            },
            prev: LinkRule {
                rule_type: RuleType::Selector,
                selector: PREV_SELECTOR.to_string(),
                xpath: PREV_XPATH.to_string(),
                attribute: vec!["href".to_string()],
                keywords_enabled: true,
                keywords: PREV_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            },
            element_type: RuleType::Selector,
            element_rule: "body > *".to_string(),
            insert_rule: String::new(),
            media_type: MediaType::Image,
            button_type: RuleType::Selector,
            button_rule: "#load-more-button".to_string(),
            button_method: ButtonMethod::Click,
            urls: Vec::new(),
            interval: 1,
            selection: None,
            detection: Detection::Listener,
            throttle_ms: 200,
            threshold_pages: 0,
            threshold_pixels: 500.0,
            append_delay_ms: 2000,
            divider: DividerMode::Element,
            divider_align: DividerAlign::Center,
            overlay: false,
            loading: true,
            icon: true,
            append_scripts: false,
            append_styles: false,
            update_address: true,
            update_title: true,
            scroll_behavior: ScrollBehavior::Auto,
            decode_uri: false,
            resize_media: true,
            custom_scripts: true,
            auto_times: 10,
            auto_seconds: 2,
            auto_slideshow: false,
            auto_repeat: false,
            auto_start: false,
            auto_behavior: ScrollBehavior::Smooth,
            debug: false,
        }
    }
}

// --- CLI ---
#[derive(Parser, Debug)]
#[command(author, version, about = "Infinite scrolling for the terminal")]
pub struct Cli {
    #[arg(default_value = DEFAULT_URL, env = "BAD_SCROLL_URL")]
    pub url: String,

    /// How the next page's URL is found
    #[arg(long, value_enum, default_value_t = Action::Next, env = "BAD_SCROLL_ACTION")]
    pub action: Action,
    /// How the next page is added to the current one
    #[arg(long, value_enum, default_value_t = AppendMode::Page, env = "BAD_SCROLL_APPEND")]
    pub append: AppendMode,

    #[arg(long, value_enum, default_value_t = RuleType::Selector, env = "BAD_SCROLL_NEXT_TYPE")]
    pub next_type: RuleType,
    #[arg(long, default_value = NEXT_SELECTOR, env = "BAD_SCROLL_NEXT_SELECTOR")]
    pub next_selector: String,
    #[arg(long, default_value = NEXT_XPATH, env = "BAD_SCROLL_NEXT_XPATH")]
    pub next_xpath: String,
    /// Dotted property path read from the matched element
    #[arg(long, default_value = "href", env = "BAD_SCROLL_NEXT_ATTRIBUTE")]
    pub next_attribute: String,
    #[arg(long, env = "BAD_SCROLL_NO_NEXT_KEYWORDS")]
    pub no_next_keywords: bool,
    /// Comma-separated, replaces the built-in list
    #[arg(long, value_delimiter = ',', env = "BAD_SCROLL_NEXT_KEYWORDS")]
    pub next_keywords: Vec<String>,

    #[arg(long, value_enum, default_value_t = RuleType::Selector, env = "BAD_SCROLL_PREV_TYPE")]
    pub prev_type: RuleType,
    #[arg(long, default_value = PREV_SELECTOR, env = "BAD_SCROLL_PREV_SELECTOR")]
    pub prev_selector: String,
    #[arg(long, default_value = PREV_XPATH, env = "BAD_SCROLL_PREV_XPATH")]
    pub prev_xpath: String,
    #[arg(long, default_value = "href", env = "BAD_SCROLL_PREV_ATTRIBUTE")]
    pub prev_attribute: String,
    #[arg(long, env = "BAD_SCROLL_NO_PREV_KEYWORDS")]
    pub no_prev_keywords: bool,
    #[arg(long, value_delimiter = ',', env = "BAD_SCROLL_PREV_KEYWORDS")]
    pub prev_keywords: Vec<String>,

    #[arg(long, value_enum, default_value_t = RuleType::Selector, env = "BAD_SCROLL_ELEMENT_TYPE")]
    pub element_type: RuleType,
    /// Page elements appended in element mode
    #[arg(long, default_value = "body > *", env = "BAD_SCROLL_ELEMENT_RULE")]
    pub element_rule: String,
    /// Node new elements are inserted before, on the first page
    #[arg(long, default_value = "", env = "BAD_SCROLL_INSERT_RULE")]
    pub insert_rule: String,
    #[arg(long, value_enum, default_value_t = MediaType::Image, env = "BAD_SCROLL_MEDIA")]
    pub media: MediaType,

    #[arg(long, value_enum, default_value_t = RuleType::Selector, env = "BAD_SCROLL_BUTTON_TYPE")]
    pub button_type: RuleType,
    #[arg(long, default_value = "#load-more-button", env = "BAD_SCROLL_BUTTON_RULE")]
    pub button_rule: String,

    /// URLs visited in order by the list action
    #[arg(long = "list", value_delimiter = ',', env = "BAD_SCROLL_LIST")]
    pub urls: Vec<String>,
    #[arg(long, default_value_t = 1, env = "BAD_SCROLL_INTERVAL")]
    pub interval: i64,
    #[arg(long, env = "BAD_SCROLL_SELECTION")]
    pub selection: Option<String>,

    #[arg(long, value_enum, default_value_t = Detection::Listener, env = "BAD_SCROLL_DETECTION")]
    pub detection: Detection,
    /// Scroll listener throttle in ms (at least 100)
    #[arg(long, default_value_t = 200, env = "BAD_SCROLL_THROTTLE")]
    pub throttle: u64,
    #[arg(long, default_value_t = 0, env = "BAD_SCROLL_THRESHOLD_PAGES")]
    pub threshold_pages: u32,
    #[arg(long, default_value_t = 500.0, env = "BAD_SCROLL_THRESHOLD_PIXELS")]
    pub threshold_pixels: f64,
    /// Settle time after each append in ms
    #[arg(long, default_value_t = 2000, env = "BAD_SCROLL_APPEND_DELAY")]
    pub append_delay: u64,

    #[arg(long, value_enum, default_value_t = DividerMode::Element, env = "BAD_SCROLL_DIVIDER")]
    pub divider: DividerMode,
    #[arg(long, value_enum, default_value_t = DividerAlign::Center, env = "BAD_SCROLL_DIVIDER_ALIGN")]
    pub divider_align: DividerAlign,
    #[arg(long, env = "BAD_SCROLL_OVERLAY")]
    pub overlay: bool,
    #[arg(long, env = "BAD_SCROLL_NO_LOADING")]
    pub no_loading: bool,
    #[arg(long, env = "BAD_SCROLL_NO_ICON")]
    pub no_icon: bool,
    #[arg(long, env = "BAD_SCROLL_APPEND_SCRIPTS")]
    pub append_scripts: bool,
    #[arg(long, env = "BAD_SCROLL_APPEND_STYLES")]
    pub append_styles: bool,
    #[arg(long, env = "BAD_SCROLL_NO_UPDATE_ADDRESS")]
    pub no_update_address: bool,
    #[arg(long, env = "BAD_SCROLL_NO_UPDATE_TITLE")]
    pub no_update_title: bool,
    #[arg(long, value_enum, default_value_t = ScrollBehavior::Auto, env = "BAD_SCROLL_BEHAVIOR")]
    pub behavior: ScrollBehavior,
    #[arg(long, env = "BAD_SCROLL_DECODE_URI")]
    pub decode_uri: bool,
    #[arg(long, env = "BAD_SCROLL_NO_RESIZE_MEDIA")]
    pub no_resize_media: bool,
    #[arg(long, env = "BAD_SCROLL_NO_CUSTOM_SCRIPTS")]
    pub no_custom_scripts: bool,

    #[arg(long, default_value_t = 10, env = "BAD_SCROLL_AUTO_TIMES")]
    pub auto_times: u32,
    #[arg(long, default_value_t = 2, env = "BAD_SCROLL_AUTO_SECONDS")]
    pub auto_seconds: u64,
    #[arg(long, env = "BAD_SCROLL_AUTO_SLIDESHOW")]
    pub auto_slideshow: bool,
    #[arg(long, env = "BAD_SCROLL_AUTO_REPEAT")]
    pub auto_repeat: bool,
    /// Start auto as soon as the page loads
    #[arg(long, env = "BAD_SCROLL_AUTO")]
    pub auto: bool,
    #[arg(long, value_enum, default_value_t = ScrollBehavior::Smooth, env = "BAD_SCROLL_AUTO_BEHAVIOR")]
    pub auto_behavior: ScrollBehavior,

    #[arg(long, env = "BAD_SCROLL_DEBUG")]
    pub debug: bool,
    /// Append N pages without a terminal, then print the result
    #[arg(long, value_name = "N")]
    pub dump: Option<u32>,
}

fn attribute_path(raw: &str) -> Vec<String> {
    raw.split('.')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn keywords_or(custom: &[String], defaults: &[&str]) -> Vec<String> {
    let custom: Vec<String> = custom
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if custom.is_empty() {
        defaults.iter().map(|k| k.to_string()).collect()
    } else {
        custom
    }
}

impl Cli {
    pub fn settings(&self) -> Settings {
        Settings {
            action: self.action,
            append: self.append,
            next: LinkRule {
                rule_type: self.next_type,
                selector: self.next_selector.clone(),
                xpath: self.next_xpath.clone(),
                attribute: attribute_path(&self.next_attribute),
                keywords_enabled: !self.no_next_keywords,
                keywords: keywords_or(&self.next_keywords, &NEXT_KEYWORDS),
            },
            prev: LinkRule {
                rule_type: self.prev_type,
                selector: self.prev_selector.clone(),
                xpath: self.prev_xpath.clone(),
                attribute: attribute_path(&self.prev_attribute),
                keywords_enabled: !self.no_prev_keywords,
                keywords: keywords_or(&self.prev_keywords, &PREV_KEYWORDS),
            },
            element_type: self.element_type,
            element_rule: self.element_rule.clone(),
            insert_rule: self.insert_rule.clone(),
            media_type: self.media,
            button_type: self.button_type,
            button_rule: self.button_rule.clone(),
            button_method: ButtonMethod::Click,
            urls: self
                .urls
                .iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            interval: self.interval,
            selection: self.selection.clone().filter(|s| !s.is_empty()),
            detection: self.detection,
            throttle_ms: self.throttle.max(MIN_THROTTLE_MS),
            threshold_pages: self.threshold_pages,
            threshold_pixels: self.threshold_pixels,
            append_delay_ms: self.append_delay,
            divider: self.divider,
            divider_align: self.divider_align,
            overlay: self.overlay,
            loading: !self.no_loading,
            icon: !self.no_icon,
            append_scripts: self.append_scripts,
            append_styles: self.append_styles,
            update_address: !self.no_update_address,
            update_title: !self.no_update_title,
            scroll_behavior: self.behavior,
            decode_uri: self.decode_uri,
            resize_media: !self.no_resize_media,
            custom_scripts: !self.no_custom_scripts,
            auto_times: self.auto_times,
            auto_seconds: self.auto_seconds,
            auto_slideshow: self.auto_slideshow,
            auto_repeat: self.auto_repeat,
            auto_start: self.auto,
            auto_behavior: self.auto_behavior,
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_settings_defaults() {
        let cli = Cli::parse_from(["bad-scroll"]);
        assert_eq!(cli.settings(), Settings::default());
        assert_eq!(cli.url, DEFAULT_URL);
        assert_eq!(cli.dump, None);
    }

    #[test]
    fn flags_map_onto_settings() {
        let cli = Cli::parse_from([
            "bad-scroll",
            "https://example.com/p/1",
            "--append",
            "element",
            "--detection",
            "io",
            "--throttle",
            "20",
            "--next-attribute",
            "dataset.next",
            "--next-keywords",
            " More ,later",
            "--no-prev-keywords",
            "--list",
            "https://example.com/a,https://example.com/b",
            "--dump",
            "3",
        ]);
        let settings = cli.settings();
        assert_eq!(settings.append, AppendMode::Element);
        assert_eq!(settings.detection, Detection::Observer);
        assert_eq!(settings.throttle_ms, MIN_THROTTLE_MS);
        assert_eq!(settings.next.attribute, vec!["dataset", "next"]);
        assert_eq!(settings.next.keywords, vec!["more", "later"]);
        assert!(!settings.prev.keywords_enabled);
        assert_eq!(settings.urls.len(), 2);
        assert_eq!(cli.dump, Some(3));
    }

    #[test]
    fn default_keyword_lists_are_ordered() {
        let settings = Settings::default();
        assert_eq!(settings.next.keywords.first().map(String::as_str), Some("pnnext"));
        assert_eq!(settings.prev.keywords.last().map(String::as_str), Some("«"));
        assert_eq!(settings.next.selector, "[rel=\"next\"]");
    }
}
