use crate::dom::Document;
use crate::utils::log_msg;
use url::Url;

/// Attributes lazy-loading libraries keep the real image URL in, most common first.
const LAZY_SOURCES: [&str; 4] = ["data-src", "data-original", "data-lazy-src", "data-url"];

/// A fix-up for fetched documents of particular sites. Runs on the unstripped document,
/// before its scripts are removed, in page and element modes only.
pub trait SiteScript: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, url: &Url) -> bool;
    fn run(&self, doc: &mut Document);
}

/// Copies lazy-load attributes into `src`, since the page's own loader never runs on a
/// fetched document.
pub struct LazyImages;

impl SiteScript for LazyImages {
    fn name(&self) -> &str {
        "lazy-images"
    }

    fn matches(&self, _url: &Url) -> bool {
        true
    }

    fn run(&self, doc: &mut Document) {
        let Ok(images) = doc.select_all("img") else {
            return;
        };
        for img in images {
            let lazy = LAZY_SOURCES
                .iter()
                .find_map(|name| doc.attr(img, name).filter(|v| !v.trim().is_empty()))
                .map(str::to_string);
            if let Some(src) = lazy {
                doc.set_attr(img, "src", &src);
            }
        }
    }
}

pub struct SiteScripts {
    scripts: Vec<Box<dyn SiteScript>>,
}

impl Default for SiteScripts {
    fn default() -> Self {
        let mut scripts = Self::empty();
        scripts.register(Box::new(LazyImages));
        scripts
    }
}

impl SiteScripts {
    pub fn empty() -> Self {
        Self {
            scripts: Vec::new(),
        }
    }

    pub fn register(&mut self, script: Box<dyn SiteScript>) -> usize {
        self.scripts.push(script);
        self.scripts.len() - 1
    }

    /// Index of the first script that applies to `url`.
    pub fn find(&self, url: &Url) -> Option<usize> {
        self.scripts.iter().position(|s| s.matches(url))
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.scripts.get(index).map(|s| s.name())
    }

    pub fn run(&self, index: usize, doc: &mut Document) {
        if let Some(script) = self.scripts.get(index) {
            log_msg("info", &format!("Running site script {}", script.name()));
            script.run(doc);
        }
    }
}
