//! The trigger gate and the actions that work out the next URL.

use crate::dom::{Document, NodeId};
use crate::error::{Error, Result};
use crate::message::ButtonReport;
use crate::next_prev::{Resolution, resolve_link};
use crate::session::Session;
use crate::types::{Action, AppendMode, ButtonMethod, Caller, RuleType};
use crate::utils::log_msg;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;
use url::Url;

/// Counts synthetic clicks on a button, for sites that append content themselves.
pub const CLICKS_ATTR: &str = "data-bad-scroll-clicks";

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("literal pattern"));

/// Presses a "load more" button in the host document.
pub trait ButtonClicker {
    fn click(&mut self, doc: &mut Document, button: NodeId) -> Result<()>;
}

/// A document has no script engine to run a click handler, so a click is recorded on
/// the button itself.
pub struct SyntheticClick;

impl ButtonClicker for SyntheticClick {
    fn click(&mut self, doc: &mut Document, button: NodeId) -> Result<()> {
        let clicks = doc
            .attr(button, CLICKS_ATTR)
            .and_then(|c| c.parse::<u32>().ok())
            .unwrap_or(0);
        doc.set_attr(button, CLICKS_ATTR, &(clicks + 1).to_string());
        log_msg("info", &format!("Clicked button, {} clicks", clicks + 1));
        Ok(())
    }
}

fn is_clickable(doc: &Document, id: NodeId) -> bool {
    doc.is_element(id)
        && doc.attr(id, "disabled").is_none()
        && doc.attr(id, "hidden").is_none()
        && doc.style_value(id, "display").as_deref() != Some("none")
}

/// Whether the button rule finds something to click on `doc`.
pub fn inspect_button(
    doc: &Document,
    rule_type: RuleType,
    rule: &str,
    method: ButtonMethod,
) -> ButtonReport {
    match doc.query_first(rule_type, rule) {
        Ok(Some(id)) => {
            let clickable = is_clickable(doc, id);
            let text = doc.text(id);
            ButtonReport {
                found: true,
                clickable,
                details: format!(
                    "{method:?} <{}> {}",
                    doc.tag(id).unwrap_or_default(),
                    text.trim()
                ),
                error: None,
            }
        }
        Ok(None) => ButtonReport {
            details: "the button rule matched nothing".to_string(),
            ..ButtonReport::default()
        },
        Err(e) => ButtonReport {
            error: Some(e.to_string()),
            ..ButtonReport::default()
        },
    }
}

impl Session {
    /// Runs `action` and starts an append when it yields something. A no-op while
    /// disabled or while an append is in flight. Returns whether an append started.
    pub fn trigger(&mut self, action: Action, caller: Caller, now: Instant) -> bool {
        if !self.instance.enabled || self.instance.is_loading {
            log_msg(
                "debug",
                &format!(
                    "Ignoring {action:?} from {caller:?}: enabled={} loading={}",
                    self.instance.enabled, self.instance.is_loading
                ),
            );
            return false;
        }
        self.instance.is_loading = true;
        // Only the first page settles without loading set; this append supersedes it.
        self.settle = None;
        let result = match action {
            Action::Next | Action::Prev => self.next_prev(action),
            Action::Increment | Action::Decrement => self.increment_decrement(action),
            Action::List => self.next_in_list(),
            Action::Button => self.press_button(),
        };
        match result {
            Ok(()) => {
                log_msg(
                    "info",
                    &format!("{action:?} from {caller:?}, appending {}", self.instance.url),
                );
                self.notice = None;
                self.append(caller, now);
                true
            }
            Err(e) => {
                log_msg("warn", &format!("{action:?} from {caller:?} failed: {e}"));
                self.instance.is_loading = false;
                self.notice = Some(e.to_string());
                false
            }
        }
    }

    fn next_prev(&mut self, action: Action) -> Result<()> {
        let rule = if action == Action::Prev {
            &self.instance.prev
        } else {
            &self.instance.next
        };
        let current = Url::parse(&self.location).map_err(|e| Error::Url {
            url: self.location.clone(),
            reason: e.to_string(),
        })?;
        match resolve_link(rule, self.instance.decode_uri, &self.latest, &current) {
            Resolution::Found(found) => {
                self.instance.url = found.url;
                Ok(())
            }
            Resolution::NotFound { error } => Err(Error::NotFound(
                error.unwrap_or_else(|| format!("no {} link", format!("{action:?}").to_lowercase())),
            )),
        }
    }

    /// Byte range of the number to change: the configured selection's last occurrence,
    /// else the last run of digits.
    fn selection_range(&self, url: &str) -> Result<(usize, usize)> {
        if let Some(selection) = self.instance.selection.as_deref().filter(|s| !s.is_empty()) {
            return url
                .rfind(selection)
                .map(|start| (start, start + selection.len()))
                .ok_or_else(|| Error::NotFound(format!("selection `{selection}` in {url}")));
        }
        DIGITS
            .find_iter(url)
            .last()
            .map(|m| (m.start(), m.end()))
            .ok_or_else(|| Error::NotFound(format!("a number in {url}")))
    }

    fn increment_decrement(&mut self, action: Action) -> Result<()> {
        let url = self.instance.url.clone();
        let (start, end) = self.selection_range(&url)?;
        let selected = &url[start..end];
        let value: i64 = selected
            .parse()
            .map_err(|_| Error::NotFound(format!("a number in selection `{selected}`")))?;
        let step = if action == Action::Decrement {
            -self.instance.interval
        } else {
            self.instance.interval
        };
        let next = value
            .checked_add(step)
            .filter(|n| *n >= 0)
            .ok_or_else(|| Error::NotFound(format!("a URL after {value} {step:+}")))?;
        // Leading zeros keep the selection's width.
        let width = if selected.len() > 1 && selected.starts_with('0') {
            selected.len()
        } else {
            0
        };
        let replacement = format!("{next:0width$}");
        self.instance.url = format!("{}{replacement}{}", &url[..start], &url[end..]);
        if self.instance.selection.is_some() {
            self.instance.selection = Some(replacement);
        }
        Ok(())
    }

    fn next_in_list(&mut self) -> Result<()> {
        let url = self
            .instance
            .urls
            .get(self.instance.list_index)
            .cloned()
            .ok_or_else(|| Error::NotFound("a URL past the end of the list".to_string()))?;
        self.instance.list_index += 1;
        self.instance.url = url;
        Ok(())
    }

    fn press_button(&mut self) -> Result<()> {
        let rule = self.instance.button_rule.clone();
        let button = self
            .document
            .query_first(self.instance.button_type, &rule)?
            .ok_or_else(|| Error::NotFound(format!("button `{rule}`")))?;
        if !is_clickable(&self.document, button) {
            return Err(Error::NotFound(format!("a clickable button for `{rule}`")));
        }
        if self.instance.append_mode != AppendMode::None {
            let target = ["href", "formaction"]
                .into_iter()
                .find_map(|name| self.document.attr(button, name))
                .map(|value| self.document.resolve(value))
                .ok_or_else(|| Error::NotFound(format!("a URL on button `{rule}`")))?;
            self.instance.url = target;
        }
        self.clicker.click(&mut self.document, button)
    }
}
