//! Finding the next (or previous) page link on a document.
//!
//! Two passes, in order: the configured rule (a CSS selector or a path query), then, if
//! that finds nothing usable and keywords are enabled, a scan of every link-bearing
//! element whose attributes, text or markup match one of the keywords.

use crate::dom::{Document, NodeId};
use crate::error::{Error, Result};
use crate::types::RuleType;
use crate::utils::{decode_uri_component, log_msg, squash};
use std::collections::HashMap;
use url::Url;

const LINK_ELEMENTS: &str = "link[href], a[href], area[href], form[action], button[formaction]";
const DEFAULT_ATTRIBUTES: [&str; 3] = ["href", "action", "formAction"];

/// Everything one direction (next or prev) needs to find its link.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkRule {
    pub rule_type: RuleType,
    pub selector: String,
    pub xpath: String,
    /// Property path read from the matched element, e.g. `["dataset", "next"]`.
    pub attribute: Vec<String>,
    pub keywords_enabled: bool,
    /// In priority order.
    pub keywords: Vec<String>,
}

impl LinkRule {
    fn expression(&self) -> &str {
        match self.rule_type {
            RuleType::Selector => &self.selector,
            RuleType::Xpath => &self.xpath,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextSource {
    Attribute,
    Text,
    Markup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subtype {
    Equals,
    StartsWith,
    EndsWith,
    Includes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Selector,
    Xpath,
    Keyword,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinkMatch {
    pub url: String,
    pub method: Method,
    /// `<rule>.<attribute path>` for rule matches.
    pub rule: Option<String>,
    pub keyword: Option<String>,
    pub source: Option<TextSource>,
    pub subtype: Option<Subtype>,
    /// Lowercase name of the matched element.
    pub element: String,
    /// The attribute that matched, for attribute keyword matches.
    pub attribute: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Found(LinkMatch),
    /// Nothing usable; carries the last error captured along the way.
    NotFound { error: Option<String> },
}

const TIERS: [(TextSource, &[Subtype]); 6] = [
    (TextSource::Attribute, &[Subtype::Equals]),
    (TextSource::Text, &[Subtype::Equals]),
    (TextSource::Markup, &[Subtype::Equals]),
    (
        TextSource::Attribute,
        &[Subtype::StartsWith, Subtype::EndsWith, Subtype::Includes],
    ),
    (
        TextSource::Text,
        &[Subtype::StartsWith, Subtype::EndsWith, Subtype::Includes],
    ),
    (
        TextSource::Markup,
        &[Subtype::StartsWith, Subtype::EndsWith, Subtype::Includes],
    ),
];

pub fn resolve_link(rule: &LinkRule, decode_uri: bool, doc: &Document, current: &Url) -> Resolution {
    let mut error = None;
    if let Some(found) = check_rule(rule, decode_uri, doc, current, &mut error) {
        log_msg(
            "info",
            &format!("Found {} with rule {}", found.url, found.rule.as_deref().unwrap_or("")),
        );
        return Resolution::Found(found);
    }
    if rule.keywords_enabled {
        let table = KeywordTable::build(&rule.keywords, decode_uri, doc, current, &mut error);
        if let Some(found) = table.best(&rule.keywords) {
            log_msg(
                "info",
                &format!(
                    "Found {} with keyword {} ({:?} {:?})",
                    found.url,
                    found.keyword.as_deref().unwrap_or(""),
                    found.source,
                    found.subtype
                ),
            );
            return Resolution::Found(found);
        }
    }
    Resolution::NotFound { error }
}

/// A candidate must be absolute, not the current page, and on the current hostname.
pub fn is_valid_url(candidate: &str, current: &Url) -> Result<bool> {
    let parsed = Url::parse(candidate).map_err(|e| Error::Url {
        url: candidate.to_string(),
        reason: e.to_string(),
    })?;
    Ok(parsed.as_str() != current.as_str() && parsed.host_str() == current.host_str())
}

fn validate(candidate: &str, current: &Url, error: &mut Option<String>) -> bool {
    match is_valid_url(candidate, current) {
        Ok(valid) => valid,
        Err(e) => {
            log_msg("debug", &e.to_string());
            *error = Some(e.to_string());
            false
        }
    }
}

fn decode(url: String, decode_uri: bool, error: &mut Option<String>) -> String {
    if !decode_uri {
        return url;
    }
    match decode_uri_component(&url) {
        Ok(decoded) => decoded,
        Err(e) => {
            log_msg("warn", &format!("Using the undecoded URL: {e}"));
            *error = Some(e.to_string());
            url
        }
    }
}

fn check_rule(
    rule: &LinkRule,
    decode_uri: bool,
    doc: &Document,
    current: &Url,
    error: &mut Option<String>,
) -> Option<LinkMatch> {
    let expression = rule.expression();
    let element = match doc.query_first(rule.rule_type, expression) {
        Ok(Some(element)) => element,
        Ok(None) => return None,
        Err(e) => {
            log_msg("warn", &e.to_string());
            *error = Some(e.to_string());
            return None;
        }
    };
    let mut attribute = rule.attribute.clone();
    let mut url = doc.property(element, &attribute);
    let mut default_attribute = false;
    if url.is_none()
        && let Some(name) = DEFAULT_ATTRIBUTES
            .into_iter()
            .find(|name| doc.property(element, &[name.to_string()]).is_some())
    {
        attribute = vec![name.to_string()];
        url = doc.property(element, &attribute);
        default_attribute = true;
    }
    let Some(url) = url else {
        *error = Some(format!("no URL at {expression}.{}", attribute.join(".")));
        return None;
    };
    let url = decode(url, decode_uri, error);
    if !validate(&url, current, error) {
        return None;
    }
    let method = match rule.rule_type {
        RuleType::Selector => Method::Selector,
        RuleType::Xpath => Method::Xpath,
    };
    let mut rule_text = format!("{expression}.{}", attribute.join("."));
    if default_attribute {
        rule_text.push_str(" (default attribute)");
    }
    Some(LinkMatch {
        url,
        method,
        rule: Some(rule_text),
        keyword: None,
        source: None,
        subtype: None,
        element: doc.tag(element).unwrap_or_default().to_string(),
        attribute: None,
    })
}

#[derive(Clone, Debug)]
struct Candidate {
    url: String,
    node: NodeId,
    element: String,
    attribute: Option<String>,
}

/// Keyword → candidate, per (text source, match strength). The first candidate to reach
/// a cell keeps it.
#[derive(Default)]
struct KeywordTable {
    cells: HashMap<(TextSource, Subtype, String), Candidate>,
}

impl KeywordTable {
    fn build(
        keywords: &[String],
        decode_uri: bool,
        doc: &Document,
        current: &Url,
        error: &mut Option<String>,
    ) -> Self {
        let mut table = Self::default();
        let elements = match doc.select_all(LINK_ELEMENTS) {
            Ok(elements) => elements,
            Err(e) => {
                *error = Some(e.to_string());
                return table;
            }
        };
        for element in elements {
            let name = doc.tag(element).unwrap_or_default().to_string();
            let property = match name.as_str() {
                "form" => "action",
                "button" => "formAction",
                _ => "href",
            };
            let Some(url) = doc.property(element, &[property.to_string()]) else {
                continue;
            };
            let url = decode(url, decode_uri, error);
            if !validate(&url, current, error) {
                continue;
            }
            let candidate = Candidate {
                url,
                node: element,
                element: name,
                attribute: None,
            };
            for (attr, value) in doc.attrs(element) {
                let value = squash(&value);
                if !value.is_empty() {
                    let candidate = Candidate {
                        attribute: Some(attr.to_ascii_lowercase()),
                        ..candidate.clone()
                    };
                    table.record(keywords, TextSource::Attribute, &value, &candidate);
                }
            }
            let text = squash(&doc.text(element));
            if !text.is_empty() {
                table.record(keywords, TextSource::Text, &text, &candidate);
            }
            let markup = squash(&doc.inner_html(element));
            if !markup.is_empty() {
                table.record(keywords, TextSource::Markup, &markup, &candidate);
            }
        }
        table
    }

    fn record(&mut self, keywords: &[String], source: TextSource, text: &str, candidate: &Candidate) {
        for keyword in keywords {
            let subtype = if text == keyword {
                Subtype::Equals
            } else if text.starts_with(keyword.as_str()) {
                Subtype::StartsWith
            } else if text.ends_with(keyword.as_str()) {
                Subtype::EndsWith
            } else if text.contains(keyword.as_str()) {
                Subtype::Includes
            } else {
                continue;
            };
            self.cells
                .entry((source, subtype, keyword.clone()))
                .or_insert_with(|| candidate.clone());
        }
    }

    fn best(&self, keywords: &[String]) -> Option<LinkMatch> {
        for (source, subtypes) in TIERS {
            for keyword in keywords {
                for &subtype in subtypes {
                    if let Some(candidate) = self.cells.get(&(source, subtype, keyword.clone())) {
                        log_msg(
                            "debug",
                            &format!("Keyword {keyword} matched node {:?}", candidate.node),
                        );
                        return Some(LinkMatch {
                            url: candidate.url.clone(),
                            method: Method::Keyword,
                            rule: None,
                            keyword: Some(keyword.clone()),
                            source: Some(source),
                            subtype: Some(subtype),
                            element: candidate.element.clone(),
                            attribute: candidate.attribute.clone(),
                        });
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> Url {
        Url::parse("https://example.com/p/1").unwrap()
    }

    fn doc(body: &str) -> Document {
        Document::parse(body, Some(current()))
    }

    fn rule(keywords: &[&str]) -> LinkRule {
        LinkRule {
            rule_type: RuleType::Selector,
            selector: "[rel=\"next\"]".to_string(),
            xpath: "//*[@rel=\"next\"]".to_string(),
            attribute: vec!["href".to_string()],
            keywords_enabled: true,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn found(resolution: Resolution) -> LinkMatch {
        match resolution {
            Resolution::Found(found) => found,
            other => panic!("expected a link, got {other:?}"),
        }
    }

    #[test]
    fn rule_match_wins_over_keywords() {
        let d = doc("<a href=\"/p/9\">next</a><a rel=\"next\" href=\"/p/2\">2</a>");
        let m = found(resolve_link(&rule(&["next"]), false, &d, &current()));
        assert_eq!(m.url, "https://example.com/p/2");
        assert_eq!(m.method, Method::Selector);
        assert_eq!(m.rule.as_deref(), Some("[rel=\"next\"].href"));
        assert_eq!(m.element, "a");
    }

    #[test]
    fn xpath_rules_with_default_attribute() {
        let d = doc("<form rel=\"next\" action=\"/p/2\"></form>");
        let mut r = rule(&[]);
        r.rule_type = RuleType::Xpath;
        r.attribute = vec!["data-missing".to_string()];
        let m = found(resolve_link(&r, false, &d, &current()));
        assert_eq!(m.url, "https://example.com/p/2");
        assert_eq!(m.method, Method::Xpath);
        assert_eq!(
            m.rule.as_deref(),
            Some("//*[@rel=\"next\"].action (default attribute)")
        );
    }

    #[test]
    fn keyword_text_equals() {
        let d = doc("<a href=\"/p/2\">Next</a>");
        let m = found(resolve_link(&rule(&["next"]), false, &d, &current()));
        assert_eq!(m.url, "https://example.com/p/2");
        assert_eq!(m.method, Method::Keyword);
        assert_eq!(m.source, Some(TextSource::Text));
        assert_eq!(m.subtype, Some(Subtype::Equals));
        assert_eq!(m.keyword.as_deref(), Some("next"));
    }

    #[test]
    fn attribute_equals_outranks_text_equals() {
        let d = doc("<a href=\"/b\">next</a><a href=\"/a\" class=\"NEXT\">go</a>");
        let m = found(resolve_link(&rule(&["next"]), false, &d, &current()));
        assert_eq!(m.url, "https://example.com/a");
        assert_eq!(m.source, Some(TextSource::Attribute));
        assert_eq!(m.attribute.as_deref(), Some("class"));
    }

    #[test]
    fn keyword_order_decides_within_a_tier() {
        let d = doc("<a href=\"/older\">older</a><a href=\"/next\">next</a>");
        let m = found(resolve_link(&rule(&["next", "older"]), false, &d, &current()));
        assert_eq!(m.url, "https://example.com/next");
    }

    #[test]
    fn first_writer_keeps_the_cell() {
        let d = doc("<a href=\"/first\">next</a><a href=\"/second\">next</a>");
        let m = found(resolve_link(&rule(&["next"]), false, &d, &current()));
        assert_eq!(m.url, "https://example.com/first");
    }

    #[test]
    fn partial_matches_after_equals() {
        let d = doc("<a href=\"/p/2\">Next page</a><a href=\"/p/3\">go to the next</a>");
        let m = found(resolve_link(&rule(&["next"]), false, &d, &current()));
        assert_eq!(m.url, "https://example.com/p/2");
        assert_eq!(m.subtype, Some(Subtype::StartsWith));
    }

    #[test]
    fn invalid_candidates_are_skipped() {
        let d = doc(
            "<a href=\"/p/1\">next</a><a href=\"https://other.org/p/2\">next</a><a href=\"/p/2\">next »</a>",
        );
        let m = found(resolve_link(&rule(&["next"]), false, &d, &current()));
        assert_eq!(m.url, "https://example.com/p/2");
    }

    #[test]
    fn url_validation() {
        let here = current();
        assert!(is_valid_url("/p/2", &here).is_err());
        assert!(!is_valid_url("https://example.com/p/1", &here).unwrap());
        assert!(!is_valid_url("https://other.org/p/2", &here).unwrap());
        assert!(is_valid_url("https://example.com/p/2", &here).unwrap());
    }

    #[test]
    fn broken_rules_report_their_error() {
        let d = doc("<a href=\"/p/2\">2</a>");
        let mut r = rule(&["next"]);
        r.selector = "a[[".to_string();
        match resolve_link(&r, false, &d, &current()) {
            Resolution::NotFound { error } => assert!(error.unwrap().contains("a[[")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_when_enabled() {
        let d = doc("<a rel=\"next\" href=\"/p/%E4%B8%8B\">2</a>");
        let m = found(resolve_link(&rule(&[]), true, &d, &current()));
        assert_eq!(m.url, "https://example.com/p/下");
    }
}
