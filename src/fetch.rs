use crate::dom::Document;
use crate::error::{Error, Result};
use crate::scripts::SiteScripts;
use crate::types::{AppendMode, BgEvent, FetchOutcome};
use crate::utils::log_msg;
use encoding_rs::{Encoding, UTF_8};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = "bad-scroll/0.1";
const TIMEOUT: Duration = Duration::from_secs(10);

/// Elements removed from a fetched body before its children are imported.
pub const STRIPPED: &str = "script, noscript, style, link";

#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub ok: bool,
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Final URL after redirects.
    pub url: String,
}

/// The main transport: raw bytes plus status, decoded by the caller.
pub trait PrimaryTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<RawResponse>;
}

/// The transport used when the primary one errors. Error statuses still produce a body.
pub trait FallbackTransport: Send + Sync {
    fn get_text(&self, url: &str) -> Result<String>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TIMEOUT)
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Fetch(format!("client build error: {e}")))?;
        Ok(Self { client })
    }
}

impl PrimaryTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<RawResponse> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let bytes = resp.bytes().map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(RawResponse {
            status: status.as_u16(),
            ok: status.is_success(),
            bytes: bytes.to_vec(),
            content_type,
            url: final_url,
        })
    }
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(TIMEOUT)
            .build();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackTransport for UreqTransport {
    fn get_text(&self, url: &str) -> Result<String> {
        let resp = match self.agent.get(url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                log_msg("warn", &format!("Fallback got HTTP {code} for {url}"));
                resp
            }
            Err(e) => return Err(Error::Fetch(e.to_string())),
        };
        resp.into_string().map_err(|e| Error::Fetch(e.to_string()))
    }
}

/// Runs one fetch to completion: primary transport, then the fallback on transport
/// errors. Error statuses end link-following actions with no document.
pub fn fetch_outcome(
    primary: &dyn PrimaryTransport,
    fallback: &dyn FallbackTransport,
    url: &str,
    charset: &str,
    link_action: bool,
) -> FetchOutcome {
    match primary.get(url) {
        Ok(resp) if !resp.ok && link_action => {
            log_msg(
                "info",
                &format!("Stopping at HTTP {} for {url}", resp.status),
            );
            FetchOutcome::Rejected(resp.status)
        }
        Ok(resp) => FetchOutcome::Text {
            text: decode_with(&resp.bytes, charset),
            fallback: false,
        },
        Err(e) => {
            log_msg(
                "warn",
                &format!("Fetching {url} failed, trying the fallback: {e}"),
            );
            match fallback.get_text(url) {
                Ok(text) => FetchOutcome::Text {
                    text,
                    fallback: true,
                },
                Err(e) => {
                    log_msg("error", &format!("Fallback for {url} failed: {e}"));
                    FetchOutcome::Failed(e.to_string())
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub ticket: u64,
    pub url: String,
    /// The host page's character set, used to decode the response.
    pub charset: String,
    pub link_action: bool,
}

/// Fetches next pages on worker threads and reports back over the session channel.
pub struct DocumentFetcher {
    primary: Arc<dyn PrimaryTransport>,
    fallback: Arc<dyn FallbackTransport>,
    tx: Sender<BgEvent>,
}

impl DocumentFetcher {
    pub fn new(
        primary: Arc<dyn PrimaryTransport>,
        fallback: Arc<dyn FallbackTransport>,
        tx: Sender<BgEvent>,
    ) -> Self {
        Self {
            primary,
            fallback,
            tx,
        }
    }

    pub fn fetch(&self, request: FetchRequest) {
        let primary = Arc::clone(&self.primary);
        let fallback = Arc::clone(&self.fallback);
        let tx = self.tx.clone();
        log_msg("info", &format!("Fetching URL: {}", request.url));
        thread::spawn(move || {
            let outcome = fetch_outcome(
                &*primary,
                &*fallback,
                &request.url,
                &request.charset,
                request.link_action,
            );
            let _ = tx.send(BgEvent::Fetched {
                ticket: request.ticket,
                url: request.url,
                outcome,
            });
        });
    }
}

/// The host page as first loaded.
#[derive(Clone, Debug)]
pub struct LoadedPage {
    pub url: Url,
    pub text: String,
    pub charset: String,
    pub content_type: String,
}

/// Loads the starting page synchronously, detecting its character set from the header or
/// a `<meta charset>` near the top of the body.
pub fn load_page(primary: &dyn PrimaryTransport, url: &str) -> Result<LoadedPage> {
    let resp = primary.get(url)?;
    if !resp.ok {
        return Err(Error::Fetch(format!("HTTP {} for {url}", resp.status)));
    }
    let encoding = detect_response_charset(&resp.bytes, &resp.content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(&resp.bytes);
    let final_url = Url::parse(&resp.url).map_err(|e| Error::Url {
        url: resp.url.clone(),
        reason: e.to_string(),
    })?;
    let content_type = resp
        .content_type
        .split(';')
        .next()
        .unwrap_or("text/html")
        .trim()
        .to_ascii_lowercase();
    Ok(LoadedPage {
        url: final_url,
        text: text.into_owned(),
        charset: encoding.name().to_string(),
        content_type,
    })
}

/// A fetched page ready to append: `document` has been run through the site script and
/// stripped, `original` is the untouched parse kept for script re-injection and for
/// resolving the following link.
#[derive(Clone, Debug)]
pub struct NextDocument {
    pub document: Document,
    pub original: Document,
}

pub fn prepare_document(
    text: &str,
    url: &str,
    content_type: &str,
    mode: AppendMode,
    script: Option<usize>,
    scripts: &SiteScripts,
) -> NextDocument {
    let mut document = Document::parse_as(text, Url::parse(url).ok(), content_type);
    let original = document.clone();
    if matches!(mode, AppendMode::Page | AppendMode::Element)
        && let Some(index) = script
    {
        scripts.run(index, &mut document);
    }
    match document.strip_body(STRIPPED) {
        Ok(count) => log_msg("debug", &format!("Stripped {count} elements from {url}")),
        Err(e) => log_msg("warn", &format!("Stripping {url} failed: {e}")),
    }
    NextDocument { document, original }
}

pub fn decode_with(bytes: &[u8], label: &str) -> String {
    let encoding = Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8);
    let (decoded, _, _) = encoding.decode(bytes);
    decoded.into_owned()
}

fn detect_response_charset(body: &[u8], content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    if (lower.contains("text/html") || lower.contains("application/xhtml+xml"))
        && let Some(meta_charset) = parse_charset_from_html_prefix(body)
    {
        return Some(meta_charset);
    }
    parse_charset_from_content_type(content_type)
}

fn parse_charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let label = value.trim().trim_matches('"').trim_matches('\'');
        (!label.is_empty()).then(|| label.to_string())
    })
}

fn parse_charset_from_html_prefix(body: &[u8]) -> Option<String> {
    let prefix = String::from_utf8_lossy(&body[..body.len().min(8192)]);
    let lower = prefix.to_ascii_lowercase();
    let mut search_start = 0;
    while let Some(relative) = lower[search_start..].find("charset=") {
        let start = search_start + relative + "charset=".len();
        if let Some(label) = parse_charset_label(&prefix[start..]) {
            return Some(label);
        }
        search_start = start;
    }
    None
}

fn parse_charset_label(input: &str) -> Option<String> {
    let trimmed = input.trim_start();
    let first = trimmed.chars().next()?;
    let label = if first == '"' || first == '\'' {
        let rest = &trimmed[first.len_utf8()..];
        &rest[..rest.find(first)?]
    } else {
        let end = trimmed
            .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ';' | '>' | '/'))
            .unwrap_or(trimmed.len());
        &trimmed[..end]
    };
    let label = label.trim();
    (!label.is_empty()).then(|| label.to_string())
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages from memory for both transports and records every request.
    #[derive(Default)]
    pub struct MemoryTransport {
        pages: Mutex<HashMap<String, (u16, Vec<u8>)>>,
        pub primary_down: bool,
        pub requests: Mutex<Vec<String>>,
    }

    impl MemoryTransport {
        pub fn with_pages(pages: &[(&str, &str)]) -> Self {
            let transport = Self::default();
            for (url, body) in pages {
                transport.serve(url, 200, body.as_bytes());
            }
            transport
        }

        pub fn serve(&self, url: &str, status: u16, body: &[u8]) {
            if let Ok(mut pages) = self.pages.lock() {
                pages.insert(url.to_string(), (status, body.to_vec()));
            }
        }

        fn lookup(&self, url: &str) -> Option<(u16, Vec<u8>)> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(url.to_string());
            }
            self.pages.lock().ok()?.get(url).cloned()
        }
    }

    impl PrimaryTransport for MemoryTransport {
        fn get(&self, url: &str) -> Result<RawResponse> {
            if self.primary_down {
                return Err(Error::Fetch("connection refused".to_string()));
            }
            let (status, bytes) = self.lookup(url).unwrap_or((404, b"not found".to_vec()));
            Ok(RawResponse {
                status,
                ok: (200..300).contains(&status),
                bytes,
                content_type: "text/html".to_string(),
                url: url.to_string(),
            })
        }
    }

    impl FallbackTransport for MemoryTransport {
        fn get_text(&self, url: &str) -> Result<String> {
            self.lookup(url)
                .map(|(_, bytes)| String::from_utf8_lossy(&bytes).into_owned())
                .ok_or_else(|| Error::Fetch(format!("no route to {url}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryTransport;
    use super::*;
    use std::sync::mpsc;

    const NEXT: &str = "https://example.com/p/2";

    #[test]
    fn error_status_stops_link_actions_only() {
        let t = MemoryTransport::default();
        t.serve(NEXT, 404, b"<p>gone</p>");
        assert_eq!(
            fetch_outcome(&t, &t, NEXT, "utf-8", true),
            FetchOutcome::Rejected(404)
        );
        match fetch_outcome(&t, &t, NEXT, "utf-8", false) {
            FetchOutcome::Text { text, fallback } => {
                assert_eq!(text, "<p>gone</p>");
                assert!(!fallback);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transport_errors_use_the_fallback() {
        let mut t = MemoryTransport::with_pages(&[(NEXT, "<p>two</p>")]);
        t.primary_down = true;
        assert_eq!(
            fetch_outcome(&t, &t, NEXT, "utf-8", true),
            FetchOutcome::Text {
                text: "<p>two</p>".to_string(),
                fallback: true
            }
        );
        assert!(matches!(
            fetch_outcome(&t, &t, "https://example.com/missing", "utf-8", true),
            FetchOutcome::Failed(_)
        ));
    }

    #[test]
    fn decodes_with_the_host_charset() {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("<a>次のページ</a>");
        let t = MemoryTransport::default();
        t.serve(NEXT, 200, &bytes);
        match fetch_outcome(&t, &t, NEXT, "Shift_JIS", true) {
            FetchOutcome::Text { text, .. } => assert_eq!(text, "<a>次のページ</a>"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decode_with(b"plain", "no-such-charset"), "plain");
    }

    #[test]
    fn detects_charsets() {
        assert_eq!(
            parse_charset_from_content_type("text/html; charset=\"EUC-JP\"").as_deref(),
            Some("EUC-JP")
        );
        assert_eq!(
            detect_response_charset(b"<meta charset='gbk'><p>", "text/html").as_deref(),
            Some("gbk")
        );
        assert_eq!(
            detect_response_charset(
                b"<meta http-equiv=Content-Type content=\"text/html; charset=windows-1252\">",
                "text/html; charset=utf-8"
            )
            .as_deref(),
            Some("windows-1252")
        );
        assert_eq!(detect_response_charset(b"<p>", "text/plain"), None);
    }

    #[test]
    fn initial_load_reports_charset_and_type() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode("<meta charset=windows-1252><p>caf\u{e9}</p>");
        let t = MemoryTransport::default();
        t.serve("https://example.com/p/1", 200, &bytes);
        let page = load_page(&t, "https://example.com/p/1").unwrap();
        assert_eq!(page.charset, "windows-1252");
        assert_eq!(page.content_type, "text/html");
        assert!(page.text.contains("café"));
        assert!(load_page(&t, "https://example.com/nope").is_err());
    }

    #[test]
    fn workers_report_over_the_channel() {
        let (tx, rx) = mpsc::channel();
        let t = Arc::new(MemoryTransport::with_pages(&[(NEXT, "<p>two</p>")]));
        let fetcher = DocumentFetcher::new(t.clone(), t, tx);
        fetcher.fetch(FetchRequest {
            ticket: 7,
            url: NEXT.to_string(),
            charset: "utf-8".to_string(),
            link_action: true,
        });
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            BgEvent::Fetched { ticket, url, outcome } => {
                assert_eq!(ticket, 7);
                assert_eq!(url, NEXT);
                assert!(matches!(outcome, FetchOutcome::Text { .. }));
            }
        }
    }

    #[test]
    fn prepared_documents_keep_an_unstripped_original() {
        let scripts = SiteScripts::default();
        let next = prepare_document(
            "<head><style>p{}</style></head><body><script>x()</script><p>two</p></body>",
            NEXT,
            "text/html",
            AppendMode::Page,
            None,
            &scripts,
        );
        assert!(next.document.select_first("body script").unwrap().is_none());
        assert!(next.original.select_first("body script").unwrap().is_some());
        assert!(next.document.select_first("head style").unwrap().is_some());
    }
}
