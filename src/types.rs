use clap::ValueEnum;

/// How the next URL is derived.
#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum Action {
    Next,
    Prev,
    Increment,
    Decrement,
    Button,
    List,
}

impl Action {
    /// Link-following actions stop on an HTTP error; URL-arithmetic ones do not.
    pub fn follows_links(self) -> bool {
        matches!(self, Action::Next | Action::Prev)
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum AppendMode {
    Page,
    Iframe,
    Element,
    Media,
    None,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum Detection {
    /// Throttled scroll listener with a pixel threshold.
    #[value(alias = "sl")]
    Listener,
    /// Visibility observation of each page's point with a page threshold.
    #[value(alias = "io")]
    Observer,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum RuleType {
    Selector,
    Xpath,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum MediaType {
    Image,
    Video,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum DividerMode {
    Yes,
    No,
    /// Only in element mode.
    Element,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum DividerAlign {
    Left,
    Center,
    Right,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum ScrollBehavior {
    Auto,
    Smooth,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum ButtonMethod {
    Click,
}

/// Who asked for an append. Decides the settle delay and whether the new page is
/// scrolled into view.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Caller {
    FirstPage,
    ScrollDetection,
    Append,
    Shortcut,
    Popup,
    Auto,
}

/// Messages sent from fetch worker threads back to the session thread.
#[derive(Clone, Debug)]
pub enum BgEvent {
    Fetched {
        ticket: u64,
        url: String,
        outcome: FetchOutcome,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// Decoded markup and the transport that produced it.
    Text { text: String, fallback: bool },
    /// A link-following fetch answered with an error status.
    Rejected(u16),
    Failed(String),
}
