use crate::instance::Instance;
use crate::next_prev::{LinkRule, Resolution};
use crate::types::{Action, ButtonMethod, Caller, RuleType};

/// Requests the shell (or anything else) sends to a session.
#[derive(Clone, Debug)]
pub enum Request {
    GetInstance,
    /// Adopt `instance` and start detecting. The live page counts are kept.
    Start { instance: Box<Instance> },
    /// Disable the instance and remove detection. Appended pages stay.
    Stop,
    PerformAction { action: Action, caller: Caller },
    CheckNextPrev { rule: LinkRule },
    CheckScrollElement {
        rule_type: RuleType,
        rule: String,
        insert_rule: String,
    },
    CheckButton {
        rule_type: RuleType,
        rule: String,
        method: ButtonMethod,
    },
    AddAutoListener { caller: Caller },
    PauseOrResumeAuto,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Instance(Box<Instance>),
    Started,
    Stopped,
    /// Whether the trigger gate let the action through.
    Performed { triggered: bool },
    NextPrev(Resolution),
    ScrollElement(ElementReport),
    Button(ButtonReport),
    AutoListenerAdded,
    AutoToggled { paused: bool },
}

/// What a page-element rule finds on the current document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementReport {
    pub found: bool,
    pub elements_length: usize,
    pub insert_details: String,
    /// Lowercase tag of the insertion point's parent, empty when there is none.
    pub parent_node: String,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ButtonReport {
    pub found: bool,
    pub clickable: bool,
    pub details: String,
    pub error: Option<String>,
}
