use crate::layout::ROW_HEIGHT;
use crate::message::{Request, Response};
use crate::next_prev::Resolution;
use crate::session::Session;
use crate::types::{Action, Caller, ScrollBehavior};
use crate::utils::log_msg;
use crossterm::event::{KeyCode, KeyModifiers};
use std::time::Instant;

/// Rows the status bar and the hints line take from the terminal.
pub const CHROME_ROWS: u16 = 2;

pub struct App {
    pub session: Session,
    /// Result of the last check key, shown in the hints line until dismissed.
    pub message: Option<String>,
}

impl App {
    pub fn new(session: Session) -> Self {
        log_msg("info", "App initialized");
        Self {
            session,
            message: None,
        }
    }

    pub fn check_background_events(&mut self) {
        self.session.tick(Instant::now());
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.session
            .set_viewport(width, height.saturating_sub(CHROME_ROWS));
    }

    /// Returns true when the app should quit.
    pub fn on_key(&mut self, key: KeyCode, modifiers: KeyModifiers) -> bool {
        let now = Instant::now();
        let page = self.session.viewport().height - ROW_HEIGHT;
        match key {
            KeyCode::Char('q') => return true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Esc => self.message = None,

            KeyCode::Char('j') | KeyCode::Down => self.session.scroll_by(ROW_HEIGHT, now),
            KeyCode::Char('k') | KeyCode::Up => self.session.scroll_by(-ROW_HEIGHT, now),
            KeyCode::PageDown | KeyCode::Char(' ') => self.session.scroll_by(page, now),
            KeyCode::PageUp => self.session.scroll_by(-page, now),
            KeyCode::Char('g') | KeyCode::Home => {
                self.session.scroll_to(0.0, ScrollBehavior::Auto, now)
            }
            KeyCode::Char('G') | KeyCode::End => {
                let bottom = self.session.document_bottom();
                self.session.scroll_to(bottom, ScrollBehavior::Auto, now);
            }

            KeyCode::Char(']') => {
                let action = self.session.instance().action;
                self.perform(action, now);
            }
            KeyCode::Char('[') => {
                let action = match self.session.instance().action {
                    Action::Next => Action::Prev,
                    Action::Increment => Action::Decrement,
                    other => other,
                };
                self.perform(action, now);
            }
            KeyCode::Char('a') => self.session.toggle_auto(now),
            KeyCode::Char('p') => {
                if let Response::AutoToggled { paused } =
                    self.session.handle(Request::PauseOrResumeAuto, now)
                {
                    log_msg("info", &format!("Auto paused={paused}"));
                }
            }
            KeyCode::Char('s') => {
                let request = if self.session.instance().enabled {
                    Request::Stop
                } else {
                    Request::Start {
                        instance: Box::new(self.session.instance().clone()),
                    }
                };
                self.session.handle(request, now);
            }

            KeyCode::Char('n') => self.check_next(now),
            KeyCode::Char('e') => self.check_element(now),
            KeyCode::Char('b') => self.check_button(now),
            _ => {}
        }
        false
    }

    fn perform(&mut self, action: Action, now: Instant) {
        let request = Request::PerformAction {
            action,
            caller: Caller::Shortcut,
        };
        if let Response::Performed { triggered: false } = self.session.handle(request, now) {
            log_msg("debug", &format!("{action:?} did not start an append"));
        }
    }

    fn check_next(&mut self, now: Instant) {
        let rule = self.session.instance().next.clone();
        if let Response::NextPrev(resolution) =
            self.session.handle(Request::CheckNextPrev { rule }, now)
        {
            self.message = Some(match resolution {
                Resolution::Found(found) => format!("next: {} ({:?})", found.url, found.method),
                Resolution::NotFound { error: Some(e) } => format!("next: not found, {e}"),
                Resolution::NotFound { error: None } => "next: not found".to_string(),
            });
        }
    }

    fn check_element(&mut self, now: Instant) {
        let instance = self.session.instance();
        let request = Request::CheckScrollElement {
            rule_type: instance.element_type,
            rule: instance.element_rule.clone(),
            insert_rule: instance.insert_rule.clone(),
        };
        if let Response::ScrollElement(report) = self.session.handle(request, now) {
            self.message = Some(match report.error {
                Some(e) => format!("elements: {e}"),
                None => format!(
                    "elements: {} found, inserting into <{}> at {}",
                    report.elements_length, report.parent_node, report.insert_details
                ),
            });
        }
    }

    fn check_button(&mut self, now: Instant) {
        let instance = self.session.instance();
        let request = Request::CheckButton {
            rule_type: instance.button_type,
            rule: instance.button_rule.clone(),
            method: instance.button_method,
        };
        if let Response::Button(report) = self.session.handle(request, now) {
            self.message = Some(match report.error {
                Some(e) => format!("button: {e}"),
                None if report.found && !report.clickable => {
                    format!("button: {} (not clickable)", report.details)
                }
                None => format!("button: {}", report.details),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{PAGE_1, session_with};
    use crate::settings::Settings;
    use crate::types::AppendMode;

    fn app(body: &str) -> App {
        let settings = Settings {
            append: AppendMode::None,
            append_delay_ms: 0,
            ..Settings::default()
        };
        let mut session = session_with(settings, &[(PAGE_1, body)]);
        session.start(Instant::now());
        App {
            session,
            message: None,
        }
    }

    #[test]
    fn quit_keys() {
        let mut app = app("<p>x</p>");
        assert!(!app.on_key(KeyCode::Char('j'), KeyModifiers::NONE));
        assert!(app.on_key(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(app.on_key(KeyCode::Char('c'), KeyModifiers::CONTROL));
    }

    #[test]
    fn stop_and_start_keep_the_pages() {
        let mut app = app("<p>x</p>");
        app.on_key(KeyCode::Char('s'), KeyModifiers::NONE);
        assert!(!app.session.instance().enabled);
        app.on_key(KeyCode::Char('s'), KeyModifiers::NONE);
        assert!(app.session.instance().enabled);
        assert_eq!(app.session.pages().len(), 1);
    }

    #[test]
    fn check_keys_report_into_the_message() {
        let mut app = app("<a rel=next href=/p/2>next</a><button id=load-more-button>More</button>");
        app.on_key(KeyCode::Char('n'), KeyModifiers::NONE);
        assert_eq!(
            app.message.as_deref(),
            Some("next: https://example.com/p/2 (Selector)")
        );
        app.on_key(KeyCode::Char('b'), KeyModifiers::NONE);
        assert!(app.message.as_deref().is_some_and(|m| m.starts_with("button: Click <button>")));
        app.on_key(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(app.message, None);
    }

    #[test]
    fn bracket_keys_append_through_the_action() {
        let mut app = app("<a rel=next href=/p/2>next</a>");
        app.on_key(KeyCode::Char(']'), KeyModifiers::NONE);
        assert_eq!(app.session.instance().url, "https://example.com/p/2");
        assert!(app.session.instance().is_loading);
    }
}
