//! Auto: appends (or slides to) the next page every few seconds, a set number of times.

use crate::session::Session;
use crate::types::Caller;
use crate::utils::log_msg;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    Armed { due: Instant },
    Paused,
    /// Resumed while waiting for a page; arms on the next resume after the wait clears.
    Waiting,
    /// Cleared, or already fired.
    Cancelled,
}

/// A one-shot countdown that can be paused and resumed without losing elapsed time.
#[derive(Clone, Debug)]
pub struct AutoTimer {
    delay: Duration,
    remaining: Duration,
    started: Instant,
    wait: bool,
    state: TimerState,
}

impl AutoTimer {
    pub fn start(delay: Duration, now: Instant) -> Self {
        let mut timer = Self {
            delay,
            remaining: delay,
            started: now,
            wait: false,
            state: TimerState::Cancelled,
        };
        timer.resume(now);
        timer
    }

    /// Keeps what is left of the countdown. A timer that was not counting (or has run
    /// out, or is waiting) starts over from the full delay.
    pub fn pause(&mut self, now: Instant) {
        self.remaining = match self.state {
            TimerState::Armed { .. } if !self.wait => self
                .remaining
                .checked_sub(now.saturating_duration_since(self.started))
                .unwrap_or(self.delay),
            TimerState::Paused if !self.wait => self.remaining,
            _ => self.delay,
        };
        self.state = TimerState::Paused;
    }

    pub fn resume(&mut self, now: Instant) {
        self.started = now;
        self.state = if self.wait {
            TimerState::Waiting
        } else {
            TimerState::Armed {
                due: now + self.remaining,
            }
        };
    }

    pub fn clear(&mut self) {
        self.state = TimerState::Cancelled;
    }

    pub fn set_wait(&mut self, wait: bool) {
        self.wait = wait;
    }

    /// True once when the countdown runs out.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.state {
            TimerState::Armed { due } if now >= due => {
                self.state = TimerState::Cancelled;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

impl Session {
    fn auto_delay(&self) -> Duration {
        Duration::from_secs(self.instance.auto_seconds)
    }

    pub fn start_auto_timer(&mut self, caller: Caller, now: Instant) {
        self.clear_auto_timer();
        self.auto = Some(AutoTimer::start(self.auto_delay(), now));
        log_msg(
            "info",
            &format!(
                "Auto started by {caller:?}: {} times every {}s, repeat count {}",
                self.instance.auto_times, self.instance.auto_seconds, self.instance.auto_repeat_count
            ),
        );
    }

    /// `None` when the whole session is stopping.
    pub fn stop_auto_timer(&mut self, caller: Option<Caller>) {
        self.clear_auto_timer();
        match caller {
            Some(caller) => log_msg("info", &format!("Auto stopped by {caller:?}")),
            None => log_msg("info", "Auto stopped with the session"),
        }
    }

    fn clear_auto_timer(&mut self) {
        if let Some(mut timer) = self.auto.take() {
            timer.clear();
        }
    }

    pub fn pause_or_resume_auto_timer(&mut self, now: Instant) {
        let Some(timer) = &mut self.auto else {
            return;
        };
        if self.instance.auto_paused {
            timer.resume(now);
            self.instance.auto_paused = false;
        } else {
            timer.pause(now);
            self.instance.auto_paused = true;
        }
        log_msg(
            "info",
            &format!(
                "Auto paused={}, {:?} left",
                self.instance.auto_paused,
                timer.remaining()
            ),
        );
    }

    /// Runs after every append while auto is on: re-arms for the next step, starts a
    /// repeat cycle, or ends auto.
    pub fn auto_listener(&mut self, now: Instant) {
        if !self.instance.auto_enabled {
            return;
        }
        if self.instance.auto_times > 0 {
            self.clear_auto_timer();
            let mut timer = AutoTimer::start(self.auto_delay(), now);
            if self.instance.auto_paused {
                timer.pause(now);
            }
            self.auto = Some(timer);
        } else if self.instance.auto_repeat {
            let repeat = self.instance.clone_for_repeat();
            self.repeat_auto_timer(repeat, now);
        } else {
            self.stop_auto_timer(Some(Caller::Auto));
            self.instance.auto_enabled = false;
            self.instance.auto_paused = false;
            self.instance.auto_times = self.instance.auto_times_original;
        }
    }

    pub fn repeat_auto_timer(&mut self, instance: crate::instance::Instance, now: Instant) {
        self.instance = instance;
        self.start_auto_timer(Caller::Auto, now);
    }

    /// One auto step: back to the first page after a repeat, else down one page.
    pub(crate) fn auto_step(&mut self, now: Instant) {
        if self.instance.auto_repeating {
            self.instance.auto_repeating = false;
            if let Some(point) = self.page_point(0) {
                self.scroll_into_view(point, self.instance.auto_behavior, now);
                self.instance.current_page = 1;
                self.update_overlay();
            }
            self.auto_listener(now);
            return;
        }
        self.instance.auto_times = self.instance.auto_times.saturating_sub(1);
        let next = self.instance.current_page;
        if self.instance.auto_slideshow
            && next < self.pages.len()
            && let Some(point) = self.page_point(next)
        {
            self.scroll_into_view(point, self.instance.auto_behavior, now);
            self.instance.current_page = next + 1;
            self.update_overlay();
            self.auto_listener(now);
            return;
        }
        if self.trigger(self.instance.action, Caller::Auto, now) {
            // Held until the append settles; the settle step arms a fresh countdown.
            if let Some(timer) = &mut self.auto {
                timer.set_wait(true);
                timer.resume(now);
            }
        } else {
            self.auto_listener(now);
        }
    }

    /// Turns auto on from the full count, or off.
    pub fn toggle_auto(&mut self, now: Instant) {
        if self.instance.auto_enabled {
            self.stop_auto_timer(Some(Caller::Shortcut));
            self.instance.auto_enabled = false;
            self.instance.auto_paused = false;
            self.instance.auto_repeating = false;
            self.instance.auto_times = self.instance.auto_times_original;
            return;
        }
        if !self.instance.enabled {
            return;
        }
        self.instance.auto_enabled = true;
        self.instance.auto_paused = false;
        self.instance.auto_times = self.instance.auto_times_original;
        self.instance.auto_repeat_count = 0;
        self.start_auto_timer(Caller::Shortcut, now);
    }

    /// Status text while auto is on.
    pub fn auto_indicator(&self) -> Option<String> {
        let instance = &self.instance;
        if !instance.auto_enabled {
            return None;
        }
        let text = if instance.auto_paused {
            "❚❚".to_string()
        } else if instance.auto_repeating || instance.auto_repeat_count > 0 {
            "REP".to_string()
        } else if instance.auto_times != instance.auto_times_original {
            format!("AUTO {}", instance.auto_times)
        } else {
            "AUTO".to_string()
        };
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response};
    use crate::session::testing::session_with;
    use crate::settings::Settings;
    use crate::types::{Action, AppendMode};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn pause_keeps_the_remaining_time() {
        let t0 = Instant::now();
        let mut timer = AutoTimer::start(ms(1000), t0);
        timer.pause(t0 + ms(400));
        assert_eq!(timer.remaining(), ms(600));
        assert_eq!(timer.state(), TimerState::Paused);
        assert!(!timer.fire(t0 + ms(5000)));
        timer.resume(t0 + ms(5000));
        assert_eq!(timer.state(), TimerState::Armed { due: t0 + ms(5600) });
        assert!(!timer.fire(t0 + ms(5599)));
        assert!(timer.fire(t0 + ms(5600)));
        assert!(!timer.fire(t0 + ms(9000)));
    }

    #[test]
    fn overdue_or_waiting_pauses_start_over() {
        let t0 = Instant::now();
        let mut timer = AutoTimer::start(ms(1000), t0);
        timer.pause(t0 + ms(1500));
        assert_eq!(timer.remaining(), ms(1000));

        let mut waiting = AutoTimer::start(ms(1000), t0);
        waiting.set_wait(true);
        waiting.pause(t0 + ms(300));
        assert_eq!(waiting.remaining(), ms(1000));
        waiting.resume(t0 + ms(400));
        assert_eq!(waiting.state(), TimerState::Waiting);
        assert!(!waiting.fire(t0 + ms(9000)));
        waiting.set_wait(false);
        waiting.resume(t0 + ms(9000));
        assert!(waiting.fire(t0 + ms(10_000)));
    }

    #[test]
    fn cleared_timers_never_fire() {
        let t0 = Instant::now();
        let mut timer = AutoTimer::start(ms(10), t0);
        timer.clear();
        assert!(!timer.fire(t0 + ms(100)));
    }

    const IMAGE_1: &str = "https://example.com/img/001.jpg";

    fn media_settings(times: u32, repeat: bool) -> Settings {
        Settings {
            action: Action::Increment,
            append: AppendMode::Media,
            auto_times: times,
            auto_seconds: 1,
            auto_repeat: repeat,
            append_delay_ms: 0,
            ..Settings::default()
        }
    }

    #[test]
    fn auto_counts_down_then_stops() {
        let mut session = session_with(
            media_settings(2, false),
            &[(IMAGE_1, "<img src=001.jpg>")],
        );
        let t0 = Instant::now();
        session.start(t0);
        assert_eq!(
            session.handle(Request::AddAutoListener { caller: Caller::Popup }, t0),
            Response::AutoListenerAdded
        );
        session.tick(t0);
        assert_eq!(session.pages().len(), 1);
        assert_eq!(session.auto_indicator().as_deref(), Some("AUTO"));

        session.tick(t0 + ms(1000));
        assert_eq!(session.pages().len(), 2);
        assert_eq!(session.instance().auto_times, 1);
        assert_eq!(session.auto_indicator().as_deref(), Some("AUTO 1"));
        session.tick(t0 + ms(1100));

        session.tick(t0 + ms(2100));
        assert_eq!(session.pages().len(), 3);
        assert_eq!(session.instance().url, "https://example.com/img/003.jpg");
        session.tick(t0 + ms(2200));

        assert!(!session.instance().auto_enabled);
        assert_eq!(session.instance().auto_times, 2);
        assert_eq!(session.auto_indicator(), None);
        session.tick(t0 + ms(9000));
        assert_eq!(session.pages().len(), 3);
    }

    #[test]
    fn repeat_returns_to_the_first_page() {
        let mut session = session_with(
            media_settings(1, true),
            &[(IMAGE_1, "<img src=001.jpg>")],
        );
        let t0 = Instant::now();
        session.start(t0);
        session.toggle_auto(t0);
        session.tick(t0);

        session.tick(t0 + ms(1000));
        assert_eq!(session.pages().len(), 2);
        session.tick(t0 + ms(1100));
        assert!(session.instance().auto_repeating);
        assert_eq!(session.instance().auto_repeat_count, 1);
        assert_eq!(session.instance().auto_times, 1);
        assert_eq!(session.auto_indicator().as_deref(), Some("REP"));

        session.tick(t0 + ms(2100));
        assert!(!session.instance().auto_repeating);
        assert_eq!(session.instance().current_page, 1);
        assert_eq!(session.pages().len(), 2);

        session.toggle_auto(t0 + ms(2200));
        assert!(!session.instance().auto_enabled);
        assert!(session.auto.is_none());
    }

    #[test]
    fn paused_auto_waits_for_resume() {
        let mut session = session_with(
            media_settings(3, false),
            &[(IMAGE_1, "<img src=001.jpg>")],
        );
        let t0 = Instant::now();
        session.start(t0);
        session.toggle_auto(t0);
        session.tick(t0);
        assert_eq!(
            session.handle(Request::PauseOrResumeAuto, t0 + ms(400)),
            Response::AutoToggled { paused: true }
        );
        assert_eq!(session.auto_indicator().as_deref(), Some("❚❚"));
        session.tick(t0 + ms(5000));
        assert_eq!(session.pages().len(), 1);
        session.handle(Request::PauseOrResumeAuto, t0 + ms(5000));
        session.tick(t0 + ms(5599));
        assert_eq!(session.pages().len(), 1);
        session.tick(t0 + ms(5600));
        assert_eq!(session.pages().len(), 2);
    }

    #[test]
    fn resuming_during_an_append_waits_for_it_to_settle() {
        let mut session = session_with(
            media_settings(3, false),
            &[(IMAGE_1, "<img src=001.jpg>")],
        );
        let t0 = Instant::now();
        session.start(t0);
        session.toggle_auto(t0);
        session.tick(t0);

        session.tick(t0 + ms(1000));
        assert_eq!(session.pages().len(), 2);
        assert!(session.instance().is_loading);
        assert_eq!(session.auto.as_ref().unwrap().state(), TimerState::Waiting);

        session.pause_or_resume_auto_timer(t0 + ms(1010));
        session.pause_or_resume_auto_timer(t0 + ms(1020));
        assert!(!session.instance().auto_paused);
        assert_eq!(session.auto.as_ref().unwrap().state(), TimerState::Waiting);

        session.tick(t0 + ms(1100));
        assert!(!session.instance().is_loading);
        assert_eq!(
            session.auto.as_ref().unwrap().state(),
            TimerState::Armed { due: t0 + ms(2100) }
        );
        session.tick(t0 + ms(2100));
        assert_eq!(session.pages().len(), 3);
    }
}
