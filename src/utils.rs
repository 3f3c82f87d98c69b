use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use percent_encoding::percent_decode_str;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

pub const LOG_FILE: &str = "bad-scroll.log";

static DEBUG: AtomicBool = AtomicBool::new(false);

pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

pub fn log_msg(level: &str, msg: &str) {
    if level == "debug" && !debug_enabled() {
        return;
    }
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        let now: DateTime<Local> = Local::now();
        let _ = writeln!(
            file,
            "time=\"{time}\" level={level} msg=\"{msg}\"",
            time = now.format("%Y-%m-%dT%H:%M:%S%z"),
            msg = msg.replace('"', "'"),
        );
    }
}

/// Lossy decode for display in the status bar.
pub fn decode_url(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().to_string()
}

/// Strict decode with `decodeURIComponent` semantics: a `%` must be followed by two hex
/// digits and the decoded bytes must be UTF-8.
pub fn decode_uri_component(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
            if !valid {
                return Err(Error::Decode(input.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| Error::Decode(input.to_string()))
}

/// Lowercase with every whitespace character removed, the normal form keyword matching
/// compares against.
pub fn squash(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
