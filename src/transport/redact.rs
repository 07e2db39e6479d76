//! PII masking for transport log lines.
//!
//! Every line handed to a [`crate::transport::LogSink`] passes through
//! [`redact`] first. Masks emails, URLs, IBANs, card numbers and phone
//! numbers; the order of the passes matters (IBANs before card numbers,
//! cards before phone numbers) so the broader patterns never see digits a
//! narrower pattern already claimed.

use once_cell::sync::Lazy;
use regex::Regex;

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"']+"#).unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());
static IBAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2}\d{2}[A-Za-z0-9]{10,30}\b").unwrap());
static CARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d[ \-]?){12,18}\d\b").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+?\d(?:[ \-/()]?\d){6,}").unwrap());

/// Mask PII in a log line.
pub fn redact(line: &str) -> String {
    let s = URL.replace_all(line, "[url]");
    let s = EMAIL.replace_all(&s, "[email]");
    let s = IBAN.replace_all(&s, "[iban]");
    let s = CARD.replace_all(&s, "[card]");
    let s = PHONE.replace_all(&s, "[phone]");
    s.into_owned()
}
