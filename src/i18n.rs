//! Embedded localized strings for user-facing fallback surfaces.
//!
//! Only two strings are ever rendered by this crate itself: the calm
//! error sentinel shown when the backend is unreachable, and the mood
//! check-in prompt shown when the guiding question is gated off.
//! Selection is by language prefix of the configured locale; unknown
//! locales fall back to English.

/// Error sentinel rendered instead of a question when all retries failed.
///
/// Deliberately free of status codes and technical detail.
pub fn error_sentinel(locale: &str) -> &'static str {
    match language(locale) {
        "de" => {
            "Ich konnte den Reflexionsdienst gerade nicht erreichen. \
             Magst du es in einem Moment noch einmal versuchen?"
        }
        _ => {
            "I couldn't reach the reflection service just now. \
             Want to give it another try in a moment?"
        }
    }
}

/// Mood check-in prompt shown when the primary question is suppressed.
pub fn mood_checkin(locale: &str) -> &'static str {
    match language(locale) {
        "de" => "Wie fühlst du dich gerade?",
        _ => "How are you feeling right now?",
    }
}

/// Language prefix of a locale tag ("de-AT" -> "de").
fn language(locale: &str) -> &str {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .trim()
}
