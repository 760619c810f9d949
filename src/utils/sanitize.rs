// src/utils/sanitize.rs

use crate::models::session::AnswerPayload;

/// Clean free-text answer content using the ammonia library.
///
/// Descriptive answers are rendered back to faculty in the grading and
/// review UIs, so stored text must never carry active markup. Whitelist
/// sanitization keeps harmless formatting while stripping script content
/// and event-handler attributes.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Sanitizes the payload variants that carry user-written text.
/// Selections, numbers and booleans pass through untouched.
pub fn sanitize_payload(payload: AnswerPayload) -> AnswerPayload {
    match payload {
        AnswerPayload::Text { body } => AnswerPayload::Text {
            body: clean_html(&body),
        },
        other => other,
    }
}
