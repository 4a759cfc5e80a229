use crate::model::{Conversation, MessagePart};
use unicode_normalization::UnicodeNormalization;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') { // Byte Order Mark
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean every text part and drop parts, then messages, that end up empty.
pub fn normalize_conversation(conversation: Conversation) -> Conversation {
    conversation
        .into_iter()
        .filter_map(|mut msg| {
            msg.parts = msg
                .parts
                .into_iter()
                .filter_map(|p| match p {
                    MessagePart::Text { text } => {
                        let text = clean_text(&text);
                        (!text.is_empty()).then_some(MessagePart::Text { text })
                    }
                })
                .collect();
            (!msg.parts.is_empty()).then_some(msg)
        })
        .collect()
}
