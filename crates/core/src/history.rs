use crate::models::{Message, Role, Turn};

/// Rebuilds answered turns from a session's message log.
///
/// Messages must already be in timestamp order. The latest user message waits for the
/// next assistant message; a newer user message replaces it, so an unanswered question
/// is dropped rather than paired later. Assistant messages with nothing waiting are
/// skipped, as are soft-deleted messages.
pub fn reconstruct_turns(messages: &[Message]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut pending: Option<&str> = None;

    for message in messages.iter().filter(|message| !message.is_deleted) {
        match message.role {
            Role::User => pending = Some(&message.content),
            Role::Assistant => {
                if let Some(question) = pending.take() {
                    turns.push(Turn::new(question, message.content.as_str()));
                }
            }
        }
    }

    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn log(entries: &[(Role, &str)]) -> Vec<Message> {
        let session_id = Uuid::new_v4();
        let start = Utc::now();
        entries
            .iter()
            .enumerate()
            .map(|(position, (role, content))| Message {
                message_id: Uuid::new_v4(),
                session_id,
                role: *role,
                content: content.to_string(),
                timestamp: start + Duration::seconds(position as i64),
                is_deleted: false,
            })
            .collect()
    }

    #[test]
    fn unanswered_question_is_replaced_by_the_next() {
        let messages = log(&[(Role::User, "A"), (Role::User, "B"), (Role::Assistant, "R1")]);
        assert_eq!(reconstruct_turns(&messages), vec![Turn::new("B", "R1")]);
    }

    #[test]
    fn alternating_log_pairs_in_order() {
        let messages = log(&[
            (Role::User, "Q1"),
            (Role::Assistant, "A1"),
            (Role::User, "Q2"),
            (Role::Assistant, "A2"),
        ]);
        assert_eq!(
            reconstruct_turns(&messages),
            vec![Turn::new("Q1", "A1"), Turn::new("Q2", "A2")]
        );
    }

    #[test]
    fn orphan_answers_and_trailing_questions_are_dropped() {
        let messages = log(&[
            (Role::Assistant, "hello"),
            (Role::User, "Q1"),
            (Role::Assistant, "A1"),
            (Role::Assistant, "A1 again"),
            (Role::User, "Q2"),
        ]);
        assert_eq!(reconstruct_turns(&messages), vec![Turn::new("Q1", "A1")]);
    }

    #[test]
    fn deleted_messages_are_ignored() {
        let mut messages = log(&[(Role::User, "Q1"), (Role::Assistant, "A1")]);
        messages[1].is_deleted = true;
        assert!(reconstruct_turns(&messages).is_empty());
    }

    #[test]
    fn empty_log_has_no_turns() {
        assert!(reconstruct_turns(&[]).is_empty());
    }
}
