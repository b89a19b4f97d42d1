use std::collections::HashMap;

use proto::{ChatMessage, UserId};

/// Append-only transcripts keyed by conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    transcripts: HashMap<UserId, Vec<ChatMessage>>,
    total: usize,
}

impl MessageLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` to the transcript of its conversation.
    pub fn append(&mut self, message: ChatMessage) {
        self.transcripts
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        self.total += 1;
    }

    /// Read view over one conversation, in arrival order.
    pub fn get(&self, conversation: &UserId) -> Transcript<'_> {
        Transcript {
            messages: self
                .transcripts
                .get(conversation)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        }
    }

    /// Conversations with at least one message, sorted by id.
    pub fn conversations(&self) -> Vec<&UserId> {
        let mut ids: Vec<&UserId> = self.transcripts.keys().collect();
        ids.sort();
        ids
    }

    /// Number of messages across all conversations.
    pub fn len(&self) -> usize {
        self.total
    }

    /// Returns `true` when nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Borrowed, re-iterable view of one transcript.
#[derive(Debug, Clone, Copy)]
pub struct Transcript<'a> {
    messages: &'a [ChatMessage],
}

impl<'a> Transcript<'a> {
    /// Iterates messages oldest first. Can be called any number of times.
    pub fn iter(&self) -> std::slice::Iter<'a, ChatMessage> {
        self.messages.iter()
    }

    /// Number of messages in the conversation.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` for a conversation without messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message.
    pub fn last(&self) -> Option<&'a ChatMessage> {
        self.messages.last()
    }
}

impl<'a> IntoIterator for Transcript<'a> {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn msg(conversation: &str, sender: &str, text: &str) -> ChatMessage {
        ChatMessage::new(UserId::from(conversation), sender, text, Utc::now())
    }

    #[test]
    fn reading_yields_arrival_order() {
        let mut log = MessageLog::new();
        log.append(msg("bob911", "bob911", "A"));
        log.append(msg("bob911", "alice", "B"));

        let texts: Vec<&str> = log
            .get(&UserId::from("bob911"))
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[test]
    fn view_is_restartable() {
        let mut log = MessageLog::new();
        log.append(msg("bob911", "bob911", "one"));
        log.append(msg("bob911", "bob911", "two"));

        let view = log.get(&UserId::from("bob911"));
        assert_eq!(view.iter().count(), 2);
        assert_eq!(view.iter().count(), 2);
        assert_eq!(view.into_iter().count(), 2);
        assert_eq!(view.last().map(|m| m.text.as_str()), Some("two"));
    }

    #[test]
    fn conversations_are_kept_apart() {
        let mut log = MessageLog::new();
        log.append(msg("bob911", "bob911", "hi"));
        log.append(msg("carol", "carol", "hello"));
        log.append(msg("bob911", "alice", "hey"));

        assert_eq!(log.len(), 3);
        assert_eq!(log.get(&UserId::from("bob911")).len(), 2);
        assert_eq!(log.get(&UserId::from("carol")).len(), 1);
        assert_eq!(
            log.conversations(),
            vec![&UserId::from("bob911"), &UserId::from("carol")]
        );
    }

    #[test]
    fn unknown_conversation_is_empty() {
        let log = MessageLog::new();
        assert!(log.is_empty());
        assert!(log.get(&UserId::from("nobody")).is_empty());
    }
}
