use chrono::Duration;
use shared::domain::{
    Conversation, ConversationKey, ConversationStatusRecord, Message, MessageId, OpenState,
    StatusTag,
};

use crate::{
    normalizer::NormalizedMessage,
    status::{transition, StatusTransition},
    unread::{next_unread, UnreadEvent},
};

/// How far a gateway echo may drift from the optimistic copy it confirms.
const ECHO_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Appended,
    /// An own-side echo re-keyed a pending local message.
    Confirmed,
    Duplicate,
}

impl MergeOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, Self::Created | Self::Appended)
    }

    pub fn changed(self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChange {
    pub previous: Option<ConversationKey>,
    pub current: ConversationKey,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    conversations: Vec<Conversation>,
    selected: Option<ConversationKey>,
}

impl ConversationState {
    /// Conversations, most recent last message first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn selected(&self) -> Option<&ConversationKey> {
        self.selected.as_ref()
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.selected.as_ref().and_then(|key| self.get(key))
    }

    pub fn get(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.key == key)
    }

    pub fn is_selected(&self, key: &ConversationKey) -> bool {
        self.selected.as_ref() == Some(key)
    }

    pub fn keys_missing_avatar(&self) -> Vec<ConversationKey> {
        self.conversations
            .iter()
            .filter(|c| c.avatar_url.is_none())
            .map(|c| c.key.clone())
            .collect()
    }

    pub fn merge_inbound(&mut self, inbound: &NormalizedMessage) -> MergeOutcome {
        let is_selected = self.is_selected(&inbound.key);
        let event = UnreadEvent::Inbound {
            from_self: inbound.message.sender.is_self(),
        };

        let outcome = match self.position(&inbound.key) {
            None => {
                let mut conversation =
                    Conversation::new(inbound.key.clone(), inbound.contact_name.as_deref());
                conversation.unread = next_unread(0, is_selected, event);
                if is_selected {
                    conversation.open_state = OpenState::Open;
                }
                insert_message(&mut conversation, inbound.message.clone());
                self.conversations.push(conversation);
                MergeOutcome::Created
            }
            Some(idx) => {
                let conversation = &mut self.conversations[idx];
                if conversation.contains_message(&inbound.message.id) {
                    return MergeOutcome::Duplicate;
                }
                if let Some(pending) = conversation
                    .messages
                    .iter_mut()
                    .find(|m| confirms_pending(m, &inbound.message))
                {
                    pending.id = inbound.message.id.clone();
                    return MergeOutcome::Confirmed;
                }
                adopt_contact_name(conversation, inbound.contact_name.as_deref());
                insert_message(conversation, inbound.message.clone());
                conversation.unread = next_unread(conversation.unread, is_selected, event);
                MergeOutcome::Appended
            }
        };
        self.sort();
        outcome
    }

    /// Store-originated row change. The selected conversation keeps zero
    /// unread and stays open whatever the row claims.
    pub fn apply_store_change(&mut self, record: &ConversationStatusRecord) -> bool {
        let is_selected = self.is_selected(&record.conversation_key);
        let idx = match self.position(&record.conversation_key) {
            Some(idx) => idx,
            None => {
                self.conversations.push(Conversation::new(
                    record.conversation_key.clone(),
                    record.contact_name.as_deref(),
                ));
                self.conversations.len() - 1
            }
        };

        let conversation = &mut self.conversations[idx];
        let before = conversation.clone();
        conversation.status = record.status;
        conversation.unread = next_unread(
            conversation.unread,
            is_selected,
            UnreadEvent::StoreUpdate {
                unread: record.unread_count,
            },
        );
        conversation.open_state = if is_selected {
            OpenState::Open
        } else {
            OpenState::from_flag(record.is_open)
        };
        if record.sector.is_some() {
            conversation.sector = record.sector.clone();
        }
        if record.avatar_url.is_some() {
            conversation.avatar_url = record.avatar_url.clone();
        }
        adopt_contact_name(conversation, record.contact_name.as_deref());
        if record.last_message_at > conversation.last_message_at {
            conversation.last_message_at = record.last_message_at;
            conversation.last_message_preview = record.last_message.clone();
        }

        let changed = *conversation != before;
        if changed {
            self.sort();
        }
        changed
    }

    pub fn restore(&mut self, record: &ConversationStatusRecord, history: Vec<Message>) {
        self.apply_store_change(record);
        if let Some(idx) = self.position(&record.conversation_key) {
            let conversation = &mut self.conversations[idx];
            for message in history {
                if !conversation.contains_message(&message.id) {
                    insert_message(conversation, message);
                }
            }
        }
        self.sort();
    }

    /// Makes `key` the selected conversation, creating it when unknown.
    /// Returns `None` when it was already selected.
    pub fn select(&mut self, key: &ConversationKey) -> Option<SelectionChange> {
        if self.is_selected(key) {
            return None;
        }
        let previous = self.selected.replace(key.clone());
        if let Some(prev) = previous.as_ref().and_then(|k| self.position(k)) {
            self.conversations[prev].open_state = OpenState::Closed;
        }

        let idx = match self.position(key) {
            Some(idx) => idx,
            None => {
                self.conversations.push(Conversation::new(key.clone(), None));
                self.conversations.len() - 1
            }
        };
        let conversation = &mut self.conversations[idx];
        conversation.unread = next_unread(conversation.unread, true, UnreadEvent::Selected);
        conversation.open_state = OpenState::Open;
        self.sort();

        Some(SelectionChange {
            previous,
            current: key.clone(),
        })
    }

    pub fn clear_selection(&mut self) -> Option<ConversationKey> {
        let previous = self.selected.take()?;
        if let Some(idx) = self.position(&previous) {
            self.conversations[idx].open_state = OpenState::Closed;
        }
        Some(previous)
    }

    pub fn change_status(
        &mut self,
        key: &ConversationKey,
        requested: StatusTag,
    ) -> Option<StatusTransition> {
        let idx = self.position(key)?;
        let conversation = &mut self.conversations[idx];
        let result = transition(conversation.status, requested);
        conversation.status = requested;
        Some(result)
    }

    pub fn append_outbound(&mut self, key: &ConversationKey, message: Message) {
        let idx = match self.position(key) {
            Some(idx) => idx,
            None => {
                self.conversations.push(Conversation::new(key.clone(), None));
                self.conversations.len() - 1
            }
        };
        let is_selected = self.is_selected(key);
        let conversation = &mut self.conversations[idx];
        if conversation.contains_message(&message.id) {
            return;
        }
        insert_message(conversation, message);
        conversation.unread = next_unread(
            conversation.unread,
            is_selected,
            UnreadEvent::Inbound { from_self: true },
        );
        self.sort();
    }

    pub fn confirm_outbound(
        &mut self,
        key: &ConversationKey,
        local_id: &MessageId,
        gateway_id: &MessageId,
    ) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let conversation = &mut self.conversations[idx];
        if conversation.contains_message(gateway_id) {
            let before = conversation.messages.len();
            conversation.messages.retain(|m| &m.id != local_id);
            return conversation.messages.len() != before;
        }
        match conversation.messages.iter_mut().find(|m| &m.id == local_id) {
            Some(message) => {
                message.id = gateway_id.clone();
                true
            }
            None => false,
        }
    }

    pub fn discard_outbound(&mut self, key: &ConversationKey, local_id: &MessageId) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let conversation = &mut self.conversations[idx];
        let before = conversation.messages.len();
        conversation.messages.retain(|m| &m.id != local_id);
        if conversation.messages.len() == before {
            return false;
        }
        let latest = conversation.messages.last();
        conversation.last_message_preview = latest.map(|m| m.body.content());
        conversation.last_message_at = latest.map(|m| m.timestamp);
        self.sort();
        true
    }

    pub fn set_avatar(&mut self, key: &ConversationKey, avatar_url: &str) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let conversation = &mut self.conversations[idx];
        if conversation.avatar_url.as_deref() == Some(avatar_url) {
            return false;
        }
        conversation.avatar_url = Some(avatar_url.to_string());
        true
    }

    pub fn set_preview_if_missing(&mut self, key: &ConversationKey, preview: &str) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let conversation = &mut self.conversations[idx];
        if conversation.last_message_preview.is_some() {
            return false;
        }
        conversation.last_message_preview = Some(preview.to_string());
        true
    }

    pub fn pin_selection(&mut self) -> bool {
        let Some(idx) = self.selected.as_ref().and_then(|key| self.position(key)) else {
            return false;
        };
        let conversation = &mut self.conversations[idx];
        let unread = next_unread(conversation.unread, true, UnreadEvent::Pin);
        let changed = unread != conversation.unread || !conversation.open_state.is_open();
        conversation.unread = unread;
        conversation.open_state = OpenState::Open;
        changed
    }

    fn position(&self, key: &ConversationKey) -> Option<usize> {
        self.conversations.iter().position(|c| &c.key == key)
    }

    fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }
}

fn insert_message(conversation: &mut Conversation, message: Message) {
    let is_latest = conversation
        .last_message_at
        .map_or(true, |last| message.timestamp >= last);
    if is_latest {
        conversation.last_message_at = Some(message.timestamp);
        conversation.last_message_preview = Some(message.body.content());
    }
    let at = conversation
        .messages
        .iter()
        .rposition(|existing| existing.timestamp <= message.timestamp)
        .map_or(0, |idx| idx + 1);
    conversation.messages.insert(at, message);
}

fn confirms_pending(pending: &Message, echo: &Message) -> bool {
    pending.id.is_local()
        && pending.sender.is_self()
        && echo.sender.is_self()
        && pending.body == echo.body
        && (pending.timestamp - echo.timestamp).abs() <= Duration::seconds(ECHO_WINDOW_SECS)
}

/// A placeholder name (the bare phone) gives way to a real contact name.
fn adopt_contact_name(conversation: &mut Conversation, contact_name: Option<&str>) {
    let Some(name) = contact_name.map(str::trim).filter(|n| !n.is_empty()) else {
        return;
    };
    if conversation.display_name == conversation.contact_address {
        conversation.display_name = name.to_string();
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
