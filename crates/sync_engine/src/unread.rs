#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadEvent {
    Inbound { from_self: bool },
    Selected,
    /// The durable row reported a counter.
    StoreUpdate { unread: u32 },
    Pin,
}

/// Next unread counter for a conversation.
///
/// The selected conversation is always at zero. An own-side message clears
/// the counter, matching the durable row update.
pub fn next_unread(current: u32, is_selected: bool, event: UnreadEvent) -> u32 {
    if is_selected {
        return 0;
    }
    match event {
        UnreadEvent::Inbound { from_self: true } => 0,
        UnreadEvent::Inbound { from_self: false } => current.saturating_add(1),
        UnreadEvent::Selected => 0,
        UnreadEvent::StoreUpdate { unread } => unread,
        UnreadEvent::Pin => current,
    }
}
