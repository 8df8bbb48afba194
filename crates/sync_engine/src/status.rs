use serde::{Deserialize, Serialize};
use shared::domain::{Conversation, StatusTag};

/// Console tabs. `Contacts` and `StatusView` apply no status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "tab", content = "status")]
pub enum Tab {
    Status(StatusTag),
    Contacts,
    StatusView,
}

impl Tab {
    pub fn status_filter(self) -> Option<StatusTag> {
        match self {
            Self::Status(tag) => Some(tag),
            Self::Contacts | Self::StatusView => None,
        }
    }

    /// Pseudo-tabs replace the message panel instead of filtering the list.
    pub fn swaps_panel(self) -> bool {
        matches!(self, Self::Contacts | Self::StatusView)
    }
}

impl Default for Tab {
    fn default() -> Self {
        Self::Status(StatusTag::Waiting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    Unchanged,
    Changed { from: StatusTag, to: StatusTag },
}

/// Operator-requested tag change. Any tag may move to any other; the engine
/// itself never calls this.
pub fn transition(current: StatusTag, requested: StatusTag) -> StatusTransition {
    if current == requested {
        StatusTransition::Unchanged
    } else {
        StatusTransition::Changed {
            from: current,
            to: requested,
        }
    }
}

/// Whether the presentation layer should offer a composer. Informational
/// only; sends are never rejected on this basis.
pub fn accepts_composition(status: StatusTag) -> bool {
    !matches!(status, StatusTag::Finished)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabCounts {
    pub waiting: usize,
    pub attending: usize,
    pub pending: usize,
    pub finished: usize,
    pub contacts: usize,
}

impl TabCounts {
    pub fn for_tab(&self, tab: Tab) -> usize {
        match tab {
            Tab::Status(StatusTag::Waiting) => self.waiting,
            Tab::Status(StatusTag::Attending) => self.attending,
            Tab::Status(StatusTag::Pending) => self.pending,
            Tab::Status(StatusTag::Finished) => self.finished,
            Tab::Contacts | Tab::StatusView => self.contacts,
        }
    }
}

pub fn tab_counts<'a>(conversations: impl IntoIterator<Item = &'a Conversation>) -> TabCounts {
    let mut counts = TabCounts::default();
    for conversation in conversations {
        counts.contacts += 1;
        match conversation.status {
            StatusTag::Waiting => counts.waiting += 1,
            StatusTag::Attending => counts.attending += 1,
            StatusTag::Pending => counts.pending += 1,
            StatusTag::Finished => counts.finished += 1,
        }
    }
    counts
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub tab: Tab,
    pub sector: Option<String>,
    pub search: Option<String>,
}

impl ConversationFilter {
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if let Some(tag) = self.tab.status_filter() {
            if conversation.status != tag {
                return false;
            }
        }
        if let Some(sector) = self.sector.as_deref().filter(|s| !s.trim().is_empty()) {
            let same_sector = conversation
                .sector
                .as_deref()
                .is_some_and(|own| own.eq_ignore_ascii_case(sector.trim()));
            if !same_sector {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                conversation.display_name.to_lowercase().contains(&needle)
                    || conversation.contact_address.contains(&needle)
                    || conversation
                        .last_message_preview
                        .as_deref()
                        .is_some_and(|preview| preview.to_lowercase().contains(&needle))
            }
        }
    }

    pub fn apply<'a>(&self, conversations: &'a [Conversation]) -> Vec<&'a Conversation> {
        conversations.iter().filter(|c| self.matches(c)).collect()
    }
}

#[cfg(test)]
#[path = "tests/status_tests.rs"]
mod tests;
