//! Caller subscription intent and its wire representation.

use serde::Serialize;

use crate::connection::Phase;

/// Client-to-server filter update: `{"wsb":{"filters":[...]}}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterUpdate {
    pub wsb: FilterSet,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSet {
    pub filters: Vec<String>,
}

impl FilterUpdate {
    #[must_use]
    pub fn new(filters: Vec<String>) -> Self {
        Self {
            wsb: FilterSet { filters },
        }
    }
}

/// Remembers the most recent filter list and replays it on every transition into
/// [`Phase::Live`].
#[derive(Debug, Clone, Default)]
pub(crate) struct SubscriptionTracker {
    filters: Vec<String>,
}

impl SubscriptionTracker {
    /// Store `filters`, returning the update to send right away if the connection is live.
    pub(crate) fn set_filters(&mut self, filters: Vec<String>, phase: Phase) -> Option<FilterUpdate> {
        self.filters = filters;

        if phase.is_live() {
            Some(FilterUpdate::new(self.filters.clone()))
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                %phase,
                filters = ?self.filters,
                "Not connected, filters will be sent once live"
            );
            None
        }
    }

    /// The update to send after a (re)connection, if any filters are set.
    pub(crate) fn replay(&self) -> Option<FilterUpdate> {
        (!self.filters.is_empty()).then(|| FilterUpdate::new(self.filters.clone()))
    }

    #[cfg(test)]
    pub(crate) fn filters(&self) -> &[String] {
        &self.filters
    }
}
