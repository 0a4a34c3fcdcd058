//! Server-side conversation continuation.

use serde::Serialize;

/// Continuation state of a stateful backend.
///
/// Starts [`Fresh`](ConversationState::Fresh) and only ever moves to
/// [`Continuing`](ConversationState::Continuing) with a newer token. A reply
/// without a token leaves the state unchanged, so a conversation that has
/// started never silently restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "token", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Fresh,
    Continuing(String),
}

impl ConversationState {
    pub fn is_fresh(&self) -> bool {
        matches!(self, ConversationState::Fresh)
    }

    /// Token to send with the next request, if any.
    pub fn continuation(&self) -> Option<&str> {
        match self {
            ConversationState::Fresh => None,
            ConversationState::Continuing(token) => Some(token),
        }
    }

    /// Record the token from a successful reply.
    ///
    /// Returns `false` when the reply carried no usable token and the
    /// state was left as it was.
    pub fn advance(&mut self, token: Option<&str>) -> bool {
        match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                *self = ConversationState::Continuing(token.to_string());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_fresh() {
        let state = ConversationState::default();
        assert!(state.is_fresh());
        assert_eq!(state.continuation(), None);
    }

    #[test]
    fn test_advance_replaces_token() {
        let mut state = ConversationState::default();
        assert!(state.advance(Some("resp_1")));
        assert!(state.advance(Some("resp_2")));
        assert_eq!(state.continuation(), Some("resp_2"));
    }

    #[test]
    fn test_missing_token_never_unsets_state() {
        let mut state = ConversationState::default();
        state.advance(Some("conv-9"));
        assert!(!state.advance(None));
        assert!(!state.advance(Some("")));
        assert_eq!(state.continuation(), Some("conv-9"));

        let mut fresh = ConversationState::default();
        fresh.advance(None);
        assert!(fresh.is_fresh());
    }
}
