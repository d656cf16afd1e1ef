use std::collections::HashMap;

use crate::core::turn::{Reaction, Turn, TurnId};

/// Partial update merged onto an existing turn by [`Transcript::patch`].
/// Unset fields are left untouched; the turn keeps its position.
#[derive(Debug, Default, Clone)]
pub struct TurnPatch {
    /// Text appended to the existing content. Streaming content only ever
    /// grows, so the patch carries the delta rather than a replacement.
    pub append_content: Option<String>,
    pub streaming: Option<bool>,
    /// Outer `Some` means "set the reaction field", inner option is the
    /// tri-state value itself.
    pub reaction: Option<Option<Reaction>>,
    pub forwarded: Option<bool>,
}

impl TurnPatch {
    pub fn append(text: impl Into<String>) -> Self {
        Self {
            append_content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn settled() -> Self {
        Self {
            streaming: Some(false),
            ..Self::default()
        }
    }

    pub fn reaction(value: Option<Reaction>) -> Self {
        Self {
            reaction: Some(value),
            ..Self::default()
        }
    }
}

/// Ordered, in-memory list of conversation turns. The single source of truth
/// for everything the presentation layer renders.
///
/// Turns are appended, patched in place by id, or cleared wholesale; they are
/// never reordered or individually removed. An id index sits beside the
/// ordered list so per-chunk patches do not rescan the conversation.
#[derive(Default)]
pub struct Transcript {
    turns: Vec<Turn>,
    index: HashMap<TurnId, usize>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next turn id without inserting anything.
    pub fn allocate_id(&mut self) -> TurnId {
        let id = TurnId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn push(&mut self, turn: Turn) -> TurnId {
        let id = turn.id;
        debug_assert!(!self.index.contains_key(&id), "duplicate turn id {id}");
        self.index.insert(id, self.turns.len());
        self.turns.push(turn);
        id
    }

    /// Merge `patch` onto the turn with the given id. Returns `false` if the
    /// id is unknown: a chunk can legitimately race a `clear()`, so a missing
    /// turn is tolerated rather than treated as an error.
    pub fn patch(&mut self, id: TurnId, patch: TurnPatch) -> bool {
        let Some(&pos) = self.index.get(&id) else {
            return false;
        };
        let turn = &mut self.turns[pos];
        if let Some(text) = patch.append_content {
            turn.content.push_str(&text);
        }
        if let Some(streaming) = patch.streaming {
            turn.streaming = streaming;
        }
        if let Some(reaction) = patch.reaction {
            turn.reaction = reaction;
        }
        if let Some(forwarded) = patch.forwarded {
            turn.forwarded = forwarded;
        }
        true
    }

    /// Drop every turn. Ids are not reused afterwards, so a patch from a
    /// stream that outlived the clear cannot hit a recycled id.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.index.clear();
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.index.get(&id).map(|&pos| &self.turns[pos])
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Read-only filtered view: turns whose content contains `query`
    /// case-insensitively, in transcript order. An empty query is the
    /// identity filter.
    pub fn search(&self, query: &str) -> Vec<&Turn> {
        if query.is_empty() {
            return self.turns.iter().collect();
        }
        let needle = query.to_lowercase();
        self.turns
            .iter()
            .filter(|turn| turn.content.to_lowercase().contains(&needle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::turn::Role;

    fn transcript_with(contents: &[(&str, Role)]) -> Transcript {
        let mut transcript = Transcript::new();
        for (content, role) in contents {
            let id = transcript.allocate_id();
            let turn = match role {
                Role::User => Turn::user(id, *content, None, None),
                Role::Assistant => Turn::assistant(id, *content),
            };
            transcript.push(turn);
        }
        transcript
    }

    #[test]
    fn push_assigns_unique_increasing_ids() {
        let mut transcript = Transcript::new();
        let a = transcript.allocate_id();
        let b = transcript.allocate_id();
        assert!(a < b);
        transcript.push(Turn::user(a, "one", None, None));
        transcript.push(Turn::user(b, "two", None, None));
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.get(a).unwrap().content, "one");
    }

    #[test]
    fn ids_survive_a_clear_without_reuse() {
        let mut transcript = Transcript::new();
        let before = transcript.allocate_id();
        transcript.push(Turn::user(before, "gone", None, None));
        transcript.clear();
        let after = transcript.allocate_id();
        assert!(after > before);
        assert!(transcript.get(before).is_none());
    }

    #[test]
    fn patch_appends_without_touching_other_fields() {
        let mut transcript = Transcript::new();
        let id = transcript.allocate_id();
        transcript.push(Turn::assistant_placeholder(id));

        assert!(transcript.patch(id, TurnPatch::append("Hello")));
        assert!(transcript.patch(id, TurnPatch::append(", world")));

        let turn = transcript.get(id).unwrap();
        assert_eq!(turn.content, "Hello, world");
        assert!(turn.streaming, "appending must not settle the turn");

        assert!(transcript.patch(id, TurnPatch::settled()));
        let turn = transcript.get(id).unwrap();
        assert!(!turn.streaming);
        assert_eq!(turn.content, "Hello, world");
    }

    #[test]
    fn patch_on_unknown_id_is_a_noop() {
        let mut transcript = Transcript::new();
        assert!(!transcript.patch(TurnId(42), TurnPatch::append("late chunk")));
        assert!(transcript.is_empty());
    }

    #[test]
    fn patch_preserves_order() {
        let mut transcript = transcript_with(&[
            ("first", Role::User),
            ("second", Role::Assistant),
            ("third", Role::User),
        ]);
        let second_id = transcript.iter().nth(1).unwrap().id;
        transcript.patch(second_id, TurnPatch::append("!"));
        let contents: Vec<_> = transcript.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second!", "third"]);
    }

    #[test]
    fn search_empty_query_is_identity() {
        let transcript = transcript_with(&[
            ("Hello there", Role::User),
            ("General Kenobi", Role::Assistant),
        ]);
        let all = transcript.search("");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "Hello there");
    }

    #[test]
    fn search_is_case_insensitive_and_order_preserving() {
        let transcript = transcript_with(&[
            ("Rust is fast", Role::User),
            ("I prefer trains", Role::Assistant),
            ("RUSTACEANS unite", Role::User),
        ]);
        let hits = transcript.search("rust");
        let contents: Vec<_> = hits.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["Rust is fast", "RUSTACEANS unite"]);
    }

    #[test]
    fn search_does_not_mutate_the_store() {
        let transcript = transcript_with(&[("alpha", Role::User)]);
        let _ = transcript.search("nothing matches this");
        assert_eq!(transcript.len(), 1);
    }
}
