//! Per-user conversation state and its transitions.

use std::time::{Duration, Instant};

/// Guarded multi-step flow a user can be in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// `/addtab`: register a new score
    AddEntry,
    /// `/deltab`: remove a registered score
    DeleteEntry,
}

/// Text-input step of the active flow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Waiting for the shared password
    AwaitingPassword,
    /// Waiting for a spreadsheet link
    AwaitingUrl,
}

/// Active conversation of a single user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conversation {
    /// Flow being executed
    pub flow: Flow,
    /// Current step within the flow
    pub step: Step,
}

/// What the handler has to do after a text input was applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Password accepted; ask for the link. Carries the next conversation.
    PromptUrl(Conversation),
    /// Password accepted; render the deletion menu. Conversation ends.
    ShowDeletionMenu,
    /// Password rejected. Conversation ends.
    Rejected,
    /// Link received; resolve it. Conversation ends.
    Resolve(String),
}

impl Conversation {
    /// Fresh conversation for `flow`, waiting for the password
    #[must_use]
    pub const fn start(flow: Flow) -> Self {
        Self {
            flow,
            step: Step::AwaitingPassword,
        }
    }

    /// Apply one text input.
    ///
    /// Input is trimmed before use; the password must match `secret` exactly.
    #[must_use]
    pub fn on_text(self, text: &str, secret: &str) -> StepOutcome {
        let input = text.trim();
        match (self.flow, self.step) {
            (_, Step::AwaitingPassword) if input != secret => StepOutcome::Rejected,
            (Flow::AddEntry, Step::AwaitingPassword) => StepOutcome::PromptUrl(Self {
                flow: Flow::AddEntry,
                step: Step::AwaitingUrl,
            }),
            (Flow::DeleteEntry, Step::AwaitingPassword) => StepOutcome::ShowDeletionMenu,
            (Flow::AddEntry, Step::AwaitingUrl) => StepOutcome::Resolve(input.to_string()),
            // Not reachable through `start`; end the conversation quietly
            (Flow::DeleteEntry, Step::AwaitingUrl) => StepOutcome::Rejected,
        }
    }
}

/// Capability to delete the entries shown in one deletion menu
#[derive(Clone, Debug)]
pub struct DeletionGrant {
    /// Names offered by the menu, in button order
    pub names: Vec<String>,
    /// When the menu was rendered
    pub issued_at: Instant,
}

impl DeletionGrant {
    /// Grant covering `names`, issued now
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            issued_at: Instant::now(),
        }
    }

    /// Whether the grant is older than `ttl`
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.issued_at.elapsed() > ttl
    }

    /// Resolve a deletion callback payload to a granted name.
    ///
    /// `payload` is either `#<index>` into the menu or the name itself.
    /// Names starting with `#` are always sent by index.
    #[must_use]
    pub fn resolve(&self, payload: &str) -> Option<&str> {
        match payload.strip_prefix('#') {
            Some(idx) => idx
                .parse::<usize>()
                .ok()
                .and_then(|idx| self.names.get(idx))
                .map(String::as_str),
            None => self
                .names
                .iter()
                .find(|n| n.as_str() == payload)
                .map(String::as_str),
        }
    }
}

/// All mutable state kept for one user
#[derive(Clone, Debug, Default)]
pub struct UserSlot {
    /// Active flow, if any
    pub conversation: Option<Conversation>,
    /// Last link that failed to resolve, offered for retry
    pub pending_retry: Option<String>,
    /// Deletion capability from the last rendered deletion menu
    pub deletion_grant: Option<DeletionGrant>,
}

impl UserSlot {
    /// Start `flow`, discarding any unfinished conversation and its leftovers
    pub fn begin(&mut self, flow: Flow) {
        self.conversation = Some(Conversation::start(flow));
        self.pending_retry = None;
        self.deletion_grant = None;
    }
}
