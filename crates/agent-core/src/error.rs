use thiserror::Error;

/// Error types for agent session and registry operations
///
/// This enum covers the failure conditions that can surface from the agent
/// session core: rejected state transitions, media driver failures, registry
/// lookups, and collaborator breakdowns. Variants map one-to-one onto the
/// error codes exposed to web clients (see the web gateway crate).
///
/// # Examples
///
/// ```
/// use openacd_agent_core::{AcdError, Result};
///
/// fn offer_call() -> Result<()> {
///     Err(AcdError::invalid_state_change("wrapup", "ringing"))
/// }
///
/// match offer_call() {
///     Ok(_) => println!("call offered"),
///     Err(AcdError::InvalidStateChange { from, to }) => {
///         println!("cannot go {} -> {}", from, to)
///     }
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcdError {
    /// The requested agent state transition is not allowed
    ///
    /// Produced whenever a client, queue, or media driver asks the session
    /// to move to a state the transition table forbids from the current one.
    ///
    /// # Examples
    /// - `idle -> wrapup` requested by a client
    /// - A queue ringing an agent who is already `oncall`
    /// - A call offered while the agent is still in `wrapup`
    #[error("Invalid state change: {from} -> {to}")]
    InvalidStateChange { from: String, to: String },

    /// The media driver rejected a command
    ///
    /// The command reached the driver but the driver reported it cannot be
    /// executed against the current media.
    ///
    /// # Examples
    /// - Dial rejected because the leg is already up
    /// - Unsupported media command name
    #[error("Invalid media call: {0}")]
    InvalidMediaCall(String),

    /// Referenced media driver or outbound media type is absent
    ///
    /// # Examples
    /// - `media_command` with no call attached
    /// - `init_outbound` for a media type with no registered factory
    #[error("Media does not exist: {0}")]
    MediaMissing(String),

    /// Named peer agent could not be found in the registry
    ///
    /// # Examples
    /// - `agent_transfer` to a login with no live session
    /// - `spy` on an agent who already logged out
    #[error("Agent does not exist: {0}")]
    AgentMissing(String),

    /// Malformed or unknown request
    ///
    /// Raised at the gateway boundary for unknown functions, arity
    /// mismatches, and unparseable arguments; the session itself raises it
    /// for arguments it cannot interpret.
    ///
    /// # Examples
    /// - Unknown API function name
    /// - Release reason string that is neither `Default` nor `id:label:bias`
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// This long poll was displaced by a newer one on the same session
    #[error("Poll displaced by a newer poll")]
    PollReplaced,

    /// The cluster registry is unreachable, so sessions cannot be created
    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    /// A live session already exists for this login
    ///
    /// Returned when two logins race for the same agent; the loser observes
    /// this error and the existing session is untouched.
    #[error("Agent already logged in: {0}")]
    AlreadyLoggedIn(String),

    /// A collaborator failed with an unclassified reason
    ///
    /// Catch-all for timeouts and unexpected collaborator failures; shown to
    /// clients as `UNKNOWN_ERROR`.
    #[error("Unclassified collaborator failure: {0}")]
    Unknown(String),
}

impl AcdError {
    /// Create an `InvalidStateChange` from state labels
    ///
    /// # Examples
    ///
    /// ```
    /// use openacd_agent_core::AcdError;
    ///
    /// let error = AcdError::invalid_state_change("idle", "wrapup");
    /// println!("{}", error);  // Prints: Invalid state change: idle -> wrapup
    /// ```
    pub fn invalid_state_change<A: Into<String>, B: Into<String>>(from: A, to: B) -> Self {
        Self::InvalidStateChange { from: from.into(), to: to.into() }
    }

    /// Create an `InvalidMediaCall` error with the provided message
    pub fn invalid_media_call<S: Into<String>>(msg: S) -> Self {
        Self::InvalidMediaCall(msg.into())
    }

    /// Create a `MediaMissing` error with the provided message
    pub fn media_missing<S: Into<String>>(msg: S) -> Self {
        Self::MediaMissing(msg.into())
    }

    /// Create an `AgentMissing` error naming the absent login
    pub fn agent_missing<S: Into<String>>(login: S) -> Self {
        Self::AgentMissing(login.into())
    }

    /// Create a `BadRequest` error with the provided message
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create an `Unknown` error with the provided message
    pub fn unknown<S: Into<String>>(msg: S) -> Self {
        Self::Unknown(msg.into())
    }
}

/// Result type alias for agent session core operations
pub type Result<T> = std::result::Result<T, AcdError>;
