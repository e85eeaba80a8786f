//! Access policy engine.
//!
//! Turns a normalized sender/chat pair into an allow/deny decision. The
//! engine itself never fails: unrecognized policy values and store-layer
//! errors both resolve to deny (failing open would defeat the gate).

use std::fmt;
use std::str::FromStr;

use crate::allowlist::AllowListStore;
use crate::error::StoreError;
use crate::ident::IdentToken;
use crate::pairing::PairingStore;

/// How a chat kind is gated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyMode {
    /// Never respond.
    Disabled,
    /// Respond to anyone.
    Open,
    /// Respond only to allow-listed identities.
    Allowlist,
    /// Like `Allowlist`, but unknown senders get a pairing code.
    Pairing,
    /// Anything else from configuration; always denies.
    Other(String),
}

impl FromStr for PolicyMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "disabled" => Self::Disabled,
            "open" => Self::Open,
            "allowlist" => Self::Allowlist,
            "pairing" => Self::Pairing,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::Open => f.write_str("open"),
            Self::Allowlist => f.write_str("allowlist"),
            Self::Pairing => f.write_str("pairing"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Kind of chat an inbound message arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Direct,
    Group,
}

/// Per-deployment gating configuration, supplied by [`crate::config`].
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub dm: PolicyMode,
    pub group: PolicyMode,
    /// Require the bot handle or a keyword among group-message mentions.
    pub group_require_mention: bool,
    /// The bot's own handle, for mention gating.
    pub bot_handle: Option<String>,
    /// Extra trigger keywords accepted in place of the handle.
    pub mention_keywords: Vec<String>,
    /// Config-supplied allow list, checked alongside the durable store.
    pub allow_from: Vec<IdentToken>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            dm: PolicyMode::Pairing,
            group: PolicyMode::Allowlist,
            group_require_mention: true,
            bot_handle: None,
            mention_keywords: Vec::new(),
            allow_from: Vec::new(),
        }
    }
}

/// What the transport supplies per inbound event.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub chat_id: String,
    pub chat_kind: ChatKind,
    /// Mentions extracted from the message body by the transport.
    pub mentions: Vec<String>,
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    /// Diagnostic reason, for logs and operator tooling. Not shown verbatim
    /// to the sender.
    pub reason: String,
    /// Human-facing pairing code attached to a deny under the pairing
    /// policy.
    pub pairing_code: Option<String>,
}

impl Decision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            pairing_code: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            pairing_code: None,
        }
    }
}

/// Policy engine bound to the two stores.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policy: GatePolicy,
    pairing: PairingStore,
    allow: AllowListStore,
}

impl PolicyEngine {
    pub fn new(policy: GatePolicy, pairing: PairingStore, allow: AllowListStore) -> Self {
        Self {
            policy,
            pairing,
            allow,
        }
    }

    /// Evaluate an inbound message. Never errors; store failures deny.
    pub fn evaluate(&self, msg: &InboundMessage) -> Decision {
        match msg.chat_kind {
            ChatKind::Direct => self.evaluate_dm(msg),
            ChatKind::Group => self.evaluate_group(msg),
        }
    }

    fn evaluate_dm(&self, msg: &InboundMessage) -> Decision {
        match &self.policy.dm {
            PolicyMode::Disabled => Decision::deny("dm policy is disabled"),
            PolicyMode::Open => Decision::allow("dm policy is open"),
            PolicyMode::Allowlist => match self.sender_allowed(msg) {
                Ok(true) => Decision::allow("sender is allow-listed"),
                Ok(false) => Decision::deny("sender is not allow-listed"),
                Err(e) => deny_on_store_error("dm allowlist check", &e),
            },
            PolicyMode::Pairing => match self.sender_allowed(msg) {
                Ok(true) => Decision::allow("sender is allow-listed"),
                Ok(false) => self.start_pairing(msg),
                Err(e) => deny_on_store_error("dm allowlist check", &e),
            },
            PolicyMode::Other(value) => {
                Decision::deny(format!("unrecognized dm policy {value:?}"))
            }
        }
    }

    fn evaluate_group(&self, msg: &InboundMessage) -> Decision {
        let chat_allowed = match &self.policy.group {
            PolicyMode::Disabled => return Decision::deny("group policy is disabled"),
            PolicyMode::Open => Decision::allow("group policy is open"),
            PolicyMode::Allowlist | PolicyMode::Pairing => {
                match self.chat_allowed(msg) {
                    Ok(true) => Decision::allow("chat is allow-listed"),
                    Ok(false) => return Decision::deny("chat is not allow-listed"),
                    Err(e) => return deny_on_store_error("group allowlist check", &e),
                }
            }
            PolicyMode::Other(value) => {
                return Decision::deny(format!("unrecognized group policy {value:?}"));
            }
        };

        if self.policy.group_require_mention && !self.is_mentioned(&msg.mentions) {
            return Decision::deny("bot was not mentioned");
        }
        chat_allowed
    }

    /// Sender is allowed if the config list or the store matches the numeric
    /// id or the username form of the identity.
    fn sender_allowed(&self, msg: &InboundMessage) -> Result<bool, StoreError> {
        let mut tokens = Vec::with_capacity(2);
        if let Ok(t) = IdentToken::parse(&msg.sender_id) {
            tokens.push(t);
        }
        if let Some(username) = &msg.sender_username {
            if let Ok(t) = IdentToken::parse(username) {
                tokens.push(t);
            }
        }
        if tokens.is_empty() {
            // No usable identity at all; treat as unknown, never as wildcard.
            return Ok(false);
        }
        if self
            .policy
            .allow_from
            .iter()
            .any(|e| e.is_wildcard() || tokens.contains(e))
        {
            return Ok(true);
        }
        for token in &tokens {
            if self.allow.is_allowed(token)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn chat_allowed(&self, msg: &InboundMessage) -> Result<bool, StoreError> {
        let Ok(token) = IdentToken::parse(&msg.chat_id) else {
            return Ok(false);
        };
        if self
            .policy
            .allow_from
            .iter()
            .any(|e| e.is_wildcard() || e == &token)
        {
            return Ok(true);
        }
        self.allow.is_chat_allowed(&token)
    }

    fn is_mentioned(&self, mentions: &[String]) -> bool {
        let normalized: Vec<IdentToken> = mentions
            .iter()
            .filter_map(|m| IdentToken::parse(m).ok())
            .collect();
        if let Some(handle) = &self.policy.bot_handle {
            if let Ok(handle) = IdentToken::parse(handle) {
                if normalized.contains(&handle) {
                    return true;
                }
            }
        }
        self.policy.mention_keywords.iter().any(|kw| {
            IdentToken::parse(kw)
                .map(|kw| normalized.contains(&kw))
                .unwrap_or(false)
        })
    }

    /// Issue or refresh a pairing request and deny with the code attached.
    fn start_pairing(&self, msg: &InboundMessage) -> Decision {
        let (Ok(chat), Ok(user)) = (
            IdentToken::parse(&msg.chat_id),
            IdentToken::parse(&msg.sender_id),
        ) else {
            return Decision::deny("sender has no usable identity");
        };
        match self
            .pairing
            .generate(&chat, &user, msg.sender_username.as_deref())
        {
            Ok(code) => {
                let mut decision = Decision::deny("pairing required");
                decision.pairing_code = Some(code);
                decision
            }
            // Sender sees a generic "try again later"; no code to hand out.
            Err(StoreError::QuotaExceeded { .. }) => {
                Decision::deny("pairing quota exceeded for this chat")
            }
            Err(e) => deny_on_store_error("pairing generate", &e),
        }
    }
}

fn deny_on_store_error(what: &str, e: &StoreError) -> Decision {
    tracing::warn!(error = %e, "{what} failed; denying");
    Decision::deny(format!("{what} failed: {e}"))
}
