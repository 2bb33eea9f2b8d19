//! Centralized access authority.
//!
//! Every admission path consults this one module instead of sprinkling
//! owner/grant/token checks across call sites. It answers two questions:
//! may this caller proceed at all ([`AccessAuthority::screen`]), and which
//! admission tier do they get ([`AccessAuthority::tier_of`]).

use std::sync::Arc;

use tracing::debug;

use crate::admission::Tier;
use crate::error::AccessResult;
use crate::registry::AuthorizationRegistry;
use crate::tokens::TokenManager;

/// Outcome of screening a caller before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenVerdict {
    /// The caller may proceed at the given tier.
    Admitted(Tier),
    /// The caller is banned. Carries the recorded reason when known.
    BannedUser { reason: String },
    /// The request originates from a banned channel.
    BannedChannel,
    /// Not banned, but holds no grant and no usable token.
    TokenRequired,
}

impl ScreenVerdict {
    /// Whether the verdict lets the request through.
    pub fn is_admitted(&self) -> bool {
        matches!(self, ScreenVerdict::Admitted(_))
    }
}

/// Gate consulted by every admission path.
pub struct AccessAuthority {
    registry: Arc<AuthorizationRegistry>,
    tokens: Arc<TokenManager>,
}

impl AccessAuthority {
    pub fn new(registry: Arc<AuthorizationRegistry>, tokens: Arc<TokenManager>) -> Self {
        Self { registry, tokens }
    }

    /// Resolve a caller's admission tier.
    ///
    /// Owner, grant holders, and callers with an activated unexpired token
    /// get the priority lane; everyone else is regular.
    pub async fn tier_of(&self, caller_id: &str) -> AccessResult<Tier> {
        if self.registry.is_owner(caller_id) || self.registry.is_authorized(caller_id).await? {
            return Ok(Tier::Priority);
        }
        if self.tokens.has_active_token(caller_id).await? {
            return Ok(Tier::Priority);
        }
        Ok(Tier::Regular)
    }

    /// Screen a caller (and optionally the channel the request came
    /// through) before admission. Bans win over every grant or token.
    pub async fn screen(
        &self,
        caller_id: &str,
        channel_id: Option<&str>,
    ) -> AccessResult<ScreenVerdict> {
        if let Some(entry) = self.registry.user_ban(caller_id) {
            debug!(caller = %caller_id, "Screen denied, user banned");
            return Ok(ScreenVerdict::BannedUser {
                reason: entry.reason,
            });
        }
        if let Some(channel) = channel_id
            && self.registry.is_banned_channel(channel)
        {
            debug!(caller = %caller_id, channel = %channel, "Screen denied, channel banned");
            return Ok(ScreenVerdict::BannedChannel);
        }
        if !self.tokens.check(caller_id).await? {
            return Ok(ScreenVerdict::TokenRequired);
        }
        Ok(ScreenVerdict::Admitted(self.tier_of(caller_id).await?))
    }
}
