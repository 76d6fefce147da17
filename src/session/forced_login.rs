//! Forced-login policy

use crate::accounts::Location;
use crate::config::settings::ForceLoginSettings;

/// A connected player, as seen by the core
pub trait Player {
    fn name(&self) -> &str;

    /// Name of the world the player is in
    fn world(&self) -> &str;

    fn has_permission(&self, permission: &str) -> bool;

    fn location(&self) -> Location;
}

/// Who must authenticate before interacting
#[derive(Debug, Clone)]
pub struct ForcedLoginPolicy {
    global: bool,
    in_worlds: Vec<String>,
    exempt_permission: String,
}

impl ForcedLoginPolicy {
    pub fn new(global: bool, in_worlds: Vec<String>, exempt_permission: impl Into<String>) -> Self {
        Self {
            global,
            in_worlds,
            exempt_permission: exempt_permission.into(),
        }
    }

    pub fn from_settings(settings: &ForceLoginSettings) -> Self {
        Self::new(
            settings.global,
            settings.in_worlds.clone(),
            settings.exempt_permission.clone(),
        )
    }

    /// Forced globally or by world, unless the player holds the exemption
    ///
    /// Depends on the player's current world, so re-check it after every
    /// session transition and world change.
    pub fn is_player_forced_to_login(&self, player: &dyn Player) -> bool {
        let applies = self.global || self.in_worlds.iter().any(|w| w == player.world());
        applies && !player.has_permission(&self.exempt_permission)
    }
}
