//! Intent validation.
//!
//! Pure checks against the authoritative world and registry. Nothing in this
//! module mutates state; the tick loop applies an intent only after its check
//! returns `Ok`.

use quarry_config::RulesConfig;
use quarry_protocol::{BlockAction, Orientation, PlayerId, RejectReason};
use quarry_world::{Block, BlockPos, WorldStore};
use rustc_hash::FxHashSet;

use crate::registry::{Player, PlayerRegistry};

/// Eye height above the feet position.
pub const EYE_HEIGHT: f32 = 1.62;

/// Player bounding box width (X and Z).
pub const PLAYER_WIDTH: f32 = 0.6;

/// Player bounding box height.
pub const PLAYER_HEIGHT: f32 = 1.8;

/// Longest idle gap credited to a single move.
const MAX_CATCH_UP_SECS: f32 = 1.0;

/// Why an intent was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("moved {distance:.2} blocks, allowed {allowed:.2}")]
    TooFast { distance: f32, allowed: f32 },
    #[error("malformed move: {0}")]
    InvalidMove(&'static str),
    #[error("target {distance:.2} blocks away, reach is {reach:.2}")]
    OutOfReach { distance: f32, reach: f32 },
    #[error("target {0:?} is outside the world")]
    OutOfBounds(BlockPos),
    #[error("{0} cannot be used here")]
    IllegalBlock(Block),
    #[error("target changed earlier in this tick or no longer matches")]
    StateChanged,
    #[error("target already holds {0}")]
    Occupied(Block),
    #[error("player {0} is in the way")]
    Obstructed(PlayerId),
    #[error("hotbar slot {0} does not exist")]
    InvalidSlot(u8),
}

impl ValidationError {
    /// Wire reason code sent back to the client.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::TooFast { .. } => RejectReason::TooFast,
            Self::InvalidMove(_) => RejectReason::InvalidMove,
            Self::OutOfReach { .. } => RejectReason::OutOfReach,
            Self::OutOfBounds(_) => RejectReason::OutOfBounds,
            Self::IllegalBlock(_) => RejectReason::IllegalBlock,
            Self::StateChanged => RejectReason::StateChanged,
            Self::Occupied(_) => RejectReason::Occupied,
            Self::Obstructed(_) => RejectReason::Obstructed,
            Self::InvalidSlot(_) => RejectReason::InvalidSlot,
        }
    }
}

/// Validation limits, derived from [`RulesConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub max_speed: f32,
    pub move_tolerance: f32,
    pub reach_distance: f32,
    pub tick_secs: f32,
    pub hotbar_slots: u8,
    pub enforce_player_collision: bool,
}

impl From<&RulesConfig> for RuleSet {
    fn from(config: &RulesConfig) -> Self {
        Self {
            max_speed: config.max_speed,
            move_tolerance: config.move_tolerance,
            reach_distance: config.reach_distance,
            tick_secs: config.tick_duration().as_secs_f32(),
            hotbar_slots: config.hotbar_slots,
            enforce_player_collision: config.enforce_player_collision,
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::from(&RulesConfig::default())
    }
}

fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

impl RuleSet {
    /// Distance `player` may still cover with moves made at `tick`.
    ///
    /// The budget refills at `max_speed` per elapsed tick and is shared by
    /// every move in the same tick. It holds at most one second of travel plus
    /// `move_tolerance`, and a new player starts with one tick plus the
    /// tolerance.
    pub fn available_move_distance(&self, player: &Player, tick: u64) -> f32 {
        let per_tick = self.max_speed * self.tick_secs;
        let cap = self.max_speed * MAX_CATCH_UP_SECS + self.move_tolerance;
        let refilled = match player.budget_tick {
            Some(last) => player.move_budget + tick.saturating_sub(last) as f32 * per_tick,
            None => per_tick + self.move_tolerance,
        };
        refilled.min(cap)
    }

    /// Checks a move against the speed bound and world limits, returning
    /// the budget left once it is applied.
    pub fn check_move(
        &self,
        world: &WorldStore,
        player: &Player,
        position: [f32; 3],
        orientation: Orientation,
        tick: u64,
    ) -> Result<f32, ValidationError> {
        if !position.iter().all(|v| v.is_finite())
            || !orientation.yaw.is_finite()
            || !orientation.pitch.is_finite()
        {
            return Err(ValidationError::InvalidMove("non-finite value"));
        }
        if orientation.pitch.abs() > 90.0 {
            return Err(ValidationError::InvalidMove("pitch beyond vertical"));
        }
        let limit = world.bounds().horizontal_limit as f32;
        if position[0].abs() >= limit || position[2].abs() >= limit {
            return Err(ValidationError::InvalidMove("outside the world"));
        }

        let moved = distance(player.position, position);
        let allowed = self.available_move_distance(player, tick);
        if moved > allowed {
            return Err(ValidationError::TooFast {
                distance: moved,
                allowed,
            });
        }
        Ok(allowed - moved)
    }

    /// Checks a hotbar selection.
    pub fn check_slot(&self, slot: u8) -> Result<(), ValidationError> {
        if slot >= self.hotbar_slots {
            return Err(ValidationError::InvalidSlot(slot));
        }
        Ok(())
    }

    /// Checks a block intent and returns the block to write.
    ///
    /// `touched` holds every coordinate already changed this tick; a second
    /// intent on one of them loses with `StateChanged`.
    #[allow(clippy::too_many_arguments)]
    pub fn check_block(
        &self,
        world: &mut WorldStore,
        registry: &PlayerRegistry,
        touched: &FxHashSet<BlockPos>,
        player: &Player,
        pos: BlockPos,
        action: BlockAction,
        block: Block,
    ) -> Result<Block, ValidationError> {
        if !world.bounds().contains(pos) {
            return Err(ValidationError::OutOfBounds(pos));
        }

        let eye = [
            player.position[0],
            player.position[1] + EYE_HEIGHT,
            player.position[2],
        ];
        let reach = distance(eye, pos.center());
        if reach > self.reach_distance {
            return Err(ValidationError::OutOfReach {
                distance: reach,
                reach: self.reach_distance,
            });
        }

        if touched.contains(&pos) {
            return Err(ValidationError::StateChanged);
        }

        let current = world.get_block(pos);
        match action {
            BlockAction::Place => {
                if !block.is_placeable() {
                    return Err(ValidationError::IllegalBlock(block));
                }
                if !current.is_air() {
                    return Err(ValidationError::Occupied(current));
                }
                if self.enforce_player_collision
                    && let Some(other) = registry.iter().find(|p| overlaps_player(p.position, pos))
                {
                    return Err(ValidationError::Obstructed(other.id));
                }
                Ok(block)
            }
            BlockAction::Break => {
                if !block.is_air() && block != current {
                    return Err(ValidationError::StateChanged);
                }
                if !current.is_breakable() {
                    return Err(ValidationError::IllegalBlock(current));
                }
                Ok(Block::Air)
            }
        }
    }
}

/// Whether the unit cell at `pos` intersects a player standing at `feet`.
pub fn overlaps_player(feet: [f32; 3], pos: BlockPos) -> bool {
    let half = PLAYER_WIDTH / 2.0;
    let (x, y, z) = (pos.x as f32, pos.y as f32, pos.z as f32);
    feet[0] + half > x
        && feet[0] - half < x + 1.0
        && feet[1] + PLAYER_HEIGHT > y
        && feet[1] < y + 1.0
        && feet[2] + half > z
        && feet[2] - half < z + 1.0
}
