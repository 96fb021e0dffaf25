//! Authoritative per-player state.
//!
//! The registry enforces structural integrity only (ids exist, ids are never
//! reused). Game rules live in [`crate::rules`]; every mutating call here is
//! made by the tick loop after validation.

use std::collections::BTreeMap;

use quarry_protocol::{Orientation, PlayerId};

/// One connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Opaque skin blob supplied at handshake.
    pub skin: Option<Vec<u8>>,
    /// Feet position in blocks.
    pub position: [f32; 3],
    pub orientation: Orientation,
    /// Hotbar slot in `0..hotbar_slots`.
    pub selected_slot: u8,
    /// Highest intent sequence number processed so far; clients start at 1.
    pub last_seq: u32,
    /// Distance still available to moves, as of `budget_tick`.
    pub move_budget: f32,
    /// Tick of the last accepted move, `None` until the first one.
    pub budget_tick: Option<u64>,
}

/// Returned when an operation names a player that is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("player {0} not found")]
    NotFound(PlayerId),
}

/// All registered players, ordered by id.
#[derive(Debug)]
pub struct PlayerRegistry {
    players: BTreeMap<PlayerId, Player>,
    next_id: PlayerId,
    spawn: [f32; 3],
}

impl PlayerRegistry {
    /// Creates an empty registry placing new players at `spawn`.
    pub fn new(spawn: [f32; 3]) -> Self {
        Self {
            players: BTreeMap::new(),
            next_id: 1,
            spawn,
        }
    }

    pub fn spawn_position(&self) -> [f32; 3] {
        self.spawn
    }

    /// Adds a player at the spawn point and returns it.
    pub fn register(&mut self, name: impl Into<String>, skin: Option<Vec<u8>>) -> &Player {
        let id = self.next_id;
        self.next_id += 1;
        let player = Player {
            id,
            name: name.into(),
            skin,
            position: self.spawn,
            orientation: Orientation::default(),
            selected_slot: 0,
            last_seq: 0,
            move_budget: 0.0,
            budget_tick: None,
        };
        self.players.entry(id).or_insert(player)
    }

    /// Removes a player and returns its final state.
    pub fn unregister(&mut self, id: PlayerId) -> Result<Player, RegistryError> {
        self.players.remove(&id).ok_or(RegistryError::NotFound(id))
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    fn get_mut(&mut self, id: PlayerId) -> Result<&mut Player, RegistryError> {
        self.players.get_mut(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Stores an already-validated move made during `tick`, leaving
    /// `remaining` of the movement budget.
    pub fn apply_validated_move(
        &mut self,
        id: PlayerId,
        position: [f32; 3],
        orientation: Orientation,
        tick: u64,
        remaining: f32,
    ) -> Result<(), RegistryError> {
        let player = self.get_mut(id)?;
        player.position = position;
        player.orientation = orientation;
        player.move_budget = remaining.max(0.0);
        player.budget_tick = Some(tick);
        Ok(())
    }

    /// Stores an already-validated hotbar selection.
    pub fn apply_validated_slot(&mut self, id: PlayerId, slot: u8) -> Result<(), RegistryError> {
        self.get_mut(id)?.selected_slot = slot;
        Ok(())
    }

    /// Marks `seq` as processed. The stored value never decreases.
    pub fn record_sequence(&mut self, id: PlayerId, seq: u32) -> Result<(), RegistryError> {
        let player = self.get_mut(id)?;
        player.last_seq = player.last_seq.max(seq);
        Ok(())
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Players in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAWN: [f32; 3] = [8.5, 65.0, 8.5];

    #[test]
    fn test_register_assigns_increasing_ids_at_spawn() {
        let mut registry = PlayerRegistry::new(SPAWN);
        let a = registry.register("alice", None).id;
        let b = registry.register("bob", Some(vec![1, 2])).id;
        assert_eq!((a, b), (1, 2));
        assert_eq!(registry.get(b).map(|p| p.position), Some(SPAWN));
        assert_eq!(registry.get(b).and_then(|p| p.skin.clone()), Some(vec![1, 2]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut registry = PlayerRegistry::new(SPAWN);
        let a = registry.register("alice", None).id;
        registry.unregister(a).unwrap();
        assert!(!registry.contains(a));
        let b = registry.register("alice", None).id;
        assert_ne!(a, b);
        assert!(registry.contains(b));
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let mut registry = PlayerRegistry::new(SPAWN);
        assert_eq!(registry.unregister(9), Err(RegistryError::NotFound(9)));
        assert_eq!(
            registry.apply_validated_move(9, SPAWN, Orientation::default(), 1, 0.0),
            Err(RegistryError::NotFound(9))
        );
        assert_eq!(
            registry.apply_validated_slot(9, 1),
            Err(RegistryError::NotFound(9))
        );
        assert_eq!(registry.record_sequence(9, 1), Err(RegistryError::NotFound(9)));
    }

    #[test]
    fn test_apply_move_updates_state() {
        let mut registry = PlayerRegistry::new(SPAWN);
        let id = registry.register("alice", None).id;
        let look = Orientation::new(90.0, 10.0);
        registry
            .apply_validated_move(id, [9.0, 65.0, 8.5], look, 12, 0.25)
            .unwrap();
        let player = registry.get(id).unwrap();
        assert_eq!(player.position, [9.0, 65.0, 8.5]);
        assert_eq!(player.orientation, look);
        assert_eq!(player.budget_tick, Some(12));
        assert_eq!(player.move_budget, 0.25);
    }

    #[test]
    fn test_sequence_never_decreases() {
        let mut registry = PlayerRegistry::new(SPAWN);
        let id = registry.register("alice", None).id;
        registry.record_sequence(id, 5).unwrap();
        registry.record_sequence(id, 3).unwrap();
        assert_eq!(registry.get(id).map(|p| p.last_seq), Some(5));
    }

    #[test]
    fn test_iter_is_ordered_by_id() {
        let mut registry = PlayerRegistry::new(SPAWN);
        for name in ["c", "a", "b"] {
            registry.register(name, None);
        }
        let ids: Vec<_> = registry.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
