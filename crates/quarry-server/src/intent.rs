//! Client intents as queued by connection readers, and the per-tick merge
//! that fixes their processing order.

use quarry_protocol::{BlockAction, Orientation, Packet, PlayerId};
use quarry_world::{Block, BlockPos};

/// The request itself, stripped of wire details.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentKind {
    Move {
        position: [f32; 3],
        orientation: Orientation,
    },
    Block {
        pos: BlockPos,
        action: BlockAction,
        block: Block,
    },
    SelectSlot {
        slot: u8,
    },
}

/// An intent waiting in a session queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedIntent {
    /// Server-wide arrival stamp assigned when the packet was decoded.
    pub arrival: u64,
    /// Client sequence number.
    pub seq: u32,
    pub kind: IntentKind,
}

impl QueuedIntent {
    /// Converts an intent packet; `None` for every other packet kind.
    pub fn from_packet(packet: Packet, arrival: u64) -> Option<Self> {
        let (seq, kind) = match packet {
            Packet::MoveIntent {
                seq,
                position,
                orientation,
            } => (seq, IntentKind::Move {
                position,
                orientation,
            }),
            Packet::BlockIntent {
                seq,
                pos,
                action,
                block,
            } => (seq, IntentKind::Block { pos, action, block }),
            Packet::SelectSlotIntent { seq, slot } => (seq, IntentKind::SelectSlot { slot }),
            _ => return None,
        };
        Some(Self { arrival, seq, kind })
    }
}

/// Orders one tick's intents for processing.
///
/// Each player's batch is sorted by sequence number; batches are then merged
/// by always taking the pending head with the smallest arrival stamp. A
/// player's intents therefore run in sequence order, and intents from
/// different players run in the order the server received them.
pub fn merge_by_arrival(
    batches: Vec<(PlayerId, Vec<QueuedIntent>)>,
) -> Vec<(PlayerId, QueuedIntent)> {
    let total = batches.iter().map(|(_, b)| b.len()).sum();
    let mut queues: Vec<(PlayerId, std::vec::IntoIter<QueuedIntent>)> = batches
        .into_iter()
        .map(|(id, mut batch)| {
            batch.sort_by_key(|intent| (intent.seq, intent.arrival));
            (id, batch.into_iter())
        })
        .collect();
    let mut heads: Vec<Option<QueuedIntent>> =
        queues.iter_mut().map(|(_, queue)| queue.next()).collect();

    let mut ordered = Vec::with_capacity(total);
    loop {
        let next = heads
            .iter()
            .enumerate()
            .filter_map(|(i, head)| head.as_ref().map(|intent| (intent.arrival, i)))
            .min();
        let Some((_, i)) = next else { break };
        let Some(intent) = heads[i].take() else { break };
        heads[i] = queues[i].1.next();
        ordered.push((queues[i].0, intent));
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(arrival: u64, seq: u32) -> QueuedIntent {
        QueuedIntent {
            arrival,
            seq,
            kind: IntentKind::SelectSlot { slot: 0 },
        }
    }

    fn order(merged: &[(PlayerId, QueuedIntent)]) -> Vec<(PlayerId, u32)> {
        merged.iter().map(|(id, i)| (*id, i.seq)).collect()
    }

    #[test]
    fn test_merge_interleaves_by_arrival() {
        let merged = merge_by_arrival(vec![
            (1, vec![slot(10, 1), slot(30, 2)]),
            (2, vec![slot(20, 1), slot(40, 2)]),
        ]);
        assert_eq!(order(&merged), vec![(1, 1), (2, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn test_merge_respects_sequence_within_player() {
        // Player 1's seq 2 arrived before its seq 1 was stamped.
        let merged = merge_by_arrival(vec![(1, vec![slot(50, 2), slot(5, 1)]), (2, vec![slot(7, 1)])]);
        assert_eq!(order(&merged), vec![(1, 1), (2, 1), (1, 2)]);
    }

    #[test]
    fn test_merge_is_independent_of_batch_order() {
        let a = (1, vec![slot(3, 1), slot(9, 2)]);
        let b = (2, vec![slot(1, 1), slot(4, 2)]);
        let c = (3, vec![slot(2, 1)]);
        let forward = merge_by_arrival(vec![a.clone(), b.clone(), c.clone()]);
        let backward = merge_by_arrival(vec![c, b, a]);
        assert_eq!(order(&forward), order(&backward));
        assert_eq!(order(&forward), vec![(2, 1), (3, 1), (1, 1), (2, 2), (1, 2)]);
    }

    #[test]
    fn test_from_packet_ignores_non_intents() {
        assert!(QueuedIntent::from_packet(Packet::KeepAlive, 1).is_none());
        let intent = QueuedIntent::from_packet(Packet::SelectSlotIntent { seq: 4, slot: 2 }, 9);
        assert_eq!(
            intent,
            Some(QueuedIntent {
                arrival: 9,
                seq: 4,
                kind: IntentKind::SelectSlot { slot: 2 }
            })
        );
    }
}
