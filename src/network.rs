//! Gossip-boundary contracts.
//!
//! The peer-to-peer transport itself is an external collaborator; this
//! module fixes what crosses the boundary: the closed message union, the
//! block-source capability set the transport reads from, and the publish
//! port the producer pushes freshly committed blocks into.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::consensus::dag::Block;
use crate::storage::{BlockStore, StoreError};

/// The closed set of gossip messages. Each variant carries a fixed payload
/// schema; transports frame these as tagged JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Announce a freshly committed block by header summary.
    BlockAnnounce {
        hash: String,
        height: i64,
        parents: Vec<String>,
        blue_score: i64,
        timestamp: i64,
        producer_id: String,
    },
    /// Request one block by hash.
    BlockRequest { hash: String },
    /// Response carrying the requested block, if held.
    BlockResponse { block: Option<Box<Block>> },
    /// Request a height range of blocks.
    GetBlocks { from_height: i64, limit: u32 },
    /// Peer status exchange.
    PeerInfo {
        finalized_height: i64,
        node_id: String,
        version: String,
    },
    /// Liveness probe.
    Ping { nonce: u64 },
    /// Liveness reply.
    Pong { nonce: u64 },
}

impl Message {
    /// Build the announcement for a committed block.
    pub fn announce(block: &Block) -> Self {
        Message::BlockAnnounce {
            hash: block.hash.clone(),
            height: block.height,
            parents: block.parents.clone(),
            blue_score: block.blue_score,
            timestamp: block.timestamp,
            producer_id: block.producer_id.clone(),
        }
    }
}

/// The capability set a gossip adapter needs from block persistence.
/// Any implementation satisfying these four operations is acceptable.
pub trait BlockSource: Send + Sync {
    fn get_block(&self, hash: &str) -> Result<Option<Block>, StoreError>;
    fn store_block(&self, block: &Block) -> Result<(), StoreError>;
    fn finalized_height(&self) -> i64;
    fn load_blocks(&self) -> Result<Vec<Block>, StoreError>;
}

impl BlockSource for BlockStore {
    fn get_block(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        match self.get(hash) {
            Ok(block) => Ok(Some(block)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store_block(&self, block: &Block) -> Result<(), StoreError> {
        self.store(block)
    }

    fn finalized_height(&self) -> i64 {
        BlockStore::finalized_height(self)
    }

    fn load_blocks(&self) -> Result<Vec<Block>, StoreError> {
        self.load()
    }
}

/// Outbound publish port. The producer hands every committed block to this
/// port; the transport fans it out to peers.
pub trait GossipPort: Send + Sync {
    fn publish_block(&self, block: &Block);
}

/// Channel-backed gossip port: committed blocks become [`Message`]s on an
/// unbounded channel the transport drains.
pub struct ChannelGossip {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelGossip {
    /// Create the port and the receiving half for the transport.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelGossip { sender }, receiver)
    }
}

impl GossipPort for ChannelGossip {
    fn publish_block(&self, block: &Block) {
        // A dropped receiver just means no transport is attached.
        let _ = self.sender.send(Message::announce(block));
    }
}

/// Gossip sink that drops everything. For tests and transport-less nodes.
#[derive(Default)]
pub struct NullGossip;

impl GossipPort for NullGossip {
    fn publish_block(&self, _block: &Block) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(hash: &str, height: i64) -> Block {
        Block {
            hash: hash.into(),
            parents: vec!["genesis".into()],
            height,
            blue_score: height,
            blue_work: height,
            selected_parent: "genesis".into(),
            timestamp: 1_700_000_000,
            signature: String::new(),
            transactions: vec![],
            producer_id: "validator_1".into(),
            producer_pubkey_hash: "aa".into(),
        }
    }

    #[test]
    fn message_json_tagging() {
        let msg = Message::announce(&block("abc", 3));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"block_announce\""));

        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::BlockAnnounce { hash, height, .. } => {
                assert_eq!(hash, "abc");
                assert_eq!(height, 3);
            }
            other => panic!("expected BlockAnnounce, got {other:?}"),
        }
    }

    #[test]
    fn ping_pong_roundtrip() {
        let json = serde_json::to_string(&Message::Ping { nonce: 9 }).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Message::Ping { nonce: 9 }));
    }

    #[test]
    fn channel_gossip_delivers_announcements() {
        let (port, mut rx) = ChannelGossip::channel();
        port.publish_block(&block("abc", 1));
        match rx.try_recv().unwrap() {
            Message::BlockAnnounce { hash, .. } => assert_eq!(hash, "abc"),
            other => panic!("expected BlockAnnounce, got {other:?}"),
        }
    }

    #[test]
    fn block_source_over_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let source: &dyn BlockSource = &store;

        assert!(source.get_block("abc").unwrap().is_none());
        source.store_block(&block("abc", 2)).unwrap();
        assert_eq!(source.get_block("abc").unwrap().unwrap().height, 2);
        assert_eq!(source.finalized_height(), 2);
        assert_eq!(source.load_blocks().unwrap().len(), 1);
    }
}
