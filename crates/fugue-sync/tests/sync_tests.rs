//! End-to-end synchronization over the in-process network

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_crypto::random_private_key;
use fugue_network::{
    AppProtocolVersion, ConsensusPayload, ExplorerConfig, Inbox, MemoryNetwork, MemoryTransport,
    Message, MessageEnvelope, MessageHandler, MessageValidator, NetworkResult, PeerExplorer,
    RoutingTable, Transport, ValidatorConfig,
};
use fugue_primitives::Address;
use fugue_sync::{SyncConfig, SyncEvent, SyncHandler, Synchronizer};
use fugue_types::{
    Block, BlockCommit, Blockchain, ContentPool, Evidence, MemoryChain, MemoryPool, Transaction,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Records inbound message kinds before handing them on
struct Recording {
    seen: Arc<Mutex<Vec<&'static str>>>,
    inner: Arc<SyncHandler>,
}

#[async_trait]
impl MessageHandler for Recording {
    async fn handle(&self, envelope: MessageEnvelope) -> NetworkResult<Vec<Message>> {
        self.seen.lock().push(envelope.message.kind());
        self.inner.handle(envelope).await
    }
}

struct Node {
    transport: Arc<MemoryTransport>,
    sync: Arc<Synchronizer>,
    chain: Arc<MemoryChain>,
    transactions: Arc<MemoryPool<Transaction>>,
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl Node {
    fn knows(&self, other: &Node) {
        self.sync.explorer().add_peer(other.transport.local_peer());
    }

    fn saw(&self, kind: &str) -> bool {
        self.seen.lock().contains(&kind)
    }
}

fn blocks(n: u64) -> Vec<Block> {
    let proposer = Address::from_bytes([0xaa; 20]);
    let mut blocks = vec![Block::genesis(proposer, 0)];
    for i in 1..=n {
        let next = Block::next(&blocks[blocks.len() - 1], proposer, i * 1000, vec![], vec![]);
        blocks.push(next);
    }
    blocks
}

fn sync_config() -> SyncConfig {
    SyncConfig {
        fetch_timeout: Duration::from_secs(1),
        ..SyncConfig::default()
    }
}

fn node(
    network: &MemoryNetwork,
    protocol: &AppProtocolVersion,
    chain_blocks: &[Block],
    config: SyncConfig,
) -> Node {
    let chain = Arc::new(MemoryChain::new(chain_blocks[0].clone()));
    for block in &chain_blocks[1..] {
        chain
            .append(block.clone(), BlockCommit::for_block(block))
            .unwrap();
    }
    let transactions: Arc<MemoryPool<Transaction>> = Arc::new(MemoryPool::new());
    let evidence: Arc<MemoryPool<Evidence>> = Arc::new(MemoryPool::new());

    let transport = network.join(random_private_key(), protocol.clone());
    let table = Arc::new(RoutingTable::with_defaults(transport.local_peer().address));
    let explorer_config = ExplorerConfig {
        ping_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(500),
        ..ExplorerConfig::default()
    };
    let explorer = Arc::new(PeerExplorer::new(table, transport.clone(), explorer_config));
    let sync = Synchronizer::new(
        chain.clone(),
        transactions.clone(),
        evidence,
        explorer,
        config,
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let validator = Arc::new(MessageValidator::new(protocol.clone(), ValidatorConfig::default()));
    let handler = Arc::new(Recording {
        seen: seen.clone(),
        inner: sync.handler(),
    });
    transport.attach(Inbox::new(validator, handler));

    Node {
        transport,
        sync,
        chain,
        transactions,
        seen,
    }
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn protocol() -> AppProtocolVersion {
    AppProtocolVersion::sign(&random_private_key(), 1, vec![]).unwrap()
}

// ==================== Blocks ====================

#[tokio::test]
async fn test_catch_up_appends_in_order_and_skips_source() {
    let network = MemoryNetwork::new();
    let protocol = protocol();
    let remote_blocks = blocks(3);

    let b = node(&network, &protocol, &remote_blocks[..1], sync_config());
    let c = node(&network, &protocol, &remote_blocks, sync_config());
    let d = node(&network, &protocol, &remote_blocks[..1], sync_config());
    b.knows(&c);
    b.knows(&d);
    c.knows(&b);

    let appended = Arc::new(Mutex::new(Vec::new()));
    let sink = appended.clone();
    let _sub = b.sync.block_sync().on_event(move |e| {
        if let SyncEvent::BranchAppended { appended, tip, .. } = e {
            sink.lock().push((*appended, tip.height));
        }
    });

    c.sync.block_sync().broadcast_tip(None);
    assert!(eventually(|| b.sync.block_sync().demands().len() == 1).await);

    let count = b.sync.block_sync().sync_once(&CancellationToken::new()).await;
    assert_eq!(count, 3);
    assert_eq!(b.chain.tip(), remote_blocks[3].summary());
    for height in 1..=3 {
        assert_eq!(b.chain.block_hash_at(height), Some(remote_blocks[height as usize].hash()));
    }
    assert_eq!(*appended.lock(), vec![(3, 3)]);

    assert!(eventually(|| d.saw("block_summary")).await);
    assert!(eventually(|| d.sync.block_sync().demands().len() == 1).await);
    assert!(!c.saw("block_summary"));
    assert!(c.saw("get_block_hashes"));
    assert!(c.saw("block_request"));
}

#[tokio::test]
async fn test_stale_demand_not_resolved() {
    let network = MemoryNetwork::new();
    let protocol = protocol();
    let remote_blocks = blocks(2);
    let config = SyncConfig {
        block_demand_lifespan: Duration::from_millis(50),
        ..sync_config()
    };

    let b = node(&network, &protocol, &remote_blocks[..1], config);
    let c = node(&network, &protocol, &remote_blocks, sync_config());
    b.knows(&c);

    assert!(b
        .sync
        .block_sync()
        .demand(c.transport.local_peer(), remote_blocks[2].summary()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let count = b.sync.block_sync().sync_once(&CancellationToken::new()).await;
    assert_eq!(count, 0);
    assert_eq!(b.chain.tip().height, 0);
    assert!(!c.saw("get_block_hashes"));
}

#[tokio::test]
async fn test_foreign_chain_tip_ignored() {
    let network = MemoryNetwork::new();
    let protocol = protocol();
    let ours = blocks(0);
    let theirs = {
        let proposer = Address::from_bytes([0xbb; 20]);
        let genesis = Block::genesis(proposer, 7);
        let next = Block::next(&genesis, proposer, 1000, vec![], vec![]);
        vec![genesis, next]
    };

    let b = node(&network, &protocol, &ours, sync_config());
    let c = node(&network, &protocol, &theirs, sync_config());
    c.knows(&b);

    c.sync.block_sync().broadcast_tip(None);
    assert!(eventually(|| b.saw("block_summary")).await);
    assert!(b.sync.block_sync().demands().is_empty());
}

// ==================== Transactions ====================

#[tokio::test]
async fn test_transaction_propagates_through_advertisement() {
    let network = MemoryNetwork::new();
    let protocol = protocol();
    let genesis = blocks(0);

    let a = node(&network, &protocol, &genesis, sync_config());
    let b = node(&network, &protocol, &genesis, sync_config());
    let c = node(&network, &protocol, &genesis, sync_config());
    a.knows(&b);
    b.knows(&a);
    b.knows(&c);

    let tx = Transaction::signed(&random_private_key(), 0, 1, vec![42]).unwrap();
    assert!(a.transactions.try_add(tx.clone()));
    assert_eq!(a.sync.tx_broadcaster().flush().len(), 1);

    assert!(eventually(|| b.sync.tx_sync().demands().len() == 1).await);
    let fetched = b.sync.tx_sync().sync_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(fetched, 1);
    assert!(b.transactions.contains(&tx.id()));
    assert_eq!(b.sync.metrics().snapshot().items_fetched, 1);

    // Re-advertised to everyone but the source
    assert!(eventually(|| c.saw("tx_ids")).await);
    assert_eq!(a.seen.lock().iter().filter(|k| **k == "tx_ids").count(), 0);
    assert_eq!(b.sync.tx_broadcaster().pending_len(), 0);
}

// ==================== Consensus gossip ====================

#[tokio::test]
async fn test_consensus_payload_pulled_and_delivered() {
    let network = MemoryNetwork::new();
    let protocol = protocol();
    let genesis = blocks(0);

    let a = node(&network, &protocol, &genesis, sync_config());
    let b = node(&network, &protocol, &genesis, sync_config());
    a.knows(&b);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let _sub = b.sync.gossip().on_message(move |p| sink.lock().push(p.clone()));

    let payload = ConsensusPayload {
        height: 1,
        round: 0,
        sender: a.transport.local_peer().address,
        data: vec![1, 2, 3],
    };
    assert!(a.sync.gossip().publish(payload.clone()));
    a.sync.gossip().broadcaster().flush();

    assert!(eventually(|| b.sync.gossip().sync().demands().len() == 1).await);
    b.sync
        .gossip()
        .sync()
        .sync_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(*delivered.lock(), vec![payload]);
}
