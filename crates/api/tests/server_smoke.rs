use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tempfile::NamedTempFile;
use tipjar_api::server::{build_app, ApiRuntimeConfig};
use tipjar_core::abi::ITipJar;
use tipjar_core::{Address, B256, U256, WEI_PER_ETHER};
use tipjar_indexer::config::SyncConfig;
use tipjar_indexer::listener::{decode_logs, ChainSource, LocalChainSource, SyncEngine, SyncStep};
use tipjar_indexer::storage::{BlockRecord, IngestBatch, Storage};
use tipjar_ledger::{Chain, ChainConfig, LedgerConfig};
use tower::ServiceExt;

use alloy_sol_types::SolCall;

const FEE_RECIPIENT: Address = Address::new([0xfe; 20]);
const ALICE: Address = Address::new([0xa1; 20]);
const BOB: Address = Address::new([0xb0; 20]);

fn ether_fraction(denominator: u64, numerator: u64) -> U256 {
    WEI_PER_ETHER * U256::from(numerator) / U256::from(denominator)
}

struct Harness {
    source: LocalChainSource,
    storage: Storage,
    engine: SyncEngine<LocalChainSource>,
    app: Router,
    _temp_db: NamedTempFile,
}

async fn harness() -> Harness {
    let mut chain =
        Chain::new(ChainConfig::default(), FEE_RECIPIENT, LedgerConfig::default()).unwrap();
    chain.fund(ALICE, WEI_PER_ETHER).unwrap();
    let source = LocalChainSource::new(chain);

    let temp_db = NamedTempFile::new().unwrap();
    let storage = Storage::new_with_path(temp_db.path(), None, None)
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();

    let config = SyncConfig {
        confirmations: 0,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(source.clone(), storage.clone(), config, 84_532);
    engine.prepare().await.unwrap();

    let url = format!("sqlite://{}", temp_db.path().display());
    let app = build_app(&ApiRuntimeConfig::for_test(url)).await.unwrap();

    Harness {
        source,
        storage,
        engine,
        app,
        _temp_db: temp_db,
    }
}

impl Harness {
    async fn sync(&self) {
        loop {
            if let SyncStep::CaughtUp { .. } = self.engine.sync_once().await.unwrap() {
                return;
            }
        }
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = self
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }
}

#[tokio::test]
async fn smoke_tip_is_split_indexed_and_served() {
    let h = harness().await;
    let centi = ether_fraction(100, 1);

    let receipt = h
        .source
        .chain()
        .write()
        .await
        .tip(ALICE, BOB, centi)
        .unwrap();

    {
        let chain = h.source.chain().read().await;
        // 0.0098 ETH to the creator, 0.0002 ETH to the protocol
        assert_eq!(chain.balance(&BOB), ether_fraction(10_000, 98));
        assert_eq!(chain.balance(&FEE_RECIPIENT), ether_fraction(10_000, 2));
    }

    h.sync().await;

    let uri = format!("/tips/history?recipient={}&limit=20", BOB);
    let (status, json) = h.get_json(&uri).await;
    assert_eq!(status, StatusCode::OK);

    let tips = json["tips"].as_array().unwrap();
    assert_eq!(tips.len(), 1);
    assert_eq!(tips[0]["sender"], ALICE.to_string());
    assert_eq!(tips[0]["recipient"], BOB.to_string());
    assert_eq!(tips[0]["amount"], centi.to_string());
    assert_eq!(tips[0]["fee"], ether_fraction(10_000, 2).to_string());
    assert_eq!(tips[0]["netAmount"], ether_fraction(10_000, 98).to_string());
    assert_eq!(tips[0]["txHash"], receipt.tx_hash.to_string());
    assert_eq!(tips[0]["blockNumber"], receipt.block_number);

    // The API mirrors the ledger's own view of the creator
    let raw = h
        .source
        .chain()
        .read()
        .await
        .call(&ITipJar::getCreatorStatsCall { creator: BOB }.abi_encode())
        .unwrap();
    let ledger = ITipJar::getCreatorStatsCall::abi_decode_returns(&raw, true).unwrap();

    let (status, json) = h.get_json(&format!("/creators/{}/stats", BOB)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["totalTips"], ledger.totalTips.to_string());
    assert_eq!(json["tipCount"], ledger.tipCount.to::<u64>());
    assert_eq!(json["indexedThroughBlock"], receipt.block_number);
}

#[tokio::test]
async fn smoke_history_is_newest_first_with_messages() {
    let h = harness().await;

    {
        let mut chain = h.source.chain().write().await;
        chain.tip(ALICE, BOB, ether_fraction(1_000, 1)).unwrap();
        chain
            .tip_with_message(ALICE, BOB, "great stream", ether_fraction(1_000, 2))
            .unwrap();
        chain.tip(ALICE, BOB, ether_fraction(1_000, 3)).unwrap();
    }

    h.sync().await;

    let (_, json) = h
        .get_json(&format!("/tips/history?recipient={}", BOB))
        .await;
    let tips = json["tips"].as_array().unwrap();
    let amounts: Vec<String> = tips
        .iter()
        .map(|t| t["amount"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        amounts,
        vec![
            ether_fraction(1_000, 3).to_string(),
            ether_fraction(1_000, 2).to_string(),
            ether_fraction(1_000, 1).to_string(),
        ]
    );
    assert_eq!(tips[1]["message"], "great stream");
    assert!(tips[0].get("message").is_none());

    let (_, json) = h.get_json(&format!("/creators/{}/stats", BOB)).await;
    assert_eq!(json["tipCount"], 3);
    assert_eq!(json["totalTips"], ether_fraction(1_000, 6).to_string());
}

#[tokio::test]
async fn smoke_redelivered_events_are_stored_once() {
    let h = harness().await;
    h.source
        .chain()
        .write()
        .await
        .tip(ALICE, BOB, ether_fraction(100, 1))
        .unwrap();
    h.sync().await;

    // Deliver the same logs again
    let logs = h.source.tip_logs(1, 1).await.unwrap();
    let header = h.source.block_header(1).await.unwrap().unwrap();
    let decoded = decode_logs(&logs);
    let batch = IngestBatch {
        tips: decoded.tips,
        pending_messages: decoded.pending_messages,
        rejected: decoded.rejected,
        checkpoint: BlockRecord {
            block_number: header.number,
            block_hash: header.hash,
            parent_hash: header.parent_hash,
            timestamp: header.timestamp,
            event_count: logs.len() as u64,
            indexed_at: 0,
        },
    };
    let summary = h.storage.ingest_batch(&batch, 16).await.unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.duplicates, 1);

    let (_, json) = h
        .get_json(&format!("/tips/history?recipient={}", BOB))
        .await;
    assert_eq!(json["tips"].as_array().unwrap().len(), 1);

    let (_, json) = h.get_json(&format!("/creators/{}/stats", BOB)).await;
    assert_eq!(json["tipCount"], 1);

    let state = h.storage.get_sync_state().await.unwrap();
    assert_eq!(state.last_block_number, 1);
    assert_ne!(state.last_block_hash, B256::ZERO);
}
