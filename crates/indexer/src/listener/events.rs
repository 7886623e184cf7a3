//! Decoding of TipJar logs and pairing of messages with tips.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use tipjar_core::abi::ITipJar::{TipMessage, TipSent};
use tipjar_core::calculate_fee;

use crate::storage::{BlockCoordinates, PendingMessage, RejectedLogRecord, TipRecord};

/// Position of a log in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCoordinates {
    /// Block number
    pub block_number: u64,

    /// Block hash
    pub block_hash: B256,

    /// Transaction hash
    pub tx_hash: B256,

    /// Transaction index within the block
    pub tx_index: u64,

    /// Log index within the block
    pub log_index: u64,
}

impl LogCoordinates {
    /// Extract coordinates from an RPC log. Pending logs have none.
    pub fn from_log(log: &Log) -> Result<Self> {
        Ok(Self {
            block_number: log.block_number.context("Log missing block_number")?,
            block_hash: log.block_hash.context("Log missing block_hash")?,
            tx_hash: log
                .transaction_hash
                .context("Log missing transaction_hash")?,
            tx_index: log
                .transaction_index
                .context("Log missing transaction_index")?,
            log_index: log.log_index.context("Log missing log_index")?,
        })
    }

    /// Chain order of the log.
    pub fn order(&self) -> BlockCoordinates {
        BlockCoordinates::new(self.block_number, self.tx_index, self.log_index)
    }
}

/// Parsed `TipSent` event with block coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipSentEvent {
    /// Tipper
    pub sender: Address,

    /// Tipped creator
    pub recipient: Address,

    /// Gross amount
    pub amount: U256,

    /// Protocol fee
    pub fee: U256,

    /// Amount forwarded to the recipient
    pub net_amount: U256,

    /// Block time at inclusion
    pub timestamp: u64,

    /// Where the log was emitted
    pub coordinates: LogCoordinates,
}

impl TipSentEvent {
    /// Convert into a storage record, optionally carrying a paired message.
    pub fn into_record(self, message: Option<String>) -> TipRecord {
        TipRecord {
            tx_hash: self.coordinates.tx_hash,
            log_index: self.coordinates.log_index,
            block_number: self.coordinates.block_number,
            block_hash: self.coordinates.block_hash,
            tx_index: self.coordinates.tx_index,
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            fee: self.fee,
            net_amount: self.net_amount,
            message,
            timestamp: self.timestamp,
        }
    }
}

/// Parsed `TipMessage` event with block coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipMessageEvent {
    /// Tipper
    pub sender: Address,

    /// Tipped creator
    pub recipient: Address,

    /// Message text
    pub message: String,

    /// Where the log was emitted
    pub coordinates: LogCoordinates,
}

impl TipMessageEvent {
    fn into_pending(self) -> PendingMessage {
        PendingMessage {
            tx_hash: self.coordinates.tx_hash,
            log_index: self.coordinates.log_index,
            block_number: self.coordinates.block_number,
            sender: self.sender,
            recipient: self.recipient,
            message: self.message,
        }
    }
}

/// A decoded TipJar log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TipJarEvent {
    /// `TipSent`
    Sent(TipSentEvent),
    /// `TipMessage`
    Message(TipMessageEvent),
}

impl TipJarEvent {
    /// Decode a TipJar log.
    ///
    /// Fails on unknown signatures, malformed data, and `TipSent` amounts that
    /// do not satisfy the fee rule.
    pub fn from_log(log: &Log) -> Result<Self> {
        let coordinates = LogCoordinates::from_log(log)?;
        let topic0 = log
            .inner
            .data
            .topics()
            .first()
            .context("Log has no topics")?;

        if *topic0 == TipSent::SIGNATURE_HASH {
            let event =
                TipSent::decode_log(&log.inner, true).context("Failed to decode TipSent event")?;

            let split = calculate_fee(event.amount);
            if event.fee != split.fee || event.netAmount != split.net_amount {
                anyhow::bail!(
                    "TipSent amounts inconsistent: amount={} fee={} netAmount={}",
                    event.amount,
                    event.fee,
                    event.netAmount
                );
            }

            let timestamp = u64::try_from(event.timestamp)
                .map_err(|_| anyhow::anyhow!("TipSent timestamp out of range"))?;

            Ok(Self::Sent(TipSentEvent {
                sender: event.sender,
                recipient: event.recipient,
                amount: event.amount,
                fee: event.fee,
                net_amount: event.netAmount,
                timestamp,
                coordinates,
            }))
        } else if *topic0 == TipMessage::SIGNATURE_HASH {
            let event = TipMessage::decode_log(&log.inner, true)
                .context("Failed to decode TipMessage event")?;

            Ok(Self::Message(TipMessageEvent {
                sender: event.sender,
                recipient: event.recipient,
                message: event.message.clone(),
                coordinates,
            }))
        } else {
            anyhow::bail!("Unknown event signature {}", topic0)
        }
    }
}

/// Result of decoding and pairing the logs of one block range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedLogs {
    /// Tips in `(block_number, log_index)` order, messages attached
    pub tips: Vec<TipRecord>,

    /// Messages with no `TipSent` in this range
    pub pending_messages: Vec<PendingMessage>,

    /// Logs that failed to decode
    pub rejected: Vec<RejectedLogRecord>,

    /// Logs dropped because they carry no coordinates to key a rejection by
    pub unkeyed: u64,
}

/// Decode `logs` and pair each `TipMessage` with the latest preceding unmatched
/// `TipSent` of the same transaction with the same sender and recipient.
pub fn decode_logs(logs: &[Log]) -> DecodedLogs {
    let mut sorted: Vec<&Log> = logs.iter().collect();
    // Logs without coordinates sort first and end up unkeyed.
    sorted.sort_by_cached_key(|log| LogCoordinates::from_log(log).ok().map(|c| c.order()));

    let mut decoded = DecodedLogs::default();
    // Parallel to `decoded.tips`: whether a message was already paired.
    let mut matched: Vec<bool> = Vec::new();

    for log in sorted {
        if log.removed {
            tracing::debug!(tx_hash = ?log.transaction_hash, "Skipping removed log");
            continue;
        }

        match TipJarEvent::from_log(log) {
            Ok(TipJarEvent::Sent(event)) => {
                decoded.tips.push(event.into_record(None));
                matched.push(false);
            }
            Ok(TipJarEvent::Message(event)) => {
                let slot = decoded
                    .tips
                    .iter()
                    .enumerate()
                    .rev()
                    .find(|(i, tip)| {
                        !matched[*i]
                            && tip.tx_hash == event.coordinates.tx_hash
                            && tip.log_index < event.coordinates.log_index
                            && tip.sender == event.sender
                            && tip.recipient == event.recipient
                    })
                    .map(|(i, _)| i);

                match slot {
                    Some(i) => {
                        decoded.tips[i].message = Some(event.message);
                        matched[i] = true;
                    }
                    None => decoded.pending_messages.push(event.into_pending()),
                }
            }
            Err(e) => match LogCoordinates::from_log(log) {
                Ok(coordinates) => {
                    tracing::warn!(
                        tx_hash = %coordinates.tx_hash,
                        log_index = coordinates.log_index,
                        error = %e,
                        "Rejecting TipJar log"
                    );
                    decoded.rejected.push(RejectedLogRecord {
                        tx_hash: coordinates.tx_hash,
                        log_index: coordinates.log_index,
                        block_number: coordinates.block_number,
                        reason: format!("{:#}", e),
                    });
                }
                Err(_) => {
                    tracing::warn!(error = %e, "Dropping TipJar log without coordinates");
                    decoded.unkeyed += 1;
                }
            },
        }
    }

    decoded
}


#[cfg(test)]
mod tests {
    use super::test_logs::*;
    use super::*;
    use alloy::primitives::LogData;

    const ALICE: Address = Address::new([0xa1; 20]);
    const BOB: Address = Address::new([0xb0; 20]);
    const CAROL: Address = Address::new([0xc4; 20]);

    #[test]
    fn test_decode_tip_sent() {
        let tx = B256::repeat_byte(0x01);
        let log = rpc_log(tip_sent(ALICE, BOB, 10_000), 7, tx, 3);

        let TipJarEvent::Sent(event) = TipJarEvent::from_log(&log).unwrap() else {
            panic!("expected TipSent");
        };
        assert_eq!(event.sender, ALICE);
        assert_eq!(event.recipient, BOB);
        assert_eq!(event.fee, U256::from(200u64));
        assert_eq!(event.net_amount, U256::from(9_800u64));
        assert_eq!(event.timestamp, 1_700_000_000);
        assert_eq!(event.coordinates.block_number, 7);
        assert_eq!(event.coordinates.log_index, 3);
    }

    #[test]
    fn test_rejects_inconsistent_fee() {
        let data = TipSent {
            sender: ALICE,
            recipient: BOB,
            amount: U256::from(10_000u64),
            fee: U256::from(300u64),
            netAmount: U256::from(9_700u64),
            timestamp: U256::from(1u64),
        }
        .encode_log_data();
        let log = rpc_log(data, 1, B256::repeat_byte(1), 0);

        let err = TipJarEvent::from_log(&log).unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[test]
    fn test_pairs_message_with_preceding_tip() {
        let tx1 = B256::repeat_byte(0x01);
        let tx2 = B256::repeat_byte(0x02);
        let logs = vec![
            // Delivered out of order on purpose.
            rpc_log(tip_message(ALICE, BOB, "gm"), 5, tx1, 1),
            rpc_log(tip_sent(ALICE, BOB, 10_000), 5, tx1, 0),
            rpc_log(tip_sent(ALICE, CAROL, 20_000), 6, tx2, 0),
        ];

        let decoded = decode_logs(&logs);
        assert_eq!(decoded.tips.len(), 2);
        assert_eq!(decoded.tips[0].message.as_deref(), Some("gm"));
        assert_eq!(decoded.tips[1].message, None);
        assert!(decoded.pending_messages.is_empty());
        assert!(decoded.rejected.is_empty());
    }

    #[test]
    fn test_tips_follow_chain_order() {
        let logs = vec![
            rpc_log(tip_sent(ALICE, BOB, 30_000), 9, B256::repeat_byte(3), 0),
            rpc_log(tip_sent(ALICE, BOB, 20_000), 4, B256::repeat_byte(2), 7),
            rpc_log(tip_sent(ALICE, BOB, 10_000), 4, B256::repeat_byte(1), 2),
        ];

        let decoded = decode_logs(&logs);
        let order: Vec<BlockCoordinates> = decoded
            .tips
            .iter()
            .map(|tip| BlockCoordinates::new(tip.block_number, tip.tx_index, tip.log_index))
            .collect();
        assert_eq!(
            order,
            vec![
                BlockCoordinates::new(4, 0, 2),
                BlockCoordinates::new(4, 0, 7),
                BlockCoordinates::new(9, 0, 0),
            ]
        );
        assert_eq!(decoded.tips[0].amount, U256::from(10_000u64));
    }

    #[test]
    fn test_message_needs_same_sender_and_recipient() {
        let tx = B256::repeat_byte(0x01);
        let logs = vec![
            rpc_log(tip_sent(ALICE, BOB, 10_000), 5, tx, 0),
            rpc_log(tip_message(ALICE, CAROL, "wrong recipient"), 5, tx, 1),
        ];

        let decoded = decode_logs(&logs);
        assert_eq!(decoded.tips[0].message, None);
        assert_eq!(decoded.pending_messages.len(), 1);
        assert_eq!(decoded.pending_messages[0].message, "wrong recipient");
    }

    #[test]
    fn test_each_tip_takes_one_message() {
        // A batched transaction: two tips, each followed by its message.
        let tx = B256::repeat_byte(0x01);
        let logs = vec![
            rpc_log(tip_sent(ALICE, BOB, 10_000), 5, tx, 0),
            rpc_log(tip_message(ALICE, BOB, "first"), 5, tx, 1),
            rpc_log(tip_sent(ALICE, BOB, 10_000), 5, tx, 2),
            rpc_log(tip_message(ALICE, BOB, "second"), 5, tx, 3),
            rpc_log(tip_message(ALICE, BOB, "extra"), 5, tx, 4),
        ];

        let decoded = decode_logs(&logs);
        assert_eq!(decoded.tips[0].message.as_deref(), Some("first"));
        assert_eq!(decoded.tips[1].message.as_deref(), Some("second"));
        assert_eq!(decoded.pending_messages.len(), 1);
        assert_eq!(decoded.pending_messages[0].message, "extra");
    }

    #[test]
    fn test_unknown_and_malformed_logs_are_rejected() {
        let unknown = LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Default::default());
        let truncated = LogData::new_unchecked(
            tip_sent(ALICE, BOB, 10_000).topics().to_vec(),
            vec![0u8; 16].into(),
        );
        let logs = vec![
            rpc_log(unknown, 1, B256::repeat_byte(1), 0),
            rpc_log(truncated, 1, B256::repeat_byte(1), 1),
        ];

        let decoded = decode_logs(&logs);
        assert!(decoded.tips.is_empty());
        assert_eq!(decoded.rejected.len(), 2);
        assert!(decoded.rejected[0].reason.contains("Unknown event signature"));
    }

    #[test]
    fn test_log_without_coordinates_is_counted() {
        let mut log = rpc_log(
            LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Default::default()),
            1,
            B256::ZERO,
            0,
        );
        log.transaction_hash = None;

        let decoded = decode_logs(&[log]);
        assert!(decoded.rejected.is_empty());
        assert_eq!(decoded.unkeyed, 1);
    }
}
