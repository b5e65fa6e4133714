use crate::log_source::LogEntry;
use alloy::primitives::{B256, Bytes};
use anyhow::{Result, bail};
use fjall::{PartitionCreateOptions, ReadTransaction, WriteTransaction};
use zerocopy::big_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// block_number (8) + log_index (8), big endian so keys sort in chain order
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Immutable, KnownLayout, IntoBytes, FromBytes, Unaligned,
)]
#[repr(C)]
pub struct IdentityLogKey {
    pub block_number: U64,
    pub log_index: U64,
}

impl IdentityLogKey {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number: U64::new(block_number),
            log_index: U64::new(log_index),
        }
    }
}

impl From<&LogEntry> for IdentityLogKey {
    fn from(entry: &LogEntry) -> Self {
        Self::new(entry.block_number, entry.log_index)
    }
}

/// tx_hash (32) + topic_count (1), followed by topics (32 each) and the raw data
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Immutable, KnownLayout, IntoBytes, FromBytes, Unaligned,
)]
#[repr(C)]
struct IdentityLogHeader {
    transaction_hash: [u8; 32],
    topic_count: u8,
}

fn encode_value(entry: &LogEntry) -> Vec<u8> {
    let header = IdentityLogHeader {
        transaction_hash: entry.transaction_hash.0,
        topic_count: entry.topics.len() as u8,
    };
    let mut value =
        Vec::with_capacity(size_of::<IdentityLogHeader>() + entry.topics.len() * 32 + entry.data.len());
    value.extend_from_slice(header.as_bytes());
    for topic in &entry.topics {
        value.extend_from_slice(topic.as_slice());
    }
    value.extend_from_slice(&entry.data);
    value
}

fn decode_value(key: &IdentityLogKey, value: &[u8]) -> Result<LogEntry> {
    let Ok((header, rest)) = IdentityLogHeader::read_from_prefix(value) else {
        bail!("db corrupted, identity log value too short");
    };
    let topics_len = header.topic_count as usize * 32;
    if rest.len() < topics_len {
        bail!("db corrupted, identity log truncated in topics");
    }
    let (topics, data) = rest.split_at(topics_len);
    Ok(LogEntry {
        block_number: key.block_number.get(),
        log_index: key.log_index.get(),
        transaction_hash: B256::from(header.transaction_hash),
        topics: topics.chunks_exact(32).map(B256::from_slice).collect(),
        data: Bytes::from(data.to_vec()),
    })
}

/// Raw `InsertIdentity` logs keyed by chain position
#[derive(Clone)]
pub struct IdentityLogPartition(fjall::TxPartition);

impl IdentityLogPartition {
    pub fn new(keyspace: &fjall::TxKeyspace) -> Result<Self> {
        Ok(Self(keyspace.open_partition(
            "identity_logs",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.0.inner().len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.0.inner().is_empty()?)
    }

    /// Re-inserting an existing key overwrites it with identical content.
    pub fn insert_wtx(&self, wtx: &mut WriteTransaction, entry: &LogEntry) {
        let key = IdentityLogKey::from(entry);
        wtx.insert(&self.0, key.as_bytes(), encode_value(entry));
    }

    pub fn get(&self, block_number: u64, log_index: u64) -> Result<Option<LogEntry>> {
        let key = IdentityLogKey::new(block_number, log_index);
        self.0
            .get(key.as_bytes())?
            .map(|bytes| decode_value(&key, bytes.as_bytes()))
            .transpose()
    }

    /// Logs at or after `block_number`, in chain order.
    pub fn iter_from_block_rtx<'a>(
        &'a self,
        rtx: &'a ReadTransaction,
        block_number: u64,
    ) -> impl DoubleEndedIterator<Item = Result<LogEntry>> + 'a {
        let mut range_start = [0u8; size_of::<IdentityLogKey>()];
        range_start.copy_from_slice(IdentityLogKey::new(block_number, 0).as_bytes());

        rtx.range(&self.0, range_start..).map(|item| {
            let (key_bytes, value_bytes) = item?;
            let Ok(key) = IdentityLogKey::read_from_bytes(key_bytes.as_bytes()) else {
                bail!("db corrupted, invalid identity log key");
            };
            decode_value(&key, value_bytes.as_bytes())
        })
    }
}
