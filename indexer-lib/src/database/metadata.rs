use anyhow::{Result, bail};
use fjall::{CompressionType, PartitionCreateOptions, ReadTransaction, WriteTransaction};
use zerocopy::big_endian::U64;
use zerocopy::{FromBytes, IntoBytes};

pub const DB_VERSION: u64 = 1;

/// Metadata partition for storing the sync position and layout version
/// Key: enum of metadata types
/// Value: big endian u64
#[derive(Clone)]
pub struct MetadataPartition(fjall::TxPartition);

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    LatestDeliveredBlock = 0,
    DbVersion = 1,
}

fn read_u64(bytes: &[u8]) -> Result<u64> {
    let Ok(value) = U64::read_from_bytes(bytes) else {
        bail!("db corrupted, failed to read metadata value");
    };
    Ok(value.get())
}

impl MetadataPartition {
    pub fn new(keyspace: &fjall::TxKeyspace) -> Result<Self> {
        Ok(Self(
            keyspace.open_partition(
                "metadata",
                PartitionCreateOptions::default()
                    .block_size(1024)
                    .compression(CompressionType::None),
            )?,
        ))
    }

    /// Store the last block of a persisted batch, never moving backwards
    pub fn set_latest_delivered_block(&self, wtx: &mut WriteTransaction, block: u64) -> Result<()> {
        let key = [MetadataKey::LatestDeliveredBlock as u8];
        let value = U64::new(block);
        wtx.fetch_update(&self.0, key, |old_value| match old_value {
            Some(old) if read_u64(old.as_bytes()).is_ok_and(|old| old >= block) => {
                Some(old.clone())
            }
            _ => Some(value.as_bytes().into()),
        })?;
        Ok(())
    }

    pub fn get_latest_delivered_block_rtx(&self, rtx: &ReadTransaction) -> Result<Option<u64>> {
        let key = [MetadataKey::LatestDeliveredBlock as u8];
        rtx.get(&self.0, key)?
            .map(|bytes| read_u64(bytes.as_bytes()))
            .transpose()
    }

    pub fn db_version(&self) -> Result<Option<u64>> {
        let key = [MetadataKey::DbVersion as u8];
        self.0
            .get(key)?
            .map(|bytes| read_u64(bytes.as_bytes()))
            .transpose()
    }

    pub fn set_db_version(&self, version: u64) -> Result<()> {
        let key = [MetadataKey::DbVersion as u8];
        self.0.insert(key, U64::new(version).as_bytes())?;
        Ok(())
    }

    /// Stamps a fresh store with the current layout version, refuses a store written with another one.
    pub fn ensure_db_version(&self) -> Result<()> {
        match self.db_version()? {
            None => self.set_db_version(DB_VERSION),
            Some(DB_VERSION) => Ok(()),
            Some(other) => bail!(
                "unsupported db version {other}, expected {DB_VERSION}; remove the data directory to resync"
            ),
        }
    }
}
