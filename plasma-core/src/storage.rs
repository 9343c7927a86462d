//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `blocks` - Assembled blocks (key: block number, u32 BE)
//! - `snapshots` - Manager snapshots (key: last block number, u32 BE)
//!
//! Big-endian keys make iteration order equal block order.

use crate::{
    block::Block,
    error::{Error, Result},
    manager::ChainSnapshot,
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_BLOCKS: &str = "blocks";
const CF_SNAPSHOTS: &str = "snapshots";

/// Durable sink for published blocks
pub trait BlockStore: Send + Sync + std::fmt::Debug {
    /// Store a block together with an optional snapshot, atomically
    fn commit_block(&self, block: &Block, snapshot: Option<&ChainSnapshot>) -> Result<()>;
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    retain_snapshots: usize,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Self::cf_options_snapshots()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self {
            db: Arc::new(db),
            retain_snapshots: config.snapshot.retain.max(1),
        })
    }

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_snapshots() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Block operations

    /// Put block
    pub fn put_block(&self, block: &Block) -> Result<()> {
        self.commit_block(block, None)
    }

    /// Store a block together with an optional snapshot (atomic)
    pub fn commit_block(&self, block: &Block, snapshot: Option<&ChainSnapshot>) -> Result<()> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let mut batch = WriteBatch::default();

        batch.put_cf(&cf, block.number.to_be_bytes(), bincode::serialize(block)?);
        if let Some(snapshot) = snapshot {
            self.stage_snapshot(&mut batch, snapshot)?;
        }

        self.db.write(batch)?;

        tracing::debug!(
            number = block.number,
            hash = %block.hash(),
            with_snapshot = snapshot.is_some(),
            "Block stored"
        );

        Ok(())
    }

    /// Get block by number
    pub fn get_block(&self, number: u32) -> Result<Block> {
        let cf = self.cf_handle(CF_BLOCKS)?;

        let value = self
            .db
            .get_cf(&cf, number.to_be_bytes())?
            .ok_or(Error::BlockNotFound(number))?;

        Self::decode_block(&value)
    }

    /// Get latest block
    pub fn get_latest_block(&self) -> Result<Option<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;

        let newest = self.db.iterator_cf(&cf, IteratorMode::End).next();
        match newest {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(Self::decode_block(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Blocks with number >= `from`, in order
    pub fn iter_blocks(&self, from: u32) -> Result<Vec<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let start = from.to_be_bytes();

        let blocks = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward))
            .map(|item| {
                let (_, value) = item?;
                Self::decode_block(&value)
            })
            .collect();
        blocks
    }

    fn decode_block(value: &[u8]) -> Result<Block> {
        let block: Block = bincode::deserialize(value)?;
        if block.recompute_hash()? != block.hash() {
            return Err(Error::Storage(format!(
                "stored block {} does not match its hash",
                block.number
            )));
        }
        Ok(block)
    }

    // Snapshot operations

    /// Store a snapshot and prune all but the newest retained ones (atomic)
    pub fn put_snapshot(&self, snapshot: &ChainSnapshot) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_snapshot(&mut batch, snapshot)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn stage_snapshot(&self, batch: &mut WriteBatch, snapshot: &ChainSnapshot) -> Result<()> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        let key = snapshot.last_block.to_be_bytes();

        batch.put_cf(&cf, key, bincode::serialize(snapshot)?);

        // Newest first; the one being written counts against the limit
        let mut kept = 1;
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            let (existing, _) = item?;
            if *existing == key {
                continue;
            }
            if kept < self.retain_snapshots {
                kept += 1;
            } else {
                batch.delete_cf(&cf, existing);
            }
        }

        tracing::info!(
            last_block = snapshot.last_block,
            entries = snapshot.entries.len(),
            pending = snapshot.pending.len(),
            "Snapshot staged"
        );

        Ok(())
    }

    /// Newest snapshot, if any
    pub fn latest_snapshot(&self) -> Result<Option<ChainSnapshot>> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;

        let newest = self.db.iterator_cf(&cf, IteratorMode::End).next();
        match newest {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_snapshots = self.cf_handle(CF_SNAPSHOTS)?;

        let latest_block = match self.db.iterator_cf(&cf_blocks, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Some(Self::decode_key(&key)?)
            }
            None => None,
        };

        let snapshot_count = self.db.iterator_cf(&cf_snapshots, IteratorMode::Start).count() as u64;

        Ok(StorageStats {
            latest_block,
            snapshot_count,
        })
    }

    fn decode_key(key: &[u8]) -> Result<u32> {
        let bytes: [u8; 4] = key
            .try_into()
            .map_err(|_| Error::Storage(format!("malformed key of {} bytes", key.len())))?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl BlockStore for Storage {
    fn commit_block(&self, block: &Block, snapshot: Option<&ChainSnapshot>) -> Result<()> {
        Storage::commit_block(self, block, snapshot)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("retain_snapshots", &self.retain_snapshots)
            .finish()
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Highest stored block number
    pub latest_block: Option<u32>,
    /// Snapshots currently retained
    pub snapshot_count: u64,
}
