use std::path::{Path, PathBuf};
use std::time::Instant;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, ReadOptions, DB};
use tracing::info;

use crate::error::StoreError;
use crate::metrics_consts::{STORE_OPERATION_DURATION_HISTOGRAM, STORE_SCANNED_KEYS_COUNTER};

pub type KeyValue = (Box<[u8]>, Box<[u8]>);

/// Thin wrapper over a RocksDB handle with named column families.
#[derive(Debug)]
pub struct RocksDbStore {
    db: DB,
    path: PathBuf,
}

impl RocksDbStore {
    pub fn new(
        path: &Path,
        cf_descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        info!(path = %path.display(), "opened rocksdb store");

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn get_cf_handle(&self, cf_name: &'static str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(cf_name)
            .ok_or(StoreError::MissingColumnFamily(cf_name))
    }

    pub fn get(&self, cf_name: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let start = Instant::now();
        let cf = self.get_cf_handle(cf_name)?;
        let value = self.db.get_cf(cf, key)?;
        record_duration("get", cf_name, start);
        Ok(value)
    }

    /// Apply a merge operand; the column family's merge operator decides the outcome.
    pub fn merge(&self, cf_name: &'static str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let start = Instant::now();
        let cf = self.get_cf_handle(cf_name)?;
        self.db.merge_cf(cf, key, value)?;
        record_duration("merge", cf_name, start);
        Ok(())
    }

    /// All entries with `lower <= key < upper`, in key order. `None` leaves the
    /// scan unbounded above.
    pub fn scan(
        &self,
        cf_name: &'static str,
        lower: Vec<u8>,
        upper: Option<Vec<u8>>,
    ) -> Result<Vec<KeyValue>, StoreError> {
        let start = Instant::now();
        let cf = self.get_cf_handle(cf_name)?;

        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_lower_bound(lower);
        if let Some(upper) = upper {
            read_opts.set_iterate_upper_bound(upper);
        }

        let mut entries = Vec::new();
        for item in self.db.iterator_cf_opt(cf, read_opts, IteratorMode::Start) {
            entries.push(item?);
        }

        metrics::counter!(STORE_SCANNED_KEYS_COUNTER, "cf" => cf_name)
            .increment(entries.len() as u64);
        record_duration("scan", cf_name, start);
        Ok(entries)
    }

    pub fn flush_cf(&self, cf_name: &'static str) -> Result<(), StoreError> {
        let cf = self.get_cf_handle(cf_name)?;
        self.db.flush_cf(cf)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn record_duration(op: &'static str, cf_name: &'static str, start: Instant) {
    metrics::histogram!(STORE_OPERATION_DURATION_HISTOGRAM, "op" => op, "cf" => cf_name)
        .record(start.elapsed().as_secs_f64());
}
