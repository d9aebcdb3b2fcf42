use rocksdb::{
    BlockBasedOptions, Cache, DB, Direction, Error as RocksError, IteratorMode, Options,
    ReadOptions, WriteBatch,
};
use std::{path::Path, sync::Arc};

/// ===== Cache / open-time tuning =====
/// LRU block cache shared by data, index and filter blocks.
pub const ROCKS_BLOCK_CACHE_BYTES: usize = 256 << 20; // 256 MiB

/// Walk the namespace once on open so the first lookups hit the cache.
pub const WARM_CACHE_ON_OPEN: bool = true;

/// Bloom filter bits/key (point lookups by hash dominate).
pub const BLOOM_BITS_PER_KEY: f64 = 10.0;

/// A key namespace inside one RocksDB instance. Every key is stored as `prefix ++ key`.
#[derive(Clone)]
pub struct Mdb {
    db: Arc<DB>,
    prefix: Vec<u8>,
}

impl Mdb {
    pub fn from_db(db: Arc<DB>, prefix: impl AsRef<[u8]>) -> Self {
        Self { db, prefix: prefix.as_ref().to_vec() }
    }

    pub fn open(path: impl AsRef<Path>, prefix: impl AsRef<[u8]>) -> Result<Self, RocksError> {
        // ---- Block cache + table options ----
        let cache = Cache::new_lru_cache(ROCKS_BLOCK_CACHE_BYTES);

        let mut table = BlockBasedOptions::default();
        table.set_block_cache(&cache);
        table.set_cache_index_and_filter_blocks(true);
        table.set_pin_l0_filter_and_index_blocks_in_cache(true);
        table.set_bloom_filter(BLOOM_BITS_PER_KEY, false);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(-1);
        opts.set_block_based_table_factory(&table);

        let db = DB::open(&opts, path)?;

        let mdb = Self::from_db(Arc::new(db), prefix);
        if WARM_CACHE_ON_OPEN {
            match mdb.warm_up_namespace() {
                Ok(n) => tracing::debug!(keys = n, "namespace warmed"),
                Err(e) => tracing::warn!(error = %e, "namespace warm-up failed"),
            }
        }
        Ok(mdb)
    }

    /// Walk the namespace once to populate the block cache.
    /// Returns the number of KV pairs touched.
    pub fn warm_up_namespace(&self) -> Result<usize, RocksError> {
        let ns = self.prefix.clone();

        let mut ro = ReadOptions::default();
        ro.fill_cache(true);

        let it = self.db.iterator_opt(IteratorMode::From(&ns, Direction::Forward), ro);

        let mut count = 0usize;
        for res in it {
            let (k, _v) = res?;
            if !k.starts_with(&ns) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    #[inline]
    pub fn prefixed(&self, k: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + k.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(k);
        out
    }

    pub fn get(&self, k: &[u8]) -> Result<Option<Vec<u8>>, RocksError> {
        self.db.get(self.prefixed(k))
    }

    pub fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, RocksError> {
        let prefixed: Vec<Vec<u8>> = keys.iter().map(|k| self.prefixed(k)).collect();
        self.db
            .multi_get(prefixed)
            .into_iter()
            .map(|r| r.map(|found| found.map(|slice| slice.to_vec())))
            .collect()
    }

    /// Apply every write queued by `build` in one atomic `WriteBatch`.
    pub fn bulk_write<F>(&self, build: F) -> Result<(), RocksError>
    where
        F: FnOnce(&mut MdbBatch<'_>),
    {
        let mut wb = WriteBatch::default();
        {
            let mut mb = MdbBatch { mdb: self, wb: &mut wb };
            build(&mut mb);
        }
        self.db.write(wb)
    }

    /// All `(relative key, value)` pairs whose relative key starts with `rel_prefix`.
    pub fn scan_prefix(&self, rel_prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, RocksError> {
        let start = self.prefixed(rel_prefix);

        // compute upper bound
        let mut ub = start.clone();
        for i in (0..ub.len()).rev() {
            if ub[i] != 0xff {
                ub[i] += 1;
                ub.truncate(i + 1);
                break;
            }
            if i == 0 {
                ub.clear();
            }
        }

        let mut ro = ReadOptions::default();
        if !ub.is_empty() {
            ro.set_iterate_upper_bound(ub);
        }
        ro.set_total_order_seek(true);

        let it = self.db.iterator_opt(IteratorMode::From(&start, Direction::Forward), ro);
        let mut out = Vec::new();
        for kv in it {
            let (k_full, v) = kv?;
            if !k_full.starts_with(&start) {
                break;
            }
            out.push((k_full[self.prefix.len()..].to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

pub struct MdbBatch<'a> {
    mdb: &'a Mdb,
    wb: &'a mut WriteBatch,
}

impl<'a> MdbBatch<'a> {
    #[inline]
    pub fn put(&mut self, k: &[u8], v: &[u8]) {
        self.wb.put(self.mdb.prefixed(k), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_namespaces_do_not_overlap() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(DB::open_default(temp.path()).unwrap());
        let a = Mdb::from_db(db.clone(), b"a/");
        let b = Mdb::from_db(db, b"b/");

        a.bulk_write(|wb| wb.put(b"k", b"1")).unwrap();
        assert_eq!(a.get(b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(b.get(b"k").unwrap(), None);
        assert_eq!(a.prefixed(b"k"), b"a/k".to_vec());
    }

    #[test]
    fn test_bulk_write_and_scan_prefix() {
        let temp = TempDir::new().unwrap();
        let mdb = Mdb::open(temp.path(), b"ns/").unwrap();

        mdb.bulk_write(|wb| {
            wb.put(b"x/1", b"one");
            wb.put(b"x/2", b"two");
            wb.put(b"y/1", b"other");
        })
        .unwrap();

        let rows = mdb.scan_prefix(b"x/").unwrap();
        assert_eq!(
            rows,
            vec![(b"x/1".to_vec(), b"one".to_vec()), (b"x/2".to_vec(), b"two".to_vec())]
        );
        assert_eq!(mdb.warm_up_namespace().unwrap(), 3);
    }

    #[test]
    fn test_multi_get_preserves_order() {
        let temp = TempDir::new().unwrap();
        let mdb = Mdb::open(temp.path(), b"ns/").unwrap();
        mdb.bulk_write(|wb| wb.put(b"b", b"2")).unwrap();

        let got = mdb.multi_get(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert_eq!(got, vec![None, Some(b"2".to_vec())]);
    }
}
