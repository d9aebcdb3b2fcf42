/// Coinbase of the Bitcoin mainnet genesis block. bitcoind cannot serve it through
/// `getrawtransaction`, so it is excluded from aggregation unless configured otherwise.
pub const MAINNET_GENESIS_COINBASE_TXID: &str =
    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

/// Heights warmed ahead of the last height the importer asked for.
pub const DEFAULT_PREFETCH_WINDOW: u64 = 100;

/// Parallel block fetches in flight during one warm pass.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 8;

/// Roughly the expected time between two blocks.
pub const DEFAULT_BLOCK_COUNT_TTL_SECS: u64 = 600;

pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 120;

/// Entries kept in each of the status ring buffers (logs, errors).
pub const STATUS_RING_CAPACITY: usize = 100;
