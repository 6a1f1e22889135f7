//! Global configuration constants for vectorkv.
//!
//! Storage-engine framing, tuning defaults, and collection limits are defined here.
//! These are compile-time constants; runtime configuration is carried by the
//! option structs in [`crate::kv::options`] and [`crate::storage::DatabaseOptions`].

use std::time::Duration;

/// Size of a WAL block in bytes (32 KiB).
///
/// Chunks never straddle a block boundary; a block tail shorter than a chunk
/// header is zero padded.
pub const BLOCK_SIZE: u32 = 32 * 1024;

/// Size of a chunk header: CRC32 (4) + payload length (2) + chunk type (1).
pub const CHUNK_HEADER_SIZE: u32 = 7;

/// Default size of a single WAL segment file (1 GiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// Default size threshold after which the active memtable is rotated (64 MiB).
pub const DEFAULT_MEMTABLE_SIZE: usize = 64 * 1024 * 1024;

/// Default number of memtables (one active plus immutables awaiting flush).
pub const DEFAULT_MEMTABLE_NUMS: usize = 15;

/// Default number of value-log and index partitions.
pub const DEFAULT_PARTITION_NUM: usize = 3;

/// Default number of surviving records rewritten per batch during compaction.
pub const DEFAULT_COMPACT_BATCH_COUNT: usize = 10_000;

/// Default time a writer waits for memtable space before giving up.
pub const DEFAULT_WAIT_MEMTABLE_SPACE_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum time `close` waits for the flush thread to acknowledge shutdown.
pub const FLUSH_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Segment extension prefix for memtable WAL files (`.MEM.{table_id}`).
pub const MEMTABLE_FILE_EXT: &str = ".MEM";

/// Segment extension prefix for value-log files (`.VLOG.{partition}`).
pub const VLOG_FILE_EXT: &str = ".VLOG";

/// Segment extension prefix for index journals (`.INDEX.{partition}`).
pub const INDEX_FILE_EXT: &str = ".INDEX";

/// Suffix appended to a value-log extension while compaction rewrites it.
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Name of the advisory lock file guarding a database directory.
pub const FILE_LOCK_NAME: &str = "FLOCK";

/// Sub-directory of the database root holding value-log partitions.
pub const VLOG_DIR: &str = "vlog";

/// Sub-directory of the database root holding index journals.
pub const INDEX_DIR: &str = "index";

/// An index journal is rewritten once it holds this many entries per live key.
pub const INDEX_JOURNAL_REWRITE_RATIO: usize = 2;

/// Hybrid search scans `top_k * HYBRID_OVERSCAN` vector candidates before filtering.
pub const HYBRID_OVERSCAN: usize = 3;

/// Score given to every hit of a filter-only search.
pub const FILTER_MATCH_SCORE: f32 = 100.0;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`top_k`) per search request.
pub const MAX_K: usize = 10_000;

/// Maximum length of a collection name in characters.
pub const MAX_COLLECTION_NAME_LEN: usize = 128;

/// Reserved metadata field holding the user-facing document id.
pub const ID_FIELD: &str = "_id";

/// Collection config file name.
pub const CONFIG_FILE: &str = "config.json";

/// Collection bitmap-index file name.
pub const BITMAP_FILE: &str = "bitmap.bin";

/// Collection vector-index file name.
pub const VECTOR_FILE: &str = "vectors.bin";

/// Suffix of the previous committed copy of a collection file.
pub const BACKUP_SUFFIX: &str = "-backup";
