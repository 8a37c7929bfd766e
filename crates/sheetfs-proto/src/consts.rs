//! System-wide constants shared by the master, datanodes and clients.

/// Capacity of a chunk's payload region in bytes.
pub const BYTES_PER_CHUNK: u64 = 8192;

/// Number of cell slots in a non-meta chunk.
pub const MAX_CELLS_PER_CHUNK: usize = 4;

/// Size of a single cell slot in bytes.
pub const MAX_BYTES_PER_CELL: u64 = BYTES_PER_CHUNK / MAX_CELLS_PER_CHUNK as u64;

/// Byte offset of the version word inside a chunk file, immediately after
/// the payload region.
pub const VERSION_OFFSET: u64 = BYTES_PER_CHUNK;

/// Polynomial for the datanode journal checksum (reflected CRC-32 form).
pub const CRC32_POLYNOMIAL: u32 = 0xD582_8281;

/// Row coordinate of the per-sheet meta cell.
pub const META_CELL_ROW: u32 = u32::MAX;

/// Column coordinate of the per-sheet meta cell.
pub const META_CELL_COL: u32 = u32::MAX;

/// Sentinel cell id of the meta cell, `cell_id(u32::MAX, u32::MAX)` as i64.
pub const META_CELL_ID: i64 = -1;

/// Pad byte used when a write request does not supply one.
pub const DEFAULT_PADDING: u8 = b' ';

/// How many times a client re-resolves a primary through the coordinator
/// before giving up on a transport failure.
pub const REDISCOVERY_ATTEMPTS: usize = 3;
