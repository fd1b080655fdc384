//! redb table definitions for the LabelGrid broker.

use redb::TableDefinition;

/// Blob payloads keyed by `{bucket}/{key}`.
pub const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Queue messages keyed by `{queue}:{seq:020}`.
pub const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

/// Next sequence number per queue, keyed by queue name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
