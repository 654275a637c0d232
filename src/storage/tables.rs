use redb::TableDefinition;

/// Monotonic id counters: sequence name -> last issued id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Storage nodes: id -> StorageNode (msgpack)
pub const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Node uuid index: uuid -> node id
pub const NODE_UUIDS: TableDefinition<&str, u64> = TableDefinition::new("node_uuids");

/// Child index: parent node id -> msgpack Vec of child node ids
pub const NODE_CHILDREN: TableDefinition<u64, &[u8]> = TableDefinition::new("node_children");

/// Content records: id -> ContentRecord (msgpack)
pub const CONTENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("contents");

/// Active-content index: node id -> content id (at most one ACTIVE record per node)
pub const NODE_ACTIVE_CONTENT: TableDefinition<u64, u64> =
    TableDefinition::new("node_active_content");

/// Upload sessions: id -> UploadSession (msgpack)
pub const UPLOAD_SESSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("upload_sessions");

/// Session uuid index: uuid -> session id
pub const SESSION_UUIDS: TableDefinition<&str, u64> = TableDefinition::new("session_uuids");

/// Upload parts: (session id, part number) -> UploadPart (msgpack)
pub const UPLOAD_PARTS: TableDefinition<(u64, u32), &[u8]> = TableDefinition::new("upload_parts");

/// Resource locks: resource code -> LockRow (msgpack)
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");

/// Job executions: id -> JobExecution (msgpack)
pub const EXECUTIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("executions");

/// Execution messages: (execution id, sequence) -> ExecutionMessage (msgpack)
pub const EXECUTION_MESSAGES: TableDefinition<(u64, u32), &[u8]> =
    TableDefinition::new("execution_messages");

/// Backbones: id -> BackboneRecord (msgpack)
pub const BACKBONES: TableDefinition<u64, &[u8]> = TableDefinition::new("backbones");
