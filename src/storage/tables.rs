use redb::TableDefinition;

/// Users: urn -> User (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Groups: group_id -> Group (msgpack)
pub const GROUPS: TableDefinition<u64, &[u8]> = TableDefinition::new("groups");

/// Secondary index: group_name -> group_id
pub const GROUP_NAMES: TableDefinition<&str, u64> = TableDefinition::new("group_names");

/// Group membership: (group_id, member_urn) -> GroupMember (msgpack)
pub const GROUP_MEMBERS: TableDefinition<(u64, &str), &[u8]> =
    TableDefinition::new("group_members");

/// Vehicles: uri -> Vehicle (msgpack)
pub const VEHICLES: TableDefinition<&str, &[u8]> = TableDefinition::new("vehicles");

/// Tickets: ticket_id -> Ticket (msgpack)
pub const TICKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("tickets");

/// Payments: transaction_id -> Payment (msgpack)
pub const PAYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("payments");

/// Price table: (vehicle_kind, ticket_kind) -> PriceEntry (msgpack)
pub const PRICE_LIST: TableDefinition<(u8, u8), &[u8]> = TableDefinition::new("price_list");

/// Authenticated connections: connection_id -> ConnectionRecord (msgpack)
pub const ACTIVE_CONNECTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("active_connections");

/// Monotonic id counters (group ids, ticket ids, transaction ids).
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
