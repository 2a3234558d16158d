use redb::TableDefinition;

/// Users: login_name -> UserRecord (bincode)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

