use uuid::Uuid;

/// Prefix of every temporary database name
pub const DATABASE_NAME_PREFIX: &str = "test";

pub fn get_db_name(id: Uuid) -> String {
    format!("{DATABASE_NAME_PREFIX}{}", id.simple())
}
