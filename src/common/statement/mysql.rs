pub const ALLOW_INVALID_DATES: &str =
    "SET SESSION sql_mode = CONCAT_WS(',', NULLIF(@@SESSION.sql_mode, ''), 'ALLOW_INVALID_DATES')";

pub fn create_database(db_name: &str) -> String {
    format!("CREATE DATABASE {db_name}")
}

pub fn grant_all_privileges(db_name: &str, user: &str) -> String {
    format!("GRANT ALL ON {db_name}.* TO '{user}'@'%'")
}

pub fn drop_database(db_name: &str) -> String {
    format!("DROP DATABASE {db_name}")
}
