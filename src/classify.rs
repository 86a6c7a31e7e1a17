use std::error::Error as StdError;

use sqlx::mysql::MySqlDatabaseError;

/// ``MySQL`` error number for duplicate entries (`ER_DUP_ENTRY`)
///
/// <https://dev.mysql.com/doc/refman/8.0/en/server-error-reference.html#error_er_dup_entry>
pub const MYSQL_ERR_DUPLICATE_KEY: u16 = 1062;

/// Returns true when the error, or any error in its source chain, is a ``MySQL`` duplicate entry
/// (a violated unique constraint)
///
/// Typed errors are matched on their error number. Errors that were stringified on the way up
/// are matched on the server's `Duplicate entry` message instead.
/// # Example
/// ```
/// use mysql_testdb::unique_violation;
///
/// let err = sqlx::Error::Protocol("Error 1062: Duplicate entry 'a' for key 'PRIMARY'".into());
/// assert!(unique_violation(&err));
/// ```
#[must_use]
pub fn unique_violation(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if error_number(err) == Some(MYSQL_ERR_DUPLICATE_KEY)
            || mentions_duplicate_entry(&err.to_string())
        {
            return true;
        }
        current = err.source();
    }
    false
}

fn error_number(err: &(dyn StdError + 'static)) -> Option<u16> {
    if let Some(err) = err.downcast_ref::<MySqlDatabaseError>() {
        return Some(err.number());
    }
    err.downcast_ref::<sqlx::Error>()
        .and_then(sqlx::Error::as_database_error)
        .and_then(|err| err.try_downcast_ref::<MySqlDatabaseError>())
        .map(MySqlDatabaseError::number)
}

fn mentions_duplicate_entry(message: &str) -> bool {
    // `Error 1062: ...` from older drivers, `1062 (23000): ...` from sqlx and newer ones
    message.contains(&format!("Error {MYSQL_ERR_DUPLICATE_KEY}: Duplicate entry"))
        || message.contains(&format!("{MYSQL_ERR_DUPLICATE_KEY} (23000): Duplicate entry"))
}
