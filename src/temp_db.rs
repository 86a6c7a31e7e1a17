use sqlx::{Connection, Executor, MySqlConnection};
use uuid::Uuid;

use crate::{
    common::{config::DatabaseConfig, statement::mysql},
    error::Error,
    util::get_db_name,
};

/// Creates a uniquely named database on the server in `config` and grants the application
/// user all privileges on it
///
/// Connects as `root`, which shares the application user's password on the test container.
/// Returns the new database's name. If the grant fails the database is dropped again before
/// the error is returned.
pub async fn create_temporary_database(config: &DatabaseConfig) -> Result<String, Error> {
    let mysql = config.mysql.clone().unwrap_or_default().with_defaults();

    let mut conn = MySqlConnection::connect_with(&mysql.privileged_connect_options())
        .await
        .map_err(Error::Connection)?;

    let db_name = get_db_name(Uuid::new_v4());
    let result = create_and_grant(&mut conn, &db_name, mysql.get_user()).await;
    conn.close().await.ok();
    result?;

    tracing::debug!(database = %db_name, user = %mysql.get_user(), "created temporary database");
    Ok(db_name)
}

async fn create_and_grant(
    conn: &mut MySqlConnection,
    db_name: &str,
    user: &str,
) -> Result<(), Error> {
    conn.execute(mysql::create_database(db_name).as_str())
        .await
        .map_err(Error::Query)?;

    if let Err(err) = conn
        .execute(mysql::grant_all_privileges(db_name, user).as_str())
        .await
    {
        if let Err(drop_err) = conn.execute(mysql::drop_database(db_name).as_str()).await {
            tracing::warn!(
                database = %db_name,
                error = %drop_err,
                "failed to drop database after failed grant"
            );
        }
        return Err(Error::Query(err));
    }

    Ok(())
}
