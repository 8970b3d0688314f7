pub mod connection;
pub mod schema;

pub use connection::*;
pub use schema::*;

/// Fresh in-memory store with the schema applied.
#[cfg(test)]
pub async fn test_db() -> Db {
    let config = DatabaseConfig {
        url: "memory".to_string(),
        ..Default::default()
    };
    let db = create_connection(config).await.unwrap();
    ensure_schema(&db).await.unwrap();
    db
}
