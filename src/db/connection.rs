use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("KEYHOLE_DB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("KEYHOLE_DB_NAMESPACE").unwrap_or_else(|_| "keyhole".to_string()),
            database: env::var("KEYHOLE_DB_DATABASE").unwrap_or_else(|_| "auth".to_string()),
            username: env::var("KEYHOLE_DB_USERNAME").ok(),
            password: env::var("KEYHOLE_DB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url.as_str())
        .await
        .with_context(|| format!("opening store at {}", config.url))?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Define tables and indexes. Safe to run against an existing store.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        // Pending signin attempts. `signin_id` is deliberately not unique:
        // short ids may collide and the secret tells rows apart.
        "DEFINE TABLE IF NOT EXISTS signin_request SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS signin_id ON TABLE signin_request TYPE string;
         DEFINE FIELD IF NOT EXISTS signin_secret ON TABLE signin_request TYPE string;
         DEFINE FIELD IF NOT EXISTS pubkey ON TABLE signin_request TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE signin_request TYPE int;
         DEFINE INDEX IF NOT EXISTS signin_request_signin_id ON TABLE signin_request COLUMNS signin_id;
         DEFINE INDEX IF NOT EXISTS signin_request_created_at ON TABLE signin_request COLUMNS created_at;",

        // Browser sessions
        "DEFINE TABLE IF NOT EXISTS user_session SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS user_id ON TABLE user_session TYPE string;
         DEFINE FIELD IF NOT EXISTS session_id ON TABLE user_session TYPE string;
         DEFINE FIELD IF NOT EXISTS session_secret ON TABLE user_session TYPE string;
         DEFINE FIELD IF NOT EXISTS csrf_token ON TABLE user_session TYPE string;
         DEFINE FIELD IF NOT EXISTS last_active ON TABLE user_session TYPE int;
         DEFINE INDEX IF NOT EXISTS user_session_session_id ON TABLE user_session COLUMNS session_id;
         DEFINE INDEX IF NOT EXISTS user_session_user_id ON TABLE user_session COLUMNS user_id;
         DEFINE INDEX IF NOT EXISTS user_session_last_active ON TABLE user_session COLUMNS last_active;",

        // Users, one per distinct public key
        "DEFINE TABLE IF NOT EXISTS user SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS user_id ON TABLE user TYPE string;
         DEFINE FIELD IF NOT EXISTS pubkey ON TABLE user TYPE string;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE user TYPE int;
         DEFINE INDEX IF NOT EXISTS user_user_id ON TABLE user COLUMNS user_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_pubkey ON TABLE user COLUMNS pubkey UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query)
            .await?
            .check()
            .context("defining store schema")?;
    }

    Ok(())
}
