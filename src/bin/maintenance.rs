use std::env;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use safedocs_backend::{
    auth::password::hash_password,
    config::AppConfig,
    db,
    models::{Document, DocumentVersion, NewUser},
    schema::{document_versions, documents, users},
    storage::build_storage,
};

const USAGE: &str = "Usage: maintenance <create-admin <username> <email> | purge-deleted [days]>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("create-admin") => {
            let username = args.next().context(USAGE)?;
            let email = args.next().context(USAGE)?;
            create_admin(&username, &email)?;
        }
        Some("purge-deleted") => {
            let days = match args.next() {
                Some(raw) => raw.parse().context("days must be a positive integer")?,
                None => 30,
            };
            purge_deleted(days).await?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn create_admin(username: &str, email: &str) -> Result<()> {
    let admin_password =
        env::var("ADMIN_PASSWORD").context("ADMIN_PASSWORD must be set to create an admin")?;
    if admin_password.len() < 8 {
        bail!("ADMIN_PASSWORD must be at least 8 characters");
    }

    let config = AppConfig::from_env()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: email.to_string(),
        password_hash: hash_password(&admin_password)?,
        role: "admin".to_string(),
        organization_id: None,
    };

    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .context("failed to insert admin user")?;

    println!("Created admin user {username} ({email}).");
    Ok(())
}

/// Permanently removes documents soft-deleted more than `days` ago, along
/// with their stored objects and version history.
async fn purge_deleted(days: i64) -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = build_storage(&config).await?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let cutoff = Utc::now().naive_utc() - Duration::days(days);
    let expired: Vec<Document> = documents::table
        .filter(documents::deleted_at.le(cutoff))
        .load(&mut conn)
        .context("failed to load deleted documents")?;

    if expired.is_empty() {
        println!("No documents to purge.");
        return Ok(());
    }

    println!("Purging {} documents…", expired.len());

    for doc in &expired {
        let versions: Vec<DocumentVersion> = document_versions::table
            .filter(document_versions::document_id.eq(doc.id))
            .load(&mut conn)?;

        for version in &versions {
            if let Err(err) = storage.delete_object(&version.object_key).await {
                eprintln!(
                    "Failed to delete object {} from storage: {err}",
                    version.object_key
                );
            }
        }

        diesel::delete(documents::table.find(doc.id))
            .execute(&mut conn)
            .context("failed to remove document record")?;
    }

    println!("Purged {} documents.", expired.len());
    Ok(())
}
