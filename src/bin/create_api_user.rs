//! Creates a business owner and prints their API token.
//!
//! Usage: `create_api_user <name> <email> <business name>`
//!
//! The token is printed once; only its hash is stored.

use dotenvy::dotenv;
use std::env;

use vyapar_connect::auth::{generate_api_token, hash_token};
use vyapar_connect::db::Database;
use vyapar_connect::storage::Storage;
use vyapar_connect::validation::is_valid_email;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let [name, email, business_name] = args.as_slice() else {
        anyhow::bail!("usage: create_api_user <name> <email> <business name>");
    };
    if name.trim().is_empty() || business_name.trim().is_empty() {
        anyhow::bail!("name and business name cannot be empty");
    }
    if !is_valid_email(email) {
        anyhow::bail!("invalid email: {}", email);
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let db = Database::new(&database_url).await?;
    let storage = Storage::new(db.pool.clone());

    let token = generate_api_token();
    let user = storage
        .create_user(
            name.trim(),
            &email.trim().to_lowercase(),
            business_name.trim(),
            &hash_token(&token),
        )
        .await?;

    println!("Created user {} ({})", user.id, user.business_name);
    println!("API token (store it now, it is not shown again):");
    println!("{}", token);

    Ok(())
}
