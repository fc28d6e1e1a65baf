use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use rbac_admin::authz::{PolicyEnforcer, PolicyStore, SqlitePolicyStore};
use rbac_admin::jwt::TokenCodec;
use rbac_admin::utils::hash_password;
use rbac_admin::AuthConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "rbac-admin maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create a user and assign roles by name
    CreateUser {
        username: String,
        password: String,
        /// Role name; repeat for several roles
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Print a bearer token for a subject, signed with JWT_SECRET
    IssueToken { subject: String },
    /// Evaluate one request against the policy currently stored in the database
    Check {
        subject: String,
        object: String,
        action: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fall back to the crate-local `.env` when the CWD has none.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            get_migrator().await?.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::CreateUser { username, password, roles } => {
            let pool = get_pool().await?;
            let id = create_user(&pool, &username, &password, &roles).await?;
            println!("Created user {username} (id {id}) with roles {roles:?}");
        }
        Commands::IssueToken { subject } => {
            let auth = AuthConfig::from_env()?;
            let issued = TokenCodec::from_config(&auth).issue(&subject)?;
            println!("{}", issued.token);
            eprintln!("expires at {}", issued.expires_at.to_rfc3339());
        }
        Commands::Check { subject, object, action } => {
            let pool = get_pool().await?;
            let allowed = check(pool, &subject, &object, &action).await?;
            if !allowed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = database_url
        .parse::<SqliteConnectOptions>()
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let has_table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;

    let applied_versions: HashSet<i64> = if has_table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn create_user(pool: &SqlitePool, username: &str, password: &str, roles: &[String]) -> anyhow::Result<i64> {
    let mut role_ids = Vec::with_capacity(roles.len());
    for role in roles {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
            .bind(role)
            .fetch_optional(pool)
            .await?;
        role_ids.push(id.with_context(|| format!("unknown role `{role}`"))?);
    }

    let password_hash = hash_password(password)?;
    let id = SqlitePolicyStore::new(pool.clone())
        .create_user(username, &password_hash, &role_ids)
        .await
        .with_context(|| format!("failed to create user `{username}`"))?;

    Ok(id)
}

async fn check(pool: SqlitePool, subject: &str, object: &str, action: &str) -> anyhow::Result<bool> {
    let set = SqlitePolicyStore::new(pool).load_all_policy().await?;
    let enforcer = PolicyEnforcer::new();
    let stats = enforcer.reload(&set.rules, &set.assignments);

    let snapshot = enforcer.snapshot();
    let allowed = snapshot.enforce(subject, object, action);
    println!(
        "{} {subject} {} {object} (roles {:?}, {} rules)",
        if allowed { "allow" } else { "deny" },
        action.to_ascii_uppercase(),
        snapshot.roles_for(subject),
        stats.rules,
    );

    Ok(allowed)
}
