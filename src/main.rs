use clap::{Parser, Subcommand};

mod app;
mod auth;
mod config;
mod error;
mod logistics;
mod pages;
mod state;


use crate::auth::{
    repo::PgCredentialStore,
    repo_types::Role,
    services::{register_user, NewUser},
};
use crate::config::AppConfig;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "logistics", about = "Container tracking data entry service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create an account directly in the database
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "NEW_USER_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "admin")]
        role: Role,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "logistics=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let addr = config.bind_addr;
            let app_state = AppState::init(config).await?;

            // Run migrations if present
            if let Err(e) = sqlx::migrate!("./migrations").run(&app_state.db).await {
                tracing::warn!(error = %e, "migration failed; continuing with existing schema");
            }

            app::serve(app::build_app(app_state), addr).await
        }
        Command::CreateUser {
            username,
            email,
            password,
            role,
        } => {
            let db = state::connect(&config).await?;
            let store = PgCredentialStore::new(db);
            let new = NewUser::validate(Some(&username), Some(&email), Some(&password))?;
            let identity = register_user(&store, new, role).await?;
            println!(
                "created user {} ({}) id={} role={}",
                identity.username, identity.email, identity.id, identity.role
            );
            Ok(())
        }
    }
}
