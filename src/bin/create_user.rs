use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;

use student_api::auth::AuthService;
use student_api::config::AppConfig;
use student_api::database::{DatabaseService, Repository};
use student_api::services::UserService;
use student_api::utils::error::AppError;

/// Create a login for the API (the `createsuperuser` of this service)
#[derive(Debug, Parser)]
#[command(name = "create_user", version)]
struct Args {
    #[arg(long)]
    username: String,

    #[arg(long, default_value = "")]
    email: String,

    /// Read from the environment so it stays out of shell history
    #[arg(long, env = "CREATE_USER_PASSWORD", hide_env_values = true)]
    password: String,

    /// Mark the user as staff
    #[arg(long)]
    staff: bool,

    /// Create the user deactivated; it cannot log in until reactivated
    #[arg(long)]
    inactive: bool,
}

fn describe(err: AppError) -> String {
    match err {
        AppError::Validation(fields) => format!("could not create user: {:?}", fields),
        other => format!("could not create user: {}", other),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv();
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;

    if config.database.is_in_memory() {
        return Err("DATABASE_URL must point at PostgreSQL; the in-memory store lives inside the server".into());
    }

    let db = DatabaseService::new(&config.database).await?;
    db.init_schema().await?;
    let repo: Arc<dyn Repository> = Arc::new(db);

    let users = UserService::new(repo, Arc::new(AuthService::new(config.auth)));
    let user = users
        .create_user(&args.username, &args.email, &args.password, args.staff)
        .await
        .map_err(describe)?;
    if args.inactive {
        users.set_active(user.id, false).await.map_err(describe)?;
    }

    log::info!("Created user {} with id {}", user, user.id);
    Ok(())
}
