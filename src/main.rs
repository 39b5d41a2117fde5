use clap::Parser;
use miette::Result;
use stockroom::authz::Enforcer;
use stockroom::settings::Settings;
use stockroom::{storage, user_sync, web};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "stockroom", version, about = "Inventory API with role-based access control")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let db = storage::init(&settings.database).await?;

    // a broken policy file leaves the enforcer denying everything
    let enforcer = Enforcer::from_file(&settings.authz.policy_path);
    if !enforcer.is_available() {
        tracing::error!(
            path = %settings.authz.policy_path.display(),
            "Policies failed to load, all requests will be denied until reloaded"
        );
    }

    if let Some(users_file) = &settings.users_file {
        user_sync::sync_users_from_file(&db, &enforcer.mutator(), users_file).await?;
    }

    if settings.authz.bootstrap_admin
        && user_sync::ensure_admin(&db, &enforcer, &settings.auth.admin_password).await?
    {
        tracing::warn!(
            username = user_sync::ADMIN_USER,
            "Granted full access to the admin user, change its password"
        );
    }

    web::serve(web::AppState::new(settings, db, enforcer)).await
}
