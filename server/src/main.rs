use std::net::SocketAddr;
use tokio::net::TcpListener;

use timeline_server::config::{generate_config_template, Config};
use timeline_server::{admin, auth, db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("timeline_server=info"))?;
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("Timeline server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate session signing key (256-bit random, stored in data_dir)
    let session_secret = auth::session::load_or_generate_session_secret(&config.data_dir)?;

    let upload_dir = config.upload_path();
    let backup_dir = config.backup_path();
    std::fs::create_dir_all(&upload_dir)?;
    std::fs::create_dir_all(&backup_dir)?;

    // Check for first-boot setup token
    match admin::setup::maybe_generate_setup_token(&db)? {
        Some(token) => {
            tracing::info!("==========================================================");
            tracing::info!("  FIRST BOOT: No users registered yet.");
            tracing::info!("  Setup token: {}", token);
            tracing::info!("  Register with this token to become the administrator.");
            tracing::info!("==========================================================");
        }
        None => {
            tracing::info!("Server has existing users, setup complete");
        }
    }

    let app_state = state::AppState {
        db,
        session_secret,
        session_ttl_hours: config.session_ttl_hours,
        secure_cookies: config.secure_cookies,
        upload_dir,
        backup_dir,
        max_upload_bytes: config.max_upload_bytes(),
        auth_burst: config.auth_burst,
    };

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
