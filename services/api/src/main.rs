use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use api::auth::AuthService;
use api::chat::ChatService;
use api::jwt::{JwtConfig, JwtService};
use api::llm::{LlmConfig, LlmService};
use api::oauth::OAuthRegistry;
use api::rate_limit::RateLimiter;
use api::repositories::{ConversationRepository, SubscriptionRepository, UserRepository};
use api::routes;
use api::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting converse API service");

    // Initialize database connection pool
    let db_config = common::database::DatabaseConfig::from_env()?;
    let pool = common::database::init_pool(&db_config).await?;

    sqlx::migrate!().run(&pool).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // Initialize services
    let jwt_service = JwtService::new(&JwtConfig::from_env()?);
    let llm_service = LlmService::new(LlmConfig::from_env()?);
    let oauth = OAuthRegistry::from_env()?;

    let user_repository = UserRepository::new(pool.clone());
    let subscription_repository = SubscriptionRepository::new(pool.clone());
    let conversation_repository = ConversationRepository::new(pool.clone());
    let rate_limiter = RateLimiter::new(pool.clone());

    let auth_service = AuthService::new(user_repository.clone(), jwt_service.clone());
    let chat_service = ChatService::new(
        conversation_repository.clone(),
        llm_service,
        rate_limiter,
    );

    let app_url = std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

    let app_state = AppState {
        db_pool: pool,
        jwt_service,
        auth_service,
        chat_service,
        user_repository,
        subscription_repository,
        conversation_repository,
        oauth,
        app_url,
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let bind_addr = std::env::var("APP_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("API service listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
