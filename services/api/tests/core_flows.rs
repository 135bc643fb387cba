//! End-to-end tests for the credential/token service and the rate limiter
//!
//! These run against a real Postgres and are skipped when
//! `TEST_DATABASE_URL` is not set. Every test works on its own users and
//! plans, so the suite can run in parallel and repeatedly against the same
//! database.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use uuid::Uuid;

use api::auth::AuthService;
use api::error::{ApiError, LimitWindow};
use api::jwt::{JwtConfig, JwtService};
use api::models::RegisterRequest;
use api::rate_limit::RateLimiter;
use api::repositories::{SubscriptionRepository, UserRepository};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to run migrations");

    Some(pool)
}

fn jwt_service() -> JwtService {
    JwtService::new(&JwtConfig {
        secret: "integration-test-secret".to_string(),
        access_token_expiry: 1800,
    })
}

fn auth_service(pool: &PgPool) -> AuthService {
    AuthService::new(UserRepository::new(pool.clone()), jwt_service())
}

fn unique_register() -> RegisterRequest {
    let tag = Uuid::new_v4().simple().to_string();
    RegisterRequest {
        email: format!("user.{}@example.com", &tag[..12]),
        username: format!("user_{}", &tag[..12]),
        password: "a sufficiently long password".to_string(),
    }
}

/// A user created directly, bypassing registration, so tests can attach
/// their own plan
async fn bare_user(pool: &PgPool) -> Uuid {
    let tag = Uuid::new_v4().simple().to_string();
    let row = sqlx::query(
        "INSERT INTO users (email, username) VALUES ($1, $2) RETURNING id",
    )
    .bind(format!("bare.{}@example.com", &tag[..12]))
    .bind(format!("bare_{}", &tag[..12]))
    .fetch_one(pool)
    .await
    .expect("failed to insert user");
    row.get("id")
}

async fn give_plan(pool: &PgPool, user_id: Uuid, per_minute: i32, per_day: i32) {
    let tag = Uuid::new_v4().simple().to_string();
    let row = sqlx::query(
        r#"
        INSERT INTO subscription_plans (name, requests_per_minute, requests_per_day, price)
        VALUES ($1, $2, $3, 0.00)
        RETURNING id
        "#,
    )
    .bind(format!("test_plan_{}", &tag[..12]))
    .bind(per_minute)
    .bind(per_day)
    .fetch_one(pool)
    .await
    .expect("failed to insert plan");
    let plan_id: i64 = row.get("id");

    sqlx::query(
        r#"
        INSERT INTO user_subscriptions (user_id, plan_id, start_date, active)
        VALUES ($1, $2, now(), TRUE)
        "#,
    )
    .bind(user_id)
    .bind(plan_id)
    .execute(pool)
    .await
    .expect("failed to insert subscription");
}

/// A fixed future instant so injected clocks always sit after the
/// subscriptions' start dates
fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn test_register_then_authenticate() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let auth = auth_service(&pool);
    let request = unique_register();

    let user = auth.register(&request).await.expect("registration failed");
    assert!(user.active);
    assert_eq!(user.email, request.email);

    let token = auth
        .authenticate(&request.email, &request.password, Utc::now())
        .await
        .expect("authentication failed");

    let claims = jwt_service()
        .validate_token(&token, Utc::now())
        .expect("token validation failed");
    assert_eq!(claims.sub, user.id);
}

#[tokio::test]
async fn test_email_lookup_is_case_insensitive() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let auth = auth_service(&pool);
    let request = unique_register();
    auth.register(&request).await.expect("registration failed");

    let shouting = request.email.to_uppercase();
    assert!(
        auth.authenticate(&shouting, &request.password, Utc::now())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_duplicate_identity_is_rejected() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let auth = auth_service(&pool);
    let request = unique_register();
    auth.register(&request).await.expect("registration failed");

    // Same email, fresh username
    let mut same_email = unique_register();
    same_email.email = request.email.clone();
    match auth.register(&same_email).await {
        Err(ApiError::DuplicateIdentity) => {}
        other => panic!("expected DuplicateIdentity, got {:?}", other.map(|u| u.id)),
    }

    // Same username, fresh email
    let mut same_username = unique_register();
    same_username.username = request.username.clone();
    match auth.register(&same_username).await {
        Err(ApiError::DuplicateIdentity) => {}
        other => panic!("expected DuplicateIdentity, got {:?}", other.map(|u| u.id)),
    }
}

#[tokio::test]
async fn test_failed_logins_are_indistinguishable() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let auth = auth_service(&pool);
    let request = unique_register();
    auth.register(&request).await.expect("registration failed");

    let wrong_password = auth
        .authenticate(&request.email, "not the password", Utc::now())
        .await
        .expect_err("wrong password must fail");
    let unknown_email = auth
        .authenticate("nobody@example.com", &request.password, Utc::now())
        .await
        .expect_err("unknown email must fail");

    // Identical kind and identical message
    assert!(matches!(wrong_password, ApiError::InvalidCredentials));
    assert!(matches!(unknown_email, ApiError::InvalidCredentials));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

#[tokio::test]
async fn test_inactive_user_cannot_authenticate() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let auth = auth_service(&pool);
    let request = unique_register();
    let user = auth.register(&request).await.expect("registration failed");

    sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
        .bind(user.id)
        .execute(&pool)
        .await
        .expect("failed to deactivate user");

    match auth
        .authenticate(&request.email, &request.password, Utc::now())
        .await
    {
        Err(ApiError::InvalidCredentials) => {}
        _ => panic!("expected InvalidCredentials for inactive account"),
    }
}

#[tokio::test]
async fn test_registration_creates_default_subscription() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let auth = auth_service(&pool);
    let user = auth
        .register(&unique_register())
        .await
        .expect("registration failed");

    let (subscription, plan) = SubscriptionRepository::new(pool.clone())
        .active_subscription(user.id, base_time())
        .await
        .expect("query failed")
        .expect("registration must create an active subscription");

    assert!(subscription.active);
    assert_eq!(plan.name, "Free");

    // A brand-new user has zero history and is always admitted
    RateLimiter::new(pool.clone())
        .check_and_record(user.id, base_time())
        .await
        .expect("fresh user must be admitted");
}

#[tokio::test]
async fn test_no_active_plan_is_reported() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let user = bare_user(&pool).await;

    match RateLimiter::new(pool.clone())
        .check_and_record(user, base_time())
        .await
    {
        Err(ApiError::NoActivePlan) => {}
        _ => panic!("expected NoActivePlan for user without subscription"),
    }
}

#[tokio::test]
async fn test_minute_window_admits_rejects_and_slides() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let user = bare_user(&pool).await;
    give_plan(&pool, user, 3, 1000).await;

    let limiter = RateLimiter::new(pool.clone());
    let base = base_time();

    // First three requests in the window go through
    for _ in 0..3 {
        limiter
            .check_and_record(user, base)
            .await
            .expect("request within quota must be admitted");
    }

    // The fourth inside the same window is rejected against the minute quota
    match limiter
        .check_and_record(user, base + chrono::Duration::seconds(30))
        .await
    {
        Err(ApiError::RateLimitExceeded {
            window: LimitWindow::Minute,
            limit: 3,
        }) => {}
        other => panic!("expected minute rejection, got {:?}", other),
    }

    // Once the window slides past the burst, requests are admitted again
    limiter
        .check_and_record(user, base + chrono::Duration::seconds(61))
        .await
        .expect("request after the window slid must be admitted");
}

#[tokio::test]
async fn test_day_window_is_independent_of_minute_window() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let user = bare_user(&pool).await;
    give_plan(&pool, user, 1000, 2).await;

    let limiter = RateLimiter::new(pool.clone());
    let base = base_time();

    // Spread far apart, so the minute quota never comes into play
    limiter.check_and_record(user, base).await.expect("admit");
    limiter
        .check_and_record(user, base + chrono::Duration::seconds(120))
        .await
        .expect("admit");

    match limiter
        .check_and_record(user, base + chrono::Duration::seconds(300))
        .await
    {
        Err(ApiError::RateLimitExceeded {
            window: LimitWindow::Day,
            limit: 2,
        }) => {}
        other => panic!("expected day rejection, got {:?}", other),
    }

    // A day after the first request, enough history has aged out
    limiter
        .check_and_record(user, base + chrono::Duration::seconds(86_401))
        .await
        .expect("request after the day window slid must be admitted");
}

#[tokio::test]
async fn test_concurrent_requests_never_over_admit() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    let user = bare_user(&pool).await;
    give_plan(&pool, user, 5, 1000).await;

    let limiter = RateLimiter::new(pool.clone());
    let now = base_time();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let limiter = limiter.clone();
        tasks.spawn(async move { limiter.check_and_record(user, now).await });
    }

    let mut admitted = 0;
    let mut rejected = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("task panicked") {
            Ok(()) => admitted += 1,
            Err(ApiError::RateLimitExceeded {
                window: LimitWindow::Minute,
                ..
            }) => rejected += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(admitted, 5, "exactly the remaining quota slots are admitted");
    assert_eq!(rejected, 3);

    // The log must contain exactly the admitted requests
    let row = sqlx::query("SELECT COUNT(*) AS count FROM request_logs WHERE user_id = $1")
        .bind(user)
        .fetch_one(&pool)
        .await
        .expect("count query failed");
    let count: i64 = row.get("count");
    assert_eq!(count, 5);
}
