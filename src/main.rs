mod database;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod utils;

use std::{env, sync::Arc};

use axum::{
    routing::{delete, get, post},
    Router,
};
use dotenvy::dotenv;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use database::{create_database_pool, Database};
use services::notify::{Dispatcher, LogMailer};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub dispatcher: Arc<Dispatcher>,
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    // Initialize database
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let db = create_database_pool(&database_url)
        .await
        .expect("Failed to connect to database");

    let state = AppState {
        dispatcher: Arc::new(Dispatcher::new(db.clone(), Box::new(LogMailer))),
        db,
    };

    // Build the application router
    let app = create_router(state);

    // Get port from environment or use default
    let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);

    println!("🚀 Tally server starting on http://{}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn create_router(state: AppState) -> Router {
    Router::new()
        // Auth
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/logout", post(handlers::auth::logout))
        // Dashboard
        .route("/dashboard", get(handlers::dashboard))
        // Reports
        .route(
            "/reports",
            get(handlers::reports::list_reports).post(handlers::reports::create_report),
        )
        .route(
            "/reports/:id",
            get(handlers::reports::report_detail).delete(handlers::reports::delete_report),
        )
        .route("/reports/:id/submit", post(handlers::reports::submit_report))
        .route(
            "/reports/:id/expenses",
            post(handlers::reports::add_expenses).delete(handlers::reports::remove_expenses),
        )
        .route(
            "/reports/:id/history",
            get(handlers::reports::report_history).post(handlers::reports::annotate_report),
        )
        // Admin report workflow
        .route("/admin/reports", get(handlers::admin::list_reports))
        .route("/admin/reports/:id/approve", post(handlers::admin::approve_report))
        .route("/admin/reports/:id/reject", post(handlers::admin::reject_report))
        .route(
            "/admin/reports/:id/reimburse",
            post(handlers::admin::reimburse_report),
        )
        .route("/admin/reports/bulk-approve", post(handlers::admin::bulk_approve))
        .route("/admin/reports/bulk-reject", post(handlers::admin::bulk_reject))
        .route(
            "/admin/reports/bulk-reimburse",
            post(handlers::admin::bulk_reimburse),
        )
        .route("/admin/reports/:id/history", get(handlers::admin::report_history))
        .route("/admin/announcements", post(handlers::admin::broadcast))
        // Expenses
        .route(
            "/expenses",
            get(handlers::expenses::list_expenses).post(handlers::expenses::create_expense),
        )
        .route(
            "/expenses/:id",
            get(handlers::expenses::expense_detail)
                .put(handlers::expenses::update_expense)
                .delete(handlers::expenses::delete_expense),
        )
        .route(
            "/expenses/:id/history",
            get(handlers::expenses::expense_history).post(handlers::expenses::annotate_expense),
        )
        // Notifications
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route("/notifications/:id/read", post(handlers::notifications::mark_read))
        .route(
            "/notifications/:id",
            delete(handlers::notifications::delete_notification),
        )
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CookieManagerLayer::new())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
