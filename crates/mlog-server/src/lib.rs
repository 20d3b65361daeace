pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod monitor;
pub mod routes;
pub mod validation;
pub mod wordlist;
pub mod ws;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use config::Settings;
use db::MissionDb;
use generator::MissionGenerator;
use monitor::ActivityMonitor;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared state handed to every handler.
pub struct AppState {
    pub db: MissionDb,
    pub settings: Arc<Settings>,
    pub events: broadcast::Sender<String>,
    pub generator: MissionGenerator,
    pub monitor: ActivityMonitor,
}

impl AppState {
    pub fn new(db: MissionDb, settings: Settings) -> Arc<Self> {
        let settings = Arc::new(settings);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let generator =
            MissionGenerator::new(db.clone(), events.clone(), settings.generation_interval());
        let monitor = ActivityMonitor::new(db.clone(), settings.monitor.clone());
        Arc::new(AppState {
            db,
            settings,
            events,
            generator,
            monitor,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let mission_routes = Router::new()
        .route(
            "/",
            get(routes::missions::list_missions).post(routes::missions::create_mission),
        )
        .route(
            "/{id}",
            get(routes::missions::get_mission)
                .put(routes::missions::update_mission)
                .patch(routes::missions::patch_mission)
                .delete(routes::missions::delete_mission),
        )
        .route("/{id}/crew", post(routes::missions::assign_crew))
        .route(
            "/{mission_id}/crew/{crew_member_id}",
            delete(routes::missions::unassign_crew),
        );

    let crew_routes = Router::new()
        .route(
            "/",
            get(routes::crew::list_crew).post(routes::crew::create_crew),
        )
        .route(
            "/{id}",
            get(routes::crew::get_crew)
                .put(routes::crew::update_crew)
                .delete(routes::crew::delete_crew),
        );

    let admin_routes = Router::new()
        .route(
            "/monitored",
            get(routes::users::list_monitored).post(routes::users::add_monitored),
        )
        .layer(middleware::from_fn(auth::require_admin));

    let two_factor_routes = Router::new()
        .route("/2fa/setup", post(routes::users::setup_two_factor))
        .route("/2fa/verify", post(routes::users::verify_two_factor))
        .route("/2fa/disable", post(routes::users::disable_two_factor))
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let user_routes = Router::new()
        .route("/register", post(routes::users::register))
        .route("/login", post(routes::users::login))
        .merge(two_factor_routes);

    let statistics_routes = Router::new()
        .route(
            "/mission-success-by-nationality",
            get(routes::statistics::mission_success_by_nationality),
        )
        .route(
            "/mission-budget-stats",
            get(routes::statistics::mission_budget_stats),
        );

    let api_router = Router::new()
        .route("/health", get(routes::health))
        .route("/events", get(ws::ws_handler))
        .route("/generation/start", post(routes::start_generation))
        .route("/generation/stop", post(routes::stop_generation))
        .route("/upload", post(routes::upload::upload_file))
        .nest("/missions", mission_routes)
        .nest("/crew", crew_routes)
        .nest("/users", user_routes)
        .nest("/statistics", statistics_routes);

    Router::new()
        .nest("/api", api_router)
        .layer(middleware::from_fn_with_state(
            state.settings.expose_error_details(),
            error::attach_error_details,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
