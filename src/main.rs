// src/main.rs

mod app_state;
mod assignment;
mod auth;
mod config;
mod errors;
mod lifecycle;
mod models;
mod notifications;
mod queries;
mod store;
mod task_api;
mod task_feed;

use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::info;

use crate::app_state::AppState;
use crate::auth::{login, signup, Authentication};
use crate::notifications::MongoNotificationSink;
use crate::store::{MongoDB, MongoTaskStore};
use crate::task_api::{
    accept, action, apply, create_task, get_task, list_tasks, open_feed, task_stats,
};
use crate::task_feed::{ws_index, TaskFeedServer};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let mongodb = Arc::new(MongoDB::init(&config.mongo_uri, &config.database_name).await);
    let store = Arc::new(MongoTaskStore::new(&mongodb));
    let notifications = Arc::new(MongoNotificationSink::new(mongodb.db.clone()));
    let task_feed = TaskFeedServer::new().start();

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS origin: {}", config.frontend_origin);

    let bind_addr = config.bind_addr.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(config.jwt_secret.clone()))
            .app_data(web::Data::new(AppState {
                store: store.clone(),
                notifications: notifications.clone(),
                task_feed: task_feed.clone(),
                mongodb: mongodb.clone(),
                config: config.clone(),
            }))
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login)),
            )
            // TASKS
            .service(
                web::scope("/tasks")
                    .route("", web::post().to(create_task))
                    .route("", web::get().to(list_tasks))
                    .route("/open", web::get().to(open_feed))
                    .route("/stats", web::get().to(task_stats))
                    .route("/{task_id}", web::get().to(get_task))
                    .route("/{task_id}/accept", web::post().to(accept))
                    .route("/{task_id}/apply", web::post().to(apply))
                    .route("/{task_id}/actions", web::post().to(action)),
            )
            // WEBSOCKET route for the real-time task feed
            .service(web::resource("/ws").route(web::get().to(ws_index)))
    })
    .bind(bind_addr)?
    .run()
    .await
}
