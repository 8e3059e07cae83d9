use std::sync::Arc;
use warp::Filter;

use crate::engine::GameEngine;
use crate::websocket::ConnectionManager;

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod kv;
pub mod metrics;
pub mod store;
pub mod timer;
pub mod websocket;

pub fn create_routes(
    connections: Arc<ConnectionManager>,
    engine: Arc<GameEngine>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let connections_filter = warp::any().map({
        let connections = connections.clone();
        move || connections.clone()
    });

    let engine_filter = warp::any().map({
        let engine = engine.clone();
        move || engine.clone()
    });

    // WebSocket endpoint
    let ws = warp::path("ws")
        .and(warp::ws())
        .and(connections_filter)
        .and(engine_filter)
        .map(|ws: warp::ws::Ws, connections, engine| {
            ws.on_upgrade(move |socket| websocket::handle_connection(socket, connections, engine))
        });

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET"]);

    ws.or(health).with(cors).with(warp::log("word_chain"))
}
