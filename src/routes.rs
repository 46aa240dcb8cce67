use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use log::{error, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::MarketError;
use crate::listings::{NewListing, PriceChange};
use crate::models::{CommentId, Identity, ListingId};
use crate::server::Server;

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    listing_id: Option<ListingId>,
    #[serde(default)]
    quantity: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentRequest {
    listing_id: ListingId,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    reply: String,
}

/// Every HTTP and websocket route, with CORS and JSON error replies.
pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static {
    let cors = cors(&server.config.allowed_origins);
    let static_files = warp::fs::dir(server.config.static_dir.clone());

    api(server.clone())
        .or(ws_route(server))
        .or(static_files)
        .recover(handle_rejection)
        .with(cors)
}

pub fn api(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_server(server.clone()))
        .and_then(health_handler);

    let place_order = warp::path!("api" / "orders")
        .and(warp::post())
        .and(with_caller(server.clone()))
        .and(json_body())
        .and(with_server(server.clone()))
        .and_then(place_order_handler);

    let my_orders = warp::path!("api" / "orders" / "mine")
        .and(warp::get())
        .and(with_caller(server.clone()))
        .and(with_server(server.clone()))
        .and_then(my_orders_handler);

    let list_listings = warp::path!("api" / "listings")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_server(server.clone()))
        .and_then(list_listings_handler);

    let my_listings = warp::path!("api" / "listings" / "mine")
        .and(warp::get())
        .and(with_caller(server.clone()))
        .and(with_server(server.clone()))
        .and_then(my_listings_handler);

    let create_listing = warp::path!("api" / "listings")
        .and(warp::post())
        .and(with_caller(server.clone()))
        .and(json_body())
        .and(with_server(server.clone()))
        .and_then(create_listing_handler);

    let toggle_listing = warp::path!("api" / "listings" / ListingId / "toggle")
        .and(warp::patch())
        .and(with_caller(server.clone()))
        .and(with_server(server.clone()))
        .and_then(toggle_listing_handler);

    let reprice_listing = warp::path!("api" / "listings" / ListingId / "price")
        .and(warp::patch())
        .and(with_caller(server.clone()))
        .and(json_body())
        .and(with_server(server.clone()))
        .and_then(reprice_listing_handler);

    let delete_listing = warp::path!("api" / "listings" / ListingId)
        .and(warp::delete())
        .and(with_caller(server.clone()))
        .and(with_server(server.clone()))
        .and_then(delete_listing_handler);

    let add_comment = warp::path!("api" / "comments")
        .and(warp::post())
        .and(with_caller(server.clone()))
        .and(json_body())
        .and(with_server(server.clone()))
        .and_then(add_comment_handler);

    let listing_comments = warp::path!("api" / "comments" / "listing" / ListingId)
        .and(warp::get())
        .and(with_server(server.clone()))
        .and_then(listing_comments_handler);

    let reply_comment = warp::path!("api" / "comments" / CommentId / "reply")
        .and(warp::patch())
        .and(with_caller(server.clone()))
        .and(json_body())
        .and(with_server(server))
        .and_then(reply_comment_handler);

    health
        .or(place_order)
        .or(my_orders)
        .or(my_listings)
        .or(list_listings)
        .or(create_listing)
        .or(toggle_listing)
        .or(reprice_listing)
        .or(delete_listing)
        .or(add_comment)
        .or(listing_comments)
        .or(reply_comment)
}

fn ws_route(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = server.clone();
            ws.on_upgrade(move |socket| server.handle_connection(socket))
        })
}

fn cors(allowed_origins: &[String]) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"]);

    if allowed_origins.is_empty() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(allowed_origins.iter().map(String::as_str))
    }
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn with_server(
    server: Arc<Server>,
) -> impl Filter<Extract = (Arc<Server>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

/// Resolves the bearer token to the caller's identity or rejects with 401.
fn with_caller(
    server: Arc<Server>,
) -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_server(server))
        .and_then(|header: Option<String>, server: Arc<Server>| async move {
            server
                .authenticate(header.as_deref())
                .await
                .map_err(warp::reject::custom)
        })
}

fn reply_json<T: serde::Serialize>(
    result: Result<T, MarketError>,
) -> Result<warp::reply::Json, Rejection> {
    result
        .map(|value| warp::reply::json(&value))
        .map_err(warp::reject::custom)
}

async fn health_handler(server: Arc<Server>) -> Result<impl Reply, Rejection> {
    let connections = server.registry.connection_count().await;
    Ok(warp::reply::json(&json!({ "status": "ok", "connections": connections })))
}

async fn place_order_handler(
    caller: Identity,
    request: OrderRequest,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    let Some(listing_id) = request.listing_id else {
        return Err(warp::reject::custom(MarketError::validation(
            "Listing and quantity are required",
        )));
    };
    reply_json(
        server
            .orders
            .place_order(&caller.id, &listing_id, &request.quantity)
            .await,
    )
}

async fn my_orders_handler(caller: Identity, server: Arc<Server>) -> Result<impl Reply, Rejection> {
    reply_json(server.orders.orders_for(&caller).await)
}

async fn list_listings_handler(
    query: HashMap<String, String>,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    let limit = query
        .get("limit")
        .and_then(|limit| limit.parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(server.config.listing_page_limit);
    reply_json(server.listings.active(limit).await)
}

async fn my_listings_handler(caller: Identity, server: Arc<Server>) -> Result<impl Reply, Rejection> {
    reply_json(server.listings.mine(&caller).await)
}

async fn create_listing_handler(
    caller: Identity,
    draft: NewListing,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    reply_json(server.listings.create(&caller, draft).await)
}

async fn toggle_listing_handler(
    id: ListingId,
    caller: Identity,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    reply_json(server.listings.toggle(&caller, &id).await)
}

async fn reprice_listing_handler(
    id: ListingId,
    caller: Identity,
    change: PriceChange,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    reply_json(server.listings.reprice(&caller, &id, change).await)
}

async fn delete_listing_handler(
    id: ListingId,
    caller: Identity,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    reply_json(
        server
            .listings
            .delete(&caller, &id)
            .await
            .map(|()| json!({ "message": "Listing deleted" })),
    )
}

async fn add_comment_handler(
    caller: Identity,
    request: CommentRequest,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    reply_json(
        server
            .comments
            .add(&caller, &request.listing_id, &request.text)
            .await,
    )
}

async fn listing_comments_handler(
    id: ListingId,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    reply_json(server.comments.for_listing(&id).await)
}

async fn reply_comment_handler(
    id: CommentId,
    caller: Identity,
    request: ReplyRequest,
    server: Arc<Server>,
) -> Result<impl Reply, Rejection> {
    reply_json(server.comments.reply(&caller, &id, &request.reply).await)
}

/// Turns rejections into `{ "message": .. }` bodies.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<MarketError>() {
        match e {
            MarketError::Internal(source) => error!("Request failed: {source}"),
            other => warn!("Request refused: {other}"),
        }
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        warn!("Bad request body: {e}");
        (StatusCode::BAD_REQUEST, "Invalid request body".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "message": message })),
        status,
    ))
}
