//! End-to-end tests for the Regusto client.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p regusto-integration-tests
//! ```
//!
//! Every test starts a [`MockBackend`]: an in-process `axum` server speaking
//! the marketplace REST surface, plus an in-memory realtime hub that the
//! backend's publish endpoint relays to. Clients built with
//! [`MockBackend::client`] are signed in and wired to both.
//!
//! # Test Categories
//!
//! - `favorites` - optimistic flips and rollback
//! - `cart` - merge-by-instance and stock checks
//! - `orders` - non-optimistic placement and payment
//! - `ratings` - one-shot order ratings
//! - `chat` - per-order realtime channels
//! - `addresses` - optimistic edits and non-optimistic deletes
//! - `profile` - profile edits and in-band rejection
//! - `session` - token refresh and forced logout

#![allow(clippy::missing_panics_doc, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use regusto_client::{ClientConfig, ClientContext, MemoryConnector, MemorySessionStore};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::Notify;

/// Backend data and knobs. Tests seed and inspect it through
/// [`MockBackend::with_state`].
#[derive(Default)]
pub struct BackendState {
    pub stores: Vec<Value>,
    pub favorites: Vec<Value>,
    pub cart: Vec<Value>,
    pub orders: Vec<Value>,
    pub messages: HashMap<String, Vec<Value>>,
    pub addresses: Vec<Value>,
    /// Id of the active delivery address.
    pub active_address: Option<String>,
    pub profile: Option<Value>,

    /// Status returned by the store favorite endpoint instead of success.
    pub favorite_failure: Option<u16>,
    /// Status returned by `POST /orders` instead of success.
    pub order_failure: Option<u16>,
    /// Status returned by address edits, selection and deletion.
    pub address_failure: Option<u16>,
    /// Body returned by `PATCH /user/{id}` instead of `{"success": true}`.
    pub profile_reply: Option<Value>,
    /// When set, favorite requests wait for a notification before answering.
    pub favorite_gate: Option<Arc<Notify>>,
    /// When set, order requests wait for a notification before answering.
    pub order_gate: Option<Arc<Notify>>,
    /// When set, address edits and deletes wait for a notification.
    pub address_gate: Option<Arc<Notify>>,
    /// Every request answers 401 and refresh is refused.
    pub revoked: bool,

    pub favorite_calls: usize,
    /// Store favorite requests as `(store id, favorite)`.
    pub favorite_requests: Vec<(String, bool)>,
    /// Address edits and deletes received, counted before the gate.
    pub address_attempts: usize,
    pub profile_updates: Vec<Value>,
    /// Order requests received, counted before the gate.
    pub order_attempts: usize,
    pub cart_patches: Vec<Value>,
    pub order_posts: Vec<Value>,
    pub preferences: Vec<Value>,
    pub ratings: Vec<Value>,
    next_order_id: u64,
    next_address_id: u64,
}

#[derive(Clone)]
struct Backend {
    state: Arc<Mutex<BackendState>>,
    hub: MemoryConnector,
}

impl Backend {
    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self) -> Result<(), Response> {
        if self.lock().revoked {
            return Err(StatusCode::UNAUTHORIZED.into_response());
        }
        Ok(())
    }
}

/// A running mock backend.
pub struct MockBackend {
    pub url: String,
    backend: Backend,
}

impl MockBackend {
    /// Bind an ephemeral port and serve the backend on it.
    pub async fn start() -> Self {
        let backend = Backend {
            state: Arc::new(Mutex::new(BackendState {
                next_order_id: 1000,
                ..BackendState::default()
            })),
            hub: MemoryConnector::new(),
        };

        let router = Router::new()
            .route("/api/auth/signin", post(sign_in))
            .route("/api/auth/refresh", post(refresh))
            .route("/api/commerce", get(list_stores))
            .route(
                "/api/commerce/{id}/favorite",
                post(add_favorite).delete(remove_favorite),
            )
            .route("/api/favorite/commerce", get(list_favorites))
            .route("/api/shop_cart", get(get_cart).patch(patch_cart))
            .route("/api/orders", get(list_orders).post(create_order))
            .route("/api/orders/{id}", get(get_order))
            .route("/api/payment/createpreference", post(create_preference))
            .route("/api/rating/{id}", post(rate_order))
            .route("/api/user/{id}", get(get_user).patch(patch_user))
            .route("/api/user/{id}/nearCommerce", post(list_nearby_stores))
            .route("/api/user/{id}/activeaddress", get(get_active_address))
            .route(
                "/api/user/{id}/addresses",
                get(list_addresses).post(create_address),
            )
            .route(
                "/api/user/{id}/addresses/{address}",
                post(select_address)
                    .patch(update_address)
                    .delete(delete_address),
            )
            .route("/pusher/messages", get(list_messages))
            .route("/pusher/trigger", post(trigger))
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve mock backend");
        });

        Self {
            url: format!("http://{addr}"),
            backend,
        }
    }

    /// Read or change the backend state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        f(&mut self.backend.lock())
    }

    /// The realtime hub the backend publishes to.
    #[must_use]
    pub fn hub(&self) -> MemoryConnector {
        self.backend.hub.clone()
    }

    /// A fresh client, signed in, with realtime over the backend's hub.
    pub async fn client(&self) -> ClientContext {
        let ctx = ClientContext::with_parts(
            ClientConfig::new(self.url.clone()),
            Arc::new(MemorySessionStore::new()),
            Some(Arc::new(self.hub())),
        )
        .expect("client context");
        ctx.sign_in("ana@example.com", &SecretString::from("secret"))
            .await
            .expect("sign in");
        ctx
    }
}

/// Poll `check` until it holds. Panics after five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Fixtures
// =============================================================================

#[must_use]
pub fn store(id: &str, name: &str, favorite: bool) -> Value {
    json!({ "id": id, "name": name, "category": "bakery", "isFavorite": favorite })
}

/// A cart line for a product instance.
#[must_use]
pub fn cart_line(instance: &str, name: &str, price: f64, quantity: u32) -> Value {
    json!({ "product_instance": instance, "name": name, "price": price, "quantity": quantity })
}

#[must_use]
pub fn address(id: &str, data: &str) -> Value {
    json!({ "id": id, "longitude": -58.38, "latitude": -34.6, "data": data })
}

#[must_use]
pub fn order(id: &str, status: &str) -> Value {
    json!({
        "order_id": id,
        "commerce_id": "42",
        "created_at": "2026-03-01T12:00:00Z",
        "price": 12.5,
        "status": status,
        "products": [],
    })
}

// =============================================================================
// Handlers
// =============================================================================

fn id_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn status_response(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, "scripted failure").into_response()
}

async fn sign_in() -> Json<Value> {
    Json(json!({ "jwt": "token-1", "refreshToken": "refresh-1", "user": { "id": 1 } }))
}

async fn refresh(State(backend): State<Backend>) -> Response {
    if let Err(denied) = backend.authorize() {
        return denied;
    }
    Json(json!({ "jwt": "token-2" })).into_response()
}

async fn list_stores(State(backend): State<Backend>) -> Response {
    if let Err(denied) = backend.authorize() {
        return denied;
    }
    Json(backend.lock().stores.clone()).into_response()
}

async fn list_favorites(State(backend): State<Backend>) -> Json<Vec<Value>> {
    Json(backend.lock().favorites.clone())
}

async fn add_favorite(State(backend): State<Backend>, Path(id): Path<String>) -> Response {
    set_favorite(backend, id, true).await
}

async fn remove_favorite(State(backend): State<Backend>, Path(id): Path<String>) -> Response {
    set_favorite(backend, id, false).await
}

async fn set_favorite(backend: Backend, id: String, favorite: bool) -> Response {
    let gate = backend.lock().favorite_gate.clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }

    let mut state = backend.lock();
    state.favorite_calls += 1;
    state.favorite_requests.push((id.clone(), favorite));
    if let Some(status) = state.favorite_failure {
        return status_response(status);
    }
    for store in &mut state.stores {
        if id_of(&store["id"]) == id {
            store["isFavorite"] = json!(favorite);
        }
    }
    state.favorites.retain(|f| id_of(&f["commerce_id"]) != id);
    if favorite {
        state.favorites.push(json!({ "commerce_id": id }));
    }
    StatusCode::OK.into_response()
}

async fn get_cart(State(backend): State<Backend>) -> Json<Vec<Value>> {
    Json(backend.lock().cart.clone())
}

async fn patch_cart(State(backend): State<Backend>, Json(body): Json<Value>) -> StatusCode {
    let mut state = backend.lock();
    state.cart = body["products"].as_array().cloned().unwrap_or_default();
    state.cart_patches.push(body);
    StatusCode::OK
}

async fn list_orders(State(backend): State<Backend>) -> Response {
    if let Err(denied) = backend.authorize() {
        return denied;
    }
    Json(backend.lock().orders.clone()).into_response()
}

async fn get_order(State(backend): State<Backend>, Path(id): Path<String>) -> Response {
    backend
        .lock()
        .orders
        .iter()
        .find(|o| id_of(&o["order_id"]) == id)
        .cloned()
        .map_or_else(
            || StatusCode::NOT_FOUND.into_response(),
            |o| Json(o).into_response(),
        )
}

async fn create_order(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let gate = {
        let mut state = backend.lock();
        state.order_attempts += 1;
        state.order_gate.clone()
    };
    if let Some(gate) = gate {
        gate.notified().await;
    }

    let mut state = backend.lock();
    state.order_posts.push(body);
    if let Some(status) = state.order_failure {
        return status_response(status);
    }
    state.next_order_id += 1;
    let id = state.next_order_id.to_string();
    state.orders.push(order(&id, "pending"));
    Json(json!({ "order_id": id })).into_response()
}

async fn create_preference(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    let init_point = format!("https://pay.example/checkout/{}", id_of(&body["order"]));
    backend.lock().preferences.push(body);
    Json(json!({ "init_point": init_point }))
}

async fn rate_order(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    Json(mut body): Json<Value>,
) -> StatusCode {
    let mut state = backend.lock();
    for order in &mut state.orders {
        if id_of(&order["order_id"]) == id {
            order["rating"] = json!("rated");
        }
    }
    body["order_id"] = json!(id);
    state.ratings.push(body);
    StatusCode::CREATED
}

async fn list_messages(
    State(backend): State<Backend>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let channel = params.get("channel").cloned().unwrap_or_default();
    Json(backend.lock().messages.get(&channel).cloned().unwrap_or_default())
}

async fn trigger(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let (Some(channel), Some(event)) = (body["channel"].as_str(), body["event"].as_str()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let data = body["data"].clone();
    backend
        .lock()
        .messages
        .entry(channel.to_string())
        .or_default()
        .push(data.clone());
    backend.hub.publish(channel, event, data);
    Json(json!({ "ok": true })).into_response()
}

async fn list_nearby_stores(State(backend): State<Backend>) -> Json<Vec<Value>> {
    Json(backend.lock().stores.clone())
}

async fn get_user(State(backend): State<Backend>) -> Response {
    backend.lock().profile.clone().map_or_else(
        || StatusCode::NOT_FOUND.into_response(),
        |profile| Json(json!([profile])).into_response(),
    )
}

async fn patch_user(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = backend.lock();
    state.profile_updates.push(body.clone());
    if let Some(reply) = state.profile_reply.clone() {
        return Json(reply);
    }
    if let (Some(Value::Object(profile)), Value::Object(changes)) = (state.profile.as_mut(), body) {
        profile.extend(changes);
    }
    Json(json!({ "success": true }))
}

async fn list_addresses(State(backend): State<Backend>) -> Json<Vec<Value>> {
    Json(backend.lock().addresses.clone())
}

async fn create_address(State(backend): State<Backend>, Json(mut body): Json<Value>) -> Json<Value> {
    let mut state = backend.lock();
    state.next_address_id += 1;
    body["id"] = json!(state.next_address_id.to_string());
    state.addresses.push(body.clone());
    Json(body)
}

async fn get_active_address(State(backend): State<Backend>) -> Json<Value> {
    let state = backend.lock();
    let active = state.active_address.as_ref().and_then(|id| {
        state.addresses.iter().find(|a| id_of(&a["id"]) == *id)
    });
    Json(active.map_or(Value::Null, |a| {
        json!({
            "address": {
                "id": a["id"],
                "longitude": a["longitude"],
                "latitude": a["latitude"],
                "data": a["data"],
            },
            "description": a.get("description"),
            "floor_number": a.get("floor_number"),
        })
    }))
}

/// Count an address edit, then wait on the gate if one is set.
async fn address_gate(backend: &Backend) {
    let gate = {
        let mut state = backend.lock();
        state.address_attempts += 1;
        state.address_gate.clone()
    };
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

async fn select_address(
    State(backend): State<Backend>,
    Path((_, id)): Path<(String, String)>,
) -> Response {
    let mut state = backend.lock();
    if let Some(status) = state.address_failure {
        return status_response(status);
    }
    state.active_address = Some(id);
    StatusCode::OK.into_response()
}

async fn update_address(
    State(backend): State<Backend>,
    Path((_, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    address_gate(&backend).await;
    let mut state = backend.lock();
    if let Some(status) = state.address_failure {
        return status_response(status);
    }
    for address in &mut state.addresses {
        if id_of(&address["id"]) == id {
            address.clone_from(&body);
        }
    }
    StatusCode::OK.into_response()
}

async fn delete_address(
    State(backend): State<Backend>,
    Path((_, id)): Path<(String, String)>,
) -> Response {
    address_gate(&backend).await;
    let mut state = backend.lock();
    if let Some(status) = state.address_failure {
        return status_response(status);
    }
    state.addresses.retain(|a| id_of(&a["id"]) != id);
    if state.active_address.as_deref() == Some(id.as_str()) {
        state.active_address = None;
    }
    StatusCode::OK.into_response()
}
