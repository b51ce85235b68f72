//! Business handlers, one per message type.
//!
//! Handlers never propagate errors across the dispatcher boundary: every
//! failure becomes a `ResponseError` frame and the connection keeps reading.
//! Codes follow the error taxonomy — 400 validation, 401/403 authorization,
//! 404 not found, 409 conflict, 500 persistence.

use chrono::Utc;
use tracing::{info, warn};

use crate::proto::{
    auth_response, connect_response, error_response, multicast_update, success_response, Frame,
    MessageType, Request, TicketKind, VehicleKind,
};
use crate::storage::models::{ConnectionRecord, User, Vehicle};
use crate::storage::{with_backoff, StorageError};
use crate::AppState;

use super::connection::ConnState;

/// What the connection loop does after a handler runs.
#[derive(Debug)]
pub enum Flow {
    Respond(Frame),
    Close,
}

/// Route one decoded frame to its handler.
pub async fn dispatch(state: &AppState, conn: &mut ConnState, frame: Frame) -> Flow {
    info!(
        kind = frame.kind().name(),
        connection = %conn.connection_id,
        "Process message"
    );

    let request = match Request::from_frame(&frame) {
        Ok(request) => request,
        Err(err) => return Flow::Respond(error_response(&err.message, 400)),
    };

    match request {
        Request::Connect { client_id } => handle_connect(&client_id),
        Request::Auth { urn } => handle_auth(state, conn, &urn).await,
        Request::RegisterUser {
            urn,
            name,
            age,
            pin_hash,
        } => handle_register_user(state, &urn, name, age, pin_hash).await,
        Request::RegisterDevice { uri, vehicle_kind } => {
            handle_register_device(state, &uri, vehicle_kind).await
        }
        Request::ReserveSeat {
            urn,
            uri,
            route,
            vehicle_kind,
        } => handle_reserve_seat(state, &urn, uri, route, vehicle_kind).await,
        Request::PurchaseTicket {
            session_id,
            urn,
            ticket_kind,
            vehicle_kind,
            route,
            uri,
            passengers,
        } => {
            handle_purchase_ticket(
                state,
                session_id,
                urn,
                ticket_kind,
                vehicle_kind,
                route,
                uri,
                passengers,
            )
            .await
        }
        Request::CreateGroup {
            group_name,
            leader_urn,
        } => handle_create_group(state, &group_name, &leader_urn).await,
        Request::AddGroupMember {
            session_id,
            group_name,
            urn,
        } => handle_add_group_member(state, &session_id, &group_name, &urn).await,
        Request::RemoveGroupMember {
            session_id,
            group_name,
            urn,
        } => handle_remove_group_member(state, &session_id, &group_name, &urn).await,
        Request::DeleteUser { urn, admin_approved } => {
            handle_delete_user(state, &urn, admin_approved).await
        }
        Request::UpdatePrice {
            vehicle_kind,
            ticket_kind,
            price_text,
        } => handle_update_price(state, vehicle_kind, ticket_kind, &price_text).await,
        Request::UpdateVehicle {
            uri,
            active,
            route,
            vehicle_kind,
        } => handle_update_vehicle(state, &uri, active, route, vehicle_kind).await,
        Request::UpdateCapacity {
            uri,
            capacity,
            available_seats,
        } => handle_update_capacity(state, &uri, capacity, available_seats).await,
        Request::Heartbeat => Flow::Respond(success_response("Heartbeat acknowledged", [])),
        Request::Disconnect => {
            if let Some(token) = conn.session_token.take() {
                state.sessions.remove(&token);
            }
            Flow::Close
        }
        Request::Unsupported(kind) => {
            warn!(kind = kind.name(), "Unsupported message type");
            let message = if kind == MessageType::UpdatePriceListLegacy {
                "Legacy message type not supported"
            } else {
                "Unknown message type"
            };
            Flow::Respond(error_response(message, 400))
        }
    }
}

// ============================================================================
// Connection & authentication
// ============================================================================

fn handle_connect(client_id: &str) -> Flow {
    info!(client_id = %client_id, "Connection established");
    Flow::Respond(connect_response(true, "Connection established"))
}

async fn handle_auth(state: &AppState, conn: &mut ConnState, urn: &str) -> Flow {
    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    let user = match db.get_user(urn) {
        Ok(user) => user,
        Err(err) => return Flow::Respond(storage_failure(err)),
    };

    let Some(user) = user else {
        warn!(urn = %urn, "Authentication failed: unknown URN");
        return Flow::Respond(auth_response(false, ""));
    };

    let now = Utc::now();
    let session = state.sessions.create(&user.urn, now);
    conn.session_token = Some(session.token.clone());

    // Authenticated connections receive asynchronous updates
    state.subscribers.add(&conn.handle);

    let record = ConnectionRecord {
        authenticated: true,
        client_address: conn.peer_address.clone(),
        client_port: conn.peer_port,
        connect_time: now,
        connection_id: conn.connection_id.clone(),
        last_activity: now,
        user_urn: user.urn.clone(),
    };
    if let Err(err) = db.record_connection(&record) {
        warn!(error = %err, "Failed to record authenticated connection");
    }

    info!(urn = %user.urn, token = %session.token, "User authenticated");
    Flow::Respond(auth_response(true, &session.token))
}

// ============================================================================
// Registration
// ============================================================================

async fn handle_register_user(
    state: &AppState,
    urn: &str,
    name: Option<String>,
    age: Option<i64>,
    pin_hash: Option<String>,
) -> Flow {
    if !valid_urn(urn) {
        warn!(urn = %urn, "Invalid URN format");
        return Flow::Respond(error_response("Invalid URN format", 400));
    }

    let user = User {
        active: true,
        age: age.unwrap_or(25),
        name: name.unwrap_or_else(|| format!("User_{urn}")),
        pin_hash: pin_hash.unwrap_or_else(|| "default_hash".to_string()),
        registration_date: Utc::now(),
        urn: urn.to_string(),
    };

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.register_user(&user) {
        Ok(()) => {
            info!(urn = %urn, "User registered");
            Flow::Respond(success_response("User registered successfully", []))
        }
        Err(StorageError::UserExists) => {
            Flow::Respond(error_response("User already registered", 409))
        }
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

async fn handle_register_device(
    state: &AppState,
    uri: &str,
    vehicle_kind: Option<VehicleKind>,
) -> Flow {
    if !valid_uri(uri) {
        warn!(uri = %uri, "Invalid URI format");
        return Flow::Respond(error_response("Invalid URI format", 400));
    }
    let Some(kind) = vehicle_kind else {
        return Flow::Respond(error_response("Invalid vehicle_type", 400));
    };

    let vehicle = Vehicle {
        active: true,
        available_seats: 50,
        capacity: 50,
        kind,
        last_update: Utc::now(),
        route: format!("Route_{uri}"),
        uri: uri.to_string(),
    };

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.register_vehicle(&vehicle) {
        Ok(()) => {
            info!(uri = %uri, route = %vehicle.route, "Device registered");
            Flow::Respond(success_response("Device registered successfully", []))
        }
        Err(StorageError::VehicleExists) => {
            Flow::Respond(error_response("Device already exists", 409))
        }
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

// ============================================================================
// Reservations & purchases
// ============================================================================

async fn handle_reserve_seat(
    state: &AppState,
    urn: &str,
    uri: Option<String>,
    route: Option<String>,
    vehicle_kind: Option<VehicleKind>,
) -> Flow {
    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    let vehicle = match db.resolve_vehicle(uri.as_deref(), route.as_deref(), vehicle_kind) {
        Ok(Some(vehicle)) => vehicle,
        Ok(None) => {
            warn!(
                route = route.as_deref().unwrap_or("<none>"),
                uri = uri.as_deref().unwrap_or("<none>"),
                "Reservation failed: vehicle/route not found"
            );
            return Flow::Respond(error_response("Vehicle/route not found", 404));
        }
        Err(err) => return Flow::Respond(storage_failure(err)),
    };

    let reserved = with_backoff(|| async { db.reserve_seats(&vehicle.uri, 1, Utc::now()) }).await;

    let updated = match reserved {
        Ok(updated) => updated,
        Err(StorageError::NoSeats { .. }) => {
            info!(uri = %vehicle.uri, route = %vehicle.route, "Reservation rejected: no seats");
            return Flow::Respond(error_response(
                "No available seats for this route/vehicle",
                409,
            ));
        }
        Err(StorageError::VehicleNotFound) => {
            return Flow::Respond(error_response("Vehicle/route not found", 404));
        }
        Err(err) => return Flow::Respond(storage_failure(err)),
    };

    info!(
        urn = %urn,
        uri = %updated.uri,
        route = %updated.route,
        remaining = updated.available_seats,
        "Seat reserved"
    );

    broadcast(
        state,
        "seat_reserved",
        [
            ("route", updated.route.clone()),
            ("vehicle_uri", updated.uri.clone()),
            ("available_seats", updated.available_seats.to_string()),
        ],
    );

    Flow::Respond(success_response(
        "Seat reserved successfully",
        [
            ("route", updated.route.clone()),
            ("vehicle_uri", updated.uri.clone()),
            ("available_seats", updated.available_seats.to_string()),
        ],
    ))
}

#[allow(clippy::too_many_arguments)]
async fn handle_purchase_ticket(
    state: &AppState,
    session_id: Option<String>,
    urn: Option<String>,
    ticket_kind: Option<TicketKind>,
    vehicle_kind: Option<VehicleKind>,
    route: Option<String>,
    uri: Option<String>,
    passengers: u32,
) -> Flow {
    // Identity: a session wins over a bare URN; bad sessions are rejected
    let urn = match session_id {
        Some(token) => match state.sessions.resolve(&token, Utc::now()) {
            Some(urn) => urn,
            None => {
                warn!(token = %token, "Purchase rejected: invalid or expired session");
                return Flow::Respond(error_response("Invalid or expired session", 401));
            }
        },
        None => match urn {
            Some(urn) => urn,
            None => {
                return Flow::Respond(error_response(
                    "Missing user identity (session_id or urn)",
                    400,
                ))
            }
        },
    };

    let Some(ticket_kind) = ticket_kind else {
        return Flow::Respond(error_response("Invalid ticket_type", 400));
    };

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    let vehicle = match db.resolve_vehicle(uri.as_deref(), route.as_deref(), vehicle_kind) {
        Ok(Some(vehicle)) => vehicle,
        Ok(None) => {
            warn!(
                route = route.as_deref().unwrap_or("<none>"),
                uri = uri.as_deref().unwrap_or("<none>"),
                "Purchase failed: vehicle/route not found"
            );
            return Flow::Respond(error_response("Vehicle/route not found", 404));
        }
        Err(err) => return Flow::Respond(storage_failure(err)),
    };

    let purchased = with_backoff(|| async {
        db.purchase_tickets(&vehicle.uri, &urn, ticket_kind, passengers, Utc::now())
    })
    .await;

    let receipt = match purchased {
        Ok(receipt) => receipt,
        Err(StorageError::NoSeats { available, .. }) => {
            info!(
                uri = %vehicle.uri,
                need = passengers,
                have = available,
                "Purchase rejected: not enough seats"
            );
            return Flow::Respond(error_response("Insufficient seats available", 409));
        }
        Err(StorageError::VehicleNotFound) => {
            return Flow::Respond(error_response("Vehicle/route not found", 404));
        }
        Err(err) => return Flow::Respond(storage_failure(err)),
    };

    info!(
        urn = %urn,
        uri = %vehicle.uri,
        route = %vehicle.route,
        passengers,
        total = receipt.total_amount,
        remaining = receipt.available_seats,
        "Ticket purchased"
    );

    broadcast(
        state,
        "ticket_purchased",
        [
            ("route", vehicle.route.clone()),
            ("vehicle_uri", vehicle.uri.clone()),
            ("passengers", passengers.to_string()),
            ("available_seats", receipt.available_seats.to_string()),
        ],
    );

    Flow::Respond(success_response(
        "Ticket purchased successfully",
        [
            ("total_amount", receipt.total_amount.to_string()),
            ("route", vehicle.route.clone()),
            ("vehicle_uri", vehicle.uri.clone()),
            ("available_seats", receipt.available_seats.to_string()),
            ("passengers", passengers.to_string()),
            ("user_urn", urn.clone()),
        ],
    ))
}

// ============================================================================
// Groups
// ============================================================================

async fn handle_create_group(state: &AppState, group_name: &str, leader_urn: &str) -> Flow {
    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.create_group(group_name, leader_urn, Utc::now()) {
        Ok(group) => {
            info!(group = %group.group_name, leader = %leader_urn, "Group created");
            Flow::Respond(success_response("Group created successfully", []))
        }
        Err(StorageError::UserNotFound) => Flow::Respond(error_response("Leader not found", 404)),
        Err(StorageError::GroupExists) => {
            Flow::Respond(error_response("Group already exists", 409))
        }
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

async fn handle_add_group_member(
    state: &AppState,
    session_id: &str,
    group_name: &str,
    urn: &str,
) -> Flow {
    if state.sessions.resolve(session_id, Utc::now()).is_none() {
        warn!("Group member add rejected: invalid or expired session");
        return Flow::Respond(error_response("Invalid or expired session", 401));
    }

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.add_group_member(group_name, urn, Utc::now()) {
        Ok(()) => {
            info!(urn = %urn, group = %group_name, "Group member added");
            Flow::Respond(success_response("User added to group", []))
        }
        Err(StorageError::AlreadyInGroup) => {
            Flow::Respond(error_response("User already in group", 500))
        }
        Err(StorageError::GroupNotFound) => Flow::Respond(error_response("Group not found", 404)),
        Err(StorageError::UserNotFound) => Flow::Respond(error_response("User not found", 404)),
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

async fn handle_remove_group_member(
    state: &AppState,
    session_id: &str,
    group_name: &str,
    urn: &str,
) -> Flow {
    // Leader authorization: resolve the caller through its session, then
    // compare against the group's leader
    let caller_urn = match state.sessions.resolve(session_id, Utc::now()) {
        Some(urn) => urn,
        None => {
            warn!("Group member removal rejected: invalid or expired session");
            return Flow::Respond(error_response("Invalid or expired session", 401));
        }
    };

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    let leader = match db.group_leader(group_name) {
        Ok(leader) => leader,
        Err(err) => return Flow::Respond(storage_failure(err)),
    };
    let Some(leader) = leader else {
        warn!(group = %group_name, "Group op rejected: group not found or no leader set");
        return Flow::Respond(error_response("Group not found or no leader set", 404));
    };
    if leader != caller_urn {
        warn!(group = %group_name, caller = %caller_urn, "Group op rejected: not the leader");
        return Flow::Respond(error_response(
            "Admin (group leader) privileges required",
            403,
        ));
    }

    match db.remove_group_member(group_name, urn) {
        Ok(()) => {
            info!(urn = %urn, group = %group_name, "Group member removed");
            Flow::Respond(success_response("User removed from group", []))
        }
        Err(StorageError::NotInGroup) => Flow::Respond(error_response("User not in group", 404)),
        Err(StorageError::CannotRemoveLeader) => {
            Flow::Respond(error_response("Cannot remove the group leader", 409))
        }
        Err(StorageError::GroupNotFound) => Flow::Respond(error_response("Group not found", 404)),
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

// ============================================================================
// User deletion (admin gated)
// ============================================================================

async fn handle_delete_user(state: &AppState, urn: &str, admin_approved: bool) -> Flow {
    if !admin_approved {
        info!(urn = %urn, "User deletion requested without admin approval");
        return Flow::Respond(error_response("Administrative approval required", 403));
    }

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.delete_user(urn) {
        Ok(true) => {
            info!(urn = %urn, "User deleted with admin approval");
            Flow::Respond(success_response("User deleted", []))
        }
        Ok(false) => Flow::Respond(error_response("User not found", 404)),
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

// ============================================================================
// Administrative updates
// ============================================================================

async fn handle_update_price(
    state: &AppState,
    vehicle_kind: Option<VehicleKind>,
    ticket_kind: Option<TicketKind>,
    price_text: &str,
) -> Flow {
    let (Some(vehicle_kind), Some(ticket_kind)) = (vehicle_kind, ticket_kind) else {
        return Flow::Respond(error_response("Invalid vehicle_type/ticket_type", 400));
    };
    // Fixed numeric locale: '.' decimal point, no separators
    let price: f64 = match price_text.parse() {
        Ok(price) if !price_text.contains(',') => price,
        _ => {
            warn!(price = %price_text, "Bad price format");
            return Flow::Respond(error_response("Invalid price format", 400));
        }
    };

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.upsert_price(vehicle_kind, ticket_kind, price, Utc::now()) {
        Ok(_) => {
            info!(
                vehicle = vehicle_kind.name(),
                ticket = ticket_kind.name(),
                price,
                "Price updated"
            );
            broadcast(
                state,
                "price_updated",
                [
                    ("vehicle_type", vehicle_kind.as_wire().to_string()),
                    ("ticket_type", ticket_kind.as_wire().to_string()),
                    ("price", price_text.to_string()),
                ],
            );
            Flow::Respond(success_response("Price updated", []))
        }
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

async fn handle_update_vehicle(
    state: &AppState,
    uri: &str,
    active: Option<bool>,
    route: Option<String>,
    vehicle_kind: Option<VehicleKind>,
) -> Flow {
    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.update_vehicle(uri, active, route.as_deref(), vehicle_kind, Utc::now()) {
        Ok(_) => {
            info!(uri = %uri, "Vehicle updated");
            broadcast(state, "vehicle_updated", [("uri", uri.to_string())]);
            Flow::Respond(success_response("Vehicle updated", []))
        }
        Err(StorageError::NothingToUpdate) => {
            Flow::Respond(error_response("Nothing to update", 400))
        }
        Err(StorageError::VehicleNotFound) => {
            Flow::Respond(error_response("Vehicle not found", 404))
        }
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

async fn handle_update_capacity(
    state: &AppState,
    uri: &str,
    capacity: i64,
    available_seats: Option<i64>,
) -> Flow {
    let available = available_seats.unwrap_or(capacity);

    let db = match state.pool.acquire().await {
        Ok(db) => db,
        Err(_) => return Flow::Respond(error_response("Storage unavailable", 500)),
    };

    match db.update_capacity(uri, capacity, available, Utc::now()) {
        Ok(vehicle) => {
            info!(uri = %uri, capacity, available, "Capacity updated");
            broadcast(
                state,
                "capacity_updated",
                [
                    ("uri", uri.to_string()),
                    ("capacity", vehicle.capacity.to_string()),
                    ("available_seats", vehicle.available_seats.to_string()),
                ],
            );
            Flow::Respond(success_response("Capacity updated", []))
        }
        Err(StorageError::InvalidCapacity) => {
            Flow::Respond(error_response("Invalid capacity/available_seats", 400))
        }
        Err(StorageError::VehicleNotFound) => {
            Flow::Respond(error_response("Vehicle not found", 404))
        }
        Err(err) => Flow::Respond(storage_failure(err)),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// URN: exactly 13 decimal digits.
pub fn valid_urn(urn: &str) -> bool {
    urn.len() == 13 && urn.bytes().all(|b| b.is_ascii_digit())
}

/// URI: non-empty, at most 32 characters.
pub fn valid_uri(uri: &str) -> bool {
    !uri.is_empty() && uri.len() <= 32
}

fn storage_failure(err: StorageError) -> Frame {
    warn!(error = %err, "Storage operation failed");
    error_response(&err.to_string(), 500)
}

fn broadcast<'a>(
    state: &AppState,
    update_type: &str,
    data: impl IntoIterator<Item = (&'a str, String)>,
) {
    let pairs: Vec<(&str, String)> = data.into_iter().collect();
    info!(
        update = %update_type,
        payload = ?pairs,
        "Broadcast update"
    );
    let frame = multicast_update(update_type, pairs);
    state.subscribers.broadcast(&frame);
}
