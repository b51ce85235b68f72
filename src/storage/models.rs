use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proto::{TicketKind, VehicleKind};

/// A registered passenger. The URN (13 decimal digits) is the natural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub active: bool,
    pub age: i64,
    pub name: String,
    pub pin_hash: String,
    pub registration_date: DateTime<Utc>,
    pub urn: String,
}

/// A vehicle, keyed by its short URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub active: bool,
    pub available_seats: u32,
    pub capacity: u32,
    pub kind: VehicleKind,
    pub last_update: DateTime<Utc>,
    pub route: String,
    pub uri: String,
}

/// A passenger group. The leader is always an active member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub active: bool,
    pub creation_date: DateTime<Utc>,
    pub group_id: u64,
    pub group_name: String,
    pub leader_urn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub active: bool,
    pub group_id: u64,
    pub join_date: DateTime<Utc>,
    pub member_urn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub discount: f64,
    pub kind: TicketKind,
    pub price: f64,
    pub purchase_date: DateTime<Utc>,
    pub route: String,
    pub seat_number: String,
    pub ticket_id: String,
    pub used: bool,
    pub user_urn: String,
    pub vehicle_kind: VehicleKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub amount: f64,
    pub payment_date: DateTime<Utc>,
    pub payment_method: String,
    pub successful: bool,
    /// References an existing ticket when present.
    pub ticket_id: Option<String>,
    pub transaction_id: String,
}

/// One row of the price table, unique per (vehicle kind, ticket kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceEntry {
    pub base_price: f64,
    pub distance_multiplier: f64,
    pub last_update: DateTime<Utc>,
    pub ticket_kind: TicketKind,
    pub time_multiplier: f64,
    pub vehicle_kind: VehicleKind,
}

/// Bookkeeping row for an authenticated connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub authenticated: bool,
    pub client_address: String,
    pub client_port: u16,
    pub connect_time: DateTime<Utc>,
    pub connection_id: String,
    pub last_activity: DateTime<Utc>,
    pub user_urn: String,
}

/// Everything written by one successful ticket purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub available_seats: u32,
    pub payment: Payment,
    pub tickets: Vec<Ticket>,
    pub total_amount: f64,
}
