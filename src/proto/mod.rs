//! Wire protocol for the coordination engine.
//!
//! Every unit on the wire is one frame: a fixed 24-byte header followed by a
//! key/value body.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Magic (4) │ Version (2) │ Type (2) │ Body length (4)             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Sequence id (4) │ Session id (4) │ Checksum (4)                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Body: repeated  u32 key_len | key | u32 val_len | value          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All header integers are network byte order. Body values are text; binary
//! values are comma-separated decimal octets. Stream framing prepends a u32
//! total length so frames can be demultiplexed from a byte stream.

mod frame;
mod request;
mod response;

pub use frame::{Frame, FrameError, FrameExtractor};
pub use request::{Request, RequestError};
pub use response::{
    auth_response, connect_response, error_response, heartbeat, multicast_update, success_response,
};

use serde::{Deserialize, Serialize};

/// Frame magic, `'TPMP'` in network order.
pub const MAGIC: u32 = 0x5450_4D50;

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Upper bound on a single frame accepted from the network.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Calculate the CRC32 checksum (reversed polynomial 0xEDB88320,
/// init and xor-out 0xFFFFFFFF) over a byte slice.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Message types carried in the frame header.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    ConnectRequest = 1,
    ConnectResponse = 2,
    AuthRequest = 3,
    AuthResponse = 4,
    RegisterUser = 5,
    RegisterDevice = 6,
    ReserveSeat = 7,
    PurchaseTicket = 8,
    CreateGroup = 9,
    DeleteUser = 10,
    DeleteGroupMember = 11,
    /// Superseded by [`MessageType::UpdatePrice`]; accepted on the wire but
    /// never dispatched to a handler.
    UpdatePriceListLegacy = 12,
    GetVehicleStatus = 13,
    MulticastUpdate = 14,
    ResponseSuccess = 15,
    ResponseError = 16,
    Heartbeat = 17,
    Disconnect = 18,
    UpdatePrice = 19,
    UpdateVehicle = 20,
    UpdateCapacity = 21,
    AddMemberToGroup = 1001,
}

impl MessageType {
    pub fn from_wire(value: u16) -> Option<Self> {
        Some(match value {
            1 => Self::ConnectRequest,
            2 => Self::ConnectResponse,
            3 => Self::AuthRequest,
            4 => Self::AuthResponse,
            5 => Self::RegisterUser,
            6 => Self::RegisterDevice,
            7 => Self::ReserveSeat,
            8 => Self::PurchaseTicket,
            9 => Self::CreateGroup,
            10 => Self::DeleteUser,
            11 => Self::DeleteGroupMember,
            12 => Self::UpdatePriceListLegacy,
            13 => Self::GetVehicleStatus,
            14 => Self::MulticastUpdate,
            15 => Self::ResponseSuccess,
            16 => Self::ResponseError,
            17 => Self::Heartbeat,
            18 => Self::Disconnect,
            19 => Self::UpdatePrice,
            20 => Self::UpdateVehicle,
            21 => Self::UpdateCapacity,
            1001 => Self::AddMemberToGroup,
            _ => return None,
        })
    }

    pub fn as_wire(self) -> u16 {
        self as u16
    }

    /// Stable name used in per-message dispatch logging.
    pub fn name(self) -> &'static str {
        match self {
            Self::ConnectRequest => "CONNECT_REQUEST",
            Self::ConnectResponse => "CONNECT_RESPONSE",
            Self::AuthRequest => "AUTH_REQUEST",
            Self::AuthResponse => "AUTH_RESPONSE",
            Self::RegisterUser => "REGISTER_USER",
            Self::RegisterDevice => "REGISTER_DEVICE",
            Self::ReserveSeat => "RESERVE_SEAT",
            Self::PurchaseTicket => "PURCHASE_TICKET",
            Self::CreateGroup => "CREATE_GROUP",
            Self::DeleteUser => "DELETE_USER",
            Self::DeleteGroupMember => "DELETE_GROUP_MEMBER",
            Self::UpdatePriceListLegacy => "UPDATE_PRICE_LIST (legacy)",
            Self::GetVehicleStatus => "GET_VEHICLE_STATUS",
            Self::MulticastUpdate => "MULTICAST_UPDATE",
            Self::ResponseSuccess => "RESPONSE_SUCCESS",
            Self::ResponseError => "RESPONSE_ERROR",
            Self::Heartbeat => "HEARTBEAT",
            Self::Disconnect => "DISCONNECT",
            Self::UpdatePrice => "UPDATE_PRICE",
            Self::UpdateVehicle => "UPDATE_VEHICLE",
            Self::UpdateCapacity => "UPDATE_CAPACITY",
            Self::AddMemberToGroup => "ADD_MEMBER_TO_GROUP",
        }
    }
}

/// Vehicle discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleKind {
    Bus = 1,
    Tram = 2,
    Trolleybus = 3,
}

impl VehicleKind {
    /// All kinds in the route-fallback scan order.
    pub const ALL: [VehicleKind; 3] = [Self::Bus, Self::Tram, Self::Trolleybus];

    pub fn from_wire(value: i64) -> Option<Self> {
        Some(match value {
            1 => Self::Bus,
            2 => Self::Tram,
            3 => Self::Trolleybus,
            _ => return None,
        })
    }

    pub fn as_wire(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bus => "BUS",
            Self::Tram => "TRAM",
            Self::Trolleybus => "TROLLEYBUS",
        }
    }
}

/// Ticket discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    Individual = 1,
    Family = 2,
    Business = 3,
    Tourist = 4,
}

impl TicketKind {
    pub fn from_wire(value: i64) -> Option<Self> {
        Some(match value {
            1 => Self::Individual,
            2 => Self::Family,
            3 => Self::Business,
            4 => Self::Tourist,
            _ => return None,
        })
    }

    pub fn as_wire(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Individual => "INDIVIDUAL",
            Self::Family => "FAMILY",
            Self::Business => "BUSINESS",
            Self::Tourist => "TOURIST",
        }
    }
}
