//! Typed requests decoded from wire frames.
//!
//! Each message kind becomes one closed variant carrying its required fields.
//! The conversion happens in exactly one place so handlers can pattern-match
//! instead of re-reading raw keys.

use thiserror::Error;

use super::{Frame, MessageType, TicketKind, VehicleKind};

/// A structurally invalid request. Always surfaced to the client as a
/// 400 error response.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,
}

impl RequestError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect {
        client_id: String,
    },
    Auth {
        urn: String,
    },
    RegisterUser {
        urn: String,
        name: Option<String>,
        age: Option<i64>,
        pin_hash: Option<String>,
    },
    RegisterDevice {
        uri: String,
        vehicle_kind: Option<VehicleKind>,
    },
    ReserveSeat {
        urn: String,
        uri: Option<String>,
        route: Option<String>,
        vehicle_kind: Option<VehicleKind>,
    },
    PurchaseTicket {
        session_id: Option<String>,
        urn: Option<String>,
        ticket_kind: Option<TicketKind>,
        vehicle_kind: Option<VehicleKind>,
        route: Option<String>,
        uri: Option<String>,
        passengers: u32,
    },
    CreateGroup {
        group_name: String,
        leader_urn: String,
    },
    AddGroupMember {
        session_id: String,
        group_name: String,
        urn: String,
    },
    RemoveGroupMember {
        session_id: String,
        group_name: String,
        urn: String,
    },
    DeleteUser {
        urn: String,
        admin_approved: bool,
    },
    UpdatePrice {
        vehicle_kind: Option<VehicleKind>,
        ticket_kind: Option<TicketKind>,
        price_text: String,
    },
    UpdateVehicle {
        uri: String,
        active: Option<bool>,
        route: Option<String>,
        vehicle_kind: Option<VehicleKind>,
    },
    UpdateCapacity {
        uri: String,
        capacity: i64,
        available_seats: Option<i64>,
    },
    Heartbeat,
    Disconnect,
    /// Known wire type with no handler (status queries, the legacy price
    /// list update, stray response frames).
    Unsupported(MessageType),
}

impl Request {
    pub fn from_frame(frame: &Frame) -> Result<Self, RequestError> {
        let request = match frame.kind() {
            MessageType::ConnectRequest => Self::Connect {
                client_id: frame.get_str("client_id").to_string(),
            },
            MessageType::AuthRequest => {
                let urn = frame.get_str("urn");
                if urn.is_empty() {
                    return Err(RequestError::new("Missing urn"));
                }
                Self::Auth {
                    urn: urn.to_string(),
                }
            }
            MessageType::RegisterUser => {
                let urn = frame.get_str("urn");
                if urn.is_empty() {
                    return Err(RequestError::new("Missing urn"));
                }
                Self::RegisterUser {
                    urn: urn.to_string(),
                    name: optional_str(frame, "name"),
                    age: frame.has("age").then(|| frame.get_i64("age")),
                    pin_hash: optional_str(frame, "pin_hash"),
                }
            }
            MessageType::RegisterDevice => {
                let uri = frame.get_str("uri");
                if uri.is_empty() {
                    return Err(RequestError::new("Missing uri"));
                }
                Self::RegisterDevice {
                    uri: uri.to_string(),
                    vehicle_kind: VehicleKind::from_wire(frame.get_i64("vehicle_type")),
                }
            }
            MessageType::ReserveSeat => {
                let urn = frame.get_str("urn");
                if urn.is_empty() {
                    return Err(RequestError::new("Missing user URN"));
                }
                Self::ReserveSeat {
                    urn: urn.to_string(),
                    uri: optional_str(frame, "uri"),
                    route: optional_str(frame, "route"),
                    vehicle_kind: VehicleKind::from_wire(frame.get_i64("vehicle_type")),
                }
            }
            MessageType::PurchaseTicket => {
                let session_id = optional_str(frame, "session_id");
                let urn = optional_str(frame, "urn");
                if session_id.is_none() && urn.is_none() {
                    return Err(RequestError::new(
                        "Missing user identity (session_id or urn)",
                    ));
                }
                let passengers = if frame.has("passengers") {
                    frame.get_i64("passengers").max(1) as u32
                } else {
                    1
                };
                Self::PurchaseTicket {
                    session_id,
                    urn,
                    ticket_kind: TicketKind::from_wire(frame.get_i64("ticket_type")),
                    vehicle_kind: VehicleKind::from_wire(frame.get_i64("vehicle_type")),
                    route: optional_str(frame, "route"),
                    uri: optional_str(frame, "uri"),
                    passengers,
                }
            }
            MessageType::CreateGroup => {
                let group_name = frame.get_str("group_name");
                let leader_urn = frame.get_str("leader_urn");
                if group_name.is_empty() || leader_urn.is_empty() {
                    return Err(RequestError::new("Missing group_name or leader_urn"));
                }
                Self::CreateGroup {
                    group_name: group_name.to_string(),
                    leader_urn: leader_urn.to_string(),
                }
            }
            MessageType::AddMemberToGroup => {
                let (session_id, group_name, urn) = membership_fields(frame)?;
                Self::AddGroupMember {
                    session_id,
                    group_name,
                    urn,
                }
            }
            MessageType::DeleteGroupMember => {
                let (session_id, group_name, urn) = membership_fields(frame)?;
                Self::RemoveGroupMember {
                    session_id,
                    group_name,
                    urn,
                }
            }
            MessageType::DeleteUser => {
                let urn = frame.get_str("urn");
                if urn.is_empty() {
                    return Err(RequestError::new("Missing urn"));
                }
                Self::DeleteUser {
                    urn: urn.to_string(),
                    admin_approved: frame.get_bool("admin_approved"),
                }
            }
            MessageType::UpdatePrice => {
                if !frame.has("vehicle_type") || !frame.has("ticket_type") || !frame.has("price") {
                    return Err(RequestError::new("Missing vehicle_type/ticket_type/price"));
                }
                Self::UpdatePrice {
                    vehicle_kind: VehicleKind::from_wire(frame.get_i64("vehicle_type")),
                    ticket_kind: TicketKind::from_wire(frame.get_i64("ticket_type")),
                    price_text: frame.get_str("price").to_string(),
                }
            }
            MessageType::UpdateVehicle => {
                let uri = frame.get_str("uri");
                if uri.is_empty() {
                    return Err(RequestError::new("Missing uri"));
                }
                Self::UpdateVehicle {
                    uri: uri.to_string(),
                    active: frame.has("active").then(|| frame.get_i64("active") != 0),
                    route: optional_str(frame, "route"),
                    vehicle_kind: frame
                        .has("vehicle_type")
                        .then(|| VehicleKind::from_wire(frame.get_i64("vehicle_type")))
                        .flatten(),
                }
            }
            MessageType::UpdateCapacity => {
                if !frame.has("uri") || !frame.has("capacity") {
                    return Err(RequestError::new("Missing uri/capacity"));
                }
                Self::UpdateCapacity {
                    uri: frame.get_str("uri").to_string(),
                    capacity: frame.get_i64("capacity"),
                    available_seats: frame
                        .has("available_seats")
                        .then(|| frame.get_i64("available_seats")),
                }
            }
            MessageType::Heartbeat => Self::Heartbeat,
            MessageType::Disconnect => Self::Disconnect,
            other => Self::Unsupported(other),
        };
        Ok(request)
    }
}

fn optional_str(frame: &Frame, key: &str) -> Option<String> {
    let value = frame.get_str(key);
    (!value.is_empty()).then(|| value.to_string())
}

fn membership_fields(frame: &Frame) -> Result<(String, String, String), RequestError> {
    let session_id = frame.get_str("session_id");
    let group_name = frame.get_str("group_name");
    let urn = frame.get_str("urn");
    if session_id.is_empty() || group_name.is_empty() || urn.is_empty() {
        return Err(RequestError::new(
            "Missing required fields (session_id, group_name, urn)",
        ));
    }
    Ok((
        session_id.to_string(),
        group_name.to_string(),
        urn.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_seat_requires_urn() {
        let mut frame = Frame::new(MessageType::ReserveSeat);
        frame.set_i64("vehicle_type", 1);
        frame.set_str("route", "R1");
        let err = Request::from_frame(&frame).unwrap_err();
        assert_eq!(err.message, "Missing user URN");
    }

    #[test]
    fn purchase_requires_some_identity() {
        let mut frame = Frame::new(MessageType::PurchaseTicket);
        frame.set_i64("ticket_type", 1);
        frame.set_i64("vehicle_type", 1);
        assert!(Request::from_frame(&frame).is_err());

        frame.set_str("urn", "1234567890123");
        let request = Request::from_frame(&frame).unwrap();
        match request {
            Request::PurchaseTicket {
                urn, passengers, ..
            } => {
                assert_eq!(urn.as_deref(), Some("1234567890123"));
                assert_eq!(passengers, 1);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn purchase_clamps_passengers_to_one() {
        let mut frame = Frame::new(MessageType::PurchaseTicket);
        frame.set_str("urn", "1234567890123");
        frame.set_i64("ticket_type", 2);
        frame.set_i64("vehicle_type", 1);
        frame.set_i64("passengers", -4);
        match Request::from_frame(&frame).unwrap() {
            Request::PurchaseTicket { passengers, .. } => assert_eq!(passengers, 1),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn membership_requests_need_all_three_fields() {
        for kind in [MessageType::AddMemberToGroup, MessageType::DeleteGroupMember] {
            let mut frame = Frame::new(kind);
            frame.set_str("group_name", "TEAM1");
            frame.set_str("urn", "1000000000002");
            assert!(Request::from_frame(&frame).is_err());

            frame.set_str("session_id", "session_1");
            assert!(Request::from_frame(&frame).is_ok());
        }
    }

    #[test]
    fn unhandled_types_become_unsupported() {
        let frame = Frame::new(MessageType::GetVehicleStatus);
        assert_eq!(
            Request::from_frame(&frame).unwrap(),
            Request::Unsupported(MessageType::GetVehicleStatus)
        );

        let frame = Frame::new(MessageType::UpdatePriceListLegacy);
        assert_eq!(
            Request::from_frame(&frame).unwrap(),
            Request::Unsupported(MessageType::UpdatePriceListLegacy)
        );
    }
}
