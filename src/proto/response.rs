//! Response frame constructors.
//!
//! Every constructor computes the checksum, so a built frame is ready to
//! send as-is.

use super::{Frame, MessageType};

/// Success envelope: a human-readable message plus result key/value pairs.
pub fn success_response<'a>(
    message: &str,
    data: impl IntoIterator<Item = (&'a str, String)>,
) -> Frame {
    let mut frame = Frame::new(MessageType::ResponseSuccess);
    if !message.is_empty() {
        frame.set_str("message", message);
    }
    for (key, value) in data {
        frame.set_str(key, value);
    }
    frame.compute_checksum();
    frame
}

/// Error envelope carrying the taxonomy code from the error-handling design
/// (400 validation, 401/403 authorization, 404/409 not-found/conflict,
/// 500 persistence).
pub fn error_response(message: &str, code: i64) -> Frame {
    let mut frame = Frame::new(MessageType::ResponseError);
    frame.set_str("error", message);
    frame.set_i64("error_code", code);
    frame.compute_checksum();
    frame
}

pub fn connect_response(success: bool, reason: &str) -> Frame {
    let mut frame = Frame::new(MessageType::ConnectResponse);
    frame.set_bool("success", success);
    if !reason.is_empty() {
        frame.set_str("reason", reason);
    }
    frame.compute_checksum();
    frame
}

/// The token travels back as `token`; clients echo it as `session_id` in
/// subsequent frames.
pub fn auth_response(success: bool, token: &str) -> Frame {
    let mut frame = Frame::new(MessageType::AuthResponse);
    frame.set_bool("success", success);
    if !token.is_empty() {
        frame.set_str("token", token);
    }
    frame.compute_checksum();
    frame
}

/// Asynchronous update pushed to all authenticated subscribers.
pub fn multicast_update<'a>(
    update_type: &str,
    data: impl IntoIterator<Item = (&'a str, String)>,
) -> Frame {
    let mut frame = Frame::new(MessageType::MulticastUpdate);
    frame.set_str("update_type", update_type);
    for (key, value) in data {
        frame.set_str(key, value);
    }
    frame.compute_checksum();
    frame
}

pub fn heartbeat(timestamp: i64) -> Frame {
    let mut frame = Frame::new(MessageType::Heartbeat);
    frame.set_str("timestamp", timestamp.to_string());
    frame.compute_checksum();
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_carry_valid_checksums() {
        let frame = success_response("ok", [("route", "R1".to_string())]);
        assert!(frame.verify_checksum());
        assert_eq!(frame.kind(), MessageType::ResponseSuccess);
        assert_eq!(frame.get_str("message"), "ok");
        assert_eq!(frame.get_str("route"), "R1");

        let frame = error_response("Missing uri", 400);
        assert!(frame.verify_checksum());
        assert_eq!(frame.get_str("error"), "Missing uri");
        assert_eq!(frame.get_i64("error_code"), 400);
    }

    #[test]
    fn auth_response_omits_empty_token() {
        let denied = auth_response(false, "");
        assert!(!denied.has("token"));
        assert!(!denied.get_bool("success"));

        let granted = auth_response(true, "session_1");
        assert_eq!(granted.get_str("token"), "session_1");
        assert!(granted.get_bool("success"));
    }

    #[test]
    fn heartbeat_carries_a_timestamp() {
        let frame = heartbeat(1_700_000_000);
        assert_eq!(frame.kind(), MessageType::Heartbeat);
        assert_eq!(frame.get_str("timestamp"), "1700000000");
        assert!(frame.verify_checksum());
    }

    #[test]
    fn multicast_update_carries_type_and_payload() {
        let frame = multicast_update(
            "seat_reserved",
            [
                ("route", "R1".to_string()),
                ("available_seats", "4".to_string()),
            ],
        );
        assert_eq!(frame.kind(), MessageType::MulticastUpdate);
        assert_eq!(frame.get_str("update_type"), "seat_reserved");
        assert_eq!(frame.get_i64("available_seats"), 4);
        assert!(frame.verify_checksum());
    }
}
