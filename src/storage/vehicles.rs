use chrono::{DateTime, Utc};
use redb::ReadableTable;

use crate::proto::{TicketKind, VehicleKind};

use super::models::{Payment, PurchaseReceipt, Ticket, Vehicle};
use super::pricing;
use super::store::{Store, StorageError};
use super::tables::*;

impl Store {
    /// Register a new vehicle. The URI is the natural key; a second
    /// registration under the same URI is a conflict.
    pub fn register_vehicle(&self, vehicle: &Vehicle) -> Result<(), StorageError> {
        debug_assert!(!vehicle.uri.is_empty(), "vehicle uri must not be empty");
        debug_assert!(
            vehicle.available_seats <= vehicle.capacity,
            "available seats must not exceed capacity"
        );

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(VEHICLES)?;
            if table.get(vehicle.uri.as_str())?.is_some() {
                return Err(StorageError::VehicleExists);
            }
            let data = rmp_serde::to_vec(vehicle)?;
            table.insert(vehicle.uri.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_vehicle(&self, uri: &str) -> Result<Option<Vehicle>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(VEHICLES)?;

        match table.get(uri)? {
            Some(data) => {
                let vehicle: Vehicle = rmp_serde::from_slice(data.value())?;
                Ok(Some(vehicle))
            }
            None => Ok(None),
        }
    }

    /// First vehicle serving the route with the given kind.
    pub fn vehicle_by_route_and_kind(
        &self,
        route: &str,
        kind: VehicleKind,
    ) -> Result<Option<Vehicle>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(VEHICLES)?;

        for result in table.iter()? {
            let (_, value) = result?;
            let vehicle: Vehicle = rmp_serde::from_slice(value.value())?;
            if vehicle.route == route && vehicle.kind == kind {
                return Ok(Some(vehicle));
            }
        }
        Ok(None)
    }

    /// Resolve a vehicle for a reservation or purchase: an explicit URI wins;
    /// otherwise route plus requested kind, falling back to the other kinds
    /// in Bus, Tram, Trolleybus order when the requested kind has no match.
    pub fn resolve_vehicle(
        &self,
        uri: Option<&str>,
        route: Option<&str>,
        kind: Option<VehicleKind>,
    ) -> Result<Option<Vehicle>, StorageError> {
        if let Some(uri) = uri {
            if let Some(vehicle) = self.get_vehicle(uri)? {
                return Ok(Some(vehicle));
            }
        }

        let Some(route) = route else {
            return Ok(None);
        };

        if let Some(kind) = kind {
            if let Some(vehicle) = self.vehicle_by_route_and_kind(route, kind)? {
                return Ok(Some(vehicle));
            }
        }
        for fallback in VehicleKind::ALL {
            if Some(fallback) == kind {
                continue;
            }
            if let Some(vehicle) = self.vehicle_by_route_and_kind(route, fallback)? {
                return Ok(Some(vehicle));
            }
        }
        Ok(None)
    }

    /// Reserve `requested` seats: read, check, decrement, commit — one
    /// transaction, so concurrent reservations on the same URI serialize and
    /// over-booking is impossible. Returns the updated vehicle row.
    pub fn reserve_seats(
        &self,
        uri: &str,
        requested: u32,
        now: DateTime<Utc>,
    ) -> Result<Vehicle, StorageError> {
        let write_txn = self.begin_write()?;
        let vehicle = {
            let mut table = write_txn.open_table(VEHICLES)?;

            let mut vehicle: Vehicle = match table.get(uri)? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => return Err(StorageError::VehicleNotFound),
            };

            if vehicle.available_seats < requested {
                return Err(StorageError::NoSeats {
                    available: vehicle.available_seats,
                    requested,
                });
            }

            vehicle.available_seats -= requested;
            vehicle.last_update = now;
            let data = rmp_serde::to_vec(&vehicle)?;
            table.insert(uri, data.as_slice())?;
            vehicle
        };
        write_txn.commit()?;
        Ok(vehicle)
    }

    /// Purchase `passengers` tickets on a vehicle.
    ///
    /// One transaction, in order: resolve the vehicle row, check seats,
    /// create one ticket per passenger (seat `capacity − available + i + 1`),
    /// record one payment referencing the first ticket, decrement seats.
    /// Any failure rolls the whole step back.
    pub fn purchase_tickets(
        &self,
        uri: &str,
        urn: &str,
        ticket_kind: TicketKind,
        passengers: u32,
        now: DateTime<Utc>,
    ) -> Result<PurchaseReceipt, StorageError> {
        debug_assert!(passengers >= 1, "at least one passenger");

        let write_txn = self.begin_write()?;
        let receipt = {
            let mut vehicles = write_txn.open_table(VEHICLES)?;

            let mut vehicle: Vehicle = match vehicles.get(uri)? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => return Err(StorageError::VehicleNotFound),
            };

            if vehicle.available_seats < passengers {
                return Err(StorageError::NoSeats {
                    available: vehicle.available_seats,
                    requested: passengers,
                });
            }

            // Deterministic pricing, no price table involved
            let base_price = pricing::DEFAULT_BASE_PRICE;
            let discount = pricing::discount_rate(ticket_kind, passengers);
            let total_amount = pricing::total_price(base_price, passengers, discount);

            let mut tickets = Vec::with_capacity(passengers as usize);
            {
                let mut ticket_table = write_txn.open_table(TICKETS)?;
                for i in 0..passengers {
                    let n = Self::next_counter(&write_txn, "ticket_id")?;
                    let ticket = Ticket {
                        discount,
                        kind: ticket_kind,
                        price: base_price,
                        purchase_date: now,
                        route: vehicle.route.clone(),
                        seat_number: (vehicle.capacity - vehicle.available_seats + i + 1)
                            .to_string(),
                        ticket_id: format!("TKT_{}_{}", n, now.timestamp()),
                        used: false,
                        user_urn: urn.to_string(),
                        vehicle_kind: vehicle.kind,
                    };
                    let data = rmp_serde::to_vec(&ticket)?;
                    ticket_table.insert(ticket.ticket_id.as_str(), data.as_slice())?;
                    tickets.push(ticket);
                }
            }

            let payment = {
                let n = Self::next_counter(&write_txn, "transaction_id")?;
                let payment = Payment {
                    amount: total_amount,
                    payment_date: now,
                    payment_method: "card".to_string(),
                    successful: true,
                    ticket_id: tickets.first().map(|t| t.ticket_id.clone()),
                    transaction_id: format!("TX_{}_{}", n, now.timestamp()),
                };
                let mut payments = write_txn.open_table(PAYMENTS)?;
                let data = rmp_serde::to_vec(&payment)?;
                payments.insert(payment.transaction_id.as_str(), data.as_slice())?;
                payment
            };

            vehicle.available_seats -= passengers;
            vehicle.last_update = now;
            let data = rmp_serde::to_vec(&vehicle)?;
            vehicles.insert(uri, data.as_slice())?;

            PurchaseReceipt {
                available_seats: vehicle.available_seats,
                payment,
                tickets,
                total_amount,
            }
        };
        write_txn.commit()?;
        Ok(receipt)
    }

    /// Partial vehicle update: any of active flag, route, kind. At least one
    /// field must be present.
    pub fn update_vehicle(
        &self,
        uri: &str,
        active: Option<bool>,
        route: Option<&str>,
        kind: Option<VehicleKind>,
        now: DateTime<Utc>,
    ) -> Result<Vehicle, StorageError> {
        if active.is_none() && route.is_none() && kind.is_none() {
            return Err(StorageError::NothingToUpdate);
        }

        let write_txn = self.begin_write()?;
        let vehicle = {
            let mut table = write_txn.open_table(VEHICLES)?;

            let mut vehicle: Vehicle = match table.get(uri)? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => return Err(StorageError::VehicleNotFound),
            };

            if let Some(active) = active {
                vehicle.active = active;
            }
            if let Some(route) = route {
                vehicle.route = route.to_string();
            }
            if let Some(kind) = kind {
                vehicle.kind = kind;
            }
            vehicle.last_update = now;

            let data = rmp_serde::to_vec(&vehicle)?;
            table.insert(uri, data.as_slice())?;
            vehicle
        };
        write_txn.commit()?;
        Ok(vehicle)
    }

    /// Set capacity and available seats, holding `0 ≤ available ≤ capacity`.
    pub fn update_capacity(
        &self,
        uri: &str,
        capacity: i64,
        available_seats: i64,
        now: DateTime<Utc>,
    ) -> Result<Vehicle, StorageError> {
        if capacity < 0 || available_seats < 0 || available_seats > capacity {
            return Err(StorageError::InvalidCapacity);
        }

        let write_txn = self.begin_write()?;
        let vehicle = {
            let mut table = write_txn.open_table(VEHICLES)?;

            let mut vehicle: Vehicle = match table.get(uri)? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => return Err(StorageError::VehicleNotFound),
            };

            vehicle.capacity = capacity as u32;
            vehicle.available_seats = available_seats as u32;
            vehicle.last_update = now;

            let data = rmp_serde::to_vec(&vehicle)?;
            table.insert(uri, data.as_slice())?;
            vehicle
        };
        write_txn.commit()?;
        Ok(vehicle)
    }

    /// Ticket lookup, used by tests and status reporting.
    pub fn tickets_for_user(&self, urn: &str) -> Result<Vec<Ticket>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TICKETS)?;

        let mut out = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let ticket: Ticket = rmp_serde::from_slice(value.value())?;
            if ticket.user_urn == urn {
                out.push(ticket);
            }
        }
        Ok(out)
    }

    pub fn get_payment(&self, transaction_id: &str) -> Result<Option<Payment>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PAYMENTS)?;

        match table.get(transaction_id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_user, make_vehicle, setup_store};

    #[test]
    fn register_and_resolve_by_uri() {
        let (store, _temp) = setup_store();
        store
            .register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 3))
            .unwrap();

        let vehicle = store
            .resolve_vehicle(Some("bus://42"), None, None)
            .unwrap()
            .unwrap();
        assert_eq!(vehicle.uri, "bus://42");
        assert_eq!(vehicle.capacity, 3);

        assert!(matches!(
            store.register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 3)),
            Err(StorageError::VehicleExists)
        ));
    }

    #[test]
    fn route_resolution_falls_back_across_kinds() {
        let (store, _temp) = setup_store();
        let mut tram = make_vehicle("tram://7", VehicleKind::Tram, 40);
        tram.route = "R7".to_string();
        store.register_vehicle(&tram).unwrap();

        // Requested kind Bus has no match on R7; the scan adopts the tram.
        let vehicle = store
            .resolve_vehicle(None, Some("R7"), Some(VehicleKind::Bus))
            .unwrap()
            .unwrap();
        assert_eq!(vehicle.uri, "tram://7");
        assert_eq!(vehicle.kind, VehicleKind::Tram);

        assert!(store
            .resolve_vehicle(None, Some("R99"), Some(VehicleKind::Bus))
            .unwrap()
            .is_none());
    }

    #[test]
    fn reserving_more_than_available_fails_and_rolls_back() {
        let (store, _temp) = setup_store();
        store
            .register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 2))
            .unwrap();

        let vehicle = store.reserve_seats("bus://42", 1, Utc::now()).unwrap();
        assert_eq!(vehicle.available_seats, 1);

        let err = store.reserve_seats("bus://42", 2, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            StorageError::NoSeats {
                available: 1,
                requested: 2
            }
        ));

        // Nothing was decremented by the failed attempt
        let vehicle = store.get_vehicle("bus://42").unwrap().unwrap();
        assert_eq!(vehicle.available_seats, 1);
    }

    #[test]
    fn purchase_creates_tickets_payment_and_decrements_seats() {
        let (store, _temp) = setup_store();
        store.register_user(&make_user("1234567890123")).unwrap();
        store
            .register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 10))
            .unwrap();

        let receipt = store
            .purchase_tickets("bus://42", "1234567890123", TicketKind::Family, 2, Utc::now())
            .unwrap();

        // Family tickets get the 10% discount: 1.0 * 2 * 0.9
        assert!((receipt.total_amount - 1.8).abs() < 1e-9);
        assert_eq!(receipt.tickets.len(), 2);
        assert_eq!(receipt.available_seats, 8);
        assert_eq!(receipt.tickets[0].seat_number, "1");
        assert_eq!(receipt.tickets[1].seat_number, "2");
        assert_eq!(
            receipt.payment.ticket_id.as_deref(),
            Some(receipt.tickets[0].ticket_id.as_str())
        );
        assert!(receipt.payment.successful);

        let stored = store.tickets_for_user("1234567890123").unwrap();
        assert_eq!(stored.len(), 2);

        let payment = store
            .get_payment(&receipt.payment.transaction_id)
            .unwrap()
            .unwrap();
        assert!((payment.amount - 1.8).abs() < 1e-9);
    }

    #[test]
    fn purchase_seat_numbers_continue_after_prior_sales() {
        let (store, _temp) = setup_store();
        store.register_user(&make_user("1234567890123")).unwrap();
        store
            .register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 10))
            .unwrap();

        store
            .purchase_tickets("bus://42", "1234567890123", TicketKind::Individual, 3, Utc::now())
            .unwrap();
        let receipt = store
            .purchase_tickets("bus://42", "1234567890123", TicketKind::Individual, 2, Utc::now())
            .unwrap();

        assert_eq!(receipt.tickets[0].seat_number, "4");
        assert_eq!(receipt.tickets[1].seat_number, "5");
    }

    #[test]
    fn purchase_fails_without_enough_seats() {
        let (store, _temp) = setup_store();
        store.register_user(&make_user("1234567890123")).unwrap();
        store
            .register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 1))
            .unwrap();

        let err = store
            .purchase_tickets("bus://42", "1234567890123", TicketKind::Individual, 2, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSeats { .. }));

        // No partial writes survived the rollback
        assert!(store.tickets_for_user("1234567890123").unwrap().is_empty());
        let vehicle = store.get_vehicle("bus://42").unwrap().unwrap();
        assert_eq!(vehicle.available_seats, 1);
    }

    #[test]
    fn capacity_update_validates_bounds() {
        let (store, _temp) = setup_store();
        store
            .register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 10))
            .unwrap();

        assert!(matches!(
            store.update_capacity("bus://42", 5, 7, Utc::now()),
            Err(StorageError::InvalidCapacity)
        ));
        assert!(matches!(
            store.update_capacity("bus://42", -1, 0, Utc::now()),
            Err(StorageError::InvalidCapacity)
        ));

        let vehicle = store.update_capacity("bus://42", 20, 15, Utc::now()).unwrap();
        assert_eq!(vehicle.capacity, 20);
        assert_eq!(vehicle.available_seats, 15);

        assert!(matches!(
            store.update_capacity("tram://1", 5, 5, Utc::now()),
            Err(StorageError::VehicleNotFound)
        ));
    }

    #[test]
    fn partial_vehicle_update() {
        let (store, _temp) = setup_store();
        store
            .register_vehicle(&make_vehicle("bus://42", VehicleKind::Bus, 10))
            .unwrap();

        assert!(matches!(
            store.update_vehicle("bus://42", None, None, None, Utc::now()),
            Err(StorageError::NothingToUpdate)
        ));

        let vehicle = store
            .update_vehicle("bus://42", Some(false), Some("R9"), None, Utc::now())
            .unwrap();
        assert!(!vehicle.active);
        assert_eq!(vehicle.route, "R9");
        assert_eq!(vehicle.kind, VehicleKind::Bus);
    }
}
