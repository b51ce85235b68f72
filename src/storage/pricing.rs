//! Price table operations and the deterministic pricing rules.

use chrono::{DateTime, Utc};
use redb::ReadableTable;

use crate::proto::{TicketKind, VehicleKind};

use super::models::PriceEntry;
use super::store::{Store, StorageError};
use super::tables::PRICE_LIST;

/// Base unit price per seat for quotes.
pub const DEFAULT_BASE_PRICE: f64 = 1.0;

/// Multipliers applied to rows created by the update-then-insert path.
pub const DEFAULT_MULTIPLIER: f64 = 1.0;

/// Group discount rate: 10% for Family tickets or three seats and up.
pub fn discount_rate(ticket_kind: TicketKind, passengers: u32) -> f64 {
    if ticket_kind == TicketKind::Family || passengers >= 3 {
        0.10
    } else {
        0.0
    }
}

/// `total = base × N × (1 − discount)`
pub fn total_price(base_price: f64, passengers: u32, discount: f64) -> f64 {
    base_price * passengers as f64 * (1.0 - discount)
}

impl Store {
    pub fn get_price(
        &self,
        vehicle_kind: VehicleKind,
        ticket_kind: TicketKind,
    ) -> Result<Option<PriceEntry>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PRICE_LIST)?;

        match table.get((vehicle_kind.as_wire() as u8, ticket_kind.as_wire() as u8))? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Update-then-insert on the (vehicle kind, ticket kind) key: an existing
    /// row keeps its multipliers, a fresh row gets the 1.0/1.0 defaults.
    pub fn upsert_price(
        &self,
        vehicle_kind: VehicleKind,
        ticket_kind: TicketKind,
        base_price: f64,
        now: DateTime<Utc>,
    ) -> Result<PriceEntry, StorageError> {
        let key = (vehicle_kind.as_wire() as u8, ticket_kind.as_wire() as u8);

        let write_txn = self.begin_write()?;
        let entry = {
            let mut table = write_txn.open_table(PRICE_LIST)?;

            let mut entry: PriceEntry = match table.get(key)? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => PriceEntry {
                    base_price,
                    distance_multiplier: DEFAULT_MULTIPLIER,
                    last_update: now,
                    ticket_kind,
                    time_multiplier: DEFAULT_MULTIPLIER,
                    vehicle_kind,
                },
            };
            entry.base_price = base_price;
            entry.last_update = now;

            let data = rmp_serde::to_vec(&entry)?;
            table.insert(key, data.as_slice())?;
            entry
        };
        write_txn.commit()?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_store;

    #[test]
    fn discount_rules() {
        assert_eq!(discount_rate(TicketKind::Family, 1), 0.10);
        assert_eq!(discount_rate(TicketKind::Individual, 3), 0.10);
        assert_eq!(discount_rate(TicketKind::Business, 5), 0.10);
        assert_eq!(discount_rate(TicketKind::Individual, 2), 0.0);
        assert_eq!(discount_rate(TicketKind::Tourist, 1), 0.0);
    }

    #[test]
    fn total_follows_the_formula() {
        assert!((total_price(1.0, 2, 0.0) - 2.0).abs() < 1e-9);
        assert!((total_price(1.0, 4, 0.10) - 3.6).abs() < 1e-9);
        assert!((total_price(2.5, 1, 0.0) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn upsert_inserts_with_default_multipliers() {
        let (store, _temp) = setup_store();

        assert!(store
            .get_price(VehicleKind::Bus, TicketKind::Individual)
            .unwrap()
            .is_none());

        let entry = store
            .upsert_price(VehicleKind::Bus, TicketKind::Individual, 2.5, Utc::now())
            .unwrap();
        assert_eq!(entry.base_price, 2.5);
        assert_eq!(entry.distance_multiplier, 1.0);
        assert_eq!(entry.time_multiplier, 1.0);
    }

    #[test]
    fn upsert_updates_existing_row_in_place() {
        let (store, _temp) = setup_store();

        store
            .upsert_price(VehicleKind::Tram, TicketKind::Family, 2.0, Utc::now())
            .unwrap();
        store
            .upsert_price(VehicleKind::Tram, TicketKind::Family, 3.0, Utc::now())
            .unwrap();

        let entry = store
            .get_price(VehicleKind::Tram, TicketKind::Family)
            .unwrap()
            .unwrap();
        assert_eq!(entry.base_price, 3.0);

        // Keys are unique per (vehicle, ticket) pair: a different pair is
        // untouched
        assert!(store
            .get_price(VehicleKind::Tram, TicketKind::Individual)
            .unwrap()
            .is_none());
    }
}
