use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catchup_core::{CommandId, EntityId};
use catchup_messaging::Command;

macro_rules! entity_newtype {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub EntityId);

        impl $t {
            pub fn new(id: EntityId) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(EntityId::new())
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

entity_newtype!(
    /// Registration order; also the key of its draft and priced read models.
    OrderId
);
entity_newtype!(ConferenceId);
entity_newtype!(SeatTypeId);
entity_newtype!(PaymentId);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatQuantity {
    pub seat_type: SeatTypeId,
    pub quantity: u32,
}

/// Command: RegisterToConference. Re-sending it for an existing order replaces
/// the previous seat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterToConference {
    pub command_id: CommandId,
    pub order_id: OrderId,
    pub conference_id: ConferenceId,
    pub seats: Vec<SeatQuantity>,
}

impl RegisterToConference {
    pub fn new(order_id: OrderId, conference_id: ConferenceId, seats: Vec<SeatQuantity>) -> Self {
        Self {
            command_id: CommandId::new(),
            order_id,
            conference_id,
            seats,
        }
    }
}

impl Command for RegisterToConference {
    const COMMAND_TYPE: &'static str = "registration.register_to_conference";

    fn command_id(&self) -> CommandId {
        self.command_id
    }

    fn target_id(&self) -> EntityId {
        self.order_id.0
    }
}

/// Command: AssignRegistrantDetails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRegistrantDetails {
    pub command_id: CommandId,
    pub order_id: OrderId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl AssignRegistrantDetails {
    pub fn new(
        order_id: OrderId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            command_id: CommandId::new(),
            order_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
        }
    }
}

impl Command for AssignRegistrantDetails {
    const COMMAND_TYPE: &'static str = "registration.assign_registrant_details";

    fn command_id(&self) -> CommandId {
        self.command_id
    }

    fn target_id(&self) -> EntityId {
        self.order_id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentItem {
    pub description: String,
    /// Minor currency units.
    pub amount: u64,
}

/// Command: InitiateThirdPartyProcessorPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateThirdPartyProcessorPayment {
    pub command_id: CommandId,
    pub payment_id: PaymentId,
    /// The order being paid for.
    pub payment_source_id: OrderId,
    pub conference_id: ConferenceId,
    pub description: String,
    pub total_amount: u64,
    pub items: Vec<PaymentItem>,
}

impl Command for InitiateThirdPartyProcessorPayment {
    const COMMAND_TYPE: &'static str = "payments.initiate_third_party_processor_payment";

    fn command_id(&self) -> CommandId {
        self.command_id
    }

    fn target_id(&self) -> EntityId {
        self.payment_id.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftOrderState {
    PendingReservation,
    PartiallyReserved,
    ReservationCompleted,
    Rejected,
    Confirmed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOrderLine {
    pub seat_type: SeatTypeId,
    pub requested_seats: u32,
    pub reserved_seats: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registrant {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Read model: the order as the registrant sees it while seats are reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOrder {
    pub order_id: OrderId,
    pub conference_id: ConferenceId,
    pub state: DraftOrderState,
    pub lines: Vec<DraftOrderLine>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub registrant: Option<Registrant>,
}

impl DraftOrder {
    pub fn pending(order_id: OrderId, conference_id: ConferenceId, seats: &[SeatQuantity]) -> Self {
        Self {
            order_id,
            conference_id,
            state: DraftOrderState::PendingReservation,
            lines: seats
                .iter()
                .map(|s| DraftOrderLine {
                    seat_type: s.seat_type,
                    requested_seats: s.quantity,
                    reserved_seats: 0,
                })
                .collect(),
            reservation_expires_at: None,
            registrant: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reservation_expires_at
            .is_some_and(|expires_at| expires_at < now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedOrderLine {
    pub seat_type: SeatTypeId,
    pub description: String,
    pub quantity: u32,
    pub unit_price: u64,
    pub line_total: u64,
}

/// Read model: reserved seats with prices. Its version mirrors the draft order
/// version it was priced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedOrder {
    pub order_id: OrderId,
    pub lines: Vec<PricedOrderLine>,
    pub total: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Initiated,
}

/// Read model: a payment handed to the external processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyPayment {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub description: String,
    pub total_amount: u64,
    pub items: Vec<PaymentItem>,
    pub state: PaymentState,
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn pending_order_requests_seats_without_reserving() {
        let seat = SeatTypeId::generate();
        let order = DraftOrder::pending(
            OrderId::generate(),
            ConferenceId::generate(),
            &[SeatQuantity {
                seat_type: seat,
                quantity: 3,
            }],
        );

        assert_eq!(order.state, DraftOrderState::PendingReservation);
        assert_eq!(order.lines[0].requested_seats, 3);
        assert_eq!(order.lines[0].reserved_seats, 0);
    }

    #[test]
    fn expiry_is_strictly_before_now() {
        let now = Utc::now();
        let mut order = DraftOrder::pending(OrderId::generate(), ConferenceId::generate(), &[]);
        assert!(!order.is_expired(now));

        order.reservation_expires_at = Some(now);
        assert!(!order.is_expired(now));

        order.reservation_expires_at = Some(now - TimeDelta::seconds(1));
        assert!(order.is_expired(now));
    }

    #[test]
    fn commands_target_their_aggregate() {
        let order_id = OrderId::generate();
        let cmd = RegisterToConference::new(order_id, ConferenceId::generate(), vec![]);
        assert_eq!(cmd.target_id(), order_id.0);
        assert!(!cmd.command_id().is_nil());
    }
}
