//! Conference registration built on the dispatch/convergence core.
//!
//! Request side: [`RegistrationFlow`] submits commands and waits for the draft and
//! priced order read models to catch up. Processing side: the in-memory
//! [`handlers`] reserve seats, record registrants and initiate payments.

pub mod flow;
pub mod handlers;
pub mod order;

mod integration_tests;

pub use flow::{
    Conference, DRAFT_ORDER_BUDGET, PRICED_ORDER_BUDGET, RegistrationError, RegistrationFlow,
    ReservationOutcome,
};
pub use handlers::{
    PaymentHandler, RegistrantHandler, RegistrationStores, SeatReservationHandler, SeatType,
    registration_handlers,
};
pub use order::{
    AssignRegistrantDetails, ConferenceId, DraftOrder, DraftOrderLine, DraftOrderState,
    InitiateThirdPartyProcessorPayment, OrderId, PaymentId, PaymentItem, PaymentState,
    PricedOrder, PricedOrderLine, RegisterToConference, Registrant, SeatQuantity, SeatTypeId,
    ThirdPartyPayment,
};

use catchup_infra::CommandGateway;

/// Declare every registration command on `gateway`.
pub fn register_commands<C>(gateway: CommandGateway<C>) -> CommandGateway<C> {
    gateway
        .register::<RegisterToConference>()
        .register::<AssignRegistrantDetails>()
        .register::<InitiateThirdPartyProcessorPayment>()
}
