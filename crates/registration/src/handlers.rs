//! In-memory command handlers for the registration flow.
//!
//! They stand in for the seat-reservation, registration and payment processes:
//! each handler decodes its command, applies it to the read models, and is
//! idempotent under redelivery (handled command ids are remembered).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tracing::{debug, info};

use catchup_core::{CommandId, DomainError};
use catchup_infra::InMemoryVersionedStore;
use catchup_infra::processing::{CommandHandler, HandlerRegistry};
use catchup_messaging::{CommandEnvelope, VersionedProjection};

use crate::order::{
    AssignRegistrantDetails, DraftOrder, DraftOrderLine, DraftOrderState,
    InitiateThirdPartyProcessorPayment, OrderId, PaymentState, PricedOrder, PricedOrderLine,
    RegisterToConference, Registrant, SeatTypeId, ThirdPartyPayment,
};

/// Read models written by the handlers and read by the flow.
#[derive(Debug, Clone, Default)]
pub struct RegistrationStores {
    pub drafts: Arc<InMemoryVersionedStore<DraftOrder>>,
    pub priced: Arc<InMemoryVersionedStore<PricedOrder>>,
    pub payments: Arc<InMemoryVersionedStore<ThirdPartyPayment>>,
}

impl RegistrationStores {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatType {
    pub id: SeatTypeId,
    pub name: String,
    /// Minor currency units.
    pub price: u64,
    pub quota: u32,
}

/// Command ids that were applied or are being applied right now, so redelivered
/// commands are no-ops even when two workers receive them at once.
#[derive(Debug, Default)]
struct Handled(Mutex<HashSet<CommandId>>);

impl Handled {
    /// Claim `id` for this attempt; `None` when it is already applied or claimed.
    fn claim(&self, id: CommandId) -> anyhow::Result<Option<Claim<'_>>> {
        let fresh = self
            .0
            .lock()
            .map_err(|_| anyhow!("handled-command set poisoned"))?
            .insert(id);
        Ok(fresh.then(|| Claim {
            handled: self,
            id,
            applied: false,
        }))
    }
}

/// An uncommitted claim is released on drop so a failed attempt can be retried.
struct Claim<'a> {
    handled: &'a Handled,
    id: CommandId,
    applied: bool,
}

impl Claim<'_> {
    fn commit(mut self) {
        self.applied = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.applied {
            return;
        }
        if let Ok(mut ids) = self.handled.0.lock() {
            ids.remove(&self.id);
        }
    }
}

#[derive(Debug, Default)]
struct SeatInventory {
    available: HashMap<SeatTypeId, u32>,
    held: HashMap<OrderId, Vec<(SeatTypeId, u32)>>,
}

impl SeatInventory {
    fn release(&mut self, order_id: OrderId) {
        for (seat_type, quantity) in self.held.remove(&order_id).unwrap_or_default() {
            *self.available.entry(seat_type).or_default() += quantity;
        }
    }

    fn reserve(&mut self, order_id: OrderId, seat_type: SeatTypeId, requested: u32) -> u32 {
        let available = self.available.entry(seat_type).or_default();
        let reserved = requested.min(*available);
        *available -= reserved;
        if reserved > 0 {
            self.held.entry(order_id).or_default().push((seat_type, reserved));
        }
        reserved
    }
}

/// Handles `RegisterToConference`: records the pending order, reserves seats,
/// then publishes the outcome and, when anything was reserved, the priced order.
#[derive(Debug)]
pub struct SeatReservationHandler {
    stores: RegistrationStores,
    seat_types: HashMap<SeatTypeId, SeatType>,
    inventory: Mutex<SeatInventory>,
    reservation_window: TimeDelta,
    handled: Handled,
}

impl SeatReservationHandler {
    pub fn new(stores: RegistrationStores, seat_types: impl IntoIterator<Item = SeatType>) -> Self {
        let seat_types: HashMap<_, _> = seat_types.into_iter().map(|s| (s.id, s)).collect();
        let inventory = SeatInventory {
            available: seat_types.values().map(|s| (s.id, s.quota)).collect(),
            held: HashMap::new(),
        };
        Self {
            stores,
            seat_types,
            inventory: Mutex::new(inventory),
            reservation_window: TimeDelta::minutes(15),
            handled: Handled::default(),
        }
    }

    pub fn with_reservation_window(mut self, window: TimeDelta) -> Self {
        self.reservation_window = window;
        self
    }

    pub fn available(&self, seat_type: SeatTypeId) -> u32 {
        self.inventory
            .lock()
            .map(|inv| inv.available.get(&seat_type).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn check_seat_types(&self, cmd: &RegisterToConference) -> anyhow::Result<()> {
        if let Some(unknown) = cmd
            .seats
            .iter()
            .find(|s| !self.seat_types.contains_key(&s.seat_type))
        {
            return Err(DomainError::validation(format!(
                "unknown seat type {}",
                unknown.seat_type
            ))
            .into());
        }
        Ok(())
    }

    fn reserve(&self, cmd: &RegisterToConference) -> anyhow::Result<Vec<DraftOrderLine>> {
        let mut inventory = self
            .inventory
            .lock()
            .map_err(|_| anyhow!("seat inventory poisoned"))?;
        inventory.release(cmd.order_id);

        Ok(cmd
            .seats
            .iter()
            .map(|s| DraftOrderLine {
                seat_type: s.seat_type,
                requested_seats: s.quantity,
                reserved_seats: inventory.reserve(cmd.order_id, s.seat_type, s.quantity),
            })
            .collect())
    }

    fn price(&self, order_id: OrderId, lines: &[DraftOrderLine]) -> PricedOrder {
        let lines: Vec<PricedOrderLine> = lines
            .iter()
            .filter(|l| l.reserved_seats > 0)
            .filter_map(|l| {
                let seat = self.seat_types.get(&l.seat_type)?;
                Some(PricedOrderLine {
                    seat_type: l.seat_type,
                    description: seat.name.clone(),
                    quantity: l.reserved_seats,
                    unit_price: seat.price,
                    line_total: seat.price * u64::from(l.reserved_seats),
                })
            })
            .collect();
        let total = lines.iter().map(|l| l.line_total).sum();

        PricedOrder {
            order_id,
            lines,
            total,
        }
    }
}

#[async_trait]
impl CommandHandler for SeatReservationHandler {
    async fn handle(&self, command: CommandEnvelope) -> anyhow::Result<()> {
        let cmd: RegisterToConference = command.decode().context("decoding RegisterToConference")?;
        let Some(claim) = self.handled.claim(cmd.command_id)? else {
            debug!(order = %cmd.order_id, "duplicate registration ignored");
            return Ok(());
        };
        self.check_seat_types(&cmd)?;

        self.stores.drafts.apply(cmd.order_id.0, |current| {
            let mut order = DraftOrder::pending(cmd.order_id, cmd.conference_id, &cmd.seats);
            order.registrant = current.and_then(|c| c.registrant.clone());
            order
        })?;

        let lines = self.reserve(&cmd)?;
        let requested: u32 = lines.iter().map(|l| l.requested_seats).sum();
        let reserved: u32 = lines.iter().map(|l| l.reserved_seats).sum();
        let state = if reserved == 0 {
            DraftOrderState::Rejected
        } else if reserved < requested {
            DraftOrderState::PartiallyReserved
        } else {
            DraftOrderState::ReservationCompleted
        };
        let expires_at = (reserved > 0).then(|| Utc::now() + self.reservation_window);
        let priced = self.price(cmd.order_id, &lines);

        let version = self.stores.drafts.apply(cmd.order_id.0, |current| DraftOrder {
            state,
            lines,
            reservation_expires_at: expires_at,
            registrant: current.and_then(|c| c.registrant.clone()),
            ..DraftOrder::pending(cmd.order_id, cmd.conference_id, &[])
        })?;

        if reserved > 0 {
            self.stores
                .priced
                .put(VersionedProjection::new(cmd.order_id.0, version, priced))?;
        }

        claim.commit();
        info!(order = %cmd.order_id, ?state, reserved, requested, version, "seats reserved");
        Ok(())
    }
}

/// Handles `AssignRegistrantDetails` against an existing draft order.
#[derive(Debug)]
pub struct RegistrantHandler {
    drafts: Arc<InMemoryVersionedStore<DraftOrder>>,
    handled: Handled,
}

impl RegistrantHandler {
    pub fn new(drafts: Arc<InMemoryVersionedStore<DraftOrder>>) -> Self {
        Self {
            drafts,
            handled: Handled::default(),
        }
    }
}

#[async_trait]
impl CommandHandler for RegistrantHandler {
    async fn handle(&self, command: CommandEnvelope) -> anyhow::Result<()> {
        let cmd: AssignRegistrantDetails =
            command.decode().context("decoding AssignRegistrantDetails")?;
        let Some(claim) = self.handled.claim(cmd.command_id)? else {
            return Ok(());
        };

        let Some(existing) = self.drafts.snapshot(cmd.order_id.0) else {
            return Err(DomainError::not_found())
                .with_context(|| format!("order {}", cmd.order_id));
        };
        if let Some(expected) = command.expected_version() {
            if existing.version() < expected {
                return Err(DomainError::conflict(format!(
                    "order {} is at version {}, behind expected {expected}",
                    cmd.order_id,
                    existing.version()
                ))
                .into());
            }
        }

        let registrant = Registrant {
            first_name: cmd.first_name,
            last_name: cmd.last_name,
            email: cmd.email,
        };
        let fallback = existing.into_state();
        self.drafts.apply(cmd.order_id.0, |latest| {
            let mut order = latest.cloned().unwrap_or(fallback);
            order.registrant = Some(registrant);
            order
        })?;
        claim.commit();

        debug!(order = %cmd.order_id, "registrant assigned");
        Ok(())
    }
}

/// Handles `InitiateThirdPartyProcessorPayment` by recording the payment.
#[derive(Debug)]
pub struct PaymentHandler {
    payments: Arc<InMemoryVersionedStore<ThirdPartyPayment>>,
    handled: Handled,
}

impl PaymentHandler {
    pub fn new(payments: Arc<InMemoryVersionedStore<ThirdPartyPayment>>) -> Self {
        Self {
            payments,
            handled: Handled::default(),
        }
    }
}

#[async_trait]
impl CommandHandler for PaymentHandler {
    async fn handle(&self, command: CommandEnvelope) -> anyhow::Result<()> {
        let cmd: InitiateThirdPartyProcessorPayment = command
            .decode()
            .context("decoding InitiateThirdPartyProcessorPayment")?;
        let Some(claim) = self.handled.claim(cmd.command_id)? else {
            return Ok(());
        };

        self.payments.apply(cmd.payment_id.0, |_| ThirdPartyPayment {
            payment_id: cmd.payment_id,
            order_id: cmd.payment_source_id,
            description: cmd.description,
            total_amount: cmd.total_amount,
            items: cmd.items,
            state: PaymentState::Initiated,
        })?;
        claim.commit();

        info!(payment = %cmd.payment_id, order = %cmd.payment_source_id, "payment initiated");
        Ok(())
    }
}

/// Routing table for every registration command.
pub fn registration_handlers(
    stores: &RegistrationStores,
    seat_types: impl IntoIterator<Item = SeatType>,
) -> HandlerRegistry {
    HandlerRegistry::new()
        .with_handler::<RegisterToConference>(SeatReservationHandler::new(
            stores.clone(),
            seat_types,
        ))
        .with_handler::<AssignRegistrantDetails>(RegistrantHandler::new(Arc::clone(&stores.drafts)))
        .with_handler::<InitiateThirdPartyProcessorPayment>(PaymentHandler::new(Arc::clone(
            &stores.payments,
        )))
}
