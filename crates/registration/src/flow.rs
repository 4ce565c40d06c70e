//! Request-side registration flow.
//!
//! ```text
//! start_registration ──▶ RegisterToConference
//!         │
//! await_reservation ──▶ wait for draft order (5s / 500ms) past PendingReservation
//!         │                 Rejected / PartiallyReserved / Confirmed / expired
//!         │             ──▶ wait for priced order (1s / 300ms)
//!         ▼
//! submit_registrant_and_payment ──▶ [AssignRegistrantDetails, InitiateThirdPartyProcessorPayment]
//! ```
//!
//! Every wait degrades to `ReservationOutcome::Unknown` instead of failing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use catchup_core::{CommandId, DomainError};
use catchup_infra::command_gateway::{SubmitError, SubmitReceipt, envelope};
use catchup_infra::{
    CommandGateway, Convergence, ConvergenceBudget, ConvergencePoller, ConvergenceRequest,
    ReadStoreError, VersionedReadStore,
};
use catchup_messaging::{CommandChannel, VersionedProjection};

use crate::order::{
    AssignRegistrantDetails, ConferenceId, DraftOrder, DraftOrderState,
    InitiateThirdPartyProcessorPayment, OrderId, PaymentId, PaymentItem, PricedOrder,
    RegisterToConference,
};

pub const DRAFT_ORDER_BUDGET: ConvergenceBudget =
    ConvergenceBudget::fixed(Duration::from_secs(5), Duration::from_millis(500));

pub const PRICED_ORDER_BUDGET: ConvergenceBudget =
    ConvergenceBudget::fixed(Duration::from_secs(1), Duration::from_millis(300));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conference {
    pub id: ConferenceId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    ReadStore(#[from] ReadStoreError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("reservation for order {0} has expired")]
    ReservationExpired(OrderId),

    #[error("order {0} has not been priced")]
    NotPriced(OrderId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    /// The read model did not catch up in time; ask the registrant to retry.
    Unknown,
    Rejected,
    /// Fewer seats than requested; the registrant should adjust the order.
    PartiallyReserved { order_version: u64 },
    /// The order is already confirmed.
    Completed,
    Expired,
    Ready {
        draft: VersionedProjection<DraftOrder>,
        priced: VersionedProjection<PricedOrder>,
    },
}

pub struct RegistrationFlow<C, D, P> {
    gateway: Arc<CommandGateway<C>>,
    drafts: ConvergencePoller<D>,
    priced: ConvergencePoller<P>,
    conference: Conference,
    draft_budget: ConvergenceBudget,
    priced_budget: ConvergenceBudget,
}

impl<C, D, P> RegistrationFlow<C, D, P>
where
    C: CommandChannel,
    D: VersionedReadStore<DraftOrder>,
    P: VersionedReadStore<PricedOrder>,
{
    pub fn new(
        gateway: Arc<CommandGateway<C>>,
        drafts: ConvergencePoller<D>,
        priced: ConvergencePoller<P>,
        conference: Conference,
    ) -> Self {
        Self {
            gateway,
            drafts,
            priced,
            conference,
            draft_budget: DRAFT_ORDER_BUDGET,
            priced_budget: PRICED_ORDER_BUDGET,
        }
    }

    pub fn with_budgets(mut self, draft: ConvergenceBudget, priced: ConvergenceBudget) -> Self {
        self.draft_budget = draft;
        self.priced_budget = priced;
        self
    }

    pub fn conference(&self) -> &Conference {
        &self.conference
    }

    /// Submit a seat request for this flow's conference.
    pub fn start_registration(
        &self,
        mut command: RegisterToConference,
    ) -> Result<SubmitReceipt, RegistrationError> {
        if command.seats.is_empty() || command.seats.iter().all(|s| s.quantity == 0) {
            return Err(DomainError::validation("at least one seat must be requested").into());
        }

        command.conference_id = self.conference.id;
        let receipt = self.gateway.send(&command)?;
        info!(order = %command.order_id, conference = %self.conference.code, "registration submitted");
        Ok(receipt)
    }

    pub async fn await_reservation(&self, order_id: OrderId, order_version: u64) -> ReservationOutcome {
        self.await_reservation_until(order_id, order_version, &CancellationToken::new())
            .await
    }

    /// Like [`await_reservation`](Self::await_reservation), giving up with
    /// `Unknown` as soon as `cancel` fires.
    pub async fn await_reservation_until(
        &self,
        order_id: OrderId,
        order_version: u64,
        cancel: &CancellationToken,
    ) -> ReservationOutcome {
        let request = ConvergenceRequest::new(order_id.0, order_version, self.draft_budget)
            .until(|order: &DraftOrder| order.state != DraftOrderState::PendingReservation);

        let draft = match self.drafts.wait_for_version(request, cancel).await {
            Convergence::Converged(draft) => draft,
            Convergence::TimedOut { last_seen_version } => {
                warn!(order = %order_id, ?last_seen_version, "draft order did not converge");
                return ReservationOutcome::Unknown;
            }
            Convergence::Cancelled => return ReservationOutcome::Unknown,
        };

        match draft.state().state {
            DraftOrderState::Rejected => return ReservationOutcome::Rejected,
            DraftOrderState::PartiallyReserved => {
                return ReservationOutcome::PartiallyReserved {
                    order_version: draft.version(),
                };
            }
            DraftOrderState::Confirmed => return ReservationOutcome::Completed,
            DraftOrderState::PendingReservation | DraftOrderState::ReservationCompleted => {}
        }

        if draft.state().is_expired(Utc::now()) {
            return ReservationOutcome::Expired;
        }

        let request = ConvergenceRequest::new(order_id.0, order_version, self.priced_budget);
        match self.priced.wait_for_version(request, cancel).await {
            Convergence::Converged(priced) => ReservationOutcome::Ready { draft, priced },
            Convergence::TimedOut { .. } => {
                warn!(order = %order_id, "priced order did not converge");
                ReservationOutcome::Unknown
            }
            Convergence::Cancelled => ReservationOutcome::Unknown,
        }
    }

    /// Send registrant details together with the payment for the priced total.
    ///
    /// `order_version` is the draft version the registrant saw; it travels as the
    /// expected version of the registrant command.
    pub async fn submit_registrant_and_payment(
        &self,
        details: AssignRegistrantDetails,
        order_version: u64,
    ) -> Result<PaymentId, RegistrationError> {
        let order_id = details.order_id;

        let draft = self
            .drafts
            .store()
            .get_by_id(order_id.0)
            .await?
            .ok_or(RegistrationError::OrderNotFound(order_id))?;
        if draft.state().is_expired(Utc::now()) {
            return Err(RegistrationError::ReservationExpired(order_id));
        }

        let priced = self
            .priced
            .store()
            .get_by_id(order_id.0)
            .await?
            .ok_or(RegistrationError::NotPriced(order_id))?;

        let payment = self.payment_command(order_id, priced.state());
        let payment_id = payment.payment_id;

        let batch = vec![
            envelope(&details)
                .map_err(SubmitError::from)?
                .with_expected_version(order_version),
            envelope(&payment).map_err(SubmitError::from)?,
        ];
        self.gateway.submit(batch)?;

        info!(
            order = %order_id,
            payment = %payment_id,
            total = payment.total_amount,
            "registrant and payment submitted"
        );
        Ok(payment_id)
    }

    fn payment_command(&self, order_id: OrderId, priced: &PricedOrder) -> InitiateThirdPartyProcessorPayment {
        InitiateThirdPartyProcessorPayment {
            command_id: CommandId::new(),
            payment_id: PaymentId::generate(),
            payment_source_id: order_id,
            conference_id: self.conference.id,
            description: format!("Registration for {}", self.conference.name),
            total_amount: priced.total,
            items: priced
                .lines
                .iter()
                .map(|line| PaymentItem {
                    description: line.description.clone(),
                    amount: line.line_total,
                })
                .collect(),
        }
    }
}
