//! End-to-end registration through the real pipeline.
//!
//! Tests: RegistrationFlow → CommandGateway → ProcessingLoop(CommandProcessor with
//! registration handlers) → read models → RegistrationFlow
//!
//! Verifies:
//! - A registration with enough seats becomes `Ready` and can be paid
//! - A sold-out conference is `Rejected`
//! - A partial reservation can be resubmitted with fewer seats

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use catchup_infra::processing::{
        CommandProcessor, LoopState, ProcessingLoop, ProcessingLoopConfig, ProcessingLoopHandle,
        SharedReceiver, StartError,
    };
    use catchup_infra::{CommandGateway, ConvergenceBudget, ConvergencePoller, ConvergenceRequest};
    use catchup_messaging::InMemoryCommandChannel;

    use crate::*;

    type Flow = RegistrationFlow<
        InMemoryCommandChannel,
        Arc<catchup_infra::InMemoryVersionedStore<DraftOrder>>,
        Arc<catchup_infra::InMemoryVersionedStore<PricedOrder>>,
    >;

    struct Site {
        flow: Flow,
        stores: RegistrationStores,
        seat: SeatTypeId,
        handle: ProcessingLoopHandle,
    }

    fn site(quota: u32) -> Site {
        let stores = RegistrationStores::new();
        let seat = SeatType {
            id: SeatTypeId::generate(),
            name: "Full conference pass".to_string(),
            price: 25_000,
            quota,
        };
        let seat_id = seat.id;
        let handlers = Arc::new(registration_handlers(&stores, [seat]));

        let (channel, rx) = InMemoryCommandChannel::bounded(32);
        let receiver = SharedReceiver::new(rx);
        let gateway = Arc::new(register_commands(CommandGateway::new(channel)));

        let handle = ProcessingLoop::new(
            ProcessingLoopConfig::default()
                .with_name("registration")
                .with_sample_interval(Duration::from_millis(200))
                .with_drain_timeout(Duration::from_secs(1)),
            move || {
                Ok::<_, StartError>(CommandProcessor::new(
                    receiver.clone(),
                    Arc::clone(&handlers),
                ))
            },
        )
        .spawn();

        let flow = RegistrationFlow::new(
            gateway,
            ConvergencePoller::new(Arc::clone(&stores.drafts)),
            ConvergencePoller::new(Arc::clone(&stores.priced)),
            Conference {
                id: ConferenceId::generate(),
                code: "rustconf".to_string(),
                name: "RustConf".to_string(),
            },
        );

        Site {
            flow,
            stores,
            seat: seat_id,
            handle,
        }
    }

    async fn running(handle: &ProcessingLoopHandle) {
        let mut rx = handle.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == LoopState::Running))
            .await
            .expect("loop did not start")
            .expect("loop dropped its state");
    }

    fn seats(seat: SeatTypeId, quantity: u32) -> Vec<SeatQuantity> {
        vec![SeatQuantity {
            seat_type: seat,
            quantity,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn registration_is_reserved_priced_and_paid() {
        let s = site(10);
        running(&s.handle).await;
        let order_id = OrderId::generate();

        s.flow
            .start_registration(RegisterToConference::new(
                order_id,
                s.flow.conference().id,
                seats(s.seat, 2),
            ))
            .unwrap();

        let (draft, priced) = match s.flow.await_reservation(order_id, 0).await {
            ReservationOutcome::Ready { draft, priced } => (draft, priced),
            other => panic!("expected Ready, got {other:?}"),
        };
        assert_eq!(draft.state().state, DraftOrderState::ReservationCompleted);
        assert_eq!(priced.state().total, 50_000);

        let details = AssignRegistrantDetails::new(order_id, "Grace", "Hopper", "grace@example.com");
        let payment_id = s
            .flow
            .submit_registrant_and_payment(details, draft.version())
            .await
            .unwrap();

        let payments = ConvergencePoller::new(Arc::clone(&s.stores.payments));
        let budget = ConvergenceBudget::new(Duration::from_secs(2), Duration::from_millis(100)).unwrap();
        let payment = payments
            .wait(ConvergenceRequest::new(payment_id.0, 0, budget))
            .await
            .into_projection()
            .expect("payment recorded");
        assert_eq!(payment.state().total_amount, 50_000);
        assert_eq!(payment.state().order_id, order_id);
        assert_eq!(payment.state().state, PaymentState::Initiated);

        let drafts = ConvergencePoller::new(Arc::clone(&s.stores.drafts));
        let with_registrant = drafts
            .wait(
                ConvergenceRequest::new(order_id.0, draft.version(), budget)
                    .until(|d: &DraftOrder| d.registrant.is_some()),
            )
            .await;
        assert!(with_registrant.is_converged());

        s.handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sold_out_conference_is_rejected() {
        let s = site(0);
        running(&s.handle).await;
        let order_id = OrderId::generate();

        s.flow
            .start_registration(RegisterToConference::new(
                order_id,
                s.flow.conference().id,
                seats(s.seat, 1),
            ))
            .unwrap();

        assert_eq!(s.flow.await_reservation(order_id, 0).await, ReservationOutcome::Rejected);
        s.handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn partial_reservation_can_be_resubmitted() {
        let s = site(3);
        running(&s.handle).await;
        let order_id = OrderId::generate();
        let conference_id = s.flow.conference().id;

        s.flow
            .start_registration(RegisterToConference::new(order_id, conference_id, seats(s.seat, 5)))
            .unwrap();
        let order_version = match s.flow.await_reservation(order_id, 0).await {
            ReservationOutcome::PartiallyReserved { order_version } => order_version,
            other => panic!("expected PartiallyReserved, got {other:?}"),
        };

        s.flow
            .start_registration(RegisterToConference::new(order_id, conference_id, seats(s.seat, 3)))
            .unwrap();
        match s.flow.await_reservation(order_id, order_version).await {
            ReservationOutcome::Ready { priced, .. } => assert_eq!(priced.state().total, 75_000),
            other => panic!("expected Ready, got {other:?}"),
        }

        s.handle.shutdown().await.unwrap();
    }
}
