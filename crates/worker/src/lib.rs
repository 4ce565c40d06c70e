//! Worker host wiring: one in-process pipeline for the registration site.
//!
//! `start` builds the command channel, read models, handlers and the supervised
//! processing loop, and returns the request-side flow alongside the loop handle.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use catchup_infra::InMemoryVersionedStore;
use catchup_infra::config::MAINTENANCE_MODE_VAR;
use catchup_infra::processing::{
    AnyMaintenance, CommandProcessor, EnvMaintenanceSource, MaintenanceFlag, MaintenanceSource,
    ProcessingLoop, ProcessingLoopHandle, SharedReceiver, StartError,
};
use catchup_infra::{CommandGateway, ConvergencePoller, WorkerSettings};
use catchup_messaging::InMemoryCommandChannel;
use catchup_observability::{LogTelemetrySink, Telemetry};
use catchup_registration::{
    Conference, ConferenceId, DraftOrder, PricedOrder, RegistrationFlow, RegistrationStores,
    SeatType, SeatTypeId, register_commands, registration_handlers,
};

pub type SiteFlow = RegistrationFlow<
    InMemoryCommandChannel,
    Arc<InMemoryVersionedStore<DraftOrder>>,
    Arc<InMemoryVersionedStore<PricedOrder>>,
>;

pub struct Host {
    pub flow: SiteFlow,
    pub stores: RegistrationStores,
    pub seat_types: Vec<SeatType>,
    /// Operator switch, seeded from `WorkerSettings::maintenance_mode`.
    pub maintenance: MaintenanceFlag,
    pub handle: ProcessingLoopHandle,
}

/// Seat catalogue the demo conference is published with.
pub fn demo_seat_types() -> Vec<SeatType> {
    vec![
        SeatType {
            id: SeatTypeId::generate(),
            name: "General admission".to_string(),
            price: 19_900,
            quota: 200,
        },
        SeatType {
            id: SeatTypeId::generate(),
            name: "Workshop".to_string(),
            price: 9_900,
            quota: 30,
        },
    ]
}

pub fn demo_conference() -> Conference {
    Conference {
        id: ConferenceId::generate(),
        code: "catchup".to_string(),
        name: "Catch-up Conf".to_string(),
    }
}

/// Build and spawn the pipeline. Maintenance is on while the settings flag or
/// the environment variable (re-read on every refresh) is on.
pub fn start(settings: &WorkerSettings) -> Host {
    start_with(
        settings,
        Arc::new(EnvMaintenanceSource::new(MAINTENANCE_MODE_VAR)),
    )
}

/// Like [`start`], with `external` in place of the environment source.
pub fn start_with(settings: &WorkerSettings, external: Arc<dyn MaintenanceSource>) -> Host {
    let telemetry = Telemetry::when(
        settings.telemetry_enabled,
        Arc::new(LogTelemetrySink::new(settings.name.clone())),
    );

    let stores = RegistrationStores::new();
    let seat_types = demo_seat_types();
    let handlers = Arc::new(registration_handlers(&stores, seat_types.clone()));

    let (channel, rx) = InMemoryCommandChannel::bounded(settings.channel_capacity);
    let receiver = SharedReceiver::new(rx);
    let gateway = Arc::new(register_commands(
        CommandGateway::new(channel).with_telemetry(telemetry.clone()),
    ));

    let maintenance = MaintenanceFlag::new(settings.maintenance_mode);
    let source = AnyMaintenance::new()
        .with(Arc::new(maintenance.clone()))
        .with(external);

    let workers = settings.workers;
    let handle = ProcessingLoop::new(settings.loop_config(), move || {
        Ok::<_, StartError>(
            CommandProcessor::new(receiver.clone(), Arc::clone(&handlers)).with_workers(workers),
        )
    })
    .with_maintenance(Arc::new(source))
    .with_telemetry(telemetry.clone())
    .spawn();

    let flow = RegistrationFlow::new(
        gateway,
        ConvergencePoller::new(Arc::clone(&stores.drafts)).with_telemetry(telemetry.clone()),
        ConvergencePoller::new(Arc::clone(&stores.priced)).with_telemetry(telemetry),
        demo_conference(),
    );

    info!(
        worker = %settings.name,
        workers,
        capacity = settings.channel_capacity,
        telemetry = settings.telemetry_enabled,
        maintenance = settings.maintenance_mode,
        "worker host started"
    );

    Host {
        flow,
        stores,
        seat_types,
        maintenance,
        handle,
    }
}

/// Cancel `stop` once `signal` fires. A listener that cannot be installed is
/// logged and the host keeps running.
pub async fn cancel_on_signal<S>(signal: S, stop: CancellationToken)
where
    S: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("shutdown requested");
            stop.cancel();
        }
        Err(err) => error!(error = %err, "cannot listen for shutdown signal; running until the loop exits"),
    }
}
