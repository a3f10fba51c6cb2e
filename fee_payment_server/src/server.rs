use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use fee_payment_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    PaymentFlowApi,
    SqliteDatabase,
    StudentApi,
    UnmatchedQueueApi,
};
use log::*;

use crate::{
    config::{GatewayOptions, ServerConfig},
    delivery::{RetryQueue, DEFAULT_REDELIVERY_ATTEMPTS, DEFAULT_RETRY_QUEUE_CAPACITY},
    errors::ServerError,
    helpers::Backoff,
    notifications::NotificationDispatcher,
    retry_worker::start_retry_worker,
    routes::{
        health,
        ApplyCreditRoute,
        FailedPaymentsRoute,
        MpesaConfirmationRoute,
        MpesaManualRoute,
        MpesaStkCallbackRoute,
        MpesaValidationRoute,
        PaymentDetailRoute,
        ResolvePaymentRoute,
        StudentStatementRoute,
        UnmatchedPaymentsRoute,
    },
};

const EVENT_BUFFER_SIZE: usize = 256;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(format!("Could not run migrations. {e}")))?;
    let producers = start_event_handlers(&config).await?;
    let flow_api = PaymentFlowApi::new(db.clone(), producers).with_config(config.engine_config());
    let queue = retry_queue(&config);
    let min_age = chrono::Duration::from_std(config.retry_min_age)
        .map_err(|e| ServerError::ConfigurationError(format!("Invalid retry age. {e}")))?;
    let _worker = start_retry_worker(flow_api.clone(), queue.clone(), config.retry_interval, min_age);
    let srv = create_server_instance(config, db, flow_api, queue)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// Wires the notification dispatcher into the engine's event hooks and starts the handler tasks.
async fn start_event_handlers(config: &ServerConfig) -> Result<EventProducers, ServerError> {
    let dispatcher = NotificationDispatcher::from_config(&config.notifications)
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    let mut hooks = EventHooks::default();
    dispatcher.install(&mut hooks);
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    info!("📬️ Event handlers started");
    Ok(producers)
}

fn retry_queue(config: &ServerConfig) -> RetryQueue {
    let backoff = Backoff::new(DEFAULT_REDELIVERY_ATTEMPTS, config.retry_interval, config.retry_interval * 32);
    RetryQueue::new(DEFAULT_RETRY_QUEUE_CAPACITY, backoff)
}

/// Every worker shares the one `flow_api`, so that the per-student allocation locks are the same everywhere.
pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    flow_api: PaymentFlowApi<SqliteDatabase>,
    queue: RetryQueue,
) -> Result<Server, ServerError> {
    let options = GatewayOptions::from_config(&config);
    let srv = HttpServer::new(move || {
        let unmatched_api = UnmatchedQueueApi::new(db.clone());
        let student_api = StudentApi::new(db.clone());
        let webhook_scope = web::scope("/webhooks/mpesa")
            .service(MpesaConfirmationRoute::<SqliteDatabase>::new())
            .service(MpesaManualRoute::<SqliteDatabase>::new())
            .service(MpesaStkCallbackRoute::<SqliteDatabase>::new())
            .service(MpesaValidationRoute::<SqliteDatabase>::new());
        let api_scope = web::scope("/api")
            .service(UnmatchedPaymentsRoute::<SqliteDatabase>::new())
            .service(ResolvePaymentRoute::<SqliteDatabase>::new())
            .service(FailedPaymentsRoute::<SqliteDatabase>::new())
            .service(PaymentDetailRoute::<SqliteDatabase>::new())
            .service(StudentStatementRoute::<SqliteDatabase>::new())
            .service(ApplyCreditRoute::<SqliteDatabase>::new());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("fpg::access_log"))
            .app_data(web::Data::new(flow_api.clone()))
            .app_data(web::Data::new(unmatched_api))
            .app_data(web::Data::new(student_api))
            .app_data(web::Data::new(options))
            .app_data(web::Data::new(queue.clone()))
            .service(health)
            .service(webhook_scope)
            .service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
