//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Any long, non-cpu-bound operation (e.g. I/O, database operations,
//! etc.) should be expressed as futures or asynchronous functions.
//!
//! The M-Pesa webhooks are special: the provider must be answered within its timeout whatever happens inside, so the
//! engine work is spawned onto its own task, and the handler waits for it for at most `ack_timeout` before answering.
use actix_web::{get, web, HttpResponse, Responder};
use fee_payment_engine::{
    helpers::MatchOutcome,
    payment_objects::PaymentOutcome,
    Pagination,
    PaymentFlowApi,
    PaymentGatewayDatabase,
    StudentApi,
    StudentManagement,
    UnmatchedQueueApi,
};
use log::*;

use crate::{
    config::GatewayOptions,
    data_objects::{PageParams, ProviderAck, ResolveRequest},
    delivery::{deliver_notification, Delivery, RetryQueue},
    errors::ServerError,
    mpesa::{self, Notification},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   M-Pesa webhooks  ----------------------------------------------------
route!(mpesa_confirmation => Post "/confirmation" impl PaymentGatewayDatabase);
/// C2B (paybill / till) payment confirmation.
pub async fn mpesa_confirmation<B: PaymentGatewayDatabase + 'static>(
    api: web::Data<PaymentFlowApi<B>>,
    options: web::Data<GatewayOptions>,
    queue: web::Data<RetryQueue>,
    body: web::Bytes,
) -> HttpResponse {
    trace!("💻️ Received C2B confirmation");
    let notification = mpesa::parse_c2b(&body, options.provider_utc_offset_hours);
    hand_off(api, options, queue, notification).await
}

route!(mpesa_manual => Post "/manual" impl PaymentGatewayDatabase);
/// Payments confirmed by hand, e.g. by the bursar from a bank slip or a provider statement.
pub async fn mpesa_manual<B: PaymentGatewayDatabase + 'static>(
    api: web::Data<PaymentFlowApi<B>>,
    options: web::Data<GatewayOptions>,
    queue: web::Data<RetryQueue>,
    body: web::Bytes,
) -> HttpResponse {
    trace!("💻️ Received manual payment confirmation");
    let notification = mpesa::parse_manual(&body, &api.config().currency);
    hand_off(api, options, queue, notification).await
}

route!(mpesa_stk_callback => Post "/stk_callback" impl PaymentGatewayDatabase);
/// The result of an STK push prompt.
pub async fn mpesa_stk_callback<B: PaymentGatewayDatabase + 'static>(
    api: web::Data<PaymentFlowApi<B>>,
    options: web::Data<GatewayOptions>,
    queue: web::Data<RetryQueue>,
    body: web::Bytes,
) -> HttpResponse {
    trace!("💻️ Received STK callback");
    let notification = mpesa::parse_stk(&body, options.provider_utc_offset_hours);
    hand_off(api, options, queue, notification).await
}

route!(mpesa_validation => Post "/validation" impl PaymentGatewayDatabase);
/// Pre-payment validation. Nothing is recorded. References are only checked when strict validation is on.
pub async fn mpesa_validation<B: PaymentGatewayDatabase + 'static>(
    api: web::Data<PaymentFlowApi<B>>,
    options: web::Data<GatewayOptions>,
    body: web::Bytes,
) -> HttpResponse {
    trace!("💻️ Received C2B validation request");
    let request = match mpesa::parse_c2b_validation(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("💻️ Malformed validation request. {e}");
            return HttpResponse::Ok().json(ProviderAck::rejected(e));
        },
    };
    if !options.strict_validation {
        return HttpResponse::Ok().json(ProviderAck::accepted());
    }
    let reference = request.account_reference();
    let ack = match api.check_reference(reference.as_deref()).await {
        Ok(MatchOutcome::Matched(student)) => {
            debug!("💻️ Validation: {reference:?} belongs to {}", student.admission_no);
            ProviderAck::accepted()
        },
        Ok(MatchOutcome::Unmatched(failure)) => {
            info!("💻️ Validation: rejecting account reference {reference:?}. {}", failure.reason);
            ProviderAck::rejected(format!("Unknown account {}", reference.as_deref().unwrap_or_default()))
        },
        Err(e) => {
            // Payers are not turned away because our store is down.
            warn!("💻️ Validation: could not check {reference:?}, accepting it. {e}");
            ProviderAck::accepted()
        },
    };
    HttpResponse::Ok().json(ack)
}

/// Spawns the engine work for a notification and answers the provider no later than the ack deadline.
async fn hand_off<B: PaymentGatewayDatabase + 'static>(
    api: web::Data<PaymentFlowApi<B>>,
    options: web::Data<GatewayOptions>,
    queue: web::Data<RetryQueue>,
    notification: Notification,
) -> HttpResponse {
    let ack = match &notification {
        Notification::Unidentifiable(failed) => ProviderAck::rejected(&failed.reason),
        _ => ProviderAck::accepted(),
    };
    let label = notification.txid().unwrap_or("<no txid>").to_string();
    let task = actix_web::rt::spawn(async move {
        match deliver_notification(api.as_ref(), notification.clone()).await {
            Ok(Delivery::Processed(outcome)) => log_outcome(&outcome),
            Ok(delivery) => debug!("💻️ {delivery:?}"),
            Err(e) => {
                warn!("💻️ Could not store notification {:?}. It will be retried. {e}", notification.txid());
                queue.park(notification);
            },
        }
    });
    match tokio::time::timeout(options.ack_timeout, task).await {
        Ok(Ok(())) => trace!("💻️ Notification {label} handled before acknowledgment"),
        Ok(Err(e)) => error!("💻️ The processing task for notification {label} died. {e}"),
        Err(_) => {
            warn!(
                "💻️ Notification {label} is taking longer than {:?}. Acknowledging now; processing continues.",
                options.ack_timeout
            );
        },
    }
    HttpResponse::Ok().json(ack)
}

fn log_outcome(outcome: &PaymentOutcome) {
    match outcome {
        PaymentOutcome::Allocated(r) => info!("💻️ Payment {} allocated to student #{}", r.payment.txid, r.student.id),
        PaymentOutcome::AlreadyAllocated(r) => debug!("💻️ Payment {} was already allocated", r.payment.txid),
        PaymentOutcome::Unmatched(p, failure) => info!("💻️ Payment {} is unmatched. {}", p.txid, failure.reason),
        PaymentOutcome::Failed(p) => warn!("💻️ Payment {} failed. {}", p.txid, p.reason.as_deref().unwrap_or_default()),
        PaymentOutcome::Duplicate(txid) => debug!("💻️ Payment {txid} is a duplicate"),
    }
}

//----------------------------------------------   Operator API  ----------------------------------------------------
route!(unmatched_payments => Get "/unmatched" impl StudentManagement);
pub async fn unmatched_payments<B: StudentManagement>(
    api: web::Data<UnmatchedQueueApi<B>>,
    params: web::Query<PageParams>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ GET unmatched payments");
    let page = api.list_unmatched(Pagination::from(params.into_inner())).await?;
    Ok(HttpResponse::Ok().json(page))
}

route!(failed_payments => Get "/failed" impl StudentManagement);
pub async fn failed_payments<B: StudentManagement>(
    api: web::Data<UnmatchedQueueApi<B>>,
    params: web::Query<PageParams>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ GET failed payments");
    let page = api.list_failed(Pagination::from(params.into_inner())).await?;
    Ok(HttpResponse::Ok().json(page))
}

route!(resolve_payment => Post "/unmatched/{txid}/resolve" impl PaymentGatewayDatabase);
/// Assigns an unmatched payment to a student and allocates it. Repeating the call is harmless.
pub async fn resolve_payment<B: PaymentGatewayDatabase>(
    api: web::Data<PaymentFlowApi<B>>,
    path: web::Path<String>,
    body: web::Json<ResolveRequest>,
) -> Result<HttpResponse, ServerError> {
    let txid = path.into_inner();
    let student_id = body.student_id;
    info!("💻️ Resolving payment {txid} to student #{student_id}");
    let outcome = api.resolve_unmatched(&txid, student_id).await?;
    log_outcome(&outcome);
    Ok(HttpResponse::Ok().json(outcome))
}

route!(payment_detail => Get "/payments/{txid}" impl StudentManagement);
pub async fn payment_detail<B: StudentManagement>(
    api: web::Data<StudentApi<B>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let txid = path.into_inner();
    trace!("💻️ GET payment {txid}");
    let detail = api.payment_detail(&txid).await?.ok_or_else(|| ServerError::NoRecordFound(format!("payment {txid}")))?;
    Ok(HttpResponse::Ok().json(detail))
}

route!(student_statement => Get "/students/{admission_no}/statement" impl StudentManagement);
pub async fn student_statement<B: StudentManagement>(
    api: web::Data<StudentApi<B>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let admission_no = path.into_inner();
    trace!("💻️ GET statement for {admission_no}");
    let statement = api
        .statement(&admission_no)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("student {admission_no}")))?;
    Ok(HttpResponse::Ok().json(statement))
}

route!(apply_credit => Post "/students/{id}/apply_credit" impl PaymentGatewayDatabase);
pub async fn apply_credit<B: PaymentGatewayDatabase>(
    api: web::Data<PaymentFlowApi<B>>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ServerError> {
    let student_id = path.into_inner();
    info!("💻️ Applying credit for student #{student_id}");
    let application = api.apply_credit(student_id).await?;
    Ok(HttpResponse::Ok().json(application))
}
