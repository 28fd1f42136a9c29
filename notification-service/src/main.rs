mod api;
mod email;
mod observer;
#[cfg(test)]
mod testing;
mod worker;

use anyhow::Result;
use clap::Parser;
use shared::kafka::{self, ConsumerLoop};
use shared::queue::RedisQueue;
use shared::telemetry::{self, LogFormat};
use std::sync::Arc;
use tracing::info;

use crate::email::{EmailSettings, EmailTemplates, LogMailer, Mailer};
use crate::observer::PaymentRequestObserver;
use crate::worker::ConfirmationWorker;

#[derive(Parser)]
#[command(name = "notification-service")]
struct Args {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    kafka_brokers: String,

    #[arg(long, env = "KAFKA_PAYMENT_TOPIC", default_value = "orders.payment.request")]
    payment_topic: String,

    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "notification-service")]
    group_id: String,

    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    #[arg(long, env = "PAYMENT_NOTIFICATION_QUEUE", default_value = "payment_notifications")]
    notification_queue: String,

    #[arg(long, env = "MAIL_FROM", default_value = "no-reply@ecommerce.local")]
    mail_from: String,

    #[arg(long, env = "SUPPLIER_EMAIL", default_value = "supplier@ecommerce.local")]
    supplier_email: String,

    #[arg(long, env = "LOW_STOCK_THRESHOLD", default_value_t = 5)]
    low_stock_threshold: i64,

    #[arg(long, env = "MAX_DELIVERIES", default_value_t = 5)]
    max_deliveries: u64,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init("notification-service", args.log_format);

    let templates = Arc::new(EmailTemplates::new(EmailSettings {
        from: args.mail_from,
        supplier_email: args.supplier_email,
        low_stock_threshold: args.low_stock_threshold,
    })?);
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);

    let consumer = kafka::consumer(&args.kafka_brokers, &args.group_id, &[&args.payment_topic])?;
    tokio::spawn(ConsumerLoop::new(consumer, PaymentRequestObserver).run());

    let queue = RedisQueue::connect(&args.redis_url, &args.notification_queue)
        .await?
        .with_group(&args.group_id, format!("{}-{}", args.group_id, std::process::id()));
    let worker = ConfirmationWorker::new(
        Arc::new(queue),
        mailer.clone(),
        templates.clone(),
        args.max_deliveries,
    );
    tokio::spawn(worker.run());

    let app = api::create_router(api::AppState { mailer, templates });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Notification service web server started on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shared::signal::shutdown_signal())
        .await?;

    info!("Notification service stopped");
    Ok(())
}
