use shared::clients::{
    spawn_notification, CancellationEmail, ConfirmationEmail, EmailNotifier, PaymentLine, User,
    UserDirectory,
};
use shared::PaymentConfirmed;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::NotificationQueue;

/// Tells customers how their payment went. Every step is best-effort: a
/// failing lookup, queue or email is logged and never fails the payment.
#[derive(Clone)]
pub struct CustomerNotifier {
    users: Arc<dyn UserDirectory>,
    queue: Arc<dyn NotificationQueue>,
    email: Arc<dyn EmailNotifier>,
}

impl CustomerNotifier {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        queue: Arc<dyn NotificationQueue>,
        email: Arc<dyn EmailNotifier>,
    ) -> Self {
        Self { users, queue, email }
    }

    pub async fn recipient(&self, user_id: i64) -> Option<User> {
        match self.users.find_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!(user_id, error = %e, "could not look up customer contact");
                None
            }
        }
    }

    async fn enqueue(&self, event: PaymentConfirmed) {
        match self.queue.enqueue(&event).await {
            Ok(()) => info!(
                order_id = %event.order_id,
                event_id = %event.event_id,
                "payment confirmation queued"
            ),
            Err(e) => error!(
                order_id = %event.order_id,
                error = %e,
                "failed to queue payment confirmation"
            ),
        }
    }

    /// Approval from the payment worker. The queue consumer sends the email.
    pub async fn approved(&self, order_id: Uuid, user_id: i64, amount: f64) {
        let user = self.recipient(user_id).await;
        let (name, email) = user.map_or((None, None), |u| (u.name, u.email));
        self.enqueue(PaymentConfirmed::new(order_id, user_id, amount).with_recipient(name, email))
            .await;
    }

    /// Synchronous confirmation. The email goes out directly with the payment
    /// breakdown, so the queued event carries no address.
    pub async fn confirmed(
        &self,
        order_id: Uuid,
        user: Option<User>,
        user_id: i64,
        amount: f64,
        payments: Vec<PaymentLine>,
    ) {
        let name = user.as_ref().and_then(|u| u.name.clone());
        self.enqueue(PaymentConfirmed::new(order_id, user_id, amount).with_recipient(name, None))
            .await;

        if let Some(to) = user.and_then(|u| u.email) {
            let email = Arc::clone(&self.email);
            let message = ConfirmationEmail {
                to,
                order_id,
                amount,
                payments,
            };
            spawn_notification("payment confirmation", async move {
                email.payment_confirmed(&message).await
            });
        }
    }

    pub async fn declined(&self, order_id: Uuid, user_id: i64, amount: f64) {
        let Some(to) = self.recipient(user_id).await.and_then(|u| u.email) else {
            return;
        };
        let email = Arc::clone(&self.email);
        let message = CancellationEmail {
            to,
            order_id,
            amount: Some(amount),
        };
        spawn_notification("payment cancellation", async move {
            email.payment_cancelled(&message).await
        });
    }
}
