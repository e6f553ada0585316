use crate::application::context::PaymentStateControlContext;
use crate::application::janitor::{IncompletePaymentTransactionTask, Janitor};
use crate::application::retry::PluginControlledPaymentRetryService;
use crate::application::runner::PluginControlPaymentAutomatonRunner;
use crate::config::PaymentConfig;
use crate::domain::clock::Clock;
use crate::domain::notification::NotificationQueueService;
use crate::domain::payment::{InternalCallContext, PaymentRequest};
use crate::domain::plugin::PluginRegistry;
use crate::domain::ports::{PaymentDaoRef, PaymentPluginApiRef};
use crate::error::Result;
use std::sync::Arc;

/// Wires the control state machine with its retry service and janitor, and
/// drives their lifecycles together.
pub struct PaymentService {
    runner: Arc<PluginControlPaymentAutomatonRunner>,
    retry_service: Arc<PluginControlledPaymentRetryService>,
    janitor: Arc<Janitor>,
}

impl PaymentService {
    pub fn new(
        config: &PaymentConfig,
        dao: PaymentDaoRef,
        gateway: PaymentPluginApiRef,
        registry: Arc<PluginRegistry>,
        queue_service: Arc<dyn NotificationQueueService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let task = Arc::new(IncompletePaymentTransactionTask::new(
            dao.clone(),
            gateway.clone(),
            clock.clone(),
            &config.janitor,
        ));
        let janitor = Arc::new(Janitor::new(queue_service.clone(), task));
        let retry_service = Arc::new(PluginControlledPaymentRetryService::new(queue_service));
        let runner = Arc::new(
            PluginControlPaymentAutomatonRunner::new(
                dao,
                gateway,
                registry,
                retry_service.clone(),
                clock,
            )
            .with_event_listener(janitor.clone()),
        );
        Self {
            runner,
            retry_service,
            janitor,
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        self.retry_service
            .initialize(Arc::downgrade(&self.runner))
            .await?;
        self.janitor.initialize().await
    }

    pub async fn start(&self) -> Result<()> {
        self.retry_service.start().await?;
        self.janitor.start().await
    }

    /// Stops the janitor first. Both services are stopped even if the first
    /// one fails; the first error is returned.
    pub async fn stop(&self) -> Result<()> {
        let janitor = self.janitor.stop().await;
        let retry = self.retry_service.stop().await;
        janitor.and(retry)
    }

    pub async fn process_payment(
        &self,
        request: PaymentRequest,
        context: InternalCallContext,
    ) -> Result<PaymentStateControlContext> {
        self.runner.run(request, context).await
    }

    pub fn runner(&self) -> &Arc<PluginControlPaymentAutomatonRunner> {
        &self.runner
    }

    pub fn retry_service(&self) -> &Arc<PluginControlledPaymentRetryService> {
        &self.retry_service
    }

    pub fn janitor(&self) -> &Arc<Janitor> {
        &self.janitor
    }
}
