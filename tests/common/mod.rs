use chrono::Utc;
use paycontrol::application::service::PaymentService;
use paycontrol::config::PaymentConfig;
use paycontrol::domain::clock::ClockMock;
use paycontrol::domain::payment::{InternalCallContext, PaymentRequest, TransactionType};
use paycontrol::domain::plugin::PluginRegistry;
use paycontrol::infrastructure::in_memory::InMemoryPaymentDao;
use paycontrol::infrastructure::notification_queue::InMemoryNotificationQueueService;
use paycontrol::infrastructure::plugins::RetrySchedulePlugin;
use paycontrol::interfaces::simulation::{
    SIMULATION_TENANT_RECORD_ID, ScriptedPaymentGateway, parse_outcomes, run_until_idle,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

/// A started `PaymentService` over in-memory adapters and a mock clock.
pub struct Harness {
    pub clock: Arc<ClockMock>,
    pub dao: Arc<InMemoryPaymentDao>,
    pub gateway: Arc<ScriptedPaymentGateway>,
    pub queues: Arc<InMemoryNotificationQueueService>,
    pub service: PaymentService,
}

impl Harness {
    pub async fn start(config: PaymentConfig) -> Self {
        let clock = Arc::new(ClockMock::new(Utc::now()));
        let dao = Arc::new(InMemoryPaymentDao::new());
        let gateway = Arc::new(ScriptedPaymentGateway::new());
        let queues = Arc::new(InMemoryNotificationQueueService::new(clock.clone(), None));
        let registry = Arc::new(PluginRegistry::new());
        for plugin in &config.control_plugins {
            registry
                .register(
                    plugin.name.clone(),
                    Arc::new(RetrySchedulePlugin::new(clock.clone(), plugin.retry_delays())),
                )
                .await;
        }
        let service = PaymentService::new(
            &config,
            dao.clone(),
            gateway.clone(),
            registry,
            queues.clone(),
            clock.clone(),
        );
        service.initialize().await.unwrap();
        service.start().await.unwrap();
        Self {
            clock,
            dao,
            gateway,
            queues,
            service,
        }
    }

    pub async fn script(&self, key: &str, outcomes: &str) {
        self.gateway
            .script(key, parse_outcomes(outcomes).unwrap())
            .await;
    }

    pub async fn drain(&self) -> usize {
        run_until_idle(&self.queues, &self.clock, 1000).await
    }
}

pub fn config(retry_delays_secs: Vec<u64>, janitor_delays_secs: Vec<u64>) -> PaymentConfig {
    let mut config = PaymentConfig::default();
    config.control_plugins[0].retry_delays_secs = retry_delays_secs;
    config.janitor.incomplete_transaction_retry_delays_secs = janitor_delays_secs;
    config
}

pub fn request(key: &str, plugins: &[&str]) -> PaymentRequest {
    PaymentRequest {
        transaction_type: TransactionType::Purchase,
        account_id: Uuid::from_u64_pair(1, 0),
        payment_method_id: Uuid::from_u64_pair(1, 1),
        payment_id: None,
        payment_external_key: format!("{key}-payment"),
        transaction_external_key: key.to_string(),
        amount: dec!(42.0),
        currency: "USD".to_string(),
        properties: Vec::new(),
        plugin_names: plugins.iter().map(|name| name.to_string()).collect(),
        is_api_payment: true,
    }
}

pub fn context() -> InternalCallContext {
    InternalCallContext::new(SIMULATION_TENANT_RECORD_ID, Some(1), Uuid::new_v4())
}
