//! Wiring of the dispatch components around their shared state.

use std::sync::Arc;

use sqlx::PgPool;
use gatehouse_core::callback::CallbackMessage;
use gatehouse_core::correlation::CorrelationTable;
use gatehouse_core::throttle::QueueThrottle;
use gatehouse_core::types::DbId;
use gatehouse_db::CreditLedger;
use gatehouse_events::EventBus;
use gatehouse_queue::{Broker, ClaimStore};

use crate::admission::AdmissionController;
use crate::analytics::AnalyticsSink;
use crate::callback::CallbackProcessor;
use crate::catalog::Catalog;
use crate::config::DispatchConfig;
use crate::dispatcher::JobDispatcher;
use crate::error::DispatchError;
use crate::screener::PromptScreener;
use crate::watchdog::TimeoutWatchdog;

/// Everything a front end needs to submit jobs and feed callbacks.
#[derive(Clone)]
pub struct Services {
    pub pool: PgPool,
    pub config: Arc<DispatchConfig>,
    pub ledger: CreditLedger,
    pub catalog: Arc<Catalog>,
    pub broker: Arc<dyn Broker>,
    pub claims: Arc<dyn ClaimStore>,
    pub events: Arc<EventBus>,
    pub throttle: Arc<QueueThrottle<DbId>>,
    pub correlation: Arc<CorrelationTable<CallbackMessage>>,
    pub dispatcher: Arc<JobDispatcher>,
    pub processor: Arc<CallbackProcessor>,
    pub watchdog: TimeoutWatchdog,
}

impl Services {
    pub fn new(
        pool: PgPool,
        config: DispatchConfig,
        catalog: Arc<Catalog>,
        broker: Arc<dyn Broker>,
        claims: Arc<dyn ClaimStore>,
        screener: Arc<dyn PromptScreener>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        let config = Arc::new(config);
        let ledger = CreditLedger::new(config.never_expires_at);
        let events = Arc::new(EventBus::default());
        let throttle = Arc::new(QueueThrottle::new(config.queue_entry_ttl));
        let correlation = Arc::new(CorrelationTable::new());

        let processor = Arc::new(CallbackProcessor {
            pool: pool.clone(),
            config: Arc::clone(&config),
            ledger,
            claims: Arc::clone(&claims),
            throttle: Arc::clone(&throttle),
            correlation: Arc::clone(&correlation),
            events: Arc::clone(&events),
            analytics,
        });
        let watchdog = TimeoutWatchdog::new(Arc::clone(&processor));

        let dispatcher = Arc::new(JobDispatcher {
            pool: pool.clone(),
            config: Arc::clone(&config),
            ledger,
            admission: AdmissionController::new(
                Arc::clone(&throttle),
                config.overflow_max,
                config.overflow_penalty,
            ),
            catalog: Arc::clone(&catalog),
            screener,
            broker: Arc::clone(&broker),
            claims: Arc::clone(&claims),
            correlation: Arc::clone(&correlation),
            events: Arc::clone(&events),
            processor: Arc::clone(&processor),
            watchdog: watchdog.clone(),
        });

        Self {
            pool,
            config,
            ledger,
            catalog,
            broker,
            claims,
            events,
            throttle,
            correlation,
            dispatcher,
            processor,
            watchdog,
        }
    }

    /// Re-arm timeouts for jobs left in flight by a previous process.
    pub async fn recover(&self) -> Result<usize, DispatchError> {
        self.watchdog
            .recover(&self.pool, self.claims.as_ref(), &self.config)
            .await
    }
}
