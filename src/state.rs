use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::couriers::{AdapterRegistry, StoreInfo};
use crate::engine::otp::{OtpCodeSource, RandomCodes};
use crate::error::AppError;
use crate::ledger::TrackingLedger;
use crate::models::courier::{Courier, CourierProvider};
use crate::models::delivery_person::DeliveryPerson;
use crate::notify::{LogNotifier, Notifier, StatusChange};
use crate::observability::metrics::Metrics;
use crate::settings::{SettingsStore, AUTO_CREATE_COURIER_ORDER, DEFAULT_COURIER_ID};
use crate::store::{IdSequence, OrderStore};

pub struct AppState {
    pub config: Config,
    pub orders: OrderStore,
    pub couriers: DashMap<i64, Courier>,
    pub delivery_persons: DashMap<i64, DeliveryPerson>,
    pub ledger: TrackingLedger,
    pub settings: SettingsStore,
    pub adapters: AdapterRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub otp_codes: Arc<dyn OtpCodeSource>,
    pub status_events_tx: broadcast::Sender<StatusChange>,
    pub metrics: Metrics,
    pub courier_ids: IdSequence,
    pub delivery_person_ids: IdSequence,
}

impl AppState {
    pub fn new(
        config: Config,
        adapters: AdapterRegistry,
        notifier: Arc<dyn Notifier>,
        otp_codes: Arc<dyn OtpCodeSource>,
    ) -> Self {
        let (status_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));

        let settings = SettingsStore::new();
        settings.set(
            AUTO_CREATE_COURIER_ORDER,
            config.auto_create_courier_order.to_string(),
        );
        if let Some(courier_id) = config.default_courier_id {
            settings.set(DEFAULT_COURIER_ID, courier_id.to_string());
        }

        let state = Self {
            config,
            orders: OrderStore::new(),
            couriers: DashMap::new(),
            delivery_persons: DashMap::new(),
            ledger: TrackingLedger::new(),
            settings,
            adapters,
            notifier,
            otp_codes,
            status_events_tx,
            metrics: Metrics::new(),
            courier_ids: IdSequence::new(),
            delivery_person_ids: IdSequence::new(),
        };
        state.seed_couriers();
        state
    }

    /// Production wiring: vendor adapters from config, log notifier, OS-random OTPs.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let adapters = AdapterRegistry::from_config(&config)?;
        Ok(Self::new(
            config,
            adapters,
            Arc::new(LogNotifier),
            Arc::new(RandomCodes),
        ))
    }

    /// One courier row per registered integration, in a stable order.
    fn seed_couriers(&self) {
        for provider in [
            CourierProvider::Pathao,
            CourierProvider::Steadfast,
            CourierProvider::Internal,
        ] {
            if !self.adapters.contains(provider) {
                continue;
            }

            let courier = Courier {
                id: self.courier_ids.next(),
                name: provider.as_str().to_string(),
                provider,
                courier_type: provider.courier_type(),
                is_active: true,
                updated_at: Utc::now(),
            };
            self.couriers.insert(courier.id, courier);
        }
    }

    pub fn courier_for(&self, provider: CourierProvider) -> Option<Courier> {
        let mut matching: Vec<Courier> = self
            .couriers
            .iter()
            .filter(|entry| entry.value().provider == provider)
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|courier| courier.id);
        matching.into_iter().next()
    }

    pub fn store_info(&self) -> StoreInfo {
        StoreInfo {
            name: self.config.store.name.clone(),
            phone: self.config.store.phone.clone(),
            address: self.config.store.address.clone(),
        }
    }
}
