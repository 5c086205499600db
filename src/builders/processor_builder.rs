//! Builder for [`QueueProcessor`].

use std::sync::Arc;

use crate::config::QueueConfig;
use crate::core::{
    AnalyticsChannel, DeliveryContext, DeliveryEventSink, DeliveryProvider, QueueError,
    QueueProcessor, QueueStore, Spawn,
};
use crate::infra::queue::connect;
use crate::runtime::TokioSpawner;
use crate::util::clock::{Clock, SystemClock};

/// Assembles a [`QueueProcessor`] from a store, a provider and optional extras.
///
/// ```rust,ignore
/// let processor = QueueProcessorBuilder::new(store, provider)
///     .with_config(QueueConfig::from_env()?)
///     .with_analytics_sink(sink)
///     .build()?;
/// processor.start()?;
/// ```
pub struct QueueProcessorBuilder<S = TokioSpawner> {
    store: Arc<dyn QueueStore>,
    provider: Arc<dyn DeliveryProvider>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    analytics_sink: Option<Arc<dyn DeliveryEventSink>>,
    spawner: Option<S>,
}

impl QueueProcessorBuilder<TokioSpawner> {
    /// Start from defaults, spawning on the current Tokio runtime if there is one.
    pub fn new(store: Arc<dyn QueueStore>, provider: Arc<dyn DeliveryProvider>) -> Self {
        Self {
            store,
            provider,
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
            analytics_sink: None,
            spawner: TokioSpawner::try_current().ok(),
        }
    }

    /// Connect the store named by `config.store` and start a builder around it.
    ///
    /// # Errors
    /// Store connection or migration failures.
    pub async fn from_config(
        config: QueueConfig,
        provider: Arc<dyn DeliveryProvider>,
    ) -> Result<Self, QueueError> {
        config
            .validate()
            .map_err(|e| QueueError::Configuration(format!("config invalid: {e}")))?;
        let store = connect(&config.store).await?;
        Ok(Self::new(store, provider).with_config(config))
    }
}

impl<S: Spawn + Clone> QueueProcessorBuilder<S> {
    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forward delivery events to `sink` through a bounded side channel.
    #[must_use]
    pub fn with_analytics_sink(mut self, sink: Arc<dyn DeliveryEventSink>) -> Self {
        self.analytics_sink = Some(sink);
        self
    }

    /// Spawn the loop, workers and analytics drain on `spawner`.
    pub fn with_spawner<T: Spawn + Clone>(self, spawner: T) -> QueueProcessorBuilder<T> {
        QueueProcessorBuilder {
            store: self.store,
            provider: self.provider,
            config: self.config,
            clock: self.clock,
            analytics_sink: self.analytics_sink,
            spawner: Some(spawner),
        }
    }

    /// Configuration that will be used.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate the configuration and build the processor. The loop is not started.
    ///
    /// # Errors
    /// [`QueueError::Configuration`] for invalid settings or when no spawner is
    /// available.
    pub fn build(self) -> Result<QueueProcessor<S>, QueueError> {
        self.config
            .validate()
            .map_err(|e| QueueError::Configuration(format!("config invalid: {e}")))?;
        let spawner = self.spawner.ok_or_else(|| {
            QueueError::Configuration("no tokio runtime available; supply a spawner".into())
        })?;

        let analytics = match self.analytics_sink {
            Some(sink) => AnalyticsChannel::spawn(sink, self.config.analytics_buffer, &spawner),
            None => AnalyticsChannel::disabled(),
        };
        let ctx = DeliveryContext {
            store: self.store,
            provider: self.provider,
            clock: self.clock,
            retry: self.config.retry_policy(),
            analytics,
            task_timeout: self.config.result_timeout(),
        };
        Ok(QueueProcessor::new(ctx, &self.config, spawner))
    }
}
