use std::{future::Future, sync::Arc};

use tokio_util::task::TaskTracker;

use crate::{
    config::Config,
    database::{KvStore, init_redis},
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn KvStore>,
    tasks: TaskTracker,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();
        let store = Arc::new(init_redis(&config.redis_url).await);

        Arc::new(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            store,
            tasks: TaskTracker::new(),
        }
    }

    /// Run a write after the response has been sent. Tracked so shutdown can
    /// wait for it instead of dropping it mid-flight.
    pub fn defer<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Wait for all deferred writes to finish.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
