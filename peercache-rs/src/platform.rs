//! Provides a tiny DI like container which keeps all central components of a node.
//!
//! The platform is basically a map from type to **Arc<T>**. Components like the
//! [Config](crate::config::Config), the [GroupRegistry](crate::registry::GroupRegistry) or the
//! [HttpPool](crate::pool::HttpPool) are registered here so that other parts of the node can
//! look them up. It also keeps the central **is_running** flag, which is toggled once
//! [Platform::terminate] is invoked. Long running tasks (like servers) can await
//! [Platform::terminated] to shut down gracefully.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use peercache::platform::Platform;
//! struct Service {
//!     value: i32,
//! }
//!
//! let platform = Platform::new();
//! platform.register::<Service>(Arc::new(Service { value: 42 }));
//! assert_eq!(platform.require::<Service>().value, 42);
//! assert_eq!(platform.is_running(), true);
//!
//! // Terminating releases all services...
//! platform.terminate();
//! assert_eq!(platform.find::<Service>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

/// Keeps all central services of a node in a single place.
pub struct Platform {
    services: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    running: watch::Sender<bool>,
}

impl Platform {
    /// Creates a new and running platform.
    pub fn new() -> Arc<Self> {
        let (running, _) = watch::channel(true);
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            running,
        })
    }

    /// Registers a service (replacing any previously registered service of the same type).
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .services
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered service.
    ///
    /// Note that all services are released once the platform has been terminated. Code which
    /// might run during shutdown should therefore use this rather than [Platform::require].
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|service| service.clone().downcast::<T>().ok())
    }

    /// Resolves a service which is known to be present.
    ///
    /// # Panics
    /// Panics if the service isn't available or if the platform is already shutting down.
    ///
    /// ```should_panic
    /// # use peercache::platform::Platform;
    /// struct UnknownService;
    ///
    /// let platform = Platform::new();
    /// platform.require::<UnknownService>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the node is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(service) => service,
            None => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Completes once [Platform::terminate] has been invoked.
    pub async fn terminated(&self) {
        let mut receiver = self.running.subscribe();
        let _ = receiver.wait_for(|running| !*running).await;
    }

    /// Terminates the platform.
    ///
    /// This releases all services and wakes up everyone waiting in [Platform::terminated].
    pub fn terminate(&self) {
        self.services.lock().unwrap().clear();
        let _ = self.running.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use crate::platform::Platform;
    use std::time::Duration;

    #[test]
    fn termination_wakes_up_waiting_tasks() {
        crate::testing::test_async(async {
            let platform = Platform::new();

            let waiting_platform = platform.clone();
            let waiting = tokio::spawn(async move { waiting_platform.terminated().await });

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(waiting.is_finished(), false);

            platform.terminate();
            tokio::time::timeout(Duration::from_secs(5), waiting)
                .await
                .unwrap()
                .unwrap();

            // Waiting on a terminated platform completes immediately...
            platform.terminated().await;
        });
    }
}
