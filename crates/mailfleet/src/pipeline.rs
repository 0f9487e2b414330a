//! Concurrent delivery across named routes.
//!
//! Every route runs a dispatcher pulling from one shared inbound queue. A
//! dispatcher takes a task only after acquiring one of its route's `stream`
//! slots, so a busy route leaves queued tasks to the others.

use crate::config::{Route, RouteConfig};
use crate::dialer::Dialer;
use crate::email::Email;
use crate::error::{Error, Result};
use crate::resolver::{Resolve, Resolver};
use crate::session;
use mailfleet_mime::Message;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

/// Performs one delivery attempt for a message over a route.
pub trait Deliver: Send + Sync + 'static {
    /// Delivers `message` over `route`.
    ///
    /// # Errors
    ///
    /// Returns why the attempt failed.
    fn deliver<'a>(
        &'a self,
        route: &'a Route,
        message: Arc<Message>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Delivers over SMTP: smart host or direct-to-MX.
#[derive(Debug, Clone)]
pub struct SmtpDeliverer {
    dialer: Dialer,
}

impl Default for SmtpDeliverer {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpDeliverer {
    /// Creates a deliverer using the system resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(Resolver::new())
    }

    /// Creates a deliverer using `resolver` for MX and PTR lookups.
    #[must_use]
    pub fn with_resolver(resolver: impl Resolve + 'static) -> Self {
        Self {
            dialer: Dialer::new(Arc::new(resolver)),
        }
    }

    /// The dialer used for connections.
    #[must_use]
    pub const fn dialer(&self) -> &Dialer {
        &self.dialer
    }
}

impl Deliver for SmtpDeliverer {
    fn deliver<'a>(
        &'a self,
        route: &'a Route,
        message: Arc<Message>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let connection = self.dialer.connect(route, message.to().domain()).await?;
            session::transact(connection, route, message).await
        })
    }
}

/// Runs one delivery outside any pipeline and reports it through the
/// task's callback.
pub async fn deliver_now<D: Deliver + ?Sized>(deliverer: &D, route: &Route, email: Email) {
    let started = Instant::now();
    let outcome = deliverer.deliver(route, Arc::clone(email.message())).await;
    email.finish(started, outcome);
}

enum State {
    Idle,
    Running {
        tx: mpsc::Sender<Email>,
        dispatchers: Vec<JoinHandle<()>>,
    },
    Stopped,
}

/// Fleet of routes fed from one inbound queue.
pub struct Pipeline<D: Deliver = SmtpDeliverer> {
    routes: Vec<Arc<Route>>,
    deliverer: Arc<D>,
    state: Mutex<State>,
}

impl Pipeline<SmtpDeliverer> {
    /// Creates a pipeline delivering over SMTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any route is invalid or none is given.
    pub fn new(configs: &[RouteConfig]) -> Result<Self> {
        Self::with_deliverer(configs, SmtpDeliverer::new())
    }
}

impl<D: Deliver> Pipeline<D> {
    /// Creates a pipeline with a custom deliverer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any route is invalid or none is given.
    pub fn with_deliverer(configs: &[RouteConfig], deliverer: D) -> Result<Self> {
        if configs.is_empty() {
            return Err(Error::Config("pipeline needs at least one route".into()));
        }
        let routes = configs
            .iter()
            .map(|config| Route::from_config(config).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            routes,
            deliverer: Arc::new(deliverer),
            state: Mutex::new(State::Idle),
        })
    }

    /// The validated routes.
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Launches one dispatcher per route. Must be called within a Tokio
    /// runtime. Starting a running pipeline does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineStopped`] once the pipeline was stopped.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Running { .. } => return Ok(()),
            State::Stopped => return Err(Error::PipelineStopped),
            State::Idle => {}
        }

        let capacity = self.routes.iter().map(|route| route.stream()).sum::<usize>();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Arc::new(tokio::sync::Mutex::new(rx));

        let dispatchers = self
            .routes
            .iter()
            .map(|route| {
                tokio::spawn(dispatch(
                    Arc::clone(route),
                    Arc::clone(&self.deliverer),
                    Arc::clone(&queue),
                ))
            })
            .collect();

        info!(routes = self.routes.len(), "pipeline started");
        *state = State::Running { tx, dispatchers };
        Ok(())
    }

    /// Queues a task.
    ///
    /// Waits while the queue is full. A rejected task still gets its
    /// callback, with the same error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineNotStarted`] before [`start`](Self::start)
    /// and [`Error::PipelineStopped`] after [`stop`](Self::stop).
    pub async fn send(&self, email: Email) -> Result<()> {
        let tx = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                State::Running { tx, .. } => Ok(tx.clone()),
                State::Idle => Err(Error::PipelineNotStarted),
                State::Stopped => Err(Error::PipelineStopped),
            }
        };

        let tx = match tx {
            Ok(tx) => tx,
            Err(err) => {
                let rejected = match err {
                    Error::PipelineNotStarted => Error::PipelineNotStarted,
                    _ => Error::PipelineStopped,
                };
                email.reject(rejected);
                return Err(err);
            }
        };

        if let Err(mpsc::error::SendError(email)) = tx.send(email).await {
            email.reject(Error::PipelineStopped);
            return Err(Error::PipelineStopped);
        }
        Ok(())
    }

    /// Stops accepting tasks and waits until every queued and in-flight
    /// delivery has finished. In-flight deliveries are not cancelled.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, State::Stopped)
        };

        if let State::Running { tx, dispatchers } = previous {
            drop(tx);
            for dispatcher in dispatchers {
                if let Err(err) = dispatcher.await {
                    debug!(error = %err, "dispatcher ended abnormally");
                }
            }
            info!("pipeline stopped");
        }
    }
}

impl<D: Deliver> std::fmt::Debug for Pipeline<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Idle => "idle",
            State::Running { .. } => "running",
            State::Stopped => "stopped",
        };
        f.debug_struct("Pipeline")
            .field("routes", &self.routes)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

async fn dispatch<D: Deliver>(
    route: Arc<Route>,
    deliverer: Arc<D>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Email>>>,
) {
    let slots = Arc::new(Semaphore::new(route.stream()));
    let mut in_flight = JoinSet::new();

    loop {
        let Ok(slot) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let next = queue.lock().await.recv().await;
        let Some(email) = next else {
            break;
        };

        debug!(route = route.name(), id = email.id(), "dispatching");
        let route = Arc::clone(&route);
        let deliverer = Arc::clone(&deliverer);
        in_flight.spawn(async move {
            deliver_now(deliverer.as_ref(), &route, email).await;
            drop(slot);
        });

        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    debug!(route = route.name(), "dispatcher drained");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    struct Accept;

    impl Deliver for Accept {
        fn deliver<'a>(
            &'a self,
            _route: &'a Route,
            _message: Arc<Message>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_requires_routes() {
        let err = Pipeline::with_deliverer(&[], Accept).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_route_rejected() {
        let configs = [RouteConfig::builder("bad").stream(0).build()];
        let err = Pipeline::with_deliverer(&configs, Accept).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let pipeline =
            Pipeline::with_deliverer(&[RouteConfig::builder("a").build()], Accept).unwrap();
        assert!(format!("{pipeline:?}").contains("idle"));

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert!(format!("{pipeline:?}").contains("running"));

        pipeline.stop().await;
        pipeline.stop().await;
        assert!(matches!(pipeline.start(), Err(Error::PipelineStopped)));
    }
}
