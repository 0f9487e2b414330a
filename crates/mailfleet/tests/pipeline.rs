//! Pipeline admission, lifecycle and callback guarantees.

mod support;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailfleet::mime::Message;
use mailfleet::{
    Deliver, DeliveryResult, Email, Error, Pipeline, Result, Route, RouteConfig, SmartHost,
};
use support::MockSmtpServer;

#[derive(Debug, Default)]
struct Stats {
    active: AtomicUsize,
    peak: AtomicUsize,
    per_route: Mutex<HashMap<String, (usize, usize)>>,
}

impl Stats {
    fn route_peak(&self, name: &str) -> usize {
        self.per_route.lock().unwrap().get(name).map_or(0, |(_, peak)| *peak)
    }
}

/// Records how many deliveries overlap, globally and per route.
struct Instrumented {
    stats: Arc<Stats>,
    delay: Duration,
    fail_for: Option<&'static str>,
}

impl Instrumented {
    fn new(delay: Duration) -> (Self, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        let deliverer = Self {
            stats: Arc::clone(&stats),
            delay,
            fail_for: None,
        };
        (deliverer, stats)
    }
}

impl Deliver for Instrumented {
    fn deliver<'a>(
        &'a self,
        route: &'a Route,
        message: Arc<Message>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.stats.peak.fetch_max(now, Ordering::SeqCst);
            {
                let mut per_route = self.stats.per_route.lock().unwrap();
                let entry = per_route.entry(route.name().to_string()).or_default();
                entry.0 += 1;
                entry.1 = entry.1.max(entry.0);
            }

            tokio::time::sleep(self.delay).await;

            self.stats
                .per_route
                .lock()
                .unwrap()
                .entry(route.name().to_string())
                .or_default()
                .0 -= 1;
            self.stats.active.fetch_sub(1, Ordering::SeqCst);

            match self.fail_for {
                Some(address) if message.to().email() == address => Err(Error::Resolution(
                    format!("no mail servers for {}", message.to().domain()),
                )),
                _ => Ok(()),
            }
        })
    }
}

fn message(to: &str) -> Message {
    Message::builder()
        .from("Alice <a@x.tld>")
        .to(to)
        .subject("Hi")
        .text("Hello")
        .build()
        .unwrap()
}

type Results = Arc<Mutex<Vec<DeliveryResult>>>;

fn email(id: usize, to: &str, results: &Results) -> Email {
    let sink = Arc::clone(results);
    Email::new(id.to_string(), message(to)).on_result(move |r| sink.lock().unwrap().push(r))
}

#[tokio::test]
async fn test_route_stream_bounds_concurrency() {
    let (deliverer, stats) = Instrumented::new(Duration::from_millis(20));
    let routes = [RouteConfig::builder("main").stream(5).build()];
    let pipeline = Pipeline::with_deliverer(&routes, deliverer).unwrap();
    let results: Results = Arc::default();

    pipeline.start().unwrap();
    for id in 0..50 {
        pipeline.send(email(id, "b@y.tld", &results)).await.unwrap();
    }
    pipeline.stop().await;

    let peak = stats.peak.load(Ordering::SeqCst);
    assert!(peak <= 5, "peak {peak} exceeds stream");
    assert!(peak > 1, "deliveries never overlapped");

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 50);
    assert!(results.iter().all(DeliveryResult::is_success));
    let ids: HashSet<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 50);
}

#[tokio::test]
async fn test_routes_share_queue_with_separate_limits() {
    let (deliverer, stats) = Instrumented::new(Duration::from_millis(15));
    let routes = [
        RouteConfig::builder("a").stream(2).build(),
        RouteConfig::builder("b").stream(3).build(),
    ];
    let pipeline = Pipeline::with_deliverer(&routes, deliverer).unwrap();
    let results: Results = Arc::default();

    pipeline.start().unwrap();
    for id in 0..40 {
        pipeline.send(email(id, "b@y.tld", &results)).await.unwrap();
    }
    pipeline.stop().await;

    assert!(stats.route_peak("a") <= 2);
    assert!(stats.route_peak("b") <= 3);
    assert!(stats.peak.load(Ordering::SeqCst) <= 5);
    assert!(stats.route_peak("a") > 0 && stats.route_peak("b") > 0);
    assert_eq!(results.lock().unwrap().len(), 40);
}

#[tokio::test]
async fn test_failures_reported_per_task() {
    let (mut deliverer, _stats) = Instrumented::new(Duration::ZERO);
    deliverer.fail_for = Some("bounce@y.tld");
    let pipeline =
        Pipeline::with_deliverer(&[RouteConfig::builder("main").stream(3).build()], deliverer)
            .unwrap();
    let results: Results = Arc::default();

    pipeline.start().unwrap();
    for id in 0..10 {
        let to = if id % 2 == 0 { "ok@y.tld" } else { "bounce@y.tld" };
        pipeline.send(email(id, to, &results)).await.unwrap();
    }
    pipeline.stop().await;

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 10);
    for result in results.iter() {
        let id: usize = result.id.parse().unwrap();
        if id % 2 == 0 {
            assert!(result.is_success());
        } else {
            let error = result.error.as_ref().unwrap();
            assert_eq!(error.to_string(), "421 no mail servers for y.tld");
        }
    }
}

#[tokio::test]
async fn test_send_before_start_rejected() {
    let (deliverer, stats) = Instrumented::new(Duration::ZERO);
    let pipeline =
        Pipeline::with_deliverer(&[RouteConfig::builder("main").build()], deliverer).unwrap();
    let results: Results = Arc::default();

    let err = pipeline.send(email(1, "b@y.tld", &results)).await.unwrap_err();
    assert!(matches!(err, Error::PipelineNotStarted));

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].error, Some(Error::PipelineNotStarted)));
    assert_eq!(stats.peak.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_after_stop_rejected() {
    let (deliverer, _stats) = Instrumented::new(Duration::ZERO);
    let pipeline =
        Pipeline::with_deliverer(&[RouteConfig::builder("main").build()], deliverer).unwrap();
    let results: Results = Arc::default();

    pipeline.start().unwrap();
    pipeline.stop().await;

    let err = pipeline.send(email(1, "b@y.tld", &results)).await.unwrap_err();
    assert_eq!(err.to_string(), "421 delivery pipeline stopped");

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].error, Some(Error::PipelineStopped)));
}

#[tokio::test]
async fn test_stop_waits_for_in_flight() {
    let (deliverer, _stats) = Instrumented::new(Duration::from_millis(100));
    let pipeline =
        Pipeline::with_deliverer(&[RouteConfig::builder("main").stream(2).build()], deliverer)
            .unwrap();
    let results: Results = Arc::default();

    pipeline.start().unwrap();
    for id in 0..3 {
        pipeline.send(email(id, "b@y.tld", &results)).await.unwrap();
    }
    pipeline.stop().await;

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.duration >= Duration::from_millis(100)));
}

#[tokio::test]
async fn test_smtp_pipeline_delivers_all() {
    let server = MockSmtpServer::builder()
        .with_data_delay(Duration::from_millis(30))
        .build()
        .await;
    let route = RouteConfig::builder("relay")
        .hostname("mail.x.tld")
        .stream(4)
        .smart_host(SmartHost::new("127.0.0.1", server.port()))
        .build();
    let pipeline = Pipeline::new(&[route]).unwrap();
    let results: Results = Arc::default();

    pipeline.start().unwrap();
    for id in 0..20 {
        pipeline.send(email(id, "b@y.tld", &results)).await.unwrap();
    }
    pipeline.stop().await;

    {
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(DeliveryResult::is_success));
    }
    let sessions = server.wait_for_sessions(20).await;
    assert!(sessions.iter().all(|s| s.data.is_some()));
}
