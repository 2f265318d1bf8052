use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use flowexec::protocol::QuerySpec;
use flowexec::runner::{QueryContext, QueryOutcome, QueryRunner};
use flowexec::types::LogLevel;

/// A fake runner whose queries block until the test releases them.
///
/// The query text selects the behaviour:
/// - `"block"`: wait for [`release`](Self::release) (then complete) or for
///   cancellation (then report `Cancelled`).
/// - `"block-ignore-cancel"`: wait for `release` only.
/// - `"fail <msg>"`: fail immediately.
/// - anything else: complete immediately.
#[derive(Clone, Default)]
pub struct ControllableRunner {
    started: Arc<Mutex<Vec<String>>>,
    releases: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl ControllableRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `"<flow_id>/<query>"` for every query that has started, in order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Let the blocked query `<flow_id>/<query>` finish.
    pub fn release(&self, key: &str) {
        self.notify_for(key).notify_one();
    }

    fn notify_for(&self, key: &str) -> Arc<Notify> {
        let mut map = self.releases.lock().unwrap();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

impl QueryRunner for ControllableRunner {
    fn run<'a>(
        &'a self,
        query: &'a QuerySpec,
        ctx: QueryContext,
    ) -> Pin<Box<dyn Future<Output = QueryOutcome> + Send + 'a>> {
        Box::pin(async move {
            let key = format!("{}/{}", ctx.flow_id(), query.name);
            self.started.lock().unwrap().push(key.clone());
            ctx.log(LogLevel::Info, format!("started {key}"));

            let text = query.query.trim();
            if let Some(msg) = text.strip_prefix("fail") {
                return QueryOutcome::Failed(msg.trim().to_string());
            }

            match text {
                "block" => {
                    let notify = self.notify_for(&key);
                    tokio::select! {
                        _ = notify.notified() => QueryOutcome::Completed,
                        _ = ctx.cancelled() => QueryOutcome::Cancelled,
                    }
                }
                "block-ignore-cancel" => {
                    self.notify_for(&key).notified().await;
                    QueryOutcome::Completed
                }
                _ => QueryOutcome::Completed,
            }
        })
    }
}
