//! Scripted outbound executor for adapter and flow tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::ports::{OutboundError, OutboundExecutor, OutboundRequest, OutboundResponse};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("scripted executor mutex poisoned"),
    }
}

/// Route key of a request: `list`, else `meta`, else `action`.
#[must_use]
pub fn route_of(request: &OutboundRequest) -> String {
    request
        .param("list")
        .or_else(|| request.param("meta"))
        .or_else(|| request.param("action"))
        .unwrap_or_default()
        .to_owned()
}

/// Executor answering each route from a script.
///
/// Outcomes queued for a route are consumed in order; the last one is
/// repeated once the script runs dry. An unscripted route answers with a
/// 404 rejection.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<HashMap<String, VecDeque<Result<Value, OutboundError>>>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedExecutor {
    /// Queue a JSON body for `route`.
    pub fn respond(&self, route: &str, body: Value) {
        self.push(route, Ok(body));
    }

    /// Queue a failure for `route`.
    pub fn fail(&self, route: &str, error: OutboundError) {
        self.push(route, Err(error));
    }

    fn push(&self, route: &str, outcome: Result<Value, OutboundError>) {
        lock(&self.script)
            .entry(route.to_owned())
            .or_default()
            .push_back(outcome);
    }

    /// Every request executed so far, in execution order.
    #[must_use]
    pub fn requests(&self) -> Vec<OutboundRequest> {
        lock(&self.requests).clone()
    }

    /// Number of executed requests for `route`.
    #[must_use]
    pub fn calls_for(&self, route: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| route_of(request) == route)
            .count()
    }
}

#[async_trait]
impl OutboundExecutor for ScriptedExecutor {
    async fn execute(&self, request: &OutboundRequest) -> Result<OutboundResponse, OutboundError> {
        lock(&self.requests).push(request.clone());
        let route = route_of(request);
        let outcome = {
            let mut script = lock(&self.script);
            match script.get_mut(&route) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match outcome {
            Some(Ok(body)) => Ok(OutboundResponse { status: 200, body }),
            Some(Err(error)) => Err(error),
            None => Err(OutboundError::rejected(404u16, format!("no script for `{route}`"))),
        }
    }
}
