//! REST layer metrics
//!
//! Prometheus counters for controller traffic, logins and task polling.
//! Each client owns its own registry so independent drivers in one process
//! do not share counters.

use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters describing one client's traffic
#[derive(Clone)]
pub struct DriverMetrics {
    registry: Registry,
    /// REST requests by method and status code
    pub requests: IntCounterVec,
    /// Successful and failed logins
    pub logins: IntCounter,
    /// Transparent re-authentications
    pub reauth_retries: IntCounter,
    /// Task status polls
    pub task_polls: IntCounter,
    /// Task terminal outcomes (ready, error, timed_out)
    pub task_outcomes: IntCounterVec,
}

impl DriverMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("coprhd_rest_requests_total", "REST requests issued to the controller"),
            &["method", "status"],
        )
        .expect("static metric definition");
        let logins = IntCounter::new("coprhd_logins_total", "Login requests issued")
            .expect("static metric definition");
        let reauth_retries = IntCounter::new(
            "coprhd_reauth_retries_total",
            "Calls retried after a transparent re-authentication",
        )
        .expect("static metric definition");
        let task_polls = IntCounter::new("coprhd_task_polls_total", "Task status polls")
            .expect("static metric definition");
        let task_outcomes = IntCounterVec::new(
            Opts::new("coprhd_task_outcomes_total", "Task terminal outcomes"),
            &["outcome"],
        )
        .expect("static metric definition");

        for collector in [
            Box::new(requests.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(logins.clone()),
            Box::new(reauth_retries.clone()),
            Box::new(task_polls.clone()),
            Box::new(task_outcomes.clone()),
        ] {
            // Fresh registry, names are unique.
            let _ = registry.register(collector);
        }

        Self {
            registry,
            requests,
            logins,
            reauth_retries,
            task_polls,
            task_outcomes,
        }
    }

    /// Record one REST request
    pub fn observe_request(&self, method: &str, status: u16) {
        self.requests
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    /// Count of requests answered with a given status
    pub fn requests_with_status(&self, status: u16) -> u64 {
        let status = status.to_string();
        ["GET", "POST", "PUT", "DELETE"]
            .iter()
            .map(|m| self.requests.with_label_values(&[m, &status]).get())
            .sum()
    }

    /// Render all counters in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))
    }
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self::new()
    }
}
