use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use crate::authz::DenyReason;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct RelayMetrics {
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    connections_opened_total: AtomicU64,
    connections_closed_total: AtomicU64,
    envelopes_delivered_total: Mutex<HashMap<String, u64>>,
    connections_pruned_total: AtomicU64,
    client_messages_rejected_total: Mutex<HashMap<String, u64>>,
    cascade_denials_total: Mutex<HashMap<String, u64>>,
}

const DENY_REASONS: [DenyReason; 3] =
    [DenyReason::NotAMember, DenyReason::NotAuthorized, DenyReason::ResourceMismatch];
static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        let mut cascade_denials_total = HashMap::new();
        for reason in DENY_REASONS {
            cascade_denials_total.insert(reason.as_str().to_string(), 0);
        }

        Self {
            request_rate_total: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            connections_opened_total: AtomicU64::new(0),
            connections_closed_total: AtomicU64::new(0),
            envelopes_delivered_total: Mutex::new(HashMap::new()),
            connections_pruned_total: AtomicU64::new(0),
            client_messages_rejected_total: Mutex::new(HashMap::new()),
            cascade_denials_total: Mutex::new(cascade_denials_total),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_opened_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_connection_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_closed_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_route(event_type: &str, delivered: usize, pruned: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.record_route(event_type, delivered, pruned);
    }
}

pub fn record_client_message_rejected(code: &str) {
    if let Some(metrics) = global_metrics() {
        increment_label_counter(&metrics.client_messages_rejected_total, code, 1);
    }
}

pub fn record_cascade_denial(reason: DenyReason) {
    if let Some(metrics) = global_metrics() {
        metrics.record_cascade_denial(reason);
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_route(&self, event_type: &str, delivered: usize, pruned: usize) {
        increment_label_counter(&self.envelopes_delivered_total, event_type, delivered as u64);
        self.connections_pruned_total.fetch_add(pruned as u64, Ordering::Relaxed);
    }

    pub fn record_cascade_denial(&self, reason: DenyReason) {
        increment_label_counter(&self.cascade_denials_total, reason.as_str(), 1);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP hub_connections_opened_total Connections registered with the hub.\n");
        output.push_str("# TYPE hub_connections_opened_total counter\n");
        output.push_str(&format!(
            "hub_connections_opened_total {}\n",
            self.connections_opened_total.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP hub_connections_closed_total Connections unregistered from the hub.\n");
        output.push_str("# TYPE hub_connections_closed_total counter\n");
        output.push_str(&format!(
            "hub_connections_closed_total {}\n",
            self.connections_closed_total.load(Ordering::Relaxed)
        ));

        output.push_str(
            "# HELP hub_envelopes_delivered_total Envelopes queued to connections by event type.\n",
        );
        output.push_str("# TYPE hub_envelopes_delivered_total counter\n");
        append_label_counter_lines(
            &mut output,
            "hub_envelopes_delivered_total",
            "type",
            &self.envelopes_delivered_total,
        );

        output.push_str(
            "# HELP hub_connections_pruned_total Connections removed after a failed delivery.\n",
        );
        output.push_str("# TYPE hub_connections_pruned_total counter\n");
        output.push_str(&format!(
            "hub_connections_pruned_total {}\n",
            self.connections_pruned_total.load(Ordering::Relaxed)
        ));

        output.push_str(
            "# HELP hub_client_messages_rejected_total Client frames rejected by error code.\n",
        );
        output.push_str("# TYPE hub_client_messages_rejected_total counter\n");
        append_label_counter_lines(
            &mut output,
            "hub_client_messages_rejected_total",
            "code",
            &self.client_messages_rejected_total,
        );

        output.push_str("# HELP authz_cascade_denials_total Authorization denials by reason.\n");
        output.push_str("# TYPE authz_cascade_denials_total counter\n");
        append_label_counter_lines(
            &mut output,
            "authz_cascade_denials_total",
            "reason",
            &self.cascade_denials_total,
        );

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    let normalized_segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{uuid}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>();

    format!("/{}", normalized_segments.join("/"))
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::RelayMetrics;
    use crate::authz::DenyReason;

    #[test]
    fn render_prometheus_includes_http_and_hub_metrics() {
        let metrics = RelayMetrics::default();
        let project_path = format!("/v1/orgs/{}/projects", uuid::Uuid::new_v4());
        metrics.record_http_request("get", &project_path, 200, 15);
        metrics.record_http_request("GET", &project_path, 403, 5);
        metrics.connections_opened_total.fetch_add(3, Ordering::Relaxed);
        metrics.connections_closed_total.fetch_add(1, Ordering::Relaxed);
        metrics.record_route("task-moved", 2, 1);
        metrics.record_route("task-moved", 3, 0);
        metrics.record_cascade_denial(DenyReason::NotAuthorized);

        let rendered = metrics.render_prometheus();

        assert!(rendered.contains(
            "relay_request_rate_total{method=\"GET\",endpoint=\"/v1/orgs/{uuid}/projects\"} 2"
        ));
        assert!(rendered.contains(
            "relay_request_errors_total{method=\"GET\",endpoint=\"/v1/orgs/{uuid}/projects\"} 1"
        ));
        assert!(rendered.contains("hub_connections_opened_total 3"));
        assert!(rendered.contains("hub_connections_closed_total 1"));
        assert!(rendered.contains("hub_envelopes_delivered_total{type=\"task-moved\"} 5"));
        assert!(rendered.contains("hub_connections_pruned_total 1"));
        assert!(rendered.contains("authz_cascade_denials_total{reason=\"not-authorized\"} 1"));
        assert!(rendered.contains("authz_cascade_denials_total{reason=\"not-a-member\"} 0"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(super::escape_label_value("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
