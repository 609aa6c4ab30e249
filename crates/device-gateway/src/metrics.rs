use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct GatewayMetrics {
    pub commands: IntCounter,
    pub leaf_dispatches: IntCounter,
    pub cache_hits: IntCounter,
    pub replies: IntCounter,
    pub unsolicited: IntCounter,
    pub timeouts: IntCounter,
    pub send_failures: IntCounter,
    pub events_delivered: IntCounter,
    pub delivery_failures: IntCounter,
    pub devices_loaded: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub gw: GatewayMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let gw = GatewayMetrics {
            commands: counter("gw_commands_total", "Commands executed")?,
            leaf_dispatches: counter("gw_leaf_dispatches_total", "Leaf operations sent to devices")?,
            cache_hits: counter("gw_cache_hits_total", "Leaf operations answered from cache")?,
            replies: counter("gw_replies_total", "Correlated replies received")?,
            unsolicited: counter("gw_unsolicited_total", "Unsolicited device messages received")?,
            timeouts: counter("gw_timeouts_total", "Commands that timed out")?,
            send_failures: counter("gw_send_failures_total", "Leaf operations that failed to send")?,
            events_delivered: counter("gw_events_delivered_total", "Events accepted downstream")?,
            delivery_failures: counter(
                "gw_delivery_failures_total",
                "Events dropped after exhausting retries",
            )?,
            devices_loaded: IntGauge::new("gw_devices_loaded", "Number of devices provisioned")
                .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let registry = Registry::new();
        let _ = registry.register(Box::new(gw.commands.clone()));
        let _ = registry.register(Box::new(gw.leaf_dispatches.clone()));
        let _ = registry.register(Box::new(gw.cache_hits.clone()));
        let _ = registry.register(Box::new(gw.replies.clone()));
        let _ = registry.register(Box::new(gw.unsolicited.clone()));
        let _ = registry.register(Box::new(gw.timeouts.clone()));
        let _ = registry.register(Box::new(gw.send_failures.clone()));
        let _ = registry.register(Box::new(gw.events_delivered.clone()));
        let _ = registry.register(Box::new(gw.delivery_failures.clone()));
        let _ = registry.register(Box::new(gw.devices_loaded.clone()));
        Ok(Self { registry, gw })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_text() {
        let hub = MetricsHub::new().unwrap();
        hub.gw.commands.inc();
        hub.gw.devices_loaded.set(3);
        let text = hub.encode_text();
        assert!(text.contains("gw_commands_total 1"));
        assert!(text.contains("gw_devices_loaded 3"));
    }
}
