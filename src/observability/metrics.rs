use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub webhook_events_total: IntCounterVec,
    pub dispatch_total: IntCounterVec,
    pub status_transitions_total: IntCounterVec,
    pub vendor_call_seconds: HistogramVec,
    pub otp_events_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let webhook_events_total = IntCounterVec::new(
            Opts::new("webhook_events_total", "Courier webhook deliveries by outcome"),
            &["provider", "outcome"],
        )
        .expect("valid webhook_events_total metric");

        let dispatch_total = IntCounterVec::new(
            Opts::new("dispatch_total", "Courier dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_total metric");

        let status_transitions_total = IntCounterVec::new(
            Opts::new(
                "status_transitions_total",
                "Order projection updates by outcome",
            ),
            &["outcome"],
        )
        .expect("valid status_transitions_total metric");

        let vendor_call_seconds = HistogramVec::new(
            HistogramOpts::new("vendor_call_seconds", "Latency of courier vendor calls"),
            &["provider", "operation", "outcome"],
        )
        .expect("valid vendor_call_seconds metric");

        let otp_events_total = IntCounterVec::new(
            Opts::new("otp_events_total", "Delivery OTP lifecycle events"),
            &["event"],
        )
        .expect("valid otp_events_total metric");

        registry
            .register(Box::new(webhook_events_total.clone()))
            .expect("register webhook_events_total");
        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");
        registry
            .register(Box::new(status_transitions_total.clone()))
            .expect("register status_transitions_total");
        registry
            .register(Box::new(vendor_call_seconds.clone()))
            .expect("register vendor_call_seconds");
        registry
            .register(Box::new(otp_events_total.clone()))
            .expect("register otp_events_total");

        Self {
            registry,
            webhook_events_total,
            dispatch_total,
            status_transitions_total,
            vendor_call_seconds,
            otp_events_total,
        }
    }

    pub fn observe_vendor_call(&self, provider: &str, operation: &str, ok: bool, seconds: f64) {
        let outcome = if ok { "success" } else { "error" };
        self.vendor_call_seconds
            .with_label_values(&[provider, operation, outcome])
            .observe(seconds);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
