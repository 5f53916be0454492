use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub reports_created_total: IntCounter,
    pub status_updates_total: IntCounterVec,
    pub change_events_total: IntCounterVec,
    pub online_workers: IntGauge,
    pub assignment_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Worker assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let reports_created_total =
            IntCounter::new("reports_created_total", "Waste reports submitted")
                .expect("valid reports_created_total metric");

        let status_updates_total = IntCounterVec::new(
            Opts::new(
                "status_updates_total",
                "Report and task status changes by outcome",
            ),
            &["entity", "outcome"],
        )
        .expect("valid status_updates_total metric");

        let change_events_total = IntCounterVec::new(
            Opts::new("change_events_total", "Row changes seen on the change feed"),
            &["table", "kind"],
        )
        .expect("valid change_events_total metric");

        let online_workers = IntGauge::new(
            "online_workers",
            "Available workers with a fresh location",
        )
        .expect("valid online_workers metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of worker assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(reports_created_total.clone()))
            .expect("register reports_created_total");
        registry
            .register(Box::new(status_updates_total.clone()))
            .expect("register status_updates_total");
        registry
            .register(Box::new(change_events_total.clone()))
            .expect("register change_events_total");
        registry
            .register(Box::new(online_workers.clone()))
            .expect("register online_workers");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");

        Self {
            registry,
            assignments_total,
            reports_created_total,
            status_updates_total,
            change_events_total,
            online_workers,
            assignment_latency_seconds,
        }
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
