//! Tracing initialization for the facilitator server.
//!
//! Always installs a formatted `tracing` subscriber filtered by `RUST_LOG`
//! (default `info`). With the `telemetry` feature enabled and `OTEL_*`
//! environment variables present, spans and metrics are additionally
//! exported over OTLP.

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "telemetry")]
mod otlp {
    use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::SCHEMA_URL;
    use opentelemetry_semantic_conventions::attribute::SERVICE_VERSION;

    fn resource(name: String, version: String) -> Resource {
        Resource::builder()
            .with_service_name(name)
            .with_schema_url([KeyValue::new(SERVICE_VERSION, version)], SCHEMA_URL)
            .build()
    }

    /// Whether any OTLP destination is configured in the environment.
    pub fn enabled() -> bool {
        std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
            || std::env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
    }

    pub fn tracer_provider(name: String, version: String) -> SdkTracerProvider {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()
            .expect("Failed to build OTLP span exporter");
        SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource(name, version))
            .with_batch_exporter(exporter)
            .build()
    }

    pub fn meter_provider(name: String, version: String) -> SdkMeterProvider {
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .build()
            .expect("Failed to build OTLP metric exporter");
        let reader = PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(30))
            .build();
        let provider = MeterProviderBuilder::default()
            .with_resource(resource(name, version))
            .with_reader(reader)
            .build();
        global::set_meter_provider(provider.clone());
        provider
    }

    pub fn tracer(
        provider: &SdkTracerProvider,
        name: String,
    ) -> opentelemetry_sdk::trace::SdkTracer {
        provider.tracer(name)
    }
}

/// Builder for the process-wide tracing setup.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    name: String,
    version: String,
}

impl Telemetry {
    pub fn new() -> Self {
        Telemetry::default()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Installs the global subscriber. Safe to call once per process; later
    /// calls are ignored so tests can initialize freely.
    pub fn register(self) -> Self {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer());

        #[cfg(feature = "telemetry")]
        {
            if otlp::enabled() {
                let tracer_provider =
                    otlp::tracer_provider(self.name.clone(), self.version.clone());
                let meter_provider = otlp::meter_provider(self.name.clone(), self.version.clone());
                let tracer = otlp::tracer(&tracer_provider, self.name.clone());
                registry
                    .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
                    .with(tracing_opentelemetry::MetricsLayer::new(meter_provider))
                    .try_init()
                    .ok();
                return self;
            }
        }

        registry.try_init().ok();
        self
    }

    /// HTTP request/response span layer for the Axum server.
    pub fn http_tracing(
        &self,
    ) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
    {
        TraceLayer::new_for_http()
    }
}
