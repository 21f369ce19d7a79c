use opentelemetry::{
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    response_time: Histogram<u64>,
    faces_detected: Counter<u64>,
    failures: Counter<u64>,
    // Dropping the provider shuts the exporter down.
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| prometheus::Error::Msg(e.to_string()))?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("facebox");

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        // Response times are kept to a tenth of a second.
        let boundaries = generate_boundaries((100, 500, 1000, 5000, 10000));

        let response_time = meter
            .u64_histogram("facebox_response_time_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of successful Facebox checks in milliseconds")
            .build();

        let faces_detected = meter
            .u64_counter("faces_detected_total")
            .with_description("Faces reported by Facebox")
            .build();

        let failures = meter
            .u64_counter("facebox_failures_total")
            .with_description("Image processing attempts that did not produce a result")
            .build();

        Ok(Metrics {
            request_counter,
            response_time,
            faces_detected,
            failures,
            _provider: provider,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_response_time(&self, response_time_secs: f64, entity_id: &str) {
        let attributes = vec![KeyValue::new("entity_id", entity_id.to_string())];
        let millis = (response_time_secs * 1000.0).round() as u64;
        self.response_time.record(millis, &attributes);
    }

    pub fn record_faces(&self, total_faces: u32, entity_id: &str) {
        let attributes = vec![KeyValue::new("entity_id", entity_id.to_string())];
        self.faces_detected.add(u64::from(total_faces), &attributes);
    }

    pub fn record_failure(&self, reason: &str, entity_id: &str) {
        let attributes = vec![
            KeyValue::new("entity_id", entity_id.to_string()),
            KeyValue::new("reason", reason.to_string()),
        ];
        self.failures.add(1, &attributes);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 100;
    let middle_step: usize = 500;
    let end_step: usize = 1000;
    let tail_step: usize = 5000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_generate_boundaries() {
        let get = generate_boundaries((100, 500, 1000, 5000, 10000));
        let expected = vec![
            100.0, 200.0, 300.0, 400.0, 500.0, 1000.0, 2000.0, 3000.0, 4000.0, 5000.0, 10000.0,
        ];

        assert_eq!(get, expected);
        assert!(get.iter().all(|b| b % 100.0 == 0.0));
    }

    #[test]
    fn test_recorded_metrics_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_faces(2, "image_processing.facebox_demo_camera");
        metrics.record_failure("remote", "image_processing.facebox_demo_camera");

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("faces_detected"));
        assert!(text.contains("facebox_failures"));
    }
}
