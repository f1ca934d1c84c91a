// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Trace Context over AMQP Headers
//!
//! Publishers inject the current OpenTelemetry context into message headers;
//! subscriptions extract it and open one consumer span per delivery.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context, KeyValue,
};
use std::collections::BTreeMap;

/// Collects propagation fields for an outgoing message.
#[derive(Default)]
struct HeaderInjector(BTreeMap<ShortString, AMQPValue>);

impl Injector for HeaderInjector {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(
            ShortString::from(key.to_ascii_lowercase()),
            AMQPValue::LongString(value.into()),
        );
    }
}

/// Reads propagation fields from a delivery without copying its headers.
struct HeaderExtractor<'a>(Option<&'a FieldTable>);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        // Non-string and non-UTF-8 values never carry trace context.
        match self.0?.inner().get(key)? {
            AMQPValue::LongString(value) => std::str::from_utf8(value.as_bytes()).ok(),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .map(|table| table.inner().keys().map(ShortString::as_str).collect())
            .unwrap_or_default()
    }
}

/// Headers carrying `ctx` for an outgoing message.
pub(crate) fn inject_headers(ctx: &Context) -> FieldTable {
    let mut injector = HeaderInjector::default();
    global::get_text_map_propagator(|propagator| propagator.inject_context(ctx, &mut injector));
    FieldTable::from(injector.0)
}

/// Starts a consumer span for a delivery taken from `queue`, parented on the
/// context its headers carry.
pub(crate) fn new_span(props: &AMQPProperties, tracer: &BoxedTracer, queue: &str) -> (Context, BoxedSpan) {
    let extractor = HeaderExtractor(props.headers().as_ref());
    let ctx = global::get_text_map_propagator(|propagator| propagator.extract(&extractor));

    let span = tracer
        .span_builder(format!("{queue} process"))
        .with_kind(SpanKind::Consumer)
        .with_attributes([
            KeyValue::new("messaging.system", "rabbitmq"),
            KeyValue::new("messaging.destination.name", queue.to_owned()),
        ])
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_keys_are_lowercased_long_strings() {
        let mut injector = HeaderInjector::default();
        injector.set("TraceParent", "00-abc-def-01".to_owned());

        let table = FieldTable::from(injector.0);
        let extractor = HeaderExtractor(Some(&table));

        assert_eq!(extractor.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(extractor.keys(), vec!["traceparent"]);
    }

    #[test]
    fn extractor_ignores_non_string_headers() {
        let mut headers = BTreeMap::new();
        headers.insert(ShortString::from("count"), AMQPValue::LongLongInt(3));
        let table = FieldTable::from(headers);

        assert_eq!(HeaderExtractor(Some(&table)).get("count"), None);
        assert_eq!(HeaderExtractor(None).get("count"), None);
        assert!(HeaderExtractor(None).keys().is_empty());
    }
}
