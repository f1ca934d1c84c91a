// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Routing Keys
//!
//! Log events are published with the key `<severity>.<serviceName>`, for
//! example `error.ProducerService`. Bindings use the AMQP topic grammar where
//! `*` matches exactly one word and `#` matches zero or more words.

use crate::log_record::Severity;

pub fn routing_key(severity: Severity, service_name: &str) -> String {
    format!("{}.{}", severity.as_routing_word(), service_name)
}

/// Reports whether a topic-exchange binding `pattern` accepts `key`.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && matches_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && matches_words(rest, &key[1..]),
    }
}
