// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod backoff;
pub mod channel;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod fanout;
pub mod log_publisher;
pub mod log_record;
pub mod logging;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod store;
pub mod subscriber;
pub mod supervisor;
pub mod topology;
pub mod validation;
pub mod work;

pub use consumer::{Acknowledge, DeliveryHandler, Disposition};
