//! Core domain models and persistence for LoRaWAN provisioning webhooks.
//!
//! Provides strongly-typed identifiers, the delivery log and device
//! provisioning records, a clock abstraction for deterministic timing, and
//! the PostgreSQL repositories every other crate goes through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DeliveryLogEntry, DeliveryStatus, DeviceId, DeviceProvisioning, ErrorField, HardwareRef,
    LogCompletion, LogId, NewDeliveryLog, ProductId, ProductSummary, ProvisioningStatus,
    ProvisioningUpdate, TaskAggregate, TaskId, WebhookType,
};
pub use time::{Clock, RealClock, TestClock};
