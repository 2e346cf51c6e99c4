//! Domain models and strongly-typed identifiers.
//!
//! Covers the task read model consumed by the provisioning webhook, the
//! per-device provisioning fields it mutates, and the durable delivery log.
//! Status enums are stored as upper-case text columns.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult = Result<sqlx::encode::IsNull, sqlx::error::BoxDynError>;
type BoxDynError = sqlx::error::BoxDynError;

/// Declares a UUID newtype with display, conversion and sqlx support.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

/// Declares a text-backed status enum with sqlx support.
macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Returns the persisted text form.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!(concat!("invalid ", $label, ": {}"), s)),
                }
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <&str as sqlx::Type<PgDb>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <&str as sqlx::Type<PgDb>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
                s.parse::<Self>().map_err(Into::into)
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

uuid_id!(
    /// Onboarding task identifier.
    TaskId
);
uuid_id!(
    /// Delivery log entry identifier.
    LogId
);
uuid_id!(
    /// Device provisioning record identifier.
    DeviceId
);
uuid_id!(
    /// Product identifier.
    ProductId
);
uuid_id!(
    /// Hardware catalog identifier.
    HardwareId
);

/// Kind of outbound webhook recorded in the delivery log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookType {
    /// Task ready for LoRaWAN device provisioning.
    LorawanProvisioning,
}

text_enum!(WebhookType, "webhook type", {
    LorawanProvisioning => "LORAWAN_PROVISIONING",
});

/// Delivery log lifecycle status.
///
/// ```text
/// Pending -> Retrying -> Success
///        \           \-> Failed -> (manual retry) -> Retrying -> ...
///         \-> Success | Failed
/// ```
///
/// `Success` is absorbing. `Failed` is only left through a manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// First attempt of an initial send is in progress.
    Pending,
    /// A later attempt (or a manual retry) is in progress.
    Retrying,
    /// The manager accepted the webhook.
    Success,
    /// Delivery gave up.
    Failed,
}

text_enum!(DeliveryStatus, "delivery status", {
    Pending => "PENDING",
    Retrying => "RETRYING",
    Success => "SUCCESS",
    Failed => "FAILED",
});

impl DeliveryStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Retrying, Self::Success, Self::Failed];

    /// Whether no further automatic attempts happen from this state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => true,
            Self::Retrying => !matches!(next, Self::Pending),
            Self::Failed => matches!(next, Self::Retrying),
            Self::Success => false,
        }
    }

    /// Statuses an entry may be in for a write setting `self`.
    pub fn predecessors(self) -> Vec<Self> {
        Self::ALL.into_iter().filter(|from| from.can_transition_to(self)).collect()
    }
}

/// LoRaWAN provisioning status stored on each device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStatus {
    /// Product does not use LoRaWAN provisioning.
    NotApplicable,
    /// Webhook accepted for sending; outcome unknown.
    InProgress,
    /// Manager acknowledged the provisioning request.
    Completed,
    /// Delivery to the manager failed.
    Failed,
}

text_enum!(ProvisioningStatus, "provisioning status", {
    NotApplicable => "NOT_APPLICABLE",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

/// Product fields relevant to provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    /// Product identifier.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Catalog code.
    pub code: String,
    /// LoRaWAN frequency plan, e.g. `EU868`.
    pub lorawan_region: Option<String>,
    /// Whether tasks for this product are provisioned through the manager.
    pub uses_lorawan: bool,
}

/// Linked hardware catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareRef {
    /// Hardware identifier.
    pub id: HardwareId,
    /// Catalog name, e.g. "Kerlink Wirnet iStation Gateway".
    pub name: String,
}

/// Device provisioning record attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProvisioning {
    /// Record identifier.
    pub id: DeviceId,
    /// Manufacturer serial number.
    pub device_serial: String,
    /// Free-text device type.
    pub device_type: String,
    /// Installed firmware version.
    pub firmware_version: String,
    /// Linked hardware catalog entry.
    pub hardware: Option<HardwareRef>,
    /// LoRaWAN device EUI.
    pub dev_eui: Option<String>,
    /// LoRaWAN application key.
    pub app_key: Option<String>,
    /// Engineer notes.
    pub notes: Option<String>,
    /// Current provisioning status; `None` for records never touched.
    pub lorawan_provisioning_status: Option<ProvisioningStatus>,
    /// When the manager acknowledged provisioning.
    pub lorawan_provisioned_at: Option<DateTime<Utc>>,
    /// Last provisioning error.
    pub lorawan_provisioning_error: Option<String>,
}

/// Task read model with its product and devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAggregate {
    /// Task identifier.
    pub id: TaskId,
    /// Client name.
    pub client_name: String,
    /// Installation address.
    pub client_address: String,
    /// Client contact email.
    pub contact_email: Option<String>,
    /// Client contact phone.
    pub contact_phone: Option<String>,
    /// Site latitude.
    pub latitude: Option<f64>,
    /// Site longitude.
    pub longitude: Option<f64>,
    /// Product being installed.
    pub product: ProductSummary,
    /// Device provisioning records in creation order.
    pub devices: Vec<DeviceProvisioning>,
}

/// How a bulk device update treats the stored error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorField {
    /// Leave the stored error as is.
    Unchanged,
    /// Set the stored error to NULL.
    Clear,
    /// Overwrite the stored error.
    Set(String),
}

/// Field values applied to every device record of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningUpdate {
    /// New provisioning status.
    pub status: ProvisioningStatus,
    /// Completion timestamp; `None` leaves the stored value untouched.
    pub provisioned_at: Option<DateTime<Utc>>,
    /// Error text handling.
    pub error: ErrorField,
}

impl ProvisioningUpdate {
    /// Builds the update for a status change.
    ///
    /// `Completed` stamps `now` and clears the error. A supplied error
    /// message is stored regardless of status and wins over the clear.
    pub fn new(
        status: ProvisioningStatus,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let completed = status == ProvisioningStatus::Completed;
        let provisioned_at = completed.then_some(now);
        let error = match error_message {
            Some(message) => ErrorField::Set(message),
            None if completed => ErrorField::Clear,
            None => ErrorField::Unchanged,
        };

        Self { status, provisioned_at, error }
    }

    /// Applies this update to an in-memory record.
    pub fn apply_to(&self, device: &mut DeviceProvisioning) {
        device.lorawan_provisioning_status = Some(self.status);
        if let Some(at) = self.provisioned_at {
            device.lorawan_provisioned_at = Some(at);
        }
        match &self.error {
            ErrorField::Unchanged => {},
            ErrorField::Clear => device.lorawan_provisioning_error = None,
            ErrorField::Set(message) => {
                device.lorawan_provisioning_error = Some(message.clone());
            },
        }
    }
}

/// Delivery log row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryLogEntry {
    /// Entry identifier.
    pub id: LogId,
    /// Owning task.
    pub task_id: TaskId,
    /// Webhook discriminator.
    pub webhook_type: WebhookType,
    /// Destination URL resolved at creation.
    pub endpoint: String,
    /// Exact JSON body sent on every attempt.
    pub payload: Json<serde_json::Value>,
    /// Lifecycle status.
    pub status: DeliveryStatus,
    /// Attempts made across every lifecycle of this entry.
    pub attempts: i32,
    /// Most recent attempt start.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Last HTTP status observed.
    pub status_code: Option<i32>,
    /// Last response body, JSON or `{"raw": text}`.
    pub response: Option<Json<serde_json::Value>>,
    /// Last error description.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl DeliveryLogEntry {
    /// Stored payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload.0
    }

    /// Stored response body, if any.
    pub fn response(&self) -> Option<&serde_json::Value> {
        self.response.as_ref().map(|json| &json.0)
    }
}

/// Input for creating a delivery log entry.
#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    /// Owning task.
    pub task_id: TaskId,
    /// Webhook discriminator.
    pub webhook_type: WebhookType,
    /// Fully-resolved destination URL.
    pub endpoint: String,
    /// JSON body to send.
    pub payload: serde_json::Value,
}

impl NewDeliveryLog {
    /// Materializes the entry as it is first persisted: `Pending`, zero
    /// attempts.
    pub fn into_entry(self, id: LogId, created_at: DateTime<Utc>) -> DeliveryLogEntry {
        DeliveryLogEntry {
            id,
            task_id: self.task_id,
            webhook_type: self.webhook_type,
            endpoint: self.endpoint,
            payload: Json(self.payload),
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            status_code: None,
            response: None,
            error_message: None,
            created_at,
        }
    }
}

/// Terminal outcome written to a delivery log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogCompletion {
    /// `Success` or `Failed`.
    pub status: DeliveryStatus,
    /// Last HTTP status, if a response was received.
    pub status_code: Option<i32>,
    /// Last response body.
    pub response: Option<serde_json::Value>,
    /// Error description for failures.
    pub error_message: Option<String>,
}

impl LogCompletion {
    /// Completion for an accepted delivery.
    pub fn succeeded(status_code: u16, response: serde_json::Value) -> Self {
        Self {
            status: DeliveryStatus::Success,
            status_code: Some(i32::from(status_code)),
            response: Some(response),
            error_message: None,
        }
    }

    /// Completion for a delivery that gave up.
    pub fn failed(
        status_code: Option<u16>,
        response: Option<serde_json::Value>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            status_code: status_code.map(i32::from),
            response,
            error_message: Some(error_message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn device() -> DeviceProvisioning {
        DeviceProvisioning {
            id: DeviceId::new(),
            device_serial: "SN-1".to_string(),
            device_type: "Temperature sensor".to_string(),
            firmware_version: "1.0.0".to_string(),
            hardware: None,
            dev_eui: None,
            app_key: None,
            notes: None,
            lorawan_provisioning_status: Some(ProvisioningStatus::Failed),
            lorawan_provisioned_at: None,
            lorawan_provisioning_error: Some("previous failure".to_string()),
        }
    }

    #[test]
    fn success_is_never_a_predecessor() {
        for next in DeliveryStatus::ALL {
            assert!(!next.predecessors().contains(&DeliveryStatus::Success));
        }
        assert_eq!(DeliveryStatus::Pending.predecessors(), vec![DeliveryStatus::Pending]);
        assert_eq!(DeliveryStatus::Success.predecessors(), vec![
            DeliveryStatus::Pending,
            DeliveryStatus::Retrying
        ]);
    }

    #[test]
    fn completed_update_stamps_time_and_clears_error() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let update = ProvisioningUpdate::new(ProvisioningStatus::Completed, None, now);

        assert_eq!(update.provisioned_at, Some(now));
        assert_eq!(update.error, ErrorField::Clear);

        let mut record = device();
        update.apply_to(&mut record);
        assert_eq!(record.lorawan_provisioning_status, Some(ProvisioningStatus::Completed));
        assert_eq!(record.lorawan_provisioned_at, Some(now));
        assert_eq!(record.lorawan_provisioning_error, None);
    }

    #[test]
    fn supplied_error_is_stored_regardless_of_status() {
        let now = Utc::now();
        let update = ProvisioningUpdate::new(
            ProvisioningStatus::InProgress,
            Some("manager unreachable".to_string()),
            now,
        );

        assert_eq!(update.provisioned_at, None);
        assert_eq!(update.error, ErrorField::Set("manager unreachable".to_string()));
    }

    #[test]
    fn in_progress_without_error_leaves_error_untouched() {
        let update = ProvisioningUpdate::new(ProvisioningStatus::InProgress, None, Utc::now());

        let mut record = device();
        update.apply_to(&mut record);
        assert_eq!(record.lorawan_provisioning_error.as_deref(), Some("previous failure"));
    }

    #[test]
    fn delivery_status_transitions_are_monotonic() {
        use DeliveryStatus::{Failed, Pending, Retrying, Success};

        assert!(Pending.can_transition_to(Retrying));
        assert!(Pending.can_transition_to(Success));
        assert!(Retrying.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Retrying));

        assert!(!Retrying.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Success));
        assert!(!Success.can_transition_to(Retrying));
        assert!(!Success.can_transition_to(Failed));
    }

    #[test]
    fn statuses_round_trip_through_text() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Retrying,
            DeliveryStatus::Success,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>(), Ok(status));
        }
        assert_eq!(
            "NOT_APPLICABLE".parse::<ProvisioningStatus>(),
            Ok(ProvisioningStatus::NotApplicable)
        );
        assert!("delivered".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&ProvisioningStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }

    #[test]
    fn new_log_starts_pending_with_zero_attempts() {
        let entry = NewDeliveryLog {
            task_id: TaskId::new(),
            webhook_type: WebhookType::LorawanProvisioning,
            endpoint: "https://manager.example.com/webhooks/crm-careflow/provision".to_string(),
            payload: serde_json::json!({"eventType": "task.ready_for_provisioning"}),
        }
        .into_entry(LogId::new(), Utc::now());

        assert_eq!(entry.status, DeliveryStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.response().is_none());
        assert_eq!(entry.payload()["eventType"], "task.ready_for_provisioning");
    }
}
