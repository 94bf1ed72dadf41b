// log_event.rs
// Purpose: The telemetry record accepted by the ingestor and stored in accumulator/batch files

use serde::{Deserialize, Serialize};

/// LogEvent is one telemetry item as received from a client.
///
/// Every field is optional and carried as an opaque string; the ingestor never
/// validates individual fields. Absent fields serialize as `null` so that the
/// stored JSON always carries the full key set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogEvent {
    pub message: Option<String>,
    pub timestamp: Option<String>,
    pub ip_address: Option<String>,
    pub journey: Option<String>,
    pub sub_journey: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub application: Option<String>,
    pub hostname: Option<String>,
    pub product: Option<String>,
    pub transaction: Option<String>,
    pub return_code: Option<String>,
    pub acronym: Option<String>,
    pub span: Option<String>,
    pub correlation_id: Option<String>,
    pub channel: Option<String>,
}

macro_rules! with_fields {
    ($($setter:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $setter(mut self, value: impl Into<String>) -> Self {
                self.$field = Some(value.into());
                self
            }
        )*
    };
}

impl LogEvent {
    /// Start an event carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Empty event to be filled in with the `with_*` setters.
    pub fn builder() -> Self {
        Self::default()
    }

    with_fields! {
        with_message => message,
        with_timestamp => timestamp,
        with_ip_address => ip_address,
        with_journey => journey,
        with_sub_journey => sub_journey,
        with_type => event_type,
        with_application => application,
        with_hostname => hostname,
        with_product => product,
        with_transaction => transaction,
        with_return_code => return_code,
        with_acronym => acronym,
        with_span => span,
        with_correlation_id => correlation_id,
        with_channel => channel,
    }

    /// Short label used in log lines.
    pub fn summary(&self) -> String {
        format!(
            "{}/{}",
            self.application.as_deref().unwrap_or("-"),
            self.correlation_id.as_deref().unwrap_or("-")
        )
    }
}
