//! Domain events, raised once a unit of work has committed
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{BookingId, Money};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { booking_id: BookingId, username: String, amount: Money, lines: usize },
    Amended { booking_id: BookingId, amount: Money, lines: usize },
    Confirmed { booking_id: BookingId },
    Cancelled { booking_id: BookingId, restored_units: u64 },
}

impl OrderEvent {
    pub fn booking_id(&self) -> &BookingId {
        match self {
            Self::Created { booking_id, .. }
            | Self::Amended { booking_id, .. }
            | Self::Confirmed { booking_id }
            | Self::Cancelled { booking_id, .. } => booking_id,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "orders.created",
            Self::Amended { .. } => "orders.amended",
            Self::Confirmed { .. } => "orders.confirmed",
            Self::Cancelled { .. } => "orders.cancelled",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: OrderEvent,
}

impl EventEnvelope {
    pub fn new(event: OrderEvent) -> Self {
        Self { id: Uuid::now_v7(), occurred_at: Utc::now(), event }
    }
}
