use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub const ROLE_PROFESSIONAL: &str = "professional";
pub const ROLE_CLIENT: &str = "client";

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
            Display, EnumString,
        )]
        #[sqlx(rename_all = "snake_case")]
        #[serde(rename_all = "snake_case")]
        #[strum(serialize_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }
    };
}

text_enum!(
    /// Lifecycle state stored on `appointments.status`.
    AppointmentStatus { Pending, Confirmed, Completed, Cancelled, NoShow }
);

text_enum!(PaymentStatus { Unpaid, DepositPaid, Paid, Refunded });

text_enum!(TransactionKind { Deposit, FullPayment, Refund });

text_enum!(IntentStatus { Initialized, Completed, Failed, Refunded });

text_enum!(DepositType { None, Percentage, Fixed });

text_enum!(LeadScore { Hot, Warm, Cold });

text_enum!(
    /// `invited` is set by the invitation flow, `converted` only by accepting it.
    LeadStatus { New, Contacted, Invited, Converted, Lost }
);

text_enum!(ClientTier { Vip, New, Regular });

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether the appointment still holds its time slot.
    pub fn blocks_slot(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProfileRow {
    pub id: String,
    pub slug: String,
    pub business_name: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    #[sqlx(json)]
    pub business_hours: serde_json::Value,
    #[sqlx(json)]
    pub social_links: serde_json::Value,
    pub brand_primary: Option<String>,
    pub brand_accent: Option<String>,
    pub deposit_type: DepositType,
    pub deposit_value: f64,
    pub currency: String,
    pub paystack_subaccount: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub professional_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_minutes: i64,
    pub requirements: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub professional_id: String,
    pub service_id: String,
    pub service_name: Option<String>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub deposit_required: f64,
    pub deposit_paid: f64,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub payment_reference: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AppointmentRow {
    pub fn contact_name(&self) -> String {
        self.client_name
            .clone()
            .or_else(|| self.guest_name.clone())
            .unwrap_or_else(|| "Guest".to_string())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookingIntentRow {
    pub id: String,
    pub reference: String,
    pub professional_id: String,
    pub service_id: String,
    pub client_id: Option<String>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub notes: Option<String>,
    pub deposit_amount: f64,
    pub total_amount: f64,
    pub currency: String,
    pub status: IntentStatus,
    pub appointment_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentTransactionRow {
    pub id: String,
    pub appointment_id: String,
    pub professional_id: String,
    pub service_name: Option<String>,
    pub reference: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LeadFormRow {
    pub id: String,
    pub professional_id: String,
    pub title: String,
    #[sqlx(json)]
    pub fields: serde_json::Value,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LeadRow {
    pub id: String,
    pub professional_id: String,
    pub form_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[sqlx(json)]
    pub data: serde_json::Value,
    pub score: LeadScore,
    pub status: LeadStatus,
    #[serde(skip_serializing)]
    pub invitation_token: Option<String>,
    pub invited_at: Option<String>,
    pub converted_client_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub professional_id: String,
    pub client_id: String,
    pub subject: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub read_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SuggestionRow {
    pub id: String,
    pub conversation_id: String,
    pub body: String,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ActivityRow {
    pub kind: String,
    pub message: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_text_matches_stored_values() {
        assert_eq!(AppointmentStatus::NoShow.to_string(), "no_show");
        assert_eq!(
            AppointmentStatus::from_str("confirmed").unwrap(),
            AppointmentStatus::Confirmed
        );
        assert_eq!(PaymentStatus::DepositPaid.to_string(), "deposit_paid");
        assert!(LeadScore::from_str("lukewarm").is_err());
    }

    #[test]
    fn only_open_bookings_hold_their_slot() {
        assert!(AppointmentStatus::Pending.blocks_slot());
        assert!(AppointmentStatus::Confirmed.blocks_slot());
        assert!(!AppointmentStatus::Cancelled.blocks_slot());
        assert!(AppointmentStatus::NoShow.is_terminal());
        assert!(!AppointmentStatus::Confirmed.is_terminal());
    }
}
