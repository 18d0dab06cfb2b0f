use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{auth::AuthUser, models::AppointmentRow};

pub const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub professional_id: String,
    pub client_id: Option<String>,
    pub appointment_id: String,
    /// Absent for deletes.
    pub appointment: Option<AppointmentRow>,
}

impl ChangeEvent {
    pub fn from_row(kind: ChangeKind, row: AppointmentRow) -> Self {
        Self {
            kind,
            professional_id: row.professional_id.clone(),
            client_id: row.client_id.clone(),
            appointment_id: row.id.clone(),
            appointment: if kind == ChangeKind::Delete { None } else { Some(row) },
        }
    }

    pub fn visible_to(&self, user: &AuthUser) -> bool {
        self.professional_id == user.id || self.client_id.as_deref() == Some(user.id.as_str())
    }
}

pub fn channel() -> broadcast::Sender<ChangeEvent> {
    broadcast::channel(CHANNEL_CAPACITY).0
}

/// Publishes to whoever is listening; no subscribers is not an error.
pub fn publish(events: &broadcast::Sender<ChangeEvent>, kind: ChangeKind, row: AppointmentRow) {
    let appointment_id = row.id.clone();
    if events.send(ChangeEvent::from_row(kind, row)).is_err() {
        log::debug!("No realtime subscribers for appointment {appointment_id}");
    }
}

/// Merges one change into a list ordered by `start_time`.
pub fn apply_change(appointments: &mut Vec<AppointmentRow>, event: &ChangeEvent) {
    let position = appointments
        .iter()
        .position(|row| row.id == event.appointment_id);

    match (event.kind, &event.appointment) {
        (ChangeKind::Delete, _) | (_, None) => {
            if let Some(index) = position {
                appointments.remove(index);
            }
            return;
        }
        (_, Some(row)) => match position {
            Some(index) => appointments[index] = row.clone(),
            None => appointments.push(row.clone()),
        },
    }

    appointments.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
}
