use actix_web::{http::header, web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{
    auth::{basic_validator, AuthUser},
    realtime::ChangeEvent,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/events")
            .wrap(HttpAuthentication::basic(basic_validator))
            .route(web::get().to(stream_events)),
    );
}

/// Appointment changes the caller takes part in, as Server-Sent Events.
async fn stream_events(state: web::Data<AppState>, user: web::ReqData<AuthUser>) -> HttpResponse {
    let user = user.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.visible_to(&user) => {
            Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event)))
        }
        Ok(_) => None,
        Err(err) => {
            log::debug!("Realtime subscriber {} lagged: {err}", user.id);
            None
        }
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &ChangeEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: {}\ndata: {}\n\n", event.kind.as_str(), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ChangeKind;

    #[test]
    fn frames_name_the_change() {
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            professional_id: "pro".into(),
            client_id: None,
            appointment_id: "appt".into(),
            appointment: None,
        };
        let frame = event_to_bytes(&event);
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: delete\ndata: {"));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains(r#""appointment_id":"appt""#));
    }
}
