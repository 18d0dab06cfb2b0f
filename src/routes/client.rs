use actix_web::{web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;

use crate::{
    auth::{client_validator, AuthUser},
    lifecycle::{self, AppointmentQuery, StatusAction},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/me")
            .wrap(HttpAuthentication::basic(client_validator))
            .service(web::resource("").route(web::get().to(whoami)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}/cancel").route(web::post().to(cancel_appointment)),
            ),
    );
}

async fn whoami(user: web::ReqData<AuthUser>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "id": user.id,
        "email": user.email,
        "display_name": user.display_name,
        "role": user.role,
    }))
}

async fn list_appointments(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<AppointmentQuery>,
) -> Result<HttpResponse> {
    let rows = lifecycle::list_appointments(&state.db, &user, &query).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn cancel_appointment(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let updated = lifecycle::apply(&state, &user, &path.into_inner(), StatusAction::Cancel).await?;
    Ok(HttpResponse::Ok().json(updated))
}
