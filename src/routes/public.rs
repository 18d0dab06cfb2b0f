use actix_web::http::header::Header;
use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{authenticate_credentials, create_user, AuthUser, NewUser},
    availability, booking,
    booking::BookingRequest,
    catalog,
    db::{log_activity, timestamp},
    error::AppError,
    leads::{self, AcceptInvitation, LeadSubmission},
    models::{ROLE_CLIENT, ROLE_PROFESSIONAL},
    payments::SIGNATURE_HEADER,
    profiles,
    state::AppState,
};

#[derive(Deserialize)]
struct RegisterForm {
    email: String,
    display_name: String,
    password: String,
    role: Option<String>,
    business_name: Option<String>,
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    service_id: String,
    date: NaiveDate,
}

#[derive(Deserialize)]
struct VerifyQuery {
    reference: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/register").route(web::post().to(register)))
        .service(web::resource("/p/{slug}").route(web::get().to(profile_page)))
        .service(web::resource("/p/{slug}/availability").route(web::get().to(availability)))
        .service(web::resource("/p/{slug}/book").route(web::post().to(book)))
        .service(web::resource("/p/{slug}/forms").route(web::get().to(lead_forms)))
        .service(web::resource("/p/{slug}/leads").route(web::post().to(submit_lead)))
        .service(web::resource("/book/verify").route(web::get().to(verify_booking)))
        .service(web::resource("/paystack/webhook").route(web::post().to(paystack_webhook)))
        .service(web::resource("/invitations/{token}/accept").route(web::post().to(accept_invitation)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

/// Booking is open to guests; a client who sends credentials books under
/// their account, and wrong credentials are rejected rather than ignored.
async fn optional_user(state: &AppState, req: &HttpRequest) -> Result<Option<AuthUser>, AppError> {
    if !req.headers().contains_key(header::AUTHORIZATION) {
        return Ok(None);
    }
    let auth = Authorization::<Basic>::parse(req).map_err(|_| AppError::Unauthorized)?;
    let credentials = auth.into_scheme();
    let password = credentials.password().unwrap_or_default();
    authenticate_credentials(&state.db, credentials.user_id(), password)
        .await
        .map(Some)
        .ok_or(AppError::Unauthorized)
}

async fn register(state: web::Data<AppState>, form: web::Json<RegisterForm>) -> Result<HttpResponse> {
    let form = form.into_inner();
    let role = form.role.unwrap_or_else(|| ROLE_CLIENT.to_string());
    let business_name = form
        .business_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| form.display_name.clone());

    let user = create_user(
        &state.db,
        NewUser {
            email: form.email,
            display_name: form.display_name,
            password: form.password,
            role,
        },
    )
    .await?;

    let profile = if user.role == ROLE_PROFESSIONAL {
        Some(profiles::create_profile(&state.db, &user.id, &business_name).await?)
    } else {
        None
    };

    log_activity(
        &state.db,
        "user_registered",
        &format!("{} joined as a {}.", user.display_name, user.role),
        Some(&user.id),
        None,
    )
    .await;

    Ok(HttpResponse::Created().json(json!({
        "id": user.id,
        "email": user.email,
        "display_name": user.display_name,
        "role": user.role,
        "profile": profile,
    })))
}

async fn profile_page(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let profile = profiles::fetch_profile_by_slug(&state.db, &path.into_inner()).await?;
    let services = catalog::list_services(&state.db, &profile.id, false).await?;
    let mut public = serde_json::to_value(&profile).map_err(AppError::from)?;
    if let Some(fields) = public.as_object_mut() {
        fields.remove("paystack_subaccount");
    }
    Ok(HttpResponse::Ok().json(json!({ "profile": public, "services": services })))
}

async fn availability(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<AvailabilityQuery>,
) -> Result<HttpResponse> {
    let profile = profiles::fetch_profile_by_slug(&state.db, &path.into_inner()).await?;
    let service = catalog::fetch_owned_service(&state.db, &profile.id, &query.service_id).await?;
    if !service.active {
        return Err(AppError::NotFound("Service").into());
    }
    let slots = availability::available_slots(&state.db, &profile, &service, query.date, Utc::now()).await?;
    let slots: Vec<String> = slots.into_iter().map(timestamp).collect();
    Ok(HttpResponse::Ok().json(json!({
        "date": query.date,
        "service_id": service.id,
        "duration_minutes": service.duration_minutes,
        "slots": slots,
    })))
}

async fn book(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    form: web::Json<BookingRequest>,
) -> Result<HttpResponse> {
    let user = optional_user(&state, &req).await?;
    let outcome = booking::start_booking(&state, &path.into_inner(), user.as_ref(), form.into_inner(), Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

async fn verify_booking(state: web::Data<AppState>, query: web::Query<VerifyQuery>) -> Result<HttpResponse> {
    let appointment = booking::finalize(&state, &query.reference).await?;
    Ok(HttpResponse::Ok().json(appointment))
}

async fn paystack_webhook(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> Result<HttpResponse> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    booking::handle_webhook(&state, &body, signature).await?;
    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

async fn lead_forms(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let profile = profiles::fetch_profile_by_slug(&state.db, &path.into_inner()).await?;
    let forms = leads::list_forms(&state.db, &profile.id, false).await?;
    Ok(HttpResponse::Ok().json(forms))
}

async fn submit_lead(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Json<LeadSubmission>,
) -> Result<HttpResponse> {
    let lead = leads::submit_lead(&state.db, &path.into_inner(), form.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Created().json(json!({ "id": lead.id, "status": lead.status })))
}

async fn accept_invitation(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Json<AcceptInvitation>,
) -> Result<HttpResponse> {
    let user = leads::accept_invitation(&state.db, &path.into_inner(), form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "id": user.id,
        "email": user.email,
        "display_name": user.display_name,
        "role": user.role,
    })))
}
