use actix_web::{web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{professional_validator, AuthUser},
    catalog::{self, ServiceInput},
    clients::{self, ClientFilter},
    db,
    leads::{self, LeadFilter, LeadFormInput},
    lifecycle::{self, AppointmentQuery, StatusAction},
    models::LeadStatus,
    payments::{self, SubaccountRequest},
    profiles::{self, ProfileUpdate},
    realtime::{self, ChangeKind},
    state::AppState,
};

const ACTIVITY_LIMIT: i64 = 50;

#[derive(Deserialize)]
struct StatusForm {
    action: StatusAction,
}

#[derive(Deserialize)]
struct PaymentsQuery {
    appointment_id: Option<String>,
}

#[derive(Deserialize)]
struct BanksQuery {
    country: Option<String>,
}

#[derive(Deserialize)]
struct ResolveQuery {
    account_number: String,
    bank_code: String,
}

#[derive(Deserialize)]
struct SubaccountForm {
    bank_code: String,
    account_number: String,
    percentage_charge: Option<f64>,
}

#[derive(Deserialize)]
struct NotesForm {
    notes: String,
}

#[derive(Deserialize)]
struct LeadStatusForm {
    status: LeadStatus,
}

#[derive(Deserialize)]
struct ServicesQuery {
    #[serde(default)]
    include_inactive: bool,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/pro")
            .wrap(HttpAuthentication::basic(professional_validator))
            .service(
                web::resource("/profile")
                    .route(web::get().to(show_profile))
                    .route(web::put().to(update_profile)),
            )
            .service(web::resource("/activity").route(web::get().to(activity)))
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(
                web::resource("/services/{id}")
                    .route(web::put().to(update_service))
                    .route(web::delete().to(deactivate_service)),
            )
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(web::resource("/appointments/{id}").route(web::delete().to(delete_appointment)))
            .service(web::resource("/appointments/{id}/status").route(web::post().to(update_status)))
            .service(web::resource("/appointments/{id}/refund").route(web::post().to(refund)))
            .service(web::resource("/appointments/{id}/payments").route(web::post().to(record_payment)))
            .service(web::resource("/payments").route(web::get().to(list_payments)))
            .service(web::resource("/payouts/banks").route(web::get().to(list_banks)))
            .service(web::resource("/payouts/resolve").route(web::get().to(resolve_account)))
            .service(web::resource("/payouts/subaccount").route(web::post().to(link_subaccount)))
            .service(web::resource("/clients").route(web::get().to(list_clients)))
            .service(web::resource("/clients/reconcile").route(web::post().to(reconcile_clients)))
            .service(web::resource("/clients/{id}/notes").route(web::put().to(client_notes)))
            .service(
                web::resource("/lead-forms")
                    .route(web::get().to(list_lead_forms))
                    .route(web::post().to(create_lead_form)),
            )
            .service(web::resource("/lead-forms/{id}").route(web::put().to(update_lead_form)))
            .service(web::resource("/leads").route(web::get().to(list_leads)))
            .service(web::resource("/leads/rescore").route(web::post().to(rescore_leads)))
            .service(web::resource("/leads/{id}/status").route(web::put().to(lead_status)))
            .service(web::resource("/leads/{id}/invite").route(web::post().to(invite_lead))),
    );
}

async fn show_profile(state: web::Data<AppState>, user: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let profile = profiles::fetch_profile(&state.db, &user.id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

async fn update_profile(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    form: web::Json<ProfileUpdate>,
) -> Result<HttpResponse> {
    let profile = profiles::update_profile(&state.db, &user.id, form.into_inner()).await?;
    db::log_activity(&state.db, "profile_updated", "Profile updated.", Some(&user.id), None).await;
    Ok(HttpResponse::Ok().json(profile))
}

async fn activity(state: web::Data<AppState>, user: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let rows = db::recent_activity(&state.db, &user.id, ACTIVITY_LIMIT).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn list_services(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<ServicesQuery>,
) -> Result<HttpResponse> {
    let services = catalog::list_services(&state.db, &user.id, query.include_inactive).await?;
    Ok(HttpResponse::Ok().json(services))
}

async fn create_service(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    form: web::Json<ServiceInput>,
) -> Result<HttpResponse> {
    let service = catalog::create_service(&state.db, &user.id, form.into_inner()).await?;
    db::log_activity(
        &state.db,
        "service_created",
        &format!("Added service {}.", service.name),
        Some(&user.id),
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(service))
}

async fn update_service(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Json<ServiceInput>,
) -> Result<HttpResponse> {
    let service = catalog::update_service(&state.db, &user.id, &path.into_inner(), form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(service))
}

async fn deactivate_service(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    catalog::deactivate_service(&state.db, &user.id, &path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn list_appointments(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<AppointmentQuery>,
) -> Result<HttpResponse> {
    let rows = lifecycle::list_appointments(&state.db, &user, &query).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn update_status(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Json<StatusForm>,
) -> Result<HttpResponse> {
    let updated = lifecycle::apply(&state, &user, &path.into_inner(), form.action).await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn delete_appointment(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    lifecycle::delete_appointment(&state, &user, &path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn refund(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let updated =
        payments::refund_deposit(&state.db, state.gateway.as_ref(), &user.id, &appointment_id).await?;
    db::log_activity(
        &state.db,
        "deposit_refunded",
        &format!("Refunded the deposit for {}.", updated.contact_name()),
        Some(&user.id),
        Some(&appointment_id),
    )
    .await;
    realtime::publish(&state.events, ChangeKind::Update, updated.clone());
    Ok(HttpResponse::Ok().json(updated))
}

async fn record_payment(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let updated = payments::record_full_payment(&state.db, &user.id, &appointment_id).await?;
    db::log_activity(
        &state.db,
        "payment_recorded",
        &format!("Recorded full payment from {}.", updated.contact_name()),
        Some(&user.id),
        Some(&appointment_id),
    )
    .await;
    realtime::publish(&state.events, ChangeKind::Update, updated.clone());
    Ok(HttpResponse::Ok().json(updated))
}

async fn list_payments(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<PaymentsQuery>,
) -> Result<HttpResponse> {
    let rows = payments::list_transactions(&state.db, &user.id, query.appointment_id.as_deref()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn list_banks(state: web::Data<AppState>, query: web::Query<BanksQuery>) -> Result<HttpResponse> {
    let country = query.country.as_deref().unwrap_or("nigeria");
    let banks = state.gateway.list_banks(country).await?;
    Ok(HttpResponse::Ok().json(banks))
}

async fn resolve_account(state: web::Data<AppState>, query: web::Query<ResolveQuery>) -> Result<HttpResponse> {
    let account = state
        .gateway
        .resolve_account(query.account_number.trim(), query.bank_code.trim())
        .await?;
    Ok(HttpResponse::Ok().json(account))
}

async fn link_subaccount(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    form: web::Json<SubaccountForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let profile = profiles::fetch_profile(&state.db, &user.id).await?;
    let subaccount = state
        .gateway
        .create_subaccount(&SubaccountRequest {
            business_name: profile.business_name,
            bank_code: form.bank_code.trim().to_string(),
            account_number: form.account_number.trim().to_string(),
            percentage_charge: form.percentage_charge.unwrap_or(0.0),
        })
        .await?;
    profiles::set_subaccount(&state.db, &user.id, &subaccount.subaccount_code).await?;
    db::log_activity(&state.db, "payout_linked", "Payout account linked.", Some(&user.id), None).await;
    let profile = profiles::fetch_profile(&state.db, &user.id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

async fn list_clients(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<ClientFilter>,
) -> Result<HttpResponse> {
    let rows = clients::list_clients(&state.db, &user.id, &query).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn reconcile_clients(state: web::Data<AppState>, user: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let updated = clients::reconcile(&state.db, &user.id).await?;
    log::info!("Reconciled {updated} client records for {}", user.id);
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

async fn client_notes(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Json<NotesForm>,
) -> Result<HttpResponse> {
    clients::set_client_notes(&state.db, &user.id, &path.into_inner(), form.notes.trim()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn list_lead_forms(state: web::Data<AppState>, user: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let forms = leads::list_forms(&state.db, &user.id, true).await?;
    Ok(HttpResponse::Ok().json(forms))
}

async fn create_lead_form(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    form: web::Json<LeadFormInput>,
) -> Result<HttpResponse> {
    let created = leads::create_form(&state.db, &user.id, form.into_inner()).await?;
    Ok(HttpResponse::Created().json(created))
}

async fn update_lead_form(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Json<LeadFormInput>,
) -> Result<HttpResponse> {
    let updated = leads::update_form(&state.db, &user.id, &path.into_inner(), form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn list_leads(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<LeadFilter>,
) -> Result<HttpResponse> {
    let rows = leads::list_leads(&state.db, &user.id, &query).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn rescore_leads(state: web::Data<AppState>, user: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let updated = leads::rescore(&state.db, &user.id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

async fn lead_status(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Json<LeadStatusForm>,
) -> Result<HttpResponse> {
    let lead = leads::set_status(&state.db, &user.id, &path.into_inner(), form.status).await?;
    Ok(HttpResponse::Ok().json(lead))
}

async fn invite_lead(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let lead = leads::invite_lead(&state, &user, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(lead))
}
