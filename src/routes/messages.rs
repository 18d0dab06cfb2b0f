use actix_web::{web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde_json::json;

use crate::{
    auth::{basic_validator, AuthUser},
    messaging::{self, NewMessage, NewSuggestion, OpenConversation},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/conversations")
            .wrap(HttpAuthentication::basic(basic_validator))
            .service(
                web::resource("")
                    .route(web::get().to(list_conversations))
                    .route(web::post().to(open_conversation)),
            )
            .service(
                web::resource("/{id}/messages")
                    .route(web::get().to(list_messages))
                    .route(web::post().to(send_message)),
            )
            .service(web::resource("/{id}/read").route(web::post().to(mark_read)))
            .service(
                web::resource("/{id}/suggestions")
                    .route(web::get().to(list_suggestions))
                    .route(web::post().to(add_suggestion)),
            ),
    );
}

async fn list_conversations(state: web::Data<AppState>, user: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let rows = messaging::list_conversations(&state.db, &user).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn open_conversation(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    form: web::Json<OpenConversation>,
) -> Result<HttpResponse> {
    let conversation = messaging::open_conversation(&state.db, &user, form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

async fn list_messages(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let rows = messaging::list_messages(&state.db, &user, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn send_message(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Json<NewMessage>,
) -> Result<HttpResponse> {
    let message = messaging::send_message(&state.db, &user, &path.into_inner(), form.into_inner()).await?;
    Ok(HttpResponse::Created().json(message))
}

async fn mark_read(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let updated = messaging::mark_read(&state.db, &user, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

async fn list_suggestions(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let rows = messaging::list_suggestions(&state.db, &user, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn add_suggestion(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Json<NewSuggestion>,
) -> Result<HttpResponse> {
    let suggestion = messaging::add_suggestion(&state.db, &user, &path.into_inner(), form.into_inner()).await?;
    Ok(HttpResponse::Created().json(suggestion))
}
