use actix_web::web;

pub mod client;
pub mod events;
pub mod messages;
pub mod professional;
pub mod public;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(public::configure)
        .configure(professional::configure)
        .configure(client::configure)
        .configure(messages::configure)
        .configure(events::configure);
}
