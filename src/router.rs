use actix_web::web::{self, ServiceConfig};
use actix_web::{get, HttpResponse, Responder};

use crate::controllers;
use crate::database::Connector;

/// Register every endpoint
///
/// Expects [`DataAccess<C>`](crate::access::DataAccess) and
/// [`AppMetrics`](crate::metrics::AppMetrics) to be registered as app data by the
/// caller.
pub fn route<C: Connector>(app: &mut ServiceConfig) {
    app.service(index);

    // Health check endpoints
    app.route("/health", web::get().to(controllers::health::health));
    app.route("/live", web::get().to(controllers::health::live));
    app.route("/ready", web::get().to(controllers::health::ready::<C>));
    app.route("/health/db", web::get().to(controllers::health::health_db::<C>));

    // Metrics endpoint
    app.service(controllers::metrics::metrics);
}

#[get("/")]
pub async fn index() -> impl Responder {
    HttpResponse::Ok().body(env!("CARGO_PKG_NAME"))
}
