use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::engine::{Engine, ExecOutcome};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/_sql")
            .route(web::get().to(execute_sql))
            .route(web::post().to(execute_sql)),
    );
}

#[derive(Debug, Deserialize)]
pub struct SqlParams {
    query: String,
}

/// `GET|POST /_sql` with the statement in the `query` field. Mutations
/// answer `{}`, SELECTs the full hit envelope, failures
/// `{"error": "..."}` with 400 for bad statements and 500 otherwise.
async fn execute_sql(
    engine: web::Data<Engine>,
    params: Option<web::Query<SqlParams>>,
    form: Option<web::Form<SqlParams>>,
) -> HttpResponse {
    let sql = match form
        .map(|form| form.into_inner().query)
        .or_else(|| params.map(|params| params.into_inner().query))
    {
        Some(sql) => sql,
        None => {
            return HttpResponse::BadRequest().json(json!({"error": "missing `query` field"}))
        }
    };

    let engine = engine.get_ref().clone();
    let outcome = web::block(move || engine.exec(&sql)).await;
    match outcome {
        Ok(Ok(ExecOutcome::Select(response))) => HttpResponse::Ok().json(response),
        Ok(Ok(ExecOutcome::Ok)) => HttpResponse::Ok().json(json!({})),
        Ok(Err(err)) => {
            tracing::error!(%err, "statement failed");
            HttpResponse::build(err.status_code()).json(json!({"error": err.to_string()}))
        }
        Err(err) => {
            tracing::error!(%err, "statement execution was cancelled");
            HttpResponse::InternalServerError().json(json!({"error": err.to_string()}))
        }
    }
}
