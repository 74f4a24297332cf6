//! Shared test utilities

#![allow(dead_code)]

use std::sync::Arc;

use wa_ingest::api::ApiServerBuilder;
use wa_ingest::db::{self, CompanyRepo, SqliteGateway};
use wa_ingest::gateway::ResolvedInstance;
use wa_ingest::{DbPool, Pipeline, PipelineSettings};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Create a company with one registered instance
pub fn create_test_instance(db: &DbPool, company: &str, instance: &str) -> ResolvedInstance {
    let repo = CompanyRepo::new(db.clone());
    let company = repo
        .create_company(company)
        .expect("failed to create test company");
    let instance = repo
        .create_instance(&company.id, instance)
        .expect("failed to create test instance");

    ResolvedInstance {
        instance_id: instance.id,
        company_id: company.id,
        company_name: company.name,
    }
}

/// Build a pipeline over the `SQLite` gateway, without media storage
#[must_use]
pub fn test_pipeline(db: &DbPool, settings: PipelineSettings) -> Pipeline {
    let gateway = Arc::new(SqliteGateway::new(db.clone()));
    Pipeline::new(gateway.clone(), gateway, settings)
}

/// Build the full API router with the default webhook path
#[must_use]
pub fn build_test_router(db: DbPool) -> axum::Router {
    build_test_router_with(db, |builder| builder)
}

/// Build the full API router after adjusting the server builder
#[must_use]
pub fn build_test_router_with(
    db: DbPool,
    configure: impl FnOnce(ApiServerBuilder) -> ApiServerBuilder,
) -> axum::Router {
    let pipeline = Arc::new(test_pipeline(&db, PipelineSettings::default()));
    configure(ApiServerBuilder::new(db, pipeline))
        .build()
        .expect("failed to build test server")
        .router()
}
