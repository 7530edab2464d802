//! `brigade-server` binary entrypoint.
//!
//! Serves the API and, by default, hosts the scheduler and observer as
//! in-process components over the in-memory store, queue backend, and
//! fake substrate: a complete single-node control plane. Production
//! deployments run the scheduler and observer as their own processes
//! against shared backends and disable them here with
//! `BRIGADE_RUN_SCHEDULER=false` / `BRIGADE_RUN_OBSERVER=false`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use brigade_core::observability::init_from_env;
use brigade_core::Principal;
use brigade_observer::{Observer, ObserverConfig};
use brigade_queue::InMemoryQueueBackend;
use brigade_scheduler::{Scheduler, SchedulerConfig};
use brigade_server::auth::{Authorizer, ComponentTokens, TokenResolver};
use brigade_server::events::EventsService;
use brigade_server::jobs::JobsService;
use brigade_server::local::LocalApiClient;
use brigade_server::projects::ProjectsService;
use brigade_server::roles::RolesService;
use brigade_server::store::memory::InMemoryStore;
use brigade_server::watch::StatusWatchHub;
use brigade_server::workers::WorkersService;
use brigade_server::{AppState, VERSION};
use brigade_substrate::FakeSubstrate;

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key).map_or(default, |value| value.eq_ignore_ascii_case("true"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_from_env();
    tracing::info!(version = VERSION, "starting Brigade API server");

    let bind = optional_env("BRIGADE_API_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let root_token = optional_env("BRIGADE_ROOT_TOKEN");
    let scheduler_token = required_env("BRIGADE_SCHEDULER_TOKEN")?;
    let observer_token = required_env("BRIGADE_OBSERVER_TOKEN")?;
    let run_scheduler = parse_bool_env("BRIGADE_RUN_SCHEDULER", true);
    let run_observer = parse_bool_env("BRIGADE_RUN_OBSERVER", true);

    if root_token.is_none() {
        tracing::warn!("BRIGADE_ROOT_TOKEN not set; root login is disabled");
    }

    let store = Arc::new(InMemoryStore::new());
    let queues = Arc::new(InMemoryQueueBackend::default());
    let substrate = Arc::new(FakeSubstrate::new());
    let watch_hub = Arc::new(StatusWatchHub::new());
    let authorizer = Arc::new(Authorizer::new(store.clone()));

    let events = Arc::new(EventsService::new(
        store.clone(),
        store.clone(),
        queues.clone(),
        authorizer.clone(),
        watch_hub.clone(),
    ));
    let workers = Arc::new(WorkersService::new(
        store.clone(),
        substrate.clone(),
        authorizer.clone(),
        watch_hub.clone(),
    ));
    let jobs = Arc::new(JobsService::new(
        store.clone(),
        queues.clone(),
        substrate.clone(),
        authorizer.clone(),
        watch_hub.clone(),
    ));
    let projects = Arc::new(ProjectsService::new(store.clone(), authorizer.clone()));
    let roles = Arc::new(RolesService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        authorizer,
    ));

    let token_resolver = Arc::new(TokenResolver::new(
        ComponentTokens::new(root_token.as_deref(), &scheduler_token, &observer_token),
        store.clone(),
        store,
    ));

    let state = AppState {
        version: VERSION,
        token_resolver,
        events: events.clone(),
        workers: workers.clone(),
        jobs: jobs.clone(),
        projects: projects.clone(),
        roles,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut component_tasks = Vec::new();

    if run_scheduler {
        let client = Arc::new(LocalApiClient::new(
            Principal::Scheduler,
            events.clone(),
            workers.clone(),
            jobs.clone(),
            projects.clone(),
        ));
        let scheduler = Scheduler::new(
            SchedulerConfig::from_env()?,
            client.clone(),
            client.clone(),
            client.clone(),
            client,
            queues,
            substrate.clone(),
        );
        tracing::info!("hosting in-process scheduler");
        component_tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    }

    if run_observer {
        let client = Arc::new(LocalApiClient::new(
            Principal::Observer,
            events,
            workers,
            jobs,
            projects,
        ));
        let observer = Observer::new(
            ObserverConfig::from_env()?,
            client.clone(),
            client.clone(),
            client.clone(),
            client,
            substrate,
        );
        tracing::info!("hosting in-process observer");
        component_tasks.push(tokio::spawn(observer.run(shutdown_rx)));
    }

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tokio::select! {
        served = brigade_server::serve(listener, state) => served?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("signal received; shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    for task in component_tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "component exited with error"),
            Err(err) => tracing::error!(error = %err, "component task panicked"),
        }
    }
    Ok(())
}
