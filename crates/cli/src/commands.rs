//! Command execution against a connected gateway

use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use ispbx_ami_core::{EventFilter, Notification};
use ispbx_pbx_core::{NewEndpoint, Outcome, PbxGateway};

use crate::cli::{Command, EndpointCommand, QueueCommand};

/// Run one command and map its outcome to the process exit status
pub async fn run(gateway: &PbxGateway, command: Command) -> Result<ExitCode> {
    match command {
        Command::Watch { events } => watch(gateway, events).await,
        Command::Endpoint(cmd) => endpoint(gateway, cmd).await,
        Command::Calls { all_channels: true } => print_outcome(&gateway.list_channels().await),
        Command::Calls { all_channels: false } => print_outcome(&gateway.list_active_calls().await),
        Command::Hangup { channel } => print_outcome(&gateway.hangup(&channel).await),
        Command::Queue(QueueCommand::Status { name }) => print_outcome(&gateway.get_queue_status(name.as_deref()).await),
        Command::Queue(QueueCommand::Reload { name }) => print_outcome(&gateway.reload_queue(name.as_deref()).await),
    }
}

async fn endpoint(gateway: &PbxGateway, command: EndpointCommand) -> Result<ExitCode> {
    match command {
        EndpointCommand::Show { id } => print_outcome(&gateway.get_endpoint(id.as_deref()).await),
        EndpointCommand::Create(args) => {
            let endpoint = NewEndpoint::from(args);
            print_outcome(&gateway.create_endpoint(&endpoint).await)
        }
        EndpointCommand::Update(args) => print_outcome(&gateway.update_endpoint(&args.id, &args.changes()).await),
        EndpointCommand::Delete { id } => print_outcome(&gateway.delete_endpoint(&id).await),
        EndpointCommand::State { id } => print_outcome(&gateway.extension_state(&id).await),
        EndpointCommand::Refresh { id } => print_outcome(&gateway.refresh_endpoint_state(&id).await),
    }
}

async fn watch(gateway: &PbxGateway, events: Vec<String>) -> Result<ExitCode> {
    let filter = event_filter(events);
    debug!(?filter, "Watching notifications");

    let subscription = gateway.router().subscribe_fn(filter, |notification: Notification| async move {
        println!("{}", serde_json::to_string(&notification)?);
        Ok::<_, anyhow::Error>(())
    });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Interrupted, stopping watch");
    gateway.router().unsubscribe(subscription);
    Ok(ExitCode::SUCCESS)
}

fn event_filter(mut events: Vec<String>) -> EventFilter {
    match events.len() {
        0 => EventFilter::Any,
        1 => EventFilter::Type(events.remove(0)),
        _ => EventFilter::Types(events),
    }
}

fn print_outcome<T: Serialize>(outcome: &Outcome<T>) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(if fails(outcome) { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn fails<T>(outcome: &Outcome<T>) -> bool {
    outcome.is_error()
}
