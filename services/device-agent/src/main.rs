use anyhow::Context;
use edgecred_core::{logging, AgentConfig, CancellationToken, Error};
use edgecred_identity::{bootstrap, CredentialAssembler, IdentityClient};
use edgecred_telemetry::{DryRunConnector, ResilientPublisher, SensorSampler};
use std::process::ExitCode;
use tracing::{error, info};

mod signals;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AgentConfig::load() {
        Ok(config) => config,
        Err(err) => {
            logging::init();
            error!(category = err.category(), error = %err, "Invalid configuration");
            return exit_code(err.exit_code());
        }
    };
    logging::init_with(config.logging.format);
    info!(version = edgecred_core::VERSION, "edgecred agent starting");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<Error>() {
            Some(Error::Cancelled) => {
                info!("Cancelled during bootstrap");
                ExitCode::SUCCESS
            }
            Some(inner) => {
                error!(category = inner.category(), error = ?err, "Agent failed");
                exit_code(inner.exit_code())
            }
            None => {
                error!(error = ?err, "Agent failed");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn(signals::handle(shutdown.clone()));

    let identity_client = IdentityClient::from_config(&config.daemons);
    let mut assembler = CredentialAssembler::from_config(&config);
    let (identity, credential) = bootstrap(&identity_client, &mut assembler, &shutdown)
        .await
        .context("bootstrap failed")?;

    info!(
        hub = %identity.hub_name,
        device_id = %identity.device_id,
        client_id = %identity.client_id(),
        username = %identity.mqtt_username(),
        credential = credential.kind(),
        "Bootstrap complete"
    );

    // The messaging transport is supplied by the host; this build logs messages.
    let mut publisher = ResilientPublisher::new(SensorSampler::new(), config.publish.interval());
    publisher
        .connect(&DryRunConnector, credential)
        .await
        .context("failed to open transport session")?;

    let report = publisher.run(&shutdown).await?;
    info!(
        attempts = report.attempts,
        sent = report.sent,
        transient_failures = report.transient_failures,
        unexpected_failures = report.unexpected_failures,
        "Agent stopped"
    );

    signal_task.abort();
    Ok(())
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
