use std::process::ExitCode;

use anyhow::Context;

use cpix_keyflow::external::Sandbox;
use cpix_keyflow::{init_logger, Config, Orchestrator, ProviderRegistry, RunReport};

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();

    match run().await {
        Ok(report) => {
            println!("{}", report.summary());
            if report.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<RunReport> {
    let config = Config::load().context("loading configuration")?;

    // Collaborators are in-process until real secret store, key server and
    // bus clients are wired in.
    let sandbox = Sandbox::seeded(&config);
    let collaborators = sandbox.collaborators(&config);

    for provider in &config.providers {
        println!(
            "---- Running {} pipeline (topic '{}') ----",
            provider.provider, provider.topic
        );
    }

    let orchestrator =
        Orchestrator::from_config(&config, &ProviderRegistry::builtin(), &collaborators)
            .context("building provider pipelines")?;
    Ok(orchestrator.run().await)
}
