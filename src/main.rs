use anyhow::Context;
use aqi_forecast::cli::{self, App, CityArgs, Cli, Commands, ForecastArgs, HistoryArgs};
use aqi_forecast::config::Settings;
use clap::Parser;
use colored::*;
use dialoguer::{theme::ColorfulTheme, Select};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Console logging always; JSON file logging when a log directory is configured.
/// The returned guard must outlive the program for file logs to be flushed.
fn init_logging(settings: &Settings) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "aqi-forecast.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("loading configuration")?;
    let _guard = init_logging(&settings)?;

    info!("Initializing AQI forecast app...");

    // Initialize the application state (fetch chain, models, cache)
    let app = match App::new(&settings) {
        Ok(app) => {
            info!("Application initialized successfully.");
            app
        },
        Err(e) => {
            error!("Failed to initialize application: {:?}", e);
            println!(
                "{}",
                "Error: Failed to initialize application. Check logs.".red()
            );
            return Err(e).context("initializing application");
        },
    };

    if let Some(command) = cli.command {
        app.run_command(command).await?;
        return Ok(());
    }

    println!("{}", "Welcome to the AQI Forecast CLI!".cyan().bold());

    // Main interactive loop
    loop {
        let options = &[
            "Current AQI",
            "Forecast",
            "History",
            "Clean-air Score",
            "Best Time to Go Outside",
            "Station Rankings",
            "Exit",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("What would you like to do?")
            .items(options)
            .default(0)
            .interact_opt()? // Ctrl+C / Esc cancels
            .unwrap_or(options.len() - 1); // Default to Exit if cancelled

        if selection == options.len() - 1 {
            println!("{}", "Exiting application. Goodbye!".green());
            break;
        }

        println!("\n---\n");

        let city = match cli::prompt_city() {
            Ok(city) => city,
            Err(e) => {
                println!("{} {}", "Failed to get city:".red(), e);
                continue;
            },
        };

        let command = match selection {
            0 => Commands::Current(CityArgs { city }),
            1 => match cli::prompt_hours() {
                Ok(hours) => Commands::Forecast(ForecastArgs { city, hours }),
                Err(e) => {
                    println!("{} {}", "Failed to get hours:".red(), e);
                    continue;
                },
            },
            2 => match cli::prompt_days() {
                Ok(days) => Commands::History(HistoryArgs { city, days }),
                Err(e) => {
                    println!("{} {}", "Failed to get days:".red(), e);
                    continue;
                },
            },
            3 => Commands::Score(CityArgs { city }),
            4 => Commands::BestTime(CityArgs { city }),
            _ => Commands::Stations(CityArgs { city }),
        };

        // Errors are reported and the menu continues
        if let Err(e) = app.run_command(command).await {
            error!("Command execution failed: {:?}", e);
            println!(
                "{} {}",
                "Error executing command:".red(),
                e.to_string().red()
            );
        }

        println!("\n---\n");
    }

    Ok(())
}
