use crate::aqi::{breakdown, Category};
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::forecast::MAX_FORECAST_HOURS;
use crate::insights::{
    daily_summary, health_advisory, CleanAirScore, StationRanking, TimeSlot, Trend,
};
use crate::models::{to_ist, AqiRecord, City, ForecastPoint};
use crate::service::{AirQualityService, Outcome};
use clap::{Args, Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use dialoguer::{theme::ColorfulTheme, FuzzySelect, Input};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{error, info};

/// City used when none is given.
pub const DEFAULT_CITY: &str = "Delhi";

/// Rows of history printed before the listing is cut short.
const HISTORY_ROWS_SHOWN: usize = 24;

/// CLI tool for AQI monitoring and forecasting of Indian cities
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Runs the interactive menu when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Show the current AQI and pollutant breakdown for a city
    Current(CityArgs),

    /// Forecast hourly AQI for a city
    Forecast(ForecastArgs),

    /// Show recent AQI history for a city
    History(HistoryArgs),

    /// Weekly clean-air score and trend
    Score(CityArgs),

    /// Best time to go outside over the next 12 hours
    BestTime(CityArgs),

    /// Rank monitoring stations in a city, worst first
    Stations(CityArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CityArgs {
    /// City name (Delhi, Mumbai, Bangalore, Kolkata, Pune)
    #[arg(short, long, default_value = DEFAULT_CITY)]
    pub city: String,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ForecastArgs {
    /// City name (Delhi, Mumbai, Bangalore, Kolkata, Pune)
    #[arg(short, long, default_value = DEFAULT_CITY)]
    pub city: String,

    /// Number of hours to forecast (default: 24, max: 72)
    #[arg(long, default_value_t = 24)]
    pub hours: usize,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct HistoryArgs {
    /// City name (Delhi, Mumbai, Bangalore, Kolkata, Pune)
    #[arg(short, long, default_value = DEFAULT_CITY)]
    pub city: String,

    /// Number of days of history (default: 7, max: 7)
    #[arg(short, long, default_value_t = 7)]
    pub days: u32,
}

/// CLI application
pub struct App {
    service: AirQualityService,
}

impl App {
    /// Create a new CLI application
    pub fn new(settings: &Settings) -> Result<Self> {
        let service = AirQualityService::from_settings(settings)?;
        Ok(Self { service })
    }

    /// Run a single command
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        info!("Running command: {:?}", command);
        match command {
            Commands::Current(args) => self.show_current(&args.city).await,
            Commands::Forecast(args) => {
                validate_hours(args.hours)?;
                self.show_forecast(&args.city, args.hours).await
            },
            Commands::History(args) => self.show_history(&args.city, args.days).await,
            Commands::Score(args) => self.show_score(&args.city).await,
            Commands::BestTime(args) => self.show_best_time(&args.city).await,
            Commands::Stations(args) => self.show_stations(&args.city).await,
        }
    }

    async fn show_current(&self, city: &str) -> Result<()> {
        let bar = spinner(format!("Fetching current AQI for {}...", city))?;
        let outcome = self.service.current_aqi(city).await;
        bar.finish_and_clear();

        let record = report(outcome)?;
        println!("{}", current_headline(city, &record));
        println!("{}", pollutant_table(&record));
        Ok(())
    }

    async fn show_forecast(&self, city: &str, hours: usize) -> Result<()> {
        let bar = spinner(format!("Forecasting {} hours for {}...", hours, city))?;
        let outcome = self.service.forecast(city, hours).await;
        bar.finish_and_clear();

        let points = report(outcome)?;
        if points.is_empty() {
            println!("{}", "No forecast points requested.".yellow());
            return Ok(());
        }

        println!("{}", format!("{}-hour AQI forecast for {}", hours, city).cyan().bold());
        println!("{}", forecast_table(&points));
        println!("{}", daily_table(&points));

        if let Some(advisory) = health_advisory(&points) {
            println!("{}", advisory.headline.bold());
            for line in advisory.advice {
                println!("  - {}", line);
            }
        }
        Ok(())
    }

    async fn show_history(&self, city: &str, days: u32) -> Result<()> {
        let bar = spinner(format!("Fetching {} days of history for {}...", days, city))?;
        let outcome = self.service.history(city, days).await;
        bar.finish_and_clear();

        let records = report(outcome)?;
        println!("AQI history for {}", city.cyan().bold());
        println!("Total records: {}", records.len());
        println!("------------------------------------------");
        println!("{}", history_table(&records));
        if records.len() > HISTORY_ROWS_SHOWN {
            println!(
                "... and {} older rows (showing latest {} only)",
                records.len() - HISTORY_ROWS_SHOWN,
                HISTORY_ROWS_SHOWN
            );
        }
        Ok(())
    }

    async fn show_score(&self, city: &str) -> Result<()> {
        let bar = spinner(format!("Scoring the last week for {}...", city))?;
        let outcome = self.service.clean_air_score(city).await;
        bar.finish_and_clear();

        let score = report(outcome)?;
        println!("{}", score_summary(city, &score));
        println!("{}", score_table(&score));
        Ok(())
    }

    async fn show_best_time(&self, city: &str) -> Result<()> {
        let bar = spinner(format!("Planning the next 12 hours for {}...", city))?;
        let outcome = self.service.best_time(city).await;
        bar.finish_and_clear();

        let slots = report(outcome)?;
        println!("Best time to go outside in {}", city.cyan().bold());
        println!("{}", best_time_table(&slots));
        Ok(())
    }

    async fn show_stations(&self, city: &str) -> Result<()> {
        let bar = spinner(format!("Ranking stations in {}...", city))?;
        let outcome = self.service.station_rankings(city).await;
        bar.finish_and_clear();

        let ranked = report(outcome)?;
        println!("Station rankings for {}", city.cyan().bold());
        println!("{}", station_table(&ranked));
        Ok(())
    }
}

/// Prints any degradation note and unwraps the data; `Unavailable` becomes an error.
fn report<T>(outcome: Outcome<T>) -> Result<T> {
    if let Some(reason) = outcome.degradation() {
        println!("{} {}", "Note:".yellow().bold(), reason.to_string().yellow());
    }
    match outcome {
        Outcome::Fresh(data) | Outcome::Degraded(data, _) => Ok(data),
        Outcome::Unavailable(e) => {
            error!("Operation unavailable: {}", e);
            Err(e)
        },
    }
}

fn validate_hours(hours: usize) -> Result<()> {
    if hours > MAX_FORECAST_HOURS {
        return Err(AppError::Cli(format!(
            "Invalid number of hours. Must be between 0 and {}",
            MAX_FORECAST_HOURS
        )));
    }
    Ok(())
}

fn spinner(message: String) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn category_color(category: Category) -> Color {
    match category {
        Category::Good => Color::Green,
        Category::Satisfactory => Color::DarkGreen,
        Category::Moderate => Color::Yellow,
        Category::Poor => Color::DarkYellow,
        Category::VeryPoor => Color::Red,
        Category::Severe => Color::DarkRed,
        Category::Unknown => Color::Grey,
    }
}

fn category_cell(category: Category) -> Cell {
    Cell::new(category.name()).fg(category_color(category))
}

fn aqi_text(aqi: Option<f64>) -> String {
    aqi.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "-".to_string())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header);
    table
}

fn current_headline(city: &str, record: &AqiRecord) -> String {
    let label = format!(
        "{} AQI {} ({})",
        city,
        aqi_text(record.aqi),
        record.category.name()
    );
    let label = match record.category {
        Category::Good | Category::Satisfactory => label.green(),
        Category::Moderate => label.yellow(),
        Category::Poor | Category::VeryPoor | Category::Severe => label.red(),
        Category::Unknown => label.normal(),
    };
    format!(
        "{}\nUpdated {}",
        label.bold(),
        to_ist(record.timestamp()).format("%Y-%m-%d %H:%M IST")
    )
}

fn pollutant_table(record: &AqiRecord) -> Table {
    let detail = breakdown(&record.reading);
    let mut table = new_table(vec!["Pollutant", "Concentration", "Sub-index"]);
    for (pollutant, value) in record.reading.present() {
        let (shown, unit) = pollutant.presentation(value);
        let sub_index = detail
            .sub_indices
            .iter()
            .find(|(p, _)| *p == pollutant)
            .map(|(_, idx)| *idx);
        let mut name = Cell::new(pollutant.label());
        if detail.controlling == Some(pollutant) {
            name = name.fg(Color::Red);
        }
        table.add_row(vec![
            name,
            Cell::new(format!("{:.2} {}", shown, unit)),
            Cell::new(aqi_text(sub_index)),
        ]);
    }
    table
}

fn forecast_table(points: &[ForecastPoint]) -> Table {
    let mut table = new_table(vec!["Time (IST)", "AQI", "Category"]);
    for point in points {
        table.add_row(vec![
            Cell::new(to_ist(point.timestamp).format("%a %d %b %H:%M")),
            Cell::new(format!("{:.0}", point.predicted_aqi)),
            category_cell(point.category),
        ]);
    }
    table
}

fn daily_table(points: &[ForecastPoint]) -> Table {
    let mut table = new_table(vec!["Date", "Mean", "Min", "Max", "Peak hour", "Category"]);
    for day in daily_summary(points) {
        table.add_row(vec![
            Cell::new(day.date.format("%a %d %b")),
            Cell::new(format!("{:.0}", day.mean_aqi)),
            Cell::new(format!("{:.0}", day.min_aqi)),
            Cell::new(format!("{:.0}", day.max_aqi)),
            Cell::new(format!("{:02}:00", day.peak_hour)),
            category_cell(day.category),
        ]);
    }
    table
}

fn history_table(records: &[AqiRecord]) -> Table {
    let mut table = new_table(vec!["Time (IST)", "AQI", "Category", "PM2.5", "PM10"]);
    let start = records.len().saturating_sub(HISTORY_ROWS_SHOWN);
    for record in records[start..].iter().rev() {
        table.add_row(vec![
            Cell::new(to_ist(record.timestamp()).format("%Y-%m-%d %H:%M")),
            Cell::new(aqi_text(record.aqi)),
            category_cell(record.category),
            Cell::new(aqi_text(record.reading.pm2_5)),
            Cell::new(aqi_text(record.reading.pm10)),
        ]);
    }
    table
}

fn score_summary(city: &str, score: &CleanAirScore) -> String {
    let trend = match score.trend {
        Trend::Up => format!("improving {}%", score.change_percent).green(),
        Trend::Down => format!("worsening {}%", score.change_percent).red(),
        Trend::Stable => "stable".normal(),
    };
    format!(
        "Clean-air score for {}: {}/100 ({})",
        city.cyan().bold(),
        score.score.to_string().bold(),
        trend
    )
}

fn score_table(score: &CleanAirScore) -> Table {
    let mut table = new_table(vec!["Date", "Mean AQI", "Score"]);
    for day in &score.days {
        table.add_row(vec![
            Cell::new(day.date.format("%a %d %b")),
            Cell::new(format!("{:.0}", day.mean_aqi)),
            Cell::new(format!("{:.0}", day.score)),
        ]);
    }
    table
}

fn best_time_table(slots: &[TimeSlot]) -> Table {
    let mut table = new_table(vec!["Time", "AQI", "Conditions", "Safe", ""]);
    for slot in slots {
        let safe = if slot.safe {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&slot.label),
            Cell::new(format!("{:.0}", slot.aqi)),
            Cell::new(slot.conditions),
            safe,
            Cell::new(if slot.recommended { "recommended" } else { "" }),
        ]);
    }
    table
}

fn station_table(ranked: &[StationRanking]) -> Table {
    let mut table = new_table(vec!["#", "Station", "AQI", "Category", "Main pollutant"]);
    for entry in ranked {
        table.add_row(vec![
            Cell::new(entry.rank),
            Cell::new(&entry.name),
            Cell::new(format!("{:.0}", entry.aqi)),
            category_cell(entry.category),
            Cell::new(entry.controlling.map(|p| p.label()).unwrap_or("-")),
        ]);
    }
    table
}

/// Prompt the user to pick a city
pub fn prompt_city() -> Result<String> {
    let names = City::known_names();
    let index = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a city")
        .items(&names)
        .default(0)
        .interact()?;
    Ok(names.get(index).copied().unwrap_or(DEFAULT_CITY).to_string())
}

/// Prompt the user for the number of hours to forecast
pub fn prompt_hours() -> Result<usize> {
    let hours = Input::<usize>::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Hours to forecast (max {})", MAX_FORECAST_HOURS))
        .default(24)
        .validate_with(|h: &usize| {
            if *h <= MAX_FORECAST_HOURS {
                Ok(())
            } else {
                Err("Too many hours")
            }
        })
        .interact_text()?;
    Ok(hours)
}

/// Prompt the user for the number of days of history
pub fn prompt_days() -> Result<u32> {
    let days = Input::<u32>::with_theme(&ColorfulTheme::default())
        .with_prompt("Days of history (1-7)")
        .default(7)
        .validate_with(|d: &u32| {
            if (1..=7).contains(d) {
                Ok(())
            } else {
                Err("Days must be between 1 and 7")
            }
        })
        .interact_text()?;
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{best_time_windows, DailyScore};
    use crate::models::{Pollutant, PollutantReading};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_cli_defaults_and_subcommands() {
        let cli = Cli::try_parse_from(["aqi-forecast", "forecast", "--city", "Pune"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Forecast(ForecastArgs {
                city: "Pune".to_string(),
                hours: 24,
            }))
        );

        let cli = Cli::try_parse_from(["aqi-forecast", "best-time"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::BestTime(CityArgs {
                city: DEFAULT_CITY.to_string(),
            }))
        );

        let cli = Cli::try_parse_from(["aqi-forecast", "history", "-c", "Mumbai", "-d", "3"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::History(HistoryArgs {
                city: "Mumbai".to_string(),
                days: 3,
            }))
        );

        let cli = Cli::try_parse_from(["aqi-forecast"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_validate_hours() {
        assert!(validate_hours(0).is_ok());
        assert!(validate_hours(MAX_FORECAST_HOURS).is_ok());
        match validate_hours(MAX_FORECAST_HOURS + 1) {
            Err(AppError::Cli(msg)) => assert!(msg.contains("Invalid number of hours")),
            other => panic!("Expected Cli error, got {:?}", other),
        }
    }

    #[test]
    fn test_report_unwraps_data_and_surfaces_unavailable() {
        assert_eq!(report(Outcome::Fresh(3)).unwrap(), 3);
        assert_eq!(
            report(Outcome::Degraded(4, crate::service::Degradation::MockFallback)).unwrap(),
            4
        );
        let err = report::<u8>(Outcome::Unavailable(AppError::ModelUnavailable {
            city: "Pune".to_string(),
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_tables_have_one_row_per_item() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 10, 6, 30, 0).unwrap();
        let points: Vec<ForecastPoint> = (0..30)
            .map(|i| ForecastPoint {
                timestamp: ts + chrono::Duration::hours(i),
                predicted_aqi: 150.0,
                category: Category::Moderate,
            })
            .collect();
        assert_eq!(forecast_table(&points).row_iter().count(), 30);
        assert_eq!(daily_table(&points).row_iter().count(), 2);

        let record = crate::aqi::to_record(
            PollutantReading::new(ts)
                .with(Pollutant::Pm25, 90.0)
                .with(Pollutant::Co, 1500.0),
        );
        assert_eq!(pollutant_table(&record).row_iter().count(), 2);

        let records = vec![record; 40];
        assert_eq!(history_table(&records).row_iter().count(), HISTORY_ROWS_SHOWN);

        assert_eq!(best_time_table(&best_time_windows(120.0, ts)).row_iter().count(), 12);

        let score = CleanAirScore {
            score: 70,
            trend: Trend::Down,
            change_percent: 5,
            days: vec![DailyScore {
                date: ts.date_naive(),
                mean_aqi: 150.0,
                score: 70.0,
            }],
        };
        assert_eq!(score_table(&score).row_iter().count(), 1);
        assert!(score_summary("Delhi", &score).contains("70/100"));
    }
}
