use daily_calculator::app;
use daily_calculator::config::AppConfig;
use daily_calculator::logging::init_logger;

/// Entry point of the Daily Calculator JSON API
///
/// Settings come from `DailyCalc.toml` and `DAILY_CALC_*` variables, see
/// [`AppConfig::load`].
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_logger(&config.log_level);

    app::run(config).await
}
