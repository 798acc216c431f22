use std::sync::Arc;
use vigil::{
    sources::Kucoin,
    AnyError, ReportInputs, ReportPlan, SeriesKey, Timeframe, Vigil, WindowSpec,
};

// Prints a BTC/USDT status line on every closed minute bar: current price,
// the running day's high, low and volume, and a 30 period moving average
// over closed 5m bars. Stops by itself after five new bars.
#[tokio::main]
async fn main() -> Result<(), AnyError> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .with_utc_timestamps()
        .init()
        .unwrap();

    let day = SeriesKey::new("BTC/USDT", Timeframe::D1);
    let m5 = SeriesKey::new("BTC/USDT", Timeframe::M5);
    let m1 = SeriesKey::new("BTC/USDT", Timeframe::M1);

    let plan = ReportPlan {
        windows: vec![
            // The single daily bar covers the running session, so the 24h
            // figures stay current. Every closed minute refreshes it too.
            WindowSpec::new(day, 1).refresh_on(m1),
            // The average only uses closed buckets.
            WindowSpec::new(m5, 30).drop_unfinished(),
            WindowSpec::new(m1, 1).drop_unfinished(),
        ],
        inputs: ReportInputs {
            price: m1,
            range: day,
            average: m5,
        },
        report_on: m1,
        budget: Some(5),
    };

    Vigil::default()
        .run(Arc::new(Kucoin::new()), vec![day, m5, m1], plan)
        .await
}
