use anyhow::Context;
use calloop::EventLoop;
use plinth::view::HeadlessView;
use plinth::{Config, Platform};

fn main() -> anyhow::Result<()> {
    let _guard = setup_tracing();
    let mut event_loop = EventLoop::<Platform>::try_new().context("failed to setup event loop")?;
    let config = Config::setup();
    let view = HeadlessView::with_signal(event_loop.get_signal());
    let mut platform = Platform::setup(&mut event_loop, config, Box::new(view))?;
    event_loop
        .run(None, &mut platform, |_| {})
        .context("event loop failed")?;
    Ok(())
}

fn setup_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_appender::{non_blocking, rolling::never};
    std::fs::remove_file(".log").ok();
    let (log, guard) = non_blocking(never(".", ".log"));
    tracing_subscriber::fmt()
        .with_writer(log)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    guard
}
